// Copyright (c) The MBI Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Invocation recipes and pattern tables for the supported tools.
//!
//! These tables are ground truth for each tool: the same message may map to different outcomes
//! in different tools, and no universal taxonomy is inferred from them.

use super::{
    ToolId,
    patterns::{PatternRule, PatternTable, TimeoutPriority},
};
use crate::outcome::RawOutcome;

/// How `${EXE}` is rewritten.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ExeForm {
    /// `./<binary>`.
    DotSlashBinary,
    /// `<binary>`.
    Binary,
    /// `<binary>.bc`.
    Bitcode,
    /// The absolute path to the source file.
    SourcePath,
}

/// An artifact left in the working directory by a tool, moved next to the sidecars after a run.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Artifact {
    /// Rename `from` to `<id><suffix>`.
    Rename {
        /// The file name the tool writes.
        from: &'static str,
        /// The sidecar suffix.
        suffix: &'static str,
    },

    /// Rename the target of the symlink `link` to `<id><suffix>`, then remove the link.
    FollowSymlink {
        /// The symlink the tool writes.
        link: &'static str,
        /// The sidecar suffix.
        suffix: &'static str,
    },
}

/// Files removed from the working directory after a run.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Cleanup {
    /// A file or directory with exactly this name.
    Exact(&'static str),
    /// Files whose name starts with this prefix.
    Prefix(&'static str),
    /// Files whose name ends with this suffix.
    Suffix(&'static str),
    /// The built binary.
    Binary,
}

/// Everything needed to drive one tool.
#[derive(Clone, Debug)]
pub struct Recipe {
    /// The tool.
    pub id: ToolId,

    /// A one-line description.
    pub description: &'static str,

    /// What `mpirun` is replaced with.
    pub launcher: &'static str,

    /// How the process-count flag is rewritten: `(from, to)`.
    pub process_flag: Option<(&'static str, &'static str)>,

    /// How `${EXE}` is rewritten.
    pub exe: ExeForm,

    /// What `$zero_buffer` is replaced with.
    pub zero_buffer: &'static str,

    /// What `$infty_buffer` is replaced with.
    pub infty_buffer: &'static str,

    /// A shell line building the test. `{source}` and `{binary}` are substituted.
    pub build: Option<&'static str>,

    /// A fixed exec command replacing the annotated one. `{binary}` is substituted.
    pub exec_override: Option<&'static str>,

    /// Directories added to `PATH`, relative to the tools root.
    pub path_dirs: &'static [&'static str],

    /// Extra environment variables.
    pub env: &'static [(&'static str, &'static str)],

    /// Files written once into the working directory before the first run: `(name, contents)`.
    pub setup_files: &'static [(&'static str, &'static str)],

    /// Artifacts collected after a run.
    pub artifacts: &'static [Artifact],

    /// Files removed after a run.
    pub cleanup: &'static [Cleanup],

    /// Output lines that make the runner terminate the process tree early.
    pub terminate_on: Option<&'static str>,

    /// How the output is recognized.
    pub table: PatternTable,
}

const MSG_RACE: PatternRule = PatternRule::log("MBI_MSG_RACE", RawOutcome::error("MBI_MSG_RACE"));

/// The recipe for Aislinn.
pub static AISLINN: Recipe = Recipe {
    id: ToolId::Aislinn,
    description: "Aislinn, a dynamic verifier of MPI programs",
    launcher: "aislinn",
    process_flag: Some(("-np ", "-p=")),
    exe: ExeForm::Binary,
    zero_buffer: "--send-protocol=rendezvous",
    infty_buffer: "--send-protocol=eager",
    build: Some("aislinn-cc -g {source} -o {binary}"),
    exec_override: None,
    path_dirs: &["tools/aislinn-git/bin"],
    env: &[],
    setup_files: &[],
    artifacts: &[Artifact::Rename {
        from: "report.html",
        suffix: ".html",
    }],
    cleanup: &[Cleanup::Prefix("vgcore."), Cleanup::Binary],
    terminate_on: None,
    table: PatternTable {
        rules: &[
            PatternRule::log("No errors found", RawOutcome::Ok),
            PatternRule::log("INFO: Found error 'Deadlock'", RawOutcome::error("deadlock")),
            PatternRule::log(
                "INFO: Found error 'Pending message'",
                RawOutcome::error("Pending message"),
            ),
            PatternRule::log(
                "INFO: Found error 'Invalid color'",
                RawOutcome::error("Invalid color"),
            ),
            PatternRule::log(
                "INFO: Found error 'Invalid communicator'",
                RawOutcome::error("Invalid communicator"),
            ),
            PatternRule::log(
                "INFO: Found error 'Invalid count'",
                RawOutcome::error("Invalid count"),
            ),
            PatternRule::log(
                "INFO: Found error 'Invalid datatype'",
                RawOutcome::error("Invalid datatype"),
            ),
            PatternRule::log(
                "INFO: Found error 'Invalid group'",
                RawOutcome::error("Invalid group"),
            ),
            PatternRule::log(
                "INFO: Found error 'Invalid operation'",
                RawOutcome::error("Invalid operation"),
            ),
            PatternRule::log(
                "INFO: Found error 'Invalid rank'",
                RawOutcome::error("Invalid rank"),
            ),
            PatternRule::log(
                "INFO: Found error 'Invalid request'",
                RawOutcome::error("Invalid request"),
            ),
            PatternRule::log("INFO: Found error 'Invalid tag'", RawOutcome::error("Invalid tag")),
            PatternRule::log(
                "INFO: Found error 'Invalid write'",
                RawOutcome::error("concurrency error"),
            ),
            PatternRule::log(
                "INFO: Found error 'Request is not persistent'",
                RawOutcome::error("Request is not persistent"),
            ),
            PatternRule::log(
                "INFO: Found error 'Pending request'",
                RawOutcome::error("Pending request"),
            ),
            PatternRule::log(
                "INFO: Found error 'Collective operation: root mismatch'",
                RawOutcome::error("Collective operation: root mismatch"),
            ),
            PatternRule::log(
                "INFO: Found error 'Collective operation mismatch'",
                RawOutcome::error("Collective operation mismatch"),
            ),
            PatternRule::log(
                "INFO: Found error 'Mixing blocking and nonblocking collective operation'",
                RawOutcome::error("Mixing blocking and nonblocking collective operation"),
            ),
            PatternRule::log("Unkn?own function call", RawOutcome::Unimplemented),
            PatternRule::log(r"Traceback \(most recent call last\):", RawOutcome::Failure),
        ],
        timeout_priority: TimeoutPriority::Last,
        report_suffix: None,
        report_required: false,
        fallback: RawOutcome::Other,
    },
};

/// The recipe for CIVL.
pub static CIVL: Recipe = Recipe {
    id: ToolId::Civl,
    description: "CIVL, a symbolic execution and model checking framework",
    launcher: "java -jar /MBI-builds/civl.jar verify",
    process_flag: Some(("-np ", "-input_mpi_nprocs=")),
    exe: ExeForm::SourcePath,
    zero_buffer: "",
    infty_buffer: "",
    build: None,
    exec_override: None,
    path_dirs: &[],
    env: &[],
    setup_files: &[],
    artifacts: &[],
    cleanup: &[],
    terminate_on: None,
    table: PatternTable {
        rules: &[
            PatternRule::log(
                r"cannot be invoked without MPI_Init\(\) being called before",
                RawOutcome::error("mpierr"),
            ),
            PatternRule::log("DEADLOCK", RawOutcome::error("deadlock")),
            MSG_RACE,
            PatternRule::log(
                "reaches an MPI collective routine .*? while at least one of others are collectively reaching MPI_",
                RawOutcome::error("collective mismatch"),
            ),
            PatternRule::log(
                "which has an inconsistent datatype specification with at least one of others",
                RawOutcome::error("datatype mismatch"),
            ),
            PatternRule::log(
                "of MPI routines is not consistent with the specified MPI_Datatype",
                RawOutcome::error("datatype mismatch"),
            ),
            PatternRule::log(
                "which has a different root with at least one of others",
                RawOutcome::error("root mismatch"),
            ),
            PatternRule::log("has a different MPI_Op", RawOutcome::error("various")),
            PatternRule::log("MPI message leak", RawOutcome::error("resleak")),
            PatternRule::log("MEMORY_LEAK", RawOutcome::error("resleak")),
            PatternRule::log("The standard properties hold for all executions", RawOutcome::Ok),
            PatternRule::log("A CIVL internal error has occurred", RawOutcome::Failure),
            PatternRule::log(
                "kind: UNDEFINED_VALUE, certainty: (MAYBE|PROVEABLE)",
                RawOutcome::error("UNDEFINED_VALUE"),
            ),
            PatternRule::log(
                "kind: DEREFERENCE, certainty: (MAYBE|PROVEABLE)",
                RawOutcome::error("DEREFERENCE"),
            ),
            PatternRule::log(
                "kind: MPI_ERROR, certainty: (MAYBE|PROVEABLE)",
                RawOutcome::error("MPI_ERROR"),
            ),
            PatternRule::log("This feature is not yet implemented", RawOutcome::Unimplemented),
            PatternRule::log("doesn.t have a definition", RawOutcome::Unimplemented),
            PatternRule::log("Undeclared identifier", RawOutcome::Unimplemented),
            // Spurious error on communicator inequality tests.
            PatternRule::log(
                "Error: Incompatible types for operator NEQ:\nstruct MPI_Comm\nstruct MPI_Comm\nat",
                RawOutcome::Failure,
            ),
            PatternRule::log(
                "Exception in thread \"main\" java.lang.ArrayIndexOutOfBoundsException",
                RawOutcome::Failure,
            ),
            PatternRule::log(r"java\.lang\.ClassCastException", RawOutcome::Failure),
        ],
        timeout_priority: TimeoutPriority::First,
        report_suffix: None,
        report_required: false,
        fallback: RawOutcome::Other,
    },
};

/// The recipe for ISP.
pub static ISP: Recipe = Recipe {
    id: ToolId::Isp,
    description: "ISP, an in-situ partial order dynamic verifier",
    launcher: "isp.exe",
    process_flag: Some(("-np", "-n")),
    exe: ExeForm::DotSlashBinary,
    zero_buffer: "-b",
    infty_buffer: "-g",
    build: Some("ispcc -o {binary} {source}"),
    exec_override: None,
    path_dirs: &["builds/ISP/bin"],
    env: &[],
    setup_files: &[],
    artifacts: &[],
    cleanup: &[Cleanup::Binary],
    terminate_on: None,
    table: PatternTable {
        rules: &[
            PatternRule::log("ISP detected deadlock!!!", RawOutcome::error("deadlock")),
            PatternRule::log("Detected a DEADLOCK in interleaving", RawOutcome::error("deadlock")),
            MSG_RACE,
            PatternRule::log("resource leaks detected", RawOutcome::error("resleak")),
            PatternRule::log(
                "Attempting to use an MPI routine after finalizing MPI",
                RawOutcome::error("mpierr"),
            ),
            PatternRule::log(
                "Rank [0-9]: WARNING: Waited on non-existant request in",
                RawOutcome::error("mpierr"),
            ),
            PatternRule::log(
                "Rank [0-9]: Invalid rank in MPI_.*? at ",
                RawOutcome::error("mpierr"),
            ),
            PatternRule::log("Fatal error in PMPI", RawOutcome::error("mpierr")),
            PatternRule::log("Fatal error in MPI", RawOutcome::error("mpierr")),
            PatternRule::log("ISP detected no deadlocks", RawOutcome::Ok),
            PatternRule::log(
                "BAD TERMINATION OF ONE OF YOUR APPLICATION PROCESSES",
                RawOutcome::Failure,
            ),
            PatternRule::log(
                "Command killed by signal 15, elapsed time: 300",
                RawOutcome::Timeout,
            ),
        ],
        timeout_priority: TimeoutPriority::First,
        report_suffix: None,
        report_required: false,
        fallback: RawOutcome::Other,
    },
};

/// The recipe for MPI-SV.
pub static MPISV: Recipe = Recipe {
    id: ToolId::Mpisv,
    description: "MPI-SV, a symbolic verifier of MPI programs",
    launcher: "mpisv",
    process_flag: Some(("-np ", "")),
    exe: ExeForm::Bitcode,
    zero_buffer: "",
    infty_buffer: "",
    build: Some("mpisvcc {source} -o {binary}.bc"),
    exec_override: None,
    path_dirs: &[],
    env: &[],
    setup_files: &[],
    artifacts: &[Artifact::FollowSymlink {
        link: "klee-last",
        suffix: "-klee-out",
    }],
    cleanup: &[
        Cleanup::Binary,
        Cleanup::Suffix(".bin"),
        Cleanup::Suffix(".istats"),
        Cleanup::Suffix(".ll"),
        Cleanup::Exact("pid"),
        Cleanup::Exact("core"),
    ],
    terminate_on: None,
    table: PatternTable {
        rules: &[
            PatternRule::log("failed external call", RawOutcome::Unimplemented),
            PatternRule::log("found deadlock", RawOutcome::error("deadlock")),
            MSG_RACE,
            PatternRule::log("klee: .*? Assertion `.*? failed.", RawOutcome::Failure),
            PatternRule::report("No Violation detected by MPI-SV", RawOutcome::Ok),
        ],
        timeout_priority: TimeoutPriority::First,
        report_suffix: Some("-klee-out/info"),
        report_required: true,
        fallback: RawOutcome::Other,
    },
};

/// The recipe for MUST.
pub static MUST: Recipe = Recipe {
    id: ToolId::Must,
    description: "MUST, a runtime error detector for MPI",
    launcher: "mustrun --must:distributed",
    process_flag: None,
    exe: ExeForm::DotSlashBinary,
    zero_buffer: "",
    infty_buffer: "",
    build: Some("mpicc {source} -o {binary}"),
    exec_override: None,
    path_dirs: &["builds/MUST/bin"],
    env: &[],
    setup_files: &[],
    artifacts: &[Artifact::Rename {
        from: "MUST_Output.html",
        suffix: ".html",
    }],
    cleanup: &[Cleanup::Exact("must_temp"), Cleanup::Exact("core"), Cleanup::Binary],
    terminate_on: Some("ERROR: MUST detected a deadlock"),
    table: PatternTable {
        rules: &[
            PatternRule::report("deadlock", RawOutcome::error("deadlock")),
            PatternRule::report("not freed", RawOutcome::error("resleak")),
            PatternRule::report("conflicting roots", RawOutcome::error("various")),
            PatternRule::report("unknown datatype", RawOutcome::error("conflicting roots")),
            PatternRule::report(
                "has to be a non-negative integer",
                RawOutcome::error("conflicting roots"),
            ),
            PatternRule::report(
                "must use equal type signatures",
                RawOutcome::error("conflicting roots"),
            ),
            MSG_RACE,
            PatternRule::log("caught MPI error", RawOutcome::error("mpierr")),
            PatternRule::report("Error", RawOutcome::error("mpierr")),
            PatternRule::report(
                "MUST detected no MPI usage errors nor any suspicious behavior during this application run",
                RawOutcome::Ok,
            ),
            PatternRule::log("internal ABORT - process ", RawOutcome::Failure),
        ],
        // MUST keeps running after reporting a root mismatch.
        timeout_priority: TimeoutPriority::Last,
        report_suffix: Some(".html"),
        report_required: true,
        fallback: RawOutcome::Other,
    },
};

/// The recipe for PARCOACH.
pub static PARCOACH: Recipe = Recipe {
    id: ToolId::Parcoach,
    description: "PARCOACH, a static analyzer of collective call ordering",
    launcher: "",
    process_flag: None,
    exe: ExeForm::Bitcode,
    zero_buffer: "",
    infty_buffer: "",
    build: Some(
        "clang -c -g -emit-llvm {source} -I/usr/lib/x86_64-linux-gnu/mpich/include/ -o {binary}.bc",
    ),
    exec_override: Some(
        "opt-9 -load /MBI-builds/parcoach/src/aSSA/aSSA.so -parcoach -check-mpi {binary}.bc -o /dev/null",
    ),
    path_dirs: &[],
    env: &[],
    setup_files: &[],
    artifacts: &[],
    cleanup: &[Cleanup::Suffix(".bc"), Cleanup::Exact("core")],
    terminate_on: None,
    table: PatternTable {
        rules: &[
            MSG_RACE,
            PatternRule::log(r"0 warning\(s\) issued", RawOutcome::Ok),
            PatternRule::log("missing info for external function", RawOutcome::Unimplemented),
        ],
        timeout_priority: TimeoutPriority::First,
        report_suffix: None,
        report_required: false,
        // Anything else is a reported call ordering issue.
        fallback: RawOutcome::error("deadlock"),
    },
};

const SIMGRID_PLATFORM: &str = "<?xml version='1.0'?>
<!DOCTYPE platform SYSTEM \"https://simgrid.org/simgrid.dtd\">
<platform version=\"4.1\">
 <cluster id=\"acme\" prefix=\"node-\" radical=\"0-99\" suffix=\"\" speed=\"1Gf\" bw=\"125MBps\" lat=\"50us\"/>
</platform>
";

/// The recipe for SimGrid.
pub static SIMGRID: Recipe = Recipe {
    id: ToolId::Simgrid,
    description: "SimGrid's model checker, Mc SimGrid",
    launcher: "smpirun -wrapper simgrid-mc -platform ./cluster.xml -analyze --cfg=smpi/finalization-barrier:on --cfg=smpi/list-leaks:10 --cfg=model-check/max-depth:10000 --cfg=smpi/pedantic:true",
    process_flag: None,
    exe: ExeForm::Binary,
    zero_buffer: "--cfg=smpi/buffering:zero",
    infty_buffer: "--cfg=smpi/buffering:infty",
    build: Some(
        "smpicc {source} -trace-call-location -g -Wl,-znorelro -Wl,-znoseparate-code -o {binary}",
    ),
    exec_override: None,
    path_dirs: &[],
    env: &[("VERBOSE", "1")],
    setup_files: &[("cluster.xml", SIMGRID_PLATFORM)],
    artifacts: &[],
    cleanup: &[Cleanup::Prefix("smpitmp-"), Cleanup::Exact("core"), Cleanup::Binary],
    terminate_on: None,
    table: PatternTable {
        rules: &[
            MSG_RACE,
            PatternRule::log("MC is currently not supported here", RawOutcome::Failure),
            PatternRule::log(
                "Collective communication mismatch",
                RawOutcome::error("Collective mismatch"),
            ),
            PatternRule::log("DEADLOCK DETECTED", RawOutcome::error("deadlock")),
            PatternRule::log("returned MPI_ERR", RawOutcome::error("mpierr")),
            PatternRule::log("Not yet implemented", RawOutcome::Unimplemented),
            PatternRule::log("CRASH IN THE PROGRAM", RawOutcome::Failure),
            PatternRule::log(
                "Probable memory leaks in your code: SMPI detected",
                RawOutcome::error("resleak"),
            ),
            PatternRule::log("DFS exploration ended.", RawOutcome::Ok),
        ],
        timeout_priority: TimeoutPriority::First,
        report_suffix: None,
        report_required: false,
        fallback: RawOutcome::Other,
    },
};

/// Returns the recipe of a tool.
pub fn recipe(id: ToolId) -> &'static Recipe {
    match id {
        ToolId::Aislinn => &AISLINN,
        ToolId::Civl => &CIVL,
        ToolId::Isp => &ISP,
        ToolId::Mpisv => &MPISV,
        ToolId::Must => &MUST,
        ToolId::Parcoach => &PARCOACH,
        ToolId::Simgrid => &SIMGRID,
    }
}
