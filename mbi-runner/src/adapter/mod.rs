// Copyright (c) The MBI Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Tool adapters: how each verification tool is invoked and how its output is recognized.
//!
//! Adapters are resolved once, from a [`ToolId`], into a [`ToolAdapter`]. The built-in adapters
//! are all [`RecipeAdapter`]s driven by the data in [`recipes`]; output recognition is shared
//! by every adapter through [`patterns::CompiledTable`].

pub mod patterns;
pub mod recipes;

use self::{
    patterns::CompiledTable,
    recipes::{Artifact, Cleanup, ExeForm, Recipe},
};
use crate::{
    annotation::{EXE_PLACEHOLDER, INFTY_BUFFER_PLACEHOLDER, TestCase, ZERO_BUFFER_PLACEHOLDER},
    cache::{CacheEntry, Sidecars},
    config::RunContext,
    errors::{AdapterSetupError, ExecuteError, UnknownToolError},
    outcome::RawOutcome,
    runner::{CommandEnv, ExecRequest, LineAction, LineFilter, ProcessRunner},
};
use camino::Utf8Path;
use regex::Regex;
use serde::Serialize;
use std::{fmt, str::FromStr, sync::LazyLock};

/// The supported verification tools.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolId {
    /// Aislinn.
    Aislinn,
    /// CIVL.
    Civl,
    /// ISP.
    Isp,
    /// MPI-SV.
    Mpisv,
    /// MUST.
    Must,
    /// PARCOACH.
    Parcoach,
    /// SimGrid.
    Simgrid,
}

impl ToolId {
    /// All supported tools.
    pub const ALL: &'static [ToolId] = &[
        ToolId::Aislinn,
        ToolId::Civl,
        ToolId::Isp,
        ToolId::Mpisv,
        ToolId::Must,
        ToolId::Parcoach,
        ToolId::Simgrid,
    ];

    /// Returns the name of this tool, as used on the command line and in ledgers.
    pub fn as_str(self) -> &'static str {
        match self {
            ToolId::Aislinn => "aislinn",
            ToolId::Civl => "civl",
            ToolId::Isp => "isp",
            ToolId::Mpisv => "mpisv",
            ToolId::Must => "must",
            ToolId::Parcoach => "parcoach",
            ToolId::Simgrid => "simgrid",
        }
    }

    /// Returns the built-in adapter for this tool.
    pub fn adapter(self) -> &'static dyn ToolAdapter {
        &ADAPTERS[self as usize]
    }
}

impl fmt::Display for ToolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ToolId {
    type Err = UnknownToolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ToolId::ALL
            .iter()
            .copied()
            .find(|id| id.as_str() == s)
            .ok_or_else(|| UnknownToolError {
                input: s.to_owned(),
            })
    }
}

// Indexed by `ToolId as usize`.
static ADAPTERS: LazyLock<Vec<RecipeAdapter>> = LazyLock::new(|| {
    ToolId::ALL
        .iter()
        .map(|&id| RecipeAdapter::new(recipes::recipe(id)).expect("built-in patterns are valid"))
        .collect()
});

/// How the orchestrator drives a verification tool.
///
/// The core depends on nothing else: command rewriting and output recognition live entirely
/// behind this trait.
pub trait ToolAdapter: fmt::Debug {
    /// Returns the tool this adapter drives.
    fn id(&self) -> ToolId;

    /// Prepares the working directory before the first test of a run.
    fn setup(&self, _ctx: &RunContext) -> Result<(), AdapterSetupError> {
        Ok(())
    }

    /// Cleans the working directory after the last test of a run.
    fn teardown(&self, _ctx: &RunContext) {}

    /// Returns the shell line building `test`, if the tool needs one.
    fn build_command(&self, _test: &TestCase) -> Option<String> {
        None
    }

    /// Returns the command executing `test`, with every placeholder resolved.
    fn exec_command(&self, test: &TestCase) -> String;

    /// Returns the environment of the build and exec commands.
    fn env(&self, _ctx: &RunContext) -> CommandEnv {
        CommandEnv::new()
    }

    /// Returns a filter that sees every output line of the exec command.
    fn line_filter(&self) -> Option<Box<dyn LineFilter>> {
        None
    }

    /// Moves artifacts the tool left behind next to the sidecars, and removes scratch files.
    fn collect_artifacts(&self, _sidecars: &Sidecars, _test: &TestCase) {}

    /// Recognizes the outcome of a completed run from its sidecars.
    fn parse(&self, sidecars: &Sidecars) -> RawOutcome;
}

/// Runs `test` through `adapter`, writing its sidecars into the run's cache directory.
pub async fn run(
    adapter: &dyn ToolAdapter,
    runner: &ProcessRunner,
    ctx: &RunContext,
    test: &TestCase,
) -> Result<CacheEntry, ExecuteError> {
    let sidecars = ctx.cache().sidecars(&test.cache_id());
    let build_command = adapter.build_command(test);
    let exec_command = adapter.exec_command(test);
    let env = adapter.env(ctx);
    let mut line_filter = adapter.line_filter();

    let req = ExecRequest {
        build_command: build_command.as_deref(),
        exec_command: &exec_command,
        sidecars: &sidecars,
        source_path: test.source_file(),
        binary: test.binary(),
        timeout: ctx.timeout(),
        batch: ctx.batch(),
        env: &env,
    };
    let filter = line_filter
        .as_deref_mut()
        .map(|filter| filter as &mut dyn LineFilter);
    let res = runner.execute(&req, filter).await;

    adapter.collect_artifacts(&sidecars, test);
    res
}

/// An adapter driven by a [`Recipe`].
#[derive(Debug)]
pub struct RecipeAdapter {
    recipe: &'static Recipe,
    table: CompiledTable,
    terminate_on: Option<Regex>,
}

impl RecipeAdapter {
    /// Creates an adapter, compiling the recipe's patterns.
    pub fn new(recipe: &'static Recipe) -> Result<Self, regex::Error> {
        Ok(Self {
            recipe,
            table: CompiledTable::new(&recipe.table)?,
            terminate_on: recipe.terminate_on.map(Regex::new).transpose()?,
        })
    }

    /// Returns the recipe.
    pub fn recipe(&self) -> &'static Recipe {
        self.recipe
    }
}

impl ToolAdapter for RecipeAdapter {
    fn id(&self) -> ToolId {
        self.recipe.id
    }

    fn setup(&self, ctx: &RunContext) -> Result<(), AdapterSetupError> {
        for (name, contents) in self.recipe.setup_files {
            let path = ctx.cache_dir().join(name);
            if !path.exists() {
                std::fs::write(&path, contents)
                    .map_err(|err| AdapterSetupError::new(self.id(), err))?;
            }
        }
        Ok(())
    }

    fn teardown(&self, ctx: &RunContext) {
        remove_executables(ctx.cache_dir());
    }

    fn build_command(&self, test: &TestCase) -> Option<String> {
        let source = shell_words::quote(test.source_file().as_str());
        self.recipe.build.map(|template| {
            template
                .replace("{source}", &source)
                .replace("{binary}", test.binary())
        })
    }

    fn exec_command(&self, test: &TestCase) -> String {
        let binary = test.binary();
        if let Some(template) = self.recipe.exec_override {
            return template.replace("{binary}", binary);
        }

        let mut command = test.command().replace("mpirun", self.recipe.launcher);
        if let Some((from, to)) = self.recipe.process_flag {
            command = command.replace(from, to);
        }
        let exe = match self.recipe.exe {
            ExeForm::DotSlashBinary => format!("./{binary}"),
            ExeForm::Binary => binary.to_owned(),
            ExeForm::Bitcode => format!("{binary}.bc"),
            ExeForm::SourcePath => shell_words::quote(test.source_file().as_str()).into_owned(),
        };
        command
            .replace(EXE_PLACEHOLDER, &exe)
            .replace(ZERO_BUFFER_PLACEHOLDER, self.recipe.zero_buffer)
            .replace(INFTY_BUFFER_PLACEHOLDER, self.recipe.infty_buffer)
    }

    fn env(&self, ctx: &RunContext) -> CommandEnv {
        let mut env = CommandEnv::new();
        for (name, value) in self.recipe.env {
            env.set(*name, *value);
        }
        if let Some(root) = ctx.tools_root() {
            for dir in self.recipe.path_dirs {
                env.prepend_path(root.join(dir));
            }
        }
        env
    }

    fn line_filter(&self) -> Option<Box<dyn LineFilter>> {
        let regex = self.terminate_on.clone()?;
        Some(Box::new(move |line: &str| {
            if regex.is_match(line) {
                LineAction::Terminate
            } else {
                LineAction::Continue
            }
        }))
    }

    fn collect_artifacts(&self, sidecars: &Sidecars, test: &TestCase) {
        let dir = sidecars.dir();
        for artifact in self.recipe.artifacts {
            let res = match *artifact {
                Artifact::Rename { from, suffix } => {
                    let src = dir.join(from);
                    if src.exists() {
                        std::fs::rename(&src, sidecars.with_suffix(suffix))
                    } else {
                        Ok(())
                    }
                }
                Artifact::FollowSymlink { link, suffix } => {
                    follow_symlink(&dir.join(link), &sidecars.with_suffix(suffix))
                }
            };
            if let Err(error) = res {
                tracing::warn!("failed to collect {artifact:?} for {}: {error}", sidecars.id());
            }
        }

        for cleanup in self.recipe.cleanup {
            remove_scratch(dir, *cleanup, test.binary());
        }
    }

    fn parse(&self, sidecars: &Sidecars) -> RawOutcome {
        self.table.evaluate(sidecars)
    }
}

fn follow_symlink(link: &Utf8Path, dest: &Utf8Path) -> std::io::Result<()> {
    if link.symlink_metadata().is_err() || dest.exists() {
        return Ok(());
    }
    let target = link.read_link_utf8().map_err(std::io::Error::other)?;
    // Relative targets are relative to the directory holding the link.
    let target = match link.parent() {
        Some(parent) if target.is_relative() => parent.join(target),
        _ => target,
    };
    std::fs::rename(&target, dest)?;
    std::fs::remove_file(link)
}

fn remove_scratch(dir: &Utf8Path, cleanup: Cleanup, binary: &str) {
    let res = match cleanup {
        Cleanup::Exact(name) => remove_any(&dir.join(name)),
        Cleanup::Binary => remove_any(&dir.join(binary)),
        Cleanup::Prefix(_) | Cleanup::Suffix(_) => {
            let Ok(entries) = dir.read_dir_utf8() else {
                return;
            };
            entries
                .filter_map(Result::ok)
                .filter(|entry| match cleanup {
                    Cleanup::Prefix(prefix) => entry.file_name().starts_with(prefix),
                    Cleanup::Suffix(suffix) => entry.file_name().ends_with(suffix),
                    Cleanup::Exact(_) | Cleanup::Binary => false,
                })
                .try_for_each(|entry| remove_any(entry.path()))
        }
    };
    if let Err(error) = res {
        tracing::debug!("failed to remove scratch files ({cleanup:?}) in `{dir}`: {error}");
    }
}

fn remove_any(path: &Utf8Path) -> std::io::Result<()> {
    match path.symlink_metadata() {
        Ok(meta) if meta.is_dir() => std::fs::remove_dir_all(path),
        Ok(_) => std::fs::remove_file(path),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(error) => Err(error),
    }
}

#[cfg(unix)]
fn remove_executables(dir: &Utf8Path) {
    use std::os::unix::fs::PermissionsExt;

    let Ok(entries) = dir.read_dir_utf8() else {
        return;
    };
    for entry in entries.filter_map(Result::ok) {
        let Ok(meta) = entry.metadata() else {
            continue;
        };
        if meta.is_file()
            && meta.permissions().mode() & 0o111 != 0
            && let Err(error) = std::fs::remove_file(entry.path())
        {
            tracing::debug!("failed to remove `{}`: {error}", entry.path());
        }
    }
}

#[cfg(not(unix))]
fn remove_executables(dir: &Utf8Path) {
    let Ok(entries) = dir.read_dir_utf8() else {
        return;
    };
    for entry in entries.filter_map(Result::ok) {
        if entry.path().extension() == Some("exe")
            && let Err(error) = std::fs::remove_file(entry.path())
        {
            tracing::debug!("failed to remove `{}`: {error}", entry.path());
        }
    }
}
