// Copyright (c) The MBI Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration for benchmark runs.
//!
//! Settings are layered: the embedded defaults, then an optional user config file, then
//! environment variables prefixed with `MBI_`. Command-line overrides are applied on top with the
//! `with_` methods. The result is frozen into a [`RunContext`], which every component receives
//! explicitly.

use crate::{
    adapter::ToolId,
    cache::ExecutionCache,
    errors::{ConfigParseError, ConfigParseErrorKind},
    ledger::ledger_file_name,
    partition::BatchSpec,
    runner::RunnerSettings,
};
use camino::{Utf8Path, Utf8PathBuf};
use config::{
    Case, Config, ConfigBuilder, ConfigError, Environment, File, FileFormat, builder::DefaultState,
};
use serde::Deserialize;
use std::time::Duration;

/// The path of the user config file, relative to the root directory.
pub const USER_CONFIG_PATH: &str = ".config/mbi.toml";

/// The prefix of environment variables overriding configuration.
pub const ENV_PREFIX: &str = "MBI";

/// Resolved configuration for a benchmark run.
#[derive(Clone, Debug)]
pub struct MbiConfig {
    root: Utf8PathBuf,
    timeout: Duration,
    runner_settings: RunnerSettings,
    codes_dir: Utf8PathBuf,
    logs_dir: Utf8PathBuf,
    tools_root: Option<Utf8PathBuf>,
    batch: BatchSpec,
}

impl MbiConfig {
    /// The default configuration, embedded in the binary.
    pub const DEFAULT_CONFIG: &'static str = include_str!("../default-config.toml");

    /// Reads configuration from the defaults, the user config file and the environment.
    ///
    /// If `config_file` is `None`, `<root>/.config/mbi.toml` is read if it exists. Relative
    /// directories are resolved against `root`.
    pub fn from_sources(
        root: impl Into<Utf8PathBuf>,
        config_file: Option<&Utf8Path>,
    ) -> Result<Self, ConfigParseError> {
        Self::from_sources_impl(root.into(), config_file, None)
    }

    /// Returns the embedded defaults, ignoring user config files and the environment.
    pub fn defaults(root: impl Into<Utf8PathBuf>) -> Result<Self, ConfigParseError> {
        let root = root.into();
        Self::build(root, Self::make_default_config(), None)
    }

    // `env` replaces the process environment if set.
    fn from_sources_impl(
        root: Utf8PathBuf,
        config_file: Option<&Utf8Path>,
        env: Option<config::Map<String, String>>,
    ) -> Result<Self, ConfigParseError> {
        let (user_file, required) = match config_file {
            Some(file) => (file.to_owned(), true),
            None => (root.join(USER_CONFIG_PATH), false),
        };

        let builder = Self::make_default_config()
            .add_source(File::new(user_file.as_str(), FileFormat::Toml).required(required))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .convert_case(Case::Kebab)
                    .source(env),
            );

        let shown_file = (required || user_file.exists()).then_some(user_file);
        Self::build(root, builder, shown_file)
    }

    fn make_default_config() -> ConfigBuilder<DefaultState> {
        Config::builder().add_source(File::from_str(Self::DEFAULT_CONFIG, FileFormat::Toml))
    }

    fn build(
        root: Utf8PathBuf,
        builder: ConfigBuilder<DefaultState>,
        config_file: Option<Utf8PathBuf>,
    ) -> Result<Self, ConfigParseError> {
        let err = |kind| ConfigParseError::new(config_file.clone(), kind);

        let config = builder
            .build()
            .map_err(|error| err(ConfigParseErrorKind::BuildError(Box::new(error))))?;
        let de: MbiConfigDeserialize = serde_path_to_error::deserialize(config).map_err(|error| {
            // serde_path_to_error already reports the key.
            let path = error.path().clone();
            let error = match error.into_inner() {
                ConfigError::At { error, .. } => *error,
                other => other,
            };
            err(ConfigParseErrorKind::DeserializeError(Box::new(
                serde_path_to_error::Error::new(path, error),
            )))
        })?;
        let batch = de
            .batch
            .parse()
            .map_err(|error| err(ConfigParseErrorKind::InvalidBatch(error)))?;

        Ok(Self {
            codes_dir: root.join(de.codes_dir),
            logs_dir: root.join(de.logs_dir),
            tools_root: de.tools_root.map(|dir| root.join(dir)),
            root,
            timeout: de.timeout,
            runner_settings: RunnerSettings {
                grace_period: de.grace_period,
                poll_interval: de.poll_interval,
                drain_timeout: de.drain_timeout,
            },
            batch,
        })
    }

    /// Returns the root directory.
    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// Returns the wall-clock budget of each exec command.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Returns the process runner's timing parameters.
    pub fn runner_settings(&self) -> &RunnerSettings {
        &self.runner_settings
    }

    /// Returns the directory holding the annotated test codes.
    pub fn codes_dir(&self) -> &Utf8Path {
        &self.codes_dir
    }

    /// Returns the directory holding per-tool caches and ledgers.
    pub fn logs_dir(&self) -> &Utf8Path {
        &self.logs_dir
    }

    /// Returns the base directory of tool installations, if configured.
    pub fn tools_root(&self) -> Option<&Utf8Path> {
        self.tools_root.as_deref()
    }

    /// Returns the batch run by this instance.
    pub fn batch(&self) -> BatchSpec {
        self.batch
    }

    /// Overrides the timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Overrides the runner's timing parameters.
    pub fn with_runner_settings(mut self, settings: RunnerSettings) -> Self {
        self.runner_settings = settings;
        self
    }

    /// Overrides the codes directory. Relative paths are resolved against the root directory.
    pub fn with_codes_dir(mut self, dir: impl AsRef<Utf8Path>) -> Self {
        self.codes_dir = self.root.join(dir);
        self
    }

    /// Overrides the logs directory. Relative paths are resolved against the root directory.
    pub fn with_logs_dir(mut self, dir: impl AsRef<Utf8Path>) -> Self {
        self.logs_dir = self.root.join(dir);
        self
    }

    /// Overrides the tools root. Relative paths are resolved against the root directory.
    pub fn with_tools_root(mut self, dir: impl AsRef<Utf8Path>) -> Self {
        self.tools_root = Some(self.root.join(dir));
        self
    }

    /// Overrides the batch.
    pub fn with_batch(mut self, batch: BatchSpec) -> Self {
        self.batch = batch;
        self
    }

    /// Freezes this configuration into the context of a run of `tool`.
    pub fn into_run_context(self, tool: ToolId) -> RunContext {
        let cache_dir = self.logs_dir.join(tool.as_str());
        RunContext {
            tool,
            timeout: self.timeout,
            runner_settings: self.runner_settings,
            codes_dir: self.codes_dir,
            logs_dir: self.logs_dir,
            cache_dir,
            batch: self.batch,
            tools_root: self.tools_root,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "kebab-case")]
struct MbiConfigDeserialize {
    #[serde(with = "humantime_serde")]
    timeout: Duration,
    #[serde(with = "humantime_serde")]
    grace_period: Duration,
    #[serde(with = "humantime_serde")]
    poll_interval: Duration,
    #[serde(with = "humantime_serde")]
    drain_timeout: Duration,
    codes_dir: Utf8PathBuf,
    logs_dir: Utf8PathBuf,
    #[serde(default)]
    tools_root: Option<Utf8PathBuf>,
    batch: String,
}

/// The immutable context of one benchmark run.
#[derive(Clone, Debug)]
pub struct RunContext {
    tool: ToolId,
    timeout: Duration,
    runner_settings: RunnerSettings,
    codes_dir: Utf8PathBuf,
    logs_dir: Utf8PathBuf,
    cache_dir: Utf8PathBuf,
    batch: BatchSpec,
    tools_root: Option<Utf8PathBuf>,
}

impl RunContext {
    /// Returns the tool being benchmarked.
    pub fn tool(&self) -> ToolId {
        self.tool
    }

    /// Returns the wall-clock budget of each exec command.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Returns the process runner's timing parameters.
    pub fn runner_settings(&self) -> &RunnerSettings {
        &self.runner_settings
    }

    /// Returns the directory holding the annotated test codes.
    pub fn codes_dir(&self) -> &Utf8Path {
        &self.codes_dir
    }

    /// Returns the directory holding per-tool caches and ledgers.
    pub fn logs_dir(&self) -> &Utf8Path {
        &self.logs_dir
    }

    /// Returns the directory holding this tool's sidecars. Commands run in it.
    pub fn cache_dir(&self) -> &Utf8Path {
        &self.cache_dir
    }

    /// Returns the execution cache of this tool.
    pub fn cache(&self) -> ExecutionCache {
        ExecutionCache::new(&self.cache_dir)
    }

    /// Returns the path of this tool's result ledger.
    pub fn ledger_path(&self) -> Utf8PathBuf {
        self.logs_dir.join(ledger_file_name(self.tool))
    }

    /// Returns the batch run by this instance.
    pub fn batch(&self) -> BatchSpec {
        self.batch
    }

    /// Returns the base directory of tool installations, if configured.
    pub fn tools_root(&self) -> Option<&Utf8Path> {
        self.tools_root.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino_tempfile::Utf8TempDir;
    use pretty_assertions::assert_eq;

    fn env(vars: &[(&str, &str)]) -> Option<config::Map<String, String>> {
        Some(
            vars.iter()
                .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
                .collect(),
        )
    }

    #[test]
    fn defaults() {
        let config = MbiConfig::defaults("/work").expect("defaults parse");
        assert_eq!(config.timeout(), Duration::from_secs(300));
        assert_eq!(config.runner_settings(), &RunnerSettings::default());
        assert_eq!(config.codes_dir(), Utf8Path::new("/work/gencodes"));
        assert_eq!(config.logs_dir(), Utf8Path::new("/work/logs"));
        assert_eq!(config.tools_root(), None);
        assert_eq!(config.batch(), BatchSpec::ALL);

        let ctx = config.into_run_context(ToolId::Must);
        assert_eq!(ctx.cache_dir(), Utf8Path::new("/work/logs/must"));
        assert_eq!(ctx.ledger_path(), Utf8Path::new("/work/logs/bench_must.csv"));
    }

    #[test]
    fn user_file_then_env() {
        let dir = Utf8TempDir::new().expect("created temp dir");
        std::fs::create_dir(dir.path().join(".config")).unwrap();
        std::fs::write(
            dir.path().join(USER_CONFIG_PATH),
            "timeout = \"60s\"\ngrace-period = \"1s\"\nbatch = \"2/3\"\ntools-root = \"/opt/mbi\"\n",
        )
        .unwrap();

        let config = MbiConfig::from_sources_impl(
            dir.path().to_owned(),
            None,
            env(&[("MBI_TIMEOUT", "2m"), ("MBI_LOGS_DIR", "out")]),
        )
        .expect("config parses");

        assert_eq!(config.timeout(), Duration::from_secs(120));
        assert_eq!(config.runner_settings().grace_period, Duration::from_secs(1));
        assert_eq!(config.batch(), BatchSpec::new(2, 3).unwrap());
        assert_eq!(config.logs_dir(), dir.path().join("out").as_path());
        assert_eq!(config.tools_root(), Some(Utf8Path::new("/opt/mbi")));
    }

    #[test]
    fn env_overrides_every_key() {
        let dir = Utf8TempDir::new().expect("created temp dir");
        let config = MbiConfig::from_sources_impl(
            dir.path().to_owned(),
            None,
            env(&[
                ("MBI_CODES_DIR", "corpus"),
                ("MBI_LOGS_DIR", "out"),
                ("MBI_GRACE_PERIOD", "2s"),
                ("MBI_POLL_INTERVAL", "5ms"),
                ("MBI_DRAIN_TIMEOUT", "3s"),
                ("MBI_TOOLS_ROOT", "/opt/mbi"),
            ]),
        )
        .expect("config parses");

        assert_eq!(config.codes_dir(), dir.path().join("corpus").as_path());
        assert_eq!(config.logs_dir(), dir.path().join("out").as_path());
        assert_eq!(
            config.runner_settings(),
            &RunnerSettings {
                grace_period: Duration::from_secs(2),
                poll_interval: Duration::from_millis(5),
                drain_timeout: Duration::from_secs(3),
            }
        );
        assert_eq!(config.tools_root(), Some(Utf8Path::new("/opt/mbi")));
    }

    #[test]
    fn invalid_values() {
        let dir = Utf8TempDir::new().expect("created temp dir");

        let err = MbiConfig::from_sources_impl(
            dir.path().to_owned(),
            None,
            env(&[("MBI_TIMEOUT", "forever")]),
        )
        .expect_err("timeout is invalid");
        match err.kind() {
            ConfigParseErrorKind::DeserializeError(error) => {
                assert_eq!(error.path().to_string(), "timeout");
            }
            other => panic!("unexpected error kind: {other:?}"),
        }

        let err = MbiConfig::from_sources_impl(
            dir.path().to_owned(),
            None,
            env(&[("MBI_BATCH", "4/3")]),
        )
        .expect_err("batch is invalid");
        assert!(
            matches!(err.kind(), ConfigParseErrorKind::InvalidBatch(_)),
            "unexpected error kind: {:?}",
            err.kind()
        );
    }

    #[test]
    fn missing_explicit_file() {
        let dir = Utf8TempDir::new().expect("created temp dir");
        let file = dir.path().join("missing.toml");
        let err = MbiConfig::from_sources_impl(dir.path().to_owned(), Some(&file), env(&[]))
            .expect_err("file is required");
        assert_eq!(err.config_file(), Some(file.as_path()));
        assert!(matches!(err.kind(), ConfigParseErrorKind::BuildError(_)));
    }
}
