// Copyright (c) The multiscan Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{RawHookValue, ResultPolicy, StructuredMerge};
use crate::{
    errors::{ConfigParseError, ConfigParseErrorKind},
    partition::LanePartition,
};
use camino::{Utf8Path, Utf8PathBuf};
use config::{Config, ConfigBuilder, ConfigError, File, FileFormat, builder::DefaultState};
use itertools::Itertools;
use serde::Deserialize;
use std::{collections::BTreeSet, time::Duration};
use tracing::warn;

/// Overall configuration for multiscan.
///
/// This is the root data structure for multiscan configuration. Values are checked once, by
/// [`MultiscanConfig::validate`](Self::validate), before any build or attempt happens.
#[derive(Clone, Debug)]
pub struct MultiscanConfig {
    root: Utf8PathBuf,
    pub(super) inner: MultiscanConfigDeserialize,
}

impl MultiscanConfig {
    /// The default location of the config within the project root: `.config/multiscan.toml`.
    pub const CONFIG_PATH: &'static str = ".config/multiscan.toml";

    /// Contains the default config as a TOML file.
    ///
    /// Project-specific configuration is layered on top of the default config.
    pub const DEFAULT_CONFIG: &'static str = include_str!("../../default-config.toml");

    /// Reads the multiscan config from the given file, or if not specified from
    /// `.config/multiscan.toml` in the project root.
    ///
    /// If no config file is specified and the project doesn't have `.config/multiscan.toml`, uses
    /// the default config options.
    pub fn from_sources(
        root: impl Into<Utf8PathBuf>,
        config_file: Option<&Utf8Path>,
    ) -> Result<Self, ConfigParseError> {
        Self::from_sources_impl(root, config_file, |config_file, unknown| {
            let mut unknown_str = String::new();
            if unknown.len() == 1 {
                // Print this on the same line.
                unknown_str.push(' ');
                unknown_str.extend(unknown.iter().next().map(String::as_str));
            } else {
                for ignored_key in unknown {
                    unknown_str.push('\n');
                    unknown_str.push_str("  - ");
                    unknown_str.push_str(ignored_key);
                }
            }

            warn!("ignoring unknown configuration keys in config file {config_file}:{unknown_str}")
        })
    }

    /// Returns the default configuration for the given project root.
    pub fn default_config(root: impl Into<Utf8PathBuf>) -> Self {
        let config = Self::make_default_config()
            .build()
            .expect("default config is always valid");

        let mut unknown = BTreeSet::new();
        let inner: MultiscanConfigDeserialize =
            serde_ignored::deserialize(config, |path: serde_ignored::Path| {
                unknown.insert(path.to_string());
            })
            .expect("default config is always valid");

        // Make sure there aren't any unknown keys in the default config, since it is
        // embedded/shipped with this binary.
        if !unknown.is_empty() {
            panic!(
                "found unknown keys in default config: {}",
                unknown.iter().join(", ")
            );
        }

        Self {
            root: root.into(),
            inner,
        }
    }

    /// Returns the project root this config was loaded for.
    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// Returns the commands used by the process-backed collaborators.
    pub fn commands(&self) -> CommandsConfig<'_> {
        CommandsConfig {
            build: &self.inner.build_command,
            list: self.inner.list_command.as_deref(),
            test: &self.inner.test_command,
            reset: &self.inner.reset_commands,
            simulator_log_directory: self
                .inner
                .simulator_log_directory
                .as_ref()
                .map(|dir| self.root.join(dir)),
        }
    }

    // A custom unknown_callback can be passed in while testing.
    fn from_sources_impl(
        root: impl Into<Utf8PathBuf>,
        config_file: Option<&Utf8Path>,
        mut unknown_callback: impl FnMut(&Utf8Path, &BTreeSet<String>),
    ) -> Result<Self, ConfigParseError> {
        let root = root.into();
        let (config_file, source) = match config_file {
            Some(file) => (file.to_owned(), File::new(file.as_str(), FileFormat::Toml)),
            None => {
                let config_file = root.join(Self::CONFIG_PATH);
                let source = File::new(config_file.as_str(), FileFormat::Toml).required(false);
                (config_file, source)
            }
        };

        let builder = Self::make_default_config().add_source(source);
        let (inner, unknown) = Self::build_and_deserialize_config(&builder)
            .map_err(|kind| ConfigParseError::new(config_file.clone(), kind))?;

        if !unknown.is_empty() {
            unknown_callback(&config_file, &unknown);
        }

        Ok(Self { root, inner })
    }

    fn make_default_config() -> ConfigBuilder<DefaultState> {
        Config::builder().add_source(File::from_str(Self::DEFAULT_CONFIG, FileFormat::Toml))
    }

    /// This returns a tuple of (config, ignored paths).
    fn build_and_deserialize_config(
        builder: &ConfigBuilder<DefaultState>,
    ) -> Result<(MultiscanConfigDeserialize, BTreeSet<String>), ConfigParseErrorKind> {
        let config = builder
            .build_cloned()
            .map_err(|error| ConfigParseErrorKind::BuildError(Box::new(error)))?;

        let mut ignored = BTreeSet::new();
        let mut cb = |path: serde_ignored::Path| {
            ignored.insert(path.to_string());
        };
        let ignored_de = serde_ignored::Deserializer::new(config, &mut cb);
        let config: MultiscanConfigDeserialize = serde_path_to_error::deserialize(ignored_de)
            .map_err(|error| {
                // serde_path_to_error already records the key, so drop it from the config error.
                let path = error.path().clone();
                let config_error = error.into_inner();
                let error = match config_error {
                    ConfigError::At { error, .. } => *error,
                    other => other,
                };
                ConfigParseErrorKind::DeserializeError(Box::new(serde_path_to_error::Error::new(
                    path, error,
                )))
            })?;

        Ok((config, ignored))
    }
}

/// Commands for the process-backed collaborators, as returned by [`MultiscanConfig::commands`].
#[derive(Clone, Debug)]
pub struct CommandsConfig<'cfg> {
    /// The command that builds the app and its tests.
    pub build: &'cfg [String],

    /// The command that prints one test identifier per line, if configured.
    pub list: Option<&'cfg [String]>,

    /// The command run by each lane. May contain placeholders.
    pub test: &'cfg [String],

    /// Commands run to reset the environment.
    pub reset: &'cfg [Vec<String>],

    /// A directory whose stale `*.log` files are removed on reset.
    pub simulator_log_directory: Option<Utf8PathBuf>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub(super) struct MultiscanConfigDeserialize {
    pub(super) try_count: usize,
    pub(super) parallel_testrun_count: usize,
    #[serde(default)]
    pub(super) batch_count: Option<usize>,
    pub(super) invocation_based_tests: bool,
    pub(super) output_types: String,
    #[serde(default)]
    pub(super) output_files: Option<String>,
    pub(super) output_directory: Utf8PathBuf,
    pub(super) result_bundle: bool,
    pub(super) fail_build: bool,
    pub(super) result_policy: ResultPolicy,
    pub(super) structured_merge: StructuredMerge,
    pub(super) quit_simulators: bool,
    pub(super) reset_on_exit: bool,
    #[serde(default, with = "humantime_serde")]
    pub(super) lane_timeout: Option<Duration>,
    pub(super) lane_partition: LanePartition,
    pub(super) test_without_building: bool,
    pub(super) only_testing: Vec<String>,
    pub(super) targets: Vec<String>,
    pub(super) collate_reports: bool,
    pub(super) collated_report_file: Utf8PathBuf,
    #[serde(default)]
    pub(super) lane_started_hook: Option<RawHookValue>,
    pub(super) build_command: Vec<String>,
    #[serde(default)]
    pub(super) list_command: Option<Vec<String>>,
    pub(super) test_command: Vec<String>,
    pub(super) reset_commands: Vec<Vec<String>>,
    #[serde(default)]
    pub(super) simulator_log_directory: Option<Utf8PathBuf>,
}
