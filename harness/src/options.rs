// Copyright (C) 2024 Ethan Uppal.
//
// This Source Code Form is subject to the terms of the Mozilla Public License,
// v. 2.0. If a copy of the MPL was not distributed with this file, You can
// obtain one at https://mozilla.org/MPL/2.0/.

use camino::Utf8PathBuf;
use snafu::Whatever;

use crate::config::Config;

/// Optional configuration for a [`crate::BuildOrchestrator`] and the runs it
/// serves. Usually, you can just use [`HarnessOptions::default()`].
#[derive(Debug, Clone)]
pub struct HarnessOptions {
    /// Where backends that persist artifacts put them, one subdirectory per
    /// build key.
    pub artifact_directory: Utf8PathBuf,

    /// If set, every run writes its waveform trace here as
    /// `<build key>-<run index>.vcd`, where the run index is unique per
    /// orchestrator.
    pub trace_directory: Option<Utf8PathBuf>,

    /// Whether runs start with per-cycle trace recording suppressed. A script
    /// can still toggle it.
    pub low_detail: bool,

    /// Whether backends must recompile even if an up-to-date artifact exists
    /// on disk. The in-process cache is still honored.
    pub force_rebuild: bool,

    /// Whether to use the log crate.
    pub log: bool,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            artifact_directory: "artifacts".into(),
            trace_directory: None,
            low_detail: false,
            force_rebuild: false,
            log: false,
        }
    }
}

impl HarnessOptions {
    /// The same as the [`Default`] implementation except that the log crate is
    /// used.
    pub fn default_logging() -> Self {
        Self {
            log: true,
            ..Default::default()
        }
    }

    /// Overrides defaults with the `[harness]` section of `config`.
    pub fn from_config(config: &Config) -> Result<Self, Whatever> {
        let mut options = Self::default();
        if let Some(directory) = config.path_of("harness", "artifact_directory")? {
            options.artifact_directory = directory;
        }
        options.trace_directory = config.path_of("harness", "trace_directory")?;
        if let Some(low_detail) = config.bool("harness", "low_detail")? {
            options.low_detail = low_detail;
        }
        if let Some(force_rebuild) = config.bool("harness", "force_rebuild")? {
            options.force_rebuild = force_rebuild;
        }
        if let Some(log) = config.bool("harness", "log")? {
            options.log = log;
        }
        Ok(options)
    }

    /// [`HarnessOptions::from_config`] on the discovered `strobe.toml`, or the
    /// defaults if there is none.
    pub fn discover() -> Result<Self, Whatever> {
        match Config::discover()? {
            Some(config) => Self::from_config(&config),
            None => Ok(Self::default()),
        }
    }
}
