// Copyright (C) 2024 Ethan Uppal.
//
// This Source Code Form is subject to the terms of the Mozilla Public License,
// v. 2.0. If a copy of the MPL was not distributed with this file, You can
// obtain one at https://mozilla.org/MPL/2.0/.

//! Project configuration from `strobe.toml`.

use std::{env::current_dir, fs};

use camino::{Utf8Path, Utf8PathBuf};
use snafu::{ResultExt, Whatever, whatever};

pub const CONFIG_FILE_NAME: &str = "strobe.toml";

fn search_for_config(mut start: Utf8PathBuf) -> Option<Utf8PathBuf> {
    loop {
        let candidate = start.join(CONFIG_FILE_NAME);
        if candidate.is_file() {
            return Some(candidate);
        }
        if !start.pop() {
            return None;
        }
    }
}

/// A parsed `strobe.toml`. Relative paths in it are interpreted against the
/// directory containing the file.
#[derive(Debug, Clone)]
pub struct Config {
    path: Utf8PathBuf,
    root: Utf8PathBuf,
    contents: toml::Value,
}

impl Config {
    /// Searches the current directory and its ancestors for `strobe.toml`.
    /// Returns `Ok(None)` if there is none.
    pub fn discover() -> Result<Option<Self>, Whatever> {
        let start: Utf8PathBuf = current_dir()
            .whatever_context("Failed to get current directory")?
            .try_into()
            .whatever_context("Failed to convert current directory to UTF-8")?;
        search_for_config(start).map(Self::load).transpose()
    }

    pub fn load(path: impl AsRef<Utf8Path>) -> Result<Self, Whatever> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).whatever_context(format!(
            "Failed to read contents of {CONFIG_FILE_NAME} at {path}"
        ))?;
        let contents: toml::Value =
            toml::from_str(&contents).whatever_context(format!(
                "Failed to parse {path} as a valid TOML file"
            ))?;
        if !contents.is_table() {
            whatever!("Expected a table at the top of {path}");
        }
        let mut root = path.to_path_buf();
        root.pop();
        Ok(Self {
            path: path.to_path_buf(),
            root,
            contents,
        })
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// The directory containing the configuration file.
    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// The `[name]` table, if present.
    pub fn section(&self, name: &str) -> Option<&toml::Value> {
        self.contents.get(name)
    }

    pub fn string(&self, section: &str, key: &str) -> Result<Option<&str>, Whatever> {
        match self.section(section).and_then(|section| section.get(key)) {
            None => Ok(None),
            Some(toml::Value::String(value)) => Ok(Some(value)),
            Some(other) => whatever!(
                "Expected a string for `{section}.{key}` in {}, got {}",
                self.path,
                other.type_str()
            ),
        }
    }

    pub fn bool(&self, section: &str, key: &str) -> Result<Option<bool>, Whatever> {
        match self.section(section).and_then(|section| section.get(key)) {
            None => Ok(None),
            Some(toml::Value::Boolean(value)) => Ok(Some(*value)),
            Some(other) => whatever!(
                "Expected a boolean for `{section}.{key}` in {}, got {}",
                self.path,
                other.type_str()
            ),
        }
    }

    pub fn strings(
        &self,
        section: &str,
        key: &str,
    ) -> Result<Option<Vec<&str>>, Whatever> {
        let Some(value) = self.section(section).and_then(|section| section.get(key))
        else {
            return Ok(None);
        };
        let Some(array) = value.as_array() else {
            whatever!(
                "Expected an array for `{section}.{key}` in {}, got {}",
                self.path,
                value.type_str()
            );
        };
        array
            .iter()
            .map(|entry| match entry.as_str() {
                Some(entry) => Ok(entry),
                None => whatever!(
                    "Expected only strings in `{section}.{key}` in {}",
                    self.path
                ),
            })
            .collect::<Result<Vec<_>, Whatever>>()
            .map(Some)
    }

    /// A path relative to [`Config::root`].
    pub fn path_of(&self, section: &str, key: &str) -> Result<Option<Utf8PathBuf>, Whatever> {
        Ok(self.string(section, key)?.map(|path| self.root.join(path)))
    }

    /// Expands every glob pattern in `section.key`, relative to
    /// [`Config::root`]. Patterns that match nothing contribute nothing.
    pub fn globbed_paths(
        &self,
        section: &str,
        key: &str,
    ) -> Result<Vec<Utf8PathBuf>, Whatever> {
        let mut result = vec![];
        for pattern in self.strings(section, key)?.unwrap_or_default() {
            let pattern = self.root.join(pattern);
            let paths = glob::glob(pattern.as_str()).whatever_context(format!(
                "Invalid glob pattern `{pattern}` in {}",
                self.path
            ))?;
            for path in paths.flatten() {
                if let Ok(path) = Utf8PathBuf::try_from(path) {
                    result.push(path);
                }
            }
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[snafu::report]
    fn reads_sections_relative_to_root() -> Result<(), Whatever> {
        let directory = tempfile::tempdir()
            .whatever_context("Failed to create temporary directory")?;
        let root = Utf8PathBuf::try_from(directory.path().to_path_buf())
            .whatever_context("Temporary directory is not UTF-8")?;
        fs::create_dir_all(root.join("rtl/include"))
            .whatever_context("Failed to create include directory")?;
        fs::create_dir_all(root.join("nested/deeper"))
            .whatever_context("Failed to create nested directory")?;
        fs::write(
            root.join(CONFIG_FILE_NAME),
            r#"
            [harness]
            artifact_directory = "build/strobe"
            low_detail = true

            [verilator]
            include_directories = ["rtl/*"]
            "#,
        )
        .whatever_context("Failed to write configuration")?;

        let found = search_for_config(root.join("nested/deeper"));
        assert_eq!(found, Some(root.join(CONFIG_FILE_NAME)));

        let config = Config::load(root.join(CONFIG_FILE_NAME))?;
        assert_eq!(
            config.path_of("harness", "artifact_directory")?,
            Some(root.join("build/strobe"))
        );
        assert_eq!(config.bool("harness", "low_detail")?, Some(true));
        assert_eq!(config.bool("harness", "log")?, None);
        assert!(config.string("harness", "low_detail").is_err());
        assert_eq!(
            config.globbed_paths("verilator", "include_directories")?,
            [root.join("rtl/include")]
        );
        Ok(())
    }
}
