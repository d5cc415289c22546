// Copyright (C) 2024 Ethan Uppal.
//
// This Source Code Form is subject to the terms of the Mozilla Public License,
// v. 2.0. If a copy of the MPL was not distributed with this file, You can
// obtain one at https://mozilla.org/MPL/2.0/.

use std::fmt;

use crate::logic::LogicVector;

/// The outcome of one check. A failing record is data, not an error: the
/// sequence keeps running after it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckRecord {
    pub port: String,
    pub expected: LogicVector,
    pub observed: LogicVector,
    /// The settled cycle the observation was taken at.
    pub cycle: u64,
    pub passed: bool,
    pub message: String,
}

impl CheckRecord {
    /// Exact, symbol-by-symbol comparison over the extended logic domain.
    pub(crate) fn compare(
        port: &str,
        expected: LogicVector,
        observed: LogicVector,
        cycle: u64,
        message: impl Into<String>,
    ) -> Self {
        Self {
            passed: expected == observed,
            port: port.to_string(),
            expected,
            observed,
            cycle,
            message: message.into(),
        }
    }
}

impl fmt::Display for CheckRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[cycle {}] {} {}: expected {}, observed {}",
            self.cycle,
            if self.passed { "PASS" } else { "FAIL" },
            self.port,
            self.expected,
            self.observed
        )?;
        if !self.message.is_empty() {
            write!(f, " ({})", self.message)?;
        }
        Ok(())
    }
}
