// Copyright (C) 2024 Ethan Uppal.
//
// This Source Code Form is subject to the terms of the Mozilla Public License,
// v. 2.0. If a copy of the MPL was not distributed with this file, You can
// obtain one at https://mozilla.org/MPL/2.0/.

use std::fmt;

use camino::Utf8PathBuf;
use snafu::Snafu;

use crate::{
    build::BuildKey, check::CheckRecord, error::HarnessError,
    generics::GenericParameterSet,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TestStatus {
    Passed,
    /// At least one check failed.
    Failed,
    /// The run was aborted by an error.
    Errored,
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestStatus::Passed => "PASSED",
            TestStatus::Failed => "FAILED",
            TestStatus::Errored => "ERRORED",
        }
        .fmt(f)
    }
}

/// Everything one run produced.
#[derive(Debug, Clone)]
pub struct TestReport {
    pub module: String,
    pub parameters: GenericParameterSet,
    /// `None` if the run errored before a build key was computed.
    pub key: Option<BuildKey>,
    /// In the order the checks were made.
    pub checks: Vec<CheckRecord>,
    /// How many cycles were driven.
    pub cycles: u64,
    pub status: TestStatus,
    /// Set iff `status` is [`TestStatus::Errored`].
    pub error: Option<HarnessError>,
    /// Where the waveform trace was persisted, if it was.
    pub trace_path: Option<Utf8PathBuf>,
}

impl TestReport {
    pub fn passed(&self) -> bool {
        self.status == TestStatus::Passed
    }

    pub fn failures(&self) -> impl Iterator<Item = &CheckRecord> {
        self.checks.iter().filter(|check| !check.passed)
    }

    /// `Err` unless the run passed. The error enumerates every failing check,
    /// or the error that aborted the run.
    pub fn into_result(self) -> Result<Self, TestFailure> {
        if self.passed() {
            Ok(self)
        } else {
            Err(TestFailure {
                report: Box::new(self),
            })
        }
    }
}

impl fmt::Display for TestReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.module, self.status)?;
        if !self.parameters.is_empty() {
            write!(f, " with {}", self.parameters)?;
        }
        write!(
            f,
            " after {} cycle(s), {} of {} check(s) passed",
            self.cycles,
            self.checks.len() - self.failures().count(),
            self.checks.len()
        )?;
        for failure in self.failures() {
            write!(f, "\n  {failure}")?;
        }
        if let Some(error) = &self.error {
            write!(f, "\n  {}", snafu::Report::from_error(error))?;
        }
        Ok(())
    }
}

/// A non-passing [`TestReport`] as an error, for use in `#[test]` functions.
#[derive(Debug, Snafu)]
#[snafu(display("{report}"))]
pub struct TestFailure {
    pub report: Box<TestReport>,
}
