// Copyright (C) 2024 Ethan Uppal.
//
// This Source Code Form is subject to the terms of the Mozilla Public License,
// v. 2.0. If a copy of the MPL was not distributed with this file, You can
// obtain one at https://mozilla.org/MPL/2.0/.

//! Concurrent execution of named tests.

use std::{
    any::Any,
    panic::{self, AssertUnwindSafe},
    sync::{Arc, mpsc},
    thread::available_parallelism,
    time::{Duration, Instant},
};

use indicatif::ProgressBar;
use owo_colors::OwoColorize;
use snafu::ensure;
use threadpool::ThreadPool;

use crate::{
    error::{DuplicateTestSnafu, UsageError},
    report::{TestReport, TestStatus},
};

/// What a registered test may return.
pub trait IntoReports {
    fn into_reports(self) -> Vec<TestReport>;
}

impl IntoReports for TestReport {
    fn into_reports(self) -> Vec<TestReport> {
        vec![self]
    }
}

impl IntoReports for Vec<TestReport> {
    fn into_reports(self) -> Vec<TestReport> {
        self
    }
}

type TestFn = dyn Fn() -> Vec<TestReport> + Send + Sync;

/// The result of one registered test.
#[derive(Debug, Clone)]
pub struct TestOutcome {
    pub name: String,
    pub status: TestStatus,
    pub reports: Vec<TestReport>,
    /// The panic message, if the test panicked instead of returning.
    pub panic: Option<String>,
    pub duration: Duration,
}

#[derive(Debug, Clone, Default)]
pub struct SuiteSummary {
    /// In registration order.
    pub outcomes: Vec<TestOutcome>,
}

impl SuiteSummary {
    fn count(&self, status: TestStatus) -> usize {
        self.outcomes
            .iter()
            .filter(|outcome| outcome.status == status)
            .count()
    }

    pub fn passed(&self) -> usize {
        self.count(TestStatus::Passed)
    }

    pub fn failed(&self) -> usize {
        self.count(TestStatus::Failed)
    }

    pub fn errored(&self) -> usize {
        self.count(TestStatus::Errored)
    }

    /// Whether every test passed.
    pub fn success(&self) -> bool {
        self.outcomes
            .iter()
            .all(|outcome| outcome.status == TestStatus::Passed)
    }

    /// `0` on success, `1` otherwise.
    pub fn exit_code(&self) -> i32 {
        if self.success() { 0 } else { 1 }
    }
}

/// A set of named tests run on a thread pool.
pub struct Suite {
    tests: Vec<(String, Arc<TestFn>)>,
    filter: String,
    threads: usize,
}

impl Default for Suite {
    fn default() -> Self {
        Self {
            tests: vec![],
            filter: String::new(),
            threads: available_parallelism()
                .map(|value| value.get())
                .unwrap_or(1),
        }
    }
}

impl Suite {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F, R>(
        &mut self,
        name: impl Into<String>,
        test: F,
    ) -> Result<&mut Self, UsageError>
    where
        F: Fn() -> R + Send + Sync + 'static,
        R: IntoReports,
    {
        let name = name.into();
        ensure!(
            self.tests.iter().all(|(existing, _)| *existing != name),
            DuplicateTestSnafu { name }
        );
        self.tests
            .push((name, Arc::new(move || test().into_reports())));
        Ok(self)
    }

    /// Only runs tests whose name contains `pattern`.
    pub fn filter(&mut self, pattern: impl Into<String>) -> &mut Self {
        self.filter = pattern.into();
        self
    }

    pub fn threads(&mut self, threads: usize) -> &mut Self {
        self.threads = threads.max(1);
        self
    }

    pub fn run(&self) -> SuiteSummary {
        let selected = self
            .tests
            .iter()
            .enumerate()
            .filter(|(_, (name, _))| name.contains(&self.filter))
            .collect::<Vec<_>>();
        let test_count = selected.len();
        let worker_count = self.threads.min(test_count.max(1));

        println!(
            "{} {} test{} [{}] across {} thread{}",
            "     STARTING".bold().bright_cyan(),
            test_count,
            if test_count == 1 { "" } else { "s" },
            if self.filter.is_empty() {
                "*".to_string()
            } else {
                format!("*{}*", self.filter)
            },
            worker_count,
            if worker_count == 1 { "" } else { "s" },
        );

        let pool = ThreadPool::new(worker_count);
        let (tx, rx) = mpsc::channel();
        for (index, (name, test)) in &selected {
            let tx = tx.clone();
            let index = *index;
            let name = name.clone();
            let test = test.clone();
            pool.execute(move || {
                let start = Instant::now();
                let outcome = match panic::catch_unwind(AssertUnwindSafe(|| test())) {
                    Ok(reports) => TestOutcome {
                        status: status_of(&reports),
                        name,
                        reports,
                        panic: None,
                        duration: start.elapsed(),
                    },
                    Err(payload) => TestOutcome {
                        name,
                        status: TestStatus::Errored,
                        reports: vec![],
                        panic: Some(panic_message(payload)),
                        duration: start.elapsed(),
                    },
                };
                let _ = tx.send((index, outcome));
            });
        }
        drop(tx);

        let bar = ProgressBar::new(test_count as u64);
        let mut outcomes = Vec::with_capacity(test_count);
        for (index, outcome) in rx.iter() {
            bar.suspend(|| print_outcome(&outcome));
            bar.inc(1);
            outcomes.push((index, outcome));
        }
        bar.finish_and_clear();
        outcomes.sort_by_key(|(index, _)| *index);

        let summary = SuiteSummary {
            outcomes: outcomes.into_iter().map(|(_, outcome)| outcome).collect(),
        };
        println!(
            "{} {} passed, {} failed, {} errored",
            "     FINISHED".bold().bright_cyan(),
            summary.passed(),
            summary.failed(),
            summary.errored()
        );
        summary
    }
}

/// The worst status among `reports`. A test that produced no report ran
/// nothing and is errored.
fn status_of(reports: &[TestReport]) -> TestStatus {
    reports
        .iter()
        .map(|report| report.status)
        .max()
        .unwrap_or(TestStatus::Errored)
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    match payload.downcast::<String>() {
        Ok(message) => *message,
        Err(payload) => payload
            .downcast_ref::<&str>()
            .map(|message| message.to_string())
            .unwrap_or_else(|| "<non-string panic payload>".into()),
    }
}

fn print_outcome(outcome: &TestOutcome) {
    let millis = outcome.duration.as_millis();
    match outcome.status {
        TestStatus::Passed => println!(
            "         {} [{}] {millis}ms",
            "PASS".bold().bright_green(),
            outcome.name
        ),
        TestStatus::Failed => {
            println!(
                "         {} [{}] {millis}ms",
                "FAIL".bold().bright_red(),
                outcome.name
            );
            for report in outcome.reports.iter().filter(|report| !report.passed()) {
                println!("{report}");
            }
        }
        TestStatus::Errored => {
            println!(
                "        {} [{}] {millis}ms",
                "ERROR".bold().on_bright_yellow(),
                outcome.name
            );
            for report in outcome.reports.iter().filter(|report| !report.passed()) {
                println!("{report}");
            }
            if let Some(panic) = &outcome.panic {
                println!("  panicked: {panic}");
            } else if outcome.reports.is_empty() {
                println!("  returned no reports");
            }
        }
    }
}
