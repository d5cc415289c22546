// Copyright (C) 2024 Ethan Uppal.
//
// This Source Code Form is subject to the terms of the Mozilla Public License,
// v. 2.0. If a copy of the MPL was not distributed with this file, You can
// obtain one at https://mozilla.org/MPL/2.0/.

//! Running scripted sequences against a module.
//!
//! A [`Harness`] pairs a [`ModuleDefinition`] with a shared
//! [`BuildOrchestrator`]. Every call to [`Harness::test_with`] is one isolated
//! run: it resolves generics, obtains a build, instantiates a fresh device,
//! binds ports, and hands a [`Testbench`] to the sequence. The run always ends
//! in a [`TestReport`], whatever went wrong along the way.

use std::{collections::BTreeMap, fmt, sync::Arc};

use camino::{Utf8Path, Utf8PathBuf};

use crate::{
    build::{BuildOrchestrator, Toolchain},
    check::CheckRecord,
    error::{HarnessError, SimulationError, UsageError, diagnostic},
    generics::{GenericParameterSet, GenericValue},
    logic::LogicVector,
    module::ModuleDefinition,
    port::{Literal, PortDirection, bind},
    report::{TestReport, TestStatus},
    scheduler::Scheduler,
    sim::Device,
    trace::Trace,
};

/// The script's view of one running device.
pub struct Testbench<D: Device> {
    definition: Arc<ModuleDefinition>,
    parameters: GenericParameterSet,
    scheduler: Scheduler<D>,
    checks: Vec<CheckRecord>,
    /// The first error raised to the script. Once set, the run is over: every
    /// later write, advance or check returns it without touching the device.
    fault: Option<HarnessError>,
}

impl<D: Device> Testbench<D> {
    pub fn module(&self) -> &ModuleDefinition {
        &self.definition
    }

    pub fn parameters(&self) -> &GenericParameterSet {
        &self.parameters
    }

    /// Queues `value` for `port`. It reaches the device at the next
    /// [`Testbench::advance`].
    pub fn write(
        &mut self,
        port: &str,
        value: impl Into<Literal>,
    ) -> Result<(), HarnessError> {
        self.healthy()?;
        let bits = self
            .scheduler
            .ports()
            .prepare_write(port, &value.into())
            .map_err(HarnessError::from);
        let bits = self.latch(bits)?;
        self.scheduler.queue(port, bits);
        Ok(())
    }

    /// The value of `port` as of the last settled cycle.
    pub fn read(&self, port: &str) -> Result<LogicVector, HarnessError> {
        self.scheduler.ports().get(port)?;
        Ok(self.scheduler.read(port)?)
    }

    pub fn advance(&mut self, cycles: u64) -> Result<(), HarnessError> {
        self.healthy()?;
        let outcome = self.scheduler.advance(cycles);
        self.latch(outcome)
    }

    /// Advances one cycle.
    pub fn cycle(&mut self) -> Result<(), HarnessError> {
        self.advance(1)
    }

    /// Compares the settled value of `port` with `expected` and records the
    /// outcome. A mismatch is recorded and returned, never raised; only a
    /// malformed `expected` is an error, and it ends the run.
    pub fn check(
        &mut self,
        port: &str,
        expected: impl Into<Literal>,
        message: impl Into<String>,
    ) -> Result<CheckRecord, HarnessError> {
        self.healthy()?;
        let expected = self
            .scheduler
            .ports()
            .prepare_expected(port, &expected.into())
            .map_err(HarnessError::from);
        let expected = self.latch(expected)?;
        let observed = self.scheduler.read(port).map_err(HarnessError::from);
        let observed = self.latch(observed)?;
        let record = CheckRecord::compare(
            port,
            expected,
            observed,
            self.scheduler.cycle(),
            message,
        );
        self.checks.push(record.clone());
        Ok(record)
    }

    pub fn checks(&self) -> &[CheckRecord] {
        &self.checks
    }

    /// The resolved width of `port` under the current generics.
    pub fn width(&self, port: &str) -> Result<usize, UsageError> {
        Ok(self.scheduler.ports().get(port)?.width)
    }

    pub fn generic(&self, name: &str) -> Option<&GenericValue> {
        self.parameters.get(name)
    }

    pub fn generic_integer(&self, name: &str) -> Option<i64> {
        self.generic(name).and_then(GenericValue::as_integer)
    }

    /// The index of the last settled cycle; `0` right after instantiation.
    pub fn current_cycle(&self) -> u64 {
        self.scheduler.cycle()
    }

    /// Stops recording per-cycle samples. Outcomes are unaffected.
    pub fn disable_trace(&mut self) {
        self.scheduler.set_low_detail(true);
    }

    pub fn enable_trace(&mut self) {
        self.scheduler.set_low_detail(false);
    }

    pub fn trace(&self) -> &Trace {
        self.scheduler.trace()
    }

    fn healthy(&self) -> Result<(), HarnessError> {
        match &self.fault {
            Some(fault) => Err(fault.clone()),
            None => Ok(()),
        }
    }

    fn latch<R>(&mut self, result: Result<R, HarnessError>) -> Result<R, HarnessError> {
        if let Err(error) = &result {
            self.fault.get_or_insert_with(|| error.clone());
        }
        result
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunState {
    Init,
    Running,
    Passed,
    Failed,
    Errored,
    Reported,
}

impl RunState {
    fn permits(self, next: RunState) -> bool {
        use RunState::*;
        matches!(
            (self, next),
            (Init, Running | Errored)
                | (Running, Passed | Failed | Errored)
                | (Passed | Failed | Errored, Reported)
        )
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Init => "INIT",
            RunState::Running => "RUNNING",
            RunState::Passed => "PASSED",
            RunState::Failed => "FAILED",
            RunState::Errored => "ERRORED",
            RunState::Reported => "REPORTED",
        }
        .fmt(f)
    }
}

struct Run {
    state: RunState,
    report: TestReport,
    log: bool,
}

impl Run {
    fn new(module: &str, log: bool) -> Self {
        Self {
            state: RunState::Init,
            report: TestReport {
                module: module.to_string(),
                parameters: GenericParameterSet::default(),
                key: None,
                checks: vec![],
                cycles: 0,
                status: TestStatus::Errored,
                error: None,
                trace_path: None,
            },
            log,
        }
    }

    fn transition(&mut self, next: RunState) {
        debug_assert!(
            self.state.permits(next),
            "Illegal run transition {} -> {next}",
            self.state
        );
        if self.log {
            log::trace!("{}: {} -> {next}", self.report.module, self.state);
        }
        self.state = next;
    }

    fn finish(mut self, outcome: Result<(), HarnessError>) -> TestReport {
        let (state, status) = match &outcome {
            Err(_) => (RunState::Errored, TestStatus::Errored),
            Ok(()) if self.report.checks.iter().any(|check| !check.passed) => {
                (RunState::Failed, TestStatus::Failed)
            }
            Ok(()) => (RunState::Passed, TestStatus::Passed),
        };
        self.transition(state);
        self.report.status = status;
        self.report.error = outcome.err();
        self.transition(RunState::Reported);
        if self.log {
            log::debug!("{}", self.report);
        }
        self.report
    }
}

/// Runs sequences against one module.
pub struct Harness<T: Toolchain> {
    definition: Arc<ModuleDefinition>,
    orchestrator: Arc<BuildOrchestrator<T>>,
    orientation: BTreeMap<String, PortDirection>,
}

impl<T: Toolchain> Harness<T> {
    pub fn new(
        definition: impl Into<Arc<ModuleDefinition>>,
        orchestrator: Arc<BuildOrchestrator<T>>,
    ) -> Self {
        Self {
            definition: definition.into(),
            orchestrator,
            orientation: BTreeMap::new(),
        }
    }

    /// Binds the bidirectional `port` as `direction` in every run of this
    /// harness. Checked against the port's capability when a run binds.
    pub fn orient(mut self, port: impl Into<String>, direction: PortDirection) -> Self {
        self.orientation.insert(port.into(), direction);
        self
    }

    pub fn definition(&self) -> &ModuleDefinition {
        &self.definition
    }

    pub fn orchestrator(&self) -> &Arc<BuildOrchestrator<T>> {
        &self.orchestrator
    }

    /// [`Harness::test_with`] using only default generics.
    pub fn test<F>(&self, sequence: F) -> TestReport
    where
        F: FnOnce(&mut Testbench<T::Device>) -> Result<(), HarnessError>,
    {
        self.run(self.defaults(), sequence)
    }

    /// Runs `sequence` on a fresh instance built with `parameters`.
    pub fn test_with<F, I, K, V>(&self, sequence: F, parameters: I) -> TestReport
    where
        F: FnOnce(&mut Testbench<T::Device>) -> Result<(), HarnessError>,
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<GenericValue>,
    {
        self.run(self.definition.resolve_generics(parameters), sequence)
    }

    /// Builds the artifact for `parameters` without simulating it.
    pub fn build<I, K, V>(
        &self,
        parameters: I,
    ) -> Result<Arc<T::Artifact>, HarnessError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<GenericValue>,
    {
        let parameters = self.definition.resolve_generics(parameters)?;
        let request = self.orchestrator.prepare(&self.definition, &parameters)?;
        Ok(self.orchestrator.ensure(&request)?)
    }

    /// Renders a structural diagram for `parameters` into `output` without
    /// simulating it.
    pub fn render<I, K, V>(
        &self,
        parameters: I,
        output: impl AsRef<Utf8Path>,
    ) -> Result<Utf8PathBuf, HarnessError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<GenericValue>,
    {
        let parameters = self.definition.resolve_generics(parameters)?;
        let request = self.orchestrator.prepare(&self.definition, &parameters)?;
        Ok(self.orchestrator.render(&request, output.as_ref())?)
    }

    fn defaults(&self) -> Result<GenericParameterSet, UsageError> {
        self.definition
            .resolve_generics(std::iter::empty::<(String, GenericValue)>())
    }

    fn run<F>(
        &self,
        parameters: Result<GenericParameterSet, UsageError>,
        sequence: F,
    ) -> TestReport
    where
        F: FnOnce(&mut Testbench<T::Device>) -> Result<(), HarnessError>,
    {
        let mut run =
            Run::new(self.definition.name(), self.orchestrator.options().log);
        let outcome = self.drive(&mut run, parameters, sequence);
        run.finish(outcome)
    }

    fn drive<F>(
        &self,
        run: &mut Run,
        parameters: Result<GenericParameterSet, UsageError>,
        sequence: F,
    ) -> Result<(), HarnessError>
    where
        F: FnOnce(&mut Testbench<T::Device>) -> Result<(), HarnessError>,
    {
        let options = self.orchestrator.options();
        let parameters = parameters?;
        run.report.parameters = parameters.clone();

        let request = self.orchestrator.prepare(&self.definition, &parameters)?;
        run.report.key = Some(request.key.clone());
        let artifact = self.orchestrator.ensure(&request)?;

        if options.log {
            log::info!("Instantiating {}", request.key);
        }
        let device = self
            .orchestrator
            .toolchain()
            .instantiate(&artifact)
            .map_err(|error| SimulationError::Instantiate {
                module: self.definition.name().to_string(),
                diagnostic: diagnostic(error),
            })?;
        let ports =
            bind(&self.definition, &request.interface, &self.orientation, &device)?;
        let scheduler = Scheduler::new(device, ports, options.low_detail)?;

        run.transition(RunState::Running);
        let mut testbench = Testbench {
            definition: self.definition.clone(),
            parameters,
            scheduler,
            checks: vec![],
            fault: None,
        };
        let outcome = match (sequence(&mut testbench), testbench.fault.take()) {
            (_, Some(fault)) => Err(fault),
            (outcome, None) => outcome,
        };

        run.report.checks = testbench.checks;
        run.report.cycles = testbench.scheduler.cycle();
        if let Some(directory) = &options.trace_directory {
            let trace = testbench.scheduler.into_trace();
            if !trace.is_empty() {
                let run_index = self.orchestrator.next_run();
                let path = directory.join(format!("{}-{run_index}.vcd", request.key));
                match trace.save(self.definition.name(), &path) {
                    Ok(()) => run.report.trace_path = Some(path),
                    Err(error) if options.log => {
                        log::warn!("{}", snafu::Report::from_error(error));
                    }
                    Err(_) => {}
                }
            }
        }
        outcome
    }
}
