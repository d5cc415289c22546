// Copyright (C) 2024 Ethan Uppal.
//
// This Source Code Form is subject to the terms of the Mozilla Public License,
// v. 2.0. If a copy of the MPL was not distributed with this file, You can
// obtain one at https://mozilla.org/MPL/2.0/.

//! Errors that abort a test run.
//!
//! A failing check is not an error: it is recorded as a
//! [`crate::CheckRecord`] and the run continues. Everything here, on the other
//! hand, stops the current run and surfaces in its [`crate::TestReport`] as
//! [`crate::TestStatus::Errored`].

use std::fmt;

use snafu::Snafu;

use crate::{logic::LogicError, port::PortDirection, sim::DeviceError};

/// A caller bug: malformed definitions, bindings, literals or generics.
#[derive(Debug, Clone, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum UsageError {
    #[snafu(display("Module `{module}` is malformed: {reason}"))]
    InvalidDefinition { module: String, reason: String },
    #[snafu(display(
        "Port {port} is not declared on module `{module}`: did you forget to add it to the module definition?"
    ))]
    UnknownPort { module: String, port: String },
    #[snafu(display(
        "Port {port} declared on module `{module}` is absent from the simulated instance"
    ))]
    MissingPort { module: String, port: String },
    #[snafu(display(
        "Port {port} on module `{module}` is declared as {declared} but the simulated instance has {found}"
    ))]
    PortMismatch {
        module: String,
        port: String,
        declared: String,
        found: String,
    },
    #[snafu(display(
        "Port {port} on module `{module}` is an {declared} port and cannot be bound as an {requested} port"
    ))]
    InvalidOrientation {
        module: String,
        port: String,
        declared: PortDirection,
        requested: PortDirection,
    },
    #[snafu(display(
        "Port {port} on module `{module}` has width {width}, but the value has width {actual}"
    ))]
    WidthMismatch {
        module: String,
        port: String,
        width: usize,
        actual: usize,
    },
    #[snafu(display("Invalid value for port {port} on module `{module}`"))]
    InvalidLiteral {
        module: String,
        port: String,
        source: LogicError,
    },
    #[snafu(display(
        "Expected value for port {port} on module `{module}` must match its width exactly; extended literals are only accepted by writes"
    ))]
    ExtendedExpectation { module: String, port: String },
    #[snafu(display(
        "Port {port} on module `{module}` is bound as an output and cannot be written"
    ))]
    WriteToOutput { module: String, port: String },
    #[snafu(display(
        "Port {port} on module `{module}` is the clock and is driven by the scheduler"
    ))]
    ClockOwned { module: String, port: String },
    #[snafu(display("Generic {generic} is not declared on module `{module}`"))]
    UnknownGeneric { module: String, generic: String },
    #[snafu(display(
        "Generic {generic} on module `{module}` has no default and was not supplied"
    ))]
    MissingGeneric { module: String, generic: String },
    #[snafu(display("Generic {generic} on module `{module}` was supplied twice"))]
    DuplicateGeneric { module: String, generic: String },
    #[snafu(display("Invalid value for generic {generic} on module `{module}`: {reason}"))]
    InvalidGeneric {
        module: String,
        generic: String,
        reason: String,
    },
    #[snafu(display("Composition node `{node}` is declared twice"))]
    DuplicateNode { node: String },
    #[snafu(display("Cannot advance module `{module}` by zero cycles"))]
    ZeroCycles { module: String },
    #[snafu(display("Test `{name}` is registered twice"))]
    DuplicateTest { name: String },
}

/// A composition graph in which a node depends on itself.
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(display(
    "Dependency cycle while resolving `{root}`: {}",
    path.join(" -> ")
))]
pub struct DependencyCycleError {
    /// The node resolution started from.
    pub root: String,
    /// The cycle, starting and ending at the same node.
    pub path: Vec<String>,
}

/// Which external tool invocation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildStage {
    Compile,
    Render,
}

impl fmt::Display for BuildStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildStage::Compile => "compile",
            BuildStage::Render => "render",
        }
        .fmt(f)
    }
}

/// The external toolchain failed for one build key. Runs that depend on other
/// keys are unaffected.
#[derive(Debug, Clone, Snafu)]
#[snafu(display("Failed to {stage} `{key}`\n\n{diagnostic}"))]
pub struct BuildError {
    pub key: String,
    pub stage: BuildStage,
    /// The raw diagnostic text of the underlying tool.
    pub diagnostic: String,
}

/// The simulated instance failed.
#[derive(Debug, Clone, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SimulationError {
    #[snafu(display("Failed to instantiate module `{module}`\n\n{diagnostic}"))]
    Instantiate { module: String, diagnostic: String },
    #[snafu(display("Simulated instance of module `{module}` failed"))]
    Device { module: String, source: DeviceError },
}

/// Any error that aborts a test run.
#[derive(Debug, Clone, Snafu)]
pub enum HarnessError {
    #[snafu(transparent)]
    Usage { source: UsageError },
    #[snafu(transparent)]
    Cycle { source: DependencyCycleError },
    #[snafu(transparent)]
    Build { source: BuildError },
    #[snafu(transparent)]
    Simulation { source: SimulationError },
}

/// Flattens an error and its sources into the text stored in [`BuildError`]
/// and [`SimulationError::Instantiate`].
pub(crate) fn diagnostic<E: std::error::Error + 'static>(error: E) -> String {
    snafu::Report::from_error(error).to_string()
}
