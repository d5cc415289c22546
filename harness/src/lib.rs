// Copyright (C) 2024 Ethan Uppal.
//
// This Source Code Form is subject to the terms of the Mozilla Public License,
// v. 2.0. If a copy of the MPL was not distributed with this file, You can
// obtain one at https://mozilla.org/MPL/2.0/.

//! The core of Strobe: binding a declared interface to a simulated circuit,
//! driving it cycle by cycle, and collecting checks into reports.
//!
//! Simulators plug in through the [`Toolchain`] and [`Device`] traits. This
//! crate ships one, the behavioral [`ModelLibrary`]; see `strobe-verilator` for
//! a Verilator backend.

pub mod build;
pub mod check;
pub mod config;
#[doc(hidden)]
pub mod console;
pub mod error;
pub mod generics;
pub mod graph;
pub mod logic;
pub mod model;
pub mod module;
pub mod options;
pub mod port;
pub mod report;
pub mod runner;
pub mod scheduler;
pub mod sim;
pub mod testbench;
pub mod trace;

pub use build::{BuildEvent, BuildKey, BuildOrchestrator, BuildRequest, Toolchain};
pub use check::CheckRecord;
pub use config::Config;
pub use error::{
    BuildError, BuildStage, DependencyCycleError, HarnessError, SimulationError,
    UsageError,
};
pub use generics::{
    GenericDecl, GenericKind, GenericParameterSet, GenericSchema, GenericValue,
};
pub use graph::{CompositionGraph, CompositionNode, NodeId};
pub use logic::{Logic, LogicError, LogicVector};
pub use model::{Behavior, ModelArtifact, ModelDevice, ModelLibrary, Pins};
pub use module::{Composition, ModuleBuilder, ModuleDefinition};
pub use options::HarnessOptions;
pub use port::{
    BoundPort, BoundPorts, Literal, PortDescriptor, PortDirection, PortWidth,
    ResolvedPort, bind,
};
pub use report::{TestFailure, TestReport, TestStatus};
pub use runner::{IntoReports, Suite, SuiteSummary, TestOutcome};
pub use scheduler::Scheduler;
pub use sim::{Device, DeviceError};
pub use testbench::{Harness, Testbench};
pub use trace::{Sample, Trace};

pub mod prelude {
    pub use crate::{
        GenericDecl, Harness, HarnessError, HarnessOptions, Literal, Logic,
        LogicVector, ModuleDefinition, PortDescriptor, PortDirection,
        PortWidth, Suite, TestReport, TestStatus, Testbench,
    };
}
