// Copyright (C) 2024 Ethan Uppal.
//
// This Source Code Form is subject to the terms of the Mozilla Public License,
// v. 2.0. If a copy of the MPL was not distributed with this file, You can
// obtain one at https://mozilla.org/MPL/2.0/.

//! The simulation interface consumed by the harness.

use snafu::Snafu;

use crate::{
    logic::LogicVector,
    port::{PortDirection, ResolvedPort},
};

/// A live simulated instance of one module.
///
/// The harness drives a device from a single thread, one step at a time.
/// Implementations need not be reentrant.
pub trait Device {
    /// The ports the instance actually exposes.
    fn interface(&self) -> Vec<ResolvedPort>;

    /// Drives `port`. Takes effect on the next [`Device::advance`].
    fn write(&mut self, port: &str, value: &LogicVector)
    -> Result<(), DeviceError>;

    /// The last-settled value of `port`.
    fn read(&self, port: &str) -> Result<LogicVector, DeviceError>;

    /// Proceeds through `cycles` active clock edges and settles.
    fn advance(&mut self, cycles: u64) -> Result<(), DeviceError>;
}

impl<D: Device + ?Sized> Device for Box<D> {
    fn interface(&self) -> Vec<ResolvedPort> {
        (**self).interface()
    }

    fn write(
        &mut self,
        port: &str,
        value: &LogicVector,
    ) -> Result<(), DeviceError> {
        (**self).write(port, value)
    }

    fn read(&self, port: &str) -> Result<LogicVector, DeviceError> {
        (**self).read(port)
    }

    fn advance(&mut self, cycles: u64) -> Result<(), DeviceError> {
        (**self).advance(cycles)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub))]
pub enum DeviceError {
    #[snafu(display("Port {port} not found on simulated module {top_module}"))]
    NoSuchPort { top_module: String, port: String },
    #[snafu(display(
        "Port {port} on simulated module {top_module} has width {width}, but was given {attempted} bit(s)"
    ))]
    InvalidPortWidth {
        top_module: String,
        port: String,
        width: usize,
        attempted: usize,
    },
    #[snafu(display(
        "Port {port} on simulated module {top_module} is an {direction} port, but was used as an {attempted_direction} port"
    ))]
    InvalidPortDirection {
        top_module: String,
        port: String,
        direction: PortDirection,
        attempted_direction: PortDirection,
    },
    #[snafu(display(
        "Simulated module {top_module} cannot represent `{value}` on port {port}"
    ))]
    Unrepresentable {
        top_module: String,
        port: String,
        value: String,
    },
    #[snafu(display("Missing symbol in simulated module {top_module}: {message}"))]
    Symbol { top_module: String, message: String },
    #[snafu(display("Behavior of simulated module {top_module} failed: {message}"))]
    Behavior { top_module: String, message: String },
}
