// Copyright (C) 2024 Ethan Uppal.
//
// This Source Code Form is subject to the terms of the Mozilla Public License,
// v. 2.0. If a copy of the MPL was not distributed with this file, You can
// obtain one at https://mozilla.org/MPL/2.0/.

//! Lockstep cycle driver.
//!
//! Within a cycle the order is fixed: pending writes are committed, the device
//! proceeds to the next active edge and settles, and only then may anything be
//! read. Writes issued between two [`Scheduler::advance`] calls are invisible
//! to reads until the next advance.

use snafu::{ResultExt, ensure};

use crate::{
    error::{DeviceSnafu, HarnessError, SimulationError, ZeroCyclesSnafu},
    logic::LogicVector,
    port::BoundPorts,
    sim::Device,
    trace::Trace,
};

pub struct Scheduler<D: Device> {
    device: D,
    ports: BoundPorts,
    pending: Vec<(String, LogicVector)>,
    cycle: u64,
    low_detail: bool,
    trace: Trace,
}

impl<D: Device> Scheduler<D> {
    /// Takes ownership of a freshly instantiated `device` at cycle `0`.
    pub fn new(
        device: D,
        ports: BoundPorts,
        low_detail: bool,
    ) -> Result<Self, SimulationError> {
        let trace = Trace::new(
            ports
                .names()
                .filter_map(|name| {
                    ports
                        .get(name)
                        .ok()
                        .map(|port| (name.to_string(), port.width))
                })
                .collect(),
        );
        let mut scheduler = Self {
            device,
            ports,
            pending: vec![],
            cycle: 0,
            low_detail,
            trace,
        };
        if !low_detail {
            scheduler.sample()?;
        }
        Ok(scheduler)
    }

    pub fn ports(&self) -> &BoundPorts {
        &self.ports
    }

    /// The index of the last settled cycle.
    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    pub fn low_detail(&self) -> bool {
        self.low_detail
    }

    pub fn set_low_detail(&mut self, low_detail: bool) {
        self.low_detail = low_detail;
    }

    pub fn trace(&self) -> &Trace {
        &self.trace
    }

    pub fn into_trace(self) -> Trace {
        self.trace
    }

    /// Queues a write of an already validated value. A later write to the
    /// same port before the next advance replaces it.
    pub(crate) fn queue(&mut self, port: &str, value: LogicVector) {
        match self.pending.iter_mut().find(|(pending, _)| pending == port) {
            Some((_, pending)) => *pending = value,
            None => self.pending.push((port.to_string(), value)),
        }
    }

    /// The last settled value of `port`.
    pub fn read(&self, port: &str) -> Result<LogicVector, SimulationError> {
        self.device.read(port).context(DeviceSnafu {
            module: self.ports.module(),
        })
    }

    /// Commits pending writes, then drives `cycles` clock cycles. Returns once
    /// the device has settled.
    pub fn advance(&mut self, cycles: u64) -> Result<(), HarnessError> {
        ensure!(
            cycles > 0,
            ZeroCyclesSnafu {
                module: self.ports.module()
            }
        );

        for (port, value) in self.pending.drain(..) {
            self.device.write(&port, &value).context(DeviceSnafu {
                module: self.ports.module(),
            })?;
        }

        if self.low_detail {
            self.device.advance(cycles).context(DeviceSnafu {
                module: self.ports.module(),
            })?;
            self.cycle += cycles;
        } else {
            for _ in 0..cycles {
                self.device.advance(1).context(DeviceSnafu {
                    module: self.ports.module(),
                })?;
                self.cycle += 1;
                self.sample()?;
            }
        }
        Ok(())
    }

    fn sample(&mut self) -> Result<(), SimulationError> {
        let values = self
            .ports
            .names()
            .map(|port| self.read(port))
            .collect::<Result<Vec<_>, _>>()?;
        self.trace.record(self.cycle, values);
        Ok(())
    }
}
