// Copyright (C) 2024 Ethan Uppal.
//
// This Source Code Form is subject to the terms of the Mozilla Public License,
// v. 2.0. If a copy of the MPL was not distributed with this file, You can
// obtain one at https://mozilla.org/MPL/2.0/.

//! Live instances of verilated modules.

use std::{collections::HashMap, sync::Arc};

use libc::c_void;
use snafu::{OptionExt, ResultExt, Whatever, ensure, whatever};
use strobe_harness::{
    Device, DeviceError, LogicVector, PortDirection, ResolvedPort,
    sim::{
        BehaviorSnafu, InvalidPortDirectionSnafu, InvalidPortWidthSnafu,
        NoSuchPortSnafu, UnrepresentableSnafu,
    },
};

use crate::VerilatedLibrary;

type PinFn = extern "C" fn(*mut c_void, u64);
type ReadFn = extern "C" fn(*mut c_void) -> u64;

/// A verilated module constructed at runtime from a [`VerilatedLibrary`].
///
/// The symbols are resolved once at construction. They stay valid because the
/// device holds the library alive.
pub struct VerilatedDevice {
    main: *mut c_void,
    eval_main: extern "C" fn(*mut c_void),
    delete_main: extern "C" fn(*mut c_void),
    pins: HashMap<String, PinFn>,
    reads: HashMap<String, ReadFn>,
    library: Arc<VerilatedLibrary>,
}

impl VerilatedDevice {
    pub(crate) fn new(library: Arc<VerilatedLibrary>) -> Result<Self, Whatever> {
        let top = &library.top;
        let lib = &library.library;

        let new_main: extern "C" fn() -> *mut c_void =
            *unsafe { lib.get(format!("ffi_new_V{top}").as_bytes()) }
                .whatever_context(format!(
                    "Failed to load constructor for module {}",
                    top
                ))?;
        let delete_main: extern "C" fn(*mut c_void) =
            *unsafe { lib.get(format!("ffi_delete_V{top}").as_bytes()) }
                .whatever_context(format!(
                    "Failed to load destructor for module {}",
                    top
                ))?;
        let eval_main: extern "C" fn(*mut c_void) =
            *unsafe { lib.get(format!("ffi_V{top}_eval").as_bytes()) }
                .whatever_context(format!(
                    "Failed to load evalulator for module {}",
                    top
                ))?;

        let mut pins = HashMap::new();
        let mut reads = HashMap::new();
        for port in &library.ports {
            let name = &port.name;
            if port.direction.is_drivable() {
                let pin: PinFn =
                    *unsafe { lib.get(format!("ffi_V{top}_pin_{name}").as_bytes()) }
                        .whatever_context(format!(
                            "Failed to load writer for port {name} on module {top}"
                        ))?;
                pins.insert(name.clone(), pin);
            }
            let read: ReadFn =
                *unsafe { lib.get(format!("ffi_V{top}_read_{name}").as_bytes()) }
                    .whatever_context(format!(
                        "Failed to load reader for port {name} on module {top}"
                    ))?;
            reads.insert(name.clone(), read);
        }

        let main = new_main();
        if main.is_null() {
            whatever!("Constructor for module {} returned null", top);
        }
        // settle the initial state so reads before the first cycle are
        // meaningful
        eval_main(main);

        Ok(Self {
            main,
            eval_main,
            delete_main,
            pins,
            reads,
            library,
        })
    }

    /// Equivalent to the Verilator `eval` method.
    pub fn eval(&mut self) {
        (self.eval_main)(self.main);
    }

    fn port(&self, port: &str) -> Result<&ResolvedPort, DeviceError> {
        self.library
            .ports
            .iter()
            .find(|declared| declared.name == port)
            .context(NoSuchPortSnafu {
                top_module: &self.library.top,
                port,
            })
    }

    fn pin(&mut self, port: &str, value: u64) -> Result<(), DeviceError> {
        let pin = self.pins.get(port).context(InvalidPortDirectionSnafu {
            top_module: &self.library.top,
            port,
            direction: PortDirection::Output,
            attempted_direction: PortDirection::Input,
        })?;
        pin(self.main, value);
        Ok(())
    }
}

impl Device for VerilatedDevice {
    fn interface(&self) -> Vec<ResolvedPort> {
        self.library.ports.clone()
    }

    fn write(
        &mut self,
        port: &str,
        value: &LogicVector,
    ) -> Result<(), DeviceError> {
        let declared = self.port(port)?;
        ensure!(
            declared.direction.is_drivable(),
            InvalidPortDirectionSnafu {
                top_module: &self.library.top,
                port,
                direction: declared.direction,
                attempted_direction: PortDirection::Input
            }
        );
        ensure!(
            declared.width == value.width(),
            InvalidPortWidthSnafu {
                top_module: &self.library.top,
                port,
                width: declared.width,
                attempted: value.width()
            }
        );
        // two-state simulation
        let bits = Some(value)
            .filter(|value| value.is_binary())
            .and_then(LogicVector::to_unsigned)
            .and_then(|bits| u64::try_from(bits).ok())
            .context(UnrepresentableSnafu {
                top_module: &self.library.top,
                port,
                value: value.to_string(),
            })?;
        self.pin(port, bits)
    }

    fn read(&self, port: &str) -> Result<LogicVector, DeviceError> {
        let width = self.port(port)?.width;
        let read = self.reads.get(port).context(NoSuchPortSnafu {
            top_module: &self.library.top,
            port,
        })?;
        let raw = read(self.main);
        let masked = if width >= 64 {
            raw
        } else {
            raw & ((1u64 << width) - 1)
        };
        LogicVector::from_unsigned(u128::from(masked), width).map_err(|error| {
            BehaviorSnafu {
                top_module: &self.library.top,
                message: format!("Port {port} read back an invalid value: {error}"),
            }
            .build()
        })
    }

    /// Each cycle drives the clock high and then low, evaluating after each
    /// edge. Without a clock, the model is evaluated once per cycle.
    fn advance(&mut self, cycles: u64) -> Result<(), DeviceError> {
        match self.library.clock.clone() {
            Some(clock) => {
                for _ in 0..cycles {
                    self.pin(&clock, 1)?;
                    self.eval();
                    self.pin(&clock, 0)?;
                    self.eval();
                }
            }
            None => {
                for _ in 0..cycles {
                    self.eval();
                }
            }
        }
        Ok(())
    }
}

impl Drop for VerilatedDevice {
    fn drop(&mut self) {
        (self.delete_main)(self.main);
    }
}
