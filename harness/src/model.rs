// Copyright (C) 2024 Ethan Uppal.
//
// This Source Code Form is subject to the terms of the Mozilla Public License,
// v. 2.0. If a copy of the MPL was not distributed with this file, You can
// obtain one at https://mozilla.org/MPL/2.0/.

//! An in-process toolchain for reference models written in Rust.
//!
//! Each model is registered under a top-module name with its interface and a
//! factory producing a [`Behavior`] for a parameter set. Building checks that
//! the requested sources are known; instantiating calls the factory. The
//! behavior runs once per cycle, sees every committed input, and may drive any
//! symbol of the extended logic domain onto its outputs.

use std::{
    collections::{HashMap, HashSet},
    fmt::Write as _,
    fs,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use camino::{Utf8Path, Utf8PathBuf};
use snafu::{OptionExt, ResultExt, Whatever, ensure, whatever};

use crate::{
    build::{BuildRequest, Toolchain},
    generics::GenericParameterSet,
    logic::{Logic, LogicVector},
    port::{PortDescriptor, PortDirection, ResolvedPort},
    sim::{
        BehaviorSnafu, Device, DeviceError, InvalidPortDirectionSnafu,
        InvalidPortWidthSnafu, NoSuchPortSnafu,
    },
};

/// The pin values a [`Behavior`] reads and drives.
pub struct Pins {
    top: String,
    values: HashMap<String, LogicVector>,
}

impl Pins {
    fn new(top: &str, ports: &[ResolvedPort]) -> Result<Self, Whatever> {
        let values = ports
            .iter()
            .map(|port| {
                LogicVector::filled(port.width, Logic::Uninitialized)
                    .map(|value| (port.name.clone(), value))
            })
            .collect::<Result<_, _>>()
            .whatever_context(format!("Model {top} has a zero-width port"))?;
        Ok(Self {
            top: top.to_string(),
            values,
        })
    }

    pub fn get(&self, port: &str) -> Result<&LogicVector, DeviceError> {
        self.values.get(port).context(NoSuchPortSnafu {
            top_module: &self.top,
            port,
        })
    }

    /// The least-significant bit of `port`.
    pub fn bit(&self, port: &str) -> Result<Logic, DeviceError> {
        let value = self.get(port)?;
        Ok(value.bits()[value.width() - 1])
    }

    /// The unsigned reading of `port`, or `None` if any bit is not a level.
    pub fn unsigned(&self, port: &str) -> Result<Option<u128>, DeviceError> {
        Ok(self.get(port)?.to_unsigned())
    }

    pub fn set(
        &mut self,
        port: &str,
        value: impl Into<LogicVector>,
    ) -> Result<(), DeviceError> {
        let value = value.into();
        let top = &self.top;
        let slot = self
            .values
            .get_mut(port)
            .context(NoSuchPortSnafu { top_module: top, port })?;
        ensure!(
            slot.width() == value.width(),
            InvalidPortWidthSnafu {
                top_module: top,
                port,
                width: slot.width(),
                attempted: value.width()
            }
        );
        *slot = value;
        Ok(())
    }

    /// Drives `value` truncated to the width of `port`.
    pub fn set_unsigned(&mut self, port: &str, value: u128) -> Result<(), DeviceError> {
        let width = self.get(port)?.width();
        let masked = if width >= 128 {
            value
        } else {
            value & ((1u128 << width) - 1)
        };
        let bits = LogicVector::from_unsigned(masked, width).map_err(|error| {
            BehaviorSnafu {
                top_module: &self.top,
                message: error.to_string(),
            }
            .build()
        })?;
        self.set(port, bits)
    }

    /// Drives every bit of `port` with `bit`.
    pub fn fill(&mut self, port: &str, bit: Logic) -> Result<(), DeviceError> {
        let width = self.get(port)?.width();
        let bits = LogicVector::filled(width, bit).map_err(|error| {
            BehaviorSnafu {
                top_module: &self.top,
                message: error.to_string(),
            }
            .build()
        })?;
        self.set(port, bits)
    }
}

/// One cycle of a reference model.
pub trait Behavior: Send {
    fn step(&mut self, pins: &mut Pins) -> Result<(), DeviceError>;
}

impl<F> Behavior for F
where
    F: FnMut(&mut Pins) -> Result<(), DeviceError> + Send,
{
    fn step(&mut self, pins: &mut Pins) -> Result<(), DeviceError> {
        self(pins)
    }
}

type Factory = dyn Fn(&GenericParameterSet) -> Result<Box<dyn Behavior>, Whatever>
    + Send
    + Sync;

struct Model {
    ports: Vec<PortDescriptor>,
    factory: Arc<Factory>,
}

/// Reference models, usable as a [`Toolchain`].
#[derive(Default)]
pub struct ModelLibrary {
    models: HashMap<String, Model>,
    sources: HashSet<Utf8PathBuf>,
    invocations: AtomicUsize,
}

impl ModelLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the model of `top`, defined in `source`.
    pub fn model<F, B>(
        mut self,
        top: impl Into<String>,
        source: impl Into<Utf8PathBuf>,
        ports: Vec<PortDescriptor>,
        factory: F,
    ) -> Self
    where
        F: Fn(&GenericParameterSet) -> Result<B, Whatever> + Send + Sync + 'static,
        B: Behavior + 'static,
    {
        self.sources.insert(source.into());
        self.models.insert(
            top.into(),
            Model {
                ports,
                factory: Arc::new(move |generics: &GenericParameterSet| {
                    factory(generics).map(|behavior| Box::new(behavior) as Box<dyn Behavior>)
                }),
            },
        );
        self
    }

    /// Marks a dependency source as known, e.g. a composition leaf without a
    /// model of its own.
    pub fn source(mut self, source: impl Into<Utf8PathBuf>) -> Self {
        self.sources.insert(source.into());
        self
    }

    /// How many times [`Toolchain::build`] was called.
    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }
}

/// A Graphviz DOT diagram of `top` with one node per port.
fn port_diagram(top: &str, ports: &[ResolvedPort]) -> Result<String, Whatever> {
    let mut dot = String::new();
    writeln!(dot, "digraph \"{top}\" {{")
        .whatever_context("Failed to format diagram header")?;
    writeln!(dot, "  rankdir=LR;")
        .whatever_context("Failed to format diagram layout")?;
    writeln!(dot, "  \"{top}\" [shape=box, label=\"{top}\"];")
        .whatever_context("Failed to format module node")?;
    for port in ports {
        let name = &port.name;
        writeln!(
            dot,
            "  \"{name}\" [shape=plaintext, label=\"{name}[{}]\"];",
            port.width
        )
        .whatever_context(format!("Failed to format node for port {name}"))?;
        let edge = match port.direction {
            PortDirection::Input => writeln!(dot, "  \"{name}\" -> \"{top}\";"),
            PortDirection::Output => writeln!(dot, "  \"{top}\" -> \"{name}\";"),
            PortDirection::Inout => {
                writeln!(dot, "  \"{top}\" -> \"{name}\" [dir=both];")
            }
        };
        edge.whatever_context(format!("Failed to format edge for port {name}"))?;
    }
    writeln!(dot, "}}").whatever_context("Failed to format ending brace")?;
    Ok(dot)
}

pub struct ModelArtifact {
    top: String,
    ports: Vec<ResolvedPort>,
    clock: Option<String>,
    generics: GenericParameterSet,
    factory: Arc<Factory>,
}

impl ModelArtifact {
    pub fn top(&self) -> &str {
        &self.top
    }

    pub fn ports(&self) -> &[ResolvedPort] {
        &self.ports
    }
}

impl Toolchain for ModelLibrary {
    type Artifact = ModelArtifact;
    type Device = ModelDevice;

    fn name(&self) -> &str {
        "model"
    }

    fn build(&self, request: &BuildRequest) -> Result<Self::Artifact, Whatever> {
        self.invocations.fetch_add(1, Ordering::SeqCst);

        let Some(model) = self.models.get(&request.top) else {
            whatever!("No model is registered for top module `{}`", request.top);
        };
        for source in &request.sources {
            if !self.sources.contains(source) {
                whatever!(
                    "Source file {source} required by `{}` is not known to the model library",
                    request.top
                );
            }
        }

        let mut ports = Vec::with_capacity(model.ports.len());
        for port in &model.ports {
            let Some(width) = port.width().resolve(&request.generics) else {
                whatever!(
                    "Width {} of port {} on model `{}` does not resolve under {}",
                    port.width(),
                    port.name(),
                    request.top,
                    request.generics
                );
            };
            ports.push(ResolvedPort {
                name: port.name().to_string(),
                direction: port.direction(),
                width,
            });
        }

        if request.log {
            log::info!("Prepared model of `{}` with {} port(s)", request.top, ports.len());
        }
        Ok(ModelArtifact {
            top: request.top.clone(),
            ports,
            clock: request.clock.clone(),
            generics: request.generics.clone(),
            factory: model.factory.clone(),
        })
    }

    fn render(
        &self,
        artifact: &Self::Artifact,
        output: &Utf8Path,
    ) -> Result<Utf8PathBuf, Whatever> {
        fs::create_dir_all(output)
            .whatever_context(format!("Failed to create output directory {output}"))?;

        let dot = port_diagram(&artifact.top, &artifact.ports)?;
        let path = output.join(format!("{}.dot", artifact.top));
        fs::write(&path, dot).whatever_context(format!("Failed to write {path}"))?;
        Ok(path)
    }

    fn instantiate(
        &self,
        artifact: &Arc<Self::Artifact>,
    ) -> Result<Self::Device, Whatever> {
        let behavior = (artifact.factory)(&artifact.generics)
            .whatever_context(format!("Failed to construct model of `{}`", artifact.top))?;
        Ok(ModelDevice {
            top: artifact.top.clone(),
            ports: artifact.ports.clone(),
            clock: artifact.clock.clone(),
            pins: Pins::new(&artifact.top, &artifact.ports)?,
            behavior,
        })
    }
}

/// A live instance of a reference model.
pub struct ModelDevice {
    top: String,
    ports: Vec<ResolvedPort>,
    clock: Option<String>,
    pins: Pins,
    behavior: Box<dyn Behavior>,
}

impl Device for ModelDevice {
    fn interface(&self) -> Vec<ResolvedPort> {
        self.ports.clone()
    }

    fn write(
        &mut self,
        port: &str,
        value: &LogicVector,
    ) -> Result<(), DeviceError> {
        let declared = self
            .ports
            .iter()
            .find(|declared| declared.name == port)
            .context(NoSuchPortSnafu {
                top_module: &self.top,
                port,
            })?;
        ensure!(
            declared.direction.is_drivable(),
            InvalidPortDirectionSnafu {
                top_module: &self.top,
                port,
                direction: declared.direction,
                attempted_direction: PortDirection::Input
            }
        );
        self.pins.set(port, value.clone())
    }

    fn read(&self, port: &str) -> Result<LogicVector, DeviceError> {
        self.pins.get(port).cloned()
    }

    fn advance(&mut self, cycles: u64) -> Result<(), DeviceError> {
        for _ in 0..cycles {
            if let Some(clock) = &self.clock {
                self.pins.set(clock, true)?;
            }
            self.behavior.step(&mut self.pins)?;
            if let Some(clock) = &self.clock {
                self.pins.set(clock, false)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BuildOrchestrator, HarnessOptions, ModuleDefinition, PortWidth};

    fn counter() -> ModelLibrary {
        ModelLibrary::new().model(
            "COUNTER",
            "rtl/counter.vhd",
            vec![
                PortDescriptor::new("clk", PortDirection::Input, PortWidth::Fixed(1)),
                PortDescriptor::new("count", PortDirection::Output, PortWidth::Fixed(4)),
            ],
            |_: &GenericParameterSet| {
                let mut count = 0u128;
                Ok(move |pins: &mut Pins| {
                    count += 1;
                    pins.set_unsigned("count", count)
                })
            },
        )
    }

    fn request(orchestrator: &BuildOrchestrator<ModelLibrary>, top: &str) -> BuildRequest {
        let definition = ModuleDefinition::builder(top, "rtl/counter.vhd")
            .input("clk", 1)
            .output("count", 4)
            .clock("clk")
            .build()
            .unwrap();
        orchestrator
            .prepare(&definition, &GenericParameterSet::default())
            .unwrap()
    }

    #[test]
    fn devices_start_uninitialized_and_wrap() {
        let orchestrator = BuildOrchestrator::new(counter(), HarnessOptions::default());
        let artifact = orchestrator.ensure(&request(&orchestrator, "COUNTER")).unwrap();
        let mut device = orchestrator.toolchain().instantiate(&artifact).unwrap();

        assert_eq!(device.read("count").unwrap().to_string(), "UUUU");
        device.advance(17).unwrap();
        assert_eq!(device.read("count").unwrap().to_string(), "0001");
        assert_eq!(device.read("clk").unwrap().to_string(), "0");
        assert!(matches!(
            device.write("count", &"0000".parse().unwrap()),
            Err(DeviceError::InvalidPortDirection { .. })
        ));
    }

    #[test]
    fn unknown_tops_fail_to_build() {
        let orchestrator = BuildOrchestrator::new(counter(), HarnessOptions::default());
        let error = orchestrator
            .ensure(&request(&orchestrator, "TIMER"))
            .err()
            .unwrap();
        assert!(error.diagnostic.contains("No model is registered"));
        assert_eq!(orchestrator.toolchain().invocations(), 1);
    }

    #[test]
    fn renders_port_diagram() {
        let directory = tempfile::tempdir().unwrap();
        let output = Utf8Path::from_path(directory.path()).unwrap();
        let orchestrator = BuildOrchestrator::new(counter(), HarnessOptions::default());
        let path = orchestrator
            .render(&request(&orchestrator, "COUNTER"), output)
            .unwrap();
        assert_eq!(path, output.join("COUNTER.dot"));
        let dot = fs::read_to_string(path).unwrap();
        assert!(dot.contains("\"COUNTER\" -> \"count\";"));
        assert!(dot.contains("\"clk\" -> \"COUNTER\";"));
    }

    #[test]
    fn diagram_marks_bidirectional_ports() {
        let ports = vec![
            ResolvedPort {
                name: "oe".into(),
                direction: PortDirection::Input,
                width: 1,
            },
            ResolvedPort {
                name: "pad".into(),
                direction: PortDirection::Inout,
                width: 8,
            },
        ];
        let dot = port_diagram("GPIO", &ports).unwrap();
        assert_eq!(
            dot,
            "digraph \"GPIO\" {\n  \
             rankdir=LR;\n  \
             \"GPIO\" [shape=box, label=\"GPIO\"];\n  \
             \"oe\" [shape=plaintext, label=\"oe[1]\"];\n  \
             \"oe\" -> \"GPIO\";\n  \
             \"pad\" [shape=plaintext, label=\"pad[8]\"];\n  \
             \"GPIO\" -> \"pad\" [dir=both];\n\
             }\n"
        );
    }
}
