// Copyright (C) 2024 Ethan Uppal.
//
// This Source Code Form is subject to the terms of the Mozilla Public License,
// v. 2.0. If a copy of the MPL was not distributed with this file, You can
// obtain one at https://mozilla.org/MPL/2.0/.

use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use snafu::ensure;

use crate::{
    error::{
        DependencyCycleError, InvalidDefinitionSnafu, InvalidGenericSnafu,
        UsageError,
    },
    generics::{
        GenericDecl, GenericKind, GenericParameterSet, GenericSchema,
        GenericValue,
    },
    graph::{CompositionGraph, NodeId},
    port::{PortDescriptor, PortDirection, PortWidth, ResolvedPort},
};

/// Where a module sits in a [`CompositionGraph`].
#[derive(Debug, Clone)]
pub struct Composition {
    pub graph: Arc<CompositionGraph>,
    pub root: NodeId,
}

/// The static description of a module under test. Construct it once with
/// [`ModuleDefinition::builder`] and share it across runs.
#[derive(Debug, Clone)]
pub struct ModuleDefinition {
    name: String,
    source: Utf8PathBuf,
    ports: Vec<PortDescriptor>,
    generics: GenericSchema,
    clock: Option<String>,
    composition: Option<Composition>,
}

impl ModuleDefinition {
    pub fn builder(
        name: impl Into<String>,
        source: impl Into<Utf8PathBuf>,
    ) -> ModuleBuilder {
        ModuleBuilder {
            name: name.into(),
            source: source.into(),
            ports: Vec::new(),
            generics: Vec::new(),
            clock: None,
            composition: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> &Utf8Path {
        &self.source
    }

    pub fn ports(&self) -> &[PortDescriptor] {
        &self.ports
    }

    pub fn port(&self, name: &str) -> Option<&PortDescriptor> {
        self.ports.iter().find(|port| port.name() == name)
    }

    pub fn generics(&self) -> &GenericSchema {
        &self.generics
    }

    pub fn clock(&self) -> Option<&str> {
        self.clock.as_deref()
    }

    pub fn composition(&self) -> Option<&Composition> {
        self.composition.as_ref()
    }

    /// See [`GenericSchema::resolve`].
    pub fn resolve_generics<I, K, V>(
        &self,
        supplied: I,
    ) -> Result<GenericParameterSet, UsageError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<GenericValue>,
    {
        self.generics.resolve(&self.name, supplied)
    }

    /// The declared ports with every generic width replaced by its value in
    /// `generics`.
    pub fn resolve_interface(
        &self,
        generics: &GenericParameterSet,
    ) -> Result<Vec<ResolvedPort>, UsageError> {
        self.ports
            .iter()
            .map(|port| {
                let width = port.width().resolve(generics).ok_or_else(|| {
                    InvalidGenericSnafu {
                        module: &self.name,
                        generic: port.width().to_string(),
                        reason: format!(
                            "width of port {} must be a positive integer",
                            port.name()
                        ),
                    }
                    .build()
                })?;
                Ok(ResolvedPort {
                    name: port.name().to_string(),
                    direction: port.direction(),
                    width,
                })
            })
            .collect()
    }

    /// The ordered, deduplicated list of sources to compile: the resolved
    /// composition first, then the module's own top-level source.
    pub fn build_order(&self) -> Result<Vec<Utf8PathBuf>, DependencyCycleError> {
        let mut order = match &self.composition {
            Some(composition) => composition.graph.sources(composition.root)?,
            None => Vec::new(),
        };
        order.push(self.source.clone());

        let mut unique = Vec::with_capacity(order.len());
        for source in order {
            if !unique.contains(&source) {
                unique.push(source);
            }
        }
        Ok(unique)
    }
}

pub struct ModuleBuilder {
    name: String,
    source: Utf8PathBuf,
    ports: Vec<PortDescriptor>,
    generics: Vec<GenericDecl>,
    clock: Option<String>,
    composition: Option<Composition>,
}

impl ModuleBuilder {
    pub fn input(self, name: impl Into<String>, width: usize) -> Self {
        self.port(PortDescriptor::new(name, PortDirection::Input, width.into()))
    }

    pub fn output(self, name: impl Into<String>, width: usize) -> Self {
        self.port(PortDescriptor::new(name, PortDirection::Output, width.into()))
    }

    pub fn inout(self, name: impl Into<String>, width: usize) -> Self {
        self.port(PortDescriptor::new(name, PortDirection::Inout, width.into()))
    }

    /// Declares an arbitrary port, e.g. one whose width is a generic.
    pub fn port(mut self, port: PortDescriptor) -> Self {
        self.ports.push(port);
        self
    }

    pub fn generic(mut self, generic: GenericDecl) -> Self {
        self.generics.push(generic);
        self
    }

    /// Hands `port` to the scheduler, which toggles it once per cycle.
    pub fn clock(mut self, port: impl Into<String>) -> Self {
        self.clock = Some(port.into());
        self
    }

    pub fn composition(mut self, graph: Arc<CompositionGraph>, root: NodeId) -> Self {
        self.composition = Some(Composition { graph, root });
        self
    }

    pub fn build(self) -> Result<ModuleDefinition, UsageError> {
        let module = self.name.as_str();
        ensure!(
            !module.is_empty(),
            InvalidDefinitionSnafu {
                module,
                reason: "module name is empty"
            }
        );
        let generics = GenericSchema::new(module, self.generics)?;

        for (index, port) in self.ports.iter().enumerate() {
            ensure!(
                self.ports[..index]
                    .iter()
                    .all(|other| other.name() != port.name()),
                InvalidDefinitionSnafu {
                    module,
                    reason: format!("port {} is declared twice", port.name())
                }
            );
            match port.width() {
                PortWidth::Fixed(width) => ensure!(
                    *width > 0,
                    InvalidDefinitionSnafu {
                        module,
                        reason: format!("port {} has zero width", port.name())
                    }
                ),
                PortWidth::Generic(generic) => ensure!(
                    matches!(
                        generics.get(generic).map(GenericDecl::kind),
                        Some(GenericKind::Integer { .. })
                    ),
                    InvalidDefinitionSnafu {
                        module,
                        reason: format!(
                            "width of port {} names {generic}, which is not an integer generic",
                            port.name()
                        )
                    }
                ),
            }
        }

        if let Some(clock) = &self.clock {
            let port = self.ports.iter().find(|port| port.name() == clock);
            ensure!(
                port.is_some_and(|port| {
                    port.direction() == PortDirection::Input
                        && *port.width() == PortWidth::Fixed(1)
                }),
                InvalidDefinitionSnafu {
                    module,
                    reason: format!("clock {clock} must be a declared 1-bit input")
                }
            );
        }

        Ok(ModuleDefinition {
            name: self.name,
            source: self.source,
            ports: self.ports,
            generics,
            clock: self.clock,
            composition: self.composition,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uart() -> ModuleDefinition {
        ModuleDefinition::builder("UART_TX", "rtl/uart_tx.vhd")
            .input("clk", 1)
            .port(PortDescriptor::new(
                "data",
                PortDirection::Input,
                PortWidth::generic("WIDTH"),
            ))
            .output("tx", 1)
            .generic(GenericDecl::integer("WIDTH").range(5, 9).default(8))
            .clock("clk")
            .build()
            .unwrap()
    }

    #[test]
    fn generic_widths_resolve_per_invocation() {
        let uart = uart();
        let generics = uart.resolve_generics([("WIDTH", 7)]).unwrap();
        let interface = uart.resolve_interface(&generics).unwrap();
        assert_eq!(interface[1].width, 7);

        let generics = uart
            .resolve_generics([] as [(&str, GenericValue); 0])
            .unwrap();
        assert_eq!(uart.resolve_interface(&generics).unwrap()[1].width, 8);
    }

    #[test]
    fn malformed_definitions_are_rejected() {
        let duplicate = ModuleDefinition::builder("GPIO", "gpio.vhd")
            .input("a", 1)
            .output("a", 1)
            .build();
        assert!(matches!(duplicate, Err(UsageError::InvalidDefinition { .. })));

        let zero = ModuleDefinition::builder("GPIO", "gpio.vhd")
            .input("a", 0)
            .build();
        assert!(zero.is_err());

        let wide_clock = ModuleDefinition::builder("GPIO", "gpio.vhd")
            .input("clk", 2)
            .clock("clk")
            .build();
        assert!(wide_clock.is_err());

        let undeclared_generic = ModuleDefinition::builder("GPIO", "gpio.vhd")
            .port(PortDescriptor::new(
                "pins",
                PortDirection::Inout,
                PortWidth::generic("N"),
            ))
            .build();
        assert!(undeclared_generic.is_err());
    }

    #[test]
    fn build_order_ends_with_own_source() {
        let mut graph = CompositionGraph::new();
        let top = graph.add_node("timer", "rtl/timer.vhd").unwrap();
        let counter = graph.add_node("counter", "rtl/counter.vhd").unwrap();
        let prescaler = graph.add_node("prescaler", "rtl/prescaler.vhd").unwrap();
        graph.add_child(top, prescaler);
        graph.add_child(top, counter);
        graph.add_child(counter, prescaler);

        let timer = ModuleDefinition::builder("TIMER", "rtl/timer.vhd")
            .input("clk", 1)
            .composition(Arc::new(graph), top)
            .build()
            .unwrap();
        assert_eq!(
            timer.build_order().unwrap(),
            [
                Utf8PathBuf::from("rtl/prescaler.vhd"),
                Utf8PathBuf::from("rtl/counter.vhd"),
                Utf8PathBuf::from("rtl/timer.vhd"),
            ]
        );
    }
}
