// Copyright (C) 2024 Ethan Uppal.
//
// This Source Code Form is subject to the terms of the Mozilla Public License,
// v. 2.0. If a copy of the MPL was not distributed with this file, You can
// obtain one at https://mozilla.org/MPL/2.0/.

//! Port declaration and binding.
//!
//! A [`crate::ModuleDefinition`] declares its ports once as a list of
//! [`PortDescriptor`]s. At instantiation, [`bind`] resolves them against the
//! live device into a [`BoundPorts`] table, which then validates every write
//! and every expected value for the rest of the run.

use std::{
    collections::{BTreeMap, HashMap},
    fmt,
};

use snafu::{OptionExt, ResultExt, ensure};

use crate::{
    error::{
        ClockOwnedSnafu, ExtendedExpectationSnafu, InvalidLiteralSnafu,
        InvalidOrientationSnafu, MissingPortSnafu, PortMismatchSnafu,
        UnknownPortSnafu, UsageError, WidthMismatchSnafu, WriteToOutputSnafu,
    },
    generics::GenericParameterSet,
    logic::{LogicError, LogicVector},
    module::ModuleDefinition,
    sim::Device,
};

/// <https://www.digikey.com/en/maker/blogs/2024/verilog-ports-part-7-of-our-verilog-journey>
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortDirection {
    Input,
    Output,
    Inout,
}

impl PortDirection {
    /// Whether the script may drive a port bound in this direction.
    pub fn is_drivable(self) -> bool {
        matches!(self, Self::Input | Self::Inout)
    }

    /// Whether a pin with this capability may be bound as `orientation`.
    pub fn permits(self, orientation: PortDirection) -> bool {
        self == Self::Inout || self == orientation
    }
}

impl fmt::Display for PortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortDirection::Input => "input",
            PortDirection::Output => "output",
            PortDirection::Inout => "inout",
        }
        .fmt(f)
    }
}

/// The declared width of a port: either fixed, or the value of an integer
/// generic.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PortWidth {
    Fixed(usize),
    Generic(String),
}

impl PortWidth {
    /// A width named after the integer generic `name`.
    pub fn generic(name: impl Into<String>) -> Self {
        Self::Generic(name.into())
    }

    /// `None` if the generic is missing, not an integer, or not positive.
    pub fn resolve(&self, generics: &GenericParameterSet) -> Option<usize> {
        match self {
            Self::Fixed(width) => Some(*width),
            Self::Generic(name) => generics
                .get(name)?
                .as_integer()
                .and_then(|width| usize::try_from(width).ok())
                .filter(|width| *width > 0),
        }
    }
}

impl From<usize> for PortWidth {
    fn from(width: usize) -> Self {
        Self::Fixed(width)
    }
}

impl fmt::Display for PortWidth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fixed(width) => width.fmt(f),
            Self::Generic(name) => name.fmt(f),
        }
    }
}

/// One declared port. Immutable once declared.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PortDescriptor {
    name: String,
    direction: PortDirection,
    width: PortWidth,
}

impl PortDescriptor {
    pub fn new(
        name: impl Into<String>,
        direction: PortDirection,
        width: PortWidth,
    ) -> Self {
        Self {
            name: name.into(),
            direction,
            width,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn direction(&self) -> PortDirection {
        self.direction
    }

    pub fn width(&self) -> &PortWidth {
        &self.width
    }
}

/// A port whose width is known.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResolvedPort {
    pub name: String,
    pub direction: PortDirection,
    pub width: usize,
}

impl fmt::Display for ResolvedPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}[{}]", self.direction, self.name, self.width)
    }
}

/// A value to write to, or expect on, a port.
///
/// Bit strings and vectors must match the port width exactly. Integers are
/// formatted to the port width and rejected if they do not fit, negative ones
/// in two's complement. Only [`Literal::zero_extended`] and
/// [`Literal::sign_extended`] may be narrower than the port, and only for
/// writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Literal {
    Text(String),
    Bits(LogicVector),
    Unsigned(u128),
    Signed(i128),
    Extended { inner: Box<Literal>, signed: bool },
}

impl Literal {
    pub fn zero_extended(inner: impl Into<Literal>) -> Self {
        Self::Extended {
            inner: Box::new(inner.into()),
            signed: false,
        }
    }

    pub fn sign_extended(inner: impl Into<Literal>) -> Self {
        Self::Extended {
            inner: Box::new(inner.into()),
            signed: true,
        }
    }

    /// Formats the literal as exactly `width` bits.
    pub(crate) fn resolve(
        &self,
        width: usize,
    ) -> Result<Resolved, LogicError> {
        Ok(match self {
            Self::Text(text) => Resolved::Exact(text.parse()?),
            Self::Bits(bits) => Resolved::Exact(bits.clone()),
            Self::Unsigned(value) => {
                Resolved::Exact(LogicVector::from_unsigned(*value, width)?)
            }
            Self::Signed(value) => Resolved::Exact(match u128::try_from(*value) {
                Ok(value) => LogicVector::from_unsigned(value, width)?,
                Err(_) => LogicVector::from_signed(*value, width)?,
            }),
            Self::Extended { inner, signed } => {
                let bits = match inner.resolve(width)? {
                    Resolved::Exact(bits) | Resolved::Extended(bits) => bits,
                };
                Resolved::Extended(if *signed {
                    bits.sign_extend(width)?
                } else {
                    bits.zero_extend(width)?
                })
            }
        })
    }
}

pub(crate) enum Resolved {
    Exact(LogicVector),
    Extended(LogicVector),
}

impl From<&str> for Literal {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<String> for Literal {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<LogicVector> for Literal {
    fn from(bits: LogicVector) -> Self {
        Self::Bits(bits)
    }
}

impl From<&LogicVector> for Literal {
    fn from(bits: &LogicVector) -> Self {
        Self::Bits(bits.clone())
    }
}

impl From<crate::logic::Logic> for Literal {
    fn from(bit: crate::logic::Logic) -> Self {
        Self::Bits(bit.into())
    }
}

impl From<bool> for Literal {
    fn from(value: bool) -> Self {
        Self::Bits(value.into())
    }
}

macro_rules! integer_literal {
    ($variant:ident => $($integer:ty),*) => {
        $(
            impl From<$integer> for Literal {
                fn from(value: $integer) -> Self {
                    Self::$variant(value as _)
                }
            }
        )*
    };
}

integer_literal!(Unsigned => u8, u16, u32, u64, u128, usize);
integer_literal!(Signed => i8, i16, i32, i64, i128);

/// One port as bound for the current run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundPort {
    /// The direction declared on the module.
    pub declared: PortDirection,
    /// The direction chosen for this binding; see [`crate::Harness::orient`].
    pub effective: PortDirection,
    pub width: usize,
}

/// The binding table of one run.
#[derive(Debug, Clone)]
pub struct BoundPorts {
    module: String,
    order: Vec<String>,
    ports: HashMap<String, BoundPort>,
    clock: Option<String>,
}

impl BoundPorts {
    pub fn module(&self) -> &str {
        &self.module
    }

    /// Port names in declaration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    pub fn get(&self, port: &str) -> Result<&BoundPort, UsageError> {
        self.ports.get(port).context(UnknownPortSnafu {
            module: &self.module,
            port,
        })
    }

    pub fn clock(&self) -> Option<&str> {
        self.clock.as_deref()
    }

    /// Validates a write and formats `value` to the port's width.
    pub fn prepare_write(
        &self,
        port: &str,
        value: &Literal,
    ) -> Result<LogicVector, UsageError> {
        let bound = self.get(port)?;
        ensure!(
            self.clock.as_deref() != Some(port),
            ClockOwnedSnafu {
                module: &self.module,
                port
            }
        );
        ensure!(
            bound.effective.is_drivable(),
            WriteToOutputSnafu {
                module: &self.module,
                port
            }
        );
        let (Resolved::Exact(bits) | Resolved::Extended(bits)) =
            self.resolve_literal(port, bound.width, value)?;
        self.ensure_width(port, bound.width, &bits)?;
        Ok(bits)
    }

    /// Validates an expected value, which must match the port's width without
    /// any extension.
    pub fn prepare_expected(
        &self,
        port: &str,
        value: &Literal,
    ) -> Result<LogicVector, UsageError> {
        let bound = self.get(port)?;
        match self.resolve_literal(port, bound.width, value)? {
            Resolved::Exact(bits) => {
                self.ensure_width(port, bound.width, &bits)?;
                Ok(bits)
            }
            Resolved::Extended(_) => ExtendedExpectationSnafu {
                module: &self.module,
                port,
            }
            .fail(),
        }
    }

    fn resolve_literal(
        &self,
        port: &str,
        width: usize,
        value: &Literal,
    ) -> Result<Resolved, UsageError> {
        value.resolve(width).context(InvalidLiteralSnafu {
            module: &self.module,
            port,
        })
    }

    fn ensure_width(
        &self,
        port: &str,
        width: usize,
        bits: &LogicVector,
    ) -> Result<(), UsageError> {
        ensure!(
            bits.width() == width,
            WidthMismatchSnafu {
                module: &self.module,
                port,
                width,
                actual: bits.width()
            }
        );
        Ok(())
    }
}

/// Resolves the ports of `definition` against a live `device`.
///
/// `interface` is the definition's interface with widths resolved for the
/// current generics, and `orientation` narrows bidirectional ports for this
/// binding. Every declared port must exist on the device with the same width
/// and a direction that permits its effective orientation. Binding has no side
/// effects and can be repeated.
pub fn bind<D: Device + ?Sized>(
    definition: &ModuleDefinition,
    interface: &[ResolvedPort],
    orientation: &BTreeMap<String, PortDirection>,
    device: &D,
) -> Result<BoundPorts, UsageError> {
    let module = definition.name();

    for (port, requested) in orientation {
        let declared = interface
            .iter()
            .find(|declared| &declared.name == port)
            .context(UnknownPortSnafu { module, port })?;
        ensure!(
            declared.direction.permits(*requested),
            InvalidOrientationSnafu {
                module,
                port,
                declared: declared.direction,
                requested: *requested
            }
        );
    }

    let live = device.interface();
    let mut order = Vec::with_capacity(interface.len());
    let mut ports = HashMap::with_capacity(interface.len());
    for declared in interface {
        let found = live
            .iter()
            .find(|live| live.name == declared.name)
            .context(MissingPortSnafu {
                module,
                port: &declared.name,
            })?;
        let effective = orientation
            .get(&declared.name)
            .copied()
            .unwrap_or(declared.direction);
        ensure!(
            found.width == declared.width && found.direction.permits(effective),
            PortMismatchSnafu {
                module,
                port: &declared.name,
                declared: format!("{effective} [{}]", declared.width),
                found: format!("{} [{}]", found.direction, found.width),
            }
        );
        order.push(declared.name.clone());
        ports.insert(
            declared.name.clone(),
            BoundPort {
                declared: declared.direction,
                effective,
                width: declared.width,
            },
        );
    }

    Ok(BoundPorts {
        module: module.to_string(),
        order,
        ports,
        clock: definition.clock().map(str::to_string),
    })
}
