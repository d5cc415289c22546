// Copyright (C) 2024 Ethan Uppal.
//
// This Source Code Form is subject to the terms of the Mozilla Public License,
// v. 2.0. If a copy of the MPL was not distributed with this file, You can
// obtain one at https://mozilla.org/MPL/2.0/.

//! Typed generic parameters.
//!
//! A module declares a [`GenericSchema`]; each test invocation supplies a flat
//! name-to-value mapping that [`GenericSchema::resolve`] validates into an
//! immutable [`GenericParameterSet`]. Unknown names are rejected outright and
//! missing names fall back to their declared defaults.

use std::{collections::BTreeMap, fmt};

use snafu::{OptionExt, ensure};

use crate::error::{
    DuplicateGenericSnafu, InvalidDefinitionSnafu, InvalidGenericSnafu,
    MissingGenericSnafu, UnknownGenericSnafu, UsageError,
};

/// A concrete generic value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum GenericValue {
    Integer(i64),
    Boolean(bool),
    /// One identifier out of a closed set.
    Enumeration(String),
}

impl GenericValue {
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(value) => Some(*value),
            _ => None,
        }
    }

    /// The value as handed to an HDL toolchain on its command line.
    pub fn render(&self) -> String {
        match self {
            Self::Integer(value) => value.to_string(),
            Self::Boolean(value) => u8::from(*value).to_string(),
            Self::Enumeration(identifier) => format!("\"{identifier}\""),
        }
    }
}

impl fmt::Display for GenericValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer(value) => value.fmt(f),
            Self::Boolean(value) => value.fmt(f),
            Self::Enumeration(identifier) => identifier.fmt(f),
        }
    }
}

macro_rules! integer_generic {
    ($($integer:ty),*) => {
        $(
            impl From<$integer> for GenericValue {
                fn from(value: $integer) -> Self {
                    Self::Integer(value.into())
                }
            }
        )*
    };
}

integer_generic!(i8, i16, i32, i64, u8, u16, u32);

impl From<bool> for GenericValue {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl From<&str> for GenericValue {
    fn from(value: &str) -> Self {
        Self::Enumeration(value.to_string())
    }
}

impl From<String> for GenericValue {
    fn from(value: String) -> Self {
        Self::Enumeration(value)
    }
}

/// The declared type of a generic parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenericKind {
    /// Inclusive range.
    Integer { min: i64, max: i64 },
    Boolean,
    Enumeration(Vec<String>),
}

impl fmt::Display for GenericKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer { min, max } => write!(f, "integer in {min}..={max}"),
            Self::Boolean => write!(f, "boolean"),
            Self::Enumeration(variants) => {
                write!(f, "one of {}", variants.join(", "))
            }
        }
    }
}

/// One entry of a [`GenericSchema`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenericDecl {
    name: String,
    kind: GenericKind,
    default: Option<GenericValue>,
}

impl GenericDecl {
    /// An integer generic accepting any `i64`; narrow it with
    /// [`GenericDecl::range`].
    pub fn integer(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: GenericKind::Integer {
                min: i64::MIN,
                max: i64::MAX,
            },
            default: None,
        }
    }

    pub fn boolean(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: GenericKind::Boolean,
            default: None,
        }
    }

    pub fn enumeration<I, S>(name: impl Into<String>, variants: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            kind: GenericKind::Enumeration(
                variants.into_iter().map(Into::into).collect(),
            ),
            default: None,
        }
    }

    /// Restricts an integer generic to `min..=max`. Has no effect on other
    /// kinds.
    pub fn range(mut self, min: i64, max: i64) -> Self {
        if let GenericKind::Integer { .. } = self.kind {
            self.kind = GenericKind::Integer { min, max };
        }
        self
    }

    pub fn default(mut self, value: impl Into<GenericValue>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &GenericKind {
        &self.kind
    }

    pub fn default_value(&self) -> Option<&GenericValue> {
        self.default.as_ref()
    }

    fn validate(&self, value: &GenericValue) -> Result<(), String> {
        match (&self.kind, value) {
            (GenericKind::Integer { min, max }, GenericValue::Integer(value)) => {
                if (min..=max).contains(&value) {
                    Ok(())
                } else {
                    Err(format!("{value} is outside {min}..={max}"))
                }
            }
            (GenericKind::Boolean, GenericValue::Boolean(_)) => Ok(()),
            (GenericKind::Enumeration(variants), GenericValue::Enumeration(identifier)) => {
                if variants.contains(identifier) {
                    Ok(())
                } else {
                    Err(format!(
                        "`{identifier}` is not one of {}",
                        variants.join(", ")
                    ))
                }
            }
            (kind, value) => Err(format!("expected {kind}, got `{value}`")),
        }
    }
}

/// The declared generics of one module.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenericSchema {
    decls: Vec<GenericDecl>,
}

impl GenericSchema {
    pub(crate) fn new(
        module: &str,
        decls: Vec<GenericDecl>,
    ) -> Result<Self, UsageError> {
        for (index, decl) in decls.iter().enumerate() {
            ensure!(
                decls[..index].iter().all(|other| other.name != decl.name),
                InvalidDefinitionSnafu {
                    module,
                    reason: format!("generic {} is declared twice", decl.name)
                }
            );
            if let GenericKind::Integer { min, max } = decl.kind {
                ensure!(
                    min <= max,
                    InvalidDefinitionSnafu {
                        module,
                        reason: format!("generic {} has an empty range", decl.name)
                    }
                );
            }
            if let Some(default) = &decl.default {
                decl.validate(default).map_err(|reason| {
                    InvalidDefinitionSnafu {
                        module,
                        reason: format!(
                            "default of generic {} is invalid: {reason}",
                            decl.name
                        ),
                    }
                    .build()
                })?;
            }
        }
        Ok(Self { decls })
    }

    pub fn decls(&self) -> &[GenericDecl] {
        &self.decls
    }

    pub fn get(&self, name: &str) -> Option<&GenericDecl> {
        self.decls.iter().find(|decl| decl.name == name)
    }

    /// Validates `supplied` against the schema, filling in defaults.
    pub fn resolve<I, K, V>(
        &self,
        module: &str,
        supplied: I,
    ) -> Result<GenericParameterSet, UsageError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<GenericValue>,
    {
        let mut values = BTreeMap::new();
        for (name, value) in supplied {
            let name = name.into();
            let value = value.into();
            let decl = self.get(&name).context(UnknownGenericSnafu {
                module,
                generic: &name,
            })?;
            decl.validate(&value).map_err(|reason| {
                InvalidGenericSnafu {
                    module,
                    generic: &name,
                    reason,
                }
                .build()
            })?;
            ensure!(
                !values.contains_key(&name),
                DuplicateGenericSnafu {
                    module,
                    generic: &name
                }
            );
            values.insert(name, value);
        }

        for decl in &self.decls {
            if !values.contains_key(&decl.name) {
                let default = decl.default.clone().context(MissingGenericSnafu {
                    module,
                    generic: &decl.name,
                })?;
                values.insert(decl.name.clone(), default);
            }
        }

        Ok(GenericParameterSet { values })
    }
}

/// Validated generic values for one test invocation, ordered by name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct GenericParameterSet {
    values: BTreeMap<String, GenericValue>,
}

impl GenericParameterSet {
    pub fn get(&self, name: &str) -> Option<&GenericValue> {
        self.values.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &GenericValue)> {
        self.values.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }
}

impl fmt::Display for GenericParameterSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (index, (name, value)) in self.iter().enumerate() {
            if index > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{name}={value}")?;
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> GenericSchema {
        GenericSchema::new(
            "SYNCHRONIZER",
            vec![
                GenericDecl::integer("N").range(1, 8).default(2),
                GenericDecl::boolean("RESET_HIGH").default(true),
                GenericDecl::enumeration("MODE", ["fast", "safe"]),
            ],
        )
        .unwrap()
    }

    #[test]
    fn missing_names_fall_back_to_defaults() {
        let set = schema()
            .resolve("SYNCHRONIZER", [("MODE", "safe")])
            .unwrap();
        assert_eq!(set.get("N"), Some(&GenericValue::Integer(2)));
        assert_eq!(set.get("RESET_HIGH"), Some(&GenericValue::Boolean(true)));
        assert_eq!(set.to_string(), "{MODE=safe, N=2, RESET_HIGH=true}");
    }

    #[test]
    fn unknown_names_are_rejected() {
        let error = schema()
            .resolve("SYNCHRONIZER", [("MODE", "safe"), ("WIDTH", "8")])
            .unwrap_err();
        assert!(matches!(error, UsageError::UnknownGeneric { generic, .. } if generic == "WIDTH"));
    }

    #[test]
    fn values_are_type_and_range_checked() {
        let schema = schema();
        let out_of_range = schema
            .resolve(
                "SYNCHRONIZER",
                [
                    ("MODE", GenericValue::from("fast")),
                    ("N", GenericValue::from(9)),
                ],
            )
            .unwrap_err();
        assert!(matches!(out_of_range, UsageError::InvalidGeneric { .. }));

        let wrong_type = schema
            .resolve(
                "SYNCHRONIZER",
                [
                    ("MODE", GenericValue::from("fast")),
                    ("RESET_HIGH", GenericValue::from(1)),
                ],
            )
            .unwrap_err();
        assert!(matches!(wrong_type, UsageError::InvalidGeneric { .. }));

        let wrong_variant = schema
            .resolve("SYNCHRONIZER", [("MODE", "slow")])
            .unwrap_err();
        assert!(matches!(wrong_variant, UsageError::InvalidGeneric { .. }));
    }

    #[test]
    fn missing_without_default_is_an_error() {
        let error = schema()
            .resolve("SYNCHRONIZER", [] as [(&str, GenericValue); 0])
            .unwrap_err();
        assert!(matches!(error, UsageError::MissingGeneric { generic, .. } if generic == "MODE"));
    }

    #[test]
    fn invalid_defaults_are_caught_at_declaration() {
        let error = GenericSchema::new(
            "TIMER",
            vec![GenericDecl::integer("WIDTH").range(1, 64).default(0)],
        )
        .unwrap_err();
        assert!(matches!(error, UsageError::InvalidDefinition { .. }));
    }

    #[test]
    fn toolchain_rendering() {
        assert_eq!(GenericValue::from(8).render(), "8");
        assert_eq!(GenericValue::from(false).render(), "0");
        assert_eq!(GenericValue::from("fast").render(), "\"fast\"");
    }
}
