pub mod unit;

use std::fmt;

use crate::registry::unit::{TestUnit, UnitSpec};

/// Id of the unit whose transitive dependents need an authenticated session.
pub const DEFAULT_AUTH_UNIT: &str = "auth";

/// Registry of every test unit in a suite.
///
/// Units keep their registration order; resolution and listing use it as the
/// tie-break between independent units.
pub struct UnitRegistry {
    name: String,
    auth_unit: String,
    units: Vec<Box<dyn TestUnit>>,
}

impl UnitRegistry {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            auth_unit: DEFAULT_AUTH_UNIT.to_owned(),
            units: Vec::new(),
        }
    }

    /// Designate a different unit as the authentication unit.
    pub fn with_auth_unit(mut self, id: impl Into<String>) -> Self {
        self.auth_unit = id.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn auth_unit(&self) -> &str {
        &self.auth_unit
    }

    /// Register a unit.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError`] if a unit with the same id already exists.
    pub fn register(&mut self, unit: Box<dyn TestUnit>) -> Result<(), RegistryError> {
        if self.contains(unit.id()) {
            return Err(RegistryError {
                unit: unit.id().to_owned(),
                message: format!("unit \"{}\" is registered twice", unit.id()),
            });
        }
        self.units.push(unit);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&dyn TestUnit> {
        self.units
            .iter()
            .find(|u| u.id() == id)
            .map(|u| u.as_ref())
    }

    pub fn spec(&self, id: &str) -> Option<&UnitSpec> {
        self.get(id).map(|u| u.spec())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.units.iter().any(|u| u.id() == id)
    }

    /// Registration index of a unit.
    pub fn position(&self, id: &str) -> Option<usize> {
        self.units.iter().position(|u| u.id() == id)
    }

    /// All unit ids in registration order.
    pub fn ids(&self) -> Vec<&str> {
        self.units.iter().map(|u| u.id()).collect()
    }

    pub fn specs(&self) -> impl Iterator<Item = &UnitSpec> {
        self.units.iter().map(|u| u.spec())
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}

impl fmt::Debug for UnitRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnitRegistry")
            .field("name", &self.name)
            .field("auth_unit", &self.auth_unit)
            .field("units", &self.ids())
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("registry error: {message}")]
pub struct RegistryError {
    pub unit: String,
    pub message: String,
}
