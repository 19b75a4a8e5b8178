use serde::{Deserialize, Serialize};
use std::fmt;

/// A named commodity moved between components, e.g. "steam" or "electricity".
///
/// Resources are immutable after construction and are compared by value, so
/// two `Resource` instances with the same name (and unit) are the same
/// resource for registry and transfer-function purposes.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resource {
    name: String,
    unit: Option<String>,
}

impl Resource {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            unit: None,
        }
    }

    pub fn with_unit(name: impl Into<String>, unit: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            unit: Some(unit.into()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn unit(&self) -> Option<&str> {
        self.unit.as_deref()
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.unit {
            Some(unit) => write!(f, "{} ({})", self.name, unit),
            None => write!(f, "{}", self.name),
        }
    }
}
