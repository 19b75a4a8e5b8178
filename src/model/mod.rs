pub mod price_taker;

use crate::errors::ConfigError;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoEnumIterator};

/// The dispatch formulations this crate can compile. Resolution from a name
/// happens through [`Formulation::from_name`] so that configuration errors
/// can enumerate what is actually registered.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Display, EnumString, EnumIter, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Formulation {
    PriceTaker,
}

impl Formulation {
    /// Resolve a formulation from its snake_case name, listing the valid
    /// names on failure.
    pub fn from_name(name: &str) -> Result<Self, ConfigError> {
        name.parse().map_err(|_| ConfigError::UnknownFormulation {
            name: name.to_string(),
            available: Formulation::iter().map(|f| f.to_string()).join(", "),
        })
    }
}
