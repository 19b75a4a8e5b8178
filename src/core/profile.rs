use serde::{Deserialize, Serialize};

/// A scalar-or-series specification for a time-varying quantity.
///
/// Callers declare capacities, prices and scaling factors either as a single
/// value to be broadcast over the whole horizon or as an explicit series.
/// The raw specification is kept on the owning component; [`Profile::resolve`]
/// produces the fixed-length runtime series and is pure, so re-triggering
/// normalization after components are added incrementally is safe.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Profile {
    Scalar(f64),
    Series(Vec<f64>),
}

/// Shape mismatch between a declared series and the system horizon.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LengthMismatch {
    pub expected: usize,
    pub actual: usize,
}

impl Profile {
    /// Broadcast this specification to a series of exactly `horizon` values.
    ///
    /// A scalar is repeated; a series must already have the right length.
    pub fn resolve(&self, horizon: usize) -> Result<Vec<f64>, LengthMismatch> {
        match self {
            Profile::Scalar(value) => Ok(vec![*value; horizon]),
            Profile::Series(values) => {
                if values.len() != horizon {
                    return Err(LengthMismatch {
                        expected: horizon,
                        actual: values.len(),
                    });
                }
                Ok(values.clone())
            }
        }
    }

    /// Iterate the raw values without broadcasting, for construction-time
    /// range checks that do not yet know the horizon.
    pub fn raw_values(&self) -> &[f64] {
        match self {
            Profile::Scalar(value) => std::slice::from_ref(value),
            Profile::Series(values) => values,
        }
    }
}

impl From<f64> for Profile {
    fn from(value: f64) -> Self {
        Profile::Scalar(value)
    }
}

impl From<Vec<f64>> for Profile {
    fn from(values: Vec<f64>) -> Self {
        Profile::Series(values)
    }
}

impl From<&[f64]> for Profile {
    fn from(values: &[f64]) -> Self {
        Profile::Series(values.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn scalar_broadcasts_to_horizon() {
        assert_eq!(
            Profile::from(2.5).resolve(4).unwrap(),
            vec![2.5, 2.5, 2.5, 2.5]
        );
    }

    #[test]
    fn series_of_matching_length_resolves_to_itself() {
        let profile = Profile::from(vec![1., 2., 3.]);
        assert_eq!(profile.resolve(3).unwrap(), vec![1., 2., 3.]);
    }

    #[test]
    fn series_length_mismatch_is_reported() {
        let err = Profile::from(vec![1., 2., 3.]).resolve(4).unwrap_err();
        assert_eq!(
            err,
            LengthMismatch {
                expected: 4,
                actual: 3
            }
        );
    }

    #[test]
    fn resolution_is_idempotent() {
        let resolved = Profile::from(7.).resolve(3).unwrap();
        let again = Profile::from(resolved.clone()).resolve(3).unwrap();
        assert_eq!(resolved, again);
    }
}
