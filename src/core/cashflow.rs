use crate::core::profile::{LengthMismatch, Profile};
use serde::{Deserialize, Serialize};

/// Direction of a cashflow: costs pull the objective down, revenues push it
/// up.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CashFlowKind {
    Cost,
    Revenue,
}

impl CashFlowKind {
    pub fn sign(&self) -> f64 {
        match self {
            CashFlowKind::Cost => -1.0,
            CashFlowKind::Revenue => 1.0,
        }
    }
}

/// An economy-of-scale economic term attached to a component.
///
/// The contribution at time `t` for a dispatch level `d` is
/// `sign * price(t) * (d / reference_driver(t)) ^ scaling_exponent(t)`.
/// Price, reference driver and scaling exponent are scalar-or-series
/// specifications broadcast to the horizon by [`System`] normalization.
///
/// With the defaults (`reference_driver = 1`, `scaling_exponent = 1`) this
/// collapses to the familiar linear `sign * price(t) * d`, which is what a
/// linear solver backend can accept; any exponent other than one makes the
/// model nonlinear.
///
/// [`System`]: crate::core::system::System
#[derive(Clone, Debug, PartialEq)]
pub struct CashFlow {
    name: String,
    kind: CashFlowKind,
    price: Profile,
    reference_driver: Profile,
    scaling_exponent: Profile,
    resolved: Option<ResolvedCashFlow>,
}

/// Fixed-length runtime view of a [`CashFlow`], produced by normalization.
#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedCashFlow {
    pub price: Vec<f64>,
    pub reference_driver: Vec<f64>,
    pub scaling_exponent: Vec<f64>,
}

impl CashFlow {
    pub fn cost(name: impl Into<String>) -> Self {
        Self::new(name, CashFlowKind::Cost)
    }

    pub fn revenue(name: impl Into<String>) -> Self {
        Self::new(name, CashFlowKind::Revenue)
    }

    fn new(name: impl Into<String>, kind: CashFlowKind) -> Self {
        Self {
            name: name.into(),
            kind,
            price: Profile::Scalar(1.0),
            reference_driver: Profile::Scalar(1.0),
            scaling_exponent: Profile::Scalar(1.0),
            resolved: None,
        }
    }

    /// Price per unit of dispatch, a scalar (`alpha`) or a full profile.
    pub fn price(mut self, price: impl Into<Profile>) -> Self {
        self.price = price.into();
        self
    }

    /// Reference dispatch level against which economy of scale is measured.
    pub fn reference_driver(mut self, driver: impl Into<Profile>) -> Self {
        self.reference_driver = driver.into();
        self
    }

    /// Economy-of-scale exponent; 1.0 keeps the term linear.
    pub fn scaling_exponent(mut self, exponent: impl Into<Profile>) -> Self {
        self.scaling_exponent = exponent.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> CashFlowKind {
        self.kind
    }

    pub fn raw_reference_driver(&self) -> &Profile {
        &self.reference_driver
    }

    /// Broadcast every time-varying field to `horizon` values. Pure with
    /// respect to the raw specification, so calling it again is a no-op.
    pub(crate) fn normalize(&mut self, horizon: usize) -> Result<(), (String, LengthMismatch)> {
        let price = self
            .price
            .resolve(horizon)
            .map_err(|e| (format!("{} price_profile", self.name), e))?;
        let reference_driver = self
            .reference_driver
            .resolve(horizon)
            .map_err(|e| (format!("{} reference_driver", self.name), e))?;
        let scaling_exponent = self
            .scaling_exponent
            .resolve(horizon)
            .map_err(|e| (format!("{} scaling_exponent", self.name), e))?;
        self.resolved = Some(ResolvedCashFlow {
            price,
            reference_driver,
            scaling_exponent,
        });
        Ok(())
    }

    pub fn resolved(&self) -> Option<&ResolvedCashFlow> {
        self.resolved.as_ref()
    }

    /// Dollar value of this cashflow at timestep `t` for a given dispatch
    /// level. `None` until the owning system has been normalized or when `t`
    /// falls outside the horizon.
    pub fn evaluate(&self, t: usize, dispatch: f64) -> Option<f64> {
        let resolved = self.resolved.as_ref()?;
        let price = resolved.price.get(t)?;
        let reference_driver = resolved.reference_driver.get(t)?;
        let scaling_exponent = resolved.scaling_exponent.get(t)?;
        Some(self.kind.sign() * price * (dispatch / reference_driver).powf(*scaling_exponent))
    }

    /// True when every scaling exponent equals one, i.e. the term can be
    /// handed to a linear solver. Requires normalization.
    pub(crate) fn is_linear(&self) -> Option<bool> {
        self.resolved
            .as_ref()
            .map(|r| r.scaling_exponent.iter().all(|exp| *exp == 1.0))
    }
}
