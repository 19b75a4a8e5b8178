use crate::core::resource::Resource;
use indexmap::IndexMap;
use thiserror::Error;

/// Conversion law relating a component's consumed and produced flows at a
/// single time step.
///
/// Transfer functions are pure and stateless: the model builder evaluates
/// them once per component per time step, possibly again across repeated
/// builds during sensitivity sweeps, and identical inputs always give
/// identical results.
#[derive(Clone, Debug, PartialEq)]
pub enum TransferFn {
    Ratio(RatioTransfer),
    MultiRatio(MultiRatioTransfer),
    Polynomial(PolynomialTransfer),
}

/// Linear relationship between one input and one output resource,
/// `output = ratio * input`. A heat-to-electricity converter at 50%
/// efficiency is `RatioTransfer::new(heat, electricity, 0.5)`.
#[derive(Clone, Debug, PartialEq)]
pub struct RatioTransfer {
    pub input: Resource,
    pub output: Resource,
    pub ratio: f64,
}

/// Stoichiometric balance across several inputs and outputs. Each declared
/// resource carries a relative coefficient; the relation holds when
/// `flow(r) / coefficient(r)` is equal for every declared resource, which
/// encodes balances like "3 parts A + 7 parts B -> 2 parts C".
#[derive(Clone, Debug, PartialEq)]
pub struct MultiRatioTransfer {
    pub inputs: IndexMap<Resource, f64>,
    pub outputs: IndexMap<Resource, f64>,
}

/// Polynomial relationship: the sum of all outputs equals
/// `sum_i coefficient_i * prod_j input_j ^ exponent_j`. An empty term list
/// forces total output to zero.
#[derive(Clone, Debug, PartialEq)]
pub struct PolynomialTransfer {
    pub terms: Vec<PolynomialTerm>,
}

/// One term of a [`PolynomialTransfer`].
#[derive(Clone, Debug, PartialEq)]
pub struct PolynomialTerm {
    pub coefficient: f64,
    pub exponents: IndexMap<Resource, f64>,
}

/// What a transfer function asks of the caller at one time step: a set of
/// equalities to enforce, or explicitly nothing. The explicit marker removes
/// any ambiguity about an empty list of obligations.
#[derive(Clone, Debug, PartialEq)]
pub enum TransferRelation {
    NoConstraint,
    Equalities(Vec<Equality>),
}

/// A single `lhs == rhs` obligation returned by a transfer evaluation.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Equality {
    pub lhs: f64,
    pub rhs: f64,
}

impl Equality {
    pub fn residual(&self) -> f64 {
        self.lhs - self.rhs
    }

    pub fn satisfied_within(&self, tolerance: f64) -> bool {
        self.residual().abs() <= tolerance
    }
}

impl TransferRelation {
    /// True when every obligation holds within `tolerance` (vacuously true
    /// for [`TransferRelation::NoConstraint`]).
    pub fn satisfied_within(&self, tolerance: f64) -> bool {
        match self {
            TransferRelation::NoConstraint => true,
            TransferRelation::Equalities(eqs) => {
                eqs.iter().all(|eq| eq.satisfied_within(tolerance))
            }
        }
    }
}

/// Wiring errors raised when a transfer function is evaluated against flows
/// that do not carry the resources it declares.
#[derive(Debug, Error, PartialEq)]
pub enum TransferError {
    #[error("ratio transfer: neither input resource '{input}' nor output resource '{output}' was found among the supplied flows")]
    NeitherSidePresent { input: String, output: String },
    #[error("resource '{0}' declared by the transfer function was not found among the supplied flows")]
    MissingFlow(String),
}

impl TransferFn {
    pub fn ratio(input: Resource, output: Resource, ratio: f64) -> Self {
        TransferFn::Ratio(RatioTransfer::new(input, output, ratio))
    }

    pub fn multi_ratio(
        inputs: impl IntoIterator<Item = (Resource, f64)>,
        outputs: impl IntoIterator<Item = (Resource, f64)>,
    ) -> Self {
        TransferFn::MultiRatio(MultiRatioTransfer::new(inputs, outputs))
    }

    pub fn polynomial(terms: impl IntoIterator<Item = PolynomialTerm>) -> Self {
        TransferFn::Polynomial(PolynomialTransfer {
            terms: terms.into_iter().collect(),
        })
    }

    /// Every resource this transfer function mentions, used by the compiler
    /// for referential-integrity checks against a component's declared
    /// consumes/produces.
    pub fn referenced_resources(&self) -> Vec<&Resource> {
        match self {
            TransferFn::Ratio(t) => vec![&t.input, &t.output],
            TransferFn::MultiRatio(t) => t.inputs.keys().chain(t.outputs.keys()).collect(),
            TransferFn::Polynomial(t) => t
                .terms
                .iter()
                .flat_map(|term| term.exponents.keys())
                .collect(),
        }
    }

    /// Evaluate against named flow values, returning the equalities the
    /// caller must enforce.
    pub fn evaluate(
        &self,
        inputs: &IndexMap<String, f64>,
        outputs: &IndexMap<String, f64>,
    ) -> Result<TransferRelation, TransferError> {
        match self {
            TransferFn::Ratio(t) => t.evaluate(inputs, outputs),
            TransferFn::MultiRatio(t) => t.evaluate(inputs, outputs),
            TransferFn::Polynomial(t) => t.evaluate(inputs, outputs),
        }
    }
}

impl RatioTransfer {
    pub fn new(input: Resource, output: Resource, ratio: f64) -> Self {
        Self {
            input,
            output,
            ratio,
        }
    }

    /// An identity transfer for a component with a single resource on one
    /// side only (a pure source or sink); it never yields an obligation.
    pub fn identity(resource: Resource) -> Self {
        Self::new(resource.clone(), resource, 1.0)
    }

    pub fn evaluate(
        &self,
        inputs: &IndexMap<String, f64>,
        outputs: &IndexMap<String, f64>,
    ) -> Result<TransferRelation, TransferError> {
        let input = inputs.get(self.input.name());
        let output = outputs.get(self.output.name());
        match (input, output) {
            (Some(input), Some(output)) => Ok(TransferRelation::Equalities(vec![Equality {
                lhs: *output,
                rhs: self.ratio * input,
            }])),
            // A lone source/sink flow is bounded by its capacity constraints
            // alone, so one-sided usage imposes nothing.
            (Some(_), None) | (None, Some(_)) => Ok(TransferRelation::NoConstraint),
            (None, None) => Err(TransferError::NeitherSidePresent {
                input: self.input.name().to_string(),
                output: self.output.name().to_string(),
            }),
        }
    }
}

impl MultiRatioTransfer {
    pub fn new(
        inputs: impl IntoIterator<Item = (Resource, f64)>,
        outputs: impl IntoIterator<Item = (Resource, f64)>,
    ) -> Self {
        Self {
            inputs: inputs.into_iter().collect(),
            outputs: outputs.into_iter().collect(),
        }
    }

    pub fn evaluate(
        &self,
        inputs: &IndexMap<String, f64>,
        outputs: &IndexMap<String, f64>,
    ) -> Result<TransferRelation, TransferError> {
        let mut weighted = Vec::with_capacity(self.inputs.len() + self.outputs.len());
        for (res, coefficient) in &self.inputs {
            let flow = inputs
                .get(res.name())
                .ok_or_else(|| TransferError::MissingFlow(res.name().to_string()))?;
            weighted.push(flow / coefficient);
        }
        for (res, coefficient) in &self.outputs {
            let flow = outputs
                .get(res.name())
                .ok_or_else(|| TransferError::MissingFlow(res.name().to_string()))?;
            weighted.push(flow / coefficient);
        }

        let Some((first, rest)) = weighted.split_first() else {
            return Ok(TransferRelation::NoConstraint);
        };
        if rest.is_empty() {
            return Ok(TransferRelation::NoConstraint);
        }
        Ok(TransferRelation::Equalities(
            rest.iter()
                .map(|value| Equality {
                    lhs: *first,
                    rhs: *value,
                })
                .collect(),
        ))
    }
}

impl PolynomialTransfer {
    pub fn new(terms: impl IntoIterator<Item = (f64, Vec<(Resource, f64)>)>) -> Self {
        Self {
            terms: terms
                .into_iter()
                .map(|(coefficient, exponents)| PolynomialTerm {
                    coefficient,
                    exponents: exponents.into_iter().collect(),
                })
                .collect(),
        }
    }

    /// True when every term is representable in a linear program: at most one
    /// resource per term, raised to the first power.
    pub fn is_affine(&self) -> bool {
        self.terms.iter().all(|term| {
            term.exponents.len() <= 1 && term.exponents.values().all(|exp| *exp == 1.0)
        })
    }

    pub fn evaluate(
        &self,
        inputs: &IndexMap<String, f64>,
        outputs: &IndexMap<String, f64>,
    ) -> Result<TransferRelation, TransferError> {
        let total_output: f64 = outputs.values().sum();
        let mut rhs = 0.0;
        for term in &self.terms {
            let mut value = term.coefficient;
            for (res, exponent) in &term.exponents {
                let flow = inputs
                    .get(res.name())
                    .ok_or_else(|| TransferError::MissingFlow(res.name().to_string()))?;
                value *= flow.powf(*exponent);
            }
            rhs += value;
        }
        Ok(TransferRelation::Equalities(vec![Equality {
            lhs: total_output,
            rhs,
        }]))
    }
}
