use crate::core::cashflow::CashFlow;
use crate::core::profile::Profile;
use crate::core::resource::Resource;
use crate::core::transfer::{RatioTransfer, TransferFn};
use crate::errors::{ConstructionError, SystemError};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use tracing::warn;

/// Whether a component's dispatch is free to move between its bounds or is
/// pinned to its capacity profile.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Flexibility {
    Flex,
    Fixed,
}

/// Discriminant over the component variants. The compiler partitions
/// components into storage and non-storage by matching on this tag.
#[derive(Clone, Debug, PartialEq)]
pub enum ComponentKind {
    Source,
    Sink,
    Converter {
        /// Fraction of capacity the dispatch may move between consecutive
        /// timesteps; 1.0 means unlimited.
        ramp_limit: f64,
    },
    Storage(StorageSpec),
}

impl ComponentKind {
    pub fn is_storage(&self) -> bool {
        matches!(self, ComponentKind::Storage(_))
    }

    fn label(&self) -> &'static str {
        match self {
            ComponentKind::Source => "Source",
            ComponentKind::Sink => "Sink",
            ComponentKind::Converter { .. } => "Converter",
            ComponentKind::Storage(_) => "Storage",
        }
    }
}

/// Storage-specific extension block. All rates are fractions of the storage
/// capacity and must lie in [0, 1].
#[derive(Clone, Debug, PartialEq)]
pub struct StorageSpec {
    pub resource: Resource,
    pub rte: f64,
    pub max_charge_rate: f64,
    pub max_discharge_rate: f64,
    pub initial_stored: f64,
    /// Intent that the stored level returns to its initial value by the end
    /// of the horizon; compiled into an end-of-horizon constraint.
    pub periodic_level: bool,
}

/// Fixed-length effective dispatch bounds, produced by normalization. The
/// capacity factor is already folded into `max`; for fixed-flexibility
/// components `min` equals `max` elementwise.
#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedLimits {
    pub max: Vec<f64>,
    pub min: Vec<f64>,
}

/// A declarative node of the system graph: a source, sink, converter or
/// storage with capacity bounds, a transfer function and attached cashflows.
///
/// Components are built through [`Component::source`], [`Component::sink`],
/// [`Component::converter`] or [`Component::storage`]; all validation happens
/// exactly once, in [`ComponentBuilder::build`]. The model builder trusts
/// constructed components and re-checks nothing but referential integrity.
#[derive(Clone, Debug, PartialEq)]
pub struct Component {
    name: String,
    kind: ComponentKind,
    max_capacity: Profile,
    min_capacity: Option<Profile>,
    capacity_factor: Option<Profile>,
    consumes: Vec<Resource>,
    produces: Vec<Resource>,
    capacity_resource: Resource,
    flexibility: Flexibility,
    transfer_fn: Option<TransferFn>,
    cashflows: Vec<CashFlow>,
    resolved: Option<ResolvedLimits>,
}

impl Component {
    /// A component that produces a single resource out of nothing.
    pub fn source(name: impl Into<String>, produces: Resource) -> ComponentBuilder {
        let mut builder = ComponentBuilder::new(name, ComponentKind::Source);
        builder.produces = vec![produces];
        builder
    }

    /// A component that consumes a single resource as an endpoint.
    pub fn sink(name: impl Into<String>, consumes: Resource) -> ComponentBuilder {
        let mut builder = ComponentBuilder::new(name, ComponentKind::Sink);
        builder.consumes = vec![consumes];
        builder
    }

    /// A component that transforms input resources into output resources
    /// through a transfer function.
    pub fn converter(name: impl Into<String>) -> ComponentBuilder {
        ComponentBuilder::new(name, ComponentKind::Converter { ramp_limit: 1.0 })
    }

    /// A component that stores a single resource for later dispatch.
    pub fn storage(name: impl Into<String>, resource: Resource) -> ComponentBuilder {
        let mut builder = ComponentBuilder::new(
            name,
            ComponentKind::Storage(StorageSpec {
                resource: resource.clone(),
                rte: 1.0,
                max_charge_rate: 1.0,
                max_discharge_rate: 1.0,
                initial_stored: 0.0,
                periodic_level: true,
            }),
        );
        builder.capacity_resource = Some(resource);
        builder
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &ComponentKind {
        &self.kind
    }

    pub fn is_storage(&self) -> bool {
        self.kind.is_storage()
    }

    pub fn storage_spec(&self) -> Option<&StorageSpec> {
        match &self.kind {
            ComponentKind::Storage(spec) => Some(spec),
            _ => None,
        }
    }

    pub fn consumes(&self) -> &[Resource] {
        &self.consumes
    }

    pub fn produces(&self) -> &[Resource] {
        &self.produces
    }

    pub fn consumes_resource(&self, name: &str) -> bool {
        self.consumes.iter().any(|r| r.name() == name)
    }

    pub fn produces_resource(&self, name: &str) -> bool {
        self.produces.iter().any(|r| r.name() == name)
    }

    pub fn capacity_resource(&self) -> &Resource {
        &self.capacity_resource
    }

    pub fn flexibility(&self) -> Flexibility {
        self.flexibility
    }

    pub fn transfer_fn(&self) -> Option<&TransferFn> {
        self.transfer_fn.as_ref()
    }

    pub fn cashflows(&self) -> &[CashFlow] {
        &self.cashflows
    }

    /// Effective dispatch bounds; `None` until the owning system normalized
    /// this component against its horizon.
    pub fn limits(&self) -> Option<&ResolvedLimits> {
        self.resolved.as_ref()
    }

    /// The maximum operational capacity at time index `t` (capacity factor
    /// applied), once normalized.
    pub fn max_capacity_at(&self, t: usize) -> Option<f64> {
        self.resolved.as_ref().and_then(|r| r.max.get(t)).copied()
    }

    /// The minimum operational capacity at time index `t`, once normalized.
    pub fn min_capacity_at(&self, t: usize) -> Option<f64> {
        self.resolved.as_ref().and_then(|r| r.min.get(t)).copied()
    }

    /// Broadcast every time-varying field on this component and its
    /// cashflows to `horizon` values, and cross-check the resulting bounds.
    /// Resolution always recomputes from the raw specification, so calling
    /// this again after incremental system additions is safe.
    pub(crate) fn normalize(&mut self, horizon: usize) -> Result<(), SystemError> {
        let mismatch = |field: &str, e: crate::core::profile::LengthMismatch| {
            SystemError::ProfileLengthMismatch {
                component: self.name.clone(),
                field: field.to_string(),
                expected: e.expected,
                actual: e.actual,
            }
        };

        let max = self
            .max_capacity
            .resolve(horizon)
            .map_err(|e| mismatch("max_capacity", e))?;
        let factor = match &self.capacity_factor {
            Some(profile) => Some(
                profile
                    .resolve(horizon)
                    .map_err(|e| mismatch("capacity_factor", e))?,
            ),
            None => None,
        };

        let max: Vec<f64> = match factor {
            Some(factor) => max.iter().zip(&factor).map(|(m, f)| m * f).collect(),
            None => max,
        };

        let min = match self.flexibility {
            Flexibility::Fixed => max.clone(),
            Flexibility::Flex => match &self.min_capacity {
                Some(profile) => profile
                    .resolve(horizon)
                    .map_err(|e| mismatch("min_capacity", e))?,
                None => vec![0.0; horizon],
            },
        };

        for (t, (lo, hi)) in min.iter().zip(&max).enumerate() {
            if lo > hi {
                return Err(SystemError::MinimumExceedsCapacity {
                    component: self.name.clone(),
                    timestep: t,
                    min: *lo,
                    max: *hi,
                });
            }
        }

        for cashflow in &mut self.cashflows {
            cashflow
                .normalize(horizon)
                .map_err(|(field, e)| SystemError::ProfileLengthMismatch {
                    component: self.name.clone(),
                    field,
                    expected: e.expected,
                    actual: e.actual,
                })?;
        }

        self.resolved = Some(ResolvedLimits { max, min });
        Ok(())
    }
}

/// Staged fields for a [`Component`]; [`ComponentBuilder::build`] runs the
/// variant-specific validation and is the only way to obtain a `Component`.
#[derive(Clone, Debug)]
pub struct ComponentBuilder {
    name: String,
    kind: ComponentKind,
    max_capacity: Option<Profile>,
    min_capacity: Option<Profile>,
    capacity_factor: Option<Profile>,
    consumes: Vec<Resource>,
    produces: Vec<Resource>,
    capacity_resource: Option<Resource>,
    flexibility: Flexibility,
    transfer_fn: Option<TransferFn>,
    cashflows: Vec<CashFlow>,
    rate_fields: Vec<(&'static str, f64)>,
    periodic_level: Option<bool>,
    ramp_limit: Option<f64>,
}

impl ComponentBuilder {
    fn new(name: impl Into<String>, kind: ComponentKind) -> Self {
        Self {
            name: name.into(),
            kind,
            max_capacity: None,
            min_capacity: None,
            capacity_factor: None,
            consumes: vec![],
            produces: vec![],
            capacity_resource: None,
            flexibility: Flexibility::Flex,
            transfer_fn: None,
            cashflows: vec![],
            rate_fields: vec![],
            periodic_level: None,
            ramp_limit: None,
        }
    }

    pub fn max_capacity(mut self, capacity: impl Into<Profile>) -> Self {
        self.max_capacity = Some(capacity.into());
        self
    }

    pub fn min_capacity(mut self, minimum: impl Into<Profile>) -> Self {
        self.min_capacity = Some(minimum.into());
        self
    }

    pub fn capacity_factor(mut self, factor: impl Into<Profile>) -> Self {
        self.capacity_factor = Some(factor.into());
        self
    }

    pub fn consumes(mut self, resources: impl IntoIterator<Item = Resource>) -> Self {
        self.consumes = resources.into_iter().collect();
        self
    }

    pub fn produces(mut self, resources: impl IntoIterator<Item = Resource>) -> Self {
        self.produces = resources.into_iter().collect();
        self
    }

    pub fn capacity_resource(mut self, resource: Resource) -> Self {
        self.capacity_resource = Some(resource);
        self
    }

    pub fn flexibility(mut self, flexibility: Flexibility) -> Self {
        self.flexibility = flexibility;
        self
    }

    pub fn transfer_fn(mut self, transfer: TransferFn) -> Self {
        self.transfer_fn = Some(transfer);
        self
    }

    pub fn cashflow(mut self, cashflow: CashFlow) -> Self {
        self.cashflows.push(cashflow);
        self
    }

    /// Round-trip efficiency (storage only).
    pub fn rte(mut self, rte: f64) -> Self {
        self.rate_fields.push(("rte", rte));
        self
    }

    /// Maximum charge rate as a fraction of capacity per step (storage only).
    pub fn max_charge_rate(mut self, rate: f64) -> Self {
        self.rate_fields.push(("max_charge_rate", rate));
        self
    }

    /// Maximum discharge rate as a fraction of capacity per step (storage only).
    pub fn max_discharge_rate(mut self, rate: f64) -> Self {
        self.rate_fields.push(("max_discharge_rate", rate));
        self
    }

    /// Initial stored amount as a fraction of capacity (storage only).
    pub fn initial_stored(mut self, fraction: f64) -> Self {
        self.rate_fields.push(("initial_stored", fraction));
        self
    }

    /// Whether the stored level must return to its initial value by the end
    /// of the horizon (storage only; defaults to true).
    pub fn periodic_level(mut self, periodic: bool) -> Self {
        self.periodic_level = Some(periodic);
        self
    }

    /// Ramp limit as a fraction of capacity per step (converter only).
    pub fn ramp_limit(mut self, limit: f64) -> Self {
        self.ramp_limit = Some(limit);
        self
    }

    pub fn build(mut self) -> Result<Component, ConstructionError> {
        let max_capacity =
            self.max_capacity
                .take()
                .ok_or_else(|| ConstructionError::MissingCapacity {
                    component: self.name.clone(),
                })?;
        self.check_range(&max_capacity, "max_capacity", 0.0, f64::INFINITY)?;
        if let Some(min) = &self.min_capacity {
            self.check_range(min, "min_capacity", 0.0, f64::INFINITY)?;
        }
        if let Some(factor) = &self.capacity_factor {
            self.check_range(factor, "capacity_factor", 0.0, 1.0)?;
        }
        self.validate_cashflows()?;

        match self.kind.clone() {
            ComponentKind::Source => self.build_single_resource("Source", max_capacity),
            ComponentKind::Sink => self.build_single_resource("Sink", max_capacity),
            ComponentKind::Converter { .. } => self.build_converter(max_capacity),
            ComponentKind::Storage(spec) => self.build_storage(spec, max_capacity),
        }
    }

    fn check_range(
        &self,
        profile: &Profile,
        field: &'static str,
        low: f64,
        high: f64,
    ) -> Result<(), ConstructionError> {
        for (t, value) in profile.raw_values().iter().enumerate() {
            if *value < low || *value > high {
                return Err(ConstructionError::ValueOutOfRange {
                    component: self.name.clone(),
                    field,
                    timestep: t,
                    value: *value,
                    low,
                    high,
                });
            }
        }
        Ok(())
    }

    fn validate_cashflows(&self) -> Result<(), ConstructionError> {
        for cashflow in &self.cashflows {
            if cashflow
                .raw_reference_driver()
                .raw_values()
                .iter()
                .any(|v| *v == 0.0)
            {
                return Err(ConstructionError::ZeroReferenceDriver {
                    component: self.name.clone(),
                    cashflow: cashflow.name().to_string(),
                });
            }
        }
        Ok(())
    }

    fn reject_storage_fields(&self, kind: &'static str) -> Result<(), ConstructionError> {
        if let Some(&(field, _)) = self.rate_fields.first() {
            return Err(ConstructionError::FieldNotAccepted {
                component: self.name.clone(),
                field,
                kind,
            });
        }
        if self.periodic_level.is_some() {
            return Err(ConstructionError::FieldNotAccepted {
                component: self.name.clone(),
                field: "periodic_level",
                kind,
            });
        }
        Ok(())
    }

    fn warn_if_fixed_with_minimum(&self) {
        if self.flexibility == Flexibility::Fixed && self.min_capacity.is_some() {
            warn!(
                component = %self.name,
                "both min_capacity and fixed flexibility were specified; ignoring min_capacity in order to fix the component's dispatch"
            );
        }
    }

    /// Shared path for Source and Sink: exactly one implicit resource, which
    /// is also the capacity resource, and an identity transfer by default.
    fn build_single_resource(
        self,
        kind: &'static str,
        max_capacity: Profile,
    ) -> Result<Component, ConstructionError> {
        self.reject_storage_fields(kind)?;
        if self.ramp_limit.is_some() {
            return Err(ConstructionError::FieldNotAccepted {
                component: self.name.clone(),
                field: "ramp_limit",
                kind,
            });
        }

        let (declared, declared_field, forbidden, forbidden_field): (
            &[Resource],
            &'static str,
            &[Resource],
            &'static str,
        ) = match self.kind {
            ComponentKind::Source => (&self.produces, "produces", &self.consumes, "consumes"),
            ComponentKind::Sink => (&self.consumes, "consumes", &self.produces, "produces"),
            _ => unreachable!("single-resource path is only taken for sources and sinks"),
        };

        if !forbidden.is_empty() {
            return Err(ConstructionError::FieldNotAccepted {
                component: self.name.clone(),
                field: forbidden_field,
                kind,
            });
        }
        // the single implicit resource is set by the entry point and must
        // not be replaced with a list
        let [implied] = declared else {
            return Err(ConstructionError::FieldNotAccepted {
                component: self.name.clone(),
                field: declared_field,
                kind,
            });
        };
        if let Some(explicit) = &self.capacity_resource {
            if explicit != implied {
                return Err(ConstructionError::CapacityResourceMismatch {
                    component: self.name.clone(),
                    resource: explicit.name().to_string(),
                    expected: implied.name().to_string(),
                    kind,
                });
            }
        }
        self.warn_if_fixed_with_minimum();

        let capacity_resource = implied.clone();
        let transfer_fn = self
            .transfer_fn
            .clone()
            .unwrap_or_else(|| TransferFn::Ratio(RatioTransfer::identity(capacity_resource.clone())));

        Ok(Component {
            name: self.name,
            kind: self.kind,
            max_capacity,
            min_capacity: self.min_capacity,
            capacity_factor: self.capacity_factor,
            consumes: self.consumes,
            produces: self.produces,
            capacity_resource,
            flexibility: self.flexibility,
            transfer_fn: Some(transfer_fn),
            cashflows: self.cashflows,
            resolved: None,
        })
    }

    fn build_converter(mut self, max_capacity: Profile) -> Result<Component, ConstructionError> {
        self.reject_storage_fields("Converter")?;

        let ramp_limit = self.ramp_limit.unwrap_or(1.0);
        if !(0.0..=1.0).contains(&ramp_limit) {
            return Err(ConstructionError::FractionOutOfRange {
                component: self.name.clone(),
                field: "ramp_limit",
                value: ramp_limit,
            });
        }
        self.kind = ComponentKind::Converter { ramp_limit };

        let transfer_fn =
            self.transfer_fn
                .clone()
                .ok_or_else(|| ConstructionError::MissingTransferFn {
                    component: self.name.clone(),
                })?;
        self.validate_transfer_coefficients(&transfer_fn)?;

        let capacity_resource = match &self.capacity_resource {
            Some(explicit) => {
                let declared = self.consumes.iter().chain(&self.produces);
                if !declared.into_iter().any(|r| r == explicit) {
                    return Err(ConstructionError::CapacityResourceNotDeclared {
                        component: self.name.clone(),
                        resource: explicit.name().to_string(),
                    });
                }
                explicit.clone()
            }
            None => {
                let shared: Vec<&Resource> = self
                    .consumes
                    .iter()
                    .filter(|r| self.produces.contains(*r))
                    .collect();
                match shared.as_slice() {
                    [only] => {
                        warn!(
                            component = %self.name,
                            resource = %only.name(),
                            "capacity_resource was not specified; inferring the resource shared between consumes and produces"
                        );
                        (*only).clone()
                    }
                    _ => {
                        return Err(ConstructionError::AmbiguousCapacityResource {
                            component: self.name.clone(),
                            consumes: self.consumes.iter().map(Resource::name).join(", "),
                            produces: self.produces.iter().map(Resource::name).join(", "),
                        })
                    }
                }
            }
        };
        self.warn_if_fixed_with_minimum();

        Ok(Component {
            name: self.name,
            kind: self.kind,
            max_capacity,
            min_capacity: self.min_capacity,
            capacity_factor: self.capacity_factor,
            consumes: self.consumes,
            produces: self.produces,
            capacity_resource,
            flexibility: self.flexibility,
            transfer_fn: Some(transfer_fn),
            cashflows: self.cashflows,
            resolved: None,
        })
    }

    fn validate_transfer_coefficients(
        &self,
        transfer: &TransferFn,
    ) -> Result<(), ConstructionError> {
        let zero = match transfer {
            TransferFn::Ratio(t) => (t.ratio == 0.0).then(|| t.output.name()),
            TransferFn::MultiRatio(t) => t
                .inputs
                .iter()
                .chain(&t.outputs)
                .find(|(_, coeff)| **coeff == 0.0)
                .map(|(res, _)| res.name()),
            TransferFn::Polynomial(_) => None,
        };
        match zero {
            Some(resource) => Err(ConstructionError::ZeroTransferCoefficient {
                component: self.name.clone(),
                resource: resource.to_string(),
            }),
            None => Ok(()),
        }
    }

    fn build_storage(
        mut self,
        mut spec: StorageSpec,
        max_capacity: Profile,
    ) -> Result<Component, ConstructionError> {
        for (field, forbidden) in [
            ("consumes", !self.consumes.is_empty()),
            ("produces", !self.produces.is_empty()),
            ("transfer_fn", self.transfer_fn.is_some()),
            ("ramp_limit", self.ramp_limit.is_some()),
        ] {
            if forbidden {
                return Err(ConstructionError::FieldNotAccepted {
                    component: self.name.clone(),
                    field,
                    kind: "Storage",
                });
            }
        }
        // `Component::storage` presets capacity_resource to the stored
        // resource; anything else was set by the caller.
        if self
            .capacity_resource
            .as_ref()
            .is_some_and(|r| *r != spec.resource)
        {
            return Err(ConstructionError::FieldNotAccepted {
                component: self.name.clone(),
                field: "capacity_resource",
                kind: "Storage",
            });
        }
        if self.flexibility == Flexibility::Fixed {
            return Err(ConstructionError::FixedStorage {
                component: self.name.clone(),
            });
        }

        for &(field, value) in &self.rate_fields {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConstructionError::FractionOutOfRange {
                    component: self.name.clone(),
                    field,
                    value,
                });
            }
            match field {
                "rte" => spec.rte = value,
                "max_charge_rate" => spec.max_charge_rate = value,
                "max_discharge_rate" => spec.max_discharge_rate = value,
                "initial_stored" => spec.initial_stored = value,
                _ => unreachable!("rate_fields only holds the four storage fractions"),
            }
        }
        if let Some(periodic) = self.periodic_level {
            spec.periodic_level = periodic;
        }

        let capacity_resource = spec.resource.clone();
        self.kind = ComponentKind::Storage(spec);

        Ok(Component {
            name: self.name,
            kind: self.kind,
            max_capacity,
            min_capacity: self.min_capacity,
            capacity_factor: self.capacity_factor,
            consumes: vec![],
            produces: vec![],
            capacity_resource,
            flexibility: self.flexibility,
            transfer_fn: None,
            cashflows: self.cashflows,
            resolved: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::*;

    #[fixture]
    fn steam() -> Resource {
        Resource::new("steam")
    }

    #[fixture]
    fn electricity() -> Resource {
        Resource::new("electricity")
    }

    #[rstest]
    fn source_gets_identity_transfer_and_implicit_capacity_resource(steam: Resource) {
        let source = Component::source("boiler", steam.clone())
            .max_capacity(100.)
            .build()
            .unwrap();
        assert_eq!(source.capacity_resource(), &steam);
        assert_eq!(
            source.transfer_fn(),
            Some(&TransferFn::Ratio(RatioTransfer::identity(steam)))
        );
    }

    #[rstest]
    fn source_rejects_consumed_resources(steam: Resource, electricity: Resource) {
        let err = Component::source("boiler", steam)
            .max_capacity(100.)
            .consumes([electricity])
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            ConstructionError::FieldNotAccepted {
                component: "boiler".into(),
                field: "consumes",
                kind: "Source",
            }
        );
    }

    #[rstest]
    fn sink_rejects_foreign_capacity_resource(steam: Resource, electricity: Resource) {
        let err = Component::sink("grid", electricity)
            .max_capacity(100.)
            .capacity_resource(steam)
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            ConstructionError::CapacityResourceMismatch { kind: "Sink", .. }
        ));
    }

    #[rstest]
    fn component_without_capacity_is_rejected(steam: Resource) {
        let err = Component::source("boiler", steam).build().unwrap_err();
        assert_eq!(
            err,
            ConstructionError::MissingCapacity {
                component: "boiler".into()
            }
        );
    }

    #[rstest]
    fn capacity_factor_outside_unit_interval_is_rejected(steam: Resource) {
        let err = Component::source("boiler", steam)
            .max_capacity(100.)
            .capacity_factor(vec![0.5, 1.2])
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            ConstructionError::ValueOutOfRange {
                component: "boiler".into(),
                field: "capacity_factor",
                timestep: 1,
                value: 1.2,
                low: 0.0,
                high: 1.0,
            }
        );
    }

    #[rstest]
    fn converter_requires_a_transfer_fn(steam: Resource, electricity: Resource) {
        let err = Component::converter("turbine")
            .max_capacity(100.)
            .consumes([steam])
            .produces([electricity.clone()])
            .capacity_resource(electricity)
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            ConstructionError::MissingTransferFn {
                component: "turbine".into()
            }
        );
    }

    #[rstest]
    fn converter_with_disjoint_resources_needs_explicit_capacity_resource(
        steam: Resource,
        electricity: Resource,
    ) {
        let err = Component::converter("turbine")
            .max_capacity(100.)
            .consumes([steam.clone()])
            .produces([electricity.clone()])
            .transfer_fn(TransferFn::ratio(steam, electricity, 0.5))
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            ConstructionError::AmbiguousCapacityResource { .. }
        ));
    }

    #[rstest]
    fn converter_infers_capacity_resource_from_single_shared_resource(steam: Resource) {
        let compressor = Component::converter("compressor")
            .max_capacity(100.)
            .consumes([steam.clone()])
            .produces([steam.clone()])
            .transfer_fn(TransferFn::ratio(steam.clone(), steam.clone(), 1.0))
            .build()
            .unwrap();
        assert_eq!(compressor.capacity_resource(), &steam);
    }

    #[rstest]
    fn converter_rejects_undeclared_capacity_resource(steam: Resource, electricity: Resource) {
        let heat = Resource::new("heat");
        let err = Component::converter("turbine")
            .max_capacity(100.)
            .consumes([steam.clone()])
            .produces([electricity.clone()])
            .capacity_resource(heat)
            .transfer_fn(TransferFn::ratio(steam, electricity, 0.5))
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            ConstructionError::CapacityResourceNotDeclared {
                component: "turbine".into(),
                resource: "heat".into(),
            }
        );
    }

    #[rstest]
    fn converter_ramp_limit_must_be_a_fraction(steam: Resource, electricity: Resource) {
        let err = Component::converter("turbine")
            .max_capacity(100.)
            .consumes([steam.clone()])
            .produces([electricity.clone()])
            .capacity_resource(electricity.clone())
            .transfer_fn(TransferFn::ratio(steam, electricity, 0.5))
            .ramp_limit(1.5)
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            ConstructionError::FractionOutOfRange {
                component: "turbine".into(),
                field: "ramp_limit",
                value: 1.5,
            }
        );
    }

    #[rstest]
    #[case::rte("rte")]
    #[case::charge("max_charge_rate")]
    #[case::discharge("max_discharge_rate")]
    #[case::initial("initial_stored")]
    fn storage_fractions_are_validated(#[case] field: &'static str, electricity: Resource) {
        let builder = Component::storage("battery", electricity).max_capacity(40.);
        let builder = match field {
            "rte" => builder.rte(1.1),
            "max_charge_rate" => builder.max_charge_rate(-0.2),
            "max_discharge_rate" => builder.max_discharge_rate(2.0),
            "initial_stored" => builder.initial_stored(1.01),
            _ => unreachable!(),
        };
        let err = builder.build().unwrap_err();
        assert!(matches!(
            err,
            ConstructionError::FractionOutOfRange { field: f, .. } if f == field
        ));
    }

    #[rstest]
    fn storage_cannot_be_fixed(electricity: Resource) {
        let err = Component::storage("battery", electricity)
            .max_capacity(40.)
            .flexibility(Flexibility::Fixed)
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            ConstructionError::FixedStorage {
                component: "battery".into()
            }
        );
    }

    #[rstest]
    fn storage_rejects_transfer_fn(electricity: Resource) {
        let err = Component::storage("battery", electricity.clone())
            .max_capacity(40.)
            .transfer_fn(TransferFn::ratio(electricity.clone(), electricity, 1.0))
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            ConstructionError::FieldNotAccepted {
                field: "transfer_fn",
                ..
            }
        ));
    }

    #[rstest]
    fn normalization_broadcasts_and_applies_capacity_factor(steam: Resource) {
        let mut source = Component::source("boiler", steam)
            .max_capacity(100.)
            .capacity_factor(vec![1.0, 0.5, 0.25])
            .build()
            .unwrap();
        source.normalize(3).unwrap();
        assert_eq!(source.limits().unwrap().max, vec![100., 50., 25.]);
        assert_eq!(source.limits().unwrap().min, vec![0., 0., 0.]);
    }

    #[rstest]
    fn fixed_flexibility_pins_minimum_to_maximum(steam: Resource) {
        let mut source = Component::source("boiler", steam)
            .max_capacity(vec![100., 80.])
            .flexibility(Flexibility::Fixed)
            .build()
            .unwrap();
        source.normalize(2).unwrap();
        assert_eq!(source.limits().unwrap().min, vec![100., 80.]);
    }

    #[rstest]
    fn normalization_reports_length_mismatch_per_component(steam: Resource) {
        let mut source = Component::source("boiler", steam)
            .max_capacity(vec![100., 80.])
            .build()
            .unwrap();
        let err = source.normalize(4).unwrap_err();
        assert_eq!(
            err,
            SystemError::ProfileLengthMismatch {
                component: "boiler".into(),
                field: "max_capacity".into(),
                expected: 4,
                actual: 2,
            }
        );
    }

    #[rstest]
    fn normalization_rejects_minimum_above_capacity(steam: Resource) {
        let mut source = Component::source("boiler", steam)
            .max_capacity(100.)
            .min_capacity(vec![50., 120., 50.])
            .build()
            .unwrap();
        let err = source.normalize(3).unwrap_err();
        assert_eq!(
            err,
            SystemError::MinimumExceedsCapacity {
                component: "boiler".into(),
                timestep: 1,
                min: 120.,
                max: 100.,
            }
        );
    }

    #[rstest]
    fn normalization_is_idempotent_and_retriggerable(steam: Resource) {
        let mut source = Component::source("boiler", steam)
            .max_capacity(100.)
            .min_capacity(50.)
            .build()
            .unwrap();
        source.normalize(4).unwrap();
        let first = source.limits().unwrap().clone();
        source.normalize(4).unwrap();
        assert_eq!(source.limits().unwrap(), &first);
    }
}
