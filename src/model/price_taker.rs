//! The price-taker dispatch compiler: turns a normalized [`System`] into a
//! linear program (flows, storage levels, conservation and capacity
//! constraints, cashflow-driven objective), solves it and reads the dispatch
//! back as a table.
//!
//! A builder moves through `uncompiled -> built -> solved -> extracted` and
//! is terminal once extracted; every [`PriceTakerBuilder::build`] call
//! compiles a brand-new program from the system's current state, so the same
//! system/builder pair can be reused for sensitivity sweeps.

use crate::core::component::{Component, ComponentKind, StorageSpec};
use crate::core::system::System;
use crate::core::transfer::{PolynomialTransfer, TransferFn};
use crate::errors::{CompileError, SolveError};
use crate::results::{
    charge_column, discharge_column, flow_column, soc_column, DispatchResults, FlowDirection,
};
use crate::solver::{self, SolveOptions};
use good_lp::{constraint, variable, Constraint, Expression, ProblemVariables, Solution, Variable};
use indexmap::IndexMap;
use tracing::debug;

pub struct PriceTakerBuilder<'a> {
    system: &'a System,
    state: State,
}

enum State {
    Uncompiled,
    Built(Program),
    Solved(SolvedDispatch),
    Extracted,
}

/// One freshly compiled mathematical program; consumed by `solve()`.
struct Program {
    variables: ProblemVariables,
    objective: Expression,
    constraints: Vec<Constraint>,
    flows: IndexMap<(String, String), Vec<Variable>>,
    storage: IndexMap<String, StorageVars>,
    /// Per-(component, capacity resource) objective coefficients, kept so
    /// the solved objective can be recomputed from harvested flow values.
    objective_coefficients: IndexMap<(String, String), Vec<f64>>,
}

struct StorageVars {
    soc: Vec<Variable>,
    charge: Vec<Variable>,
    discharge: Vec<Variable>,
}

struct SolvedDispatch {
    flows: IndexMap<(String, String), Vec<f64>>,
    storage: IndexMap<String, StorageLevels>,
    objective: f64,
}

struct StorageLevels {
    soc: Vec<f64>,
    charge: Vec<f64>,
    discharge: Vec<f64>,
}

impl<'a> PriceTakerBuilder<'a> {
    pub fn new(system: &'a System) -> Self {
        Self {
            system,
            state: State::Uncompiled,
        }
    }

    /// Compile the system into a fresh linear program. Any previously built,
    /// solved or extracted program is discarded; nothing carries over.
    pub fn build(&mut self) -> Result<(), CompileError> {
        self.state = State::Uncompiled;
        let horizon = self.system.horizon();

        for component in self.system.components() {
            self.validate_component(component, horizon)?;
        }

        let mut variables = ProblemVariables::new();
        let mut constraints = Vec::new();

        // flow[c, r, t] >= 0, declared densely over the full component x
        // resource cross-product; untouched combinations stay unconstrained
        // and cost nothing.
        let mut flows: IndexMap<(String, String), Vec<Variable>> = IndexMap::new();
        for component in self.non_storage() {
            for resource in self.system.resources() {
                let series = (0..horizon)
                    .map(|t| {
                        variables.add(
                            variable()
                                .min(0.0)
                                .name(format!("flow_{}_{}_{t}", component.name(), resource.name())),
                        )
                    })
                    .collect();
                flows.insert(
                    (component.name().to_string(), resource.name().to_string()),
                    series,
                );
            }
        }

        let mut storage: IndexMap<String, StorageVars> = IndexMap::new();
        for component in self.storages() {
            let mut add_series = |prefix: &str| -> Vec<Variable> {
                (0..horizon)
                    .map(|t| {
                        variables.add(
                            variable()
                                .min(0.0)
                                .name(format!("{prefix}_{}_{t}", component.name())),
                        )
                    })
                    .collect()
            };
            storage.insert(
                component.name().to_string(),
                StorageVars {
                    soc: add_series("soc"),
                    charge: add_series("charge"),
                    discharge: add_series("discharge"),
                },
            );
        }

        for component in self.non_storage() {
            self.compile_transfer(component, &flows, horizon, &mut constraints)?;
            self.compile_capacity(component, &flows, horizon, &mut constraints)?;
            self.compile_ramp(component, &flows, horizon, &mut constraints);
        }
        for component in self.storages() {
            self.compile_storage(component, &storage, horizon, &mut constraints)?;
        }
        self.compile_balance(&flows, &storage, horizon, &mut constraints);

        let (objective, objective_coefficients) = self.compile_objective(&flows, horizon)?;

        debug!(
            horizon,
            constraints = constraints.len(),
            "compiled price-taker program"
        );
        self.state = State::Built(Program {
            variables,
            objective,
            constraints,
            flows,
            storage,
            objective_coefficients,
        });
        Ok(())
    }

    /// Hand the built program to the numerical backend and harvest the
    /// variable assignment. Blocks until the backend terminates.
    pub fn solve(&mut self, options: &SolveOptions) -> Result<(), SolveError> {
        let program = match std::mem::replace(&mut self.state, State::Uncompiled) {
            State::Built(program) => program,
            other => {
                self.state = other;
                return Err(SolveError::NotBuilt);
            }
        };
        let Program {
            variables,
            objective,
            constraints,
            flows,
            storage,
            objective_coefficients,
        } = program;

        let solution = solver::maximize(variables, objective, constraints, options)?;

        let flows: IndexMap<(String, String), Vec<f64>> = flows
            .into_iter()
            .map(|(key, series)| {
                let values = series.into_iter().map(|v| solution.value(v)).collect();
                (key, values)
            })
            .collect();
        let storage: IndexMap<String, StorageLevels> = storage
            .into_iter()
            .map(|(name, vars)| {
                let harvest =
                    |series: Vec<Variable>| series.into_iter().map(|v| solution.value(v)).collect();
                (
                    name,
                    StorageLevels {
                        soc: harvest(vars.soc),
                        charge: harvest(vars.charge),
                        discharge: harvest(vars.discharge),
                    },
                )
            })
            .collect();

        let mut objective = 0.0;
        for (key, coefficients) in &objective_coefficients {
            if let Some(values) = flows.get(key) {
                objective += coefficients
                    .iter()
                    .zip(values)
                    .map(|(c, v)| c * v)
                    .sum::<f64>();
            }
        }

        self.state = State::Solved(SolvedDispatch {
            flows,
            storage,
            objective,
        });
        Ok(())
    }

    /// Read the solved dispatch into a table and retire this builder; a new
    /// `build()` call is needed before anything further.
    pub fn extract_results(&mut self) -> Result<DispatchResults, SolveError> {
        let dispatch = match std::mem::replace(&mut self.state, State::Extracted) {
            State::Solved(dispatch) => dispatch,
            State::Extracted => return Err(SolveError::AlreadyExtracted),
            other => {
                self.state = other;
                return Err(SolveError::NotSolved);
            }
        };

        let mut results =
            DispatchResults::new(self.system.time_index().to_vec(), dispatch.objective);
        for component in self.non_storage() {
            for resource in component.produces() {
                if let Some(values) =
                    dispatch.flows.get(&flow_key(component.name(), resource.name()))
                {
                    results.insert_column(
                        flow_column(component.name(), resource.name(), FlowDirection::Produces),
                        values.clone(),
                    );
                }
            }
            for resource in component.consumes() {
                if let Some(values) =
                    dispatch.flows.get(&flow_key(component.name(), resource.name()))
                {
                    // consumed flows are reported negative
                    results.insert_column(
                        flow_column(component.name(), resource.name(), FlowDirection::Consumes),
                        values.iter().map(|v| -v).collect(),
                    );
                }
            }
        }
        for (name, levels) in dispatch.storage {
            results.insert_column(soc_column(&name), levels.soc);
            results.insert_column(charge_column(&name), levels.charge);
            results.insert_column(discharge_column(&name), levels.discharge);
        }
        Ok(results)
    }

    fn non_storage(&self) -> impl Iterator<Item = &Component> {
        self.system.components().filter(|c| !c.is_storage())
    }

    fn storages(&self) -> impl Iterator<Item = &Component> {
        self.system.components().filter(|c| c.is_storage())
    }

    fn validate_component(
        &self,
        component: &Component,
        horizon: usize,
    ) -> Result<(), CompileError> {
        if component
            .limits()
            .is_none_or(|limits| limits.max.len() != horizon)
        {
            return Err(CompileError::Unnormalized {
                component: component.name().to_string(),
            });
        }

        if component.is_storage() {
            if let Some(cashflow) = component.cashflows().first() {
                return Err(CompileError::StorageCashflow {
                    component: component.name().to_string(),
                    cashflow: cashflow.name().to_string(),
                });
            }
            return Ok(());
        }

        if let Some(transfer) = component.transfer_fn() {
            for resource in transfer.referenced_resources() {
                if !component.consumes_resource(resource.name())
                    && !component.produces_resource(resource.name())
                {
                    return Err(CompileError::DanglingTransferResource {
                        component: component.name().to_string(),
                        resource: resource.name().to_string(),
                    });
                }
            }
            if let TransferFn::Polynomial(polynomial) = transfer {
                if !polynomial.is_affine() {
                    return Err(CompileError::NonlinearModel {
                        source_name: component.name().to_string(),
                        detail: "polynomial transfer function contains non-affine terms".into(),
                    });
                }
            }
        }

        for cashflow in component.cashflows() {
            match cashflow.is_linear() {
                Some(true) => {}
                Some(false) => {
                    return Err(CompileError::NonlinearModel {
                        source_name: format!("{}.{}", component.name(), cashflow.name()),
                        detail: "cashflow has a scaling exponent different from 1".into(),
                    })
                }
                None => {
                    return Err(CompileError::Unnormalized {
                        component: component.name().to_string(),
                    })
                }
            }
        }
        Ok(())
    }

    /// Equate the value pairs a component's transfer function prescribes,
    /// once per time step.
    fn compile_transfer(
        &self,
        component: &Component,
        flows: &IndexMap<(String, String), Vec<Variable>>,
        horizon: usize,
        constraints: &mut Vec<Constraint>,
    ) -> Result<(), CompileError> {
        let Some(transfer) = component.transfer_fn() else {
            return Ok(());
        };
        let var = |resource: &str, t: usize| flows[&flow_key(component.name(), resource)][t];

        match transfer {
            TransferFn::Ratio(ratio) => {
                let input_present = component.consumes_resource(ratio.input.name());
                let output_present = component.produces_resource(ratio.output.name());
                match (input_present, output_present) {
                    (true, true) => {
                        // a 1:1 self-loop is a tautology; skip the empty row
                        if ratio.input != ratio.output || ratio.ratio != 1.0 {
                            for t in 0..horizon {
                                constraints.push(constraint!(
                                    var(ratio.output.name(), t)
                                        == ratio.ratio * var(ratio.input.name(), t)
                                ));
                            }
                        }
                    }
                    // One-sided source/sink usage is bounded by capacity alone.
                    (true, false) | (false, true) => {}
                    (false, false) => {
                        return Err(CompileError::TransferUnwired {
                            component: component.name().to_string(),
                            input: ratio.input.name().to_string(),
                            output: ratio.output.name().to_string(),
                        })
                    }
                }
            }
            TransferFn::MultiRatio(multi) => {
                let declared: Vec<(&str, f64)> = multi
                    .inputs
                    .iter()
                    .chain(&multi.outputs)
                    .map(|(resource, coefficient)| (resource.name(), *coefficient))
                    .collect();
                if let Some((head, rest)) = declared.split_first() {
                    let (first, first_coefficient) = *head;
                    for &(resource, coefficient) in rest {
                        for t in 0..horizon {
                            constraints.push(constraint!(
                                (1.0 / coefficient) * var(resource, t)
                                    == (1.0 / first_coefficient) * var(first, t)
                            ));
                        }
                    }
                }
            }
            TransferFn::Polynomial(polynomial) => {
                self.compile_polynomial(component, polynomial, flows, horizon, constraints);
            }
        }
        Ok(())
    }

    /// `sum(produced flows) == sum of affine terms`; an empty term list
    /// forces total output to zero.
    fn compile_polynomial(
        &self,
        component: &Component,
        polynomial: &PolynomialTransfer,
        flows: &IndexMap<(String, String), Vec<Variable>>,
        horizon: usize,
        constraints: &mut Vec<Constraint>,
    ) {
        let var = |resource: &str, t: usize| flows[&flow_key(component.name(), resource)][t];
        for t in 0..horizon {
            let mut produced = Expression::default();
            for resource in component.produces() {
                produced += var(resource.name(), t);
            }
            let mut terms = Expression::default();
            for term in &polynomial.terms {
                match term.exponents.first() {
                    None => terms += term.coefficient,
                    Some((resource, _)) => {
                        terms += term.coefficient * var(resource.name(), t);
                    }
                }
            }
            constraints.push(constraint!(produced == terms));
        }
    }

    fn compile_capacity(
        &self,
        component: &Component,
        flows: &IndexMap<(String, String), Vec<Variable>>,
        horizon: usize,
        constraints: &mut Vec<Constraint>,
    ) -> Result<(), CompileError> {
        let limits = component
            .limits()
            .ok_or_else(|| CompileError::Unnormalized {
                component: component.name().to_string(),
            })?;
        let series = &flows[&flow_key(component.name(), component.capacity_resource().name())];
        for t in 0..horizon {
            constraints.push(constraint!(series[t] <= limits.max[t]));
            constraints.push(constraint!(series[t] >= limits.min[t]));
        }
        Ok(())
    }

    /// Bound step-to-step movement of a converter's capacity flow to
    /// `ramp_limit` times its capacity.
    fn compile_ramp(
        &self,
        component: &Component,
        flows: &IndexMap<(String, String), Vec<Variable>>,
        horizon: usize,
        constraints: &mut Vec<Constraint>,
    ) {
        let ComponentKind::Converter { ramp_limit } = component.kind() else {
            return;
        };
        if *ramp_limit >= 1.0 {
            return;
        }
        let Some(limits) = component.limits() else {
            return;
        };
        let series = &flows[&flow_key(component.name(), component.capacity_resource().name())];
        for t in 1..horizon {
            let allowed = ramp_limit * limits.max[t];
            constraints.push(constraint!(series[t] - series[t - 1] <= allowed));
            constraints.push(constraint!(series[t - 1] - series[t] <= allowed));
        }
    }

    /// Level recursion, charge/discharge/level bounds and (when requested)
    /// the end-of-horizon return to the initial level.
    fn compile_storage(
        &self,
        component: &Component,
        storage: &IndexMap<String, StorageVars>,
        horizon: usize,
        constraints: &mut Vec<Constraint>,
    ) -> Result<(), CompileError> {
        let ComponentKind::Storage(spec) = component.kind() else {
            return Ok(());
        };
        let limits = component
            .limits()
            .ok_or_else(|| CompileError::Unnormalized {
                component: component.name().to_string(),
            })?;
        let vars = &storage[component.name()];
        let sqrt_rte = spec.rte.sqrt();
        let initial_level = initial_level(spec, limits.max.first().copied().unwrap_or(0.0));

        for t in 0..horizon {
            constraints.push(constraint!(vars.soc[t] <= limits.max[t]));
            constraints.push(constraint!(
                vars.charge[t] <= spec.max_charge_rate * limits.max[t]
            ));
            constraints.push(constraint!(
                vars.discharge[t] <= spec.max_discharge_rate * limits.max[t]
            ));

            let mut level = Expression::from(vars.soc[t]);
            level -= sqrt_rte * vars.charge[t];
            level += (1.0 / sqrt_rte) * vars.discharge[t];
            if t == 0 {
                constraints.push(constraint!(level == initial_level));
            } else {
                constraints.push(constraint!(level == vars.soc[t - 1]));
            }
        }
        if spec.periodic_level && horizon > 0 {
            constraints.push(constraint!(vars.soc[horizon - 1] == initial_level));
        }
        Ok(())
    }

    /// The single conservation law: for every resource and time step,
    /// production minus consumption plus net storage discharge is zero.
    fn compile_balance(
        &self,
        flows: &IndexMap<(String, String), Vec<Variable>>,
        storage: &IndexMap<String, StorageVars>,
        horizon: usize,
        constraints: &mut Vec<Constraint>,
    ) {
        for resource in self.system.resources() {
            for t in 0..horizon {
                let mut balance = Expression::default();
                let mut touched = false;
                for component in self.non_storage() {
                    let series = &flows[&flow_key(component.name(), resource.name())];
                    if component.produces_resource(resource.name()) {
                        balance += series[t];
                        touched = true;
                    }
                    if component.consumes_resource(resource.name()) {
                        balance -= series[t];
                        touched = true;
                    }
                }
                for component in self.storages() {
                    if component.capacity_resource() == resource {
                        let vars = &storage[component.name()];
                        balance += vars.discharge[t];
                        balance -= vars.charge[t];
                        touched = true;
                    }
                }
                if touched {
                    constraints.push(constraint!(balance == 0.0));
                }
            }
        }
    }

    /// `sum over cashflows of sign * price(t) / reference_driver(t) *
    /// dispatch(t)`, where dispatch is the flow of the component's capacity
    /// resource. Exponents were already validated to be 1.
    fn compile_objective(
        &self,
        flows: &IndexMap<(String, String), Vec<Variable>>,
        horizon: usize,
    ) -> Result<(Expression, IndexMap<(String, String), Vec<f64>>), CompileError> {
        let mut objective = Expression::default();
        let mut coefficients: IndexMap<(String, String), Vec<f64>> = IndexMap::new();

        for component in self.non_storage() {
            let key = flow_key(component.name(), component.capacity_resource().name());
            for cashflow in component.cashflows() {
                let resolved = cashflow
                    .resolved()
                    .ok_or_else(|| CompileError::Unnormalized {
                        component: component.name().to_string(),
                    })?;
                let per_step = coefficients.entry(key.clone()).or_insert(vec![0.0; horizon]);
                for t in 0..horizon {
                    let coefficient = cashflow.kind().sign() * resolved.price[t]
                        / resolved.reference_driver[t];
                    per_step[t] += coefficient;
                    objective += coefficient * flows[&key][t];
                }
            }
        }
        Ok((objective, coefficients))
    }
}

fn flow_key(component: &str, resource: &str) -> (String, String) {
    (component.to_string(), resource.to_string())
}

fn initial_level(spec: &StorageSpec, first_step_capacity: f64) -> f64 {
    spec.initial_stored * first_step_capacity
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::cashflow::CashFlow;
    use crate::core::component::Component;
    use crate::core::resource::Resource;
    use pretty_assertions::assert_eq;
    use rstest::*;

    fn steam() -> Resource {
        Resource::new("steam")
    }

    #[fixture]
    fn system() -> System {
        let mut system = System::with_steps("plant", 3);
        system.add_resource(steam()).unwrap();
        system
            .add_component(
                Component::source("boiler", steam())
                    .max_capacity(100.)
                    .build()
                    .unwrap(),
            )
            .unwrap();
        system
            .add_component(
                Component::sink("vent", steam())
                    .max_capacity(100.)
                    .build()
                    .unwrap(),
            )
            .unwrap();
        system.normalize().unwrap();
        system
    }

    #[rstest]
    fn solve_before_build_is_rejected(system: System) {
        let mut builder = PriceTakerBuilder::new(&system);
        assert_eq!(
            builder.solve(&SolveOptions::new()).unwrap_err(),
            SolveError::NotBuilt
        );
    }

    #[rstest]
    fn extract_before_solve_is_rejected(system: System) {
        let mut builder = PriceTakerBuilder::new(&system);
        builder.build().unwrap();
        assert_eq!(
            builder.extract_results().unwrap_err(),
            SolveError::NotSolved
        );
    }

    #[rstest]
    fn extracted_builders_are_terminal(system: System) {
        let mut builder = PriceTakerBuilder::new(&system);
        builder.build().unwrap();
        builder.solve(&SolveOptions::new()).unwrap();
        builder.extract_results().unwrap();
        assert_eq!(
            builder.extract_results().unwrap_err(),
            SolveError::AlreadyExtracted
        );
    }

    #[rstest]
    fn build_restarts_the_state_machine(system: System) {
        let mut builder = PriceTakerBuilder::new(&system);
        builder.build().unwrap();
        builder.solve(&SolveOptions::new()).unwrap();
        builder.extract_results().unwrap();

        builder.build().unwrap();
        builder.solve(&SolveOptions::new()).unwrap();
        let results = builder.extract_results().unwrap();
        assert_eq!(results.len(), 3);
    }

    #[test]
    fn unnormalized_systems_are_rejected_at_build() {
        let mut system = System::with_steps("plant", 3);
        system.add_resource(steam()).unwrap();
        system
            .add_component(
                Component::source("boiler", steam())
                    .max_capacity(100.)
                    .build()
                    .unwrap(),
            )
            .unwrap();
        let mut builder = PriceTakerBuilder::new(&system);
        assert_eq!(
            builder.build().unwrap_err(),
            CompileError::Unnormalized {
                component: "boiler".into()
            }
        );
    }

    #[test]
    fn dangling_transfer_resource_is_a_compile_error() {
        let electricity = Resource::new("electricity");
        let heat = Resource::new("heat");
        let mut system = System::with_steps("plant", 2);
        system.add_resource(steam()).unwrap();
        system.add_resource(electricity.clone()).unwrap();
        system.add_resource(heat.clone()).unwrap();
        system
            .add_component(
                Component::converter("turbine")
                    .max_capacity(100.)
                    .consumes([steam()])
                    .produces([electricity.clone()])
                    .capacity_resource(electricity.clone())
                    // references heat, which the component does not declare
                    .transfer_fn(TransferFn::ratio(heat, electricity, 0.5))
                    .build()
                    .unwrap(),
            )
            .unwrap();
        system.normalize().unwrap();
        let mut builder = PriceTakerBuilder::new(&system);
        assert_eq!(
            builder.build().unwrap_err(),
            CompileError::DanglingTransferResource {
                component: "turbine".into(),
                resource: "heat".into(),
            }
        );
    }

    #[test]
    fn storage_cashflows_are_rejected_at_build() {
        let mut system = System::with_steps("plant", 2);
        system.add_resource(steam()).unwrap();
        system
            .add_component(
                Component::storage("accumulator", steam())
                    .max_capacity(40.)
                    .cashflow(CashFlow::cost("standby").price(1.0))
                    .build()
                    .unwrap(),
            )
            .unwrap();
        system.normalize().unwrap();
        let mut builder = PriceTakerBuilder::new(&system);
        assert_eq!(
            builder.build().unwrap_err(),
            CompileError::StorageCashflow {
                component: "accumulator".into(),
                cashflow: "standby".into(),
            }
        );
    }

    #[test]
    fn nonlinear_cashflows_are_distinguished_from_malformed_models() {
        let mut system = System::with_steps("plant", 2);
        system.add_resource(steam()).unwrap();
        system
            .add_component(
                Component::source("boiler", steam())
                    .max_capacity(100.)
                    .cashflow(
                        CashFlow::cost("fuel")
                            .price(3.0)
                            .reference_driver(100.0)
                            .scaling_exponent(0.6),
                    )
                    .build()
                    .unwrap(),
            )
            .unwrap();
        system.normalize().unwrap();
        let mut builder = PriceTakerBuilder::new(&system);
        assert!(matches!(
            builder.build().unwrap_err(),
            CompileError::NonlinearModel { source_name, .. } if source_name == "boiler.fuel"
        ));
    }
}
