pub mod core;
pub mod errors;
pub mod model;
pub mod results;
pub mod solver;


pub use crate::core::{
    CashFlow, CashFlowKind, Component, ComponentKind, Flexibility, Profile, Resource, StorageSpec,
    System, TransferFn,
};
pub use crate::errors::DespatchError;
pub use crate::model::Formulation;
pub use crate::results::DispatchResults;
pub use crate::solver::{SolveOptions, SolverBackend};

use std::io::Write;

/// Resolve a formulation by name, solve the system with it and stream the
/// dispatch table as CSV to `output`. The parsed results are also returned
/// for callers that want programmatic access.
pub fn run_dispatch(
    system: &mut System,
    formulation: &str,
    options: &SolveOptions,
    output: impl Write,
) -> Result<DispatchResults, anyhow::Error> {
    let formulation = Formulation::from_name(formulation).map_err(DespatchError::from)?;
    let results = system.solve(formulation, options)?;
    results.to_csv(output)?;
    Ok(results)
}
