//! Narrow boundary to the numerical backend. The compiler hands over a
//! finished program (variables, constraints, objective) and gets back either
//! a solution or a termination status; nothing about backend internals leaks
//! past this module.

use crate::errors::SolveError;
use good_lp::solvers::microlp::microlp;
use good_lp::{Constraint, Expression, ProblemVariables, ResolutionError, Solution, SolverModel};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use strum::{Display, EnumString};
use tracing::{debug, warn};

/// The linear-programming backends this crate can drive. Microlp is a pure
/// Rust simplex implementation and needs no system libraries.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum SolverBackend {
    #[default]
    Microlp,
}

/// Caller-tunable knobs for a solve. The timeout is advisory: the backends
/// currently wired up block until completion, so an overrun is detected and
/// reported only after the fact.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SolveOptions {
    pub backend: SolverBackend,
    pub timeout: Option<Duration>,
}

impl SolveOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn backend(mut self, backend: SolverBackend) -> Self {
        self.backend = backend;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Maximize `objective` subject to `constraints`, blocking until the backend
/// terminates. Infeasibility and unboundedness come back as their own
/// statuses rather than as generic failures.
pub(crate) fn maximize(
    variables: ProblemVariables,
    objective: Expression,
    constraints: Vec<Constraint>,
    options: &SolveOptions,
) -> Result<impl Solution, SolveError> {
    let SolverBackend::Microlp = options.backend;
    if options.timeout.is_some() {
        warn!(backend = %options.backend, "backend cannot interrupt a running solve; the timeout is checked only after termination");
    }

    let mut model = variables.maximise(objective).using(microlp);
    let constraint_count = constraints.len();
    for constraint in constraints {
        model = model.with(constraint);
    }

    let started = Instant::now();
    let solution = model.solve().map_err(map_resolution_error)?;
    let elapsed = started.elapsed();
    debug!(?elapsed, constraint_count, "solver terminated");

    if let Some(timeout) = options.timeout {
        if elapsed > timeout {
            return Err(SolveError::Timeout {
                limit: timeout,
                elapsed,
            });
        }
    }
    Ok(solution)
}

fn map_resolution_error(error: ResolutionError) -> SolveError {
    match error {
        ResolutionError::Infeasible => SolveError::Infeasible,
        ResolutionError::Unbounded => SolveError::Unbounded,
        ResolutionError::Other(message) => SolveError::Backend(message.to_string()),
        ResolutionError::Str(message) => SolveError::Backend(message),
    }
}
