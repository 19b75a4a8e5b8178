use thiserror::Error;

/// Top-level error type for the crate, wrapping the per-phase categories.
///
/// Each phase of the pipeline surfaces its own error enum so that callers can
/// tell a malformed model apart from an unlucky solve. Nothing is ever
/// downgraded from one category to another.
#[derive(Debug, Error)]
pub enum DespatchError {
    #[error(transparent)]
    Construction(#[from] ConstructionError),
    #[error(transparent)]
    System(#[from] SystemError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error(transparent)]
    Solve(#[from] SolveError),
}

/// Validation failures raised while constructing a component, cashflow or
/// transfer function. These always name the offending component and field.
#[derive(Debug, Error, PartialEq)]
pub enum ConstructionError {
    #[error("{component}: {field} value at timestep {timestep} ({value}) is outside the range [{low}, {high}]")]
    ValueOutOfRange {
        component: String,
        field: &'static str,
        timestep: usize,
        value: f64,
        low: f64,
        high: f64,
    },
    #[error("{component}: '{field}'={value} is outside the range [0, 1]")]
    FractionOutOfRange {
        component: String,
        field: &'static str,
        value: f64,
    },
    #[error("{component}: no capacity information was provided; please supply max_capacity")]
    MissingCapacity { component: String },
    #[error("{component}: field '{field}' is not accepted for a {kind} component; please remove it")]
    FieldNotAccepted {
        component: String,
        field: &'static str,
        kind: &'static str,
    },
    #[error("{component}: capacity_resource '{resource}' is not among the component's consumed or produced resources")]
    CapacityResourceNotDeclared { component: String, resource: String },
    #[error("{component}: capacity_resource '{resource}' differs from the single resource '{expected}' implied for a {kind}")]
    CapacityResourceMismatch {
        component: String,
        resource: String,
        expected: String,
        kind: &'static str,
    },
    #[error("converter {component}: ambiguity between consumes [{consumes}] and produces [{produces}]; please set capacity_resource explicitly")]
    AmbiguousCapacityResource {
        component: String,
        consumes: String,
        produces: String,
    },
    #[error("converter {component}: required field 'transfer_fn' was not provided")]
    MissingTransferFn { component: String },
    #[error("{component}: storage components must be flexible; 'fixed' flexibility is not accepted")]
    FixedStorage { component: String },
    #[error("{component}: transfer function declares a zero coefficient for resource '{resource}'")]
    ZeroTransferCoefficient { component: String, resource: String },
    #[error("{component}: cashflow '{cashflow}' has a zero reference_driver, which would divide dispatch by zero")]
    ZeroReferenceDriver { component: String, cashflow: String },
}

/// Failures raised while assembling or normalizing a [`System`]: duplicate
/// names and time-series shape mismatches.
///
/// [`System`]: crate::core::system::System
#[derive(Debug, Error, PartialEq)]
pub enum SystemError {
    #[error("component name '{0}' is already registered; component names must be unique")]
    DuplicateComponent(String),
    #[error("resource name '{0}' is already registered; resource names must be unique")]
    DuplicateResource(String),
    #[error("{component}: time series data for {field} does not match the system horizon (expected {expected}, got {actual})")]
    ProfileLengthMismatch {
        component: String,
        field: String,
        expected: usize,
        actual: usize,
    },
    #[error("{component}: references resource '{resource}' which is not registered with the system")]
    UnknownResource { component: String, resource: String },
    #[error("{component}: minimum capacity at timestep {timestep} is greater than capacity at that timestep ({min} > {max})")]
    MinimumExceedsCapacity {
        component: String,
        timestep: usize,
        min: f64,
        max: f64,
    },
}

/// Configuration errors, e.g. asking for a formulation that does not exist.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("unknown formulation '{name}'; available formulations: {available}")]
    UnknownFormulation { name: String, available: String },
}

/// Failures raised inside `build()` while compiling a [`System`] into a
/// mathematical program.
///
/// [`System`]: crate::core::system::System
#[derive(Debug, Error, PartialEq)]
pub enum CompileError {
    #[error("{component}: system has not been normalized; call System::normalize (or System::solve) before building")]
    Unnormalized { component: String },
    #[error("{component}: transfer function references resource '{resource}' which the component neither consumes nor produces")]
    DanglingTransferResource { component: String, resource: String },
    #[error("{component}: transfer function matched neither input '{input}' nor output '{output}' among the component's flows")]
    TransferUnwired {
        component: String,
        input: String,
        output: String,
    },
    #[error("{source_name}: {detail}; this model is nonlinear and no nonlinear-capable solver backend is registered")]
    NonlinearModel { source_name: String, detail: String },
    #[error("storage component {component} carries cashflow '{cashflow}', but storage dispatch is not a cashflow driver in this formulation")]
    StorageCashflow { component: String, cashflow: String },
}

/// Solver-outcome failures, reported distinctly from compile-time errors.
/// Infeasibility and unboundedness are surfaced verbatim, never masked with
/// a default solution.
#[derive(Debug, Error, PartialEq)]
pub enum SolveError {
    #[error("the model has not been built; call build() before solve()")]
    NotBuilt,
    #[error("the model has not been solved; call solve() before extract_results()")]
    NotSolved,
    #[error("results were already extracted from this builder; call build() to start a fresh program")]
    AlreadyExtracted,
    #[error("solver reported the model as infeasible")]
    Infeasible,
    #[error("solver reported the model as unbounded")]
    Unbounded,
    #[error("solve exceeded the {limit:?} time limit (took {elapsed:?})")]
    Timeout {
        limit: std::time::Duration,
        elapsed: std::time::Duration,
    },
    #[error("solver failure: {0}")]
    Backend(String),
}
