use thiserror::Error;

use crate::types::{DynError, TypeTag};

/// Errors raised while resolving a dependency graph.
#[derive(Error, Debug)]
pub enum ResolveError {
    /// The requested name is absent from the full delegation chain.
    #[error("dependency `{name}: {required}` not found")]
    NotFound { name: String, required: TypeTag },
    /// The name is registered, but its declared type cannot satisfy the request.
    #[error("requested dependency `{name}: {required}` doesn't match provided type `{provided}`")]
    TypeMismatch {
        name: String,
        required: TypeTag,
        provided: TypeTag,
    },
    /// The factory's production mode does not fit how it was invoked.
    #[error("factory for `{name}` violated its production contract: {detail}")]
    ContractViolation { name: String, detail: String },
    /// The factory itself failed to produce a value.
    #[error("factory for `{name}` failed - error: {error:?}")]
    FactoryFailed { name: String, error: DynError },
    /// A resolved value could not be viewed as the requested concrete type.
    #[error(transparent)]
    Downcast(#[from] DowncastError),
}

/// A value cannot be viewed as the requested concrete type.
#[derive(Error, Debug, Clone)]
#[error("value provided as `{actual}` cannot be downcast to `{required}`")]
pub struct DowncastError {
    pub required: &'static str,
    pub actual: &'static str,
}

/// Errors raised when opening a scope out of order.
#[derive(Error, Debug, Clone)]
pub enum ScopeError {
    #[error("scope chain has no scopes")]
    EmptyChain,
    #[error("scope `{scope}` is listed in the chain but has no registry")]
    MissingRegistry { scope: String },
    #[error("no scope follows `{current}` in the chain")]
    NoNextScope { current: String },
    #[error("scope `{requested}` is not the next scope after `{current}`")]
    OutOfOrder { requested: String, current: String },
}

/// One or more teardown actions failed while a scope was closing.
///
/// Teardown never short-circuits; every failure is collected here together
/// with the name of the dependency that registered the finalizer.
#[derive(Error, Debug)]
pub struct FinalizeError {
    pub failures: Vec<(String, DynError)>,
}

impl std::fmt::Display for FinalizeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut display = Vec::new();
        display.push(format!(
            "{} finalizer(s) failed during scope teardown:",
            self.failures.len()
        ));
        for (owner, error) in &self.failures {
            display.push(format!("- `{owner}`: {error:?}"));
        }
        f.write_str(&display.join("\n"))
    }
}
