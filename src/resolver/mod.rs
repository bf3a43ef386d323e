use futures::future::LocalBoxFuture;

use crate::dependency::Dependency;
use crate::errors::ResolveError;
use crate::registry::Registry;
use crate::types::{Instance, TypeTag};

mod eager;
mod suspend;

pub use eager::{with_resolver, with_scoped_resolver, Resolver, ScopedResolver};
pub use suspend::{
    with_async_resolver, with_scoped_async_resolver, AsyncResolver, AsyncScopedResolver,
};

/// Read-through capability a child resolver uses for names absent from its
/// own registry. Bound to an ancestor's resolve, never to its state.
pub trait Fallback {
    fn resolve_fallback(&self, name: &str, required: &TypeTag) -> Result<Instance, ResolveError>;
}

/// Suspending flavor of [`Fallback`].
pub trait AsyncFallback {
    fn resolve_fallback<'a>(
        &'a self,
        name: &'a str,
        required: &'a TypeTag,
    ) -> LocalBoxFuture<'a, Result<Instance, ResolveError>>;
}

/// Shared lookup step of both resolver variants: find the descriptor and
/// check that its declared type can stand in for the requested one.
pub(crate) fn lookup_dependency<'r>(
    registry: &'r Registry,
    name: &str,
    required: &TypeTag,
) -> Result<&'r Dependency, ResolveError> {
    let dependency = registry.get(name).ok_or_else(|| ResolveError::NotFound {
        name: name.to_string(),
        required: required.clone(),
    })?;

    if !(registry.matcher())(dependency.provides(), required) {
        return Err(ResolveError::TypeMismatch {
            name: name.to_string(),
            required: required.clone(),
            provided: dependency.provides().clone(),
        });
    }
    Ok(dependency)
}
