use std::{cell::RefCell, collections::HashMap, sync::Arc};

use futures::future::LocalBoxFuture;
use futures::FutureExt;

use crate::dependency::{Args, Dependency, Factory};
use crate::errors::{FinalizeError, ResolveError, ScopeError};
use crate::finalizer::AsyncFinalizerStack;
use crate::registry::{Registry, ScopeId, ScopedRegistries};
use crate::resolver::{lookup_dependency, AsyncFallback};
use crate::types::{DynError, Instance, TypeTag, Value};

/// Per-scope engine walking the dependency graph with suspending factories.
///
/// Shares the eager resolver's lookup, memoization and graph-walk behavior.
/// Eager factories are invoked inline and their results handed back as
/// already-settled values, so mixed graphs compose without extra suspension
/// points; a memoized name resolves on first poll without re-invoking its
/// factory.
///
/// Single-threaded cooperative use only; suspension happens solely where a
/// suspending factory's production or acquisition is awaited.
pub struct AsyncResolver<'r> {
    registry: &'r Registry,
    resolved: RefCell<HashMap<String, Instance>>,
    finalizers: RefCell<AsyncFinalizerStack>,
    fallback: Option<&'r dyn AsyncFallback>,
}

impl<'r> AsyncResolver<'r> {
    pub fn new(registry: &'r Registry) -> Self {
        AsyncResolver {
            registry,
            resolved: RefCell::new(HashMap::new()),
            finalizers: RefCell::new(AsyncFinalizerStack::default()),
            fallback: None,
        }
    }

    pub fn with_fallback(registry: &'r Registry, fallback: &'r dyn AsyncFallback) -> Self {
        AsyncResolver {
            registry,
            resolved: RefCell::new(HashMap::new()),
            finalizers: RefCell::new(AsyncFinalizerStack::default()),
            fallback: Some(fallback),
        }
    }

    /// Resolves `name`, requiring a value compatible with `required`.
    ///
    /// The returned future settles immediately when the value is already
    /// memoized; awaiting the same resolution twice never re-invokes the
    /// factory and never suspends on the second await.
    ///
    /// Names absent from this scope's registry are retried against the
    /// fallback. A fallback `NotFound` is reported as this scope's own;
    /// any other fallback error propagates unchanged.
    pub fn resolve<'a>(
        &'a self,
        name: &'a str,
        required: &'a TypeTag,
    ) -> LocalBoxFuture<'a, Result<Instance, ResolveError>> {
        async move {
            let dependency = match lookup_dependency(self.registry, name, required) {
                Ok(dependency) => dependency,
                Err(err @ ResolveError::NotFound { .. }) => {
                    let Some(fallback) = self.fallback else {
                        return Err(err);
                    };
                    return match fallback.resolve_fallback(name, required).await {
                        Ok(instance) => Ok(instance),
                        // Report the error from the scope where resolution
                        // began to fail, not the end of the chain.
                        Err(ResolveError::NotFound { .. }) => Err(err),
                        Err(other) => Err(other),
                    };
                }
                Err(err) => return Err(err),
            };

            let memoized = self.resolved.borrow().get(dependency.name()).cloned();
            if let Some(hit) = memoized {
                tracing::debug!("serving memoized `{}`", dependency.name());
                return Ok(hit);
            }

            let mut args = Args::new();
            for require in dependency.requires() {
                let instance = self.resolve(&require.dep, &require.required).await?;
                args.insert(&require.param, instance);
            }

            let value = self.produce(dependency, args).await?;
            let instance = Instance::from_parts(dependency.provides().clone(), value);
            self.resolved
                .borrow_mut()
                .insert(dependency.name().to_string(), instance.clone());
            Ok(instance)
        }
        .boxed_local()
    }

    /// Resolves `name` and views the result as a concrete type.
    pub async fn resolve_as<T: Send + Sync + 'static>(
        &self,
        name: &str,
    ) -> Result<Arc<T>, ResolveError> {
        let instance = self.resolve(name, &TypeTag::of::<T>()).await?;
        instance.downcast::<T>().map_err(ResolveError::Downcast)
    }

    async fn produce(&self, dependency: &Dependency, args: Args) -> Result<Value, ResolveError> {
        tracing::debug!(
            "producing `{}` via {} factory",
            dependency.name(),
            dependency.factory().mode()
        );
        let failed = |error| ResolveError::FactoryFailed {
            name: dependency.name().to_string(),
            error,
        };
        match dependency.factory() {
            Factory::Plain(factory) => factory(args).map_err(failed),
            Factory::ResourceScoped(factory) => {
                let resource = factory(args).map_err(failed)?;
                let (value, finalizer) = resource.into_parts();
                self.finalizers
                    .borrow_mut()
                    .register(dependency.name(), finalizer);
                Ok(value)
            }
            Factory::Suspending(factory) => factory(args).await.map_err(failed),
            Factory::SuspendingResourceScoped(factory) => {
                let resource = factory(args).await.map_err(failed)?;
                let (value, finalizer) = resource.into_parts();
                self.finalizers
                    .borrow_mut()
                    .register_suspending(dependency.name(), finalizer);
                Ok(value)
            }
        }
    }

    /// Ends the scope, releasing acquired resources in reverse order and
    /// surfacing aggregated teardown failures.
    pub async fn close(self) -> Result<(), FinalizeError> {
        let mut finalizers = self.finalizers.take();
        finalizers.run_all().await
    }
}

impl Drop for AsyncResolver<'_> {
    fn drop(&mut self) {
        // Suspending teardowns cannot run inside `drop`; an unclosed scope
        // with acquired resources is a leak worth shouting about.
        let finalizers = self.finalizers.borrow();
        if !finalizers.is_empty() {
            tracing::error!(
                "async resolver dropped with {} unreleased finalizer(s); call `close()` before dropping",
                finalizers.len()
            );
        }
    }
}

/// Runs `body` inside a fresh suspending resolver scope over `registry`; the
/// scope is closed on normal and error returns alike.
pub async fn with_async_resolver<'r, R, F>(registry: &'r Registry, body: F) -> Result<R, DynError>
where
    F: for<'a> FnOnce(&'a AsyncResolver<'r>) -> LocalBoxFuture<'a, Result<R, DynError>>,
{
    let resolver = AsyncResolver::new(registry);
    let outcome = body(&resolver).await;
    match resolver.close().await {
        Ok(()) => outcome,
        Err(finalize_error) => match outcome {
            Err(error) => Err(error),
            Ok(_) => Err(finalize_error.into()),
        },
    }
}

/// One level of a suspending scope chain.
pub struct AsyncScopedResolver<'r, S: ScopeId> {
    registries: &'r ScopedRegistries<S>,
    scope_idx: usize,
    inner: AsyncResolver<'r>,
}

impl<'r, S: ScopeId> AsyncScopedResolver<'r, S> {
    /// Opens the first scope of the chain.
    pub fn root(registries: &'r ScopedRegistries<S>) -> Self {
        let scope = &registries.scopes_order()[0];
        AsyncScopedResolver {
            registries,
            scope_idx: 0,
            inner: AsyncResolver::new(registries.registry_of(scope)),
        }
    }

    pub fn scope(&self) -> &S {
        &self.registries.scopes_order()[self.scope_idx]
    }

    /// Opens the immediate child scope; unknown names read through to this
    /// scope and memoize here, never in the child.
    pub fn next_scope(&self) -> Result<AsyncScopedResolver<'_, S>, ScopeError> {
        let next_idx = self.scope_idx + 1;
        let Some(scope) = self.registries.scopes_order().get(next_idx) else {
            return Err(ScopeError::NoNextScope {
                current: format!("{:?}", self.scope()),
            });
        };
        tracing::debug!("entering scope {scope:?}");
        Ok(AsyncScopedResolver {
            registries: self.registries,
            scope_idx: next_idx,
            inner: AsyncResolver::with_fallback(self.registries.registry_of(scope), self),
        })
    }

    /// Opens `scope`, which must be exactly the next scope in the chain.
    pub fn enter_scope(&self, scope: &S) -> Result<AsyncScopedResolver<'_, S>, ScopeError> {
        match self.registries.scopes_order().get(self.scope_idx + 1) {
            Some(next) if next == scope => self.next_scope(),
            _ => Err(ScopeError::OutOfOrder {
                requested: format!("{scope:?}"),
                current: format!("{:?}", self.scope()),
            }),
        }
    }

    pub fn resolve<'a>(
        &'a self,
        name: &'a str,
        required: &'a TypeTag,
    ) -> LocalBoxFuture<'a, Result<Instance, ResolveError>> {
        self.inner.resolve(name, required)
    }

    pub async fn resolve_as<T: Send + Sync + 'static>(
        &self,
        name: &str,
    ) -> Result<Arc<T>, ResolveError> {
        self.inner.resolve_as::<T>(name).await
    }

    pub async fn close(self) -> Result<(), FinalizeError> {
        self.inner.close().await
    }
}

impl<S: ScopeId> AsyncFallback for AsyncScopedResolver<'_, S> {
    fn resolve_fallback<'a>(
        &'a self,
        name: &'a str,
        required: &'a TypeTag,
    ) -> LocalBoxFuture<'a, Result<Instance, ResolveError>> {
        self.inner.resolve(name, required)
    }
}

/// Runs `body` inside the root scope of `registries`; the scope is closed on
/// normal and error returns alike.
pub async fn with_scoped_async_resolver<'r, R, S, F>(
    registries: &'r ScopedRegistries<S>,
    body: F,
) -> Result<R, DynError>
where
    S: ScopeId,
    F: for<'a> FnOnce(&'a AsyncScopedResolver<'r, S>) -> LocalBoxFuture<'a, Result<R, DynError>>,
{
    let resolver = AsyncScopedResolver::root(registries);
    let outcome = body(&resolver).await;
    match resolver.close().await {
        Ok(()) => outcome,
        Err(finalize_error) => match outcome {
            Err(error) => Err(error),
            Ok(_) => Err(finalize_error.into()),
        },
    }
}
