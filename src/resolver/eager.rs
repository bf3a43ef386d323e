use std::{cell::RefCell, collections::HashMap, sync::Arc};

use crate::dependency::{Args, Dependency, Factory};
use crate::errors::{FinalizeError, ResolveError, ScopeError};
use crate::finalizer::FinalizerStack;
use crate::registry::{Registry, ScopeId, ScopedRegistries};
use crate::resolver::{lookup_dependency, Fallback};
use crate::types::{DynError, Instance, TypeTag, Value};

/// Per-scope engine walking the dependency graph with eager factories.
///
/// Each constructed value is memoized for the resolver's lifetime, so a
/// name's factory runs at most once per scope. Resources acquired by
/// resource-scoped factories are released in reverse acquisition order when
/// the resolver is closed or dropped.
///
/// Not safe for concurrent use; a resolver belongs to one thread.
pub struct Resolver<'r> {
    registry: &'r Registry,
    resolved: RefCell<HashMap<String, Instance>>,
    finalizers: RefCell<FinalizerStack>,
    fallback: Option<&'r dyn Fallback>,
}

impl<'r> Resolver<'r> {
    pub fn new(registry: &'r Registry) -> Self {
        Resolver {
            registry,
            resolved: RefCell::new(HashMap::new()),
            finalizers: RefCell::new(FinalizerStack::default()),
            fallback: None,
        }
    }

    /// A resolver that retries unknown names against `fallback`, which is
    /// how scope chains delegate upward.
    pub fn with_fallback(registry: &'r Registry, fallback: &'r dyn Fallback) -> Self {
        Resolver {
            registry,
            resolved: RefCell::new(HashMap::new()),
            finalizers: RefCell::new(FinalizerStack::default()),
            fallback: Some(fallback),
        }
    }

    /// Resolves `name`, requiring a value compatible with `required`.
    ///
    /// Names absent from this scope's registry are retried against the
    /// fallback. A fallback `NotFound` is reported as this scope's own;
    /// any other fallback error propagates unchanged.
    pub fn resolve(&self, name: &str, required: &TypeTag) -> Result<Instance, ResolveError> {
        let dependency = match lookup_dependency(self.registry, name, required) {
            Ok(dependency) => dependency,
            Err(err @ ResolveError::NotFound { .. }) => {
                let Some(fallback) = self.fallback else {
                    return Err(err);
                };
                return match fallback.resolve_fallback(name, required) {
                    Ok(instance) => Ok(instance),
                    // Report the error from the scope where resolution
                    // began to fail, not the end of the chain.
                    Err(ResolveError::NotFound { .. }) => Err(err),
                    Err(other) => Err(other),
                };
            }
            Err(err) => return Err(err),
        };

        if let Some(hit) = self.resolved.borrow().get(dependency.name()) {
            tracing::debug!("serving memoized `{}`", dependency.name());
            return Ok(hit.clone());
        }

        let mut args = Args::new();
        for require in dependency.requires() {
            let instance = self.resolve(&require.dep, &require.required)?;
            args.insert(&require.param, instance);
        }

        let value = self.produce(dependency, args)?;
        let instance = Instance::from_parts(dependency.provides().clone(), value);
        self.resolved
            .borrow_mut()
            .insert(dependency.name().to_string(), instance.clone());
        Ok(instance)
    }

    /// Resolves `name` and views the result as a concrete type.
    pub fn resolve_as<T: Send + Sync + 'static>(&self, name: &str) -> Result<Arc<T>, ResolveError> {
        let instance = self.resolve(name, &TypeTag::of::<T>())?;
        instance.downcast::<T>().map_err(ResolveError::Downcast)
    }

    fn produce(&self, dependency: &Dependency, args: Args) -> Result<Value, ResolveError> {
        tracing::debug!(
            "producing `{}` via {} factory",
            dependency.name(),
            dependency.factory().mode()
        );
        match dependency.factory() {
            Factory::Plain(factory) => factory(args).map_err(|error| ResolveError::FactoryFailed {
                name: dependency.name().to_string(),
                error,
            }),
            Factory::ResourceScoped(factory) => {
                let resource = factory(args).map_err(|error| ResolveError::FactoryFailed {
                    name: dependency.name().to_string(),
                    error,
                })?;
                let (value, finalizer) = resource.into_parts();
                self.finalizers
                    .borrow_mut()
                    .register(dependency.name(), finalizer);
                Ok(value)
            }
            Factory::Suspending(_) | Factory::SuspendingResourceScoped(_) => {
                Err(ResolveError::ContractViolation {
                    name: dependency.name().to_string(),
                    detail: format!(
                        "`{}` factory cannot be invoked from a synchronous resolver",
                        dependency.factory().mode()
                    ),
                })
            }
        }
    }

    /// Ends the scope, releasing acquired resources in reverse order and
    /// surfacing aggregated teardown failures.
    pub fn close(self) -> Result<(), FinalizeError> {
        self.finalizers.borrow_mut().run_all()
    }
}

impl Drop for Resolver<'_> {
    fn drop(&mut self) {
        let mut finalizers = self.finalizers.borrow_mut();
        if finalizers.is_empty() {
            return;
        }
        // Last-resort release for scopes abandoned without `close`; failures
        // can only be logged from here.
        if let Err(error) = finalizers.run_all() {
            tracing::warn!("scope teardown during drop reported failures: {error}");
        }
    }
}

/// Runs `body` inside a fresh resolver scope over `registry`; the scope is
/// closed on every exit path.
pub fn with_resolver<R>(
    registry: &Registry,
    body: impl FnOnce(&Resolver<'_>) -> Result<R, DynError>,
) -> Result<R, DynError> {
    let resolver = Resolver::new(registry);
    let outcome = body(&resolver);
    match resolver.close() {
        Ok(()) => outcome,
        Err(finalize_error) => match outcome {
            // The body's error wins; teardown failures were already logged.
            Err(error) => Err(error),
            Ok(_) => Err(finalize_error.into()),
        },
    }
}

/// One level of a scope chain, owning its resolver and delegating unknown
/// names to its parent.
pub struct ScopedResolver<'r, S: ScopeId> {
    registries: &'r ScopedRegistries<S>,
    scope_idx: usize,
    inner: Resolver<'r>,
}

impl<'r, S: ScopeId> ScopedResolver<'r, S> {
    /// Opens the first scope of the chain.
    pub fn root(registries: &'r ScopedRegistries<S>) -> Self {
        let scope = &registries.scopes_order()[0];
        ScopedResolver {
            registries,
            scope_idx: 0,
            inner: Resolver::new(registries.registry_of(scope)),
        }
    }

    pub fn scope(&self) -> &S {
        &self.registries.scopes_order()[self.scope_idx]
    }

    /// Opens the immediate child scope; values resolved there never leak
    /// into this scope, while unknown names read through to it.
    pub fn next_scope(&self) -> Result<ScopedResolver<'_, S>, ScopeError> {
        let next_idx = self.scope_idx + 1;
        let Some(scope) = self.registries.scopes_order().get(next_idx) else {
            return Err(ScopeError::NoNextScope {
                current: format!("{:?}", self.scope()),
            });
        };
        tracing::debug!("entering scope {scope:?}");
        Ok(ScopedResolver {
            registries: self.registries,
            scope_idx: next_idx,
            inner: Resolver::with_fallback(self.registries.registry_of(scope), self),
        })
    }

    /// Opens `scope`, which must be exactly the next scope in the chain.
    /// Skipping levels or moving sideways is a usage error.
    pub fn enter_scope(&self, scope: &S) -> Result<ScopedResolver<'_, S>, ScopeError> {
        match self.registries.scopes_order().get(self.scope_idx + 1) {
            Some(next) if next == scope => self.next_scope(),
            _ => Err(ScopeError::OutOfOrder {
                requested: format!("{scope:?}"),
                current: format!("{:?}", self.scope()),
            }),
        }
    }

    pub fn resolve(&self, name: &str, required: &TypeTag) -> Result<Instance, ResolveError> {
        self.inner.resolve(name, required)
    }

    pub fn resolve_as<T: Send + Sync + 'static>(&self, name: &str) -> Result<Arc<T>, ResolveError> {
        self.inner.resolve_as::<T>(name)
    }

    pub fn close(self) -> Result<(), FinalizeError> {
        self.inner.close()
    }
}

impl<S: ScopeId> Fallback for ScopedResolver<'_, S> {
    fn resolve_fallback(&self, name: &str, required: &TypeTag) -> Result<Instance, ResolveError> {
        self.inner.resolve(name, required)
    }
}

/// Runs `body` inside the root scope of `registries`; the scope is closed on
/// every exit path.
pub fn with_scoped_resolver<R, S: ScopeId>(
    registries: &ScopedRegistries<S>,
    body: impl FnOnce(&ScopedResolver<'_, S>) -> Result<R, DynError>,
) -> Result<R, DynError> {
    let resolver = ScopedResolver::root(registries);
    let outcome = body(&resolver);
    match resolver.close() {
        Ok(()) => outcome,
        Err(finalize_error) => match outcome {
            Err(error) => Err(error),
            Ok(_) => Err(finalize_error.into()),
        },
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::dependency::{Factory, Resource};
    use crate::matcher::exact_matcher;
    use crate::registry::RegistryBuilder;
    use crate::types::value;

    #[derive(Debug)]
    struct A;
    #[derive(Debug)]
    struct B;
    struct C {
        a: Arc<A>,
        b: Arc<B>,
    }

    fn counting_factory<T: Send + Sync + 'static>(
        counter: &Arc<AtomicUsize>,
        produce: impl Fn() -> T + Send + Sync + 'static,
    ) -> Factory {
        let counter = counter.clone();
        Factory::plain(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(value(produce()))
        })
    }

    #[test]
    fn resolves_a_simple_value() {
        let registry = RegistryBuilder::new()
            .provide(Dependency::new(
                "a",
                TypeTag::of::<A>(),
                Factory::plain(|_| Ok(value(A))),
            ))
            .build();

        let resolver = Resolver::new(&registry);
        let a = resolver.resolve_as::<A>("a").unwrap();
        drop(a);
        resolver.close().unwrap();
    }

    #[test]
    fn memoizes_created_values() {
        let calls = Arc::new(AtomicUsize::new(0));
        let registry = RegistryBuilder::new()
            .provide(Dependency::new(
                "a",
                TypeTag::of::<A>(),
                counting_factory(&calls, || A),
            ))
            .build();

        let resolver = Resolver::new(&registry);
        let first = resolver.resolve("a", &TypeTag::of::<A>()).unwrap();
        let second = resolver.resolve("a", &TypeTag::of::<A>()).unwrap();
        assert!(first.ptr_eq(&second));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn delivers_sub_dependencies_by_parameter_name() {
        let registry = RegistryBuilder::new()
            .provide(Dependency::new(
                "a",
                TypeTag::of::<A>(),
                Factory::plain(|_| Ok(value(A))),
            ))
            .provide(Dependency::new(
                "b",
                TypeTag::of::<B>(),
                Factory::plain(|_| Ok(value(B))),
            ))
            .provide(
                Dependency::new(
                    "c",
                    TypeTag::of::<C>(),
                    Factory::plain(|args| {
                        Ok(value(C {
                            a: args.get::<A>("a_arg")?,
                            b: args.get::<B>("b_arg")?,
                        }))
                    }),
                )
                .require("a_arg", "a", TypeTag::of::<A>())
                .require("b_arg", "b", TypeTag::of::<B>()),
            )
            .build();

        with_resolver(&registry, |resolver| {
            let c = resolver.resolve_as::<C>("c")?;
            let a = resolver.resolve_as::<A>("a")?;
            let b = resolver.resolve_as::<B>("b")?;
            assert!(Arc::ptr_eq(&c.a, &a));
            assert!(Arc::ptr_eq(&c.b, &b));
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn unknown_name_is_not_found() {
        let registry = RegistryBuilder::new().build();
        let resolver = Resolver::new(&registry);
        let err = resolver.resolve("ghost", &TypeTag::of::<A>()).unwrap_err();
        assert!(matches!(err, ResolveError::NotFound { name, .. } if name == "ghost"));
    }

    #[test]
    fn incompatible_declared_type_is_a_mismatch() {
        let registry = RegistryBuilder::new()
            .provide(Dependency::new(
                "a",
                TypeTag::of::<A>(),
                Factory::plain(|_| Ok(value(A))),
            ))
            .build();

        let resolver = Resolver::new(&registry);
        let err = resolver.resolve("a", &TypeTag::of::<B>()).unwrap_err();
        match err {
            ResolveError::TypeMismatch {
                name,
                required,
                provided,
            } => {
                assert_eq!(name, "a");
                assert_eq!(required, TypeTag::of::<B>());
                assert_eq!(provided, TypeTag::of::<A>());
            }
            other => panic!("expected type mismatch, got {other}"),
        }
    }

    #[test]
    fn custom_matcher_is_consulted() {
        let capability = TypeTag::structural("CanA");
        let provided = TypeTag::of::<A>().satisfies(&capability);

        let lenient = RegistryBuilder::new()
            .provide(Dependency::new(
                "a",
                provided.clone(),
                Factory::plain(|_| Ok(value(A))),
            ))
            .build();
        assert!(Resolver::new(&lenient).resolve("a", &capability).is_ok());

        let strict = RegistryBuilder::new()
            .with_matcher(exact_matcher())
            .provide(Dependency::new(
                "a",
                provided,
                Factory::plain(|_| Ok(value(A))),
            ))
            .build();
        let err = Resolver::new(&strict).resolve("a", &capability).unwrap_err();
        assert!(matches!(err, ResolveError::TypeMismatch { .. }));
    }

    #[test]
    fn resources_release_in_reverse_acquisition_order() {
        let log = Arc::new(Mutex::new(Vec::new()));

        let registry = {
            let mut builder = RegistryBuilder::new();
            for (name, acquire, release) in [
                ("x", "acquire-x", "release-x"),
                ("y", "acquire-y", "release-y"),
            ] {
                let log = log.clone();
                builder = builder.provide(Dependency::new(
                    name,
                    TypeTag::named(name),
                    Factory::resource_scoped(move |_| {
                        log.lock().unwrap().push(acquire);
                        let log = log.clone();
                        Ok(Resource::new(value(()), move || {
                            log.lock().unwrap().push(release);
                            Ok(())
                        }))
                    }),
                ));
            }
            builder.build()
        };

        let resolver = Resolver::new(&registry);
        resolver.resolve("x", &TypeTag::named("x")).unwrap();
        resolver.resolve("y", &TypeTag::named("y")).unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["acquire-x", "acquire-y"]);

        resolver.close().unwrap();
        assert_eq!(
            *log.lock().unwrap(),
            vec!["acquire-x", "acquire-y", "release-y", "release-x"]
        );
    }

    #[test]
    fn dropping_an_unclosed_scope_still_releases() {
        let released = Arc::new(AtomicUsize::new(0));
        let registry = {
            let released = released.clone();
            RegistryBuilder::new()
                .provide(Dependency::new(
                    "res",
                    TypeTag::named("res"),
                    Factory::resource_scoped(move |_| {
                        let released = released.clone();
                        Ok(Resource::new(value(()), move || {
                            released.fetch_add(1, Ordering::SeqCst);
                            Ok(())
                        }))
                    }),
                ))
                .build()
        };

        {
            let resolver = Resolver::new(&registry);
            resolver.resolve("res", &TypeTag::named("res")).unwrap();
        }
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn suspending_factory_is_rejected_by_sync_resolver() {
        let registry = RegistryBuilder::new()
            .provide(Dependency::new(
                "a",
                TypeTag::of::<A>(),
                Factory::suspending(|_| async { Ok(value(A)) }),
            ))
            .build();

        let resolver = Resolver::new(&registry);
        let err = resolver.resolve("a", &TypeTag::of::<A>()).unwrap_err();
        assert!(matches!(err, ResolveError::ContractViolation { name, .. } if name == "a"));
    }

    #[test]
    fn fallback_failure_surfaces_the_original_error() {
        struct EmptyParent;
        impl Fallback for EmptyParent {
            fn resolve_fallback(
                &self,
                name: &str,
                required: &TypeTag,
            ) -> Result<Instance, ResolveError> {
                Err(ResolveError::NotFound {
                    name: format!("parent-view-of-{name}"),
                    required: required.clone(),
                })
            }
        }

        let registry = RegistryBuilder::new().build();
        let parent = EmptyParent;
        let resolver = Resolver::with_fallback(&registry, &parent);
        let err = resolver.resolve("ghost", &TypeTag::of::<A>()).unwrap_err();
        // The child's own error, not the parent's reformulation.
        assert!(matches!(err, ResolveError::NotFound { name, .. } if name == "ghost"));
    }

    #[test]
    fn fallback_errors_other_than_not_found_propagate() {
        struct MismatchingParent;
        impl Fallback for MismatchingParent {
            fn resolve_fallback(
                &self,
                name: &str,
                required: &TypeTag,
            ) -> Result<Instance, ResolveError> {
                Err(ResolveError::TypeMismatch {
                    name: name.to_string(),
                    required: required.clone(),
                    provided: TypeTag::of::<B>(),
                })
            }
        }

        let registry = RegistryBuilder::new().build();
        let parent = MismatchingParent;
        let resolver = Resolver::with_fallback(&registry, &parent);
        let err = resolver.resolve("ghost", &TypeTag::of::<A>()).unwrap_err();
        assert!(matches!(err, ResolveError::TypeMismatch { .. }));
    }
}
