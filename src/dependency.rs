use std::{collections::HashMap, fmt, future::Future, sync::Arc};

use futures::{future::LocalBoxFuture, FutureExt};

use crate::finalizer::{AsyncFinalizer, Finalizer};
use crate::types::{DynError, Instance, TypeTag, Value};

/// Resolved sub-dependencies handed to a factory, keyed by parameter name.
#[derive(Default)]
pub struct Args {
    values: HashMap<String, Instance>,
}

impl Args {
    pub(crate) fn new() -> Self {
        Args::default()
    }

    pub(crate) fn insert(&mut self, param: &str, instance: Instance) {
        self.values.insert(param.to_string(), instance);
    }

    pub fn instance(&self, param: &str) -> Option<&Instance> {
        self.values.get(param)
    }

    /// Typed access to one resolved argument.
    pub fn get<T: Send + Sync + 'static>(&self, param: &str) -> Result<Arc<T>, DynError> {
        let instance = self
            .values
            .get(param)
            .ok_or_else(|| -> DynError { format!("missing factory argument `{param}`").into() })?;
        instance.downcast::<T>().map_err(Into::into)
    }
}

/// A value together with the teardown that releases it at scope exit.
pub struct Resource {
    value: Value,
    finalizer: Finalizer,
}

impl Resource {
    pub fn new<F>(value: Value, finalizer: F) -> Self
    where
        F: FnOnce() -> Result<(), DynError> + Send + 'static,
    {
        Resource {
            value,
            finalizer: Box::new(finalizer),
        }
    }

    pub(crate) fn into_parts(self) -> (Value, Finalizer) {
        (self.value, self.finalizer)
    }
}

/// A value whose teardown itself may suspend.
pub struct AsyncResource {
    value: Value,
    finalizer: AsyncFinalizer,
}

impl AsyncResource {
    pub fn new<F, Fut>(value: Value, finalizer: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), DynError>> + 'static,
    {
        AsyncResource {
            value,
            finalizer: Box::new(move || finalizer().boxed_local()),
        }
    }

    pub(crate) fn into_parts(self) -> (Value, AsyncFinalizer) {
        (self.value, self.finalizer)
    }
}

type PlainFn = dyn Fn(Args) -> Result<Value, DynError> + Send + Sync;
type ResourceFn = dyn Fn(Args) -> Result<Resource, DynError> + Send + Sync;
type SuspendingFn = dyn Fn(Args) -> LocalBoxFuture<'static, Result<Value, DynError>> + Send + Sync;
type SuspendingResourceFn =
    dyn Fn(Args) -> LocalBoxFuture<'static, Result<AsyncResource, DynError>> + Send + Sync;

/// How a dependency's factory produces its value.
///
/// Exactly one mode is active per dependency; the resolver invokes the
/// factory strictly according to it.
#[derive(Clone)]
pub enum Factory {
    /// Returns the value directly.
    Plain(Arc<PlainFn>),
    /// Returns a value plus a teardown to run at scope exit.
    ResourceScoped(Arc<ResourceFn>),
    /// Production itself may suspend; only a suspending resolver may call it.
    Suspending(Arc<SuspendingFn>),
    /// Suspends and yields a resource whose teardown also suspends.
    SuspendingResourceScoped(Arc<SuspendingResourceFn>),
}

impl Factory {
    pub fn plain<F>(f: F) -> Self
    where
        F: Fn(Args) -> Result<Value, DynError> + Send + Sync + 'static,
    {
        Factory::Plain(Arc::new(f))
    }

    pub fn resource_scoped<F>(f: F) -> Self
    where
        F: Fn(Args) -> Result<Resource, DynError> + Send + Sync + 'static,
    {
        Factory::ResourceScoped(Arc::new(f))
    }

    pub fn suspending<F, Fut>(f: F) -> Self
    where
        F: Fn(Args) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, DynError>> + 'static,
    {
        Factory::Suspending(Arc::new(move |args| f(args).boxed_local()))
    }

    pub fn suspending_resource_scoped<F, Fut>(f: F) -> Self
    where
        F: Fn(Args) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<AsyncResource, DynError>> + 'static,
    {
        Factory::SuspendingResourceScoped(Arc::new(move |args| f(args).boxed_local()))
    }

    /// Human-readable production mode, for logs and contract errors.
    pub fn mode(&self) -> &'static str {
        match self {
            Factory::Plain(_) => "plain",
            Factory::ResourceScoped(_) => "resource-scoped",
            Factory::Suspending(_) => "suspending",
            Factory::SuspendingResourceScoped(_) => "suspending-resource-scoped",
        }
    }

    pub fn is_suspending(&self) -> bool {
        matches!(
            self,
            Factory::Suspending(_) | Factory::SuspendingResourceScoped(_)
        )
    }
}

impl fmt::Debug for Factory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mode())
    }
}

/// One named sub-dependency reference: which registered name feeds which
/// factory parameter, and the type the factory requires for it.
#[derive(Clone, Debug)]
pub struct Require {
    pub param: String,
    pub dep: String,
    pub required: TypeTag,
}

/// Static description of one producible, named, typed value.
///
/// Immutable once registered; the resolver only reads it.
#[derive(Clone)]
pub struct Dependency {
    name: String,
    provides: TypeTag,
    requires: Vec<Require>,
    factory: Factory,
}

impl Dependency {
    pub fn new(name: impl Into<String>, provides: TypeTag, factory: Factory) -> Self {
        Dependency {
            name: name.into(),
            provides,
            requires: Vec::new(),
            factory,
        }
    }

    /// Adds a sub-dependency reference; declaration order is resolution order.
    pub fn require(
        mut self,
        param: impl Into<String>,
        dep: impl Into<String>,
        required: TypeTag,
    ) -> Self {
        self.requires.push(Require {
            param: param.into(),
            dep: dep.into(),
            required,
        });
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn provides(&self) -> &TypeTag {
        &self.provides
    }

    pub fn requires(&self) -> &[Require] {
        &self.requires
    }

    pub fn factory(&self) -> &Factory {
        &self.factory
    }
}

impl fmt::Debug for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dependency")
            .field("name", &self.name)
            .field("provides", &self.provides.origin())
            .field("mode", &self.factory.mode())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::value;

    #[test]
    fn args_typed_access() {
        let mut args = Args::new();
        args.insert("greeting", Instance::new("hello".to_string()));

        let greeting = args.get::<String>("greeting").unwrap();
        assert_eq!(*greeting, "hello");

        assert!(args.get::<u32>("greeting").is_err());
        assert!(args.get::<String>("missing").is_err());
    }

    #[test]
    fn factory_modes_are_labelled() {
        let plain = Factory::plain(|_| Ok(value(1u8)));
        assert_eq!(plain.mode(), "plain");
        assert!(!plain.is_suspending());

        let suspending = Factory::suspending(|_| async { Ok(value(1u8)) });
        assert_eq!(suspending.mode(), "suspending");
        assert!(suspending.is_suspending());
    }
}
