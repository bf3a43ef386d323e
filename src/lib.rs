//! Scoped dependency resolution with eager and suspending factories.
//!
//! A [`Registry`] declares named, typed dependencies, each backed by a
//! factory and a list of named sub-dependencies. A [`Resolver`] opened over
//! the registry walks that graph on demand, memoizes every constructed value
//! for its own lifetime, and releases resource-scoped values in strict
//! reverse acquisition order when the scope ends. [`AsyncResolver`] is the
//! suspending twin: it runs the same graph walk, awaits suspending factories
//! and folds eager ones in as already-settled values, so mixed graphs
//! compose transparently.
//!
//! Registries can be chained into ordered scopes ([`ScopedRegistries`]):
//! a child scope reads through to its parent for names it doesn't provide,
//! while values constructed in the child never leak upward.
//!
//! ```
//! use scopewire::{value, Dependency, Factory, RegistryBuilder, TypeTag, with_resolver};
//!
//! struct Greeting(&'static str);
//!
//! let registry = RegistryBuilder::new()
//!     .provide(Dependency::new(
//!         "greeting",
//!         TypeTag::of::<Greeting>(),
//!         Factory::plain(|_| Ok(value(Greeting("hello")))),
//!     ))
//!     .build();
//!
//! let greeting = with_resolver(&registry, |resolver| {
//!     Ok(resolver.resolve_as::<Greeting>("greeting")?)
//! })
//! .unwrap();
//! assert_eq!(greeting.0, "hello");
//! ```
//!
//! Lookups are evaluated lazily at resolution time; there is no static
//! wiring validation and no cycle detection; a cyclic graph recurses until
//! the stack gives out.

pub mod dependency;
pub mod errors;
pub mod finalizer;
pub mod matcher;
pub mod registry;
pub mod resolver;
pub mod types;

pub use dependency::{Args, AsyncResource, Dependency, Factory, Require, Resource};
pub use errors::{DowncastError, FinalizeError, ResolveError, ScopeError};
pub use finalizer::{AsyncFinalizer, AsyncFinalizerStack, Finalizer, FinalizerStack};
pub use matcher::{
    acceptable_in_place_of, default_matcher, exact_match, exact_matcher, TypesMatcher,
};
pub use registry::{Registry, RegistryBuilder, ScopeId, ScopedRegistries};
pub use resolver::{
    with_async_resolver, with_resolver, with_scoped_async_resolver, with_scoped_resolver,
    AsyncFallback, AsyncResolver, AsyncScopedResolver, Fallback, Resolver, ScopedResolver,
};
pub use types::{value, DynError, Instance, TypeTag, Value};
