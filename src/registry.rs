use std::{collections::HashMap, fmt, hash::Hash};

use crate::dependency::Dependency;
use crate::errors::ScopeError;
use crate::matcher::{default_matcher, TypesMatcher};

/// Immutable mapping from dependency name to its descriptor, plus the
/// compatibility predicate requests are checked against.
pub struct Registry {
    provides: HashMap<String, Dependency>,
    matcher: TypesMatcher,
}

impl Registry {
    pub fn get(&self, name: &str) -> Option<&Dependency> {
        self.provides.get(name)
    }

    pub fn matcher(&self) -> &TypesMatcher {
        &self.matcher
    }

    pub fn len(&self) -> usize {
        self.provides.len()
    }

    pub fn is_empty(&self) -> bool {
        self.provides.is_empty()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.provides.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("Registry").field("provides", &names).finish()
    }
}

/// Mutable mapping builder producing an immutable [`Registry`].
pub struct RegistryBuilder {
    provides: HashMap<String, Dependency>,
    matcher: TypesMatcher,
}

impl Default for RegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RegistryBuilder {
    pub fn new() -> Self {
        RegistryBuilder {
            provides: HashMap::new(),
            matcher: default_matcher(),
        }
    }

    /// Replaces the compatibility predicate for the whole registry.
    pub fn with_matcher(mut self, matcher: TypesMatcher) -> Self {
        self.matcher = matcher;
        self
    }

    /// Registers a dependency; a later registration under the same name wins.
    pub fn provide(mut self, dependency: Dependency) -> Self {
        if let Some(previous) = self.provides.insert(dependency.name().to_string(), dependency) {
            tracing::debug!("dependency `{}` re-registered", previous.name());
        }
        self
    }

    pub fn build(self) -> Registry {
        Registry {
            provides: self.provides,
            matcher: self.matcher,
        }
    }
}

/// Identifier for one scope level of a chain.
pub trait ScopeId: Eq + Hash + Clone + fmt::Debug {}
impl<T: Eq + Hash + Clone + fmt::Debug> ScopeId for T {}

/// Ordered chain of per-scope registries.
///
/// `scopes_order` strictly defines traversal: a resolver at level `k` only
/// ever delegates to level `k - 1`.
pub struct ScopedRegistries<S: ScopeId> {
    scopes_order: Vec<S>,
    scopes: HashMap<S, Registry>,
}

impl<S: ScopeId> ScopedRegistries<S> {
    pub fn new(scopes_order: Vec<S>, scopes: HashMap<S, Registry>) -> Result<Self, ScopeError> {
        if scopes_order.is_empty() {
            return Err(ScopeError::EmptyChain);
        }
        for scope in &scopes_order {
            if !scopes.contains_key(scope) {
                return Err(ScopeError::MissingRegistry {
                    scope: format!("{scope:?}"),
                });
            }
        }
        Ok(ScopedRegistries {
            scopes_order,
            scopes,
        })
    }

    pub fn scopes_order(&self) -> &[S] {
        &self.scopes_order
    }

    pub(crate) fn registry_of(&self, scope: &S) -> &Registry {
        self.scopes
            .get(scope)
            .expect("every ordered scope has a registry")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dependency::Factory;
    use crate::types::{value, TypeTag};

    fn unit_dependency(name: &str) -> Dependency {
        Dependency::new(name, TypeTag::of::<()>(), Factory::plain(|_| Ok(value(()))))
    }

    #[test]
    fn later_registration_wins() {
        let registry = RegistryBuilder::new()
            .provide(unit_dependency("a"))
            .provide(unit_dependency("a"))
            .build();
        assert_eq!(registry.len(), 1);
        assert!(registry.get("a").is_some());
        assert!(registry.get("b").is_none());
    }

    #[test]
    fn scoped_registries_reject_empty_order() {
        let result: Result<ScopedRegistries<&str>, _> =
            ScopedRegistries::new(Vec::new(), HashMap::new());
        assert!(matches!(result, Err(ScopeError::EmptyChain)));
    }

    #[test]
    fn scoped_registries_require_a_registry_per_scope() {
        let mut scopes = HashMap::new();
        scopes.insert("root", RegistryBuilder::new().build());
        let result = ScopedRegistries::new(vec!["root", "app"], scopes);
        assert!(matches!(
            result,
            Err(ScopeError::MissingRegistry { scope }) if scope.contains("app")
        ));
    }
}
