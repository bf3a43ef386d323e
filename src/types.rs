use std::{any::Any, fmt, sync::Arc};

use crate::errors::DowncastError;

/// Boxed error returned by factories and finalizers.
pub type DynError = Box<dyn std::error::Error + Send + Sync>;

/// A produced dependency value, shared within its owning scope.
pub type Value = Arc<dyn Any + Send + Sync>;

/// Wraps a concrete value into a [`Value`].
pub fn value<T: Send + Sync + 'static>(v: T) -> Value {
    Arc::new(v)
}

/// Runtime tag standing in for a type in lookups and compatibility checks.
///
/// Tags form an explicit conformance table built at registration time:
/// nominal ancestors are declared with [`TypeTag::extends`], structural
/// capabilities with [`TypeTag::satisfies`]. Generic parameters are stripped
/// down to the origin type, so `TypeTag::of::<Vec<i32>>()` and
/// `TypeTag::of::<Vec<String>>()` are the same tag. Precise generic-argument
/// variance is a known limitation, not an approximation target.
#[derive(Clone, Debug)]
pub struct TypeTag {
    origin: &'static str,
    structural: bool,
    extends: Vec<&'static str>,
    satisfies: Vec<&'static str>,
}

impl TypeTag {
    /// Tag for a nominal type, stripped of any generic parameters.
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self::named(std::any::type_name::<T>())
    }

    /// Tag for a nominal type known only by name.
    pub fn named(name: &'static str) -> Self {
        TypeTag {
            origin: strip_generics(name),
            structural: false,
            extends: Vec::new(),
            satisfies: Vec::new(),
        }
    }

    /// Tag for a structural capability interface.
    ///
    /// Structural tags are only matched through declared [`TypeTag::satisfies`]
    /// conformances, never through nominal subtyping.
    pub fn structural_of<T: ?Sized + 'static>() -> Self {
        let mut tag = Self::of::<T>();
        tag.structural = true;
        tag
    }

    /// Structural capability interface known only by name.
    pub fn structural(name: &'static str) -> Self {
        let mut tag = Self::named(name);
        tag.structural = true;
        tag
    }

    /// Declares `parent` as a nominal ancestor, inheriting its whole
    /// conformance table so the closure stays transitive.
    pub fn extends(mut self, parent: &TypeTag) -> Self {
        self.extends.push(parent.origin);
        self.extends.extend_from_slice(&parent.extends);
        self.satisfies.extend_from_slice(&parent.satisfies);
        self
    }

    /// Declares conformance to a structural `interface`, including the
    /// interfaces it itself satisfies.
    pub fn satisfies(mut self, interface: &TypeTag) -> Self {
        self.satisfies.push(interface.origin);
        self.satisfies.extend_from_slice(&interface.satisfies);
        self
    }

    pub fn origin(&self) -> &'static str {
        self.origin
    }

    pub fn is_structural(&self) -> bool {
        self.structural
    }

    pub(crate) fn extends_origin(&self, origin: &str) -> bool {
        self.extends.iter().any(|o| *o == origin)
    }

    pub(crate) fn satisfies_origin(&self, origin: &str) -> bool {
        self.satisfies.iter().any(|o| *o == origin)
    }
}

impl PartialEq for TypeTag {
    fn eq(&self, other: &Self) -> bool {
        self.origin == other.origin
    }
}
impl Eq for TypeTag {}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.origin)
    }
}

fn strip_generics(name: &'static str) -> &'static str {
    match name.find('<') {
        Some(idx) => &name[..idx],
        None => name,
    }
}

/// A resolved value paired with the tag it was provided under.
#[derive(Clone)]
pub struct Instance {
    tag: TypeTag,
    value: Value,
}

impl Instance {
    /// Wraps an existing concrete value under its own tag.
    pub fn new<T: Send + Sync + 'static>(value: T) -> Self {
        Instance {
            tag: TypeTag::of::<T>(),
            value: Arc::new(value),
        }
    }

    pub(crate) fn from_parts(tag: TypeTag, value: Value) -> Self {
        Instance { tag, value }
    }

    pub fn tag(&self) -> &TypeTag {
        &self.tag
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Attempts to view the instance as a concrete type.
    pub fn downcast<T: Send + Sync + 'static>(&self) -> Result<Arc<T>, DowncastError> {
        Arc::downcast::<T>(self.value.clone()).map_err(|_| DowncastError {
            required: std::any::type_name::<T>(),
            actual: self.tag.origin(),
        })
    }

    /// Whether both instances share the very same underlying value.
    pub fn ptr_eq(&self, other: &Instance) -> bool {
        Arc::ptr_eq(&self.value, &other.value)
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Instance").field(&self.tag.origin()).finish()
    }
}
