use std::sync::Arc;

use crate::types::TypeTag;

/// Compatibility predicate deciding whether a value provided under the first
/// tag may stand in for a request for the second.
///
/// Supplied per registry as a configuration value, so alternative policies
/// can be plugged in without touching the resolver.
pub type TypesMatcher = Arc<dyn Fn(&TypeTag, &TypeTag) -> bool + Send + Sync>;

/// Default matching policy.
///
/// Identical origins always match. A structural `required` tag matches any
/// provider that declares conformance to it; a nominal `required` tag only
/// matches declared nominal ancestors. Generic arguments were already
/// stripped when the tags were built.
pub fn acceptable_in_place_of(provided: &TypeTag, required: &TypeTag) -> bool {
    if provided.origin() == required.origin() {
        return true;
    }
    if required.is_structural() {
        provided.satisfies_origin(required.origin())
    } else {
        provided.extends_origin(required.origin())
    }
}

/// Strict policy: only the exact origin type satisfies a request.
pub fn exact_match(provided: &TypeTag, required: &TypeTag) -> bool {
    provided.origin() == required.origin()
}

pub fn default_matcher() -> TypesMatcher {
    Arc::new(|provided, required| acceptable_in_place_of(provided, required))
}

pub fn exact_matcher() -> TypesMatcher {
    Arc::new(|provided, required| exact_match(provided, required))
}
