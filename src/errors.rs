mod context;
mod destroy;
mod instantiate;
mod instantiator;
mod property;
mod registry;
mod resolve;
mod scope;

pub use context::ContextErrorKind;
pub use destroy::{DestroyErrorKind, DestroyFailure};
pub use instantiate::InstantiateErrorKind;
pub use instantiator::InstantiatorErrorKind;
pub use property::PropertyErrorKind;
pub use registry::RegistryErrorKind;
pub use resolve::ResolveErrorKind;
pub use scope::ScopeErrorKind;
