use super::{destroy::DestroyErrorKind, registry::RegistryErrorKind, resolve::ResolveErrorKind};
use crate::context::ContextState;

#[derive(thiserror::Error, Debug)]
pub enum ContextErrorKind {
    #[error("Bean `{name}` is eagerly initialized or conditional and the context hasn't been refreshed yet")]
    NotRefreshed { name: String },
    #[error("Registration isn't allowed in `{state:?}` state")]
    NotConfigurable { state: ContextState },
    #[error("Context is closed")]
    Closed,
    #[error(transparent)]
    Registry(#[from] RegistryErrorKind),
    #[error(transparent)]
    Resolve(#[from] ResolveErrorKind),
    #[error(transparent)]
    Destroy(#[from] DestroyErrorKind),
}
