use std::any::type_name;

use crate::{
    any::Bean,
    errors::InstantiateErrorKind,
    service::{service_fn, BoxCloneService},
};

/// An init or destroy callback of a bean of type `T`.
pub trait Hook<T>: Clone + Send + Sync + 'static {
    fn call(&mut self, bean: &T) -> Result<(), InstantiateErrorKind>;
}

impl<F, T, Err> Hook<T> for F
where
    F: FnMut(&T) -> Result<(), Err> + Clone + Send + Sync + 'static,
    Err: Into<InstantiateErrorKind>,
{
    #[inline]
    fn call(&mut self, bean: &T) -> Result<(), InstantiateErrorKind> {
        self(bean).map_err(Into::into)
    }
}

pub(crate) type BoxedCloneHook = BoxCloneService<Bean, (), InstantiateErrorKind>;

/// A hook erased over the bean type, kept with the name it was declared under.
#[derive(Clone)]
pub(crate) struct NamedHook {
    name: String,
    hook: BoxedCloneHook,
}

impl NamedHook {
    #[must_use]
    pub(crate) fn new<T, H>(name: impl Into<String>, mut hook: H) -> Self
    where
        T: Send + Sync + 'static,
        H: Hook<T>,
    {
        Self {
            name: name.into(),
            hook: BoxCloneService::new(service_fn(move |bean: Bean| -> Result<(), InstantiateErrorKind> {
                let bean = bean
                    .downcast_ref::<T>()
                    .ok_or(InstantiateErrorKind::IncorrectType { expected: type_name::<T>() })?;
                hook.call(bean)
            })),
        }
    }

    #[inline]
    #[must_use]
    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub(crate) fn call(&self, bean: Bean) -> Result<(), InstantiateErrorKind> {
        self.hook.call_cloned(bean)
    }
}
