use std::{collections::BTreeMap, fmt, sync::Arc};

use crate::{
    any::{Bean, BeanView, TypeInfo},
    definition::{view_fn, ViewFn},
    errors::InstantiateErrorKind,
};

/// Hooks around a bean's init hook.
///
/// Each phase may return the bean as is or a replacement, the last processor's result is the bean the container keeps.
/// A replacement is either of the declared type or a [`Proxy`] around the target exposing every declared capability.
pub trait BeanPostProcessor: Send + Sync {
    /// Called after construction and wiring, before the init hook
    #[allow(unused_variables)]
    fn before_initialization(&self, bean: Bean, name: &str) -> Result<Bean, InstantiateErrorKind> {
        Ok(bean)
    }

    /// Called after the init hook
    #[allow(unused_variables)]
    fn after_initialization(&self, bean: Bean, name: &str) -> Result<Bean, InstantiateErrorKind> {
        Ok(bean)
    }

    /// Processors run in ascending order, ties in registration order
    fn order(&self) -> i32 {
        0
    }
}

/// Replacement of a bean by a wrapper of another type.
///
/// Dependents asking for a capability get the wrapper's implementation of it,
/// lookups by name and hooks still see the wrapped target.
///
/// ```
/// use std::sync::Arc;
/// use beanery::{Bean, BeanPostProcessor, InstantiateErrorKind, Proxy};
///
/// trait Greeter: Send + Sync {
///     fn greet(&self) -> String;
/// }
///
/// struct English;
///
/// impl Greeter for English {
///     fn greet(&self) -> String {
///         "hello".to_owned()
///     }
/// }
///
/// struct Loud(Arc<dyn Greeter>);
///
/// impl Greeter for Loud {
///     fn greet(&self) -> String {
///         self.0.greet().to_uppercase()
///     }
/// }
///
/// struct Louder;
///
/// impl BeanPostProcessor for Louder {
///     fn after_initialization(&self, bean: Bean, _name: &str) -> Result<Bean, InstantiateErrorKind> {
///         match bean.clone().downcast::<English>() {
///             Ok(english) => Ok(Proxy::new(bean, Loud(english)).implements::<dyn Greeter>(|loud| loud).into_bean()),
///             Err(_) => Ok(bean),
///         }
///     }
/// }
/// ```
pub struct Proxy<W> {
    target: Bean,
    wrapper: Arc<W>,
    views: BTreeMap<TypeInfo, ViewFn>,
}

impl<W: Send + Sync + 'static> Proxy<W> {
    #[must_use]
    pub fn new(target: Bean, wrapper: W) -> Self {
        let mut views = BTreeMap::new();
        views.insert(TypeInfo::of::<W>(), view_fn::<W, W>(|wrapper| wrapper));

        Self {
            target,
            wrapper: Arc::new(wrapper),
            views,
        }
    }

    /// Exposes the wrapper as the capability `I`
    #[must_use]
    pub fn implements<I>(mut self, cast: impl Fn(Arc<W>) -> Arc<I> + Send + Sync + 'static) -> Self
    where
        I: ?Sized + Send + Sync + 'static,
    {
        self.views.insert(TypeInfo::of::<I>(), view_fn(cast));
        self
    }

    #[must_use]
    pub fn into_bean(self) -> Bean {
        Arc::new(ProxyBean {
            target: self.target,
            wrapper: self.wrapper,
            views: self.views,
        })
    }
}

/// A bean replaced by a [`Proxy`], as kept in the caches.
pub(crate) struct ProxyBean {
    pub(crate) target: Bean,
    wrapper: Bean,
    views: BTreeMap<TypeInfo, ViewFn>,
}

impl ProxyBean {
    /// View of the wrapper as `type_info`, if the proxy exposes it
    pub(crate) fn view(&self, type_info: TypeInfo) -> Option<BeanView> {
        self.views.get(&type_info).and_then(|view| view(&self.wrapper))
    }

    pub(crate) fn exposes(&self, type_info: TypeInfo) -> bool {
        self.views.contains_key(&type_info)
    }
}

impl fmt::Debug for ProxyBean {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyBean")
            .field("views", &self.views.keys().map(|info| info.name).collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

/// The bean a proxy wraps, or `bean` itself
pub(crate) fn unproxied(bean: Bean) -> Bean {
    match bean.downcast_ref::<ProxyBean>() {
        Some(proxy) => proxy.target.clone(),
        None => bean,
    }
}
