use crate::scope::Scope;

/// Lifecycle notifications published by the container.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ApplicationEvent {
    /// Eager singletons are constructed, in this order
    ContextRefreshed { beans: Vec<String> },
    /// A bean is constructed, wired and initialized
    BeanCreated {
        name: String,
        bean_type: &'static str,
        scope: Scope,
    },
    /// A cached bean is dropped by its scope
    BeanDestroyed { name: String },
    ContextClosed,
}

impl ApplicationEvent {
    #[inline]
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::ContextRefreshed { .. } => "context_refreshed",
            Self::BeanCreated { .. } => "bean_created",
            Self::BeanDestroyed { .. } => "bean_destroyed",
            Self::ContextClosed => "context_closed",
        }
    }
}

pub trait ApplicationListener: Send + Sync {
    fn on_event(&self, event: &ApplicationEvent);
}

impl<F> ApplicationListener for F
where
    F: Fn(&ApplicationEvent) + Send + Sync,
{
    #[inline]
    fn on_event(&self, event: &ApplicationEvent) {
        self(event);
    }
}
