use parking_lot::{Mutex, RwLockReadGuard};
use std::{str::FromStr, sync::Arc};
use tracing::{debug, info, info_span, warn};

use crate::{
    any::{Bean, TypeInfo},
    definition::BeanDefinition,
    dependency_resolver::DependencyResolver,
    environment::{Environment, PropertySource},
    errors::{ContextErrorKind, PropertyErrorKind, ResolveErrorKind},
    event::{ApplicationEvent, ApplicationListener},
    factory::{BeanFactory, FactoryStats},
    post_processor::BeanPostProcessor,
    scope::{Scope, ScopeContext},
};

/// Lifecycle of an [`ApplicationContext`]: `Constructed -> Configured -> Active -> Closed`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContextState {
    Constructed,
    /// At least one definition registered
    Configured,
    /// Refreshed, eager singletons constructed, registrations rejected
    Active,
    Closed,
}

impl ContextState {
    #[inline]
    #[must_use]
    pub const fn is_configurable(&self) -> bool {
        matches!(self, ContextState::Constructed | ContextState::Configured)
    }
}

/// Front of the container: registration, refresh, lookups and shutdown.
///
/// Before [`ApplicationContext::refresh`] only lazy singletons, prototypes and external scope beans can be looked up;
/// they're constructed on demand along with their dependencies.
/// Eager singletons need a refresh.
///
/// Registration takes `&mut self` and is done on one thread; once active, the context can be shared
/// (in an `Arc`, for example) and looked up concurrently.
pub struct ApplicationContext {
    factory: BeanFactory,
    state: Mutex<ContextState>,
}

impl ApplicationContext {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::with_environment(Environment::new())
    }

    #[must_use]
    pub fn with_environment(environment: Environment) -> Self {
        Self {
            factory: BeanFactory::with_environment(environment),
            state: Mutex::new(ContextState::Constructed),
        }
    }

    #[inline]
    #[must_use]
    pub fn state(&self) -> ContextState {
        *self.state.lock()
    }

    #[inline]
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state() == ContextState::Active
    }

    fn ensure_configurable(&mut self) -> Result<(), ContextErrorKind> {
        let state = *self.state.get_mut();
        if state.is_configurable() {
            Ok(())
        } else {
            Err(ContextErrorKind::NotConfigurable { state })
        }
    }

    /// # Errors
    /// - [`ContextErrorKind::NotConfigurable`] once the context is refreshed or closed
    /// - [`ContextErrorKind::Registry`] if the name is taken and the registry is activated
    pub fn register(&mut self, definition: impl Into<BeanDefinition>) -> Result<(), ContextErrorKind> {
        self.ensure_configurable()?;
        self.factory.register(definition)?;
        *self.state.get_mut() = ContextState::Configured;
        Ok(())
    }

    /// Registers definitions supplied by a scanner or a configuration module, stopping at the first failure.
    ///
    /// # Errors
    /// Same as [`ApplicationContext::register`]
    pub fn register_all<D>(&mut self, definitions: impl IntoIterator<Item = D>) -> Result<(), ContextErrorKind>
    where
        D: Into<BeanDefinition>,
    {
        for definition in definitions {
            self.register(definition)?;
        }
        Ok(())
    }

    /// # Errors
    /// - [`ContextErrorKind::NotConfigurable`] once the context is refreshed or closed
    pub fn add_post_processor(&mut self, post_processor: impl BeanPostProcessor + 'static) -> Result<(), ContextErrorKind> {
        self.ensure_configurable()?;
        self.factory.add_post_processor(post_processor);
        Ok(())
    }

    /// # Errors
    /// - [`ContextErrorKind::NotConfigurable`] once the context is refreshed or closed
    pub fn add_listener(&mut self, listener: impl ApplicationListener + 'static) -> Result<(), ContextErrorKind> {
        self.ensure_configurable()?;
        self.factory.add_listener(listener);
        Ok(())
    }

    /// Ends the registration phase and constructs every non-lazy singleton.
    ///
    /// A failed refresh destroys the singletons constructed so far and closes the context.
    ///
    /// # Errors
    /// - [`ContextErrorKind::NotConfigurable`] if the context is already refreshed or closed
    /// - [`ContextErrorKind::Resolve`] with the first failure
    pub fn refresh(&mut self) -> Result<(), ContextErrorKind> {
        let span = info_span!("refresh");
        let _guard = span.enter();

        self.ensure_configurable()?;
        let dropped = self.factory.activate();

        let beans = match self.factory.pre_instantiate_singletons() {
            Ok(beans) => beans,
            Err(err) => {
                *self.state.get_mut() = ContextState::Closed;
                if let Err(destroy_err) = self.factory.destroy_singletons() {
                    warn!(%destroy_err, "Cleanup after failed refresh");
                }
                return Err(err.into());
            }
        };

        *self.state.get_mut() = ContextState::Active;
        info!(singletons = beans.len(), dropped = dropped.len(), "Context refreshed");
        self.factory.publish(&ApplicationEvent::ContextRefreshed { beans });

        Ok(())
    }

    /// Fails if the bean `name` can't be looked up in the current state
    fn ensure_accessible(&self, name: &str) -> Result<(), ContextErrorKind> {
        match self.state() {
            ContextState::Active => Ok(()),
            ContextState::Closed => Err(ContextErrorKind::Closed),
            ContextState::Constructed | ContextState::Configured => {
                let definition = self.factory.registry().get(name)?;
                if definition.is_eager_singleton() || !definition.conditions().is_empty() {
                    Err(ContextErrorKind::NotRefreshed { name: name.to_owned() })
                } else {
                    Ok(())
                }
            }
        }
    }

    /// # Errors
    /// - [`ContextErrorKind::Closed`] after [`ApplicationContext::close`]
    /// - [`ContextErrorKind::NotRefreshed`] for an eager singleton or a conditional bean
    ///   before [`ApplicationContext::refresh`]
    /// - [`ContextErrorKind::Resolve`] if the bean can't be produced
    #[inline]
    pub fn get_bean(&self, name: &str) -> Result<Bean, ContextErrorKind> {
        self.get_bean_in(name, &ScopeContext::none())
    }

    /// Bean `name` within the request or session given by `context`.
    ///
    /// # Errors
    /// Same as [`ApplicationContext::get_bean`]
    pub fn get_bean_in(&self, name: &str, context: &ScopeContext) -> Result<Bean, ContextErrorKind> {
        self.ensure_accessible(name)?;
        Ok(self.factory.get_bean_in(name, context)?)
    }

    /// # Errors
    /// Same as [`ApplicationContext::get_bean`], plus [`ResolveErrorKind::IncorrectType`] if the bean isn't a `T`
    pub fn get_bean_typed<T: Send + Sync + 'static>(&self, name: &str) -> Result<Arc<T>, ContextErrorKind> {
        self.ensure_accessible(name)?;
        Ok(self.factory.get_bean_typed(name)?)
    }

    /// The only bean, or the only primary one, satisfying `I`.
    ///
    /// # Errors
    /// Same as [`ApplicationContext::get_bean`], plus the candidate selection failures
    #[inline]
    pub fn get_bean_by_type<I: ?Sized + Send + Sync + 'static>(&self) -> Result<Arc<I>, ContextErrorKind> {
        self.get_bean_by_type_in::<I>(None, &ScopeContext::none())
    }

    /// # Errors
    /// Same as [`ApplicationContext::get_bean_by_type`]
    #[inline]
    pub fn get_bean_by_type_qualified<I: ?Sized + Send + Sync + 'static>(
        &self,
        qualifier: &str,
    ) -> Result<Arc<I>, ContextErrorKind> {
        self.get_bean_by_type_in::<I>(Some(qualifier), &ScopeContext::none())
    }

    /// # Errors
    /// Same as [`ApplicationContext::get_bean_by_type`]
    pub fn get_bean_by_type_in<I: ?Sized + Send + Sync + 'static>(
        &self,
        qualifier: Option<&str>,
        context: &ScopeContext,
    ) -> Result<Arc<I>, ContextErrorKind> {
        if self.state() == ContextState::Closed {
            return Err(ContextErrorKind::Closed);
        }

        let type_info = TypeInfo::of::<I>();
        let name = DependencyResolver::new(self.factory.registry())
            .select_candidate(type_info, qualifier, true)?
            .ok_or(ResolveErrorKind::NoSuchBeanOfType {
                type_name: type_info.name,
                qualifier: qualifier.map(ToOwned::to_owned),
            })?;
        self.ensure_accessible(name)?;

        Ok(self.factory.get_bean_by_type_in::<I>(Some(name), context)?)
    }

    #[inline]
    #[must_use]
    pub fn names_for_type<I: ?Sized + 'static>(&self) -> &[String] {
        self.factory.names_for_type::<I>()
    }

    #[inline]
    #[must_use]
    pub fn bean_names(&self) -> &[String] {
        self.factory.bean_names()
    }

    #[inline]
    #[must_use]
    pub fn contains_bean(&self, name: &str) -> bool {
        self.factory.contains_bean(name)
    }

    /// # Errors
    /// - [`ResolveErrorKind::NoSuchBeanDefinition`] if `name` is unknown
    #[inline]
    pub fn is_singleton(&self, name: &str) -> Result<bool, ContextErrorKind> {
        Ok(self.factory.is_singleton(name)?)
    }

    /// Definitions that can't be constructed, with the reason
    #[inline]
    #[must_use]
    pub fn validate(&self) -> Vec<(String, ResolveErrorKind)> {
        self.factory.validate()
    }

    #[inline]
    pub fn add_property_source(&self, source: PropertySource) {
        self.factory.add_property_source(source);
    }

    #[inline]
    pub fn set_property(&self, key: impl Into<String>, value: impl Into<String>) {
        self.factory.set_property(key, value);
    }

    #[inline]
    pub fn environment(&self) -> RwLockReadGuard<'_, Environment> {
        self.factory.environment()
    }

    /// # Errors
    /// - [`PropertyErrorKind::Missing`] if no source has `key`
    /// - [`PropertyErrorKind::Parse`] if the value can't be parsed as `T`
    #[inline]
    pub fn get_property<T: FromStr>(&self, key: &str) -> Result<T, PropertyErrorKind> {
        self.environment().get_property(key)
    }

    /// # Errors
    /// - [`PropertyErrorKind::Parse`] if the value is set and can't be parsed as `T`
    #[inline]
    pub fn get_property_or<T: FromStr>(&self, key: &str, default: T) -> Result<T, PropertyErrorKind> {
        self.environment().get_property_or(key, default)
    }

    /// Destroys the instances of the request `id`.
    ///
    /// # Errors
    /// - [`ContextErrorKind::Destroy`] with every failed destroy hook
    #[inline]
    pub fn end_request(&self, id: &str) -> Result<(), ContextErrorKind> {
        Ok(self.factory.end_scope(Scope::Request, id)?)
    }

    /// Destroys the instances of the session `id`.
    ///
    /// # Errors
    /// - [`ContextErrorKind::Destroy`] with every failed destroy hook
    #[inline]
    pub fn end_session(&self, id: &str) -> Result<(), ContextErrorKind> {
        Ok(self.factory.end_scope(Scope::Session, id)?)
    }

    /// Destroys every cached instance, dependencies before their dependents. Closing twice is a no-op.
    ///
    /// # Errors
    /// - [`ContextErrorKind::Destroy`] with every failed destroy hook; all hooks run regardless
    pub fn close(&self) -> Result<(), ContextErrorKind> {
        {
            let mut state = self.state.lock();
            if *state == ContextState::Closed {
                debug!("Context already closed");
                return Ok(());
            }
            *state = ContextState::Closed;
        }

        let span = info_span!("close");
        let _guard = span.enter();

        self.factory.publish(&ApplicationEvent::ContextClosed);
        self.factory.destroy_singletons()?;

        info!("Context closed");
        Ok(())
    }

    #[inline]
    #[must_use]
    pub fn stats(&self) -> FactoryStats {
        self.factory.stats()
    }

    #[inline]
    #[must_use]
    pub const fn factory(&self) -> &BeanFactory {
        &self.factory
    }
}

impl Default for ApplicationContext {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ApplicationContext {
    fn drop(&mut self) {
        if *self.state.get_mut() == ContextState::Closed {
            return;
        }
        if let Err(err) = self.close() {
            warn!(%err, "Context closed on drop with errors");
        } else {
            debug!("Context closed on drop");
        }
    }
}
