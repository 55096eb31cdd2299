use parking_lot::{RwLock, RwLockReadGuard};
use std::sync::Arc;
use tracing::{debug, debug_span, error, info_span, warn};

use crate::{
    any::{Bean, BeanView, TypeInfo},
    cache::{CacheError, Created, Creation, Teardown},
    definition::BeanDefinition,
    dependency_resolver::{ConstructionPlan, DependencyResolver, ResolvedArg},
    environment::{Environment, PropertySource},
    errors::{
        DestroyErrorKind, DestroyFailure, InstantiateErrorKind, InstantiatorErrorKind, PropertyErrorKind,
        RegistryErrorKind, ResolveErrorKind,
    },
    event::{ApplicationEvent, ApplicationListener},
    inject::{ArgValue, ResolvedArgs},
    post_processor::{unproxied, BeanPostProcessor, ProxyBean},
    registry::Registry,
    scope::{into_result, Scope, ScopeContext, ScopeManager},
};

/// Snapshot of a factory's bookkeeping.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FactoryStats {
    pub definitions: usize,
    /// Ready singletons
    pub singletons: usize,
    /// Request and session scopes with live instances
    pub active_scopes: usize,
    pub post_processors: usize,
    pub listeners: usize,
}

/// Produces beans from a [`Registry`], honoring their scopes and dependencies.
pub struct BeanFactory {
    registry: Registry,
    environment: RwLock<Environment>,
    scopes: ScopeManager,
    post_processors: Vec<Arc<dyn BeanPostProcessor>>,
    listeners: Vec<Arc<dyn ApplicationListener>>,
}

impl BeanFactory {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::with_environment(Environment::new())
    }

    #[must_use]
    pub fn with_environment(environment: Environment) -> Self {
        Self {
            registry: Registry::new(),
            environment: RwLock::new(environment),
            scopes: ScopeManager::new(),
            post_processors: Vec::new(),
            listeners: Vec::new(),
        }
    }

    /// Adds a definition. Replacing a definition drops the singleton already created from it.
    ///
    /// # Errors
    /// - [`RegistryErrorKind::DuplicateDefinition`] if the name is taken and the registry is activated
    pub fn register(&mut self, definition: impl Into<BeanDefinition>) -> Result<(), RegistryErrorKind> {
        let definition = definition.into();
        let name = definition.name.clone();
        let replaced = self.registry.contains(&name);

        self.registry.register(definition)?;

        if replaced {
            let teardown = self.scopes.singletons().evict(&name);
            for failure in self.publish_teardown(teardown) {
                warn!(%failure, "Destroy hook of replaced bean failed");
            }
        }
        debug!(bean = %name, replaced, "Registered");

        Ok(())
    }

    #[inline]
    #[must_use]
    pub const fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Drops the definitions whose conditions don't hold in the environment, then makes the registry read-only.
    /// Returns the names of the dropped definitions.
    pub fn activate(&mut self) -> Vec<String> {
        let environment = &*self.environment.get_mut();
        let skipped = self.registry.retain(|definition| {
            definition
                .conditions
                .iter()
                .all(|condition| condition.matches(environment))
        });
        self.registry.activate();

        for name in &skipped {
            debug!(bean = %name, "Conditions not met, definition dropped");
            let teardown = self.scopes.singletons().evict(name);
            for failure in self.publish_teardown(teardown) {
                warn!(%failure, "Destroy hook of dropped bean failed");
            }
        }
        skipped
    }

    #[inline]
    #[must_use]
    pub const fn scopes(&self) -> &ScopeManager {
        &self.scopes
    }

    pub fn add_post_processor(&mut self, post_processor: impl BeanPostProcessor + 'static) {
        self.post_processors.push(Arc::new(post_processor));
        // Stable, ties keep registration order
        self.post_processors.sort_by_key(|post_processor| post_processor.order());
    }

    pub fn add_listener(&mut self, listener: impl ApplicationListener + 'static) {
        self.listeners.push(Arc::new(listener));
    }

    pub(crate) fn publish(&self, event: &ApplicationEvent) {
        debug!(event = event.kind(), "Publishing event");
        for listener in &self.listeners {
            listener.on_event(event);
        }
    }

    #[inline]
    pub fn environment(&self) -> RwLockReadGuard<'_, Environment> {
        self.environment.read()
    }

    pub fn add_property_source(&self, source: PropertySource) {
        self.environment.write().add_property_source(source);
    }

    pub fn set_property(&self, key: impl Into<String>, value: impl Into<String>) {
        self.environment.write().set_property(key, value);
    }

    #[inline]
    #[must_use]
    pub fn contains_bean(&self, name: &str) -> bool {
        self.registry.contains(name)
    }

    #[inline]
    #[must_use]
    pub fn bean_names(&self) -> &[String] {
        self.registry.bean_names()
    }

    #[inline]
    #[must_use]
    pub fn names_for_type<I: ?Sized + 'static>(&self) -> &[String] {
        self.registry.names_for_type(TypeInfo::of::<I>())
    }

    /// # Errors
    /// - [`ResolveErrorKind::NoSuchBeanDefinition`] if `name` is unknown
    pub fn is_singleton(&self, name: &str) -> Result<bool, ResolveErrorKind> {
        self.registry.get(name).map(|definition| definition.scope == Scope::Singleton)
    }

    /// Construction plan of `name`, dependencies first.
    ///
    /// # Errors
    /// See [`DependencyResolver::plan`]
    pub fn plan(&self, name: &str) -> Result<ConstructionPlan, ResolveErrorKind> {
        DependencyResolver::new(&self.registry).plan(name)
    }

    /// Definitions that can't be constructed, with the reason
    #[must_use]
    pub fn validate(&self) -> Vec<(String, ResolveErrorKind)> {
        DependencyResolver::new(&self.registry).validate()
    }

    /// Bean `name` outside of any request or session.
    ///
    /// # Errors
    /// See [`BeanFactory::get_bean_in`]
    #[inline]
    pub fn get_bean(&self, name: &str) -> Result<Bean, ResolveErrorKind> {
        self.get_bean_in(name, &ScopeContext::none())
    }

    /// Bean `name`: the cached instance of its scope, or a new one with all its dependencies.
    ///
    /// # Errors
    /// - [`ResolveErrorKind::NoSuchBeanDefinition`] if `name` is unknown
    /// - [`ResolveErrorKind::NoSuchBeanOfType`], [`ResolveErrorKind::AmbiguousDependency`] and
    ///   [`ResolveErrorKind::CircularDependency`] if the dependency graph is unsatisfiable
    /// - [`ResolveErrorKind::ScopeNotActive`] if `context` misses the id of a scope involved
    /// - [`ResolveErrorKind::BeanCreation`] if a constructor, a hook or a post-processor failed
    ///
    /// A bean replaced by a [`Proxy`](crate::Proxy) is returned as the target the proxy wraps.
    #[inline]
    pub fn get_bean_in(&self, name: &str, context: &ScopeContext) -> Result<Bean, ResolveErrorKind> {
        self.fetch(name, context).map(unproxied)
    }

    /// Bean `name` as cached, proxies included
    fn fetch(&self, name: &str, context: &ScopeContext) -> Result<Bean, ResolveErrorKind> {
        let span = info_span!("get_bean", bean = name);
        let _guard = span.enter();

        self.get_bean_unlogged(name, context).map_err(|err| {
            error!("{}", err);
            err
        })
    }

    fn get_bean_unlogged(&self, name: &str, context: &ScopeContext) -> Result<Bean, ResolveErrorKind> {
        let definition = self.registry.get(name)?;
        if let Some(cache) = self.scopes.cache_for(name, definition.scope, context)? {
            if let Some(bean) = cache.get(name) {
                debug!("Found in cache");
                return Ok(bean);
            }
        }

        let plan = DependencyResolver::new(&self.registry).plan(name)?;
        self.obtain(name, &plan, context, &mut Vec::new())
    }

    /// Bean `name` as its concrete type `T`.
    ///
    /// # Errors
    /// - [`ResolveErrorKind::IncorrectType`] if the bean isn't a `T`
    /// - Same as [`BeanFactory::get_bean`]
    pub fn get_bean_typed<T: Send + Sync + 'static>(&self, name: &str) -> Result<Arc<T>, ResolveErrorKind> {
        self.get_bean(name)?
            .downcast::<T>()
            .map_err(|_| ResolveErrorKind::IncorrectType {
                name: name.to_owned(),
                expected: TypeInfo::of::<T>().name,
            })
    }

    /// The only bean, or the only primary one, satisfying `I`.
    ///
    /// # Errors
    /// - [`ResolveErrorKind::NoSuchBeanOfType`] and [`ResolveErrorKind::AmbiguousDependency`] from candidate selection
    /// - Same as [`BeanFactory::get_bean`]
    #[inline]
    pub fn get_bean_by_type<I: ?Sized + Send + Sync + 'static>(&self) -> Result<Arc<I>, ResolveErrorKind> {
        self.get_bean_by_type_in::<I>(None, &ScopeContext::none())
    }

    /// The bean named `qualifier`, seen as `I`.
    ///
    /// # Errors
    /// - [`ResolveErrorKind::NoSuchBeanOfType`] if `qualifier` doesn't satisfy `I`
    /// - Same as [`BeanFactory::get_bean`]
    #[inline]
    pub fn get_bean_by_type_qualified<I: ?Sized + Send + Sync + 'static>(
        &self,
        qualifier: &str,
    ) -> Result<Arc<I>, ResolveErrorKind> {
        self.get_bean_by_type_in::<I>(Some(qualifier), &ScopeContext::none())
    }

    /// # Errors
    /// Same as [`BeanFactory::get_bean_by_type`] and [`BeanFactory::get_bean_in`]
    pub fn get_bean_by_type_in<I: ?Sized + Send + Sync + 'static>(
        &self,
        qualifier: Option<&str>,
        context: &ScopeContext,
    ) -> Result<Arc<I>, ResolveErrorKind> {
        let type_info = TypeInfo::of::<I>();
        let name = DependencyResolver::new(&self.registry)
            .select_candidate(type_info, qualifier, true)?
            .ok_or(ResolveErrorKind::NoSuchBeanOfType {
                type_name: type_info.name,
                qualifier: qualifier.map(ToOwned::to_owned),
            })?;

        let bean = self.fetch(name, context)?;
        self.view(name, &bean, type_info)?
            .downcast_ref::<Arc<I>>()
            .cloned()
            .ok_or_else(|| ResolveErrorKind::IncorrectType {
                name: name.to_owned(),
                expected: type_info.name,
            })
    }

    /// Constructs every non-lazy singleton, dependencies first, stopping at the first failure.
    /// Returns their names in construction order.
    ///
    /// # Errors
    /// Same as [`BeanFactory::get_bean`]
    pub fn pre_instantiate_singletons(&self) -> Result<Vec<String>, ResolveErrorKind> {
        let span = info_span!("pre_instantiate_singletons");
        let _guard = span.enter();

        let eager = self
            .registry
            .definitions()
            .filter(|definition| definition.is_eager_singleton())
            .map(BeanDefinition::name);
        let plan = match DependencyResolver::new(&self.registry).plan_all(eager) {
            Ok(plan) => plan,
            Err(err) => {
                error!("{}", err);
                return Err(err);
            }
        };

        let context = ScopeContext::none();
        let mut created = Vec::new();
        for name in &plan.order {
            if !self.registry.get(name)?.is_eager_singleton() {
                continue;
            }

            let span = info_span!("get_bean", bean = name.as_str());
            let _guard = span.enter();

            if let Err(err) = self.obtain(name, &plan, &context, &mut Vec::new()) {
                error!("{}", err);
                return Err(err);
            }
            created.push(name.clone());
        }

        debug!(count = created.len(), "Singletons pre-instantiated");
        Ok(created)
    }

    /// Destroys every singleton, and instances of request and session scopes still active,
    /// dependencies before their dependents.
    ///
    /// # Errors
    /// - [`DestroyErrorKind::Hooks`] with every failed destroy hook; all hooks run regardless
    pub fn destroy_singletons(&self) -> Result<(), DestroyErrorKind> {
        let span = info_span!("destroy_singletons");
        let _guard = span.enter();

        let teardown = self.scopes.destroy_all();
        into_result(self.publish_teardown(teardown))
    }

    /// Ends an external scope, destroying its instances.
    ///
    /// # Errors
    /// - [`DestroyErrorKind::Hooks`] with every failed destroy hook; all hooks run regardless
    pub fn end_scope(&self, scope: Scope, id: &str) -> Result<(), DestroyErrorKind> {
        let teardown = self.scopes.end_scope_teardown(scope, id);
        into_result(self.publish_teardown(teardown))
    }

    fn publish_teardown(&self, teardown: Teardown) -> Vec<DestroyFailure> {
        for name in teardown.destroyed {
            self.publish(&ApplicationEvent::BeanDestroyed { name });
        }
        teardown.failures
    }

    #[must_use]
    pub fn stats(&self) -> FactoryStats {
        FactoryStats {
            definitions: self.registry.len(),
            singletons: self.scopes.singleton_count(),
            active_scopes: self.scopes.active_scopes(),
            post_processors: self.post_processors.len(),
            listeners: self.listeners.len(),
        }
    }

    /// Instance of `name` from its scope cache, constructed if missing.
    /// `stack` holds the beans whose construction is in progress on this call chain.
    fn obtain(
        &self,
        name: &str,
        plan: &ConstructionPlan,
        context: &ScopeContext,
        stack: &mut Vec<String>,
    ) -> Result<Bean, ResolveErrorKind> {
        let definition = self.registry.get(name)?;

        match self.scopes.cache_for(name, definition.scope, context)? {
            Some(cache) => cache
                .get_or_create(name, |creation| {
                    self.create(definition, plan, context, stack, Some(creation))
                })
                .map_err(|err| match err {
                    CacheError::Cycle => cycle(stack, name),
                    CacheError::Create(err) => err,
                }),
            None => {
                if stack.iter().any(|constructing| constructing == name) {
                    return Err(cycle(stack, name));
                }
                self.create(definition, plan, context, stack, None)
                    .map(|created| created.bean)
            }
        }
    }

    fn create(
        &self,
        definition: &BeanDefinition,
        plan: &ConstructionPlan,
        context: &ScopeContext,
        stack: &mut Vec<String>,
        creation: Option<&Creation<'_>>,
    ) -> Result<Created, ResolveErrorKind> {
        let span = debug_span!("create", bean = definition.name.as_str(), scope = definition.scope.name());
        let _guard = span.enter();

        stack.push(definition.name.clone());
        let result = self.construct(definition, plan, context, stack, creation);
        stack.pop();

        let created = result?;
        debug!("Created");
        self.publish(&ApplicationEvent::BeanCreated {
            name: definition.name.clone(),
            bean_type: definition.bean_type.name,
            scope: definition.scope,
        });

        Ok(created)
    }

    /// Instantiate, wire, then initialize between the post-processor phases.
    fn construct(
        &self,
        definition: &BeanDefinition,
        plan: &ConstructionPlan,
        context: &ScopeContext,
        stack: &mut Vec<String>,
        creation: Option<&Creation<'_>>,
    ) -> Result<Created, ResolveErrorKind> {
        let name = definition.name.as_str();
        let deps_failed = |err: ResolveErrorKind| ResolveErrorKind::BeanCreation {
            name: name.to_owned(),
            source: InstantiatorErrorKind::Deps(Box::new(err)),
        };
        let factory_failed = |err: InstantiateErrorKind| ResolveErrorKind::BeanCreation {
            name: name.to_owned(),
            source: InstantiatorErrorKind::Factory(err),
        };

        let mut dependencies = Vec::new();

        for dependency in &definition.depends_on {
            self.obtain(dependency, plan, context, stack).map_err(deps_failed)?;
            dependencies.push(dependency.clone());
        }

        let args = match plan.args.get(name) {
            Some(args) => args.clone(),
            None => DependencyResolver::new(&self.registry)
                .resolve_args(definition)
                .map_err(deps_failed)?,
        };
        let mut values = Vec::with_capacity(args.len());
        for (arg, declared) in args.iter().zip(&definition.constructor_args) {
            let value = match arg {
                ResolvedArg::Bean { name: dependency, type_info } => {
                    let bean = self.obtain(dependency, plan, context, stack).map_err(deps_failed)?;
                    dependencies.push(dependency.clone());
                    ArgValue::Bean(self.view(dependency, &bean, *type_info).map_err(deps_failed)?)
                }
                ResolvedArg::Provided(value) => ArgValue::Bean(value.clone()),
                ResolvedArg::Property { key, default } => {
                    let environment = self.environment.read();
                    match environment.get_raw(key).map(ToOwned::to_owned).or_else(|| default.clone()) {
                        Some(value) => ArgValue::Text { key: key.clone(), value },
                        None if !declared.required => ArgValue::Absent,
                        None => {
                            return Err(deps_failed(PropertyErrorKind::Missing { key: key.clone() }.into()));
                        }
                    }
                }
                ResolvedArg::Absent => ArgValue::Absent,
            };
            values.push(value);
        }

        let raw = definition
            .instantiator
            .call_cloned(ResolvedArgs::new(values))
            .map_err(|err| ResolveErrorKind::BeanCreation {
                name: name.to_owned(),
                source: match err {
                    InstantiatorErrorKind::Deps(err) => InstantiatorErrorKind::Deps(Box::new(err)),
                    InstantiatorErrorKind::Factory(err) => InstantiatorErrorKind::Factory(err),
                },
            })?;

        if !definition.wirings.is_empty() {
            if let Some(creation) = creation {
                creation.publish_early(raw.clone());
            }

            let resolver = DependencyResolver::new(&self.registry);
            let wired = resolver.resolve_wirings(definition).map_err(deps_failed)?;
            for (wiring, arg) in definition.wirings.iter().zip(wired) {
                let view = match arg {
                    ResolvedArg::Bean { name: dependency, type_info } => {
                        let dependency_plan = resolver.plan(&dependency).map_err(deps_failed)?;
                        let bean = self
                            .obtain(&dependency, &dependency_plan, context, stack)
                            .map_err(deps_failed)?;
                        let view = self.view(&dependency, &bean, type_info).map_err(deps_failed)?;
                        dependencies.push(dependency);
                        view
                    }
                    ResolvedArg::Provided(view) => view,
                    ResolvedArg::Property { .. } | ResolvedArg::Absent => continue,
                };
                (wiring.setter)(&raw, &view).map_err(factory_failed)?;
            }
            debug!(count = definition.wirings.len(), "Wired");
        }

        let mut bean = raw.clone();
        for post_processor in &self.post_processors {
            bean = post_processor
                .before_initialization(bean, name)
                .map_err(factory_failed)?;
        }
        check_replacement(definition, &bean).map_err(factory_failed)?;
        if let Some(init) = &definition.init_method {
            init.call(unproxied(bean.clone())).map_err(factory_failed)?;
            debug!(hook = init.name(), "Initialized");
        }
        for post_processor in &self.post_processors {
            bean = post_processor.after_initialization(bean, name).map_err(factory_failed)?;
        }
        check_replacement(definition, &bean).map_err(factory_failed)?;

        Ok(Created {
            bean,
            raw,
            dependencies,
            destroy: definition.destroy_method.clone(),
        })
    }

    /// `bean` seen as `type_info`, through its proxy if it has one
    fn view(&self, name: &str, bean: &Bean, type_info: TypeInfo) -> Result<BeanView, ResolveErrorKind> {
        let definition = self.registry.get(name)?;
        let view = match bean.downcast_ref::<ProxyBean>() {
            Some(proxy) => proxy
                .view(type_info)
                .or_else(|| definition.view(&proxy.target, type_info)),
            None => definition.view(bean, type_info),
        };
        view.ok_or_else(|| ResolveErrorKind::IncorrectType {
            name: name.to_owned(),
            expected: type_info.name,
        })
    }
}

impl Default for BeanFactory {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

/// A post-processed bean must still be of the declared type, or a proxy of it exposing every other capability
fn check_replacement(definition: &BeanDefinition, bean: &Bean) -> Result<(), InstantiateErrorKind> {
    let incorrect = |expected: TypeInfo| InstantiateErrorKind::IncorrectType { expected: expected.name };

    let target = match bean.downcast_ref::<ProxyBean>() {
        Some(proxy) => {
            if let Some(missing) = definition
                .capabilities
                .keys()
                .find(|&&capability| capability != definition.bean_type && !proxy.exposes(capability))
            {
                return Err(incorrect(*missing));
            }
            &proxy.target
        }
        None => bean,
    };
    if definition.view(target, definition.bean_type).is_some() {
        Ok(())
    } else {
        Err(incorrect(definition.bean_type))
    }
}

/// Cycle through the beans under construction, from the first occurrence of `name` back to it
fn cycle(stack: &[String], name: &str) -> ResolveErrorKind {
    let start = stack.iter().position(|constructing| constructing == name).unwrap_or(stack.len());
    let mut chain = stack[start..].to_vec();
    if chain.is_empty() {
        chain.push(name.to_owned());
    }
    chain.push(name.to_owned());
    ResolveErrorKind::CircularDependency { chain }
}
