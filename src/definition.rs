use std::{any::type_name, collections::BTreeMap, fmt, marker::PhantomData, sync::Arc};

use crate::{
    any::{Bean, BeanView, TypeInfo},
    condition::Condition,
    errors::InstantiateErrorKind,
    hook::{Hook, NamedHook},
    inject::{ArgSource, ConstructorArg, Dependencies},
    instantiator::{boxed_instantiator_factory, BoxedCloneInstantiator, Instantiator},
    scope::Scope,
};

/// Turns a type-erased bean into a view of one of its capabilities.
pub(crate) type ViewFn = Arc<dyn Fn(&Bean) -> Option<BeanView> + Send + Sync>;

/// Injects a late dependency into an allocated bean.
pub(crate) type WireFn = Arc<dyn Fn(&Bean, &BeanView) -> Result<(), InstantiateErrorKind> + Send + Sync>;

/// A dependency injected after allocation, outside of the constructor.
#[derive(Clone)]
pub(crate) struct Wiring {
    pub(crate) arg: ConstructorArg,
    pub(crate) setter: WireFn,
}

/// Metadata describing one registrable bean.
///
/// Built with [`BeanDefinition::builder`] and immutable once registered.
#[derive(Clone)]
pub struct BeanDefinition {
    pub(crate) name: String,
    pub(crate) bean_type: TypeInfo,
    pub(crate) scope: Scope,
    pub(crate) primary: bool,
    pub(crate) lazy_init: bool,
    pub(crate) constructor_args: Vec<ConstructorArg>,
    pub(crate) init_method: Option<NamedHook>,
    pub(crate) destroy_method: Option<NamedHook>,
    pub(crate) depends_on: Vec<String>,
    pub(crate) capabilities: BTreeMap<TypeInfo, ViewFn>,
    pub(crate) wirings: Vec<Wiring>,
    pub(crate) conditions: Vec<Condition>,
    /// First argument index set by the builder that the constructor doesn't have
    pub(crate) invalid_arg: Option<usize>,
    pub(crate) instantiator: BoxedCloneInstantiator,
}

impl BeanDefinition {
    /// Starts a definition of the bean `name` constructed by `instantiator`.
    ///
    /// Constructor arguments are read from the instantiator parameters, so
    /// `|Inject(pool): Inject<Pool>, Value(port): Value<u16>| ...` declares an autowired `Pool` and a `u16` property.
    #[must_use]
    pub fn builder<Inst, Deps>(name: impl Into<String>, instantiator: Inst) -> BeanDefinitionBuilder<Inst::Provides>
    where
        Inst: Instantiator<Deps, Error = InstantiateErrorKind>,
        Deps: Dependencies,
    {
        let bean_type = TypeInfo::of::<Inst::Provides>();

        let mut capabilities = BTreeMap::new();
        capabilities.insert(bean_type, view_fn::<Inst::Provides, Inst::Provides>(|bean| bean));

        BeanDefinitionBuilder {
            definition: Self {
                name: name.into(),
                bean_type,
                scope: Scope::default(),
                primary: false,
                lazy_init: false,
                constructor_args: Deps::args(),
                init_method: None,
                destroy_method: None,
                depends_on: Vec::new(),
                capabilities,
                wirings: Vec::new(),
                conditions: Vec::new(),
                invalid_arg: None,
                instantiator: boxed_instantiator_factory(instantiator),
            },
            _marker: PhantomData,
        }
    }

    /// Same as [`BeanDefinition::builder`] with the name derived from the bean type:
    /// `UserService` is registered as `userService`.
    #[must_use]
    pub fn of_type<Inst, Deps>(instantiator: Inst) -> BeanDefinitionBuilder<Inst::Provides>
    where
        Inst: Instantiator<Deps, Error = InstantiateErrorKind>,
        Deps: Dependencies,
    {
        Self::builder(default_name(TypeInfo::of::<Inst::Provides>()), instantiator)
    }

    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    #[must_use]
    pub const fn bean_type(&self) -> TypeInfo {
        self.bean_type
    }

    #[inline]
    #[must_use]
    pub const fn scope(&self) -> Scope {
        self.scope
    }

    #[inline]
    #[must_use]
    pub const fn is_primary(&self) -> bool {
        self.primary
    }

    #[inline]
    #[must_use]
    pub const fn is_lazy_init(&self) -> bool {
        self.lazy_init
    }

    #[inline]
    #[must_use]
    pub fn constructor_args(&self) -> &[ConstructorArg] {
        &self.constructor_args
    }

    #[inline]
    #[must_use]
    pub fn depends_on(&self) -> &[String] {
        &self.depends_on
    }

    #[inline]
    #[must_use]
    pub fn init_method(&self) -> Option<&str> {
        self.init_method.as_ref().map(NamedHook::name)
    }

    #[inline]
    #[must_use]
    pub fn destroy_method(&self) -> Option<&str> {
        self.destroy_method.as_ref().map(NamedHook::name)
    }

    /// The bean type followed by every declared capability
    pub fn capabilities(&self) -> impl Iterator<Item = TypeInfo> + '_ {
        self.capabilities.keys().copied()
    }

    #[inline]
    #[must_use]
    pub fn satisfies(&self, type_info: TypeInfo) -> bool {
        self.capabilities.contains_key(&type_info)
    }

    #[inline]
    #[must_use]
    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    /// Whether the container constructs this bean during refresh
    #[inline]
    #[must_use]
    pub fn is_eager_singleton(&self) -> bool {
        self.scope == Scope::Singleton && !self.lazy_init
    }

    /// View of `bean` as `type_info`, holding an `Arc` of that type.
    pub(crate) fn view(&self, bean: &Bean, type_info: TypeInfo) -> Option<BeanView> {
        self.capabilities.get(&type_info).and_then(|view| view(bean))
    }
}

impl fmt::Debug for BeanDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BeanDefinition")
            .field("name", &self.name)
            .field("bean_type", &self.bean_type.name)
            .field("scope", &self.scope)
            .field("primary", &self.primary)
            .field("lazy_init", &self.lazy_init)
            .field("constructor_args", &self.constructor_args)
            .field("init_method", &self.init_method())
            .field("destroy_method", &self.destroy_method())
            .field("depends_on", &self.depends_on)
            .field("capabilities", &self.capabilities.keys().map(|info| info.name).collect::<Vec<_>>())
            .field("conditions", &self.conditions)
            .finish_non_exhaustive()
    }
}

pub(crate) fn view_fn<T, I>(cast: impl Fn(Arc<T>) -> Arc<I> + Send + Sync + 'static) -> ViewFn
where
    T: Send + Sync + 'static,
    I: ?Sized + Send + Sync + 'static,
{
    Arc::new(move |bean: &Bean| bean.clone().downcast::<T>().ok().map(|bean| Arc::new(cast(bean)) as BeanView))
}

/// `UserService` -> `userService`
#[must_use]
pub(crate) fn default_name(type_info: TypeInfo) -> String {
    let path = type_info.name.split_once('<').map_or(type_info.name, |(path, _)| path);
    let short_name = path.rsplit_once("::").map_or(path, |(_, name)| name);

    let mut chars = short_name.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Typed builder for a [`BeanDefinition`] of a bean of type `T`.
///
/// Per-argument settings take the constructor parameter index.
/// An index the constructor doesn't have is reported when the definition is registered.
pub struct BeanDefinitionBuilder<T> {
    definition: BeanDefinition,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Send + Sync + 'static> BeanDefinitionBuilder<T> {
    #[inline]
    #[must_use]
    pub fn scope(mut self, scope: Scope) -> Self {
        self.definition.scope = scope;
        self
    }

    /// Wins type lookups among several candidates
    #[inline]
    #[must_use]
    pub fn primary(mut self) -> Self {
        self.definition.primary = true;
        self
    }

    /// Skips construction during refresh; the bean is created on first access
    #[inline]
    #[must_use]
    pub fn lazy(mut self) -> Self {
        self.definition.lazy_init = true;
        self
    }

    fn arg_source(mut self, index: usize, source: ArgSource) -> Self {
        match self.definition.constructor_args.get_mut(index) {
            Some(arg) => arg.source = source,
            None if self.definition.invalid_arg.is_none() => self.definition.invalid_arg = Some(index),
            None => {}
        }
        self
    }

    /// Narrows the autowired argument at `index` to the bean named `name`.
    #[inline]
    #[must_use]
    pub fn qualifier(self, index: usize, name: impl Into<String>) -> Self {
        self.arg_source(
            index,
            ArgSource::Autowired {
                qualifier: Some(name.into()),
            },
        )
    }

    /// Supplies the argument at `index` directly instead of looking it up.
    #[inline]
    #[must_use]
    pub fn provided<I>(self, index: usize, value: Arc<I>) -> Self
    where
        I: ?Sized + Send + Sync + 'static,
    {
        self.arg_source(index, ArgSource::Provided(Arc::new(value)))
    }

    /// Reads the argument at `index` from the property `key`.
    #[inline]
    #[must_use]
    pub fn property(self, index: usize, key: impl Into<String>) -> Self {
        self.arg_source(
            index,
            ArgSource::Property {
                key: Some(key.into()),
                default: None,
            },
        )
    }

    /// Reads the argument at `index` from the property `key`, falling back to `default` when it's unset.
    #[inline]
    #[must_use]
    pub fn property_or(self, index: usize, key: impl Into<String>, default: impl Into<String>) -> Self {
        self.arg_source(
            index,
            ArgSource::Property {
                key: Some(key.into()),
                default: Some(default.into()),
            },
        )
    }

    /// Keeps the definition at refresh only if `condition` holds.
    /// Several conditions must all hold.
    #[must_use]
    pub fn conditional_on(mut self, condition: Condition) -> Self {
        self.definition.conditions.push(condition);
        self
    }

    /// Keeps the definition if the property `key` is set, to `having_value` if given
    #[inline]
    #[must_use]
    pub fn conditional_on_property(self, key: impl Into<String>, having_value: Option<&str>) -> Self {
        let condition = Condition::property(key);
        self.conditional_on(match having_value {
            Some(value) => condition.having_value(value),
            None => condition,
        })
    }

    /// Keeps the definition if `profile` is active
    #[inline]
    #[must_use]
    pub fn profile(self, profile: impl Into<String>) -> Self {
        self.conditional_on(Condition::Profiles(vec![profile.into()]))
    }

    /// Constructs the bean `name` before this one, without injecting it.
    #[must_use]
    pub fn depends_on(mut self, name: impl Into<String>) -> Self {
        self.definition.depends_on.push(name.into());
        self
    }

    /// Runs `hook` once the bean is constructed and wired, between the post-processor phases.
    #[must_use]
    pub fn init<H: Hook<T>>(mut self, name: impl Into<String>, hook: H) -> Self {
        self.definition.init_method = Some(NamedHook::new(name, hook));
        self
    }

    /// Runs `hook` before the bean is dropped by its scope.
    #[must_use]
    pub fn destroy<H: Hook<T>>(mut self, name: impl Into<String>, hook: H) -> Self {
        self.definition.destroy_method = Some(NamedHook::new(name, hook));
        self
    }

    /// Declares that the bean satisfies the capability `I`, usually a `dyn Trait`.
    ///
    /// ```rust
    /// use beanery::{BeanDefinition, TypeInfo};
    ///
    /// trait UserRepo: Send + Sync {}
    /// struct PostgresUserRepo;
    /// impl UserRepo for PostgresUserRepo {}
    ///
    /// let definition = BeanDefinition::builder("userRepo", || Ok(PostgresUserRepo))
    ///     .implements::<dyn UserRepo>(|repo| repo)
    ///     .build();
    /// assert!(definition.satisfies(TypeInfo::of::<dyn UserRepo>()));
    /// ```
    #[must_use]
    pub fn implements<I>(mut self, cast: impl Fn(Arc<T>) -> Arc<I> + Send + Sync + 'static) -> Self
    where
        I: ?Sized + Send + Sync + 'static,
    {
        self.definition.capabilities.insert(TypeInfo::of::<I>(), view_fn(cast));
        self
    }

    /// Injects the bean of type `D` after allocation.
    ///
    /// Wired dependencies aren't constructor dependencies,
    /// so two singletons may reference each other this way.
    #[must_use]
    pub fn wire<D, F, Err>(self, setter: F) -> Self
    where
        D: ?Sized + Send + Sync + 'static,
        F: Fn(&T, Arc<D>) -> Result<(), Err> + Send + Sync + 'static,
        Err: Into<InstantiateErrorKind>,
    {
        self.wire_arg(ConstructorArg::autowired(TypeInfo::of::<D>()), setter)
    }

    /// Same as [`BeanDefinitionBuilder::wire`], narrowed to the bean named `qualifier`.
    #[must_use]
    pub fn wire_qualified<D, F, Err>(self, qualifier: impl Into<String>, setter: F) -> Self
    where
        D: ?Sized + Send + Sync + 'static,
        F: Fn(&T, Arc<D>) -> Result<(), Err> + Send + Sync + 'static,
        Err: Into<InstantiateErrorKind>,
    {
        let mut arg = ConstructorArg::autowired(TypeInfo::of::<D>());
        arg.source = ArgSource::Autowired {
            qualifier: Some(qualifier.into()),
        };
        self.wire_arg(arg, setter)
    }

    fn wire_arg<D, F, Err>(mut self, arg: ConstructorArg, setter: F) -> Self
    where
        D: ?Sized + Send + Sync + 'static,
        F: Fn(&T, Arc<D>) -> Result<(), Err> + Send + Sync + 'static,
        Err: Into<InstantiateErrorKind>,
    {
        let setter: WireFn = Arc::new(move |bean: &Bean, view: &BeanView| {
            let bean = bean
                .downcast_ref::<T>()
                .ok_or(InstantiateErrorKind::IncorrectType { expected: type_name::<T>() })?;
            let dependency = view
                .downcast_ref::<Arc<D>>()
                .cloned()
                .ok_or(InstantiateErrorKind::IncorrectType { expected: type_name::<D>() })?;
            setter(bean, dependency).map_err(Into::into)
        });
        self.definition.wirings.push(Wiring { arg, setter });
        self
    }

    #[inline]
    #[must_use]
    pub fn build(self) -> BeanDefinition {
        self.definition
    }
}

impl<T: Send + Sync + 'static> From<BeanDefinitionBuilder<T>> for BeanDefinition {
    #[inline]
    fn from(builder: BeanDefinitionBuilder<T>) -> Self {
        builder.build()
    }
}

#[cfg(test)]
mod tests {
    use super::{default_name, BeanDefinition};
    use crate::{
        any::{Bean, TypeInfo},
        condition::Condition,
        errors::InstantiateErrorKind,
        inject::{ArgSource, Inject, Value},
        instance,
        scope::Scope,
    };

    use std::sync::Arc;

    trait Greeter: Send + Sync {
        fn greet(&self) -> String;
    }

    #[derive(Clone)]
    struct English;

    impl Greeter for English {
        fn greet(&self) -> String {
            "hello".into()
        }
    }

    struct UserService;

    #[test]
    fn test_defaults() {
        let definition = BeanDefinition::builder("english", instance(English)).build();

        assert_eq!(definition.name(), "english");
        assert_eq!(definition.bean_type(), TypeInfo::of::<English>());
        assert_eq!(definition.scope(), Scope::Singleton);
        assert!(!definition.is_primary());
        assert!(!definition.is_lazy_init());
        assert!(definition.is_eager_singleton());
        assert!(definition.constructor_args().is_empty());
        assert_eq!(definition.capabilities().collect::<Vec<_>>(), vec![TypeInfo::of::<English>()]);
    }

    #[test]
    fn test_args_from_constructor() {
        let definition = BeanDefinition::builder(
            "userService",
            |Inject(_): Inject<dyn Greeter>, Value(_): Value<u16>, _: Option<Inject<English>>| {
                Ok(UserService)
            },
        )
        .qualifier(0, "english")
        .property_or(1, "server.port", "8080")
        .build();

        let args = definition.constructor_args();
        assert_eq!(args.len(), 3);
        assert_eq!(args[0].qualifier(), Some("english"));
        assert!(matches!(
            &args[1].source,
            ArgSource::Property { key: Some(key), default: Some(default) } if key == "server.port" && default == "8080"
        ));
        assert!(!args[2].required);
    }

    #[test]
    fn test_capability_view() {
        let definition = BeanDefinition::builder("english", instance(English))
            .implements::<dyn Greeter>(|english| english)
            .build();

        let bean = Arc::new(English) as Bean;
        let view = definition.view(&bean, TypeInfo::of::<dyn Greeter>()).unwrap();
        let greeter = view.downcast_ref::<Arc<dyn Greeter>>().unwrap();

        assert!(definition.satisfies(TypeInfo::of::<dyn Greeter>()));
        assert_eq!(greeter.greet(), "hello");
        assert!(definition.view(&bean, TypeInfo::of::<UserService>()).is_none());
    }

    #[test]
    fn test_options() {
        let definition = BeanDefinition::builder("english", instance(English))
            .scope(Scope::Prototype)
            .primary()
            .lazy()
            .depends_on("dataSource")
            .init("warmUp", |_: &English| Ok::<_, InstantiateErrorKind>(()))
            .destroy("shutdown", |_: &English| Ok::<_, InstantiateErrorKind>(()))
            .build();

        assert_eq!(definition.scope(), Scope::Prototype);
        assert!(definition.is_primary());
        assert!(definition.is_lazy_init());
        assert!(!definition.is_eager_singleton());
        assert_eq!(definition.depends_on(), ["dataSource".to_owned()]);
        assert_eq!(definition.init_method(), Some("warmUp"));
        assert_eq!(definition.destroy_method(), Some("shutdown"));
    }

    #[test]
    fn test_default_name() {
        assert_eq!(default_name(TypeInfo::of::<UserService>()), "userService");
        assert_eq!(default_name(TypeInfo::of::<Option<String>>()), "option");

        let definition = BeanDefinition::of_type(|| Ok(UserService)).build();
        assert_eq!(definition.name(), "userService");
    }

    #[test]
    fn test_argument_index_out_of_range() {
        let definition = BeanDefinition::builder("english", instance(English))
            .qualifier(0, "other")
            .property(2, "greeting")
            .build();
        assert_eq!(definition.invalid_arg, Some(0));

        let definition = BeanDefinition::builder("port", |Value(port): Value<u16>| Ok(port))
            .property(0, "server.port")
            .property_or(1, "server.host", "localhost")
            .build();
        assert_eq!(definition.invalid_arg, Some(1));
    }

    #[test]
    fn test_conditions() {
        let definition = BeanDefinition::builder("english", instance(English))
            .profile("dev")
            .conditional_on_property("greeting.enabled", Some("true"))
            .build();

        assert_eq!(
            definition.conditions(),
            [
                Condition::profiles(["dev"]),
                Condition::property("greeting.enabled").having_value("true"),
            ]
        );
    }
}
