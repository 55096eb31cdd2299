use std::collections::BTreeMap;
use tracing::debug;

use crate::{
    any::{BeanView, TypeInfo},
    definition::BeanDefinition,
    errors::ResolveErrorKind,
    inject::{ArgSource, ConstructorArg},
    registry::Registry,
    scope::Scope,
};

/// Where one constructor argument is taken from, after candidate selection.
#[derive(Clone)]
pub enum ResolvedArg {
    /// The bean `name`, seen as `type_info`
    Bean { name: String, type_info: TypeInfo },
    Provided(BeanView),
    Property { key: String, default: Option<String> },
    /// Optional argument without a candidate
    Absent,
}

impl ResolvedArg {
    #[inline]
    #[must_use]
    pub fn bean_name(&self) -> Option<&str> {
        match self {
            Self::Bean { name, .. } => Some(name),
            _ => None,
        }
    }
}

/// Construction order of a bean and its transitive dependencies, dependencies first.
#[derive(Clone, Default)]
pub struct ConstructionPlan {
    pub order: Vec<String>,
    /// Resolved constructor arguments of every bean in `order`
    pub args: BTreeMap<String, Vec<ResolvedArg>>,
}

impl ConstructionPlan {
    /// The requested bean, last in `order`
    #[inline]
    #[must_use]
    pub fn target(&self) -> Option<&str> {
        self.order.last().map(String::as_str)
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    InProgress,
    Done,
}

/// Static dependency analysis over a [`Registry`].
///
/// Only constructor arguments and `depends_on` are edges; wired dependencies are injected
/// after allocation and can't make construction impossible.
pub struct DependencyResolver<'a> {
    registry: &'a Registry,
}

impl<'a> DependencyResolver<'a> {
    #[inline]
    #[must_use]
    pub const fn new(registry: &'a Registry) -> Self {
        Self { registry }
    }

    /// # Errors
    /// - [`ResolveErrorKind::NoSuchBeanDefinition`] if `name` or one of its `depends_on` names is unknown
    /// - [`ResolveErrorKind::NoSuchBeanOfType`] and [`ResolveErrorKind::AmbiguousDependency`] from candidate selection
    /// - [`ResolveErrorKind::CircularDependency`] with the chain from the start of the cycle back to itself
    pub fn plan(&self, name: &str) -> Result<ConstructionPlan, ResolveErrorKind> {
        self.plan_all([name])
    }

    /// Plan for several roots sharing one order, as needed for eager pre-instantiation.
    ///
    /// # Errors
    /// Same as [`DependencyResolver::plan`]
    pub fn plan_all<'n>(&self, names: impl IntoIterator<Item = &'n str>) -> Result<ConstructionPlan, ResolveErrorKind> {
        let mut marks = BTreeMap::new();
        let mut path = Vec::new();
        let mut plan = ConstructionPlan::default();

        for name in names {
            self.visit(name, &mut marks, &mut path, &mut plan)?;
        }

        debug!(order = ?plan.order, "Planned");
        Ok(plan)
    }

    fn visit(
        &self,
        name: &str,
        marks: &mut BTreeMap<String, Mark>,
        path: &mut Vec<String>,
        plan: &mut ConstructionPlan,
    ) -> Result<(), ResolveErrorKind> {
        match marks.get(name) {
            Some(Mark::Done) => return Ok(()),
            Some(Mark::InProgress) => {
                let start = path.iter().position(|visited| visited == name).unwrap_or_default();
                let mut chain = path[start..].to_vec();
                chain.push(name.to_owned());
                return Err(ResolveErrorKind::CircularDependency { chain });
            }
            None => {}
        }

        let definition = self.registry.get(name)?;
        let args = self.resolve_args(definition)?;
        for dependency in &definition.depends_on {
            self.check_scope(definition, dependency)?;
        }

        marks.insert(name.to_owned(), Mark::InProgress);
        path.push(name.to_owned());

        let dependencies = args
            .iter()
            .filter_map(ResolvedArg::bean_name)
            .chain(definition.depends_on.iter().map(String::as_str));
        for dependency in dependencies {
            self.visit(dependency, marks, path, plan)?;
        }

        path.pop();
        marks.insert(name.to_owned(), Mark::Done);
        plan.order.push(name.to_owned());
        plan.args.insert(name.to_owned(), args);

        Ok(())
    }

    /// Constructor arguments of `definition` with candidates selected.
    ///
    /// # Errors
    /// - [`ResolveErrorKind::NoSuchBeanOfType`], [`ResolveErrorKind::NoSuchBeanDefinition`] and
    ///   [`ResolveErrorKind::AmbiguousDependency`] from candidate selection
    /// - [`ResolveErrorKind::ScopeMismatch`] if a selected bean is shorter-lived than `definition`
    pub fn resolve_args(&self, definition: &BeanDefinition) -> Result<Vec<ResolvedArg>, ResolveErrorKind> {
        definition
            .constructor_args
            .iter()
            .map(|arg| self.resolve_scoped_arg(definition, arg))
            .collect()
    }

    /// Late dependencies of `definition`, in declaration order.
    ///
    /// # Errors
    /// Same as [`DependencyResolver::resolve_args`]
    pub fn resolve_wirings(&self, definition: &BeanDefinition) -> Result<Vec<ResolvedArg>, ResolveErrorKind> {
        definition
            .wirings
            .iter()
            .map(|wiring| self.resolve_scoped_arg(definition, &wiring.arg))
            .collect()
    }

    fn resolve_scoped_arg(
        &self,
        definition: &BeanDefinition,
        arg: &ConstructorArg,
    ) -> Result<ResolvedArg, ResolveErrorKind> {
        let resolved = self.resolve_arg(arg)?;
        if let Some(dependency) = resolved.bean_name() {
            self.check_scope(definition, dependency)?;
        }
        Ok(resolved)
    }

    /// A bean can't keep a reference to a bean dropped before it: a singleton would hold on to
    /// the instance of the first request after that request ended.
    fn check_scope(&self, definition: &BeanDefinition, dependency: &str) -> Result<(), ResolveErrorKind> {
        self.check_lifetime(definition, dependency, &mut Vec::new())
    }

    /// A prototype lives as long as the bean holding it, so its own dependencies are checked against the holder
    fn check_lifetime(
        &self,
        holder: &BeanDefinition,
        dependency: &str,
        seen: &mut Vec<String>,
    ) -> Result<(), ResolveErrorKind> {
        let definition = self.registry.get(dependency)?;
        if !holder.scope.can_depend_on(definition.scope) {
            return Err(ResolveErrorKind::ScopeMismatch {
                name: holder.name.clone(),
                scope: holder.scope.name(),
                dependency: dependency.to_owned(),
                dependency_scope: definition.scope.name(),
            });
        }
        let through_prototype = definition.scope == Scope::Prototype && holder.scope != Scope::Prototype;
        if !through_prototype || seen.iter().any(|name| name == dependency) {
            return Ok(());
        }
        seen.push(dependency.to_owned());

        let args = definition
            .constructor_args
            .iter()
            .chain(definition.wirings.iter().map(|wiring| &wiring.arg));
        for arg in args {
            if let Some(name) = self.resolve_arg(arg)?.bean_name() {
                self.check_lifetime(holder, name, seen)?;
            }
        }
        for name in &definition.depends_on {
            self.check_lifetime(holder, name, seen)?;
        }
        Ok(())
    }

    fn resolve_arg(&self, arg: &ConstructorArg) -> Result<ResolvedArg, ResolveErrorKind> {
        match &arg.source {
            ArgSource::Provided(value) => Ok(ResolvedArg::Provided(value.clone())),
            ArgSource::Property { key: Some(key), default } => Ok(ResolvedArg::Property {
                key: key.clone(),
                default: default.clone(),
            }),
            ArgSource::Property { key: None, .. } => Ok(ResolvedArg::Absent),
            ArgSource::Autowired { qualifier } => {
                match self.select_candidate(arg.param_type, qualifier.as_deref(), arg.required)? {
                    Some(name) => Ok(ResolvedArg::Bean {
                        name: name.to_owned(),
                        type_info: arg.param_type,
                    }),
                    None => Ok(ResolvedArg::Absent),
                }
            }
        }
    }

    /// Picks the bean satisfying `type_info`: the qualified one, the only one, or the only primary one.
    /// Never picks arbitrarily.
    ///
    /// # Errors
    /// - [`ResolveErrorKind::NoSuchBeanDefinition`] if the qualifier names an unknown bean
    /// - [`ResolveErrorKind::NoSuchBeanOfType`] if nothing satisfies a required argument
    /// - [`ResolveErrorKind::AmbiguousDependency`] if several candidates remain
    pub fn select_candidate(
        &self,
        type_info: TypeInfo,
        qualifier: Option<&str>,
        required: bool,
    ) -> Result<Option<&'a str>, ResolveErrorKind> {
        let candidates = self.registry.names_for_type(type_info);

        if let Some(qualifier) = qualifier {
            if let Some(name) = candidates.iter().find(|name| *name == qualifier) {
                return Ok(Some(name));
            }
            if !required {
                return Ok(None);
            }
            self.registry.get(qualifier)?;
            return Err(ResolveErrorKind::NoSuchBeanOfType {
                type_name: type_info.name,
                qualifier: Some(qualifier.to_owned()),
            });
        }

        match candidates {
            [] if required => Err(ResolveErrorKind::NoSuchBeanOfType {
                type_name: type_info.name,
                qualifier: None,
            }),
            [] => Ok(None),
            [name] => Ok(Some(name)),
            _ => {
                let mut primaries = candidates
                    .iter()
                    .filter(|name| self.registry.get(name).is_ok_and(BeanDefinition::is_primary));
                match (primaries.next(), primaries.next()) {
                    (Some(name), None) => Ok(Some(name)),
                    _ => Err(ResolveErrorKind::AmbiguousDependency {
                        type_name: type_info.name,
                        candidates: candidates.to_vec(),
                    }),
                }
            }
        }
    }

    /// Plans every definition and reports the ones that can't be constructed.
    #[must_use]
    pub fn validate(&self) -> Vec<(String, ResolveErrorKind)> {
        self.registry
            .bean_names()
            .iter()
            .filter_map(|name| {
                self.plan(name)
                    .and_then(|_| {
                        self.registry
                            .get(name)
                            .and_then(|definition| self.resolve_wirings(definition).map(|_| ()))
                    })
                    .err()
                    .map(|err| (name.clone(), err))
            })
            .collect()
    }
}
