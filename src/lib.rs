//! Bean lifecycle container: named definitions with scopes and typed dependencies,
//! constructed in dependency order and torn down in reverse.
//!
//! ```
//! use beanery::{instance, ApplicationContext, BeanDefinition, Inject};
//! use std::sync::Arc;
//!
//! #[derive(Clone)]
//! struct Config {
//!     url: &'static str,
//! }
//!
//! struct Repository {
//!     config: Arc<Config>,
//! }
//!
//! let mut context = ApplicationContext::new();
//! context
//!     .register(BeanDefinition::builder("config", instance(Config { url: "postgres://" })))
//!     .unwrap();
//! context
//!     .register(BeanDefinition::of_type(|Inject(config): Inject<Config>| Ok(Repository { config })))
//!     .unwrap();
//! context.refresh().unwrap();
//!
//! let repository = context.get_bean_typed::<Repository>("repository").unwrap();
//! assert_eq!(repository.config.url, "postgres://");
//! ```

#[macro_use]
pub(crate) mod macros;

pub(crate) mod any;
pub(crate) mod cache;
pub(crate) mod condition;
pub(crate) mod context;
pub(crate) mod definition;
pub(crate) mod dependency_resolver;
pub(crate) mod environment;
pub(crate) mod event;
pub(crate) mod factory;
pub(crate) mod hook;
pub(crate) mod inject;
pub(crate) mod instantiator;
pub(crate) mod post_processor;
pub(crate) mod registry;
pub(crate) mod scope;
pub(crate) mod service;

pub(crate) mod errors;

pub use any::{Bean, TypeInfo};
pub use condition::{Condition, DEFAULT_PROFILE};
pub use context::{ApplicationContext, ContextState};
pub use definition::{BeanDefinition, BeanDefinitionBuilder};
pub use dependency_resolver::{ConstructionPlan, DependencyResolver, ResolvedArg};
pub use environment::{Environment, PropertySource, ACTIVE_PROFILES_PROPERTY};
pub use errors::{
    ContextErrorKind, DestroyErrorKind, DestroyFailure, InstantiateErrorKind, InstantiatorErrorKind,
    PropertyErrorKind, RegistryErrorKind, ResolveErrorKind, ScopeErrorKind,
};
pub use event::{ApplicationEvent, ApplicationListener};
pub use factory::{BeanFactory, FactoryStats};
pub use hook::Hook;
pub use inject::{ArgSource, ConstructorArg, Dependencies, Inject, Injectable, ResolvedArgs, Value};
pub use instantiator::{instance, Instantiator};
pub use post_processor::{BeanPostProcessor, Proxy};
pub use registry::Registry;
pub use scope::{Scope, ScopeContext, ScopeManager};
