use super::{instantiate::InstantiateErrorKind, instantiator::InstantiatorErrorKind, property::PropertyErrorKind};

fn did_you_mean(suggestions: &[String]) -> String {
    if suggestions.is_empty() {
        String::new()
    } else {
        format!(". Did you mean: {}?", suggestions.join(", "))
    }
}

fn qualified(qualifier: &Option<String>) -> String {
    qualifier.as_ref().map(|name| format!(" qualified as `{name}`")).unwrap_or_default()
}

#[derive(thiserror::Error, Debug)]
pub enum ResolveErrorKind {
    #[error("No bean named `{name}` available{}", did_you_mean(suggestions))]
    NoSuchBeanDefinition { name: String, suggestions: Vec<String> },
    #[error("No bean of type `{type_name}`{} available", qualified(qualifier))]
    NoSuchBeanOfType {
        type_name: &'static str,
        qualifier: Option<String>,
    },
    #[error(
        "Multiple beans of type `{type_name}` found: {}. Mark one as primary or use a qualifier",
        candidates.join(", ")
    )]
    AmbiguousDependency {
        type_name: &'static str,
        candidates: Vec<String>,
    },
    #[error("Circular dependency detected: {}", chain.join(" -> "))]
    CircularDependency { chain: Vec<String> },
    #[error("Error creating bean `{name}`: {source}")]
    BeanCreation {
        name: String,
        source: InstantiatorErrorKind<Box<ResolveErrorKind>, InstantiateErrorKind>,
    },
    #[error("Bean `{name}` has `{scope}` scope, but no {scope} is active")]
    ScopeNotActive { name: String, scope: &'static str },
    #[error(
        "Bean `{name}` has `{scope}` scope and can't depend on `{dependency}`, which has the shorter-lived `{dependency_scope}` scope"
    )]
    ScopeMismatch {
        name: String,
        scope: &'static str,
        dependency: String,
        dependency_scope: &'static str,
    },
    #[error("Bean `{name}` isn't an instance of `{expected}`")]
    IncorrectType { name: String, expected: &'static str },
    #[error("Constructor argument {index} of type `{type_name}` wasn't supplied")]
    MissingArgument { index: usize, type_name: &'static str },
    #[error("Constructor argument {index} isn't an instance of `{expected}`")]
    IncorrectArgument { index: usize, expected: &'static str },
    #[error(transparent)]
    Property(#[from] PropertyErrorKind),
}

impl ResolveErrorKind {
    /// Follows nested [`ResolveErrorKind::BeanCreation`] failures caused by dependencies
    /// down to the error that started the chain.
    #[must_use]
    pub fn root_cause(&self) -> &ResolveErrorKind {
        let mut current = self;
        while let ResolveErrorKind::BeanCreation {
            source: InstantiatorErrorKind::Deps(inner),
            ..
        } = current
        {
            current = inner;
        }
        current
    }
}
