#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum RegistryErrorKind {
    #[error("Bean definition `{name}` is already registered and the registry is activated")]
    DuplicateDefinition { name: String },
    #[error("Bean definition `{name}` configures argument {index}, but its constructor takes {arity}")]
    ArgumentIndex { name: String, index: usize, arity: usize },
}
