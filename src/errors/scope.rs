#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ScopeErrorKind {
    #[error("Unknown scope `{name}`, expected one of: singleton, prototype, request, session")]
    Unknown { name: String },
}
