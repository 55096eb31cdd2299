#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum PropertyErrorKind {
    #[error("Property `{key}` is not set")]
    Missing { key: String },
    #[error("Property `{key}` has value `{value}` which can't be parsed as `{type_name}`")]
    Parse {
        key: String,
        value: String,
        type_name: &'static str,
    },
}
