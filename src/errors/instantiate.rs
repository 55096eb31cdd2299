/// Failure raised by user code: a constructor, a lifecycle hook or a post-processor.
#[derive(thiserror::Error, Debug)]
pub enum InstantiateErrorKind {
    #[error(transparent)]
    Custom(#[from] anyhow::Error),
    #[error("Bean isn't an instance of `{expected}` (replaced by a post-processor?)")]
    IncorrectType { expected: &'static str },
}
