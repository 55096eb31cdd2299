use std::fmt::{self, Display, Formatter};

use super::instantiate::InstantiateErrorKind;

#[derive(Debug)]
pub struct DestroyFailure {
    pub name: String,
    pub hook: String,
    pub error: InstantiateErrorKind,
}

impl Display for DestroyFailure {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "`{}` ({}): {}", self.name, self.hook, self.error)
    }
}

/// Every destroy hook runs even if an earlier one failed; the failures are reported together.
#[derive(thiserror::Error, Debug)]
pub enum DestroyErrorKind {
    #[error(
        "{} destroy hook(s) failed: {}",
        failures.len(),
        failures.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")
    )]
    Hooks { failures: Vec<DestroyFailure> },
}

impl DestroyErrorKind {
    #[must_use]
    pub fn failures(&self) -> &[DestroyFailure] {
        match self {
            DestroyErrorKind::Hooks { failures } => failures,
        }
    }
}
