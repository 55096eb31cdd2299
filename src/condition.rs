use std::fmt::{self, Display, Formatter};

use crate::environment::Environment;

/// Profile considered active when no other profile is
pub const DEFAULT_PROFILE: &str = "default";

/// Requirement a definition places on the environment to be kept at refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    /// Property `key` is set, to `having_value` if given
    Property {
        key: String,
        having_value: Option<String>,
        match_if_missing: bool,
    },
    /// One of the profiles is active
    Profiles(Vec<String>),
}

impl Condition {
    /// Property `key` is set, whatever its value
    #[must_use]
    pub fn property(key: impl Into<String>) -> Self {
        Self::Property {
            key: key.into(),
            having_value: None,
            match_if_missing: false,
        }
    }

    /// Requires the property to hold `value`. No-op on a profile condition.
    #[must_use]
    pub fn having_value(mut self, value: impl Into<String>) -> Self {
        if let Self::Property { having_value, .. } = &mut self {
            *having_value = Some(value.into());
        }
        self
    }

    /// Also holds when the property is missing. No-op on a profile condition.
    #[must_use]
    pub fn match_if_missing(mut self) -> Self {
        if let Self::Property { match_if_missing, .. } = &mut self {
            *match_if_missing = true;
        }
        self
    }

    #[must_use]
    pub fn profiles<I, P>(profiles: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<String>,
    {
        Self::Profiles(profiles.into_iter().map(Into::into).collect())
    }

    #[must_use]
    pub fn matches(&self, environment: &Environment) -> bool {
        match self {
            Self::Property {
                key,
                having_value,
                match_if_missing,
            } => match environment.get_raw(key) {
                None => *match_if_missing,
                Some(value) => having_value.as_deref().map_or(true, |expected| expected == value),
            },
            Self::Profiles(profiles) => {
                let active = environment.active_profiles();
                if active.is_empty() {
                    profiles.iter().any(|profile| profile == DEFAULT_PROFILE)
                } else {
                    profiles.iter().any(|profile| active.contains(profile))
                }
            }
        }
    }
}

impl Display for Condition {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Property {
                key,
                having_value: Some(value),
                ..
            } => write!(f, "property `{key}` = `{value}`"),
            Self::Property { key, .. } => write!(f, "property `{key}`"),
            Self::Profiles(profiles) => write!(f, "profile in [{}]", profiles.join(", ")),
        }
    }
}
