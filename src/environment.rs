use std::{any::type_name, collections::BTreeMap, env, str::FromStr};
use tracing::debug;

use crate::errors::PropertyErrorKind;

/// Property holding the comma separated list of active profiles
pub const ACTIVE_PROFILES_PROPERTY: &str = "profiles.active";

/// A named set of key-value properties.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PropertySource {
    name: String,
    properties: BTreeMap<String, String>,
}

impl PropertySource {
    #[inline]
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            properties: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn from_map<K, V>(name: impl Into<String>, properties: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            name: name.into(),
            properties: properties
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        }
    }

    /// Process environment variables starting with `prefix`: `APP_SERVER_PORT` with prefix `APP` becomes `server.port`.
    #[must_use]
    pub fn from_env(prefix: &str) -> Self {
        Self::from_vars(prefix, env::vars())
    }

    fn from_vars(prefix: &str, vars: impl IntoIterator<Item = (String, String)>) -> Self {
        let prefix = format!("{}_", prefix.trim_end_matches('_').to_uppercase());

        Self::from_map(
            format!("env:{prefix}"),
            vars.into_iter().filter_map(|(key, value)| {
                let key = key.strip_prefix(&prefix)?;
                if key.is_empty() {
                    return None;
                }
                Some((key.to_lowercase().replace('_', "."), value))
            }),
        )
    }

    #[inline]
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    #[inline]
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.properties.insert(key.into(), value.into());
    }

    #[inline]
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.properties.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }
}

/// Ordered property sources and active profiles.
///
/// Properties set directly win over every source, and sources added later win over earlier ones.
#[derive(Clone, Debug)]
pub struct Environment {
    overrides: PropertySource,
    sources: Vec<PropertySource>,
    profiles: Vec<String>,
}

impl Default for Environment {
    fn default() -> Self {
        Self {
            overrides: PropertySource::new("overrides"),
            sources: Vec::new(),
            profiles: Vec::new(),
        }
    }
}

impl Environment {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_property_source(&mut self, source: PropertySource) {
        debug!(source = source.name(), properties = source.len(), "Property source added");
        self.sources.push(source);
    }

    #[inline]
    pub fn set_property(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.overrides.insert(key, value);
    }

    /// Raw value of `key` from the source with the highest precedence
    #[must_use]
    pub fn get_raw(&self, key: &str) -> Option<&str> {
        self.overrides
            .get(key)
            .or_else(|| self.sources.iter().rev().find_map(|source| source.get(key)))
    }

    #[inline]
    #[must_use]
    pub fn contains_property(&self, key: &str) -> bool {
        self.get_raw(key).is_some()
    }

    /// # Errors
    /// - [`PropertyErrorKind::Missing`] if no source has `key`
    /// - [`PropertyErrorKind::Parse`] if the value can't be parsed as `T`
    pub fn get_property<T: FromStr>(&self, key: &str) -> Result<T, PropertyErrorKind> {
        let value = self
            .get_raw(key)
            .ok_or_else(|| PropertyErrorKind::Missing { key: key.to_owned() })?;
        parse(key, value)
    }

    /// # Errors
    /// - [`PropertyErrorKind::Parse`] if the value is set and can't be parsed as `T`
    pub fn get_property_or<T: FromStr>(&self, key: &str, default: T) -> Result<T, PropertyErrorKind> {
        match self.get_raw(key) {
            Some(value) => parse(key, value),
            None => Ok(default),
        }
    }

    #[inline]
    pub fn add_profile(&mut self, profile: impl Into<String>) {
        self.profiles.push(profile.into());
    }

    /// Profiles added directly followed by the ones listed in [`ACTIVE_PROFILES_PROPERTY`]
    #[must_use]
    pub fn active_profiles(&self) -> Vec<String> {
        let listed = self
            .get_raw(ACTIVE_PROFILES_PROPERTY)
            .into_iter()
            .flat_map(|value| value.split(','))
            .map(str::trim)
            .filter(|profile| !profile.is_empty())
            .map(str::to_owned);

        let mut profiles = self.profiles.clone();
        for profile in listed {
            if !profiles.contains(&profile) {
                profiles.push(profile);
            }
        }
        profiles
    }

    #[must_use]
    pub fn is_profile_active(&self, profile: &str) -> bool {
        self.active_profiles().iter().any(|active| active == profile)
    }

    /// Source names, highest precedence first
    #[must_use]
    pub fn source_names(&self) -> Vec<&str> {
        std::iter::once(self.overrides.name())
            .chain(self.sources.iter().rev().map(PropertySource::name))
            .collect()
    }
}

pub(crate) fn parse<T: FromStr>(key: &str, value: &str) -> Result<T, PropertyErrorKind> {
    value.trim().parse().map_err(|_| PropertyErrorKind::Parse {
        key: key.to_owned(),
        value: value.to_owned(),
        type_name: type_name::<T>(),
    })
}

#[cfg(test)]
mod tests {
    use super::{Environment, PropertySource};
    use crate::errors::PropertyErrorKind;

    #[test]
    fn test_later_source_wins() {
        let mut environment = Environment::new();
        environment.add_property_source(
            PropertySource::new("defaults")
                .with("server.port", "8080")
                .with("server.host", "localhost"),
        );
        environment.add_property_source(PropertySource::from_map("local", [("server.port", "9090")]));

        assert_eq!(environment.get_property::<u16>("server.port").unwrap(), 9090);
        assert_eq!(environment.get_property::<String>("server.host").unwrap(), "localhost");

        environment.set_property("server.port", "7070");
        assert_eq!(environment.get_property::<u16>("server.port").unwrap(), 7070);
        assert_eq!(environment.source_names(), ["overrides", "local", "defaults"]);
    }

    #[test]
    fn test_missing_and_parse_errors() {
        let mut environment = Environment::new();
        environment.add_property_source(PropertySource::new("defaults").with("pool.size", "many"));

        assert_eq!(
            environment.get_property::<u8>("pool.timeout").unwrap_err(),
            PropertyErrorKind::Missing {
                key: "pool.timeout".into()
            }
        );
        assert!(matches!(
            environment.get_property::<u8>("pool.size"),
            Err(PropertyErrorKind::Parse { type_name: "u8", .. })
        ));
        assert_eq!(environment.get_property_or("pool.timeout", 30u8).unwrap(), 30);
        assert!(environment.get_property_or("pool.size", 4u8).is_err());
    }

    #[test]
    fn test_from_vars() {
        let source = PropertySource::from_vars(
            "app",
            [
                ("APP_SERVER_PORT".to_owned(), "8080".to_owned()),
                ("APP_".to_owned(), "ignored".to_owned()),
                ("HOME".to_owned(), "/root".to_owned()),
            ],
        );

        assert_eq!(source.get("server.port"), Some("8080"));
        assert_eq!(source.len(), 1);
        assert_eq!(source.name(), "env:APP_");
    }

    #[test]
    fn test_profiles() {
        let mut environment = Environment::new();
        environment.add_profile("test");
        environment.add_property_source(PropertySource::new("defaults").with("profiles.active", "dev, test,,prod"));

        assert_eq!(environment.active_profiles(), ["test", "dev", "prod"]);
        assert!(environment.is_profile_active("dev"));
        assert!(!environment.is_profile_active("staging"));
    }
}
