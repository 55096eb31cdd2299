use std::collections::BTreeMap;
use tracing::debug;

use crate::{
    any::TypeInfo,
    definition::BeanDefinition,
    errors::{RegistryErrorKind, ResolveErrorKind},
};

const MAX_SUGGESTIONS: usize = 3;
const MAX_SUGGESTION_DISTANCE: usize = 2;

/// Bean definitions by name.
///
/// Writable during the registration phase and read-only once activated.
#[derive(Default)]
pub struct Registry {
    definitions: BTreeMap<String, BeanDefinition>,
    /// Names in registration order
    order: Vec<String>,
    /// Capability -> names in registration order
    by_type: BTreeMap<TypeInfo, Vec<String>>,
    activated: bool,
}

impl Registry {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a definition, replacing the one with the same name.
    ///
    /// A replaced definition keeps its registration position.
    ///
    /// # Errors
    /// - [`RegistryErrorKind::DuplicateDefinition`] if the name is taken and the registry is activated
    /// - [`RegistryErrorKind::ArgumentIndex`] if the builder configured an argument the constructor doesn't take
    pub fn register(&mut self, definition: impl Into<BeanDefinition>) -> Result<(), RegistryErrorKind> {
        let definition = definition.into();
        let name = definition.name.clone();

        if let Some(index) = definition.invalid_arg {
            return Err(RegistryErrorKind::ArgumentIndex {
                name,
                index,
                arity: definition.constructor_args.len(),
            });
        }

        if self.definitions.contains_key(&name) {
            if self.activated {
                return Err(RegistryErrorKind::DuplicateDefinition { name });
            }

            debug!(bean = %name, "Overriding definition");
            self.definitions.insert(name, definition);
            self.rebuild_type_index();
            return Ok(());
        }

        for type_info in definition.capabilities() {
            self.by_type.entry(type_info).or_default().push(name.clone());
        }
        self.order.push(name.clone());
        self.definitions.insert(name, definition);

        Ok(())
    }

    /// Keeps the definitions satisfying `keep`.
    /// Returns the names of the removed ones in registration order.
    pub(crate) fn retain(&mut self, mut keep: impl FnMut(&BeanDefinition) -> bool) -> Vec<String> {
        let mut removed = Vec::new();
        for name in &self.order {
            if let Some(definition) = self.definitions.get(name) {
                if !keep(definition) {
                    removed.push(name.clone());
                }
            }
        }
        if removed.is_empty() {
            return removed;
        }

        for name in &removed {
            self.definitions.remove(name);
        }
        self.order.retain(|name| !removed.contains(name));
        self.rebuild_type_index();

        removed
    }

    fn rebuild_type_index(&mut self) {
        self.by_type.clear();
        for name in &self.order {
            if let Some(definition) = self.definitions.get(name) {
                for type_info in definition.capabilities() {
                    self.by_type.entry(type_info).or_default().push(name.clone());
                }
            }
        }
    }

    /// # Errors
    /// - [`ResolveErrorKind::NoSuchBeanDefinition`] with similar names as suggestions
    pub fn get(&self, name: &str) -> Result<&BeanDefinition, ResolveErrorKind> {
        self.definitions.get(name).ok_or_else(|| ResolveErrorKind::NoSuchBeanDefinition {
            name: name.to_owned(),
            suggestions: self.suggestions(name),
        })
    }

    #[inline]
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.definitions.contains_key(name)
    }

    /// Names of the definitions whose type is or declares `type_info`, in registration order
    #[must_use]
    pub fn names_for_type(&self, type_info: TypeInfo) -> &[String] {
        self.by_type.get(&type_info).map(Vec::as_slice).unwrap_or_default()
    }

    /// Names in registration order
    #[inline]
    #[must_use]
    pub fn bean_names(&self) -> &[String] {
        &self.order
    }

    /// Definitions in registration order
    pub fn definitions(&self) -> impl Iterator<Item = &BeanDefinition> + '_ {
        self.order.iter().filter_map(|name| self.definitions.get(name))
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Ends the registration phase
    #[inline]
    pub fn activate(&mut self) {
        self.activated = true;
    }

    #[inline]
    #[must_use]
    pub const fn is_activated(&self) -> bool {
        self.activated
    }

    fn suggestions(&self, name: &str) -> Vec<String> {
        let lowercase = name.to_lowercase();

        self.order
            .iter()
            .filter(|candidate| {
                let candidate = candidate.to_lowercase();
                candidate == lowercase
                    || candidate.starts_with(&lowercase)
                    || lowercase.starts_with(&candidate)
                    || edit_distance(&candidate, &lowercase) <= MAX_SUGGESTION_DISTANCE
            })
            .take(MAX_SUGGESTIONS)
            .cloned()
            .collect()
    }
}

/// Levenshtein distance over chars
fn edit_distance(a: &str, b: &str) -> usize {
    let b = b.chars().collect::<Vec<_>>();
    let mut prev = (0..=b.len()).collect::<Vec<_>>();
    let mut curr = vec![0; b.len() + 1];

    for (i, a_char) in a.chars().enumerate() {
        curr[0] = i + 1;
        for (j, b_char) in b.iter().enumerate() {
            let substitution = prev[j] + usize::from(a_char != *b_char);
            curr[j + 1] = substitution.min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}
