use parking_lot::{Mutex, ReentrantMutex};
use std::{collections::BTreeMap, fmt, str::FromStr, sync::Arc};
use tracing::debug;

use crate::{
    cache::{InstanceCache, Teardown},
    errors::{DestroyErrorKind, DestroyFailure, ResolveErrorKind, ScopeErrorKind},
};

/// Caching policy of a bean.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Scope {
    /// One instance for the lifetime of the container
    #[default]
    Singleton,
    /// A new instance on every request, owned by the caller
    Prototype,
    /// One instance per request id
    Request,
    /// One instance per session id
    Session,
}

impl Scope {
    #[inline]
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Scope::Singleton => "singleton",
            Scope::Prototype => "prototype",
            Scope::Request => "request",
            Scope::Session => "session",
        }
    }

    /// Whether instances live in a scope ended from outside the container
    #[inline]
    #[must_use]
    pub const fn is_external(&self) -> bool {
        matches!(self, Scope::Request | Scope::Session)
    }

    /// Whether an instance of this scope may keep a reference to a `dependency` bean
    /// without outliving it. Prototypes are owned by the caller and take part in no such constraint.
    #[inline]
    #[must_use]
    pub const fn can_depend_on(&self, dependency: Scope) -> bool {
        match (self.lifetime(), dependency.lifetime()) {
            (Some(own), Some(other)) => own <= other,
            _ => true,
        }
    }

    const fn lifetime(&self) -> Option<u8> {
        match self {
            Scope::Singleton => Some(2),
            Scope::Session => Some(1),
            Scope::Request => Some(0),
            Scope::Prototype => None,
        }
    }

    #[inline]
    #[must_use]
    pub const fn all() -> [Self; 4] {
        use Scope::{Prototype, Request, Session, Singleton};

        [Singleton, Prototype, Request, Session]
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Scope {
    type Err = ScopeErrorKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::all()
            .into_iter()
            .find(|scope| scope.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ScopeErrorKind::Unknown { name: s.to_owned() })
    }
}

/// Ids of the external scopes active for a lookup, supplied by the surrounding layer (a web server, for example).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ScopeContext {
    request: Option<String>,
    session: Option<String>,
}

impl ScopeContext {
    /// No external scope is active
    #[inline]
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    #[inline]
    #[must_use]
    pub fn request(id: impl Into<String>) -> Self {
        Self::none().with_request(id)
    }

    #[inline]
    #[must_use]
    pub fn session(id: impl Into<String>) -> Self {
        Self::none().with_session(id)
    }

    #[inline]
    #[must_use]
    pub fn with_request(mut self, id: impl Into<String>) -> Self {
        self.request = Some(id.into());
        self
    }

    #[inline]
    #[must_use]
    pub fn with_session(mut self, id: impl Into<String>) -> Self {
        self.session = Some(id.into());
        self
    }

    /// Id of the active `scope`, only external scopes have one
    #[must_use]
    pub fn id(&self, scope: Scope) -> Option<&str> {
        match scope {
            Scope::Request => self.request.as_deref(),
            Scope::Session => self.session.as_deref(),
            Scope::Singleton | Scope::Prototype => None,
        }
    }
}

/// Instance caches of every scope.
///
/// Singletons live in one cache for the manager's lifetime,
/// request and session instances in a cache per scope id, created on first use and dropped by [`ScopeManager::end_scope`].
/// Prototypes aren't cached.
///
/// All caches share one reentrant creation lock: wired beans may reference each other,
/// so per-bean locks couldn't be taken in a consistent order.
pub struct ScopeManager {
    creation: Arc<ReentrantMutex<()>>,
    singletons: Arc<InstanceCache>,
    scoped: Mutex<BTreeMap<(Scope, String), Arc<InstanceCache>>>,
}

impl ScopeManager {
    #[must_use]
    pub fn new() -> Self {
        let creation = Arc::new(ReentrantMutex::new(()));
        Self {
            singletons: Arc::new(InstanceCache::new(creation.clone())),
            creation,
            scoped: Mutex::new(BTreeMap::new()),
        }
    }

    /// Cache holding instances of the bean `name` with `scope`, `None` for prototypes.
    ///
    /// # Errors
    /// - [`ResolveErrorKind::ScopeNotActive`] if `context` carries no id for the bean's external scope
    pub(crate) fn cache_for(
        &self,
        name: &str,
        scope: Scope,
        context: &ScopeContext,
    ) -> Result<Option<Arc<InstanceCache>>, ResolveErrorKind> {
        match scope {
            Scope::Singleton => Ok(Some(self.singletons.clone())),
            Scope::Prototype => Ok(None),
            Scope::Request | Scope::Session => {
                let Some(id) = context.id(scope) else {
                    return Err(ResolveErrorKind::ScopeNotActive {
                        name: name.to_owned(),
                        scope: scope.name(),
                    });
                };

                let mut scoped = self.scoped.lock();
                let cache = scoped
                    .entry((scope, id.to_owned()))
                    .or_insert_with(|| {
                        debug!(scope = scope.name(), id, "Scope started");
                        Arc::new(InstanceCache::new(self.creation.clone()))
                    })
                    .clone();
                Ok(Some(cache))
            }
        }
    }

    #[inline]
    #[must_use]
    pub(crate) fn singletons(&self) -> &InstanceCache {
        &self.singletons
    }

    /// Ends the external scope `id`, running destroy hooks of its instances.
    /// Ending a scope that has no instances is a no-op.
    ///
    /// # Errors
    /// - [`DestroyErrorKind::Hooks`] with every failed hook; all hooks run regardless
    pub fn end_scope(&self, scope: Scope, id: &str) -> Result<(), DestroyErrorKind> {
        into_result(self.end_scope_teardown(scope, id).failures)
    }

    pub(crate) fn end_scope_teardown(&self, scope: Scope, id: &str) -> Teardown {
        let Some(cache) = self.scoped.lock().remove(&(scope, id.to_owned())) else {
            return Teardown::default();
        };

        debug!(scope = scope.name(), id = %id, "Scope ended");
        cache.destroy_all()
    }

    /// Destroys every singleton and every instance of still active external scopes.
    ///
    /// Longer-lived scopes go first: a bean only depends on beans living at least as long,
    /// so dependencies are destroyed before their dependents across caches too.
    pub(crate) fn destroy_all(&self) -> Teardown {
        let scoped = std::mem::take(&mut *self.scoped.lock());

        let mut teardown = self.singletons.destroy_all();
        for ended in [Scope::Session, Scope::Request] {
            for ((scope, id), cache) in scoped.iter().rev().filter(|((scope, _), _)| *scope == ended) {
                debug!(scope = scope.name(), id = %id, "Scope ended");
                teardown.extend(cache.destroy_all());
            }
        }
        teardown
    }

    /// Number of ready singletons
    #[must_use]
    pub fn singleton_count(&self) -> usize {
        self.singletons.len()
    }

    /// Names of ready singletons in creation order
    #[must_use]
    pub fn singleton_names(&self) -> Vec<String> {
        self.singletons.names()
    }

    /// Number of request and session scopes with live instances
    #[must_use]
    pub fn active_scopes(&self) -> usize {
        self.scoped.lock().len()
    }
}

impl Default for ScopeManager {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) fn into_result(failures: Vec<DestroyFailure>) -> Result<(), DestroyErrorKind> {
    if failures.is_empty() {
        Ok(())
    } else {
        Err(DestroyErrorKind::Hooks { failures })
    }
}
