use parking_lot::{Mutex, ReentrantMutex};
use std::{
    cell::Cell,
    cmp::Reverse,
    collections::{BTreeMap, BTreeSet},
    mem,
    sync::Arc,
};
use tracing::{debug, warn};

use crate::{any::Bean, errors::DestroyFailure, hook::NamedHook};

#[derive(Clone)]
enum Slot {
    /// Constructor is running
    Initializing,
    /// Constructed, not wired or initialized yet. Only the constructing thread can see it
    Allocated(Bean),
    Ready(Bean),
}

/// A finished creation, kept for teardown.
struct Record {
    name: String,
    /// Creation start sequence
    seq: u64,
    /// Bean as constructed, before post-processors
    raw: Bean,
    dependencies: Vec<String>,
    destroy: Option<NamedHook>,
}

/// What the constructing code hands back to the cache.
pub(crate) struct Created {
    pub(crate) bean: Bean,
    pub(crate) raw: Bean,
    pub(crate) dependencies: Vec<String>,
    pub(crate) destroy: Option<NamedHook>,
}

/// Outcome of destroying instances.
#[derive(Default)]
pub(crate) struct Teardown {
    /// Names in destruction order
    pub(crate) destroyed: Vec<String>,
    pub(crate) failures: Vec<DestroyFailure>,
}

impl Teardown {
    pub(crate) fn extend(&mut self, other: Teardown) {
        self.destroyed.extend(other.destroyed);
        self.failures.extend(other.failures);
    }
}

/// Failure of [`InstanceCache::get_or_create`].
pub(crate) enum CacheError<E> {
    /// The bean is being constructed by the current thread
    Cycle,
    Create(E),
}

#[derive(Default)]
struct State {
    slots: BTreeMap<String, Slot>,
    records: Vec<Record>,
    next_seq: u64,
}

/// Instances of one scope (the singleton scope, or one request or session).
///
/// Absent names are uninitialized: a failed creation leaves nothing behind, so the next request retries.
pub(crate) struct InstanceCache {
    state: Mutex<State>,
    /// Shared by all caches of a factory, reentrant so the constructing thread can reach the beans it's building
    creation: Arc<ReentrantMutex<()>>,
}

impl InstanceCache {
    #[must_use]
    pub(crate) fn new(creation: Arc<ReentrantMutex<()>>) -> Self {
        Self {
            state: Mutex::new(State::default()),
            creation,
        }
    }

    /// Ready instance of `name`, if any
    #[must_use]
    pub(crate) fn get(&self, name: &str) -> Option<Bean> {
        match self.state.lock().slots.get(name) {
            Some(Slot::Ready(bean)) => Some(bean.clone()),
            _ => None,
        }
    }

    /// Returns the cached instance of `name` or constructs it with `create` at most once.
    ///
    /// Concurrent callers for a bean under construction block until it's ready or its construction failed,
    /// in which case they construct it themselves.
    /// The constructing thread gets the early reference of an allocated bean, and [`CacheError::Cycle`]
    /// if it reaches a bean whose constructor is still running.
    pub(crate) fn get_or_create<E>(
        &self,
        name: &str,
        create: impl FnOnce(&Creation<'_>) -> Result<Created, E>,
    ) -> Result<Bean, CacheError<E>> {
        if let Some(bean) = self.get(name) {
            debug!("Found in cache");
            return Ok(bean);
        }

        let _guard = self.creation.lock();

        let seq = {
            let mut state = self.state.lock();
            match state.slots.get(name) {
                Some(Slot::Ready(bean)) => {
                    debug!("Found in cache");
                    return Ok(bean.clone());
                }
                Some(Slot::Allocated(bean)) => {
                    debug!("Found early reference");
                    return Ok(bean.clone());
                }
                Some(Slot::Initializing) => return Err(CacheError::Cycle),
                None => {}
            }

            state.slots.insert(name.to_owned(), Slot::Initializing);
            state.next_seq += 1;
            state.next_seq
        };

        let creation = Creation {
            cache: self,
            name,
            seq,
            finished: false.into(),
        };
        let created = create(&creation).map_err(CacheError::Create)?;
        let bean = created.bean.clone();

        {
            let mut state = self.state.lock();
            state.slots.insert(name.to_owned(), Slot::Ready(bean.clone()));
            state.records.push(Record {
                name: name.to_owned(),
                seq,
                raw: created.raw,
                dependencies: created.dependencies,
                destroy: created.destroy,
            });
        }
        creation.finish();

        Ok(bean)
    }

    /// Forgets a failed creation started at `seq` with everything created during it.
    fn rollback(&self, name: &str, seq: u64) {
        let nested = {
            let mut state = self.state.lock();
            state.slots.remove(name);

            let (nested, kept) = state.records.drain(..).partition::<Vec<_>, _>(|record| record.seq > seq);
            state.records = kept;
            for record in &nested {
                state.slots.remove(&record.name);
            }
            nested
        };

        if !nested.is_empty() {
            debug!(bean = name, count = nested.len(), "Discarding beans created during failed creation");
        }
        for failure in destroy_records(nested).failures {
            warn!(%failure, "Destroy hook failed");
        }
    }

    /// Names of ready instances
    #[must_use]
    pub(crate) fn names(&self) -> Vec<String> {
        self.state.lock().records.iter().map(|record| record.name.clone()).collect()
    }

    #[must_use]
    pub(crate) fn len(&self) -> usize {
        self.state.lock().records.len()
    }

    /// Drops the instance of `name` after running its destroy hook
    pub(crate) fn evict(&self, name: &str) -> Teardown {
        let record = {
            let mut state = self.state.lock();
            state.slots.remove(name);
            match state.records.iter().position(|record| record.name == name) {
                Some(index) => state.records.remove(index),
                None => return Teardown::default(),
            }
        };

        destroy_records(vec![record])
    }

    /// Drops every instance, dependencies before their dependents and otherwise in reverse creation order,
    /// running all destroy hooks and collecting their failures.
    pub(crate) fn destroy_all(&self) -> Teardown {
        let records = {
            let mut state = self.state.lock();
            state.slots.clear();
            mem::take(&mut state.records)
        };

        destroy_records(records)
    }
}

fn destroy_records(records: Vec<Record>) -> Teardown {
    let mut teardown = Teardown::default();

    for record in destroy_order(records) {
        if let Some(hook) = &record.destroy {
            match hook.call(record.raw.clone()) {
                Ok(()) => debug!(bean = %record.name, hook = hook.name(), "Destroyed"),
                Err(error) => {
                    warn!(bean = %record.name, hook = hook.name(), %error, "Destroy hook failed");
                    teardown.failures.push(DestroyFailure {
                        name: record.name.clone(),
                        hook: hook.name().to_owned(),
                        error,
                    });
                }
            }
        } else {
            debug!(bean = %record.name, "Destroyed");
        }
        teardown.destroyed.push(record.name);
    }

    teardown
}

/// Post-order walk over recorded dependencies, roots taken latest created first.
fn destroy_order(mut records: Vec<Record>) -> Vec<Record> {
    records.sort_by_key(|record| Reverse(record.seq));

    let index = records
        .iter()
        .enumerate()
        .map(|(position, record)| (record.name.clone(), position))
        .collect::<BTreeMap<_, _>>();

    fn visit(
        position: usize,
        records: &[Record],
        index: &BTreeMap<String, usize>,
        visited: &mut BTreeSet<usize>,
        order: &mut Vec<usize>,
    ) {
        if !visited.insert(position) {
            return;
        }
        for dependency in &records[position].dependencies {
            if let Some(&dependency) = index.get(dependency) {
                visit(dependency, records, index, visited, order);
            }
        }
        order.push(position);
    }

    let mut visited = BTreeSet::new();
    let mut order = Vec::with_capacity(records.len());
    for position in 0..records.len() {
        visit(position, &records, &index, &mut visited, &mut order);
    }

    let mut records = records.into_iter().map(Some).collect::<Vec<_>>();
    order.into_iter().filter_map(|position| records[position].take()).collect()
}

/// An in-progress creation. Dropping it unfinished, by error or panic, rolls the creation back.
pub(crate) struct Creation<'a> {
    cache: &'a InstanceCache,
    name: &'a str,
    seq: u64,
    finished: Cell<bool>,
}

impl Creation<'_> {
    /// Makes the constructed bean visible to the constructing thread before it's wired
    pub(crate) fn publish_early(&self, bean: Bean) {
        self.cache
            .state
            .lock()
            .slots
            .insert(self.name.to_owned(), Slot::Allocated(bean));
    }

    fn finish(&self) {
        self.finished.set(true);
    }
}

impl Drop for Creation<'_> {
    fn drop(&mut self) {
        if !self.finished.get() {
            self.cache.rollback(self.name, self.seq);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{CacheError, Created, InstanceCache};
    use crate::{any::Bean, errors::InstantiateErrorKind, hook::NamedHook};

    use parking_lot::{Mutex, ReentrantMutex};
    use std::{
        sync::{
            atomic::{AtomicU8, Ordering},
            Arc,
        },
        thread,
    };
    use tracing_test::traced_test;

    struct Bean1(&'static str);

    fn cache() -> InstanceCache {
        InstanceCache::new(Arc::new(ReentrantMutex::new(())))
    }

    fn created(name: &'static str, dependencies: &[&str], log: &Arc<Mutex<Vec<&'static str>>>) -> Created {
        let bean = Arc::new(Bean1(name)) as Bean;
        let log = log.clone();
        Created {
            bean: bean.clone(),
            raw: bean,
            dependencies: dependencies.iter().map(|name| (*name).to_owned()).collect(),
            destroy: Some(NamedHook::new("close", move |bean: &Bean1| {
                log.lock().push(bean.0);
                Ok::<_, InstantiateErrorKind>(())
            })),
        }
    }

    #[test]
    #[traced_test]
    fn test_created_once() {
        let cache = cache();
        let log = Arc::new(Mutex::new(Vec::new()));
        let call_count = AtomicU8::new(0);

        let beans = (0..2)
            .map(|_| {
                cache
                    .get_or_create("a", |_| {
                        call_count.fetch_add(1, Ordering::SeqCst);
                        Ok::<_, ()>(created("a", &[], &log))
                    })
                    .ok()
                    .unwrap()
            })
            .collect::<Vec<_>>();

        assert!(Arc::ptr_eq(&beans[0], &beans[1]));
        assert_eq!(call_count.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    #[traced_test]
    fn test_failure_leaves_nothing() {
        let cache = cache();
        let log = Arc::new(Mutex::new(Vec::new()));

        let result = cache.get_or_create("a", |_| Err::<Created, _>("boom"));
        assert!(matches!(result, Err(CacheError::Create("boom"))));
        assert!(cache.get("a").is_none());

        cache
            .get_or_create("a", |_| Ok::<_, ()>(created("a", &[], &log)))
            .ok()
            .unwrap();
        assert!(cache.get("a").is_some());
    }

    #[test]
    #[traced_test]
    fn test_nested_creations_rolled_back() {
        let cache = cache();
        let log = Arc::new(Mutex::new(Vec::new()));

        let result = cache.get_or_create("a", |_| {
            cache
                .get_or_create("b", |_| Ok::<_, ()>(created("b", &[], &log)))
                .ok()
                .unwrap();
            Err::<Created, _>(())
        });

        assert!(result.is_err());
        assert!(cache.get("b").is_none());
        assert_eq!(*log.lock(), ["b"]);
    }

    #[test]
    #[traced_test]
    fn test_reentry_is_cycle_and_early_reference_visible() {
        let cache = cache();
        let log = Arc::new(Mutex::new(Vec::new()));

        let result = cache.get_or_create("a", |creation| {
            assert!(matches!(
                cache.get_or_create("a", |_| Ok::<_, ()>(created("a", &[], &log))),
                Err(CacheError::Cycle)
            ));

            let a = created("a", &[], &log);
            creation.publish_early(a.bean.clone());

            let early = cache.get_or_create("a", |_| Err(())).ok().unwrap();
            assert!(Arc::ptr_eq(&early, &a.bean));
            // Not ready for other lookups
            assert!(cache.get("a").is_none());

            Ok::<_, ()>(a)
        });

        assert!(result.is_ok());
        assert!(cache.get("a").is_some());
    }

    #[test]
    #[traced_test]
    fn test_destroy_dependencies_first() {
        let cache = cache();
        let log = Arc::new(Mutex::new(Vec::new()));

        // a -> b -> c, requested through a
        cache
            .get_or_create("a", |_| {
                cache
                    .get_or_create("b", |_| {
                        cache
                            .get_or_create("c", |_| Ok::<_, ()>(created("c", &[], &log)))
                            .ok()
                            .unwrap();
                        Ok::<_, ()>(created("b", &["c"], &log))
                    })
                    .ok()
                    .unwrap();
                Ok::<_, ()>(created("a", &["b"], &log))
            })
            .ok()
            .unwrap();
        cache
            .get_or_create("x", |_| Ok::<_, ()>(created("x", &[], &log)))
            .ok()
            .unwrap();
        cache
            .get_or_create("y", |_| Ok::<_, ()>(created("y", &[], &log)))
            .ok()
            .unwrap();

        let teardown = cache.destroy_all();
        assert!(teardown.failures.is_empty());
        assert_eq!(teardown.destroyed, ["y", "x", "c", "b", "a"]);
        assert_eq!(*log.lock(), ["y", "x", "c", "b", "a"]);
        assert_eq!(cache.len(), 0);
    }

    #[test]
    #[traced_test]
    fn test_destroy_collects_failures() {
        let cache = cache();

        for name in ["a", "b"] {
            cache
                .get_or_create(name, |_| {
                    let bean = Arc::new(Bean1(name)) as Bean;
                    Ok::<_, ()>(Created {
                        bean: bean.clone(),
                        raw: bean,
                        dependencies: Vec::new(),
                        destroy: Some(NamedHook::new("close", |_: &Bean1| Err::<(), _>(anyhow::anyhow!("busy")))),
                    })
                })
                .ok()
                .unwrap();
        }

        let failures = cache.destroy_all().failures;
        assert_eq!(failures.len(), 2);
        assert_eq!(failures[0].name, "b");
        assert_eq!(failures[1].name, "a");
    }

    #[test]
    #[traced_test]
    fn test_concurrent_first_access() {
        let cache = Arc::new(cache());
        let log = Arc::new(Mutex::new(Vec::new()));
        let call_count = Arc::new(AtomicU8::new(0));

        let handles = (0..8)
            .map(|_| {
                let cache = cache.clone();
                let log = log.clone();
                let call_count = call_count.clone();
                thread::spawn(move || {
                    cache
                        .get_or_create("a", |_| {
                            call_count.fetch_add(1, Ordering::SeqCst);
                            thread::yield_now();
                            Ok::<_, ()>(created("a", &[], &log))
                        })
                        .ok()
                        .unwrap()
                })
            })
            .collect::<Vec<_>>();
        let beans = handles.into_iter().map(|handle| handle.join().unwrap()).collect::<Vec<_>>();

        assert_eq!(call_count.load(Ordering::SeqCst), 1);
        assert!(beans.iter().all(|bean| Arc::ptr_eq(bean, &beans[0])));
    }

    #[test]
    #[traced_test]
    fn test_evict() {
        let cache = cache();
        let log = Arc::new(Mutex::new(Vec::new()));

        cache
            .get_or_create("a", |_| Ok::<_, ()>(created("a", &[], &log)))
            .ok()
            .unwrap();

        assert_eq!(cache.evict("a").destroyed, ["a"]);
        assert!(cache.get("a").is_none());
        assert_eq!(*log.lock(), ["a"]);
        assert!(cache.evict("a").destroyed.is_empty());
    }
}
