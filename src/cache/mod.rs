//! Generic Resource Cache
//!
//! [`ResourceCache<D, K>`] maps [`ResourceHandle`]s to device objects of one
//! kind `K`. Producers on any thread queue work (`async_load`, `discard`,
//! `transact`); [`tick`](ResourceCache::tick) hands the queued work to the
//! render thread, which is the only place slots are created, replaced or
//! destroyed.
//!
//! # Slot states
//!
//! ```text
//!             async_load                tick (create ok)
//!  (absent) ────────────► queued ──────────────────────► Resident
//!     ▲                     │   └──── (create error) ──► Failed
//!     │        discard      │                               │
//!     ├◄────────────────────┘                               │
//!     └◄──────────── tick (discard drained) ◄───────────────┘
//! ```
//!
//! Within one tick discards are executed before creations, so
//! `discard(h); async_load(h, ..)` yields a fresh resource.
//!
//! # Locking
//!
//! The queue mutex is never acquired while the slot lock is held, so nested
//! acquisition always goes queues → slots. Producer-side reads are
//! recursive: a thread holding a `resolve` guard may keep calling the API
//! while the render thread waits for the write lock.

use std::marker::PhantomData;
use std::sync::Arc;

use parking_lot::{
    MappedRwLockReadGuard, MappedRwLockWriteGuard, Mutex, RwLock, RwLockReadGuard,
    RwLockWriteGuard,
};
use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;

use crate::device::RenderDevice;
use crate::errors::{Error, Result};
use crate::handle::ResourceHandle;
use crate::marshal::RenderThread;

/// Describes one kind of cached device object.
///
/// Implementors are zero-sized markers; the cache never instantiates them.
pub trait ResourceKind<D: RenderDevice>: 'static {
    /// Short kind name used in logs and errors.
    const KIND: &'static str;

    /// Immutable load request, moved into the queue.
    type Descriptor: Send + Sync + 'static;

    /// The resident object.
    type Resource: Send + Sync + 'static;

    /// Extra state handed to `create` (e.g. another cache).
    type Env: Clone + Send + Sync + 'static;

    /// Rejects malformed descriptors before anything is queued.
    fn validate(_descriptor: &Self::Descriptor) -> Result<()> {
        Ok(())
    }

    /// Builds the resource on the render thread.
    ///
    /// Returning [`Error::DependencyNotReady`] re-queues the request for the
    /// next tick; any other error caches a failed slot.
    fn create(
        device: &mut D,
        descriptor: &Self::Descriptor,
        env: &Self::Env,
        label: &str,
    ) -> Result<Self::Resource>;

    /// Releases the resource on the render thread.
    fn destroy(device: &mut D, resource: Self::Resource);
}

/// A resident resource and the name it was loaded under.
pub struct BackedResource<T> {
    pub resource: T,
    pub name: Option<String>,
}

pub enum Slot<T> {
    Resident(BackedResource<T>),
    /// Construction failed; not retried until the handle is discarded.
    Failed { reason: String },
}

struct Slots<T> {
    map: FxHashMap<ResourceHandle, Slot<T>>,
    fallback: T,
}

impl<T> Slots<T> {
    fn resident(&self, handle: ResourceHandle) -> Option<&T> {
        match self.map.get(&handle) {
            Some(Slot::Resident(backed)) => Some(&backed.resource),
            _ => None,
        }
    }
}

/// Re-queues of one request before a missing dependency is reported.
const DEPENDENCY_WARN_RETRIES: u32 = 30;

struct CreateRequest<Desc> {
    handle: ResourceHandle,
    name: Option<String>,
    descriptor: Desc,
    /// Ticks spent waiting for a dependency.
    retries: u32,
}

impl<Desc> CreateRequest<Desc> {
    fn label(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| self.handle.to_string())
    }
}

type Transaction<D, T> = Box<dyn FnOnce(&mut D, &mut T) + Send>;

struct Queues<D, Desc, T> {
    creates: Vec<CreateRequest<Desc>>,
    discards: Vec<ResourceHandle>,
    transacts: Vec<(ResourceHandle, Transaction<D, T>)>,
    /// Creations handed to the render thread but not finished yet.
    in_flight: FxHashSet<ResourceHandle>,
}

struct Shared<D: RenderDevice, K: ResourceKind<D>> {
    slots: RwLock<Slots<K::Resource>>,
    queues: Mutex<Queues<D, K::Descriptor, K::Resource>>,
    /// Handles already warned about since they were last resident.
    warned: Mutex<FxHashSet<ResourceHandle>>,
    env: K::Env,
    thread: RenderThread<D>,
    _kind: PhantomData<fn() -> K>,
}

/// Handle-indexed cache of one resource kind.
///
/// Cloning is cheap; clones share the same slots and queues.
pub struct ResourceCache<D: RenderDevice, K: ResourceKind<D>> {
    shared: Arc<Shared<D, K>>,
}

impl<D: RenderDevice, K: ResourceKind<D>> Clone for ResourceCache<D, K> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<D: RenderDevice, K: ResourceKind<D>> ResourceCache<D, K> {
    /// Creates an empty cache.
    ///
    /// `fallback` is what `resolve` hands out for any handle that is not
    /// resident; it must already be a valid device object.
    pub fn new(thread: RenderThread<D>, env: K::Env, fallback: K::Resource) -> Self {
        Self {
            shared: Arc::new(Shared {
                slots: RwLock::new(Slots {
                    map: FxHashMap::default(),
                    fallback,
                }),
                queues: Mutex::new(Queues {
                    creates: Vec::new(),
                    discards: Vec::new(),
                    transacts: Vec::new(),
                    in_flight: FxHashSet::default(),
                }),
                warned: Mutex::new(FxHashSet::default()),
                env,
                thread,
                _kind: PhantomData,
            }),
        }
    }

    #[inline]
    #[must_use]
    pub fn env(&self) -> &K::Env {
        &self.shared.env
    }

    #[inline]
    #[must_use]
    pub fn render_thread(&self) -> &RenderThread<D> {
        &self.shared.thread
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// `true` when a resident resource occupies the slot.
    #[must_use]
    pub fn is_valid(&self, handle: ResourceHandle) -> bool {
        self.shared.slots.read_recursive().resident(handle).is_some()
    }

    /// `true` when a creation request for `handle` is waiting for a tick.
    #[must_use]
    pub fn is_queued(&self, handle: ResourceHandle) -> bool {
        self.shared
            .queues
            .lock()
            .creates
            .iter()
            .any(|r| r.handle == handle)
    }

    /// How many ticks a queued creation has been waiting for a dependency.
    #[must_use]
    pub fn dependency_retries(&self, handle: ResourceHandle) -> Option<u32> {
        self.shared
            .queues
            .lock()
            .creates
            .iter()
            .find(|r| r.handle == handle)
            .map(|r| r.retries)
    }

    /// `true` when a destruction request for `handle` is waiting for a tick.
    #[must_use]
    pub fn is_discard_queued(&self, handle: ResourceHandle) -> bool {
        self.shared.queues.lock().discards.contains(&handle)
    }

    /// `true` when construction of `handle` failed and the failure is cached.
    #[must_use]
    pub fn is_failed(&self, handle: ResourceHandle) -> bool {
        matches!(
            self.shared.slots.read_recursive().map.get(&handle),
            Some(Slot::Failed { .. })
        )
    }

    /// The cached construction error of a failed slot.
    #[must_use]
    pub fn failure(&self, handle: ResourceHandle) -> Option<String> {
        match self.shared.slots.read_recursive().map.get(&handle) {
            Some(Slot::Failed { reason }) => Some(reason.clone()),
            _ => None,
        }
    }

    /// Name the resident resource was loaded under.
    #[must_use]
    pub fn name(&self, handle: ResourceHandle) -> Option<String> {
        match self.shared.slots.read_recursive().map.get(&handle) {
            Some(Slot::Resident(backed)) => backed.name.clone(),
            _ => None,
        }
    }

    /// Handles of all resident resources.
    #[must_use]
    pub fn handles(&self) -> Vec<ResourceHandle> {
        self.shared
            .slots
            .read_recursive()
            .map
            .iter()
            .filter(|(_, slot)| matches!(slot, Slot::Resident(_)))
            .map(|(&handle, _)| handle)
            .collect()
    }

    #[must_use]
    pub fn resident_count(&self) -> usize {
        self.shared
            .slots
            .read_recursive()
            .map
            .values()
            .filter(|slot| matches!(slot, Slot::Resident(_)))
            .count()
    }

    // ========================================================================
    // Access
    // ========================================================================

    /// Borrows the resident resource, or the fallback with a warning.
    ///
    /// The guard blocks the render thread from replacing slots of this cache
    /// while held; keep it short-lived.
    pub fn resolve(&self, handle: ResourceHandle) -> MappedRwLockReadGuard<'_, K::Resource> {
        let slots = self.shared.slots.read_recursive();
        if slots.resident(handle).is_none() {
            self.warn_fallback(handle, slots.map.get(&handle));
        }
        RwLockReadGuard::map(slots, |slots| match slots.map.get(&handle) {
            Some(Slot::Resident(backed)) => &backed.resource,
            _ => &slots.fallback,
        })
    }

    /// Mutable variant of [`resolve`](Self::resolve).
    ///
    /// For a non-resident handle this returns the fallback, which every other
    /// missing handle shares.
    pub fn resolve_mut(&self, handle: ResourceHandle) -> MappedRwLockWriteGuard<'_, K::Resource> {
        let slots = self.shared.slots.write();
        if slots.resident(handle).is_none() {
            self.warn_fallback(handle, slots.map.get(&handle));
        }
        RwLockWriteGuard::map(slots, |slots| match slots.map.get_mut(&handle) {
            Some(Slot::Resident(backed)) => &mut backed.resource,
            _ => &mut slots.fallback,
        })
    }

    /// Borrows several resident resources at once.
    ///
    /// Returns the first handle that is not resident instead of falling back.
    pub fn with_resident<R>(
        &self,
        handles: &[ResourceHandle],
        f: impl FnOnce(&[&K::Resource]) -> R,
    ) -> std::result::Result<R, ResourceHandle> {
        let slots = self.shared.slots.read_recursive();
        let mut resources: SmallVec<[&K::Resource; 4]> = SmallVec::with_capacity(handles.len());
        for &handle in handles {
            match slots.resident(handle) {
                Some(resource) => resources.push(resource),
                None => return Err(handle),
            }
        }
        Ok(f(&resources))
    }

    /// Visits every resident resource and collects what `f` returns.
    pub fn collect_resident<R>(
        &self,
        mut f: impl FnMut(ResourceHandle, Option<&str>, &K::Resource) -> Option<R>,
    ) -> Vec<R> {
        let slots = self.shared.slots.read_recursive();
        slots
            .map
            .iter()
            .filter_map(|(&handle, slot)| match slot {
                Slot::Resident(backed) => f(handle, backed.name.as_deref(), &backed.resource),
                Slot::Failed { .. } => None,
            })
            .collect()
    }

    fn warn_fallback(&self, handle: ResourceHandle, slot: Option<&Slot<K::Resource>>) {
        if !self.shared.warned.lock().insert(handle) {
            return;
        }
        match slot {
            Some(Slot::Failed { reason }) => log::warn!(
                "{} {handle} failed to build ({reason}); using fallback",
                K::KIND
            ),
            _ => log::warn!("{} {handle} is not resident; using fallback", K::KIND),
        }
    }

    // ========================================================================
    // Requests
    // ========================================================================

    /// Requests a resource identified by `name`. Never blocks.
    ///
    /// Returns the handle immediately; the resource becomes resident after a
    /// later [`tick`](Self::tick). Malformed descriptors are rejected here.
    pub fn async_load(
        &self,
        name: impl Into<String>,
        descriptor: K::Descriptor,
    ) -> Result<ResourceHandle> {
        let name = name.into();
        self.load_with_handle(ResourceHandle::from_name(&name), Some(name), descriptor)
    }

    /// Requests a resource under an explicit handle.
    ///
    /// If the handle is already resident, failed, queued or in flight (and
    /// no discard is pending), the request is dropped and the handle
    /// returned unchanged.
    pub fn load_with_handle(
        &self,
        handle: ResourceHandle,
        name: Option<String>,
        descriptor: K::Descriptor,
    ) -> Result<ResourceHandle> {
        if !handle.is_valid() {
            return Err(Error::invalid(K::KIND, "cannot load into the invalid handle"));
        }
        if let Err(err) = K::validate(&descriptor) {
            log::error!("Rejected {} load of {handle}: {err}", K::KIND);
            return Err(err);
        }

        let mut queues = self.shared.queues.lock();
        if queues.creates.iter().any(|r| r.handle == handle) {
            return Ok(handle);
        }
        let discard_pending = queues.discards.contains(&handle);
        if !discard_pending
            && (queues.in_flight.contains(&handle)
                || self.shared.slots.read_recursive().map.contains_key(&handle))
        {
            return Ok(handle);
        }

        log::debug!("Queued {} {handle} ({:?})", K::KIND, name);
        queues.creates.push(CreateRequest {
            handle,
            name,
            descriptor,
            retries: 0,
        });
        Ok(handle)
    }

    /// Releases a resource.
    ///
    /// A still-queued creation is cancelled. Otherwise a destruction request
    /// is queued unless one already is. Unknown handles are a no-op with a
    /// warning.
    pub fn discard(&self, handle: ResourceHandle) {
        if !handle.is_valid() {
            log::warn!("Discard of invalid {} handle ignored", K::KIND);
            return;
        }

        let mut queues = self.shared.queues.lock();
        let before = queues.creates.len();
        queues.creates.retain(|r| r.handle != handle);
        let cancelled = queues.creates.len() != before;

        let underlying = queues.in_flight.contains(&handle)
            || self.shared.slots.read_recursive().map.contains_key(&handle);
        if !underlying {
            if cancelled {
                log::debug!("Cancelled queued {} {handle}", K::KIND);
            } else {
                log::warn!("Discard of unknown {} {handle} ignored", K::KIND);
            }
            return;
        }
        if queues.discards.contains(&handle) {
            return;
        }
        queues.discards.push(handle);
    }

    /// Queues an in-place mutation, applied on the render thread after this
    /// tick's creations.
    ///
    /// The mutator runs with this cache's slot table write-locked; it must
    /// not resolve handles of the same cache.
    pub fn transact(
        &self,
        handle: ResourceHandle,
        mutator: impl FnOnce(&mut D, &mut K::Resource) + Send + 'static,
    ) {
        self.shared
            .queues
            .lock()
            .transacts
            .push((handle, Box::new(mutator)));
    }

    /// Queues destruction of every resident, failed or queued resource.
    pub fn discard_all(&self) {
        let mut handles: Vec<ResourceHandle> =
            self.shared.slots.read_recursive().map.keys().copied().collect();
        handles.extend(self.shared.queues.lock().creates.iter().map(|r| r.handle));
        for handle in handles {
            self.discard(handle);
        }
    }

    // ========================================================================
    // Tick
    // ========================================================================

    /// Hands all queued work to the render thread: discards, then creations,
    /// then transactions. Only enqueues; never waits.
    ///
    /// Returns the number of jobs submitted.
    pub fn tick(&self) -> usize {
        let (discards, creates, transacts) = {
            let mut guard = self.shared.queues.lock();
            let queues = &mut *guard;
            for request in &queues.creates {
                queues.in_flight.insert(request.handle);
            }
            (
                std::mem::take(&mut queues.discards),
                std::mem::take(&mut queues.creates),
                std::mem::take(&mut queues.transacts),
            )
        };
        let submitted = discards.len() + creates.len() + transacts.len();
        let thread = &self.shared.thread;

        for handle in discards {
            let shared = Arc::clone(&self.shared);
            thread.submit(move |device| Self::run_discard(&shared, device, handle));
        }
        for request in creates {
            let shared = Arc::clone(&self.shared);
            thread.submit(move |device| Self::run_create(&shared, device, request));
        }
        for (handle, mutator) in transacts {
            let shared = Arc::clone(&self.shared);
            thread.submit(move |device| Self::run_transact(&shared, device, handle, mutator));
        }
        submitted
    }

    fn run_discard(shared: &Shared<D, K>, device: &mut D, handle: ResourceHandle) {
        // A request re-queued by a dependency wait after this discard was
        // taken belongs to the discarded resource; fresh loads keep theirs.
        shared
            .queues
            .lock()
            .creates
            .retain(|r| r.handle != handle || r.retries == 0);
        let removed = shared.slots.write().map.remove(&handle);
        if let Some(Slot::Resident(backed)) = removed {
            log::debug!("Destroyed {} {handle}", K::KIND);
            K::destroy(device, backed.resource);
        }
    }

    fn run_create(
        shared: &Shared<D, K>,
        device: &mut D,
        request: CreateRequest<K::Descriptor>,
    ) {
        let _in_flight = InFlight {
            queues: &shared.queues,
            handle: request.handle,
        };
        let label = request.label();
        let handle = request.handle;

        let slot = match K::create(device, &request.descriptor, &shared.env, &label) {
            Ok(resource) => Slot::Resident(BackedResource {
                resource,
                name: request.name,
            }),
            Err(Error::DependencyNotReady(dependency)) => {
                let mut queues = shared.queues.lock();
                // Discarded while in flight: the discard consumes the request.
                if let Some(pos) = queues.discards.iter().position(|&h| h == handle) {
                    queues.discards.remove(pos);
                    log::debug!("Dropped {} '{label}': discarded while waiting", K::KIND);
                    return;
                }
                if queues.creates.iter().any(|r| r.handle == handle) {
                    return;
                }
                let mut request = request;
                request.retries += 1;
                if request.retries == DEPENDENCY_WARN_RETRIES {
                    log::warn!(
                        "{} '{label}' still waits for {dependency} after {} ticks",
                        K::KIND,
                        request.retries
                    );
                } else {
                    log::debug!("{} '{label}' waits for {dependency}; re-queued", K::KIND);
                }
                queues.creates.push(request);
                return;
            }
            Err(err) => {
                log::error!("Failed to create {} '{label}': {err}", K::KIND);
                Slot::Failed {
                    reason: err.to_string(),
                }
            }
        };

        let resident = matches!(slot, Slot::Resident(_));
        let previous = shared.slots.write().map.insert(handle, slot);
        if let Some(Slot::Resident(old)) = previous {
            K::destroy(device, old.resource);
        }
        if resident {
            shared.warned.lock().remove(&handle);
            log::debug!("Created {} '{label}' as {handle}", K::KIND);
        }
    }

    fn run_transact(
        shared: &Shared<D, K>,
        device: &mut D,
        handle: ResourceHandle,
        mutator: Transaction<D, K::Resource>,
    ) {
        let mut slots = shared.slots.write();
        match slots.map.get_mut(&handle) {
            Some(Slot::Resident(backed)) => mutator(device, &mut backed.resource),
            _ => log::warn!("Transaction on non-resident {} {handle} dropped", K::KIND),
        }
    }
}

/// Clears the in-flight mark when a creation job finishes, even by panic.
struct InFlight<'a, D, Desc, T> {
    queues: &'a Mutex<Queues<D, Desc, T>>,
    handle: ResourceHandle,
}

impl<D, Desc, T> Drop for InFlight<'_, D, Desc, T> {
    fn drop(&mut self) {
        self.queues.lock().in_flight.remove(&self.handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::HeadlessDevice;
    use crate::settings::MarshalSettings;

    /// Resource kind whose descriptor is the value to store.
    struct Numbers;

    impl ResourceKind<HeadlessDevice> for Numbers {
        const KIND: &'static str = "number";
        type Descriptor = i64;
        type Resource = i64;
        type Env = ();

        fn validate(descriptor: &i64) -> Result<()> {
            if *descriptor < 0 {
                return Err(Error::invalid(Self::KIND, "negative"));
            }
            Ok(())
        }

        fn create(_: &mut HeadlessDevice, descriptor: &i64, _: &(), label: &str) -> Result<i64> {
            if *descriptor == 13 {
                return Err(Error::Construction {
                    kind: Self::KIND,
                    label: label.to_owned(),
                    reason: "unlucky".into(),
                });
            }
            Ok(*descriptor)
        }

        fn destroy(_: &mut HeadlessDevice, _: i64) {}
    }

    fn cache() -> ResourceCache<HeadlessDevice, Numbers> {
        let thread =
            RenderThread::spawn(HeadlessDevice::new(), &MarshalSettings::default()).unwrap();
        ResourceCache::new(thread, (), -1)
    }

    fn flush(cache: &ResourceCache<HeadlessDevice, Numbers>) {
        cache.tick();
        cache.render_thread().wait_idle();
    }

    #[test]
    fn test_load_then_tick_becomes_resident() {
        let cache = cache();
        let h = cache.async_load("answer", 42).unwrap();
        assert!(cache.is_queued(h));
        assert!(!cache.is_valid(h));
        assert_eq!(*cache.resolve(h), -1);

        flush(&cache);
        assert!(cache.is_valid(h));
        assert!(!cache.is_queued(h));
        assert_eq!(*cache.resolve(h), 42);
        assert_eq!(cache.name(h).as_deref(), Some("answer"));
    }

    #[test]
    fn test_invalid_descriptor_rejected_without_queueing() {
        let cache = cache();
        assert!(matches!(
            cache.async_load("bad", -5),
            Err(Error::InvalidDescriptor { .. })
        ));
        assert!(!cache.is_queued(ResourceHandle::from_name("bad")));
    }

    #[test]
    fn test_failed_creation_is_cached() {
        let cache = cache();
        let h = cache.async_load("unlucky", 13).unwrap();
        flush(&cache);
        assert!(cache.is_failed(h));
        assert!(!cache.is_valid(h));

        // Not retried until discarded.
        cache.async_load("unlucky", 13).unwrap();
        assert!(!cache.is_queued(h));

        cache.discard(h);
        flush(&cache);
        assert!(!cache.is_failed(h));
    }

    #[test]
    fn test_transact_runs_after_creation() {
        let cache = cache();
        let h = cache.async_load("counter", 1).unwrap();
        cache.transact(h, |_, value| *value += 10);
        flush(&cache);
        assert_eq!(*cache.resolve(h), 11);
    }

    #[test]
    fn test_resolve_mut_writes_through() {
        let cache = cache();
        let h = cache.async_load("value", 3).unwrap();
        flush(&cache);
        *cache.resolve_mut(h) = 9;
        assert_eq!(*cache.resolve(h), 9);
    }

    #[test]
    fn test_with_resident_reports_missing_handle() {
        let cache = cache();
        let a = cache.async_load("a", 1).unwrap();
        let b = ResourceHandle::from_name("b");
        flush(&cache);

        assert_eq!(cache.with_resident(&[a], |r| *r[0]), Ok(1));
        assert_eq!(cache.with_resident(&[a, b], |r| r.len()), Err(b));
    }

    #[test]
    fn test_discard_all_empties_cache() {
        let cache = cache();
        cache.async_load("a", 1).unwrap();
        cache.async_load("b", 2).unwrap();
        flush(&cache);
        cache.async_load("c", 3).unwrap();

        cache.discard_all();
        flush(&cache);
        assert_eq!(cache.resident_count(), 0);
        assert!(cache.handles().is_empty());
    }
}
