//! Memoized function wrappers and the memoize operation itself.
//!
//! [`CacheContext::wrap`] turns a function into a [`Memoized`] handle with
//! its own key-to-entry map and lock. Each call projects the arguments to a
//! key, answers from the map when possible, and otherwise times the
//! underlying computation and records the result. Every hit and miss ends
//! with a synchronous shrink pass on the owning context.
//!
//! Failures of the underlying function are the caller's problem, never the
//! cache's: a failed miss inserts nothing, a failed recompute-on-expiry
//! propagates and leaves the previous entry (value, size, timestamps)
//! untouched, so the next access retries. The cache layer itself surfaces no
//! errors of its own.

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::trace;

use crate::context::CacheContext;
use crate::deepsize::DeepSizeOf;
use crate::entry::{EntryMeta, Evictable};
use crate::key::CacheArgs;

/// One cached result plus what is needed to recompute it.
struct CacheEntry<A, V> {
	/// The arguments of the original call, kept for recompute-on-expiry.
	args: A,
	value: Arc<V>,
	meta: Arc<EntryMeta>,
	/// Registry slot id; lets a stale registry handle recognize that "its"
	/// entry was replaced.
	id: u64,
}

/// Shared state of one wrapped function: its compute closure and its
/// key-to-entry map. The map mutex is the "function lock" of the locking
/// discipline; every operation on this function's entries runs under it.
struct FnState<A: CacheArgs, V: 'static, E: 'static> {
	id: u64,
	compute: Arc<dyn Fn(&A) -> Result<V, E> + Send + Sync>,
	entries: Mutex<HashMap<A::Key, CacheEntry<A, V>, ahash::RandomState>>,
}

/// A memoized function.
///
/// Cloning is cheap and clones share the same cache. Results come back as
/// `Arc<V>`, which is safe to hold across `.await` points.
///
/// # Example
///
/// ```
/// use pressure_cache::CacheContext;
/// use std::sync::Arc;
///
/// let ctx = Arc::new(CacheContext::new());
/// let double = ctx.wrap(|x: &u64| x * 2);
///
/// assert_eq!(*double.call(21), 42);
/// assert_eq!(*double.call(21), 42); // served from cache
/// ```
pub struct Memoized<A: CacheArgs, V: 'static, E: 'static = Infallible> {
	state: Arc<FnState<A, V, E>>,
	ctx: Arc<CacheContext>,
}

impl<A: CacheArgs, V: 'static, E: 'static> Clone for Memoized<A, V, E> {
	fn clone(&self) -> Self {
		Self { state: Arc::clone(&self.state), ctx: Arc::clone(&self.ctx) }
	}
}

impl CacheContext {
	/// Wrap an infallible function in a memoizing cache layer.
	pub fn wrap<A, V, F>(self: &Arc<Self>, f: F) -> Memoized<A, V>
	where
		A: CacheArgs,
		V: DeepSizeOf + Send + Sync + 'static,
		F: Fn(&A) -> V + Send + Sync + 'static,
	{
		Memoized::new(Arc::clone(self), Arc::new(move |args: &A| Ok(f(args))))
	}

	/// Wrap a fallible function. Only successful results are cached; errors
	/// propagate to the caller unchanged.
	pub fn wrap_fallible<A, V, E, F>(self: &Arc<Self>, f: F) -> Memoized<A, V, E>
	where
		A: CacheArgs,
		V: DeepSizeOf + Send + Sync + 'static,
		E: 'static,
		F: Fn(&A) -> Result<V, E> + Send + Sync + 'static,
	{
		Memoized::new(Arc::clone(self), Arc::new(f))
	}
}

impl<A, V, E> Memoized<A, V, E>
where
	A: CacheArgs,
	V: DeepSizeOf + Send + Sync + 'static,
	E: 'static,
{
	fn new(ctx: Arc<CacheContext>, compute: Arc<dyn Fn(&A) -> Result<V, E> + Send + Sync>) -> Self {
		let state =
			Arc::new(FnState { id: ctx.next_fn_id(), compute, entries: Mutex::new(HashMap::default()) });
		Self { state, ctx }
	}

	/// Call the wrapped function through the cache.
	///
	/// Arguments that cannot be keyed bypass the cache entirely: the
	/// function runs directly and no entry is created. Otherwise a hit
	/// returns the cached result (recomputing first if the entry expired)
	/// and a miss computes, records, and returns. Either way the call ends
	/// with a synchronous shrink pass.
	pub fn try_call(&self, args: A) -> Result<Arc<V>, E> {
		self.try_call_with(args, None)
	}

	/// Like [`try_call`](Self::try_call), with a per-call expiration applied
	/// if this call creates the entry. An existing entry keeps the
	/// expiration it was created with.
	pub fn try_call_with(&self, args: A, expiration: Option<Duration>) -> Result<Arc<V>, E> {
		let Some(key) = args.cache_key() else {
			trace!(func = self.state.id, "unkeyable arguments, bypassing cache");
			self.ctx.note_bypass();
			return (self.state.compute)(&args).map(Arc::new);
		};

		let result = self.lookup_or_compute(key, args, expiration);
		if result.is_ok() {
			self.ctx.shrink(None);
		}
		result
	}

	fn lookup_or_compute(
		&self,
		key: A::Key,
		args: A,
		expiration: Option<Duration>,
	) -> Result<Arc<V>, E> {
		let mut entries = self.state.entries.lock();

		if let Some(entry) = entries.get_mut(&key) {
			let now = self.ctx.now_nanos();
			if entry.meta.expired(now) {
				// Sole healing path for stale entries. On failure the entry
				// is left exactly as it was, including timestamps.
				trace!(func = self.state.id, "entry expired, recomputing");
				let value = Arc::new((self.state.compute)(&entry.args)?);
				let old_size = entry.meta.size();
				let new_size = value.deep_size_of();
				entry.value = Arc::clone(&value);
				entry.meta.refresh(new_size, self.ctx.now_nanos());
				self.ctx.resize(old_size, new_size);
				self.ctx.note_hit();
				return Ok(value);
			}
			entry.meta.touch(now);
			let value = Arc::clone(&entry.value);
			self.ctx.note_hit();
			return Ok(value);
		}

		// Miss: time the computation, it feeds the eviction score.
		let started = Instant::now();
		let value = Arc::new((self.state.compute)(&args)?);
		let duration = started.elapsed();

		let size = value.deep_size_of();
		let meta = Arc::new(EntryMeta::new(size, duration, expiration, self.ctx.now_nanos()));
		let id = self.ctx.next_entry_id();
		let handle: Arc<dyn Evictable> = Arc::new(EntryHandle {
			state: Arc::downgrade(&self.state),
			key: key.clone(),
			id,
			meta: Arc::clone(&meta),
		});

		entries.insert(key, CacheEntry { args, value: Arc::clone(&value), meta, id });
		// Function lock is still held: function-then-registry lock order.
		self.ctx.register(id, handle, size);
		self.ctx.note_miss();
		trace!(func = self.state.id, size, ?duration, "cached new entry");

		Ok(value)
	}

	/// Remove every entry belonging to this function, from both its map and
	/// the global registry.
	pub fn clear_local(&self) {
		let mut entries = self.state.entries.lock();
		let mut ids = Vec::with_capacity(entries.len());
		let mut freed = 0usize;
		for entry in entries.values() {
			ids.push(entry.id);
			freed += entry.meta.size();
		}
		entries.clear();
		self.ctx.deregister(&ids, freed);
	}

	/// Number of live entries for this function.
	pub fn len(&self) -> usize {
		self.state.entries.lock().len()
	}

	/// Whether this function currently has no cached entries.
	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}

impl<A, V> Memoized<A, V>
where
	A: CacheArgs,
	V: DeepSizeOf + Send + Sync + 'static,
{
	/// Call the wrapped (infallible) function through the cache.
	pub fn call(&self, args: A) -> Arc<V> {
		match self.try_call(args) {
			Ok(value) => value,
			Err(infallible) => match infallible {},
		}
	}

	/// Like [`call`](Self::call), with a per-call expiration applied if this
	/// call creates the entry.
	pub fn call_with(&self, args: A, expiration: Duration) -> Arc<V> {
		match self.try_call_with(args, Some(expiration)) {
			Ok(value) => value,
			Err(infallible) => match infallible {},
		}
	}
}

/// Registry-side handle to one entry. Holds the shared metadata for
/// lock-free score reads and a weak path back to the owning map for
/// eviction.
struct EntryHandle<A: CacheArgs, V: 'static, E: 'static> {
	state: Weak<FnState<A, V, E>>,
	key: A::Key,
	id: u64,
	meta: Arc<EntryMeta>,
}

impl<A, V, E> Evictable for EntryHandle<A, V, E>
where
	A: CacheArgs,
	V: Send + Sync + 'static,
	E: 'static,
{
	fn score(&self, now: crate::entry::Nanos) -> f64 {
		self.meta.score(now)
	}

	fn size(&self) -> usize {
		self.meta.size()
	}

	fn evict(&self) -> Option<usize> {
		let state = self.state.upgrade()?;
		let mut entries = state.entries.lock();
		match entries.get(&self.key) {
			// Only evict the entry this handle was registered for; the key
			// may since have been repopulated with a fresh entry.
			Some(entry) if entry.id == self.id => {
				let size = entry.meta.size();
				entries.remove(&self.key);
				Some(size)
			}
			_ => None,
		}
	}
}
