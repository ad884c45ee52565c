//! Process-wide cache context: global registry, eviction engine, monitor
//! lifecycle, and configuration.
//!
//! A [`CacheContext`] owns nothing but an index: every live entry across all
//! wrapped functions is referenced (once) from the registry, while the
//! entries themselves live in their per-function maps. The registry exists
//! purely so one shrink pass can order entries of heterogeneous functions by
//! score and evict the least valuable first.
//!
//! Lock discipline, fixed across every call site: a function's lock is
//! always acquired before the registry lock, and the shrink pass never holds
//! the registry lock while taking a function lock (it snapshots handles,
//! sorts lock-free on atomic metadata, then evicts victims one at a time).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, LazyLock};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::entry::{Evictable, Nanos};
use crate::mem::{MemoryProbe, SysinfoProbe, usable_free_memory};
use crate::monitor::Monitor;

/// Wall-clock budget for one shrink pass. Bounds the latency a synchronous
/// eviction adds to a cache access.
const SHRINK_TIME_BUDGET: Duration = Duration::from_secs(1);

/// Snapshot of cache activity counters.
#[derive(Debug, Clone, Default)]
#[non_exhaustive]
pub struct CacheStats {
	/// Calls answered from the cache (including expiry-triggered recomputes).
	pub hits: u64,
	/// Calls that computed and inserted a new entry.
	pub misses: u64,
	/// Calls routed around the cache because the arguments had no key.
	pub bypasses: u64,
	/// Entries removed by the eviction engine.
	pub evictions: u64,
	/// Live entries across all wrapped functions.
	pub entries: usize,
	/// Estimated total footprint of all live entries, in bytes.
	pub current_size_bytes: usize,
}

impl CacheStats {
	/// Hit rate over all keyed calls, 0.0 when there were none.
	pub fn hit_rate(&self) -> f64 {
		let total = self.hits + self.misses;
		if total == 0 { 0.0 } else { self.hits as f64 / total as f64 }
	}
}

/// The memoization context: registry, eviction engine, and monitor.
///
/// Most programs use the process-wide handle returned by [`global()`]; tests
/// and embedders can build isolated contexts with their own memory probe via
/// [`CacheContext::with_probe`].
pub struct CacheContext {
	/// Index of every live entry, keyed by entry id. Does not own entries.
	registry: Mutex<HashMap<u64, Arc<dyn Evictable>, ahash::RandomState>>,
	/// Aggregate estimated size of all registered entries.
	total_size: AtomicUsize,
	/// Maximum cache-size-to-usable-free-memory ratio before eviction.
	target_ratio: Mutex<f64>,
	/// Serializes shrink passes from callers and the monitor.
	shrink_lock: Mutex<()>,
	probe: Box<dyn MemoryProbe>,
	monitor: Monitor,
	/// Origin for all entry timestamps.
	epoch: Instant,
	next_entry_id: AtomicU64,
	next_fn_id: AtomicU64,
	hits: AtomicU64,
	misses: AtomicU64,
	bypasses: AtomicU64,
	evictions: AtomicU64,
}

/// Default maximum ratio of cache footprint to usable free memory.
const DEFAULT_TARGET_RATIO: f64 = 1.0;

static GLOBAL: LazyLock<Arc<CacheContext>> = LazyLock::new(|| Arc::new(CacheContext::new()));

/// The process-wide cache context.
pub fn global() -> &'static Arc<CacheContext> {
	&GLOBAL
}

impl CacheContext {
	/// Create a context backed by the real system-memory probe.
	pub fn new() -> Self {
		Self::with_probe(Box::new(SysinfoProbe::new()))
	}

	/// Create a context with a custom memory probe.
	pub fn with_probe(probe: Box<dyn MemoryProbe>) -> Self {
		Self {
			registry: Mutex::new(HashMap::default()),
			total_size: AtomicUsize::new(0),
			target_ratio: Mutex::new(DEFAULT_TARGET_RATIO),
			shrink_lock: Mutex::new(()),
			probe,
			monitor: Monitor::new(),
			epoch: Instant::now(),
			next_entry_id: AtomicU64::new(0),
			next_fn_id: AtomicU64::new(0),
			hits: AtomicU64::new(0),
			misses: AtomicU64::new(0),
			bypasses: AtomicU64::new(0),
			evictions: AtomicU64::new(0),
		}
	}

	/// Ratio of the cache's estimated footprint to usable free memory.
	///
	/// Usable free memory reserves a tenth of total physical memory as
	/// headroom; when the reserve is already breached the ratio is infinite,
	/// which forces eviction rather than failing.
	pub fn memory_usage_ratio(&self) -> f64 {
		let usable = usable_free_memory(self.probe.as_ref());
		if usable <= 0.0 {
			return f64::INFINITY;
		}
		self.total_size.load(Ordering::Acquire) as f64 / usable
	}

	/// Run one eviction pass against `target` (or the configured target
	/// ratio when `None`).
	///
	/// Entries are ordered by score, most valuable first, and deleted from
	/// the tail until the ratio is back under target, the registry is empty,
	/// or the time budget elapses. Invoked synchronously on every cache hit
	/// and miss, and periodically by the monitor; both paths serialize here.
	pub fn shrink(&self, target: Option<f64>) {
		let target = target.unwrap_or_else(|| self.target_memory_use_ratio());
		let _pass = self.shrink_lock.lock();

		if self.memory_usage_ratio() <= target {
			return;
		}

		// Snapshot the registry, then sort without holding any lock: scores
		// read only atomic entry metadata.
		let mut victims: Vec<(f64, u64, Arc<dyn Evictable>)> = {
			let registry = self.registry.lock();
			let now = self.now_nanos();
			registry.iter().map(|(id, entry)| (entry.score(now), *id, Arc::clone(entry))).collect()
		};
		victims.sort_unstable_by(|a, b| {
			b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal)
		});

		let deadline = Instant::now() + SHRINK_TIME_BUDGET;
		let mut evicted = 0u64;
		let mut freed = 0usize;

		while self.memory_usage_ratio() > target && Instant::now() < deadline {
			let Some((score, id, entry)) = victims.pop() else { break };
			match entry.evict() {
				Some(size) => {
					self.registry.lock().remove(&id);
					self.total_size.fetch_sub(size, Ordering::AcqRel);
					self.evictions.fetch_add(1, Ordering::Relaxed);
					evicted += 1;
					freed += size;
					trace!(id, score, size, "evicted entry");
				}
				// Already removed from its map; drop the stale slot.
				None => {
					self.registry.lock().remove(&id);
				}
			}
		}

		if evicted > 0 {
			debug!(evicted, freed, ratio = self.memory_usage_ratio(), "shrink pass finished");
		}
		// Dropping the snapshot releases the last references to the evicted
		// values, returning their memory to the allocator now.
	}

	/// Delete every live entry across all wrapped functions.
	///
	/// The monitor, if running, is stopped for the duration and restarted
	/// afterwards.
	pub fn clear(self: &Arc<Self>) {
		let was_running = self.monitor.is_running();
		if was_running {
			self.stop_monitor();
		}

		let drained: Vec<Arc<dyn Evictable>> =
			{ self.registry.lock().drain().map(|(_, entry)| entry).collect() };
		for entry in &drained {
			if let Some(size) = entry.evict() {
				self.total_size.fetch_sub(size, Ordering::AcqRel);
			}
		}
		debug!(entries = drained.len(), "cache cleared");

		if was_running {
			self.start_monitor();
		}
	}

	/// Start the background monitor. No-op if it is already running.
	pub fn start_monitor(self: &Arc<Self>) {
		self.monitor.start(Arc::downgrade(self));
	}

	/// Stop the background monitor, blocking until its thread has exited.
	/// No-op if it is not running.
	pub fn stop_monitor(&self) {
		self.monitor.stop();
	}

	/// Whether the background monitor is currently running.
	pub fn monitor_running(&self) -> bool {
		self.monitor.is_running()
	}

	/// The configured target memory-use ratio.
	pub fn target_memory_use_ratio(&self) -> f64 {
		*self.target_ratio.lock()
	}

	/// Set the target memory-use ratio consulted by parameterless shrinks.
	pub fn set_target_memory_use_ratio(&self, ratio: f64) {
		*self.target_ratio.lock() = ratio;
	}

	/// Current activity counters.
	pub fn stats(&self) -> CacheStats {
		CacheStats {
			hits: self.hits.load(Ordering::Relaxed),
			misses: self.misses.load(Ordering::Relaxed),
			bypasses: self.bypasses.load(Ordering::Relaxed),
			evictions: self.evictions.load(Ordering::Relaxed),
			entries: self.registry.lock().len(),
			current_size_bytes: self.total_size.load(Ordering::Acquire),
		}
	}

	pub(crate) fn now_nanos(&self) -> Nanos {
		Nanos::try_from(self.epoch.elapsed().as_nanos()).unwrap_or(Nanos::MAX)
	}

	pub(crate) fn next_entry_id(&self) -> u64 {
		self.next_entry_id.fetch_add(1, Ordering::Relaxed)
	}

	pub(crate) fn next_fn_id(&self) -> u64 {
		self.next_fn_id.fetch_add(1, Ordering::Relaxed)
	}

	/// Register a freshly inserted entry. Called while the owning function's
	/// lock is held, preserving the function-then-registry lock order.
	pub(crate) fn register(&self, id: u64, entry: Arc<dyn Evictable>, size: usize) {
		self.registry.lock().insert(id, entry);
		self.total_size.fetch_add(size, Ordering::AcqRel);
	}

	/// Drop registry slots for entries already removed from their map.
	/// Called while the owning function's lock is held.
	pub(crate) fn deregister(&self, ids: &[u64], freed: usize) {
		let mut registry = self.registry.lock();
		for id in ids {
			registry.remove(id);
		}
		drop(registry);
		self.total_size.fetch_sub(freed, Ordering::AcqRel);
	}

	/// Apply a size delta after a recompute changed an entry's footprint.
	pub(crate) fn resize(&self, old: usize, new: usize) {
		if new >= old {
			self.total_size.fetch_add(new - old, Ordering::AcqRel);
		} else {
			self.total_size.fetch_sub(old - new, Ordering::AcqRel);
		}
	}

	pub(crate) fn note_hit(&self) {
		self.hits.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn note_miss(&self) {
		self.misses.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn note_bypass(&self) {
		self.bypasses.fetch_add(1, Ordering::Relaxed);
	}
}

impl Default for CacheContext {
	fn default() -> Self {
		Self::new()
	}
}

impl std::fmt::Debug for CacheContext {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("CacheContext")
			.field("entries", &self.registry.lock().len())
			.field("total_size", &self.total_size.load(Ordering::Acquire))
			.field("target_ratio", &self.target_memory_use_ratio())
			.field("monitor_running", &self.monitor.is_running())
			.finish()
	}
}
