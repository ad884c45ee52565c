//! # pressure-cache
//!
//! A memoizing cache with **memory-pressure-driven eviction**: wrap a
//! function and repeated calls with the same arguments are answered from a
//! cache, while a global scoring engine keeps the total estimated footprint
//! of all cached results within a configurable fraction of the machine's
//! usable free memory.
//!
//! Entries are valued by how expensive they are to have recomputed, relative
//! to how recently they were used:
//!
//! ```text
//! score = (size_bytes * computation_seconds) / age_seconds²
//! ```
//!
//! When the cache's footprint exceeds the target fraction of usable free
//! memory, a shrink pass deletes the lowest-scoring entries first. The pass
//! runs synchronously on every cache access (bounded by a one-second budget)
//! and, optionally, from a background monitor thread on a jittered interval.
//!
//! ## Quick start
//!
//! ```rust
//! use pressure_cache::{clear_cache, wrap};
//!
//! let factorial = wrap(|n: &u64| (1..=*n).product::<u64>());
//!
//! let a = factorial.call(10); // computed
//! let b = factorial.call(10); // cached
//! assert_eq!(a, b);
//! # clear_cache();
//! ```
//!
//! ## Unkeyable arguments
//!
//! Arguments that have no stable hashable projection (wrapped in
//! [`Unkeyed`]) bypass the cache: the function runs directly and nothing is
//! recorded. Cache-layer behavior never surfaces as an error; only the
//! wrapped function's own failures reach the caller (see
//! [`CacheContext::wrap_fallible`]).
//!
//! ## Contexts
//!
//! The free functions in this module act on the process-wide
//! [`CacheContext`] returned by [`global()`]. Tests and embedders that want
//! isolation can build their own context, with their own
//! [`MemoryProbe`](mem::MemoryProbe), and wrap functions through it
//! directly.

mod context;
pub mod deepsize;
mod entry;
mod key;
pub mod mem;
mod memo;
mod monitor;

pub use context::{CacheContext, CacheStats, global};
pub use deepsize::{Context, DeepSizeOf};
pub use key::{CacheArgs, Unkeyed};
pub use memo::Memoized;

/// Memoize `f` through the process-wide context.
pub fn wrap<A, V, F>(f: F) -> Memoized<A, V>
where
	A: CacheArgs,
	V: DeepSizeOf + Send + Sync + 'static,
	F: Fn(&A) -> V + Send + Sync + 'static,
{
	global().wrap(f)
}

/// Memoize a fallible `f` through the process-wide context. Only successful
/// results are cached; errors propagate unchanged.
pub fn wrap_fallible<A, V, E, F>(f: F) -> Memoized<A, V, E>
where
	A: CacheArgs,
	V: DeepSizeOf + Send + Sync + 'static,
	E: 'static,
	F: Fn(&A) -> Result<V, E> + Send + Sync + 'static,
{
	global().wrap_fallible(f)
}

/// Run a shrink pass on the process-wide context, against `target` or the
/// configured target ratio.
pub fn shrink_cache(target: Option<f64>) {
	global().shrink(target);
}

/// Delete every cached entry in the process-wide context. The monitor, if
/// running, is stopped and restarted around the sweep.
pub fn clear_cache() {
	global().clear();
}

/// Start the process-wide background monitor. No-op if already running.
pub fn start_cache_monitor() {
	global().start_monitor();
}

/// Stop the process-wide background monitor, blocking until its thread has
/// exited.
pub fn stop_cache_monitor() {
	global().stop_monitor();
}

/// The process-wide target ratio of cache footprint to usable free memory.
pub fn target_memory_use_ratio() -> f64 {
	global().target_memory_use_ratio()
}

/// Set the process-wide target memory-use ratio (default 1.0).
pub fn set_target_memory_use_ratio(ratio: f64) {
	global().set_target_memory_use_ratio(ratio);
}
