//! Per-entry scoring metadata.
//!
//! Every cached result carries an [`EntryMeta`]: the estimated byte size of
//! the result, the wall-clock instant it was last used, its absolute expiry
//! instant, and how long the original computation took. Size and timestamps
//! are atomics so the eviction engine can read scores without touching any
//! function lock; mutation still happens only under the owning function's
//! lock.
//!
//! The score is derived on every read and never stored:
//!
//! ```text
//! score = (size_bytes * computation_seconds) / age_seconds²
//! ```
//!
//! A large result that took long to compute and was used recently scores
//! high and is retained; the quadratic age term makes even high-value
//! entries evictable quickly once they go unused.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

/// Instants are nanoseconds since the owning context's epoch.
pub(crate) type Nanos = u64;

/// Expiry sentinel for entries that never expire.
const NEVER: Nanos = Nanos::MAX;

/// Scoring and expiry metadata for one cache entry.
///
/// Shared (via `Arc`) between the typed entry in its per-function map and
/// the type-erased handle in the global registry.
#[derive(Debug)]
pub(crate) struct EntryMeta {
	/// Estimated byte footprint of the cached result.
	size: AtomicUsize,
	/// Last access, nanos since the context epoch.
	last_used: AtomicU64,
	/// Absolute expiry instant; `NEVER` if no expiration was set.
	expires_at: AtomicU64,
	/// Wall-clock cost of the original computation. Fixed at construction;
	/// recomputes on expiry do not re-measure.
	duration: Duration,
	/// Relative expiration window; `None` means effectively infinite.
	expiration: Option<Duration>,
}

impl EntryMeta {
	pub(crate) fn new(
		size: usize,
		duration: Duration,
		expiration: Option<Duration>,
		now: Nanos,
	) -> Self {
		Self {
			size: AtomicUsize::new(size),
			last_used: AtomicU64::new(now),
			expires_at: AtomicU64::new(expiry(now, expiration)),
			duration,
			expiration,
		}
	}

	pub(crate) fn size(&self) -> usize {
		self.size.load(Ordering::Acquire)
	}

	pub(crate) fn expired(&self, now: Nanos) -> bool {
		now > self.expires_at.load(Ordering::Acquire)
	}

	/// Refresh last-used on a fresh (non-expired) access.
	pub(crate) fn touch(&self, now: Nanos) {
		self.last_used.store(now, Ordering::Release);
	}

	/// Refresh after a successful recompute: new size, new expiry window.
	pub(crate) fn refresh(&self, size: usize, now: Nanos) {
		self.size.store(size, Ordering::Release);
		self.last_used.store(now, Ordering::Release);
		self.expires_at.store(expiry(now, self.expiration), Ordering::Release);
	}

	/// Time since last use. Clamped to 1 ns so a just-touched entry yields a
	/// finite, very large score instead of a division by zero.
	pub(crate) fn age(&self, now: Nanos) -> Duration {
		Duration::from_nanos(now.saturating_sub(self.last_used.load(Ordering::Acquire)).max(1))
	}

	/// Eviction priority at `now`; higher scores are retained longer.
	pub(crate) fn score(&self, now: Nanos) -> f64 {
		let age = self.age(now).as_secs_f64();
		(self.size() as f64 * self.duration.as_secs_f64()) / (age * age)
	}
}

fn expiry(now: Nanos, expiration: Option<Duration>) -> Nanos {
	match expiration {
		Some(window) => {
			let nanos = Nanos::try_from(window.as_nanos()).unwrap_or(NEVER);
			now.saturating_add(nanos)
		}
		None => NEVER,
	}
}

/// Type-erased view of a live entry, held by the global registry.
///
/// Entries of every wrapped function, whatever their argument and result
/// types, appear behind this trait so a single shrink pass can order and
/// evict across all of them.
pub(crate) trait Evictable: Send + Sync {
	/// Current eviction score; lock-free.
	fn score(&self, now: Nanos) -> f64;

	/// Current estimated size in bytes; lock-free.
	fn size(&self) -> usize;

	/// Remove the entry from its owning per-function map, taking that
	/// function's lock. Returns the freed size, or `None` if the entry was
	/// already gone.
	fn evict(&self) -> Option<usize>;
}

#[cfg(test)]
mod tests {
	use super::*;

	const SEC: Nanos = 1_000_000_000;

	#[test]
	fn test_score_prefers_large_recent_expensive() {
		// A: large, slow to compute, used 1s ago.
		let a = EntryMeta::new(1 << 20, Duration::from_secs(2), None, 0);
		// B: small, fast to compute, used 100s ago.
		let b = EntryMeta::new(64, Duration::from_millis(1), None, 0);

		let now_a = SEC;
		let now_b = 100 * SEC;
		assert!(a.score(now_a) > b.score(now_b));
	}

	#[test]
	fn test_score_decays_quadratically() {
		let meta = EntryMeta::new(1000, Duration::from_secs(1), None, 0);
		let early = meta.score(SEC);
		let late = meta.score(10 * SEC);
		assert!((early / late - 100.0).abs() < 1e-6);
	}

	#[test]
	fn test_touch_resets_age() {
		let meta = EntryMeta::new(1000, Duration::from_secs(1), None, 0);
		meta.touch(50 * SEC);
		assert_eq!(meta.age(50 * SEC + SEC), Duration::from_secs(1));
	}

	#[test]
	fn test_zero_age_is_finite() {
		let meta = EntryMeta::new(1000, Duration::from_secs(1), None, 0);
		let score = meta.score(0);
		assert!(score.is_finite());
		assert!(score > 0.0);
	}

	#[test]
	fn test_expiry_window() {
		let meta = EntryMeta::new(10, Duration::ZERO, Some(Duration::from_secs(5)), 0);
		assert!(!meta.expired(5 * SEC));
		assert!(meta.expired(5 * SEC + 1));
	}

	#[test]
	fn test_no_expiration_never_expires() {
		let meta = EntryMeta::new(10, Duration::ZERO, None, 0);
		assert!(!meta.expired(Nanos::MAX - 1));
	}

	#[test]
	fn test_refresh_extends_expiry_and_updates_size() {
		let meta = EntryMeta::new(10, Duration::ZERO, Some(Duration::from_secs(5)), 0);
		meta.refresh(99, 10 * SEC);
		assert_eq!(meta.size(), 99);
		assert!(!meta.expired(15 * SEC));
		assert!(meta.expired(15 * SEC + 1));
	}
}
