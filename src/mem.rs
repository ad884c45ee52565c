//! Physical-memory introspection.
//!
//! The eviction engine compares the cache's estimated footprint against the
//! host's free memory. That comparison goes through [`MemoryProbe`] so tests
//! can inject synthetic pressure; production contexts use [`SysinfoProbe`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use sysinfo::System;

/// Fraction of total physical memory reserved as untouchable headroom: the
/// cache never considers the last tenth of RAM usable.
const HEADROOM_DENOMINATOR: f64 = 10.0;

/// Source of physical-memory figures, in bytes.
pub trait MemoryProbe: Send + Sync + 'static {
	/// Total physical memory installed.
	fn total_physical_memory(&self) -> u64;

	/// Physical memory currently available to the process.
	fn available_physical_memory(&self) -> u64;
}

/// Free memory the cache may occupy: available memory minus the reserved
/// headroom. May be non-positive when the host is under pressure.
pub(crate) fn usable_free_memory(probe: &dyn MemoryProbe) -> f64 {
	probe.available_physical_memory() as f64
		- probe.total_physical_memory() as f64 / HEADROOM_DENOMINATOR
}

/// Probe backed by [`sysinfo`], refreshed at most once per 100 ms.
///
/// The rate limit keeps the synchronous shrink pass on every cache access
/// from turning into a syscall storm.
pub struct SysinfoProbe {
	state: Mutex<ProbeState>,
}

struct ProbeState {
	system: System,
	refreshed_at: Instant,
}

const REFRESH_INTERVAL: Duration = Duration::from_millis(100);

impl SysinfoProbe {
	pub fn new() -> Self {
		let mut system = System::new();
		system.refresh_memory();
		Self { state: Mutex::new(ProbeState { system, refreshed_at: Instant::now() }) }
	}

	fn read<R>(&self, f: impl FnOnce(&System) -> R) -> R {
		let mut state = self.state.lock();
		if state.refreshed_at.elapsed() >= REFRESH_INTERVAL {
			state.system.refresh_memory();
			state.refreshed_at = Instant::now();
		}
		f(&state.system)
	}
}

impl Default for SysinfoProbe {
	fn default() -> Self {
		Self::new()
	}
}

impl MemoryProbe for SysinfoProbe {
	fn total_physical_memory(&self) -> u64 {
		self.read(|system| system.total_memory())
	}

	fn available_physical_memory(&self) -> u64 {
		self.read(|system| system.available_memory())
	}
}

/// Probe returning fixed figures, adjustable at runtime. Intended for tests
/// that need deterministic memory pressure.
#[derive(Debug)]
pub struct FixedProbe {
	total: AtomicU64,
	available: AtomicU64,
}

impl FixedProbe {
	pub fn new(total: u64, available: u64) -> Self {
		Self { total: AtomicU64::new(total), available: AtomicU64::new(available) }
	}

	/// Change the reported available memory, e.g. to simulate a pressure
	/// spike mid-test.
	pub fn set_available(&self, available: u64) {
		self.available.store(available, Ordering::Release);
	}
}

impl MemoryProbe for FixedProbe {
	fn total_physical_memory(&self) -> u64 {
		self.total.load(Ordering::Acquire)
	}

	fn available_physical_memory(&self) -> u64 {
		self.available.load(Ordering::Acquire)
	}
}
