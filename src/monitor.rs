//! Background shrink monitor.
//!
//! Wrapped functions trigger eviction synchronously on every call, but a
//! cache that goes quiet would otherwise hold its memory indefinitely. The
//! monitor is a single long-lived thread that re-runs the shrink pass on a
//! jittered interval so memory is reclaimed even without call activity.
//!
//! Start is idempotent, stop blocks until the thread has exited, and
//! cancellation is cooperative: the stop flag is checked once per
//! sleep-wake cycle, never mid-pass.

use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::debug;

use crate::context::CacheContext;

/// Upper bound on the randomized sleep between shrink passes. The jitter
/// avoids synchronized eviction storms across processes.
const MONITOR_INTERVAL: Duration = Duration::from_secs(10);

/// Handle to the at-most-one monitor thread of a context.
pub(crate) struct Monitor {
	thread: Mutex<Option<JoinHandle<()>>>,
	signal: Arc<StopSignal>,
}

struct StopSignal {
	stopped: Mutex<bool>,
	wake: Condvar,
}

impl Monitor {
	pub(crate) fn new() -> Self {
		Self {
			thread: Mutex::new(None),
			signal: Arc::new(StopSignal { stopped: Mutex::new(false), wake: Condvar::new() }),
		}
	}

	pub(crate) fn is_running(&self) -> bool {
		self.thread.lock().as_ref().is_some_and(|handle| !handle.is_finished())
	}

	/// Spawn the monitor thread. No-op while one is already running.
	pub(crate) fn start(&self, ctx: Weak<CacheContext>) {
		let mut thread = self.thread.lock();
		if thread.as_ref().is_some_and(|handle| !handle.is_finished()) {
			return;
		}
		*self.signal.stopped.lock() = false;

		let signal = Arc::clone(&self.signal);
		let handle = std::thread::Builder::new()
			.name("pressure-cache-monitor".into())
			.spawn(move || run(ctx, signal))
			.expect("failed to spawn cache monitor thread");
		*thread = Some(handle);
	}

	/// Signal the monitor to stop and join it. Blocks until the thread has
	/// fully exited. No-op if it is not running.
	pub(crate) fn stop(&self) {
		let handle = {
			let mut thread = self.thread.lock();
			*self.signal.stopped.lock() = true;
			self.signal.wake.notify_all();
			thread.take()
		};
		if let Some(handle) = handle {
			let _ = handle.join();
		}
	}
}

fn run(ctx: Weak<CacheContext>, signal: Arc<StopSignal>) {
	debug!("cache monitor started");
	loop {
		{
			let stopped = signal.stopped.lock();
			if *stopped {
				break;
			}
		}

		// The context is held only for the duration of one pass so a dropped
		// context is not kept alive by its own monitor.
		match ctx.upgrade() {
			Some(ctx) => ctx.shrink(None),
			None => break,
		}

		let jitter =
			Duration::from_secs_f64(rand::random::<f64>() * MONITOR_INTERVAL.as_secs_f64());
		let mut stopped = signal.stopped.lock();
		if !*stopped {
			let _ = signal.wake.wait_for(&mut stopped, jitter);
		}
	}
	debug!("cache monitor stopped");
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::mem::FixedProbe;

	fn context() -> Arc<CacheContext> {
		Arc::new(CacheContext::with_probe(Box::new(FixedProbe::new(1 << 30, 1 << 30))))
	}

	#[test]
	fn test_start_is_idempotent() {
		let ctx = context();
		ctx.start_monitor();
		ctx.start_monitor();
		assert!(ctx.monitor_running());
		ctx.stop_monitor();
		assert!(!ctx.monitor_running());
	}

	#[test]
	fn test_stop_without_start_is_a_noop() {
		let ctx = context();
		ctx.stop_monitor();
		assert!(!ctx.monitor_running());
	}

	#[test]
	fn test_restart_after_stop() {
		let ctx = context();
		ctx.start_monitor();
		ctx.stop_monitor();
		ctx.start_monitor();
		assert!(ctx.monitor_running());
		ctx.stop_monitor();
	}
}
