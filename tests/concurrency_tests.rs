//! Concurrency discipline: concurrent callers of distinct wrapped functions
//! must never deadlock, even while both drive eviction passes, and the
//! monitor must coexist with call-site shrinks.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use pressure_cache::CacheContext;
use pressure_cache::mem::FixedProbe;

#[test]
fn concurrent_distinct_functions_never_deadlock() {
	// Memory looks exhausted, so every call runs a full eviction pass that
	// touches entries of both functions.
	let ctx = Arc::new(CacheContext::with_probe(Box::new(FixedProbe::new(10_000, 100))));

	let f = ctx.wrap(|x: &u64| vec![*x; 32]);
	let g = ctx.wrap(|x: &u64| x.to_string());

	let mut handles = Vec::new();
	for t in 0..4u64 {
		let f = f.clone();
		let g = g.clone();
		handles.push(thread::spawn(move || {
			for i in 0..200 {
				let key = t * 1000 + i;
				assert_eq!(*f.call(key), vec![key; 32]);
				assert_eq!(*g.call(key), key.to_string());
			}
		}));
	}
	for handle in handles {
		handle.join().unwrap();
	}
}

#[test]
fn concurrent_callers_populate_independent_caches() {
	let ctx = Arc::new(CacheContext::with_probe(Box::new(FixedProbe::new(1 << 30, 1 << 30))));

	let f = ctx.wrap(|x: &u64| *x + 1);
	let g = ctx.wrap(|x: &u64| *x + 2);

	let mut handles = Vec::new();
	for t in 0..4u64 {
		let f = f.clone();
		let g = g.clone();
		handles.push(thread::spawn(move || {
			for i in 0..100 {
				// Disjoint key ranges per thread.
				let key = t * 100 + i;
				f.call(key);
				g.call(key);
			}
		}));
	}
	for handle in handles {
		handle.join().unwrap();
	}

	assert_eq!(f.len(), 400);
	assert_eq!(g.len(), 400);
	assert_eq!(ctx.stats().entries, 800);
}

#[test]
fn monitor_and_callers_share_the_eviction_path() {
	let probe = Arc::new(FixedProbe::new(10_000, 100));
	let ctx = Arc::new(CacheContext::with_probe(Box::new(Probe(Arc::clone(&probe)))));

	struct Probe(Arc<FixedProbe>);
	impl pressure_cache::mem::MemoryProbe for Probe {
		fn total_physical_memory(&self) -> u64 {
			self.0.total_physical_memory()
		}
		fn available_physical_memory(&self) -> u64 {
			self.0.available_physical_memory()
		}
	}

	ctx.start_monitor();

	let f = ctx.wrap(|x: &u64| vec![0u8; *x as usize % 512]);
	let mut handles = Vec::new();
	for t in 0..2u64 {
		let f = f.clone();
		handles.push(thread::spawn(move || {
			for i in 0..100 {
				f.call(t * 1000 + i);
			}
		}));
	}
	for handle in handles {
		handle.join().unwrap();
	}

	// Stop must block until the monitor thread is gone.
	ctx.stop_monitor();
	assert!(!ctx.monitor_running());
}

#[test]
fn concurrent_same_key_computes_once_after_settling() {
	let ctx = Arc::new(CacheContext::with_probe(Box::new(FixedProbe::new(1 << 30, 1 << 30))));
	let calls = Arc::new(AtomicUsize::new(0));
	let counter = Arc::clone(&calls);
	let f = ctx.wrap(move |_: &u64| {
		counter.fetch_add(1, Ordering::SeqCst);
		thread::sleep(Duration::from_millis(5));
		42u64
	});

	// The function lock serializes callers of one function, so the first
	// caller computes and the rest hit.
	let mut handles = Vec::new();
	for _ in 0..4 {
		let f = f.clone();
		handles.push(thread::spawn(move || *f.call(7)));
	}
	for handle in handles {
		assert_eq!(handle.join().unwrap(), 42);
	}
	assert_eq!(calls.load(Ordering::SeqCst), 1);
}
