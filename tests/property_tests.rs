use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use pressure_cache::mem::FixedProbe;
use pressure_cache::{CacheContext, Unkeyed};
use proptest::prelude::*;

/// Context with so much headroom that nothing is ever evicted.
fn relaxed() -> Arc<CacheContext> {
	Arc::new(CacheContext::with_probe(Box::new(FixedProbe::new(1 << 40, 1 << 40))))
}

proptest! {
	#[test]
	fn prop_each_distinct_key_computed_once(keys in prop::collection::vec(0u64..100, 1..50)) {
		let ctx = relaxed();
		let calls = Arc::new(AtomicUsize::new(0));
		let counter = Arc::clone(&calls);
		let f = ctx.wrap(move |x: &u64| {
			counter.fetch_add(1, Ordering::SeqCst);
			x.wrapping_mul(31)
		});

		let mut distinct = std::collections::HashSet::new();
		for key in &keys {
			let value = f.call(*key);
			prop_assert_eq!(*value, key.wrapping_mul(31));
			distinct.insert(*key);
		}

		prop_assert_eq!(calls.load(Ordering::SeqCst), distinct.len());
		prop_assert_eq!(f.len(), distinct.len());
	}

	#[test]
	fn prop_repeat_calls_return_equal_values(key in 0u64..1000) {
		let ctx = relaxed();
		let f = ctx.wrap(|x: &u64| format!("value-{x}"));

		let first = f.call(key);
		let second = f.call(key);
		prop_assert_eq!(&*first, &*second);
	}

	#[test]
	fn prop_registry_matches_per_function_maps(
		keys_a in prop::collection::vec(0u64..50, 0..30),
		keys_b in prop::collection::vec(0u64..50, 0..30),
	) {
		let ctx = relaxed();
		let a = ctx.wrap(|x: &u64| *x);
		let b = ctx.wrap(|x: &u64| x.to_string());

		for key in &keys_a {
			a.call(*key);
		}
		for key in &keys_b {
			b.call(*key);
		}

		// Every live entry appears exactly once in the registry.
		prop_assert_eq!(ctx.stats().entries, a.len() + b.len());
	}

	#[test]
	fn prop_ratio_converges_or_registry_empties(
		sizes in prop::collection::vec(16usize..2048, 1..40),
		target in 0.0f64..2.0,
		usable in 1_000u64..100_000,
	) {
		let ctx = Arc::new(CacheContext::with_probe(Box::new(FixedProbe::new(0, usable))));
		let f = ctx.wrap(|size: &usize| vec![0u8; *size]);

		for size in &sizes {
			f.call(*size);
		}

		ctx.shrink(Some(target));

		let stats = ctx.stats();
		let ratio = stats.current_size_bytes as f64 / usable as f64;
		prop_assert!(
			ratio <= target || stats.entries == 0,
			"ratio {} above target {} with {} entries",
			ratio, target, stats.entries
		);
	}

	#[test]
	fn prop_unkeyed_calls_never_accumulate(values in prop::collection::vec(any::<f64>(), 1..20)) {
		let ctx = relaxed();
		let calls = Arc::new(AtomicUsize::new(0));
		let counter = Arc::clone(&calls);
		let f = ctx.wrap(move |args: &Unkeyed<Vec<f64>>| {
			counter.fetch_add(1, Ordering::SeqCst);
			args.0.len()
		});

		for _ in 0..3 {
			f.call(Unkeyed(values.clone()));
		}

		prop_assert_eq!(calls.load(Ordering::SeqCst), 3);
		prop_assert_eq!(ctx.stats().entries, 0);
	}

	#[test]
	fn prop_clear_local_zeroes_the_ledger(keys in prop::collection::vec(0u64..100, 1..50)) {
		let ctx = relaxed();
		let f = ctx.wrap(|x: &u64| vec![0u8; (*x as usize + 1) * 8]);

		for key in &keys {
			f.call(*key);
		}
		prop_assert!(ctx.stats().current_size_bytes > 0);

		f.clear_local();
		prop_assert_eq!(f.len(), 0);
		prop_assert_eq!(ctx.stats().entries, 0);
		prop_assert_eq!(ctx.stats().current_size_bytes, 0);
	}
}
