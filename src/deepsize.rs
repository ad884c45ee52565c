//! Approximate retained-size estimation for cached values.
//!
//! Cached results are scored by their memory footprint, so the cache needs a
//! cheap estimate of how many bytes a value graph retains. The estimate walks
//! owned children of known composite types and deduplicates shared allocations
//! (`Arc`/`Rc`) by pointer identity, so a sub-object reachable through several
//! paths is counted once per estimate.
//!
//! The estimate is deliberately approximate: a type whose children are not
//! recognized contributes only its shallow size. That undercounts, which is
//! acceptable; eviction pressure is relative, not exact.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::mem::{size_of, size_of_val};
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

/// Per-estimate bookkeeping: allocations already counted in this walk.
///
/// A fresh context is created for each top-level [`DeepSizeOf::deep_size_of`]
/// call; identity deduplication never spans two estimates.
#[derive(Debug, Default)]
pub struct Context {
	seen: HashSet<usize>,
}

impl Context {
	/// Record a shared allocation. Returns `true` on first visit.
	fn mark_visited(&mut self, ptr: usize) -> bool {
		self.seen.insert(ptr)
	}
}

/// Types whose total memory footprint can be estimated.
///
/// Implementors only provide [`deep_size_of_children`](Self::deep_size_of_children):
/// the bytes owned outside the value's own stack footprint. The shallow part
/// is added by the provided methods. Returning 0 is always valid and degrades
/// to a shallow-size estimate.
pub trait DeepSizeOf {
	/// Estimate the total retained size of this value in bytes.
	fn deep_size_of(&self) -> usize {
		let mut context = Context::default();
		self.deep_size_of_with(&mut context)
	}

	/// Shallow size plus owned children, sharing `context` with the caller.
	fn deep_size_of_with(&self, context: &mut Context) -> usize {
		size_of_val(self) + self.deep_size_of_children(context)
	}

	/// Estimate the size of memory owned by this value but not embedded in it.
	fn deep_size_of_children(&self, context: &mut Context) -> usize;
}

/// Implement [`DeepSizeOf`] for types with a statically known children size.
#[macro_export]
macro_rules! known_deep_size {
	($size:expr; $($ty:ty),+ $(,)?) => {$(
		impl $crate::deepsize::DeepSizeOf for $ty {
			fn deep_size_of_children(
				&self,
				_context: &mut $crate::deepsize::Context,
			) -> usize {
				$size
			}
		}
	)+};
}

known_deep_size!(0;
	(), bool, char,
	u8, u16, u32, u64, u128, usize,
	i8, i16, i32, i64, i128, isize,
	f32, f64,
	&'static str,
	Duration,
);

impl DeepSizeOf for String {
	fn deep_size_of_children(&self, _context: &mut Context) -> usize {
		self.capacity()
	}
}

impl<T: DeepSizeOf> DeepSizeOf for Vec<T> {
	fn deep_size_of_children(&self, context: &mut Context) -> usize {
		self.capacity() * size_of::<T>()
			+ self.iter().map(|elem| elem.deep_size_of_children(context)).sum::<usize>()
	}
}

impl<T: DeepSizeOf> DeepSizeOf for VecDeque<T> {
	fn deep_size_of_children(&self, context: &mut Context) -> usize {
		self.capacity() * size_of::<T>()
			+ self.iter().map(|elem| elem.deep_size_of_children(context)).sum::<usize>()
	}
}

impl<T: DeepSizeOf, const N: usize> DeepSizeOf for [T; N] {
	fn deep_size_of_children(&self, context: &mut Context) -> usize {
		self.iter().map(|elem| elem.deep_size_of_children(context)).sum()
	}
}

impl<T: DeepSizeOf> DeepSizeOf for [T] {
	fn deep_size_of_children(&self, context: &mut Context) -> usize {
		self.iter().map(|elem| elem.deep_size_of_children(context)).sum()
	}
}

impl<T: DeepSizeOf> DeepSizeOf for parking_lot::Mutex<T> {
	fn deep_size_of_children(&self, context: &mut Context) -> usize {
		self.lock().deep_size_of_children(context)
	}
}

impl<T: DeepSizeOf> DeepSizeOf for parking_lot::RwLock<T> {
	fn deep_size_of_children(&self, context: &mut Context) -> usize {
		self.read().deep_size_of_children(context)
	}
}

impl<T: DeepSizeOf> DeepSizeOf for Box<T> {
	fn deep_size_of_children(&self, context: &mut Context) -> usize {
		(**self).deep_size_of_with(context)
	}
}

impl<T: DeepSizeOf> DeepSizeOf for Option<T> {
	fn deep_size_of_children(&self, context: &mut Context) -> usize {
		self.as_ref().map_or(0, |value| value.deep_size_of_children(context))
	}
}

impl<T: DeepSizeOf, E: DeepSizeOf> DeepSizeOf for Result<T, E> {
	fn deep_size_of_children(&self, context: &mut Context) -> usize {
		match self {
			Ok(value) => value.deep_size_of_children(context),
			Err(err) => err.deep_size_of_children(context),
		}
	}
}

impl<T: DeepSizeOf> DeepSizeOf for Arc<T> {
	fn deep_size_of_children(&self, context: &mut Context) -> usize {
		let ptr = Arc::as_ptr(self) as *const () as usize;
		if context.mark_visited(ptr) {
			// Strong and weak counters live in the same allocation as the value.
			2 * size_of::<usize>() + (**self).deep_size_of_with(context)
		} else {
			0
		}
	}
}

impl<T: DeepSizeOf> DeepSizeOf for Rc<T> {
	fn deep_size_of_children(&self, context: &mut Context) -> usize {
		let ptr = Rc::as_ptr(self) as *const () as usize;
		if context.mark_visited(ptr) {
			2 * size_of::<usize>() + (**self).deep_size_of_with(context)
		} else {
			0
		}
	}
}

impl<K: DeepSizeOf, V: DeepSizeOf, S> DeepSizeOf for HashMap<K, V, S> {
	fn deep_size_of_children(&self, context: &mut Context) -> usize {
		// One control byte per bucket, entries stored inline in the table.
		self.capacity() * (size_of::<K>() + size_of::<V>() + size_of::<u8>())
			+ self
				.iter()
				.map(|(k, v)| {
					k.deep_size_of_children(context) + v.deep_size_of_children(context)
				})
				.sum::<usize>()
	}
}

impl<T: DeepSizeOf, S> DeepSizeOf for HashSet<T, S> {
	fn deep_size_of_children(&self, context: &mut Context) -> usize {
		self.capacity() * (size_of::<T>() + size_of::<u8>())
			+ self.iter().map(|elem| elem.deep_size_of_children(context)).sum::<usize>()
	}
}

impl<K: DeepSizeOf, V: DeepSizeOf> DeepSizeOf for BTreeMap<K, V> {
	fn deep_size_of_children(&self, context: &mut Context) -> usize {
		self.iter()
			.map(|(k, v)| {
				size_of::<(K, V)>()
					+ k.deep_size_of_children(context)
					+ v.deep_size_of_children(context)
			})
			.sum()
	}
}

impl<T: DeepSizeOf> DeepSizeOf for BTreeSet<T> {
	fn deep_size_of_children(&self, context: &mut Context) -> usize {
		self.iter()
			.map(|elem| size_of::<T>() + elem.deep_size_of_children(context))
			.sum()
	}
}

macro_rules! tuple_deep_size {
	($(($($name:ident : $idx:tt),+))+) => {$(
		impl<$($name: DeepSizeOf),+> DeepSizeOf for ($($name,)+) {
			fn deep_size_of_children(&self, context: &mut Context) -> usize {
				0 $(+ self.$idx.deep_size_of_children(context))+
			}
		}
	)+};
}

tuple_deep_size! {
	(A: 0)
	(A: 0, B: 1)
	(A: 0, B: 1, C: 2)
	(A: 0, B: 1, C: 2, D: 3)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_primitive_is_shallow() {
		assert_eq!(42u64.deep_size_of(), size_of::<u64>());
		assert_eq!(true.deep_size_of(), size_of::<bool>());
	}

	#[test]
	fn test_string_counts_capacity() {
		let s = String::with_capacity(128);
		assert_eq!(s.deep_size_of(), size_of::<String>() + 128);
	}

	#[test]
	fn test_vec_counts_capacity_and_children() {
		let v: Vec<String> = vec![String::with_capacity(10), String::with_capacity(20)];
		let expected = size_of::<Vec<String>>() + v.capacity() * size_of::<String>() + 30;
		assert_eq!(v.deep_size_of(), expected);
	}

	#[test]
	fn test_shared_arc_counted_once() {
		let shared = Arc::new(vec![0u8; 1024]);
		let pair = (Arc::clone(&shared), Arc::clone(&shared));
		let single = (Arc::clone(&shared), ());

		// The second reference to the same allocation must contribute nothing.
		let pair_size = pair.deep_size_of();
		let single_size = single.deep_size_of();
		assert_eq!(
			pair_size - size_of_val(&pair),
			single_size - size_of_val(&single)
		);
	}

	#[test]
	fn test_distinct_arcs_counted_separately() {
		let a = Arc::new(vec![0u8; 512]);
		let b = Arc::new(vec![0u8; 512]);
		assert!((a, b).deep_size_of() > Arc::new(vec![0u8; 512]).deep_size_of());
	}

	#[test]
	fn test_lock_wrappers_see_through() {
		let locked = parking_lot::Mutex::new(vec![0u8; 256]);
		assert!(locked.deep_size_of() >= 256);
	}

	#[test]
	fn test_map_counts_keys_and_values() {
		let mut map = HashMap::new();
		map.insert("k".to_string(), vec![0u8; 64]);
		assert!(map.deep_size_of() > 64);
	}
}
