//! Argument-to-cache-key projection.
//!
//! A wrapped function is memoized on a key derived from its arguments. Not
//! every argument type can supply a stable, hashable key (floats, interior
//! mutability, opaque handles); those calls must bypass the cache and invoke
//! the function directly, with no entry created.
//!
//! [`CacheArgs::cache_key`] is that capability check: `Some(key)` routes the
//! call through the cache, `None` routes it around. Composite projections are
//! all-or-nothing: a single unkeyable component poisons the whole key.

use std::collections::BTreeMap;
use std::hash::Hash;
use std::time::Duration;

/// Argument bundles that may be projected to a cache key.
///
/// The key is an owned, immutable snapshot of the arguments; two calls whose
/// projections compare equal are considered the same call. Named-argument
/// bundles should use [`BTreeMap<String, T>`], which is order-independent and
/// cannot contain duplicate names by construction.
pub trait CacheArgs: Clone + Send + Sync + 'static {
	/// The hashable projection used as the per-function map key.
	type Key: Hash + Eq + Clone + Send + Sync + 'static;

	/// Project these arguments to a cache key, or `None` if they cannot be
	/// keyed. `None` degrades the call to a direct, uncached invocation.
	fn cache_key(&self) -> Option<Self::Key>;
}

/// Implement [`CacheArgs`] for types that are their own key.
macro_rules! identity_args {
	($($ty:ty),+ $(,)?) => {$(
		impl CacheArgs for $ty {
			type Key = $ty;

			fn cache_key(&self) -> Option<$ty> {
				Some(self.clone())
			}
		}
	)+};
}

identity_args!(
	(),
	bool,
	char,
	u8,
	u16,
	u32,
	u64,
	u128,
	usize,
	i8,
	i16,
	i32,
	i64,
	i128,
	isize,
	String,
	&'static str,
	Duration,
);

impl<T: CacheArgs> CacheArgs for Option<T> {
	type Key = Option<T::Key>;

	fn cache_key(&self) -> Option<Self::Key> {
		match self {
			// A `None` argument is a perfectly good key component.
			None => Some(None),
			Some(value) => value.cache_key().map(Some),
		}
	}
}

impl<T: CacheArgs> CacheArgs for Vec<T> {
	type Key = Vec<T::Key>;

	fn cache_key(&self) -> Option<Self::Key> {
		self.iter().map(T::cache_key).collect()
	}
}

/// Order-independent named-argument projection. Duplicate names are
/// impossible by construction.
impl<T: CacheArgs> CacheArgs for BTreeMap<String, T> {
	type Key = BTreeMap<String, T::Key>;

	fn cache_key(&self) -> Option<Self::Key> {
		self.iter().map(|(name, value)| Some((name.clone(), value.cache_key()?))).collect()
	}
}

macro_rules! tuple_args {
	($(($($name:ident : $idx:tt),+))+) => {$(
		impl<$($name: CacheArgs),+> CacheArgs for ($($name,)+) {
			type Key = ($($name::Key,)+);

			fn cache_key(&self) -> Option<Self::Key> {
				Some(($(self.$idx.cache_key()?,)+))
			}
		}
	)+};
}

tuple_args! {
	(A: 0)
	(A: 0, B: 1)
	(A: 0, B: 1, C: 2)
	(A: 0, B: 1, C: 2, D: 3)
	(A: 0, B: 1, C: 2, D: 3, E: 4)
	(A: 0, B: 1, C: 2, D: 3, E: 4, F: 5)
}

/// Wrapper marking an argument as unkeyable.
///
/// Calls whose arguments contain an `Unkeyed` component always invoke the
/// underlying function directly and never populate the cache. This is the
/// escape hatch for functions occasionally called with values that have no
/// stable hashable form.
#[derive(Clone, Debug)]
pub struct Unkeyed<T>(pub T);

impl<T: Clone + Send + Sync + 'static> CacheArgs for Unkeyed<T> {
	type Key = ();

	fn cache_key(&self) -> Option<()> {
		None
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_identity_projection() {
		assert_eq!(42u64.cache_key(), Some(42));
		assert_eq!("fixed".cache_key(), Some("fixed"));
	}

	#[test]
	fn test_tuple_projection() {
		let args = (1u32, "a", true);
		assert_eq!(args.cache_key(), Some((1, "a", true)));
	}

	#[test]
	fn test_unkeyed_poisons_composite() {
		let args = (1u32, Unkeyed(vec![0.5f64]));
		assert_eq!(args.cache_key(), None);
	}

	#[test]
	fn test_named_args_order_independent() {
		let mut a = BTreeMap::new();
		a.insert("x".to_string(), 1u64);
		a.insert("y".to_string(), 2u64);

		let mut b = BTreeMap::new();
		b.insert("y".to_string(), 2u64);
		b.insert("x".to_string(), 1u64);

		assert_eq!(a.cache_key(), b.cache_key());
	}

	#[test]
	fn test_vec_projection_is_element_wise() {
		let args = vec![(1u8, Unkeyed(())), (2u8, Unkeyed(()))];
		assert_eq!(args.cache_key(), None);

		let args = vec![1u8, 2u8];
		assert_eq!(args.cache_key(), Some(vec![1, 2]));
	}
}
