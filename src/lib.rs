//! A concurrent, growable hash table for `u64` keys and `u64` values.
//!
//! `gtab` provides [`GrowTable`], an open-addressed table that resizes
//! online: when it fills up, a larger successor is published and every
//! thread that touches the table afterwards helps migrate entries into it a
//! block at a time, so no caller ever blocks on a stop-the-world resize.
//! Modeled on the `growt` library (T. Maier et al.).
//!
//! # Overview
//!
//! Three pieces work together: a fixed-capacity [`base`](mod@crate::base)
//! table using linear probing, a migration protocol that copies one table's
//! live entries into a larger successor block by block, and [`GrowTable`]
//! itself, which orchestrates publishing successors and lets any handle help
//! finish an in-progress growth. Threads interact with a table through a
//! borrowed [`Handle`], never the table directly.
//!
//! # Usage
//!
//! ```
//! use gtab::{GrowTable, Capacity};
//!
//! let table: GrowTable = GrowTable::new(Capacity::new(1024)).unwrap();
//! let handle = table.get_handle();
//!
//! handle.insert(1, 100);
//! assert_eq!(handle.find(1), Some(100));
//! assert!(handle.erase(1));
//! assert_eq!(handle.find(1), None);
//! ```
//!
//! # Configuration
//!
//! Tuning knobs (probe bound, growth triggers, migration block size, hash
//! function) are configured at compile time through the [`Params`] trait.
//! The default configuration ([`DefaultParams`]) matches the original
//! `growt` library's defaults:
//!
//! ```
//! use gtab::{GrowTable, DefaultParams, Capacity};
//!
//! // These are equivalent:
//! let table1: GrowTable = GrowTable::new(Capacity::DEF).unwrap();
//! let table2: GrowTable<DefaultParams> = GrowTable::new(Capacity::DEF).unwrap();
//! ```
//!
//! Capacity is always rounded up to the nearest power of two and clamped to
//! the range <code>[Capacity::MIN]..=[Capacity::MAX]</code>.
//!
//! # Concurrency
//!
//! All operations are thread-safe and lock-free on the hot path. Each thread
//! should create its own [`Handle`] via [`GrowTable::get_handle`] — handles
//! batch insert/delete counters locally and are not meant to be shared.
//!
//! ```
//! use gtab::{GrowTable, Capacity};
//! use std::thread;
//!
//! let table: GrowTable = GrowTable::new(Capacity::new(1024)).unwrap();
//!
//! thread::scope(|scope| {
//!   for t in 0..4u64 {
//!     let table = &table;
//!     scope.spawn(move || {
//!       let handle = table.get_handle();
//!       for i in 0..100u64 {
//!         handle.insert(t * 1000 + i, i);
//!       }
//!     });
//!   }
//! });
//! ```
//!
//! A [`deamortized_handle`](GrowTable::deamortized_handle) variant is also
//! available, which spreads an in-progress growth's migration cost across
//! many operations instead of paying for it all in one call; see
//! [`DeamortizedHandle`].
//!
//! ## Memory Reclamation
//!
//! Retired base tables are reclaimed using epoch-based memory management via
//! [`sdd`]. This ensures concurrent readers can safely keep using a table
//! they already observed even while a growth round retires it.
//!
//! # Capacity Limits
//!
//! Capacity is bounded by [`Capacity::MIN`] and [`Capacity::MAX`]. The
//! initial capacity defaults to [`Capacity::DEF`]. Allocation failure at
//! construction is reported as [`GTabError::Alloc`] rather than aborting;
//! allocation failure during an internal growth step still aborts, matching
//! the rest of the standard library's fallible-allocation posture.
//!
//! [`sdd`]: https://docs.rs/sdd
//!

mod array;
mod base;
mod deamortized;
mod error;
mod grow;
mod handle;
mod hash;
mod iter;
mod padded;
mod params;
mod result;
mod slot;

pub use self::deamortized::DeamortizedHandle;
pub use self::error::GTabError;
pub use self::grow::GrowTable;
pub use self::handle::Handle;
pub use self::hash::DefaultHasher;
pub use self::hash::Hash64;
pub use self::iter::Iter;
pub use self::iter::Reference;
pub use self::params::Capacity;
pub use self::params::DefaultParams;
pub use self::params::Params;
pub use self::params::CACHE_LINE;
pub use self::params::CACHE_LINE_SLOTS;

mod alloc {
  #[cfg(loom)]
  mod exports {
    pub(crate) use ::loom::alloc::alloc;
    pub(crate) use ::loom::alloc::dealloc;
    pub(crate) use ::std::alloc::handle_alloc_error;
  }

  #[cfg(not(loom))]
  mod exports {
    pub(crate) use ::std::alloc::alloc;
    pub(crate) use ::std::alloc::dealloc;
    pub(crate) use ::std::alloc::handle_alloc_error;
  }

  pub(crate) use self::exports::*;
}

mod sync {
  #[cfg(all(loom, shuttle))]
  compile_error!("cannot use loom and shuttle at once");

  #[cfg(not(any(loom, shuttle)))]
  mod exports {
    pub(crate) mod atomic {
      pub(crate) use ::core::sync::atomic::AtomicBool;
      pub(crate) use ::core::sync::atomic::AtomicI64;
      pub(crate) use ::core::sync::atomic::AtomicU32;
      pub(crate) use ::core::sync::atomic::AtomicU64;
      pub(crate) use ::core::sync::atomic::AtomicUsize;
      pub(crate) use ::core::sync::atomic::Ordering;
    }
  }

  #[cfg(loom)]
  mod exports {
    pub(crate) mod atomic {
      pub(crate) use ::loom::sync::atomic::AtomicBool;
      pub(crate) use ::loom::sync::atomic::AtomicI64;
      pub(crate) use ::loom::sync::atomic::AtomicU32;
      pub(crate) use ::loom::sync::atomic::AtomicU64;
      pub(crate) use ::loom::sync::atomic::AtomicUsize;
      pub(crate) use ::loom::sync::atomic::Ordering;
    }
  }

  #[cfg(shuttle)]
  mod exports {
    pub(crate) mod atomic {
      #[repr(transparent)]
      pub(crate) struct AtomicUsize {
        inner: Box<::shuttle::sync::atomic::AtomicUsize>,
      }

      impl AtomicUsize {
        #[inline]
        pub(crate) fn new(value: usize) -> Self {
          Self {
            inner: Box::new(::shuttle::sync::atomic::AtomicUsize::new(value)),
          }
        }
      }

      impl ::core::ops::Deref for AtomicUsize {
        type Target = ::shuttle::sync::atomic::AtomicUsize;

        #[inline]
        fn deref(&self) -> &Self::Target {
          &self.inner
        }
      }

      #[repr(transparent)]
      pub(crate) struct AtomicU64 {
        inner: Box<::shuttle::sync::atomic::AtomicU64>,
      }

      impl AtomicU64 {
        #[inline]
        pub(crate) fn new(value: u64) -> Self {
          Self {
            inner: Box::new(::shuttle::sync::atomic::AtomicU64::new(value)),
          }
        }
      }

      impl ::core::ops::Deref for AtomicU64 {
        type Target = ::shuttle::sync::atomic::AtomicU64;

        #[inline]
        fn deref(&self) -> &Self::Target {
          &self.inner
        }
      }

      #[repr(transparent)]
      pub(crate) struct AtomicI64 {
        inner: Box<::shuttle::sync::atomic::AtomicIsize>,
      }

      impl AtomicI64 {
        #[inline]
        pub(crate) fn new(value: i64) -> Self {
          Self {
            inner: Box::new(::shuttle::sync::atomic::AtomicIsize::new(value as isize)),
          }
        }
      }

      impl ::core::ops::Deref for AtomicI64 {
        type Target = ::shuttle::sync::atomic::AtomicIsize;

        #[inline]
        fn deref(&self) -> &Self::Target {
          &self.inner
        }
      }

      #[repr(transparent)]
      pub(crate) struct AtomicBool {
        inner: Box<::shuttle::sync::atomic::AtomicBool>,
      }

      impl AtomicBool {
        #[inline]
        pub(crate) fn new(value: bool) -> Self {
          Self {
            inner: Box::new(::shuttle::sync::atomic::AtomicBool::new(value)),
          }
        }
      }

      impl ::core::ops::Deref for AtomicBool {
        type Target = ::shuttle::sync::atomic::AtomicBool;

        #[inline]
        fn deref(&self) -> &Self::Target {
          &self.inner
        }
      }

      pub(crate) use ::shuttle::sync::atomic::AtomicU32;
      pub(crate) use ::shuttle::sync::atomic::Ordering;
    }
  }

  pub(crate) use self::exports::*;
}
