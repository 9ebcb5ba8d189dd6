//! Compile-time tuning knobs and capacity arithmetic.

use core::fmt::Debug;
use core::fmt::Formatter;
use core::fmt::Result as FmtResult;
use core::mem;
use core::num::NonZeroUsize;

use crate::hash::DefaultHasher;
use crate::hash::Hash64;
use crate::padded::CachePadded;

// -----------------------------------------------------------------------------
// Cache-line Properties
// -----------------------------------------------------------------------------

/// The size of a cache line in bytes.
///
/// Used to align counters and the slot array to minimize false sharing
/// between threads. On most modern x86-64 systems, this is 64 bytes.
pub const CACHE_LINE: usize = size_of::<CachePadded<u8>>();

/// The number of table slots that fit in a single cache line.
pub const CACHE_LINE_SLOTS: usize = CACHE_LINE / size_of::<usize>();

const _: () = assert!(
  CACHE_LINE.is_power_of_two(),
  "invalid params: `CACHE_LINE` must be a power of two",
);

// -----------------------------------------------------------------------------
// Configurable Params
// -----------------------------------------------------------------------------

/// Compile-time configuration for a [`GrowTable`](crate::GrowTable).
///
/// Unlike the fixed-capacity table this crate's base table is modeled on,
/// capacity here is a runtime quantity — every growth step allocates a
/// larger [`BaseTable`](crate::base::BaseTable) at twice (or more) the
/// previous size. `Params` instead carries the knobs that stay fixed for
/// the lifetime of a table: the probe bound, the growth triggers, the
/// counter-flush cadence, the migration granularity, and the hash function.
///
/// # Example
///
/// ```
/// use gtab::{Params, DefaultParams, Hash64};
///
/// struct Aggressive;
///
/// impl Params for Aggressive {
///   const MAX_DISPLACEMENT: usize = 256;
///   type Hasher = <DefaultParams as Params>::Hasher;
/// }
/// ```
pub trait Params: 'static {
  /// Maximum number of probe steps before an operation reports the table
  /// full (`MaDis` in the original `growt` library). Default: 128.
  const MAX_DISPLACEMENT: usize = 128;

  /// Block-local fill percentage (of `current << shift`, see
  /// [`crate::base::resize`]) above which a migration target doubles again.
  /// Default: 50 (i.e. ~0.5 fill ratio), matching spec's growth trigger.
  const GROW_FILL_PERCENT: usize = 50;

  /// Fill percentage, against raw capacity, above which a handle triggers a
  /// new growth after flushing its local counters. Default: 66 (~0.666),
  /// matching the original `growt` handle's `max_fill_factor`.
  const FLUSH_FILL_PERCENT: usize = 66;

  /// Number of local insert/delete operations a handle batches before
  /// flushing its approximate counters to the shared totals. Default: 64,
  /// matching `growt`'s `updates > 64` check.
  const FLUSH_THRESHOLD: u32 = 64;

  /// Number of slots migrated per claimed block during growth. Default:
  /// 4096, matching `estrat_async::migration_block_size`.
  const MIGRATION_BLOCK: usize = 4096;

  /// The 64-bit hash function used to place keys.
  type Hasher: Hash64 = DefaultHasher;
}

/// The default [`Params`] configuration.
#[derive(Clone, Copy, Debug, Default)]
#[non_exhaustive]
pub struct DefaultParams;

impl Params for DefaultParams {
  type Hasher = DefaultHasher;
}

// -----------------------------------------------------------------------------
// Capacity
// -----------------------------------------------------------------------------

/// A validated, power-of-two base-table capacity.
///
/// Ported from the fixed-capacity table this crate is modeled on: the
/// rounding/clamping logic is identical, but here it validates a *runtime*
/// capacity hint (the table's initial size, and every successor table's
/// size during growth) rather than a const-generic array length.
#[derive(Copy, Clone, PartialEq, Eq)]
#[repr(transparent)]
pub struct Capacity(CapacityEnum);

impl Capacity {
  /// The minimum supported capacity: 16 slots.
  pub const MIN: Self = Self(CapacityEnum::_Capacity1Shl4);

  /// The maximum supported capacity: 134,217,728 slots (2²⁷).
  pub const MAX: Self = Self(CapacityEnum::_Capacity1Shl27);

  /// The default initial capacity: 4,096 slots (2¹²), matching the minimum
  /// a fresh `growt` table ever allocates (`compute_capacity`'s floor).
  pub const DEF: Self = Self(CapacityEnum::_Capacity1Shl12);

  /// Creates a new `Capacity` from an arbitrary value.
  ///
  /// The value is rounded up to the nearest power of two and clamped to
  /// [`MIN`]`..=`[`MAX`].
  ///
  /// [`MIN`]: Self::MIN
  /// [`MAX`]: Self::MAX
  #[inline]
  pub const fn new(value: usize) -> Self {
    let Some(capacity) = value.checked_next_power_of_two() else {
      return Self::MAX;
    };

    if capacity < Self::MIN.as_usize() {
      Self::MIN
    } else if capacity > Self::MAX.as_usize() {
      Self::MAX
    } else {
      // SAFETY: `capacity` is non-zero because values below `Self::MIN` take
      // the earlier branch.
      unsafe { Self::new_unchecked(capacity) }
    }
  }

  /// Creates a new `Capacity` without validation.
  ///
  /// # Safety
  ///
  /// `value` must be a power of two in the range [`MIN`]`..=`[`MAX`].
  ///
  /// [`MIN`]: Self::MIN
  /// [`MAX`]: Self::MAX
  #[inline]
  pub const unsafe fn new_unchecked(value: usize) -> Self {
    // SAFETY: Caller guarantees `value` is a valid `Capacity`.
    unsafe { mem::transmute::<usize, Self>(value) }
  }

  /// Returns the capacity as a [`usize`].
  #[inline]
  pub const fn as_usize(self) -> usize {
    self.0 as usize
  }

  /// Returns the capacity as a [`NonZeroUsize`].
  #[inline]
  pub const fn as_nonzero(self) -> NonZeroUsize {
    // SAFETY: All `Capacity` values are non-zero by construction.
    unsafe { mem::transmute::<Self, NonZeroUsize>(self) }
  }

  /// Returns the base-2 logarithm of the capacity.
  #[inline]
  pub const fn log2(self) -> u32 {
    self.as_nonzero().trailing_zeros()
  }

  /// Returns the next capacity after one more left shift, clamped to
  /// [`MAX`](Self::MAX).
  #[inline]
  pub const fn doubled(self) -> Self {
    Self::new(self.as_usize().saturating_mul(2))
  }
}

impl Debug for Capacity {
  fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
    write!(f, "{:?} (1 << {:?})", self.as_nonzero(), self.log2())
  }
}

impl Default for Capacity {
  #[inline]
  fn default() -> Capacity {
    Capacity::DEF
  }
}

impl From<Capacity> for NonZeroUsize {
  #[inline]
  fn from(other: Capacity) -> NonZeroUsize {
    other.as_nonzero()
  }
}

impl From<Capacity> for usize {
  #[inline]
  fn from(other: Capacity) -> usize {
    other.as_usize()
  }
}

#[derive(Copy, Clone, PartialEq, Eq)]
#[repr(usize)]
enum CapacityEnum {
  _Capacity1Shl4 = 1 << 4,
  _Capacity1Shl5 = 1 << 5,
  _Capacity1Shl6 = 1 << 6,
  _Capacity1Shl7 = 1 << 7,
  _Capacity1Shl8 = 1 << 8,
  _Capacity1Shl9 = 1 << 9,
  _Capacity1Shl10 = 1 << 10,
  _Capacity1Shl11 = 1 << 11,
  _Capacity1Shl12 = 1 << 12,
  _Capacity1Shl13 = 1 << 13,
  _Capacity1Shl14 = 1 << 14,
  _Capacity1Shl15 = 1 << 15,
  _Capacity1Shl16 = 1 << 16,
  _Capacity1Shl17 = 1 << 17,
  _Capacity1Shl18 = 1 << 18,
  _Capacity1Shl19 = 1 << 19,
  _Capacity1Shl20 = 1 << 20,
  _Capacity1Shl21 = 1 << 21,
  _Capacity1Shl22 = 1 << 22,
  _Capacity1Shl23 = 1 << 23,
  _Capacity1Shl24 = 1 << 24,
  _Capacity1Shl25 = 1 << 25,
  _Capacity1Shl26 = 1 << 26,
  _Capacity1Shl27 = 1 << 27,
}
