//! The atomic slot: a single cell of a [`BaseTable`](crate::base::BaseTable).
//!
//! Every mutation goes through a single compare-and-swap of the slot's atomic
//! pointer word. A null pointer means *empty*; otherwise the pointer
//! addresses a boxed [`Entry`] carrying the key, value, and the
//! *deleted*/*marked* flags together, so a single CAS on the pointer is
//! enough to publish all three atomically — the same guarantee the teacher
//! gets from swapping an [`sdd::AtomicOwned`] pointer wholesale in
//! `table.rs`'s `store` helper.

use core::mem::MaybeUninit;

use sdd::AtomicOwned;
use sdd::Guard;
use sdd::Owned;
use sdd::Ptr;
use sdd::Tag;

use crate::sync::atomic::Ordering::Acquire;
use crate::sync::atomic::Ordering::AcqRel;
use crate::sync::atomic::Ordering::Relaxed;

/// Reserved key meaning "this slot has never held a value".
pub const EMPTY_KEY: u64 = 0;

/// Reserved key written into erased slots' tombstones. Never a valid
/// insertable key.
pub const DELETED_KEY: u64 = u64::MAX;

const DELETED: u8 = 0b01;
const MARKED: u8 = 0b10;

pub(crate) struct Entry {
  key: u64,
  value: u64,
  flags: u8,
}

impl Entry {
  #[inline]
  const fn live(key: u64, value: u64) -> Self {
    Self { key, value, flags: 0 }
  }
}

/// A single atomic cell in a base table.
#[repr(transparent)]
pub(crate) struct Slot {
  entry: AtomicOwned<Entry>,
}

/// A borrowed, guard-lifetime view of a slot's current contents.
pub(crate) struct SlotView<'guard> {
  ptr: Ptr<'guard, Entry>,
}

impl<'guard> SlotView<'guard> {
  #[inline]
  pub(crate) fn is_empty(&self) -> bool {
    self.ptr.is_null()
  }

  #[inline]
  fn entry(&self) -> Option<&Entry> {
    // SAFETY: `self.ptr` was loaded under a live guard, which keeps the
    // pointee reachable for `'guard`.
    unsafe { self.ptr.as_ref() }
  }

  #[inline]
  pub(crate) fn is_deleted(&self) -> bool {
    self.entry().is_some_and(|e| e.flags & DELETED != 0)
  }

  #[inline]
  pub(crate) fn is_marked(&self) -> bool {
    self.entry().is_some_and(|e| e.flags & MARKED != 0)
  }

  #[inline]
  pub(crate) fn compare_key(&self, key: u64) -> bool {
    self.entry().is_some_and(|e| e.flags & DELETED == 0 && e.key == key)
  }

  #[inline]
  pub(crate) fn key(&self) -> Option<u64> {
    self.entry().map(|e| e.key)
  }

  #[inline]
  pub(crate) fn value(&self) -> Option<u64> {
    self.entry().filter(|e| e.flags & DELETED == 0).map(|e| e.value)
  }
}

impl Slot {
  #[inline]
  pub(crate) fn init_empty(slot: &mut MaybeUninit<Self>) {
    slot.write(Self {
      entry: AtomicOwned::null(),
    });
  }

  /// Non-atomic initialization used only while building a target table
  /// during migration, before it is published to any other thread.
  #[inline]
  pub(crate) fn init_unsafe(&self, key: u64, value: u64) {
    self.entry.swap((Some(Owned::new(Entry::live(key, value))), Tag::None), Relaxed);
  }

  #[inline]
  pub(crate) fn clear_unsafe(&self) {
    self.entry.swap((None, Tag::None), Relaxed);
  }

  #[inline]
  pub(crate) fn load<'guard>(&self, guard: &'guard Guard) -> SlotView<'guard> {
    SlotView {
      ptr: self.entry.load(Acquire, guard),
    }
  }

  /// Attempts to transition an empty slot to holding `(key, value)`.
  ///
  /// Returns `true` on success. On failure, the slot did not match `expected`
  /// any more (someone else raced us) and the caller should reread.
  #[inline]
  pub(crate) fn cas_insert(&self, expected: &SlotView<'_>, key: u64, value: u64, guard: &Guard) -> bool {
    let new: Owned<Entry> = Owned::new(Entry::live(key, value));

    self
      .entry
      .compare_exchange(
        (expected.ptr, Tag::None),
        (Some(new), Tag::None),
        AcqRel,
        Acquire,
        guard,
      )
      .is_ok()
  }

  /// Atomically replaces a live slot's value, calling `f(old_value)` to
  /// compute the replacement. Returns `true` on success.
  #[inline]
  pub(crate) fn atomic_update<F>(&self, expected: &SlotView<'_>, key: u64, f: F, guard: &Guard) -> bool
  where
    F: FnOnce(u64) -> u64,
  {
    let Some(old_value) = expected.value() else {
      return false;
    };

    let new: Owned<Entry> = Owned::new(Entry::live(key, f(old_value)));

    self
      .entry
      .compare_exchange(
        (expected.ptr, Tag::None),
        (Some(new), Tag::None),
        AcqRel,
        Acquire,
        guard,
      )
      .is_ok()
  }

  /// Atomically tombstones a live slot, preserving its key so later probes
  /// in the same run still stop correctly.
  #[inline]
  pub(crate) fn atomic_delete(&self, expected: &SlotView<'_>, key: u64, guard: &Guard) -> bool {
    let new: Owned<Entry> = Owned::new(Entry {
      key,
      value: DELETED_KEY,
      flags: DELETED,
    });

    self
      .entry
      .compare_exchange(
        (expected.ptr, Tag::None),
        (Some(new), Tag::None),
        AcqRel,
        Acquire,
        guard,
      )
      .is_ok()
  }

  /// Atomically marks a slot as frozen for migration, preserving its key,
  /// value, and deleted flag. Returns `true` on success (including when the
  /// slot was already marked by a different run of this check).
  #[inline]
  pub(crate) fn atomic_mark(&self, expected: &SlotView<'_>, guard: &Guard) -> bool {
    if expected.is_marked() {
      return true;
    }

    let new: Owned<Entry> = match expected.entry() {
      Some(e) => Owned::new(Entry {
        key: e.key,
        value: e.value,
        flags: e.flags | MARKED,
      }),
      None => {
        // Marking an empty slot: publish a dead tombstone-shaped entry whose
        // only purpose is carrying the marked bit, so later probes treat it
        // as deleted-and-frozen rather than empty.
        Owned::new(Entry {
          key: DELETED_KEY,
          value: DELETED_KEY,
          flags: DELETED | MARKED,
        })
      }
    };

    self
      .entry
      .compare_exchange(
        (expected.ptr, Tag::None),
        (Some(new), Tag::None),
        AcqRel,
        Acquire,
        guard,
      )
      .is_ok()
  }

  /// Clears the marked bit, used only by the deamortized (in-place) growth
  /// variant once a block's migration has completed.
  #[inline]
  pub(crate) fn unmark(&self, expected: &SlotView<'_>, guard: &Guard) -> bool {
    let Some(e) = expected.entry() else {
      return true;
    };

    if e.flags & MARKED == 0 {
      return true;
    }

    let new: Owned<Entry> = Owned::new(Entry {
      key: e.key,
      value: e.value,
      flags: e.flags & !MARKED,
    });

    self
      .entry
      .compare_exchange(
        (expected.ptr, Tag::None),
        (Some(new), Tag::None),
        AcqRel,
        Acquire,
        guard,
      )
      .is_ok()
  }
}

#[cfg(test)]
mod tests {
  use core::mem::MaybeUninit;

  use sdd::Guard;

  use super::Slot;

  fn empty_slot() -> Slot {
    let mut slot: MaybeUninit<Slot> = MaybeUninit::uninit();
    Slot::init_empty(&mut slot);
    // SAFETY: `init_empty` just initialized `slot`.
    unsafe { slot.assume_init() }
  }

  #[test]
  fn test_insert_into_empty() {
    let slot = empty_slot();
    let guard = Guard::new();
    let view = slot.load(&guard);

    assert!(view.is_empty());
    assert!(slot.cas_insert(&view, 42, 100, &guard));

    let view = slot.load(&guard);
    assert!(view.compare_key(42));
    assert_eq!(view.value(), Some(100));
  }

  #[test]
  fn test_update_changes_value() {
    let slot = empty_slot();
    let guard = Guard::new();
    let view = slot.load(&guard);
    assert!(slot.cas_insert(&view, 7, 1, &guard));

    let view = slot.load(&guard);
    assert!(slot.atomic_update(&view, 7, |old| old + 1, &guard));

    let view = slot.load(&guard);
    assert_eq!(view.value(), Some(2));
  }

  #[test]
  fn test_delete_preserves_key_for_probing() {
    let slot = empty_slot();
    let guard = Guard::new();
    let view = slot.load(&guard);
    assert!(slot.cas_insert(&view, 7, 1, &guard));

    let view = slot.load(&guard);
    assert!(slot.atomic_delete(&view, 7, &guard));

    let view = slot.load(&guard);
    assert!(view.is_deleted());
    assert!(!view.compare_key(7));
    assert_eq!(view.key(), Some(7));
  }

  #[test]
  fn test_mark_empty_slot() {
    let slot = empty_slot();
    let guard = Guard::new();
    let view = slot.load(&guard);
    assert!(slot.atomic_mark(&view, &guard));

    let view = slot.load(&guard);
    assert!(view.is_marked());
    // Freezing the slot is only meaningful as a caller-level gate: probing
    // code checks `is_marked()` before attempting a CAS at all, the same
    // way `circular.h`'s insert loop bails out on `curr.isMarked()`.
  }
}
