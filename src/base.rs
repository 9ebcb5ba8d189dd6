//! The base table: a fixed-capacity, open-addressed slot array with linear
//! probing, and the migration step used to copy it into a larger successor.
//!
//! Ported from `circular.h`'s `BaseCircular`.

use core::marker::PhantomData;

use sdd::AtomicOwned;
use sdd::Guard;

use crate::array::Array;
use crate::hash::Hash64;
use crate::params::Capacity;
use crate::params::Params;
use crate::result::ReturnCode;
use crate::slot::Slot;
use crate::sync::atomic::AtomicUsize;

/// Computes a successor capacity from the current size and the approximate
/// live/tombstone counts, the same growth trigger `grow_table.h::resize`
/// and `circular.h::resize` use (fill rate over half the table).
pub(crate) fn resize<P>(current: usize, inserted: usize, deleted: usize) -> usize
where
  P: Params + ?Sized,
{
  let fill_rate: f64 = (inserted as f64 - deleted as f64) / current as f64;

  if fill_rate > P::GROW_FILL_PERCENT as f64 / 100.0 {
    current << 1
  } else {
    current
  }
}

pub(crate) struct BaseTable<P>
where
  P: Params + ?Sized,
{
  pub(crate) capacity: usize,
  pub(crate) version: usize,
  bitmask: usize,
  right_shift: u32,
  slots: Array<Slot>,
  pub(crate) current_copy_block: AtomicUsize,
  pub(crate) next_table: AtomicOwned<BaseTable<P>>,
  marker: PhantomData<P>,
}

impl<P> BaseTable<P>
where
  P: Params + ?Sized,
{
  #[track_caller]
  pub(crate) fn new(capacity_hint: Capacity, version: usize) -> Self {
    match Self::try_new(capacity_hint, version) {
      Ok(table) => table,
      Err(layout) => crate::alloc::handle_alloc_error(layout),
    }
  }

  /// Allocates a new base table, reporting allocation failure instead of
  /// aborting. Used by [`GrowTable::new`](crate::grow::GrowTable::new), the
  /// one construction path the public API surfaces as fallible.
  pub(crate) fn try_new(capacity_hint: Capacity, version: usize) -> Result<Self, core::alloc::Layout> {
    let capacity: usize = capacity_hint.as_usize();

    Ok(Self {
      capacity,
      version,
      bitmask: capacity - 1,
      right_shift: compute_right_shift(capacity),
      slots: Array::try_new(capacity, |_, slot| Slot::init_empty(slot))?,
      current_copy_block: AtomicUsize::new(0),
      next_table: AtomicOwned::null(),
      marker: PhantomData,
    })
  }

  #[inline]
  fn home(&self, key: u64) -> usize {
    (<P::Hasher as Hash64>::hash(key) >> self.right_shift) as usize
  }

  #[inline]
  fn slot(&self, index: usize) -> &Slot {
    // SAFETY: `index` is always masked with `self.bitmask`, which is always
    // less than `self.capacity`, the length `self.slots` was allocated with.
    unsafe { self.slots.get_unchecked(index & self.bitmask) }
  }

  pub(crate) fn find(&self, key: u64, guard: &Guard) -> (ReturnCode, Option<u64>) {
    let home: usize = self.home(key);

    for i in home..home + P::MAX_DISPLACEMENT {
      let view = self.slot(i).load(guard);

      if view.is_marked() {
        return (ReturnCode::Invalid, None);
      }

      if view.compare_key(key) {
        return (ReturnCode::SuccessUp, view.value());
      }

      if view.is_empty() {
        return (ReturnCode::NotFound, None);
      }
    }

    (ReturnCode::NotFound, None)
  }

  /// Returns the `(key, value)` pair at raw slot `index`, if that slot holds
  /// a live entry.
  pub(crate) fn entry_at(&self, index: usize, guard: &Guard) -> Option<(u64, u64)> {
    let view = self.slot(index).load(guard);
    Some((view.key()?, view.value()?))
  }

  /// Counts live entries by scanning every slot directly.
  ///
  /// # Safety contract
  ///
  /// Callers must ensure no concurrent inserts, deletes, or growth are in
  /// flight; the scan is not linearizable against concurrent mutation.
  pub(crate) fn count_unsafe(&self, guard: &Guard) -> usize {
    let mut count: usize = 0;

    for i in 0..self.capacity {
      let view = self.slot(i).load(guard);

      if !view.is_empty() && !view.is_deleted() {
        count += 1;
      }
    }

    count
  }

  pub(crate) fn insert(&self, key: u64, value: u64, guard: &Guard) -> (ReturnCode, Option<u64>) {
    let home: usize = self.home(key);

    let mut i: usize = home;
    let end: usize = home + P::MAX_DISPLACEMENT;

    while i < end {
      let slot = self.slot(i);
      let view = slot.load(guard);

      if view.is_marked() {
        return (ReturnCode::Invalid, None);
      } else if view.compare_key(key) {
        return (ReturnCode::AlreadyUsed, view.value());
      } else if view.is_empty() {
        if slot.cas_insert(&view, key, value, guard) {
          return (ReturnCode::SuccessIn, Some(value));
        }
        // Someone else changed this slot; recheck it.
        continue;
      }

      i += 1;
    }

    (ReturnCode::Full, None)
  }

  pub(crate) fn update<F>(&self, key: u64, f: F, guard: &Guard) -> (ReturnCode, Option<u64>)
  where
    F: Fn(u64) -> u64,
  {
    let home: usize = self.home(key);

    let mut i: usize = home;
    let end: usize = home + P::MAX_DISPLACEMENT;

    while i < end {
      let slot = self.slot(i);
      let view = slot.load(guard);

      if view.is_marked() {
        return (ReturnCode::Invalid, None);
      } else if view.compare_key(key) {
        if slot.atomic_update(&view, key, &f, guard) {
          return (ReturnCode::SuccessUp, slot.load(guard).value());
        }
        continue;
      } else if view.is_empty() {
        return (ReturnCode::NotFound, None);
      }

      i += 1;
    }

    (ReturnCode::NotFound, None)
  }

  pub(crate) fn insert_or_update<F>(&self, key: u64, value: u64, f: F, guard: &Guard) -> (ReturnCode, Option<u64>)
  where
    F: Fn(u64) -> u64,
  {
    let home: usize = self.home(key);

    let mut i: usize = home;
    let end: usize = home + P::MAX_DISPLACEMENT;

    while i < end {
      let slot = self.slot(i);
      let view = slot.load(guard);

      if view.is_marked() {
        return (ReturnCode::Invalid, None);
      } else if view.compare_key(key) {
        if slot.atomic_update(&view, key, &f, guard) {
          return (ReturnCode::SuccessUp, slot.load(guard).value());
        }
        continue;
      } else if view.is_empty() {
        if slot.cas_insert(&view, key, value, guard) {
          return (ReturnCode::SuccessIn, Some(value));
        }
        continue;
      }

      i += 1;
    }

    (ReturnCode::Full, None)
  }

  pub(crate) fn erase(&self, key: u64, guard: &Guard) -> ReturnCode {
    let home: usize = self.home(key);

    let mut i: usize = home;
    let end: usize = home + P::MAX_DISPLACEMENT;

    while i < end {
      let slot = self.slot(i);
      let view = slot.load(guard);

      if view.is_marked() {
        return ReturnCode::Invalid;
      } else if view.compare_key(key) {
        if slot.atomic_delete(&view, key, guard) {
          return ReturnCode::SuccessDel;
        }
        continue;
      } else if view.is_empty() {
        return ReturnCode::NotFound;
      }

      i += 1;
    }

    ReturnCode::NotFound
  }

  /// Copies slots `[s, e)` of `self` into `target`, which must be
  /// `target.capacity / self.capacity` times larger. Returns the number of
  /// live (non-tombstone) entries copied.
  ///
  /// Ported from `circular.h::migrate`: the anchor-finding prologue marks
  /// forward from `s` until it finds (and freezes) the first empty slot, so
  /// each worker's claimed block becomes contiguous in the target even
  /// though blocks are claimed independently by concurrent helpers; the
  /// trailing loop continues past `e` for the same reason, stopping only at
  /// the next empty slot.
  pub(crate) fn migrate(&self, target: &Self, s: usize, e: usize, guard: &Guard) -> usize {
    let mut n: usize = 0;
    let mut i: usize = s;

    let mut shift: u32 = 0;
    while target.capacity > (self.capacity << shift) {
      shift += 1;
    }

    // Find the first empty bucket, marking it so nothing else can claim it.
    while i < e {
      let slot = self.slot(i);
      let view = slot.load(guard);

      if view.is_empty() {
        if slot.atomic_mark(&view, guard) {
          break;
        }
        continue;
      }

      i += 1;
    }

    for j in (i << shift)..(e << shift) {
      target.slot(j).clear_unsafe();
    }

    // Migrate until the end of the claimed block.
    while i < e {
      let slot = self.slot(i);
      let view = slot.load(guard);

      if !slot.atomic_mark(&view, guard) {
        continue;
      }

      if !view.is_empty() && !view.is_deleted() {
        if let (Some(key), Some(value)) = (view.key(), view.value()) {
          target.insert_unsafe(key, value, shift, i, guard);
          n += 1;
        }
      }

      i += 1;
    }

    // Continue until we find another empty bucket; the target positions in
    // this trailing run are not pre-initialized until we get here.
    let mut more: bool = true;

    while more {
      let pos: usize = i & self.bitmask;
      let t_pos: usize = pos << shift;

      for j in 0..(1_usize << shift) {
        target.slot(t_pos + j).clear_unsafe();
      }

      let slot = self.slot(pos);
      let view = slot.load(guard);

      let marked = slot.atomic_mark(&view, guard);
      more = !view.is_empty();

      if more && !view.is_deleted() {
        if let (Some(key), Some(value)) = (view.key(), view.value()) {
          target.insert_unsafe(key, value, shift, pos, guard);
          n += 1;
        }
      }

      if marked {
        i += 1;
      }
    }

    n
  }

  /// Inserts `(key, value)` into `self` assuming no concurrent writer can
  /// observe `self` yet (used only for entries copied in from a smaller
  /// source table during migration, before `self` is published).
  ///
  /// Ported from `circular.h::insert_unsafe`: a plain linear probe with no
  /// CAS, since nothing else can race a write to a not-yet-published table.
  fn insert_unsafe(&self, key: u64, value: u64, shift: u32, source_index: usize, guard: &Guard) {
    let home: usize = self.home(key).max(source_index << shift);

    for i in home..home + P::MAX_DISPLACEMENT {
      let slot = self.slot(i);

      if slot.load(guard).is_empty() {
        slot.init_unsafe(key, value);
        return;
      }
    }

    unreachable!("base table is large enough that migration cannot overflow a probe run");
  }
}

impl<P> Drop for BaseTable<P>
where
  P: Params + ?Sized,
{
  /// Drains every slot before `self.slots` is deallocated.
  ///
  /// `Array<Slot>`'s own `Drop` only frees the backing allocation; it never
  /// runs each `Slot`'s destructor, so whatever live entry a slot still
  /// points at would otherwise be leaked. Mirrors `Table::drop_slow`'s
  /// swap-and-drop pattern, just over every slot rather than stopping once
  /// a tracked live count reaches zero (a base table has no such count of
  /// its own to stop early on).
  fn drop(&mut self) {
    for slot in self.slots.as_slice() {
      // SAFETY: `Drop` has exclusive access; no concurrent reader or writer
      // can still be probing this table's slots.
      slot.clear_unsafe();
    }
  }
}

/// Computes the shift such that `hash(k) >> shift` lands in `0..capacity`.
fn compute_right_shift(capacity: usize) -> u32 {
  u64::BITS - capacity.ilog2()
}

#[cfg(test)]
mod tests {
  use sdd::Guard;

  use super::BaseTable;
  use crate::params::Capacity;
  use crate::params::DefaultParams;
  use crate::result::ReturnCode;

  type T = BaseTable<DefaultParams>;

  #[test]
  fn test_insert_then_find() {
    let table = T::new(Capacity::new(1024), 0);
    let guard = Guard::new();

    let (code, _) = table.insert(42, 100, &guard);
    assert_eq!(code, ReturnCode::SuccessIn);
    assert_eq!(table.find(42, &guard).1, Some(100));
  }

  #[test]
  fn test_insert_duplicate_is_already_used() {
    let table = T::new(Capacity::new(1024), 0);
    let guard = Guard::new();

    table.insert(1, 1, &guard);
    let (code, _) = table.insert(1, 2, &guard);
    assert_eq!(code, ReturnCode::AlreadyUsed);
    assert_eq!(table.find(1, &guard).1, Some(1));
  }

  #[test]
  fn test_update_missing_key_not_found() {
    let table = T::new(Capacity::new(1024), 0);
    let guard = Guard::new();

    let (code, _) = table.update(5, |v| v + 1, &guard);
    assert_eq!(code, ReturnCode::NotFound);
  }

  #[test]
  fn test_erase_then_find_returns_none() {
    let table = T::new(Capacity::new(1024), 0);
    let guard = Guard::new();

    table.insert(9, 9, &guard);
    assert_eq!(table.erase(9, &guard), ReturnCode::SuccessDel);
    assert_eq!(table.find(9, &guard).1, None);
  }

  #[test]
  fn test_migrate_preserves_live_entries() {
    let source = T::new(Capacity::new(64), 0);
    let target = T::new(Capacity::new(128), 1);
    let guard = Guard::new();

    for k in 1..40 {
      source.insert(k, k * 10, &guard);
    }
    source.erase(5, &guard);

    source.migrate(&target, 0, source.capacity, &guard);

    for k in 1..40 {
      if k == 5 {
        assert_eq!(target.find(k, &guard).1, None);
      } else {
        assert_eq!(target.find(k, &guard).1, Some(k * 10));
      }
    }
  }
}
