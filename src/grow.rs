//! The growable table facade: a published [`BaseTable`] plus the
//! online-growth orchestration (`grow`/`help_grow`/`end_grow`) that swaps it
//! for a larger successor without ever stopping concurrent readers.
//!
//! Ported from `estrat_async.hpp`'s `_growable_table_type`/`local_data_type`.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::Weak;

use sdd::AtomicOwned;
use sdd::Guard;
use sdd::Owned;
use sdd::Tag;

use crate::base::resize;
use crate::base::BaseTable;
use crate::deamortized::DeamortizedHandle;
use crate::error::GTabError;
use crate::handle::Handle;
use crate::iter::Iter;
use crate::params::Capacity;
use crate::params::Params;
use crate::sync::atomic::AtomicBool;
use crate::sync::atomic::AtomicI64;
use crate::sync::atomic::AtomicU64;
use crate::sync::atomic::AtomicUsize;
use crate::sync::atomic::Ordering::Acquire;
use crate::sync::atomic::Ordering::Relaxed;
use crate::sync::atomic::Ordering::Release;

/// The unflushed insert/delete delta a single [`Handle`](crate::handle::Handle)
/// has accumulated since its last flush into the shared approximate totals.
///
/// Shared between a `Handle` and [`GrowTable`]'s handle registry so
/// [`element_count_unsafe`](crate::handle::Handle::element_count_unsafe) can
/// fold in every live handle's unflushed contribution. Mirrors the
/// commented-out `handle_ptr` registry in `grow_table.h`.
pub(crate) struct HandleCounters {
  pub(crate) inserted: AtomicI64,
  pub(crate) deleted: AtomicI64,
}

impl Default for HandleCounters {
  fn default() -> Self {
    Self {
      inserted: AtomicI64::new(0),
      deleted: AtomicI64::new(0),
    }
  }
}

/// A concurrent, growable hash table keyed on `u64` with `u64` values.
///
/// `GrowTable` is the immovable, thread-shared core; threads interact with it
/// through a borrowed [`Handle`] (see [`get_handle`](Self::get_handle)).
/// Growth happens online: a full table publishes a larger successor and
/// every handle that touches the table afterwards helps migrate entries into
/// it, so no caller ever blocks on a stop-the-world resize.
///
/// Unlike `estrat_async.hpp`'s `global_data_type`, the published/next table
/// pair isn't CAS'd to `nullptr` to signal "growth in progress, nobody may
/// observe `current` right now" — here `current` always points at a live
/// table, and a dedicated `closing` flag arbitrates which helper gets to
/// perform the swap. This avoids readers ever needing to handle a reachable
/// null `current`.
///
/// # Example
///
/// ```
/// use gtab::{GrowTable, Capacity};
///
/// let table: GrowTable = GrowTable::new(Capacity::new(1024)).unwrap();
/// let handle = table.get_handle();
///
/// handle.insert(1, 100);
/// assert_eq!(handle.find(1), Some(100));
/// ```
pub struct GrowTable<P = crate::DefaultParams>
where
  P: Params + ?Sized,
{
  current: AtomicOwned<BaseTable<P>>,
  epoch: AtomicU64,
  n_helpers: AtomicUsize,
  elements: AtomicI64,
  dummies: AtomicI64,
  pending_migrated: AtomicI64,
  closing: AtomicBool,
  handles: Mutex<Vec<Weak<HandleCounters>>>,
}

impl<P> GrowTable<P>
where
  P: Params + ?Sized,
{
  /// Creates a new table with at least `capacity_hint` slots.
  ///
  /// # Errors
  ///
  /// Returns [`GTabError::Alloc`] if the initial slot array cannot be
  /// allocated.
  pub fn new(capacity_hint: Capacity) -> Result<Self, GTabError> {
    let table: BaseTable<P> = BaseTable::try_new(capacity_hint, 0).map_err(GTabError::Alloc)?;

    let current: AtomicOwned<BaseTable<P>> = AtomicOwned::null();
    current.swap((Some(Owned::new(table)), Tag::None), Release);

    Ok(Self {
      current,
      epoch: AtomicU64::new(0),
      n_helpers: AtomicUsize::new(0),
      elements: AtomicI64::new(0),
      dummies: AtomicI64::new(0),
      pending_migrated: AtomicI64::new(0),
      closing: AtomicBool::new(false),
      handles: Mutex::new(Vec::new()),
    })
  }

  /// Registers a new handle's unflushed counters, returning the shared
  /// [`HandleCounters`] it should accumulate into.
  ///
  /// Opportunistically drops stale (dead) entries from the registry so it
  /// does not grow unbounded as handles are created and dropped over a
  /// table's lifetime.
  pub(crate) fn register_handle(&self) -> Arc<HandleCounters> {
    let counters = Arc::new(HandleCounters::default());

    let mut handles = self.handles.lock().expect("handle registry poisoned");
    handles.retain(|weak| weak.strong_count() > 0);
    handles.push(Arc::downgrade(&counters));

    counters
  }

  /// Returns the exact number of live elements: the canonical totals plus
  /// every currently registered handle's unflushed batched delta.
  ///
  /// # Safety contract
  ///
  /// The caller must ensure no concurrent inserts, deletes, or growth are in
  /// flight for the duration of the call.
  pub(crate) fn element_count_unsafe(&self) -> i64 {
    let mut total: i64 = self.elements_approx();

    let handles = self.handles.lock().expect("handle registry poisoned");

    for weak in handles.iter() {
      if let Some(counters) = weak.upgrade() {
        total += counters.inserted.load(Relaxed) - counters.deleted.load(Relaxed);
      }
    }

    total
  }

  /// Returns the currently published base table.
  #[inline]
  pub(crate) fn current<'guard>(&self, guard: &'guard Guard) -> &'guard BaseTable<P> {
    // SAFETY: `current` is swapped only by `end_grow`'s single winner, which
    // always installs a live table before retiring the old one, so the
    // loaded pointer is never null for the lifetime of `self`.
    unsafe {
      self
        .current
        .load(Acquire, guard)
        .as_ref()
        .expect("invalid params: GrowTable must always have a published current table")
    }
  }

  #[inline]
  pub(crate) fn epoch(&self) -> u64 {
    self.epoch.load(Acquire)
  }

  #[inline]
  pub(crate) fn elements_approx(&self) -> i64 {
    self.elements.load(Relaxed) - self.dummies.load(Relaxed)
  }

  #[inline]
  pub(crate) fn add_inserted(&self, n: i64) {
    self.elements.fetch_add(n, Relaxed);
  }

  #[inline]
  pub(crate) fn add_deleted(&self, n: i64) {
    self.dummies.fetch_add(n, Relaxed);
  }

  /// Returns a new handle for this table, borrowing it for the handle's
  /// lifetime. Every thread that touches a `GrowTable` should create its own
  /// handle; handles are not `Sync` and are not meant to be shared.
  pub fn get_handle(&self) -> Handle<'_, P> {
    Handle::new(self)
  }

  /// Returns a new deamortized handle: identical to [`get_handle`](Self::get_handle)
  /// except it spreads any in-progress growth's migration cost across many
  /// calls instead of paying for it all in one.
  pub fn deamortized_handle(&self) -> DeamortizedHandle<'_, P> {
    DeamortizedHandle::new(self)
  }

  /// Returns an iterator over every live `(key, value)` pair currently in the
  /// table. Not linearizable against a concurrent resize; see [`Iter`] for
  /// the exact guarantee.
  pub fn iter(&self) -> Iter<'_, P> {
    Iter::new(self)
  }

  /// Returns the slot count of the currently published base table.
  ///
  /// This is a point-in-time snapshot: a concurrent growth may publish a
  /// larger successor immediately after this call returns.
  pub fn capacity(&self) -> usize {
    self.current(&Guard::new()).capacity
  }

  /// Starts (or joins an already-started) growth round and blocks until it
  /// completes. Mirrors `local_data_type::grow`.
  pub(crate) fn grow(&self, guard: &Guard) {
    self.start_grow(guard);
    self.help_grow(guard);
  }

  /// Publishes a speculative successor table as `next_table` if none is
  /// already in flight, without migrating any of it. Split out from
  /// [`grow`](Self::grow) so [`DeamortizedHandle`](crate::deamortized::DeamortizedHandle)
  /// can kick a round off without immediately paying for the whole
  /// migration.
  pub(crate) fn start_grow(&self, guard: &Guard) {
    let current: &BaseTable<P> = self.current(guard);

    let elements: i64 = self.elements.load(Relaxed).max(0);
    let dummies: i64 = self.dummies.load(Relaxed).max(0);

    let next_capacity: usize = resize::<P>(current.capacity, elements as usize, dummies as usize);
    let next_capacity: Capacity = Capacity::new(next_capacity.max(current.capacity << 1));

    let speculative: Owned<BaseTable<P>> = Owned::new(BaseTable::new(next_capacity, current.version + 1));
    let expected = current.next_table.load(Acquire, guard);

    // If this CAS loses, someone else already published a successor; the
    // speculative table we built is simply dropped and we join their round.
    let _ = current
      .next_table
      .compare_exchange((expected, Tag::None), (Some(speculative), Tag::None), Release, Acquire, guard);
  }

  /// Joins an in-progress growth round: migrates whatever blocks remain and
  /// waits for the winning closer to publish the successor table.
  pub(crate) fn help_grow(&self, guard: &Guard) {
    let current: &BaseTable<P> = self.current(guard);

    let next = current.next_table.load(Acquire, guard);

    // SAFETY: by the time a caller observes `Invalid` or calls `help_grow`
    // after losing the `grow` race, `next_table` has already been published
    // by the winner of the CAS above.
    let Some(next) = (unsafe { next.as_ref() }) else {
      return;
    };

    self.n_helpers.fetch_add(1, Relaxed);

    loop {
      let start: usize = current.current_copy_block.fetch_add(P::MIGRATION_BLOCK, Relaxed);

      if start >= current.capacity {
        break;
      }

      let end: usize = (start + P::MIGRATION_BLOCK).min(current.capacity);
      let migrated: usize = current.migrate(next, start, end, guard);

      self.pending_migrated.fetch_add(migrated as i64, Relaxed);
    }

    self.n_helpers.fetch_sub(1, Release);

    self.end_grow(guard);
  }

  /// Migrates at most one claimed block of an in-progress growth round, used
  /// by [`DeamortizedHandle`](crate::deamortized::DeamortizedHandle) to
  /// spread migration cost across many calls instead of draining every
  /// remaining block in one go like [`help_grow`](Self::help_grow).
  pub(crate) fn help_grow_one_block(&self, guard: &Guard) {
    let current: &BaseTable<P> = self.current(guard);

    let next = current.next_table.load(Acquire, guard);

    let Some(next) = (unsafe { next.as_ref() }) else {
      return;
    };

    self.n_helpers.fetch_add(1, Relaxed);

    let start: usize = current.current_copy_block.fetch_add(P::MIGRATION_BLOCK, Relaxed);

    if start < current.capacity {
      let end: usize = (start + P::MIGRATION_BLOCK).min(current.capacity);
      let migrated: usize = current.migrate(next, start, end, guard);

      self.pending_migrated.fetch_add(migrated as i64, Relaxed);
    }

    self.n_helpers.fetch_sub(1, Release);

    self.end_grow(guard);
  }

  /// Waits for every helper to finish its claimed blocks, then has a single
  /// winner publish the successor as `current` and retire the old table.
  fn end_grow(&self, guard: &Guard) {
    while self.n_helpers.load(Acquire) != 0 {
      core::hint::spin_loop();
    }

    if self.closing.compare_exchange(false, true, Acquire, Relaxed).is_err() {
      // Another thread is already closing this round.
      return;
    }

    let current: &BaseTable<P> = self.current(guard);

    if self.n_helpers.load(Acquire) != 0 || current.current_copy_block.load(Acquire) < current.capacity {
      // Migration isn't actually finished: either another helper joined
      // after the spin-wait above, or (the deamortized path) this caller
      // only migrated a single block and blocks remain unclaimed. Closing
      // now would publish `next` with the rest of `current`'s entries never
      // copied over. Release the claim and let a later helper close once
      // every block has actually landed.
      self.closing.store(false, Release);
      return;
    }

    let (next, _tag) = current.next_table.swap((None, Tag::None), Acquire);

    let Some(next) = next else {
      // Nothing to close (another closer already finished this round).
      self.closing.store(false, Release);
      return;
    };

    let (old, _tag) = self.current.swap((Some(next), Tag::None), Release);

    let migrated: i64 = self.pending_migrated.swap(0, Relaxed);
    self.elements.store(migrated, Relaxed);
    self.dummies.store(0, Relaxed);

    self.epoch.fetch_add(1, Release);

    // `old`'s `Drop` schedules the table for safe reclamation once every
    // thread that could still be holding a guard over it has passed through
    // a new epoch; readers already inside `current()` keep seeing a live
    // table for the remainder of their guard's lifetime.
    drop(old);

    self.closing.store(false, Release);

    #[cfg(feature = "tracing")]
    tracing::debug!(epoch = self.epoch.load(Relaxed), capacity = self.current(guard).capacity, "grow table published");
  }
}

#[cfg(test)]
mod tests {
  use sdd::Guard;

  use super::GrowTable;
  use crate::params::Capacity;
  use crate::params::DefaultParams;

  type T = GrowTable<DefaultParams>;

  #[test]
  fn test_new_publishes_a_current_table() {
    let guard = Guard::new();
    let gt = T::new(Capacity::new(1024)).unwrap();
    assert_eq!(gt.current(&guard).capacity, 1024);
  }

  #[test]
  fn test_grow_publishes_larger_table() {
    let guard = Guard::new();
    let gt = T::new(Capacity::new(1024)).unwrap();

    for k in 1..800u64 {
      gt.current(&guard).insert(k, k, &guard);
      gt.add_inserted(1);
    }

    gt.grow(&guard);

    assert!(gt.current(&guard).capacity > 1024);

    for k in 1..800u64 {
      assert_eq!(gt.current(&guard).find(k, &guard).1, Some(k));
    }
  }

  #[test]
  fn test_epoch_bumped_after_grow() {
    let guard = Guard::new();
    let gt = T::new(Capacity::new(1024)).unwrap();
    let before = gt.epoch();
    gt.grow(&guard);
    assert_eq!(gt.epoch(), before + 1);
  }

  #[test]
  fn test_help_grow_one_block_does_not_close_round_early() {
    let guard = Guard::new();
    let gt = T::new(Capacity::new(8192)).unwrap();

    for k in 1..100u64 {
      gt.current(&guard).insert(k, k, &guard);
      gt.add_inserted(1);
    }

    gt.start_grow(&guard);

    let before_epoch: u64 = gt.epoch();
    let before_capacity: usize = gt.current(&guard).capacity;

    // `DefaultParams::MIGRATION_BLOCK` is 4096, so an 8192-slot table needs
    // two blocks migrated before the round may close; one `help_grow_one_block`
    // call must leave the round open rather than publishing a half-migrated
    // successor.
    gt.help_grow_one_block(&guard);
    assert_eq!(gt.epoch(), before_epoch, "round closed after only one of two blocks migrated");
    assert_eq!(gt.current(&guard).capacity, before_capacity);

    gt.help_grow_one_block(&guard);
    assert_eq!(gt.epoch(), before_epoch + 1);
    assert!(gt.current(&guard).capacity > before_capacity);

    for k in 1..100u64 {
      assert_eq!(gt.current(&guard).find(k, &guard).1, Some(k));
    }
  }
}
