//! Per-thread access to a [`GrowTable`](crate::GrowTable): batched counters,
//! the protect/operate/retry dispatch loop.
//!
//! Ported from `grow_table.h`'s `GrowTableHandle` — `execute`/`cexecute`
//! wrap every base-table probe in a fresh epoch guard and retry on `Full`
//! (triggering a growth) or `Invalid` (helping an in-progress one along).
//! Each handle's insert/delete deltas are batched in a shared
//! [`HandleCounters`](crate::grow::HandleCounters), registered with the
//! table so [`GrowTable::element_count_unsafe`] can fold in every live
//! handle's unflushed contribution; they're folded into the table's own
//! approximate totals once [`Params::FLUSH_THRESHOLD`] updates accumulate.
use core::cell::Cell;
use std::sync::Arc;

use sdd::Guard;

use crate::base::BaseTable;
use crate::grow::GrowTable;
use crate::grow::HandleCounters;
use crate::params::Params;
use crate::result::ReturnCode;
use crate::sync::atomic::Ordering::Relaxed;

/// Flush-cadence bookkeeping local to one handle. The insert/delete deltas
/// themselves live in the handle's shared, registry-visible
/// [`HandleCounters`] rather than here, so
/// [`element_count_unsafe`](GrowTable::element_count_unsafe) can see every
/// live handle's unflushed contribution.
#[derive(Clone, Copy)]
struct LocalCount {
  epoch: u64,
  updates: u32,
}

impl LocalCount {
  const fn fresh(epoch: u64) -> Self {
    Self { epoch, updates: 0 }
  }
}

/// A thread-local view onto a [`GrowTable`], batching counter updates and
/// driving the grow/help-grow retry loop for every operation.
///
/// A `Handle` borrows its table rather than owning a reference-counted
/// handle to it, so the natural way to share one [`GrowTable`] across
/// threads is [`std::thread::scope`], each worker creating its own `Handle`.
pub struct Handle<'a, P = crate::DefaultParams>
where
  P: Params + ?Sized,
{
  table: &'a GrowTable<P>,
  counters: Arc<HandleCounters>,
  counts: Cell<LocalCount>,
}

impl<'a, P> Handle<'a, P>
where
  P: Params + ?Sized,
{
  pub(crate) fn new(table: &'a GrowTable<P>) -> Self {
    Self {
      table,
      counters: table.register_handle(),
      counts: Cell::new(LocalCount::fresh(table.epoch())),
    }
  }

  /// A diagnostic identifier unique to this handle for the lifetime of its
  /// process, used to distinguish handles in `tracing` spans. Derived from
  /// the address of this handle's registered counters rather than a
  /// dedicated counter, since uniqueness (not density or ordering) is all
  /// tracing output needs.
  pub fn id(&self) -> u64 {
    std::sync::Arc::as_ptr(&self.counters) as usize as u64
  }

  /// Retry count, reached in a single [`execute`](Self::execute) call, above
  /// which a `tracing::warn!` fires as a contention signal. Retries below
  /// this are ordinary and only traced.
  const RETRY_WARN_THRESHOLD: u32 = 16;

  /// Runs `op` against the current base table, growing (on `Full`) or
  /// helping an in-progress growth along (on `Invalid`) until `op` reports a
  /// terminal code.
  fn execute<T, F>(&self, mut op: F) -> (ReturnCode, T)
  where
    F: FnMut(&BaseTable<P>, &Guard) -> (ReturnCode, T),
  {
    let mut retries: u32 = 0;

    loop {
      let guard = Guard::new();
      let table: &BaseTable<P> = self.table.current(&guard);
      let (code, value) = op(table, &guard);

      match code {
        ReturnCode::Full => {
          #[cfg(feature = "tracing")]
          tracing::trace!(handle = self.id(), "table full, starting growth");
          self.table.grow(&guard);
        }
        ReturnCode::Invalid => {
          #[cfg(feature = "tracing")]
          tracing::trace!(handle = self.id(), "probe hit a frozen slot, helping growth");
          self.table.help_grow(&guard);
        }
        _ => return (code, value),
      }

      retries += 1;

      #[cfg(feature = "tracing")]
      if retries == Self::RETRY_WARN_THRESHOLD {
        tracing::warn!(handle = self.id(), retries, "operation retrying far more than usual, possible contention");
      }
    }
  }

  /// Inserts `key` with `value` if it is not already present.
  ///
  /// Returns `true` if the key was inserted, `false` if it was already
  /// present (the existing value is left untouched).
  pub fn insert(&self, key: u64, value: u64) -> bool {
    let (code, _) = self.execute(|table, guard| table.insert(key, value, guard));

    if code.successful() {
      self.bump(1, 0);
    }

    code.successful()
  }

  /// Applies `f` to the value currently stored under `key`, replacing it
  /// with the result. Returns the new value, or `None` if `key` is absent.
  pub fn update<F>(&self, key: u64, f: F) -> Option<u64>
  where
    F: Fn(u64) -> u64,
  {
    let (_, value) = self.execute(|table, guard| table.update(key, &f, guard));
    value
  }

  /// Identical to [`update`](Self::update): the base-table probe already
  /// applies `f` through a single compare-and-swap per attempt, so there is
  /// no distinct weaker-guarantee code path to provide here.
  pub fn update_unsafe<F>(&self, key: u64, f: F) -> Option<u64>
  where
    F: Fn(u64) -> u64,
  {
    self.update(key, f)
  }

  /// Inserts `(key, value)` if absent, otherwise applies `f` to the existing
  /// value. Returns the value now stored under `key`.
  pub fn insert_or_update<F>(&self, key: u64, value: u64, f: F) -> Option<u64>
  where
    F: Fn(u64) -> u64,
  {
    let (code, result) = self.execute(|table, guard| table.insert_or_update(key, value, &f, guard));

    if code == ReturnCode::SuccessIn {
      self.bump(1, 0);
    }

    result
  }

  /// Identical to [`insert_or_update`](Self::insert_or_update); see
  /// [`update_unsafe`](Self::update_unsafe).
  pub fn insert_or_update_unsafe<F>(&self, key: u64, value: u64, f: F) -> Option<u64>
  where
    F: Fn(u64) -> u64,
  {
    self.insert_or_update(key, value, f)
  }

  /// Inserts `(key, value)`, overwriting any existing value.
  pub fn insert_or_assign(&self, key: u64, value: u64) -> Option<u64> {
    self.insert_or_update(key, value, move |_old| value)
  }

  /// Returns the value stored under `key`, inserting `default` first if
  /// absent.
  pub fn entry_or_insert(&self, key: u64, default: u64) -> u64 {
    self.insert_or_update(key, default, |old| old).unwrap_or(default)
  }

  /// Removes `key`. Returns `true` if it was present.
  pub fn erase(&self, key: u64) -> bool {
    let (code, ()) = self.execute(|table, guard| (table.erase(key, guard), ()));

    if code.successful() {
      self.bump(0, 1);
    }

    code.successful()
  }

  /// Looks up `key`, returning its value if present.
  pub fn find(&self, key: u64) -> Option<u64> {
    let (_, value) = self.execute(|table, guard| table.find(key, guard));
    value
  }

  /// Returns a refreshable [`Reference`](crate::iter::Reference) to `key`: a
  /// cached `(k, v)` snapshot, updated explicitly via `refresh`, `store`,
  /// `update`, or `compare_exchange` rather than on every access.
  pub fn reference(&self, key: u64) -> crate::iter::Reference<'a, '_, P> {
    crate::iter::Reference::new(self, key)
  }

  /// Returns an approximate live-element count, folding in every handle's
  /// unflushed batched counters lazily (the count may lag a few operations
  /// behind under concurrent writers).
  pub fn element_count_approx(&self) -> u64 {
    self.table.elements_approx().max(0) as u64
  }

  /// Returns the exact number of live elements: the canonical totals plus
  /// every live handle's unflushed batched delta, this one included.
  ///
  /// # Safety contract
  ///
  /// The caller must ensure no concurrent inserts, deletes, or growth are in
  /// flight for the duration of the call.
  pub fn element_count_unsafe(&self) -> u64 {
    self.table.element_count_unsafe().max(0) as u64
  }

  fn bump(&self, inserted: i64, deleted: i64) {
    let epoch: u64 = self.table.epoch();
    let mut counts: LocalCount = self.counts.get();

    if counts.epoch != epoch {
      // A growth round completed since this handle last flushed. `end_grow`
      // recomputes the canonical totals from the migrated count, which
      // already subsumes whatever this handle had not yet flushed, so the
      // stale delta is discarded rather than folded in twice.
      counts = LocalCount::fresh(epoch);
      self.counters.inserted.store(0, Relaxed);
      self.counters.deleted.store(0, Relaxed);
    }

    if inserted != 0 {
      self.counters.inserted.fetch_add(inserted, Relaxed);
    }
    if deleted != 0 {
      self.counters.deleted.fetch_add(deleted, Relaxed);
    }
    counts.updates += 1;

    if counts.updates > P::FLUSH_THRESHOLD {
      self.table.add_inserted(self.counters.inserted.swap(0, Relaxed));
      self.table.add_deleted(self.counters.deleted.swap(0, Relaxed));
      counts = LocalCount::fresh(epoch);

      let guard = Guard::new();
      let capacity: usize = self.table.current(&guard).capacity;
      let elements: i64 = self.table.elements_approx().max(0);

      if (elements as usize).saturating_mul(100) > capacity.saturating_mul(P::FLUSH_FILL_PERCENT) {
        self.table.grow(&guard);
      }
    }

    self.counts.set(counts);
  }
}
