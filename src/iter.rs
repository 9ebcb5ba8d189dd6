//! Iteration over a table's live entries, and a refreshable reference to a
//! single key.
//!
//! Ported from `base_iterator.h`/`grow_iterator.h`. The original refreshes a
//! cached slot position whenever the table's version counter changes mid-walk
//! (`base_refresh_ptr`); this port re-derives the table to scan from the
//! shared [`GrowTable`] on every step instead, under one held
//! [`sdd::Guard`] for the whole walk. If a growth round completes mid-walk
//! the remaining steps continue against the successor table at the same
//! slot index, so the walk is not a linearizable snapshot across a resize —
//! entries can be skipped or, if already migrated past the current index,
//! revisited. [`Reference`] covers the complementary single-key case: look
//! up once, then re-query against whatever table is current at the time.

use core::cell::Cell;

use sdd::Guard;

use crate::grow::GrowTable;
use crate::handle::Handle;
use crate::params::Params;

/// An iterator over a table's live entries.
pub struct Iter<'a, P>
where
  P: Params + ?Sized,
{
  table: &'a GrowTable<P>,
  guard: Guard,
  index: usize,
}

impl<'a, P> Iter<'a, P>
where
  P: Params + ?Sized,
{
  pub(crate) fn new(table: &'a GrowTable<P>) -> Self {
    Self {
      table,
      guard: Guard::new(),
      index: 0,
    }
  }
}

impl<'a, P> Iterator for Iter<'a, P>
where
  P: Params + ?Sized,
{
  type Item = (u64, u64);

  fn next(&mut self) -> Option<Self::Item> {
    loop {
      let base = self.table.current(&self.guard);

      if self.index >= base.capacity {
        return None;
      }

      let index: usize = self.index;
      self.index += 1;

      if let Some(pair) = base.entry_at(index, &self.guard) {
        return Some(pair);
      }
    }
  }
}

/// A reference to a single key: a cached `(k, v)` snapshot, refreshed
/// explicitly rather than on every access.
///
/// Mirrors `ReferenceGrowT`, which caches a slot pointer and a `(k, v)` copy
/// and only re-locates the key (by re-probing the current table) when
/// `refresh()` notices the cached table version is stale. This port has no
/// slot pointer to cache (every write already goes through a fresh probe via
/// [`Handle`]), so `refresh()` here always re-probes; the snapshot still
/// only changes on an explicit `refresh`/`store`/`update`/`compare_exchange`
/// call, matching the original's read-your-writes-at-refresh contract.
pub struct Reference<'a, 'h, P>
where
  P: Params + ?Sized,
{
  handle: &'h Handle<'a, P>,
  key: u64,
  cached: Cell<Option<u64>>,
}

impl<'a, 'h, P> Reference<'a, 'h, P>
where
  P: Params + ?Sized,
{
  pub(crate) fn new(handle: &'h Handle<'a, P>, key: u64) -> Self {
    let cached: Option<u64> = handle.find(key);
    Self {
      handle,
      key,
      cached: Cell::new(cached),
    }
  }

  /// Returns the value cached as of the last lookup, [`refresh`](Self::refresh),
  /// or write through this reference.
  pub fn get(&self) -> Option<u64> {
    self.cached.get()
  }

  /// Re-probes the table for this reference's key, updating (and returning)
  /// the cached value.
  pub fn refresh(&self) -> Option<u64> {
    let value: Option<u64> = self.handle.find(self.key);
    self.cached.set(value);
    value
  }

  /// Unconditionally stores `new` under this reference's key, inserting it
  /// if the key is absent. Returns the value that was there before.
  pub fn store(&self, new: u64) -> Option<u64> {
    let old: Option<u64> = self.handle.insert_or_assign(self.key, new);
    self.cached.set(Some(new));
    old
  }

  /// Inserts `default` if this reference's key is absent, otherwise applies
  /// `f` to the existing value. Returns the value now stored under the key.
  pub fn update<F>(&self, default: u64, f: F) -> u64
  where
    F: Fn(u64) -> u64,
  {
    let value: u64 = self.handle.insert_or_update(self.key, default, f).unwrap_or(default);
    self.cached.set(Some(value));
    value
  }

  /// Atomically replaces the value under this reference's key with `new`,
  /// but only if it is currently `expected`.
  ///
  /// Returns `Ok(new)` on success. On failure returns `Err` with whatever
  /// value was actually found at the moment of the attempt (`None` if the
  /// key is absent).
  pub fn compare_exchange(&self, expected: u64, new: u64) -> Result<u64, Option<u64>> {
    let matched: Cell<bool> = Cell::new(false);

    let result: Option<u64> = self.handle.update(self.key, |old| {
      if old == expected {
        matched.set(true);
        new
      } else {
        old
      }
    });

    let outcome: Result<u64, Option<u64>> = match result {
      Some(_) if matched.get() => Ok(new),
      Some(actual) => Err(Some(actual)),
      None => Err(None),
    };

    self.cached.set(match outcome {
      Ok(value) => Some(value),
      Err(actual) => actual,
    });

    outcome
  }
}

#[cfg(test)]
mod tests {
  use super::Iter;
  use crate::grow::GrowTable;
  use crate::handle::Handle;
  use crate::params::Capacity;
  use crate::params::DefaultParams;

  type T = GrowTable<DefaultParams>;

  #[test]
  fn test_iter_visits_every_inserted_key() {
    let table = T::new(Capacity::new(128)).unwrap();
    let handle = Handle::new(&table);

    for k in 1..50u64 {
      handle.insert(k, k * 2);
    }

    let mut seen: Vec<(u64, u64)> = Iter::new(&table).collect();
    seen.sort_unstable();

    let mut expected: Vec<(u64, u64)> = (1..50u64).map(|k| (k, k * 2)).collect();
    expected.sort_unstable();

    assert_eq!(seen, expected);
  }

  #[test]
  fn test_iter_skips_erased_keys() {
    let table = T::new(Capacity::new(128)).unwrap();
    let handle = Handle::new(&table);

    handle.insert(1, 1);
    handle.insert(2, 2);
    handle.erase(1);

    let seen: Vec<(u64, u64)> = Iter::new(&table).collect();
    assert_eq!(seen, vec![(2, 2)]);
  }

  #[test]
  fn test_reference_refresh_sees_other_handles_writes() {
    let table = T::new(Capacity::new(128)).unwrap();
    let writer = Handle::new(&table);
    let reader = Handle::new(&table);

    writer.insert(1, 10);

    let reference = reader.reference(1);
    assert_eq!(reference.get(), Some(10));

    writer.insert_or_assign(1, 20);
    assert_eq!(reference.get(), Some(10), "stale until refreshed");
    assert_eq!(reference.refresh(), Some(20));
    assert_eq!(reference.get(), Some(20));
  }

  #[test]
  fn test_reference_store_inserts_and_overwrites() {
    let table = T::new(Capacity::new(128)).unwrap();
    let handle = Handle::new(&table);
    let reference = handle.reference(5);

    assert_eq!(reference.get(), None);
    assert_eq!(reference.store(50), None);
    assert_eq!(reference.get(), Some(50));
    assert_eq!(reference.store(99), Some(50));
    assert_eq!(handle.find(5), Some(99));
  }

  #[test]
  fn test_reference_update_inserts_default_then_applies_fn() {
    let table = T::new(Capacity::new(128)).unwrap();
    let handle = Handle::new(&table);
    let reference = handle.reference(7);

    assert_eq!(reference.update(1, |v| v + 1), 1);
    assert_eq!(reference.update(1, |v| v + 1), 2);
    assert_eq!(handle.find(7), Some(2));
  }

  #[test]
  fn test_reference_compare_exchange_succeeds_on_match() {
    let table = T::new(Capacity::new(128)).unwrap();
    let handle = Handle::new(&table);
    handle.insert(1, 10);

    let reference = handle.reference(1);
    assert_eq!(reference.compare_exchange(10, 20), Ok(20));
    assert_eq!(handle.find(1), Some(20));
    assert_eq!(reference.get(), Some(20));
  }

  #[test]
  fn test_reference_compare_exchange_fails_on_mismatch() {
    let table = T::new(Capacity::new(128)).unwrap();
    let handle = Handle::new(&table);
    handle.insert(1, 10);

    let reference = handle.reference(1);
    assert_eq!(reference.compare_exchange(999, 20), Err(Some(10)));
    assert_eq!(handle.find(1), Some(10), "value unchanged on a failed exchange");
  }

  #[test]
  fn test_reference_compare_exchange_missing_key() {
    let table = T::new(Capacity::new(128)).unwrap();
    let handle = Handle::new(&table);
    let reference = handle.reference(1);

    assert_eq!(reference.compare_exchange(0, 20), Err(None));
  }
}
