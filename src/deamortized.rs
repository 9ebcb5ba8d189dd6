//! The deamortized growth variant: migration work is paid for by whichever
//! handle happens to be operating at the time, one [`Params::MIGRATION_BLOCK`]
//! slice per call, instead of every helper racing to finish an in-progress
//! round as fast as possible.
//!
//! Ported in spirit from `deam_table.h`/`deam_btable.h`: the original spreads
//! a single growth step's cost across `block_grow` subsequent operations by
//! preallocating the target capacity up front and advancing a pair of
//! small/large bitmasks as each block is moved. Reproducing that exact
//! preallocated-slab scheme would mean carrying a second, incompatible slot
//! representation alongside [`BaseTable`]'s CAS-based one; instead this port
//! keeps [`BaseTable`]'s migration primitive and only changes *how much*
//! migration work one call performs: [`GrowTable::help_grow`](crate::grow::GrowTable)
//! claims and drains every remaining block before returning, while
//! [`DeamortizedHandle`] claims and migrates at most one block per operation,
//! so the cost of a growth round is paid in small increments by every caller
//! that happens to run while one is in flight, rather than by a burst of
//! dedicated helpers.

use sdd::Guard;

use crate::base::BaseTable;
use crate::grow::GrowTable;
use crate::params::Params;
use crate::result::ReturnCode;

/// A thread-local view onto a [`GrowTable`] that migrates incrementally.
///
/// Unlike [`Handle`](crate::handle::Handle), which calls `help_grow` to
/// completion on every `Invalid`/`Full` retry, `DeamortizedHandle` advances
/// an in-progress growth by a single block per operation and otherwise
/// behaves identically. Useful when many threads share a table and a burst
/// of dedicated migration helpers would cause a latency spike.
pub struct DeamortizedHandle<'a, P = crate::DefaultParams>
where
  P: Params + ?Sized,
{
  table: &'a GrowTable<P>,
}

impl<'a, P> DeamortizedHandle<'a, P>
where
  P: Params + ?Sized,
{
  pub(crate) fn new(table: &'a GrowTable<P>) -> Self {
    Self { table }
  }

  /// Runs `op`, migrating at most one block of an in-progress growth before
  /// and after the attempt, retrying on `Full` (starting a growth) or
  /// `Invalid` (the probe ran into a slot frozen for migration).
  fn execute<T, F>(&self, mut op: F) -> (ReturnCode, T)
  where
    F: FnMut(&BaseTable<P>, &Guard) -> (ReturnCode, T),
  {
    loop {
      let guard = Guard::new();

      self.help_grow_one_block(&guard);

      let table: &BaseTable<P> = self.table.current(&guard);
      let (code, value) = op(table, &guard);

      match code {
        ReturnCode::Full => {
          self.table.start_grow(&guard);
          self.help_grow_one_block(&guard);
        }
        ReturnCode::Invalid => {
          self.help_grow_one_block(&guard);
        }
        _ => return (code, value),
      }
    }
  }

  /// Migrates a single block of the in-progress growth round, if any, and
  /// returns without blocking on other helpers. See [`GrowTable::help_grow`]
  /// for the non-deamortized equivalent that drains every remaining block.
  fn help_grow_one_block(&self, guard: &Guard) {
    self.table.help_grow_one_block(guard);
  }

  /// Inserts `key` with `value` if it is not already present.
  pub fn insert(&self, key: u64, value: u64) -> bool {
    let (code, _) = self.execute(|table, guard| table.insert(key, value, guard));
    code.successful()
  }

  /// Removes `key`. Returns `true` if it was present.
  pub fn erase(&self, key: u64) -> bool {
    let (code, ()) = self.execute(|table, guard| (table.erase(key, guard), ()));
    code.successful()
  }

  /// Looks up `key`, returning its value if present.
  pub fn find(&self, key: u64) -> Option<u64> {
    let (_, value) = self.execute(|table, guard| table.find(key, guard));
    value
  }
}
