//! Error types returned by fallible [`GrowTable`](crate::GrowTable) operations.

use core::alloc::Layout;
use core::fmt;
use core::fmt::Display;
use core::fmt::Formatter;

/// An error that can occur while constructing or growing a table.
#[derive(Debug)]
#[non_exhaustive]
pub enum GTabError {
  /// The global allocator failed to satisfy a table allocation.
  Alloc(Layout),
}

impl Display for GTabError {
  fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
    match self {
      Self::Alloc(layout) => write!(f, "allocation failed for layout {layout:?}"),
    }
  }
}

impl core::error::Error for GTabError {}
