use divan::Bencher;
use divan::bench;
use divan::bench_group;
use divan::black_box;

use gtab::Capacity;
use gtab::GrowTable;
use gtab::Handle;

type Table = GrowTable;

const OPS: &[usize] = &[
  1 << 4,
  1 << 5,
  1 << 6,
  1 << 7,
  1 << 8,
  1 << 9,
  1 << 10,
  1 << 11,
  1 << 12,
  1 << 13,
  1 << 14,
  1 << 15,
  1 << 16,
];

const THREADS: &[usize] = &[0, 1, 4, 8, 16];

// -----------------------------------------------------------------------------
// Actual Benchmarks
// -----------------------------------------------------------------------------

// `Handle` deliberately isn't `Sync` (see its docs), so a threaded bench
// group can't share one across threads the way the teacher's benches shared
// an owned, `Sync` table. Each thread instead builds its own table and
// handle via `with_inputs`, which divan excludes from the timed region.

#[bench_group(name = "ReadSeq", skip_ext_time, threads = THREADS)]
mod read_seq {
  use super::*;

  #[bench(args = OPS)]
  fn bench(bencher: Bencher<'_, '_>, ops: usize) {
    bencher
      .counter(ops)
      .with_inputs(move || {
        let table: Table = Table::new(Capacity::new(ops)).unwrap();
        let handle: Handle<'_> = table.get_handle();

        for key in 0..ops as u64 {
          handle.insert(key, key);
        }

        table
      })
      .bench_local_refs(move |table: &mut Table| {
        let handle: Handle<'_> = table.get_handle();

        for key in 0..ops as u64 {
          let item: Option<u64> = black_box(handle.find(black_box(key)));
          _ = black_box(item.unwrap());
        }
      });
  }
}

#[bench_group(name = "ReadHot", skip_ext_time, threads = THREADS)]
mod read_hot {
  use super::*;

  #[bench(args = OPS)]
  fn bench(bencher: Bencher<'_, '_>, ops: usize) {
    bencher
      .counter(ops)
      .with_inputs(|| {
        let table: Table = Table::new(Capacity::new(1024)).unwrap();
        table.get_handle().insert(0, 0);
        table
      })
      .bench_local_refs(move |table: &mut Table| {
        let handle: Handle<'_> = table.get_handle();

        for _ in 0..ops {
          let item: Option<u64> = black_box(handle.find(black_box(0)));
          _ = black_box(item.unwrap());
        }
      });
  }
}

#[bench_group(name = "InsertSeq", skip_ext_time)]
mod insert_seq {
  use super::*;

  #[bench(args = OPS)]
  fn bench(bencher: Bencher<'_, '_>, ops: usize) {
    bencher
      .counter(ops)
      .with_inputs(move || Table::new(Capacity::new(ops)).unwrap())
      .bench_local_refs(move |table: &mut Table| {
        let handle: Handle<'_> = table.get_handle();

        for key in 0..ops as u64 {
          let inserted: bool = black_box(handle.insert(black_box(key), key));
          _ = black_box(inserted);
        }
      });
  }
}

#[bench_group(name = "Churn", skip_ext_time)]
mod churn {
  use super::*;

  #[bench(args = OPS)]
  fn bench(bencher: Bencher<'_, '_>, ops: usize) {
    bencher
      .counter(ops)
      .with_inputs(move || Table::new(Capacity::new(ops)).unwrap())
      .bench_local_refs(move |table: &mut Table| {
        let handle: Handle<'_> = table.get_handle();

        for key in 0..ops as u64 {
          let inserted: bool = black_box(handle.insert(black_box(key), key));
          let erased: bool = black_box(handle.erase(black_box(key)));
          _ = black_box(inserted);
          _ = black_box(erased);
        }
      });
  }
}

#[bench_group(name = "Growth", skip_ext_time)]
mod growth {
  use super::*;

  // A fixed, small starting capacity forces every run through several
  // growth rounds so this measures `insert` with migration in the mix,
  // rather than inserting into a table already sized to fit.
  #[bench(args = OPS)]
  fn bench(bencher: Bencher<'_, '_>, ops: usize) {
    bencher
      .counter(ops)
      .with_inputs(|| Table::new(Capacity::MIN).unwrap())
      .bench_local_refs(move |table: &mut Table| {
        let handle: Handle<'_> = table.get_handle();

        for key in 0..ops as u64 {
          let inserted: bool = black_box(handle.insert(black_box(key), key));
          _ = black_box(inserted);
        }
      });
  }
}

// -----------------------------------------------------------------------------
// Main
// -----------------------------------------------------------------------------

fn main() {
  divan::main();
}
