extern crate histo;
#[macro_use]
extern crate quickcheck;
#[macro_use]
extern crate cfg_if;
extern crate rand;
extern crate tag_alloc;

use quickcheck::{Arbitrary, Gen};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::cmp;
use std::error::Error;
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::thread;
use tag_alloc::units::PAGE_SIZE;
use tag_alloc::{HeapPtr, HeapStatus, SharedTagAlloc, TagAlloc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    // Allocate this many bytes.
    Alloc(usize),

    // Free the n^th allocation we've made, or no-op if it has already been
    // freed.
    Free(usize),

    // Resize the n^th allocation to this many bytes. The allocation keeps its
    // index, wherever its payload ends up.
    Realloc(usize, usize),
}

pub use self::Operation::*;

impl Operation {
    #[inline]
    fn arbitrary_alloc(
        rng: &mut StdRng,
        active_allocs: &mut Vec<usize>,
        num_allocs: &mut usize,
    ) -> Self {
        active_allocs.push(*num_allocs);
        *num_allocs += 1;

        // Zero sized allocation 1/1000 times.
        if rng.gen_ratio(1, 1000) {
            return Alloc(0);
        }

        // Do a large allocation, spanning several chunks, with P = 1/20.
        if rng.gen_ratio(1, 20) {
            let page = PAGE_SIZE.0;
            return Alloc(rng.gen_range(1..10usize) * page + rng.gen_range(0..page));
        }

        // Small allocation. Half of them land right around the split threshold.
        if rng.gen() {
            Alloc(rng.gen_range(1..65))
        } else {
            Alloc(rng.gen_range(1..513))
        }
    }

    #[inline]
    fn arbitrary_free(rng: &mut StdRng, active_allocs: &mut Vec<usize>) -> Self {
        assert!(!active_allocs.is_empty());
        let i = rng.gen_range(0..active_allocs.len());
        Free(active_allocs.swap_remove(i))
    }

    #[inline]
    fn arbitrary_realloc(rng: &mut StdRng, active_allocs: &[usize]) -> Self {
        assert!(!active_allocs.is_empty());
        let i = active_allocs[rng.gen_range(0..active_allocs.len())];
        if rng.gen() {
            Realloc(i, rng.gen_range(1..2049))
        } else {
            Realloc(i, rng.gen_range(1..65))
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Alloc(n) => write!(f, "Alloc({}),", n),
            Free(i) => write!(f, "Free({}),", i),
            Realloc(i, n) => write!(f, "Realloc({},{}),", i, n),
        }
    }
}

/// A trace line that is not an `Operation`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    line: String,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "invalid trace line: {:?}", self.line)
    }
}

impl Error for ParseError {}

impl FromStr for Operation {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, ParseError> {
        let err = || ParseError {
            line: s.to_string(),
        };

        let body = s.trim().strip_suffix("),").ok_or_else(err)?;
        let open = body.find('(').ok_or_else(err)?;
        let args: Vec<usize> = body[open + 1..]
            .split(',')
            .map(|arg| arg.trim().parse())
            .collect::<Result<_, _>>()
            .map_err(|_| err())?;

        match (&body[..open], args.as_slice()) {
            ("Alloc", &[n]) => Ok(Alloc(n)),
            ("Free", &[i]) => Ok(Free(i)),
            ("Realloc", &[i, n]) => Ok(Realloc(i, n)),
            _ => Err(err()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operations(pub Vec<Operation>);

impl FromStr for Operations {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, ParseError> {
        s.lines()
            .filter(|line| !line.trim().is_empty())
            .map(str::parse)
            .collect::<Result<_, _>>()
            .map(Operations)
    }
}

impl fmt::Display for Operations {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for op in &self.0 {
            writeln!(f, "{}", op)?;
        }
        Ok(())
    }
}

cfg_if! {
    if #[cfg(feature = "extra_assertions")] {
        const NUM_OPERATIONS: usize = 300;
    } else {
        const NUM_OPERATIONS: usize = 2_000;
    }
}

impl Arbitrary for Operations {
    #[inline(never)]
    fn arbitrary(g: &mut Gen) -> Self {
        // Drive the generator from a seeded `StdRng` so that ranges and
        // ratios can be sampled directly.
        let mut rng = StdRng::seed_from_u64(u64::arbitrary(g));
        let rng = &mut rng;

        let mut num_allocs = 0;
        let mut active_allocs = vec![];
        let mut operations = Vec::with_capacity(NUM_OPERATIONS);

        for _ in 0..NUM_OPERATIONS {
            if !active_allocs.is_empty() && rng.gen_ratio(1, 10) {
                operations.push(Operation::arbitrary_realloc(rng, &active_allocs));
            } else if !active_allocs.is_empty() && rng.gen_ratio(1, 4) {
                // Free with P = 1/4 so that the heap keeps growing and the
                // extension paths get exercised.
                operations.push(Operation::arbitrary_free(rng, &mut active_allocs));
            } else {
                operations.push(Operation::arbitrary_alloc(
                    rng,
                    &mut active_allocs,
                    &mut num_allocs,
                ));
            }
        }

        operations.reserve_exact(active_allocs.len());
        while !active_allocs.is_empty() {
            operations.push(Operation::arbitrary_free(rng, &mut active_allocs));
        }

        Operations(operations)
    }

    #[inline(never)]
    fn shrink(&self) -> Box<dyn Iterator<Item = Self>> {
        let ops = self.0.clone();
        let prefixes =
            (0..self.0.len()).map(move |i| Operations(ops.iter().cloned().take(i).collect()));

        let release_indices: Vec<_> = self
            .0
            .iter()
            .enumerate()
            .filter_map(|(i, op)| match *op {
                Free(_) | Realloc(_, _) => Some(i),
                Alloc(_) => None,
            })
            .collect();

        let ops = self.0.clone();
        let without_releases = release_indices.into_iter().map(move |i| {
            Operations(
                ops.iter()
                    .enumerate()
                    .filter_map(|(j, op)| if i == j { None } else { Some(*op) })
                    .collect(),
            )
        });

        let num_allocs = self.0.iter().filter(|op| matches!(op, Alloc(_))).count();
        let ops = self.0.clone();
        let without_allocs = (0..num_allocs).map(move |victim| remove_alloc(&ops, victim));

        let ops = self.0.clone();
        let smaller = (0..self.0.len()).filter_map(move |i| {
            let smaller = match ops[i] {
                Alloc(n) if n > 0 => Alloc(n / 2),
                Realloc(k, n) if n > 1 => Realloc(k, n / 2),
                _ => return None,
            };
            let mut ops = ops.clone();
            ops[i] = smaller;
            Some(Operations(ops))
        });

        Box::new(
            prefixes
                .chain(without_releases)
                .chain(without_allocs)
                .chain(smaller),
        )
    }
}

/// Drop the `victim`th allocation and every operation on it, renumbering the
/// later allocations.
fn remove_alloc(ops: &[Operation], victim: usize) -> Operations {
    let shift = |k: usize| if k > victim { k - 1 } else { k };
    let mut seen = 0;
    Operations(
        ops.iter()
            .filter_map(|op| match *op {
                Alloc(n) => {
                    let id = seen;
                    seen += 1;
                    if id == victim {
                        None
                    } else {
                        Some(Alloc(n))
                    }
                }
                Free(k) | Realloc(k, _) if k == victim => None,
                Free(k) => Some(Free(shift(k))),
                Realloc(k, n) => Some(Realloc(shift(k), n)),
            })
            .collect(),
    )
}

////////////////////////////////////////////////////////////////////////////////

/// Something a replay can get a `&mut TagAlloc` from, one operation at a
/// time.
pub trait HeapAccess {
    fn with_heap<F, U>(&mut self, f: F) -> U
    where
        F: FnOnce(&mut TagAlloc) -> U;
}

impl<'a> HeapAccess for &'a mut TagAlloc {
    #[inline]
    fn with_heap<F, U>(&mut self, f: F) -> U
    where
        F: FnOnce(&mut TagAlloc) -> U,
    {
        f(&mut **self)
    }
}

impl<'a> HeapAccess for &'a SharedTagAlloc {
    #[inline]
    fn with_heap<F, U>(&mut self, f: F) -> U
    where
        F: FnOnce(&mut TagAlloc) -> U,
    {
        self.with_exclusive_access(f)
    }
}

/// What a replay observed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Replay {
    pub operations: usize,
    // Allocations and reallocations the heap could not satisfy.
    pub failed: usize,
    // The most requested bytes that were live at once.
    pub peak_live_payload: usize,
}

impl Replay {
    /// Peak live payload as a fraction of `heap_size`.
    pub fn utilization(&self, heap_size: usize) -> f64 {
        if heap_size == 0 {
            return 0.0;
        }
        self.peak_live_payload as f64 / heap_size as f64
    }
}

/// Why a replay stopped.
#[derive(Debug, Clone, Copy)]
pub enum ReplayError {
    /// `check_consistency` failed after an operation.
    Inconsistent { operation: usize, status: HeapStatus },
    /// A live payload no longer holds the bytes written into it.
    Corrupted { operation: usize, allocation: usize },
    /// Two live payloads share bytes.
    Overlap {
        operation: usize,
        allocation: usize,
        other: usize,
    },
}

impl fmt::Display for ReplayError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            ReplayError::Inconsistent { operation, status } => {
                write!(f, "heap inconsistent after operation {}\n{}", operation, status)
            }
            ReplayError::Corrupted {
                operation,
                allocation,
            } => write!(
                f,
                "payload of allocation {} corrupted at operation {}",
                allocation, operation
            ),
            ReplayError::Overlap {
                operation,
                allocation,
                other,
            } => write!(
                f,
                "allocation {} overlaps allocation {} at operation {}",
                allocation, other, operation
            ),
        }
    }
}

impl Error for ReplayError {}

// The byte at `offset` in the payload of allocation `id`.
#[inline]
fn pattern(id: usize, offset: usize) -> u8 {
    id.wrapping_mul(31).wrapping_add(offset) as u8
}

#[derive(Debug, Clone, Copy)]
struct Live {
    ptr: HeapPtr,
    // Requested size. Only these bytes carry the pattern.
    len: usize,
}

#[derive(Default)]
struct Replayer {
    live: Vec<Option<Live>>,
    live_payload: usize,
    summary: Replay,
}

impl Replayer {
    fn step(&mut self, heap: &mut TagAlloc, i: usize, op: Operation) -> Result<(), ReplayError> {
        match op {
            Alloc(n) => {
                let live = heap.allocate(n).map(|ptr| Live { ptr, len: n });
                if live.is_none() && n > 0 {
                    self.summary.failed += 1;
                }
                self.live.push(live);
                if let Some(live) = live {
                    self.track(heap, i, self.live.len() - 1, live)?;
                }
            }
            Free(id) => {
                if let Some(old) = self.live.get_mut(id).and_then(Option::take) {
                    self.verify(heap, i, id, old, old.len)?;
                    self.live_payload -= old.len;
                    heap.deallocate(old.ptr);
                }
            }
            Realloc(id, n) => {
                if id >= self.live.len() {
                    return Ok(());
                }
                let old = self.live[id];
                if let Some(old) = old {
                    self.verify(heap, i, id, old, old.len)?;
                }

                match heap.reallocate(old.map(|old| old.ptr), n) {
                    Some(ptr) => {
                        let live = Live { ptr, len: n };
                        if let Some(old) = old {
                            self.live_payload -= old.len;
                            self.verify(heap, i, id, live, cmp::min(old.len, n))?;
                        }
                        self.live[id] = None;
                        self.track(heap, i, id, live)?;
                    }
                    None if n == 0 => {
                        if let Some(old) = self.live[id].take() {
                            self.live_payload -= old.len;
                        }
                    }
                    None => self.summary.failed += 1,
                }
            }
        }

        self.summary.operations += 1;
        let status = heap.check_consistency();
        if !status.is_consistent() {
            return Err(ReplayError::Inconsistent {
                operation: i,
                status,
            });
        }
        Ok(())
    }

    // Make `live` the payload of allocation `id` and fill it with its pattern.
    fn track(
        &mut self,
        heap: &mut TagAlloc,
        i: usize,
        id: usize,
        live: Live,
    ) -> Result<(), ReplayError> {
        let start = live.ptr.offset();
        let end = start + heap.payload_size(live.ptr);
        for (other, entry) in self.live.iter().enumerate() {
            if let Some(entry) = *entry {
                let other_start = entry.ptr.offset();
                let other_end = other_start + heap.payload_size(entry.ptr);
                if other != id && start < other_end && other_start < end {
                    return Err(ReplayError::Overlap {
                        operation: i,
                        allocation: id,
                        other,
                    });
                }
            }
        }

        for (offset, byte) in heap.payload_mut(live.ptr)[..live.len]
            .iter_mut()
            .enumerate()
        {
            *byte = pattern(id, offset);
        }

        self.live[id] = Some(live);
        self.live_payload += live.len;
        self.summary.peak_live_payload = cmp::max(self.summary.peak_live_payload, self.live_payload);
        Ok(())
    }

    // Check that the first `len` bytes of `live` still carry allocation `id`'s
    // pattern.
    fn verify(
        &self,
        heap: &TagAlloc,
        i: usize,
        id: usize,
        live: Live,
        len: usize,
    ) -> Result<(), ReplayError> {
        let intact = heap.payload(live.ptr)[..len]
            .iter()
            .enumerate()
            .all(|(offset, byte)| *byte == pattern(id, offset));
        if intact {
            Ok(())
        } else {
            Err(ReplayError::Corrupted {
                operation: i,
                allocation: id,
            })
        }
    }
}

impl Operations {
    pub fn run_single_threaded(&self) -> Replay {
        let mut heap = TagAlloc::init().expect("default heap must initialize");
        self.run_with_heap(&mut heap)
            .unwrap_or_else(|e| panic!("{}", e))
    }

    pub fn run_multi_threaded(ops0: Self, ops1: Self, ops2: Self, ops3: Self) {
        let heap: Arc<SharedTagAlloc> = Arc::new(
            TagAlloc::init()
                .expect("default heap must initialize")
                .into_shared(),
        );

        let handles: Vec<_> = vec![ops0, ops1, ops2, ops3]
            .into_iter()
            .map(|ops| {
                let heap = heap.clone();
                thread::spawn(move || {
                    ops.run_with_heap(&*heap)
                        .unwrap_or_else(|e| panic!("{}", e));
                })
            })
            .collect();

        for (i, handle) in handles.into_iter().enumerate() {
            handle
                .join()
                .unwrap_or_else(|_| panic!("Thread {} Failed", i));
        }

        heap.with_exclusive_access(|heap| {
            let status = heap.check_consistency();
            assert!(status.is_consistent(), "{}", status);
        });
    }

    /// Replay every operation against `heap`, checking payload contents,
    /// payload overlap and heap consistency after each one.
    pub fn run_with_heap<H: HeapAccess>(&self, mut heap: H) -> Result<Replay, ReplayError> {
        let mut replayer = Replayer::default();
        for (i, op) in self.0.iter().cloned().enumerate() {
            heap.with_heap(|heap| replayer.step(heap, i, op))?;
        }
        Ok(replayer.summary)
    }

    const NUM_BUCKETS: u64 = 20;

    pub fn size_histogram(&self) -> histo::Histogram {
        let mut histogram = histo::Histogram::with_buckets(Self::NUM_BUCKETS);
        for op in &self.0 {
            match *op {
                Alloc(n) | Realloc(_, n) if n > 0 => {
                    let n = n as f64;
                    let n = n.log2().round();
                    histogram.add(n as u64);
                }
                _ => {}
            }
        }
        histogram
    }

    pub fn lifetime_histogram(&self) -> histo::Histogram {
        let mut histogram = histo::Histogram::with_buckets(Self::NUM_BUCKETS);
        let mut allocated_at = vec![];
        for (i, op) in self.0.iter().enumerate() {
            match *op {
                Alloc(_) => allocated_at.push(i),
                Free(j) => {
                    if let Some(start) = allocated_at.get(j) {
                        histogram.add((i - start) as u64);
                    }
                }
                Realloc(_, _) => {}
            }
        }
        histogram
    }

    /// Read a trace from the workspace's `traces` directory.
    pub fn read_trace(trace: &str) -> Self {
        let trace_dir = Path::new(concat!(env!("CARGO_MANIFEST_DIR"), "/../traces"));
        let contents = fs::read_to_string(trace_dir.join(trace))
            .unwrap_or_else(|e| panic!("reading {}: {}", trace, e));
        contents.parse().unwrap_or_else(|e| panic!("{}: {}", trace, e))
    }
}

////////////////////////////////////////////////////////////////////////////////

macro_rules! run_quickchecks {
    ($name:ident) => {
        #[test]
        fn $name() {
            fn single_threaded(ops: Operations) {
                ops.run_single_threaded();
            }

            quickcheck::QuickCheck::new()
                .tests(1)
                .quickcheck(single_threaded as fn(Operations) -> ());
        }
    };
}

// Let the test harness run each of our single threaded quickchecks concurrently
// with each other.
run_quickchecks!(quickchecks_0);
run_quickchecks!(quickchecks_1);
run_quickchecks!(quickchecks_2);
run_quickchecks!(quickchecks_3);
cfg_if! {
    if #[cfg(not(feature = "extra_assertions"))] {
        run_quickchecks!(quickchecks_4);
        run_quickchecks!(quickchecks_5);
        run_quickchecks!(quickchecks_6);
        run_quickchecks!(quickchecks_7);
    }
}

#[test]
fn multi_threaded_quickchecks() {
    quickcheck::QuickCheck::new().tests(1).quickcheck(
        Operations::run_multi_threaded as fn(Operations, Operations, Operations, Operations) -> (),
    );
}

quickcheck! {
    fn freed_block_is_reused(size: usize) -> bool {
        let size = size % 65536 + 1;

        let mut heap = TagAlloc::init().unwrap();
        let p = heap.allocate(size).unwrap();
        heap.deallocate(p);
        let high_water = heap.heap_size();
        let consistent = heap.check_consistency().is_consistent();

        heap.allocate(size).unwrap();
        consistent && heap.heap_size() == high_water
    }

    fn realloc_preserves_contents(size: usize, new_size: usize) -> bool {
        let size = size % 4096 + 1;
        let new_size = new_size % 16384 + 1;

        let mut heap = TagAlloc::init().unwrap();
        let p = heap.allocate(size).unwrap();
        // Box the block in so that growing has to move it some of the time.
        let fence = heap.allocate(8).unwrap();
        for (i, byte) in heap.payload_mut(p)[..size].iter_mut().enumerate() {
            *byte = pattern(7, i);
        }

        let q = heap.reallocate(Some(p), new_size).unwrap();
        let kept = cmp::min(size, new_size);
        let preserved = heap.payload(q)[..kept]
            .iter()
            .enumerate()
            .all(|(i, byte)| *byte == pattern(7, i));

        heap.deallocate(fence);
        heap.deallocate(q);
        preserved && heap.check_consistency().is_consistent()
    }
}

////////////////////////////////////////////////////////////////////////////////

macro_rules! test_trace {
    ($name:ident, $trace:expr) => {
        #[test]
        fn $name() {
            let ops = Operations::read_trace($trace);
            ops.run_single_threaded();
        }
    };
}

test_trace!(test_trace_small_objects, "small-objects.trace");
test_trace!(test_trace_growing_buffers, "growing-buffers.trace");
test_trace!(test_trace_fragmentation, "fragmentation.trace");
test_trace!(test_trace_large_blocks, "large-blocks.trace");

////////////////////////////////////////////////////////////////////////////////

#[test]
fn regression_test_0() {
    Operations(vec![Alloc(1)]).run_single_threaded();
}

#[test]
fn regression_test_1() {
    Operations(vec![Alloc(1414), Free(0), Alloc(1414), Free(1)]).run_single_threaded();
}

#[test]
fn regression_test_2() {
    Operations(vec![Alloc(168), Free(0), Alloc(0), Alloc(168), Free(2)]).run_single_threaded();
}

#[test]
fn regression_test_3() {
    Operations(vec![Alloc(13672), Free(0), Alloc(1)]).run_single_threaded();
}

#[test]
fn realloc_absorbs_free_successor() {
    Operations(vec![Alloc(24), Alloc(24), Free(1), Realloc(0, 100), Free(0)])
        .run_single_threaded();
}

#[test]
fn realloc_extends_heap_under_last_block() {
    Operations(vec![Alloc(4000), Realloc(0, 9000), Free(0)]).run_single_threaded();
}

#[test]
fn realloc_moves_boxed_in_block() {
    Operations(vec![
        Alloc(24),
        Alloc(24),
        Realloc(0, 4000),
        Free(1),
        Free(0),
    ]).run_single_threaded();
}

#[test]
fn realloc_of_nothing_allocates_and_realloc_to_zero_frees() {
    let replay = Operations(vec![Alloc(0), Realloc(0, 16), Realloc(0, 0), Free(0)])
        .run_single_threaded();
    assert_eq!(replay.failed, 0);
    assert_eq!(replay.peak_live_payload, 16);
}

#[test]
fn allocate_size_zero() {
    use std::iter;
    let replay = Operations(
        iter::repeat(Alloc(0))
            .take(1000)
            .chain((0..1000).map(|i| Free(i)))
            .collect(),
    ).run_single_threaded();
    assert_eq!(replay.peak_live_payload, 0);
}

#[test]
fn allocate_many_small() {
    use std::iter;

    Operations(
        iter::repeat(Alloc(16))
            .take(100)
            .chain((0..100).map(|i| Free(i)))
            .chain(iter::repeat(Alloc(256 * 4)).take(100))
            .chain((0..100).map(|i| Free(i + 100)))
            .collect(),
    ).run_single_threaded();
}

#[test]
fn allocate_many_large() {
    use std::iter;

    Operations(
        iter::repeat(Alloc(257 * 8))
            .take(100)
            .chain((0..100).map(|i| Free(i)))
            .chain(iter::repeat(Alloc(1024 * 8)).take(100))
            .chain((0..100).map(|i| Free(i + 100)))
            .collect(),
    ).run_single_threaded();
}

#[test]
fn out_of_memory_is_reported_not_fatal() {
    use tag_alloc::units::Bytes;
    use tag_alloc::Config;

    let config = Config::default().with_max_heap(Bytes(16 * 1024));
    let mut heap = TagAlloc::with_config(config).unwrap();
    let replay = Operations(vec![Alloc(8000), Alloc(8000), Free(0), Alloc(100)])
        .run_with_heap(&mut heap)
        .unwrap();
    assert_eq!(replay.failed, 1);
    assert_eq!(replay.operations, 4);
}

////////////////////////////////////////////////////////////////////////////////

#[test]
fn trace_lines_parse() {
    let ops: Operations = "Alloc(24),\nFree(0),\n\nRealloc(0, 48),\n".parse().unwrap();
    assert_eq!(ops, Operations(vec![Alloc(24), Free(0), Realloc(0, 48)]));
    assert_eq!(ops.to_string(), "Alloc(24),\nFree(0),\nRealloc(0,48),\n");
}

#[test]
fn bad_trace_lines_are_rejected() {
    for line in &["Alloc(24)", "Free(),", "Realloc(1),", "Alloc(-3),", "Calloc(2),"] {
        assert!(line.parse::<Operation>().is_err(), "{:?} parsed", line);
    }
}

#[test]
fn shrinking_renumbers_allocations() {
    let ops = vec![Alloc(8), Alloc(16), Realloc(1, 32), Free(0), Free(1)];
    assert_eq!(
        remove_alloc(&ops, 0),
        Operations(vec![Alloc(16), Realloc(0, 32), Free(0)])
    );
}

#[test]
fn histograms_count_sizes_and_lifetimes() {
    let ops = Operations(vec![Alloc(8), Alloc(16), Free(0), Realloc(1, 1024), Free(1)]);
    // Just make sure they render; `histo` owns the layout.
    assert!(!ops.size_histogram().to_string().is_empty());
    assert!(!ops.lifetime_histogram().to_string().is_empty());
}

////////////////////////////////////////////////////////////////////////////////

// Adapted from the smoke and stress tests in
// https://github.com/alexcrichton/dlmalloc-rs/blob/master/tests/smoke.rs

#[test]
fn smoke() {
    let mut heap = TagAlloc::init().unwrap();

    let p = heap.allocate(1).expect("Should be able to allocate one byte");
    heap.payload_mut(p)[0] = 9;
    assert_eq!(heap.payload(p)[0], 9);
    heap.deallocate(p);

    let p = heap.allocate(1).expect("Should be able to allocate it again");
    heap.payload_mut(p)[0] = 10;
    assert_eq!(heap.payload(p)[0], 10);
    heap.deallocate(p);
}

// This takes too long with our extra assertion checks enabled.
#[test]
#[cfg(not(feature = "extra_assertions"))]
fn stress() {
    let mut rng = StdRng::seed_from_u64(0x7a6_a110c);
    let mut ops = vec![];
    let mut live = vec![];
    let mut num_allocs = 0;

    for _ in 0..20_000 {
        let free = !live.is_empty()
            && ((live.len() < 1_000 && rng.gen_ratio(1, 3)) || rng.gen());
        if free {
            let idx = rng.gen_range(0..live.len());
            ops.push(Free(live.swap_remove(idx)));
            continue;
        }

        if !live.is_empty() && rng.gen_ratio(1, 100) {
            let id = live[rng.gen_range(0..live.len())];
            ops.push(Realloc(id, rng.gen_range(1..8192)));
        }

        let size = if rng.gen() {
            rng.gen_range(1..128)
        } else {
            rng.gen_range(1..32 * 1024)
        };
        ops.push(Alloc(size));
        live.push(num_allocs);
        num_allocs += 1;
    }

    let replay = Operations(ops).run_single_threaded();
    assert_eq!(replay.failed, 0);
}
