//! External-memory priority queue engine.

use std::cmp::Ordering;
use std::error::Error;
use std::fmt;
use std::fmt::Display;
use std::io;
use std::marker::PhantomData;
use std::mem;
use std::path::Path;

use rayon::slice::ParallelSliceMut;

use crate::heap::{BoundedHeap, CapacityError, OrderBy};
use crate::hierarchy::{GroupHierarchy, HierarchyError};
use crate::memory::{MemoryBudget, MemoryError};
use crate::merge::HeadEntry;
use crate::run::{RmpRun, SortedRun, DEFAULT_RW_BUF_SIZE};

/// Insertion and deletion buffer capacity used when neither an explicit
/// capacity nor a memory limit is configured.
pub const DEFAULT_BUFFER_CAPACITY: usize = 32 * 1024;

/// Merge group fan-in used when none is configured.
pub const DEFAULT_FAN_IN: usize = 8;

/// Fraction of the deletion buffer a refill fills before serving.
pub const DEFAULT_REFILL_FRACTION: f64 = 0.75;

/// Priority queue error.
#[derive(Debug)]
pub enum QueueError<E: Error> {
    /// The queue holds no elements. Ordinary and expected on `top`/`pop`;
    /// check `is_empty` first or handle it explicitly.
    Empty,
    /// Scratch directory creation error.
    TempDir(io::Error),
    /// Sort thread pool initialization error.
    ThreadPool(rayon::ThreadPoolBuildError),
    /// The memory budget rejected the configuration or an internal growth.
    Memory(MemoryError),
    /// Invalid builder configuration.
    Config(&'static str),
    /// An internal buffer was full when the engine expected free space.
    BufferFull(CapacityError),
    /// A merge group refused a run that should have been drained.
    Overflow { level: usize },
    /// The backing storage failed; `level` names the hierarchy level
    /// involved, if any.
    Storage { level: Option<usize>, source: E },
}

impl<E: Error + 'static> Error for QueueError<E> {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            QueueError::Empty | QueueError::Config(_) | QueueError::Overflow { .. } => None,
            QueueError::TempDir(err) => Some(err),
            QueueError::ThreadPool(err) => Some(err),
            QueueError::Memory(err) => Some(err),
            QueueError::BufferFull(err) => Some(err),
            QueueError::Storage { source, .. } => Some(source),
        }
    }
}

impl<E: Error> Display for QueueError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueError::Empty => write!(f, "queue is empty"),
            QueueError::TempDir(err) => write!(f, "temporary directory or file not created: {}", err),
            QueueError::ThreadPool(err) => write!(f, "thread pool initialization failed: {}", err),
            QueueError::Memory(err) => write!(f, "{}", err),
            QueueError::Config(msg) => write!(f, "invalid configuration: {}", msg),
            QueueError::BufferFull(err) => write!(f, "internal buffer overflow: {}", err),
            QueueError::Overflow { level } => write!(f, "merge group overflow at level {}", level),
            QueueError::Storage { level: Some(level), source } => {
                write!(f, "storage failure at level {}: {}", level, source)
            }
            QueueError::Storage { level: None, source } => write!(f, "storage failure: {}", source),
        }
    }
}

impl<E: Error> From<MemoryError> for QueueError<E> {
    fn from(err: MemoryError) -> Self {
        QueueError::Memory(err)
    }
}

impl<E: Error> From<CapacityError> for QueueError<E> {
    fn from(err: CapacityError) -> Self {
        QueueError::BufferFull(err)
    }
}

impl<E: Error> From<HierarchyError<E>> for QueueError<E> {
    fn from(err: HierarchyError<E>) -> Self {
        match err {
            HierarchyError::Memory(err) => QueueError::Memory(err),
            HierarchyError::Overflow { level } => QueueError::Overflow { level },
            HierarchyError::Storage { level, source } => QueueError::Storage {
                level: Some(level),
                source,
            },
        }
    }
}

fn natural_order<T: Ord>(a: &T, b: &T) -> Ordering {
    a.cmp(b)
}

fn reverse_order<T: Ord>(a: &T, b: &T) -> Ordering {
    b.cmp(a)
}

/// Which of the three element sources currently holds the global extremum.
#[derive(Clone, Copy)]
enum Source {
    Deletion,
    Insertion,
    Hierarchy,
}

/// External priority queue builder. Provides methods for
/// [`ExternalPriorityQueue`] initialization.
#[derive(Clone)]
pub struct ExternalPriorityQueueBuilder<T, R = RmpRun<T>>
where
    R: SortedRun<T>,
{
    /// Total bytes the queue may keep in memory. Unlimited if unset.
    memory_limit: Option<u64>,
    /// Insertion/deletion buffer capacity in elements. Derived from the
    /// memory limit if unset.
    buffer_capacity: Option<usize>,
    /// Merge group fan-in.
    fan_in: Option<usize>,
    /// Fraction of the deletion buffer a refill fills.
    refill_fraction: Option<f64>,
    /// Directory to be used to store spilled runs.
    tmp_dir: Option<Box<Path>>,
    /// Run file read/write buffer size.
    rw_buf_size: Option<usize>,
    /// Number of threads to be used to sort flushed buffers in parallel.
    threads_number: Option<usize>,

    /// Sorted run type.
    run_type: PhantomData<R>,
    /// Element type.
    item_type: PhantomData<T>,
}

impl<T, R> ExternalPriorityQueueBuilder<T, R>
where
    T: Send,
    R: SortedRun<T>,
{
    /// Creates an instance of a builder with default parameters.
    pub fn new() -> Self {
        ExternalPriorityQueueBuilder::default()
    }

    /// Sets the total number of bytes the queue may keep in memory.
    /// Construction fails with a memory error if even a minimum viable
    /// configuration does not fit.
    pub fn with_memory_limit(mut self, memory_limit: u64) -> ExternalPriorityQueueBuilder<T, R> {
        self.memory_limit = Some(memory_limit);
        return self;
    }

    /// Sets the insertion/deletion buffer capacity in elements.
    pub fn with_buffer_capacity(mut self, buffer_capacity: usize) -> ExternalPriorityQueueBuilder<T, R> {
        self.buffer_capacity = Some(buffer_capacity);
        return self;
    }

    /// Sets the number of runs a merge group holds before it is merged
    /// into the next level.
    pub fn with_fan_in(mut self, fan_in: usize) -> ExternalPriorityQueueBuilder<T, R> {
        self.fan_in = Some(fan_in);
        return self;
    }

    /// Sets the fraction of the deletion buffer a refill fills before
    /// serving. Must be within (0, 1].
    pub fn with_refill_fraction(mut self, refill_fraction: f64) -> ExternalPriorityQueueBuilder<T, R> {
        self.refill_fraction = Some(refill_fraction);
        return self;
    }

    /// Sets directory to be used to store spilled runs.
    pub fn with_tmp_dir(mut self, path: &Path) -> ExternalPriorityQueueBuilder<T, R> {
        self.tmp_dir = Some(path.into());
        return self;
    }

    /// Sets run file read/write buffer size.
    pub fn with_rw_buf_size(mut self, buf_size: usize) -> ExternalPriorityQueueBuilder<T, R> {
        self.rw_buf_size = Some(buf_size);
        return self;
    }

    /// Sets number of threads to be used to sort flushed buffers in parallel.
    pub fn with_threads_number(mut self, threads_number: usize) -> ExternalPriorityQueueBuilder<T, R> {
        self.threads_number = Some(threads_number);
        return self;
    }

    /// Builds an [`ExternalPriorityQueue`] ordered by a custom compare
    /// function. The element for which no other compares `Less` is the one
    /// `top` and `pop` surface first.
    ///
    /// # Arguments
    /// * `compare` - Function to be used to compare elements
    pub fn build_by<F>(self, compare: F) -> Result<ExternalPriorityQueue<T, F, R>, QueueError<R::Error>>
    where
        F: Fn(&T, &T) -> Ordering + Sync + Send + Copy,
    {
        ExternalPriorityQueue::with_options(self, compare)
    }

    /// Builds a min-queue over the natural element order.
    pub fn build_min(
        self,
    ) -> Result<ExternalPriorityQueue<T, fn(&T, &T) -> Ordering, R>, QueueError<R::Error>>
    where
        T: Ord,
    {
        self.build_by(natural_order::<T> as fn(&T, &T) -> Ordering)
    }

    /// Builds a max-queue over the natural element order.
    pub fn build_max(
        self,
    ) -> Result<ExternalPriorityQueue<T, fn(&T, &T) -> Ordering, R>, QueueError<R::Error>>
    where
        T: Ord,
    {
        self.build_by(reverse_order::<T> as fn(&T, &T) -> Ordering)
    }
}

impl<T, R> Default for ExternalPriorityQueueBuilder<T, R>
where
    T: Send,
    R: SortedRun<T>,
{
    fn default() -> Self {
        ExternalPriorityQueueBuilder {
            memory_limit: None,
            buffer_capacity: None,
            fan_in: None,
            refill_fraction: None,
            tmp_dir: None,
            rw_buf_size: None,
            threads_number: None,
            run_type: PhantomData,
            item_type: PhantomData,
        }
    }
}

/// External-memory priority queue.
///
/// Keeps a bounded insertion buffer and deletion buffer in memory and
/// spills the bulk of the data to disk as sorted runs organized into a
/// cascading merge hierarchy. `push` lands in the insertion buffer and a
/// full buffer is sorted and spilled as a level-0 run; `top` and `pop` are
/// served after a batch refill of the deletion buffer, which amortizes the
/// hierarchy traversal over many subsequent pops.
///
/// The global extremum is always the smallest of the three sources' heads
/// (deletion buffer, insertion buffer, hierarchy), so results match an
/// in-memory heap for any operation sequence.
pub struct ExternalPriorityQueue<T, F, R = RmpRun<T>>
where
    T: Send,
    F: Fn(&T, &T) -> Ordering,
    R: SortedRun<T>,
{
    /// Buffer new elements land in.
    insertion: BoundedHeap<T, OrderBy<F>>,
    /// Buffer pops are served from, batch-refilled with current minima.
    deletion: BoundedHeap<T, OrderBy<F>>,
    /// Cascading merge hierarchy of spilled runs.
    hierarchy: GroupHierarchy<T, R, F>,
    /// Capacity oracle charged for every long-lived structure.
    budget: MemoryBudget,
    compare: F,
    /// Total element count across buffers and runs.
    len: u64,
    /// Deletion buffer fill level a refill aims for.
    refill_target: usize,
    /// Run file read/write buffer size.
    rw_buf_size: Option<usize>,
    /// Buffer sorting thread pool.
    thread_pool: rayon::ThreadPool,
    /// Directory spilled runs are stored in.
    tmp_dir: tempfile::TempDir,
}

impl<T, F, R> ExternalPriorityQueue<T, F, R>
where
    T: Send,
    F: Fn(&T, &T) -> Ordering + Sync + Send + Copy,
    R: SortedRun<T>,
{
    fn with_options(
        options: ExternalPriorityQueueBuilder<T, R>,
        compare: F,
    ) -> Result<Self, QueueError<R::Error>> {
        let thread_pool = Self::init_thread_pool(options.threads_number)?;
        let tmp_dir = Self::init_tmp_directory(options.tmp_dir.as_deref())?;

        let fan_in = options.fan_in.unwrap_or(DEFAULT_FAN_IN);
        if fan_in < 2 {
            return Err(QueueError::Config("fan-in must be at least 2"));
        }
        let refill_fraction = options.refill_fraction.unwrap_or(DEFAULT_REFILL_FRACTION);
        if !(refill_fraction > 0.0 && refill_fraction <= 1.0) {
            return Err(QueueError::Config("refill fraction must be within (0, 1]"));
        }

        let element_size = mem::size_of::<T>().max(1) as u64;
        let run_cost = options.rw_buf_size.unwrap_or(DEFAULT_RW_BUF_SIZE) as u64;

        let mut budget = match options.memory_limit {
            Some(limit) => MemoryBudget::limited(limit),
            None => MemoryBudget::unlimited(),
        };
        // nothing works below two single-element buffers plus one binary group
        let minimum = 2 * element_size + 2 * mem::size_of::<HeadEntry<T>>() as u64;
        budget.check(minimum)?;

        let buffer_capacity = match options.buffer_capacity {
            Some(0) => return Err(QueueError::Config("buffer capacity must be at least 1")),
            Some(buffer_capacity) => buffer_capacity,
            None => Self::derive_buffer_capacity(&budget, element_size),
        };
        budget.reserve(2 * buffer_capacity as u64 * element_size)?;

        let refill_target =
            (((buffer_capacity as f64) * refill_fraction).ceil() as usize).clamp(1, buffer_capacity);

        log::info!(
            "external priority queue initialized (buffer capacity: {}, fan-in: {}, refill target: {})",
            buffer_capacity,
            fan_in,
            refill_target
        );

        return Ok(ExternalPriorityQueue {
            insertion: BoundedHeap::new(buffer_capacity, OrderBy(compare)),
            deletion: BoundedHeap::new(buffer_capacity, OrderBy(compare)),
            hierarchy: GroupHierarchy::new(fan_in, run_cost, compare),
            budget,
            compare,
            len: 0,
            refill_target,
            rw_buf_size: options.rw_buf_size,
            thread_pool,
            tmp_dir,
        });
    }

    fn init_thread_pool(
        threads_number: Option<usize>,
    ) -> Result<rayon::ThreadPool, QueueError<R::Error>> {
        let mut thread_pool_builder = rayon::ThreadPoolBuilder::new();

        if let Some(threads_number) = threads_number {
            log::info!("initializing sort thread-pool (threads: {})", threads_number);
            thread_pool_builder = thread_pool_builder.num_threads(threads_number);
        } else {
            log::info!("initializing sort thread-pool (threads: default)");
        }
        let thread_pool = thread_pool_builder
            .build()
            .map_err(|err| QueueError::ThreadPool(err))?;

        return Ok(thread_pool);
    }

    fn init_tmp_directory(tmp_path: Option<&Path>) -> Result<tempfile::TempDir, QueueError<R::Error>> {
        let tmp_dir = if let Some(tmp_path) = tmp_path {
            tempfile::tempdir_in(tmp_path)
        } else {
            tempfile::tempdir()
        }
        .map_err(|err| QueueError::TempDir(err))?;

        log::info!("using {} as a scratch directory", tmp_dir.path().display());

        return Ok(tmp_dir);
    }

    fn derive_buffer_capacity(budget: &MemoryBudget, element_size: u64) -> usize {
        if budget.limit() == u64::MAX {
            return DEFAULT_BUFFER_CAPACITY;
        }

        // a quarter of the budget per buffer leaves half for group heaps
        // and open-run buffers
        return ((budget.limit() / 4) / element_size).max(1) as usize;
    }

    /// Number of elements currently stored, buffers and spilled runs included.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of active merge levels.
    pub fn levels(&self) -> usize {
        self.hierarchy.levels()
    }

    /// Number of open runs on disk.
    pub fn spilled_runs(&self) -> usize {
        self.hierarchy.run_count()
    }

    /// Inserts an element.
    ///
    /// A full insertion buffer is first sorted on the thread pool and
    /// spilled to a level-0 run, which may cascade merges up the hierarchy;
    /// the amortized cost stays sub-logarithmic per operation.
    pub fn push(&mut self, item: T) -> Result<(), QueueError<R::Error>> {
        if self.insertion.is_full() {
            self.flush_insertion_buffer()?;
        }
        self.insertion.insert(item)?;
        self.len += 1;

        Ok(())
    }

    /// Returns the extremal element without removing it.
    ///
    /// Fails with [`QueueError::Empty`] if the queue holds no elements.
    pub fn top(&mut self) -> Result<&T, QueueError<R::Error>> {
        if self.deletion.is_empty() {
            self.refill_deletion_buffer()?;
        }

        let compare = self.compare;
        let mut best: Option<&T> = self.deletion.peek();
        if let Some(head) = self.insertion.peek() {
            if best.map_or(true, |value| compare(head, value) == Ordering::Less) {
                best = Some(head);
            }
        }
        if let Some((head, _)) = self.hierarchy.global_minimum() {
            if best.map_or(true, |value| compare(head, value) == Ordering::Less) {
                best = Some(head);
            }
        }

        best.ok_or(QueueError::Empty)
    }

    /// Removes and returns the extremal element.
    ///
    /// Fails with [`QueueError::Empty`] if the queue holds no elements.
    pub fn pop(&mut self) -> Result<T, QueueError<R::Error>> {
        if self.deletion.is_empty() {
            self.refill_deletion_buffer()?;
        }

        let source = match self.extremal_source() {
            Some(source) => source,
            None => return Err(QueueError::Empty),
        };
        let value = match source {
            Source::Deletion => self.deletion.pop(),
            Source::Insertion => self.insertion.pop(),
            Source::Hierarchy => self.hierarchy.consume_minimum(&mut self.budget)?,
        };

        match value {
            Some(value) => {
                self.len -= 1;
                Ok(value)
            }
            None => Err(QueueError::Empty),
        }
    }

    /// Sorts the insertion buffer and hands it to the hierarchy as a new
    /// level-0 run, leaving the buffer empty for reuse.
    fn flush_insertion_buffer(&mut self) -> Result<(), QueueError<R::Error>> {
        let mut spill = self.insertion.take_all();

        log::debug!("sorting insertion buffer ({} elements)", spill.len());
        let compare = self.compare;
        self.thread_pool.install(|| spill.par_sort_by(compare));

        log::debug!("spilling insertion buffer to a level 0 run");
        let run = R::create(self.tmp_dir.path(), spill.into_iter().map(Ok), self.rw_buf_size)
            .map_err(|source| QueueError::Storage { level: None, source })?;
        self.hierarchy
            .promote(run, 0, self.tmp_dir.path(), self.rw_buf_size, &mut self.budget)?;

        Ok(())
    }

    /// Batch-refills the deletion buffer with current minima, pulling each
    /// element from whichever of the insertion buffer and the hierarchy
    /// holds the smaller head. Amortizes the hierarchy traversal over the
    /// pops the batch will serve.
    fn refill_deletion_buffer(&mut self) -> Result<(), QueueError<R::Error>> {
        let compare = self.compare;

        while self.deletion.len() < self.refill_target {
            let from_insertion = match (self.insertion.peek(), self.hierarchy.global_minimum()) {
                (Some(buffered), Some((spilled, _))) => {
                    compare(buffered, spilled) != Ordering::Greater
                }
                (Some(_), None) => true,
                (None, Some(_)) => false,
                (None, None) => break,
            };

            let value = if from_insertion {
                self.insertion.pop()
            } else {
                self.hierarchy.consume_minimum(&mut self.budget)?
            };
            match value {
                Some(value) => self.deletion.insert(value)?,
                None => break,
            }
        }

        if !self.deletion.is_empty() {
            log::debug!("deletion buffer refilled to {} elements", self.deletion.len());
        }

        Ok(())
    }

    /// Which source currently holds the global extremum. Ties prefer the
    /// deletion buffer, then the insertion buffer, keeping serves cheap and
    /// deterministic.
    fn extremal_source(&self) -> Option<Source> {
        let compare = self.compare;

        let mut best: Option<(&T, Source)> = self.deletion.peek().map(|head| (head, Source::Deletion));
        if let Some(head) = self.insertion.peek() {
            let better = match best {
                Some((value, _)) => compare(head, value) == Ordering::Less,
                None => true,
            };
            if better {
                best = Some((head, Source::Insertion));
            }
        }
        if let Some((head, _)) = self.hierarchy.global_minimum() {
            let better = match best {
                Some((value, _)) => compare(head, value) == Ordering::Less,
                None => true,
            };
            if better {
                best = Some((head, Source::Hierarchy));
            }
        }

        best.map(|(_, source)| source)
    }
}

#[cfg(test)]
mod test {
    use std::cmp::{Ordering, Reverse};
    use std::collections::BinaryHeap;

    use rand::prelude::*;
    use rstest::*;

    use super::{ExternalPriorityQueue, ExternalPriorityQueueBuilder, QueueError};

    type IntQueue = ExternalPriorityQueue<i32, fn(&i32, &i32) -> Ordering>;

    fn small_queue(buffer_capacity: usize, fan_in: usize) -> IntQueue {
        ExternalPriorityQueueBuilder::new()
            .with_buffer_capacity(buffer_capacity)
            .with_fan_in(fan_in)
            .with_threads_number(2)
            .build_min()
            .unwrap()
    }

    fn assert_matches_reference(queue: &mut IntQueue, reference: &mut BinaryHeap<Reverse<i32>>) {
        let Reverse(expected) = reference.pop().unwrap();
        assert_eq!(*queue.top().unwrap(), expected);
        assert_eq!(queue.pop().unwrap(), expected);
    }

    #[test]
    fn test_push_then_pop_returns_pushed() {
        let mut queue = small_queue(4, 2);

        queue.push(42).unwrap();
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.pop().unwrap(), 42);
        assert!(queue.is_empty());
        assert!(matches!(queue.pop(), Err(QueueError::Empty)));
    }

    #[test]
    fn test_empty_queue_contract() {
        let mut queue = small_queue(4, 2);

        assert!(queue.is_empty());
        assert_eq!(queue.len(), 0);
        assert!(matches!(queue.top(), Err(QueueError::Empty)));
        assert!(matches!(queue.pop(), Err(QueueError::Empty)));
    }

    #[rstest]
    #[case(1)]
    #[case(2)]
    #[case(3)]
    fn test_permutations_drain_sorted(#[case] seed: u64) {
        let mut values = Vec::from_iter(0..500);
        values.shuffle(&mut StdRng::seed_from_u64(seed));

        let mut queue = small_queue(16, 2);
        for value in values {
            queue.push(value).unwrap();
        }

        let mut drained = Vec::new();
        while !queue.is_empty() {
            drained.push(queue.pop().unwrap());
        }
        assert_eq!(drained, Vec::from_iter(0..500));
    }

    #[test]
    fn test_max_order() {
        let mut queue: IntQueue = ExternalPriorityQueueBuilder::new()
            .with_buffer_capacity(8)
            .with_fan_in(2)
            .build_max()
            .unwrap();

        for value in [3, 11, 7, 2] {
            queue.push(value).unwrap();
        }

        assert_eq!(queue.pop().unwrap(), 11);
        assert_eq!(queue.pop().unwrap(), 7);
        assert_eq!(queue.pop().unwrap(), 3);
        assert_eq!(queue.pop().unwrap(), 2);
    }

    #[test]
    fn test_flush_boundary() {
        let mut queue = small_queue(8, 2);

        for value in 0..8 {
            queue.push(value).unwrap();
        }
        assert_eq!(queue.levels(), 0);
        assert_eq!(queue.spilled_runs(), 0);

        // one more push forces exactly one flush to level 0
        queue.push(8).unwrap();
        assert_eq!(queue.levels(), 1);
        assert_eq!(queue.spilled_runs(), 1);
        assert_eq!(queue.len(), 9);
    }

    #[test]
    fn test_promotion_boundary() {
        let mut queue = small_queue(8, 2);

        // fan_in * capacity + 1 pushes force exactly one level-0 to level-1
        // promotion: the second flush fills level 0 and it merges upward
        for value in 0..17 {
            queue.push(value).unwrap();
        }
        assert_eq!(queue.levels(), 2);
        assert_eq!(queue.spilled_runs(), 1);
        assert_eq!(queue.len(), 17);
    }

    #[test]
    fn test_interleaved_against_reference() {
        for seed in 1100..1200u64 {
            let mut rng = StdRng::seed_from_u64(seed);
            let mut queue = small_queue(16, 2);
            let mut reference = BinaryHeap::new();

            for _ in 0..71 {
                let value = (rng.next_u32() % 220) as i32;
                queue.push(value).unwrap();
                reference.push(Reverse(value));
            }

            for _ in 0..3 {
                assert_matches_reference(&mut queue, &mut reference);
            }
            for _ in 0..61 {
                if queue.is_empty() {
                    break;
                }
                assert_matches_reference(&mut queue, &mut reference);
            }

            for _ in 0..71 {
                let value = (rng.next_u32() % 220) as i32;
                queue.push(value).unwrap();
                reference.push(Reverse(value));
            }

            while !queue.is_empty() {
                assert_matches_reference(&mut queue, &mut reference);
            }
            assert!(reference.is_empty());
        }
    }

    fn churn(steps: usize, seed: u64) {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut queue = small_queue(32, 4);
        let mut reference: BinaryHeap<Reverse<i32>> = BinaryHeap::new();

        for step in 0..steps {
            // push-biased at the start and the end, pop-biased in the middle
            let phase = (step as f64) * 2.0 * std::f64::consts::PI / (steps as f64);
            let push_bias = (phase.cos() + 1.0) / 2.0;

            assert_eq!(queue.is_empty(), reference.is_empty());
            if !queue.is_empty() {
                assert_eq!(*queue.top().unwrap(), reference.peek().unwrap().0);
            }

            if rng.gen::<f64>() < push_bias {
                let value = rng.gen_range(-10_000..10_000);
                queue.push(value).unwrap();
                reference.push(Reverse(value));
            } else if !queue.is_empty() {
                assert_eq!(queue.pop().unwrap(), reference.pop().unwrap().0);
            }
            assert_eq!(queue.len(), reference.len() as u64);
        }

        while let Some(Reverse(expected)) = reference.pop() {
            assert_eq!(queue.pop().unwrap(), expected);
        }
        assert!(queue.is_empty());
        assert!(matches!(queue.pop(), Err(QueueError::Empty)));
    }

    #[test]
    fn test_randomized_churn() {
        churn(25_000, 13);
    }

    #[test]
    #[ignore]
    fn test_randomized_churn_large() {
        churn(500_000, 1);
    }

    #[test]
    fn test_count_invariant() {
        let mut rng = StdRng::seed_from_u64(99);
        let mut queue = small_queue(8, 2);
        let mut pushed = 0u64;
        let mut popped = 0u64;

        for _ in 0..2_000 {
            if rng.gen_bool(0.6) {
                queue.push(rng.gen_range(0..1_000)).unwrap();
                pushed += 1;
            } else if !queue.is_empty() {
                queue.pop().unwrap();
                popped += 1;
            }

            assert_eq!(queue.len(), pushed - popped);
            let component_sum = queue.insertion.len() as u64
                + queue.deletion.len() as u64
                + queue.hierarchy.remaining();
            assert_eq!(queue.len(), component_sum);
        }
    }

    #[test]
    fn test_string_elements() {
        let mut queue: ExternalPriorityQueue<String, _> = ExternalPriorityQueueBuilder::new()
            .with_buffer_capacity(4)
            .with_fan_in(2)
            .build_by(|a: &String, b: &String| a.cmp(b))
            .unwrap();

        for word in ["pear", "apple", "quince", "fig", "banana", "cherry", "plum", "date", "olive"] {
            queue.push(word.to_string()).unwrap();
        }

        let mut drained = Vec::new();
        while !queue.is_empty() {
            drained.push(queue.pop().unwrap());
        }
        let mut expected: Vec<String> =
            ["pear", "apple", "quince", "fig", "banana", "cherry", "plum", "date", "olive"]
                .iter()
                .map(|word| word.to_string())
                .collect();
        expected.sort();
        assert_eq!(drained, expected);
    }

    #[test]
    fn test_memory_limit_too_small() {
        let queue: Result<IntQueue, _> = ExternalPriorityQueueBuilder::new()
            .with_memory_limit(16)
            .build_min();

        assert!(matches!(queue, Err(QueueError::Memory(_))));
    }

    #[test]
    fn test_memory_limit_rejects_explicit_buffers() {
        let queue: Result<IntQueue, _> = ExternalPriorityQueueBuilder::new()
            .with_memory_limit(1_024)
            .with_buffer_capacity(100_000)
            .build_min();

        assert!(matches!(queue, Err(QueueError::Memory(_))));
    }

    #[test]
    fn test_buffer_capacity_derived_from_limit() {
        let queue: IntQueue = ExternalPriorityQueueBuilder::new()
            .with_memory_limit(4_096)
            .build_min()
            .unwrap();

        // a quarter of the budget per buffer, in elements
        assert_eq!(queue.insertion.capacity(), 256);
        assert_eq!(queue.deletion.capacity(), 256);
    }

    #[rstest]
    #[case(ExternalPriorityQueueBuilder::new().with_fan_in(1))]
    #[case(ExternalPriorityQueueBuilder::new().with_buffer_capacity(0))]
    #[case(ExternalPriorityQueueBuilder::new().with_refill_fraction(0.0))]
    #[case(ExternalPriorityQueueBuilder::new().with_refill_fraction(1.5))]
    fn test_invalid_config(#[case] builder: ExternalPriorityQueueBuilder<i32>) {
        assert!(matches!(builder.build_min(), Err(QueueError::Config(_))));
    }

    #[test]
    fn test_spilled_elements_survive_refills() {
        // small buffers, deep hierarchy: most elements live on disk
        let mut queue = small_queue(4, 2);
        let mut values: Vec<i32> = (0..200).collect();
        values.shuffle(&mut StdRng::seed_from_u64(5));

        for value in values {
            queue.push(value).unwrap();
        }
        assert!(queue.levels() > 1);

        for expected in 0..200 {
            assert_eq!(queue.pop().unwrap(), expected);
        }
        assert!(queue.is_empty());
    }

    #[test]
    fn test_push_smaller_than_refilled_minimum() {
        let mut queue = small_queue(4, 2);

        for value in [50, 60, 70, 80, 90, 100] {
            queue.push(value).unwrap();
        }
        // refill the deletion buffer with the current minima
        assert_eq!(*queue.top().unwrap(), 50);

        // a later push undercuts everything the refill pulled, including
        // after it gets spilled to a level-0 run
        for value in [5, 4, 3, 2, 1] {
            queue.push(value).unwrap();
        }
        assert_eq!(queue.pop().unwrap(), 1);
        assert_eq!(queue.pop().unwrap(), 2);
        assert_eq!(queue.pop().unwrap(), 3);
        assert_eq!(queue.pop().unwrap(), 4);
        assert_eq!(queue.pop().unwrap(), 5);
        assert_eq!(queue.pop().unwrap(), 50);
    }
}
