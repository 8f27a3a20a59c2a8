//! Fan-in bounded merge groups.

use std::cmp::Ordering;
use std::error::Error;
use std::fmt;
use std::path::Path;

use crate::heap::BoundedHeap;
use crate::memory::{MemoryBudget, MemoryError};
use crate::merge::{HeadEntry, HeadOrder, HeapMerger};
use crate::run::{SortedRun, DEFAULT_RW_BUF_SIZE};

/// Merge group error.
#[derive(Debug)]
pub enum GroupError<E: Error> {
    /// The group already holds its full fan-in of runs.
    Full { fan_in: usize },
    /// The memory budget rejected a reservation.
    Memory(MemoryError),
    /// The backing storage failed.
    Storage(E),
}

impl<E: Error + 'static> Error for GroupError<E> {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            GroupError::Full { .. } => None,
            GroupError::Memory(err) => Some(err),
            GroupError::Storage(err) => Some(err),
        }
    }
}

impl<E: Error> fmt::Display for GroupError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupError::Full { fan_in } => write!(f, "merge group is full ({} runs)", fan_in),
            GroupError::Memory(err) => write!(f, "{}", err),
            GroupError::Storage(err) => write!(f, "run storage failure: {}", err),
        }
    }
}

impl<E: Error> From<MemoryError> for GroupError<E> {
    fn from(err: MemoryError) -> Self {
        GroupError::Memory(err)
    }
}

/// A single level of the cascading merge hierarchy.
///
/// Holds up to `fan_in` open runs. Each open run contributes its current
/// head to a small heap, so the group minimum is one peek away and
/// consuming it costs O(log fan_in).
///
/// Slot invariant: `runs[slot]` is `Some` exactly when one entry in the
/// head heap carries `slot`. A run whose last element leaves the heap frees
/// its slot immediately, so a reused slot can never alias two runs.
pub struct MergeGroup<T, R, F> {
    heads: BoundedHeap<HeadEntry<T>, HeadOrder<F>>,
    runs: Vec<Option<R>>,
    fan_in: usize,
    compare: F,
    /// Bytes charged per open run for its read buffer.
    run_cost: u64,
}

impl<T, R, F> MergeGroup<T, R, F>
where
    R: SortedRun<T>,
    F: Fn(&T, &T) -> Ordering + Copy,
{
    pub fn new(fan_in: usize, run_cost: u64, compare: F) -> Self {
        MergeGroup {
            heads: BoundedHeap::new(fan_in, HeadOrder(compare)),
            runs: (0..fan_in).map(|_| None).collect(),
            fan_in,
            compare,
            run_cost,
        }
    }

    /// Number of open runs.
    pub fn run_count(&self) -> usize {
        self.heads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heads.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.heads.len() >= self.fan_in
    }

    /// Elements still reachable through this group, heads included.
    pub fn remaining(&self) -> u64 {
        self.heads.len() as u64
            + self
                .runs
                .iter()
                .flatten()
                .map(|run| run.remaining())
                .sum::<u64>()
    }

    /// Opens `run` in a free slot. Runs that turn out to be empty are
    /// discarded without claiming a slot.
    pub fn add_run(&mut self, mut run: R, budget: &mut MemoryBudget) -> Result<(), GroupError<R::Error>> {
        if self.is_full() {
            return Err(GroupError::Full { fan_in: self.fan_in });
        }

        let head = match run.pull().map_err(GroupError::Storage)? {
            Some(head) => head,
            None => return Ok(()),
        };

        budget.reserve(self.run_cost)?;
        let slot = self
            .runs
            .iter()
            .position(|slot| slot.is_none())
            .expect("a group below fan-in has a free slot");
        self.heads
            .insert(HeadEntry { value: head, slot })
            .expect("head heap sized to fan-in");
        self.runs[slot] = Some(run);

        Ok(())
    }

    /// The group minimum without consuming it.
    pub fn current_minimum(&self) -> Option<&T> {
        self.heads.peek().map(|entry| &entry.value)
    }

    /// Removes and returns the group minimum, advancing the run it came
    /// from. An exhausted run is closed and its slot freed on the spot.
    pub fn consume_minimum(
        &mut self,
        budget: &mut MemoryBudget,
    ) -> Result<Option<T>, GroupError<R::Error>> {
        let HeadEntry { value, slot } = match self.heads.pop() {
            Some(entry) => entry,
            None => return Ok(None),
        };

        let next = match self.runs[slot].as_mut() {
            Some(run) => run.pull().map_err(GroupError::Storage)?,
            None => None,
        };
        match next {
            Some(head) => self
                .heads
                .insert(HeadEntry { value: head, slot })
                .expect("a head slot was just vacated"),
            None => {
                self.runs[slot] = None;
                budget.release(self.run_cost);
            }
        }

        Ok(Some(value))
    }

    /// Merges every open run into one new sorted run and leaves the group
    /// empty. The caller promotes the result to the next level.
    pub fn drain_and_merge(
        &mut self,
        dir: &Path,
        buf_size: Option<usize>,
        budget: &mut MemoryBudget,
    ) -> Result<R, GroupError<R::Error>> {
        let open_runs = self.run_count() as u64;
        log::debug!("merging {} runs into one", open_runs);

        // the output writer's buffer is live for the whole merge
        let writer_cost = buf_size.unwrap_or(DEFAULT_RW_BUF_SIZE) as u64;
        budget.reserve(writer_cost)?;

        let heads = std::mem::replace(
            &mut self.heads,
            BoundedHeap::new(self.fan_in, HeadOrder(self.compare)),
        );
        let runs = std::mem::replace(&mut self.runs, (0..self.fan_in).map(|_| None).collect());

        let merger = HeapMerger::from_parts(heads, runs);
        let merged = R::create(dir, merger, buf_size).map_err(GroupError::Storage);

        budget.release(writer_cost + open_runs * self.run_cost);
        merged
    }
}
