//! K-way run merger.

use std::cmp::Ordering;

use crate::heap::{BoundedHeap, Compare};
use crate::run::SortedRun;

/// Head element of an open run, tagged with the slot its run occupies.
pub(crate) struct HeadEntry<T> {
    pub value: T,
    pub slot: usize,
}

/// Orders head entries by element first, then by slot, so merges visit
/// equal elements in a deterministic run order.
pub(crate) struct HeadOrder<F>(pub F);

impl<T, F> Compare<HeadEntry<T>> for HeadOrder<F>
where
    F: Fn(&T, &T) -> Ordering,
{
    fn compare(&self, a: &HeadEntry<T>, b: &HeadEntry<T>) -> Ordering {
        (self.0)(&a.value, &b.value).then_with(|| a.slot.cmp(&b.slot))
    }
}

/// Streaming k-way merge over sorted runs.
///
/// Yields every element of the input runs in comparator order. A heap of
/// per-run heads keeps each step at O(log k); exhausted runs are dropped as
/// the merge passes over them, releasing their scratch files before the
/// merge itself completes.
pub struct HeapMerger<T, R, F> {
    heads: BoundedHeap<HeadEntry<T>, HeadOrder<F>>,
    runs: Vec<Option<R>>,
}

impl<T, R, F> HeapMerger<T, R, F>
where
    R: SortedRun<T>,
    F: Fn(&T, &T) -> Ordering + Copy,
{
    /// Builds a merger over `runs`, pulling the head of each to seed the heap.
    /// Run elements must be sorted under `compare`, otherwise the merge
    /// order is undefined.
    pub fn new(runs: Vec<R>, compare: F) -> Result<Self, R::Error> {
        let mut slots: Vec<Option<R>> = runs.into_iter().map(Some).collect();
        let mut heads = BoundedHeap::new(slots.len(), HeadOrder(compare));

        for (slot, run) in slots.iter_mut().enumerate() {
            let head = match run.as_mut() {
                Some(open) => open.pull()?,
                None => None,
            };
            match head {
                Some(value) => heads
                    .insert(HeadEntry { value, slot })
                    .expect("head heap sized to the run count"),
                None => *run = None,
            }
        }

        Ok(HeapMerger { heads, runs: slots })
    }

    /// Builds a merger from already open group state: a seeded head heap and
    /// the slot-indexed runs it refers to.
    pub(crate) fn from_parts(
        heads: BoundedHeap<HeadEntry<T>, HeadOrder<F>>,
        runs: Vec<Option<R>>,
    ) -> Self {
        HeapMerger { heads, runs }
    }
}

impl<T, R, F> Iterator for HeapMerger<T, R, F>
where
    R: SortedRun<T>,
    F: Fn(&T, &T) -> Ordering + Copy,
{
    type Item = Result<T, R::Error>;

    /// Returns the next element of the merged sequence in comparator order.
    fn next(&mut self) -> Option<Self::Item> {
        let HeadEntry { value, slot } = self.heads.pop()?;

        if let Some(run) = self.runs[slot].as_mut() {
            match run.pull() {
                Ok(Some(next)) => self
                    .heads
                    .insert(HeadEntry { value: next, slot })
                    .expect("a head slot was just vacated"),
                Ok(None) => self.runs[slot] = None,
                Err(err) => return Some(Err(err)),
            }
        }

        Some(Ok(value))
    }
}

#[cfg(test)]
mod test {
    use rstest::*;

    use super::HeapMerger;
    use crate::run::{RmpRun, SortedRun};

    #[fixture]
    fn tmp_dir() -> tempfile::TempDir {
        tempfile::tempdir().unwrap()
    }

    fn make_runs(tmp_dir: &tempfile::TempDir, runs: Vec<Vec<i32>>) -> Vec<RmpRun<i32>> {
        runs.into_iter()
            .map(|items| SortedRun::create(tmp_dir.path(), items.into_iter().map(Ok), None).unwrap())
            .collect()
    }

    #[rstest]
    #[case(vec![], vec![])]
    #[case(vec![vec![], vec![]], vec![])]
    #[case(
        vec![
            vec![4, 5, 7],
            vec![1, 6],
            vec![3],
            vec![],
        ],
        vec![1, 3, 4, 5, 6, 7],
    )]
    #[case(
        vec![
            vec![1, 1, 2],
            vec![1, 3],
        ],
        vec![1, 1, 1, 2, 3],
    )]
    fn test_merger(
        tmp_dir: tempfile::TempDir,
        #[case] runs: Vec<Vec<i32>>,
        #[case] expected: Vec<i32>,
    ) {
        let runs = make_runs(&tmp_dir, runs);
        let merger = HeapMerger::new(runs, |a: &i32, b: &i32| a.cmp(b)).unwrap();

        let merged: Result<Vec<i32>, _> = merger.collect();
        assert_eq!(merged.unwrap(), expected);
    }

    #[rstest]
    fn test_merger_reversed_order(tmp_dir: tempfile::TempDir) {
        let runs = make_runs(&tmp_dir, vec![vec![9, 4, 1], vec![7, 2]]);
        let merger = HeapMerger::new(runs, |a: &i32, b: &i32| b.cmp(a)).unwrap();

        let merged: Result<Vec<i32>, _> = merger.collect();
        assert_eq!(merged.unwrap(), vec![9, 7, 4, 2, 1]);
    }
}
