//! Cascading merge hierarchy.

use std::cmp::Ordering;
use std::error::Error;
use std::fmt;
use std::mem;
use std::path::Path;

use crate::group::{GroupError, MergeGroup};
use crate::memory::{MemoryBudget, MemoryError};
use crate::merge::HeadEntry;
use crate::run::SortedRun;

/// Merge hierarchy error.
#[derive(Debug)]
pub enum HierarchyError<E: Error> {
    /// The memory budget rejected a reservation.
    Memory(MemoryError),
    /// A group refused a run even though it was drained beforehand.
    Overflow { level: usize },
    /// The backing storage failed at the given level.
    Storage { level: usize, source: E },
}

impl<E: Error + 'static> Error for HierarchyError<E> {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            HierarchyError::Memory(err) => Some(err),
            HierarchyError::Overflow { .. } => None,
            HierarchyError::Storage { source, .. } => Some(source),
        }
    }
}

impl<E: Error> fmt::Display for HierarchyError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HierarchyError::Memory(err) => write!(f, "{}", err),
            HierarchyError::Overflow { level } => {
                write!(f, "merge group overflow at level {}", level)
            }
            HierarchyError::Storage { level, source } => {
                write!(f, "storage failure at level {}: {}", level, source)
            }
        }
    }
}

impl<E: Error> From<MemoryError> for HierarchyError<E> {
    fn from(err: MemoryError) -> Self {
        HierarchyError::Memory(err)
    }
}

fn at_level<E: Error>(level: usize, err: GroupError<E>) -> HierarchyError<E> {
    match err {
        GroupError::Full { .. } => HierarchyError::Overflow { level },
        GroupError::Memory(err) => HierarchyError::Memory(err),
        GroupError::Storage(err) => HierarchyError::Storage { level, source: err },
    }
}

/// Ordered sequence of merge groups of increasing level.
///
/// Level 0 receives buffer flushes; a group that reaches its fan-in is
/// drained into one run and that run promoted to the next level, so runs
/// grow by a factor of the fan-in per level. Groups are owned by level
/// index and runs by slot index; no structure points back at its owner.
pub struct GroupHierarchy<T, R, F> {
    groups: Vec<MergeGroup<T, R, F>>,
    fan_in: usize,
    /// Bytes charged per open run, passed through to groups.
    run_cost: u64,
    /// Bytes charged per group for its head heap.
    group_cost: u64,
    compare: F,
}

impl<T, R, F> GroupHierarchy<T, R, F>
where
    R: SortedRun<T>,
    F: Fn(&T, &T) -> Ordering + Copy,
{
    pub fn new(fan_in: usize, run_cost: u64, compare: F) -> Self {
        GroupHierarchy {
            groups: Vec::new(),
            fan_in,
            run_cost,
            group_cost: (fan_in * mem::size_of::<HeadEntry<T>>()) as u64,
            compare,
        }
    }

    /// Number of active merge levels.
    pub fn levels(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.iter().all(|group| group.is_empty())
    }

    /// Elements reachable through all levels.
    pub fn remaining(&self) -> u64 {
        self.groups.iter().map(|group| group.remaining()).sum()
    }

    /// Open runs across all levels.
    pub fn run_count(&self) -> usize {
        self.groups.iter().map(|group| group.run_count()).sum()
    }

    /// Inserts `run` at `level`, creating missing levels on demand. A group
    /// that reaches its fan-in is drained immediately and the merged run
    /// promoted one level up.
    pub fn promote(
        &mut self,
        run: R,
        level: usize,
        dir: &Path,
        buf_size: Option<usize>,
        budget: &mut MemoryBudget,
    ) -> Result<(), HierarchyError<R::Error>> {
        self.ensure_level(level, budget)?;

        self.groups[level]
            .add_run(run, budget)
            .map_err(|err| at_level(level, err))?;

        if self.groups[level].is_full() {
            log::debug!("level {} reached fan-in {}, merging upward", level, self.fan_in);
            let merged = self.groups[level]
                .drain_and_merge(dir, buf_size, budget)
                .map_err(|err| at_level(level, err))?;
            self.promote(merged, level + 1, dir, buf_size, budget)?;
        }

        Ok(())
    }

    /// The extremal head across every level, with the level it sits at.
    pub fn global_minimum(&self) -> Option<(&T, usize)> {
        let mut best: Option<(&T, usize)> = None;
        for (level, group) in self.groups.iter().enumerate() {
            if let Some(head) = group.current_minimum() {
                let better = match best {
                    Some((value, _)) => (self.compare)(head, value) == Ordering::Less,
                    None => true,
                };
                if better {
                    best = Some((head, level));
                }
            }
        }

        best
    }

    /// Removes the extremal element across all levels.
    pub fn consume_minimum(
        &mut self,
        budget: &mut MemoryBudget,
    ) -> Result<Option<T>, HierarchyError<R::Error>> {
        let level = match self.global_minimum() {
            Some((_, level)) => level,
            None => return Ok(None),
        };

        let value = self.groups[level]
            .consume_minimum(budget)
            .map_err(|err| at_level(level, err))?;
        self.shrink(budget);

        Ok(value)
    }

    /// Drops empty trailing groups, returning their heap reservation.
    fn shrink(&mut self, budget: &mut MemoryBudget) {
        while self.groups.last().map_or(false, |group| group.is_empty()) {
            self.groups.pop();
            budget.release(self.group_cost);
            log::debug!("closed merge level {}", self.groups.len());
        }
    }

    fn ensure_level(
        &mut self,
        level: usize,
        budget: &mut MemoryBudget,
    ) -> Result<(), HierarchyError<R::Error>> {
        while self.groups.len() <= level {
            budget.reserve(self.group_cost)?;
            log::debug!("opened merge level {}", self.groups.len());
            self.groups
                .push(MergeGroup::new(self.fan_in, self.run_cost, self.compare));
        }

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use rstest::*;

    use super::GroupHierarchy;
    use crate::memory::MemoryBudget;
    use crate::run::{RmpRun, SortedRun};

    fn ascending(a: &i32, b: &i32) -> std::cmp::Ordering {
        a.cmp(b)
    }

    #[fixture]
    fn tmp_dir() -> tempfile::TempDir {
        tempfile::tempdir().unwrap()
    }

    fn make_run(tmp_dir: &tempfile::TempDir, items: Vec<i32>) -> RmpRun<i32> {
        SortedRun::create(tmp_dir.path(), items.into_iter().map(Ok), None).unwrap()
    }

    #[rstest]
    fn test_promotion_cascade(tmp_dir: tempfile::TempDir) {
        let mut budget = MemoryBudget::unlimited();
        let mut hierarchy: GroupHierarchy<i32, RmpRun<i32>, _> =
            GroupHierarchy::new(2, 0, ascending);

        let run = make_run(&tmp_dir, vec![1, 4]);
        hierarchy.promote(run, 0, tmp_dir.path(), None, &mut budget).unwrap();
        assert_eq!(hierarchy.levels(), 1);
        assert_eq!(hierarchy.run_count(), 1);

        // second level-0 run reaches the fan-in and cascades upward
        let run = make_run(&tmp_dir, vec![2, 3]);
        hierarchy.promote(run, 0, tmp_dir.path(), None, &mut budget).unwrap();
        assert_eq!(hierarchy.levels(), 2);
        assert_eq!(hierarchy.run_count(), 1);
        assert_eq!(hierarchy.remaining(), 4);
    }

    #[rstest]
    fn test_global_minimum_across_levels(tmp_dir: tempfile::TempDir) {
        let mut budget = MemoryBudget::unlimited();
        let mut hierarchy: GroupHierarchy<i32, RmpRun<i32>, _> =
            GroupHierarchy::new(2, 0, ascending);

        hierarchy
            .promote(make_run(&tmp_dir, vec![5, 6]), 0, tmp_dir.path(), None, &mut budget)
            .unwrap();
        hierarchy
            .promote(make_run(&tmp_dir, vec![3, 8]), 1, tmp_dir.path(), None, &mut budget)
            .unwrap();

        assert_eq!(hierarchy.global_minimum(), Some((&3, 1)));

        let mut drained = Vec::new();
        while let Some(value) = hierarchy.consume_minimum(&mut budget).unwrap() {
            drained.push(value);
        }
        assert_eq!(drained, vec![3, 5, 6, 8]);
        assert!(hierarchy.is_empty());
        // trailing empty groups are reclaimed as they drain
        assert_eq!(hierarchy.levels(), 0);
    }

    #[rstest]
    fn test_group_budget_reclaimed(tmp_dir: tempfile::TempDir) {
        let mut budget = MemoryBudget::unlimited();
        let mut hierarchy: GroupHierarchy<i32, RmpRun<i32>, _> =
            GroupHierarchy::new(2, 0, ascending);

        hierarchy
            .promote(make_run(&tmp_dir, vec![1]), 0, tmp_dir.path(), None, &mut budget)
            .unwrap();
        let charged = budget.used();
        assert!(charged > 0);

        hierarchy.consume_minimum(&mut budget).unwrap();
        assert_eq!(budget.used(), 0);
        assert_eq!(hierarchy.levels(), 0);
    }
}
