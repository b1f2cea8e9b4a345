//! The map/reduce task table.
//!
//! Records are created once at master setup and never destroyed. A task's
//! `complete` flag is monotone: local computation and remote merges can set
//! it, nothing ever clears it. The verified progress count (`completed`)
//! only counts complete tasks whose output artifacts are actually present
//! in the local store; a complete task with missing artifacts is globally
//! done but locally incomplete, and yields a re-request token instead.

use std::time::Duration;

use crate::artifact::{intermediate_name, output_name, ArtifactStore};
use crate::bitmap::TaskBitmap;
use crate::message::{FileToken, TaskPhase};

#[derive(Debug, Clone)]
pub struct TaskRecord {
    pub complete: bool,
    /// Input artifact name; map tasks only.
    pub input: Option<String>,
    /// Remaining reservation after an assignment. Zero means assignable.
    in_flight: Duration,
}

impl TaskRecord {
    fn new() -> Self {
        Self {
            complete: false,
            input: None,
            in_flight: Duration::ZERO,
        }
    }

    pub fn assignable(&self) -> bool {
        !self.complete && self.in_flight.is_zero()
    }
}

#[derive(Debug)]
pub struct TaskLedger {
    map: Vec<TaskRecord>,
    reduce: Vec<TaskRecord>,
    /// Verified-complete task count; `None` until the base inputs arrive.
    pub completed: Option<u32>,
}

impl TaskLedger {
    pub fn new(map_count: usize, reduce_count: usize) -> Self {
        Self {
            map: (0..map_count).map(|_| TaskRecord::new()).collect(),
            reduce: (0..reduce_count).map(|_| TaskRecord::new()).collect(),
            completed: None,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.completed.is_some()
    }

    /// Install the base input set (map-index order) and start tracking
    /// progress. A repeat delivery is ignored; re-installing would only
    /// re-derive the same state. Returns whether anything changed.
    pub fn install_inputs(&mut self, names: impl IntoIterator<Item = String>) -> bool {
        if self.is_initialized() {
            return false;
        }
        for (record, name) in self.map.iter_mut().zip(names) {
            record.input = Some(name);
        }
        self.completed = Some(0);
        true
    }

    pub fn map_count(&self) -> usize {
        self.map.len()
    }

    pub fn reduce_count(&self) -> usize {
        self.reduce.len()
    }

    pub fn mapping_done(&self) -> bool {
        self.map.iter().all(|t| t.complete)
    }

    pub fn reducing_done(&self) -> bool {
        self.reduce.iter().all(|t| t.complete)
    }

    pub fn all_done(&self) -> bool {
        self.mapping_done() && self.reducing_done()
    }

    pub fn map_input(&self, index: usize) -> Option<&str> {
        self.map.get(index)?.input.as_deref()
    }

    pub fn map_inputs(&self) -> impl Iterator<Item = &str> {
        self.map.iter().filter_map(|t| t.input.as_deref())
    }

    /// First incomplete, unreserved task of the phase, in index order.
    pub fn next_assignable(&self, phase: TaskPhase) -> Option<usize> {
        self.tasks(phase).iter().position(TaskRecord::assignable)
    }

    /// Reserve a task for an in-flight assignment. When the reservation
    /// expires the task becomes assignable again; there is no epoch
    /// fencing, a slow worker's eventual report is simply accepted.
    pub fn reserve(&mut self, phase: TaskPhase, index: usize, timeout: Duration) {
        if let Some(task) = self.tasks_mut(phase).get_mut(index) {
            task.in_flight = timeout;
        }
    }

    /// Monotone completion. Marking an already-complete task is a no-op.
    pub fn mark_complete(&mut self, phase: TaskPhase, index: usize) {
        if let Some(task) = self.tasks_mut(phase).get_mut(index) {
            task.complete = true;
            task.in_flight = Duration::ZERO;
        }
    }

    pub fn is_complete(&self, phase: TaskPhase, index: usize) -> bool {
        self.tasks(phase).get(index).is_some_and(|t| t.complete)
    }

    pub fn map_bitmap(&self) -> TaskBitmap {
        Self::bitmap_of(&self.map)
    }

    pub fn reduce_bitmap(&self) -> TaskBitmap {
        Self::bitmap_of(&self.reduce)
    }

    /// OR-merge a remote completion view. Never clears a local bit.
    pub fn merge_bitmaps(&mut self, map_bits: &TaskBitmap, reduce_bits: &TaskBitmap) {
        for (i, task) in self.map.iter_mut().enumerate() {
            if map_bits.get(i) {
                task.complete = true;
                task.in_flight = Duration::ZERO;
            }
        }
        for (i, task) in self.reduce.iter_mut().enumerate() {
            if reduce_bits.get(i) {
                task.complete = true;
                task.in_flight = Duration::ZERO;
            }
        }
    }

    /// Count down the in-flight reservations.
    pub fn tick(&mut self, dt: Duration) {
        for task in self.map.iter_mut().chain(self.reduce.iter_mut()) {
            task.in_flight = task.in_flight.saturating_sub(dt);
        }
    }

    /// Recompute the verified progress count from scratch: a task counts
    /// only if complete AND all its output artifacts are present in
    /// `store`. Every complete-but-missing group yields a token the caller
    /// should broadcast in a `REQUESTFILES`.
    ///
    /// Does nothing while uninitialized; there is no point tracking
    /// progress before the base inputs arrive.
    pub fn recount(&mut self, store: &ArtifactStore) -> Vec<FileToken> {
        if !self.is_initialized() {
            return Vec::new();
        }

        let mut verified = 0u32;
        let mut needed = Vec::new();

        let reduce_count = self.reduce.len();
        for (i, task) in self.map.iter().enumerate() {
            if !task.complete {
                continue;
            }
            let have_all = (0..reduce_count).all(|j| store.contains(&intermediate_name(j, i)));
            if have_all {
                verified += 1;
            } else {
                needed.push(FileToken::Map(i));
            }
        }
        for (i, task) in self.reduce.iter().enumerate() {
            if !task.complete {
                continue;
            }
            if store.contains(&output_name(i)) {
                verified += 1;
            } else {
                needed.push(FileToken::Reduce(i));
            }
        }

        self.completed = Some(verified);
        needed
    }

    fn tasks(&self, phase: TaskPhase) -> &[TaskRecord] {
        match phase {
            TaskPhase::Map => &self.map,
            TaskPhase::Reduce => &self.reduce,
        }
    }

    fn tasks_mut(&mut self, phase: TaskPhase) -> &mut [TaskRecord] {
        match phase {
            TaskPhase::Map => &mut self.map,
            TaskPhase::Reduce => &mut self.reduce,
        }
    }

    fn bitmap_of(tasks: &[TaskRecord]) -> TaskBitmap {
        let mut bits = TaskBitmap::new(tasks.len());
        for (i, task) in tasks.iter().enumerate() {
            if task.complete {
                bits.set(i);
            }
        }
        bits
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::Artifact;

    fn initialized_ledger(map: usize, reduce: usize) -> TaskLedger {
        let mut ledger = TaskLedger::new(map, reduce);
        ledger.install_inputs((0..map).map(|i| format!("pg-{:02}.txt", i)));
        ledger
    }

    /// Store holding every intermediate of map task `i`.
    fn store_with_map_outputs(map_index: usize, reduce_count: usize) -> ArtifactStore {
        let mut store = ArtifactStore::new();
        for j in 0..reduce_count {
            store.insert(Artifact::new(intermediate_name(j, map_index), ""));
        }
        store
    }

    #[test]
    fn starts_uninitialized() {
        let ledger = TaskLedger::new(3, 2);
        assert!(!ledger.is_initialized());
        assert_eq!(ledger.completed, None);
        assert_eq!(ledger.map_count(), 3);
        assert_eq!(ledger.reduce_count(), 2);
    }

    #[test]
    fn install_inputs_initializes_once() {
        let mut ledger = TaskLedger::new(2, 2);
        assert!(ledger.install_inputs(vec!["a.txt".to_string(), "b.txt".to_string()]));
        assert_eq!(ledger.completed, Some(0));
        assert_eq!(ledger.map_input(0), Some("a.txt"));
        assert_eq!(ledger.map_input(1), Some("b.txt"));

        // A repeat delivery changes nothing.
        assert!(!ledger.install_inputs(vec!["x.txt".to_string(), "y.txt".to_string()]));
        assert_eq!(ledger.map_input(0), Some("a.txt"));
    }

    #[test]
    fn assignment_scans_in_index_order() {
        let mut ledger = initialized_ledger(3, 2);
        assert_eq!(ledger.next_assignable(TaskPhase::Map), Some(0));

        ledger.reserve(TaskPhase::Map, 0, Duration::from_millis(500));
        assert_eq!(ledger.next_assignable(TaskPhase::Map), Some(1));

        ledger.mark_complete(TaskPhase::Map, 1);
        assert_eq!(ledger.next_assignable(TaskPhase::Map), Some(2));

        ledger.reserve(TaskPhase::Map, 2, Duration::from_millis(500));
        assert_eq!(ledger.next_assignable(TaskPhase::Map), None);
    }

    #[test]
    fn expired_reservation_is_assignable_again() {
        let mut ledger = initialized_ledger(1, 1);
        ledger.reserve(TaskPhase::Map, 0, Duration::from_millis(100));
        assert_eq!(ledger.next_assignable(TaskPhase::Map), None);

        ledger.tick(Duration::from_millis(60));
        assert_eq!(ledger.next_assignable(TaskPhase::Map), None);

        ledger.tick(Duration::from_millis(60));
        assert_eq!(ledger.next_assignable(TaskPhase::Map), Some(0));
    }

    #[test]
    fn completion_is_idempotent() {
        let mut ledger = initialized_ledger(2, 2);
        ledger.mark_complete(TaskPhase::Map, 0);
        ledger.mark_complete(TaskPhase::Map, 0);
        assert!(ledger.is_complete(TaskPhase::Map, 0));
        assert_eq!(ledger.map_bitmap().count_set(), 1);
    }

    #[test]
    fn merge_never_clears_a_local_bit() {
        let mut ledger = initialized_ledger(3, 2);
        ledger.mark_complete(TaskPhase::Map, 1);

        // Remote view knows nothing; local completion must survive.
        ledger.merge_bitmaps(&TaskBitmap::new(3), &TaskBitmap::new(2));
        assert!(ledger.is_complete(TaskPhase::Map, 1));

        let mut remote_map = TaskBitmap::new(3);
        remote_map.set(2);
        let mut remote_reduce = TaskBitmap::new(2);
        remote_reduce.set(0);
        ledger.merge_bitmaps(&remote_map, &remote_reduce);
        assert!(ledger.is_complete(TaskPhase::Map, 1));
        assert!(ledger.is_complete(TaskPhase::Map, 2));
        assert!(ledger.is_complete(TaskPhase::Reduce, 0));
    }

    #[test]
    fn recount_requires_verified_artifacts() {
        let mut ledger = initialized_ledger(2, 3);
        ledger.mark_complete(TaskPhase::Map, 0);

        // No artifacts present: complete but unverified.
        let needed = ledger.recount(&ArtifactStore::new());
        assert_eq!(ledger.completed, Some(0));
        assert_eq!(needed, vec![FileToken::Map(0)]);

        // All three intermediates present: now it counts.
        let store = store_with_map_outputs(0, 3);
        let needed = ledger.recount(&store);
        assert_eq!(ledger.completed, Some(1));
        assert!(needed.is_empty());
    }

    #[test]
    fn recount_counts_reduce_outputs() {
        let mut ledger = initialized_ledger(1, 2);
        ledger.mark_complete(TaskPhase::Reduce, 1);

        let needed = ledger.recount(&ArtifactStore::new());
        assert_eq!(needed, vec![FileToken::Reduce(1)]);
        assert_eq!(ledger.completed, Some(0));

        let mut store = ArtifactStore::new();
        store.insert(Artifact::new(output_name(1), "a,1"));
        assert!(ledger.recount(&store).is_empty());
        assert_eq!(ledger.completed, Some(1));
    }

    #[test]
    fn recount_noop_while_uninitialized() {
        let mut ledger = TaskLedger::new(2, 2);
        ledger.mark_complete(TaskPhase::Map, 0);
        assert!(ledger.recount(&ArtifactStore::new()).is_empty());
        assert_eq!(ledger.completed, None);
    }

    #[test]
    fn phase_predicates() {
        let mut ledger = initialized_ledger(2, 1);
        assert!(!ledger.mapping_done());
        ledger.mark_complete(TaskPhase::Map, 0);
        ledger.mark_complete(TaskPhase::Map, 1);
        assert!(ledger.mapping_done());
        assert!(!ledger.all_done());
        ledger.mark_complete(TaskPhase::Reduce, 0);
        assert!(ledger.all_done());
    }
}
