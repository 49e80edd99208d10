//! Priority and dependency ordered operation queue.
//!
//! Operations are ordered by a computed priority:
//!
//! ```text
//! priority = base(kind) + size_bonus - 5 * depth
//! base:       Delete 100, Move 80, Update 60, Copy 40
//! size_bonus: +20 below 10 MB, -10 above 100 MB, 0 otherwise
//! depth:      number of components in the relative path
//! ```
//!
//! An operation depends on every ancestor directory of its path. `dequeue`
//! hands out the best operation whose dependencies are satisfied; blocked
//! operations go back into the heap as fresh entries with a priority lowered
//! by 0.1, so a long-blocked entry slowly yields to the rest of the queue.
//!
//! A dependency is satisfied when the ancestor has completed, or when no
//! operation for that ancestor is queued or running.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, VecDeque};

use tracing::{debug, trace};
use uuid::Uuid;

use crate::model::OperationKind;
use crate::progress::TransferStats;
use crate::throughput::{ThroughputConfig, ThroughputTracker};

const SMALL_FILE_THRESHOLD: u64 = 10 * 1024 * 1024;
const LARGE_FILE_THRESHOLD: u64 = 100 * 1024 * 1024;
const SMALL_FILE_BONUS: f64 = 20.0;
const LARGE_FILE_PENALTY: f64 = 10.0;
const DEPTH_PENALTY: f64 = 5.0;
const REQUEUE_DECAY: f64 = 0.1;

/// Lifecycle of a scheduled operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationStatus {
    Queued,
    InProgress,
    Completed,
}

/// A unit of work handed out by the scheduler.
#[derive(Debug, Clone, PartialEq)]
pub struct FileOperation {
    pub id: Uuid,
    /// Relative path the operation acts on
    pub path: String,
    pub kind: OperationKind,
    pub size: u64,
    pub priority: f64,
    /// Ancestor directories, shallowest first
    pub dependencies: Vec<String>,
    /// Previous location, for moves
    pub original_path: Option<String>,
    pub status: OperationStatus,
}

/// Priority of an operation of `kind` on `path` with `size` bytes.
pub fn calculate_priority(kind: OperationKind, size: u64, path: &str) -> f64 {
    let size_bonus = if size < SMALL_FILE_THRESHOLD {
        SMALL_FILE_BONUS
    } else if size > LARGE_FILE_THRESHOLD {
        -LARGE_FILE_PENALTY
    } else {
        0.0
    };
    let depth = path_components(path).count() as f64;
    kind.base_priority() + size_bonus - DEPTH_PENALTY * depth
}

/// Ancestor directories of `path`, shallowest first. `"a/b/c"` yields
/// `["a", "a/b"]`.
pub fn dependencies_for(path: &str) -> Vec<String> {
    let parts: Vec<&str> = path_components(path).collect();
    (1..parts.len()).map(|n| parts[..n].join("/")).collect()
}

fn path_components(path: &str) -> impl Iterator<Item = &str> {
    path.split(['/', '\\']).filter(|part| !part.is_empty())
}

/// Heap entry; the priority is frozen at insertion time.
#[derive(Debug)]
struct QueuedOperation {
    seq: u64,
    operation: FileOperation,
}

impl PartialEq for QueuedOperation {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for QueuedOperation {}

impl PartialOrd for QueuedOperation {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedOperation {
    fn cmp(&self, other: &Self) -> Ordering {
        // max-heap: higher priority first, then earlier insertion
        self.operation
            .priority
            .total_cmp(&other.operation.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Completed paths, keeping only the most recent `capacity` entries.
///
/// Insertion order lives in a ring buffer tagged with a generation number,
/// so re-completing a path supersedes its earlier slot and eviction is O(1).
#[derive(Debug, Clone)]
pub struct CompletedLog {
    capacity: usize,
    generation: u64,
    entries: HashMap<String, (u64, FileOperation)>,
    order: VecDeque<(u64, String)>,
}

impl CompletedLog {
    pub fn new(capacity: usize) -> Self {
        CompletedLog {
            capacity: capacity.max(1),
            generation: 0,
            entries: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    pub fn insert(&mut self, operation: FileOperation) {
        self.generation += 1;
        let generation = self.generation;
        self.order.push_back((generation, operation.path.clone()));
        self.entries
            .insert(operation.path.clone(), (generation, operation));

        while self.entries.len() > self.capacity {
            match self.order.pop_front() {
                Some((generation, path)) => {
                    if self.entries.get(&path).map(|(g, _)| *g) == Some(generation) {
                        self.entries.remove(&path);
                    }
                }
                None => break,
            }
        }

        if self.order.len() > self.capacity * 2 {
            let entries = &self.entries;
            self.order
                .retain(|(generation, path)| entries.get(path).map(|(g, _)| g) == Some(generation));
        }
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    pub fn get(&self, path: &str) -> Option<&FileOperation> {
        self.entries.get(path).map(|(_, operation)| operation)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Scheduler tuning.
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerConfig {
    /// Completed operations retained for dependency lookups
    pub max_completed: usize,
    pub throughput: ThroughputConfig,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            max_completed: 1000,
            throughput: ThroughputConfig::default(),
        }
    }
}

/// Priority queue of pending operations plus in-progress and completed
/// bookkeeping for one batch.
#[derive(Debug)]
pub struct OperationScheduler {
    queue: BinaryHeap<QueuedOperation>,
    queued_paths: HashMap<String, usize>,
    in_progress: HashMap<String, FileOperation>,
    completed: CompletedLog,
    tracker: ThroughputTracker,
    next_seq: u64,
}

impl Default for OperationScheduler {
    fn default() -> Self {
        OperationScheduler::new(SchedulerConfig::default())
    }
}

impl OperationScheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        OperationScheduler {
            queue: BinaryHeap::new(),
            queued_paths: HashMap::new(),
            in_progress: HashMap::new(),
            completed: CompletedLog::new(config.max_completed),
            tracker: ThroughputTracker::new(config.throughput),
            next_seq: 0,
        }
    }

    /// Queue an operation and return its id.
    pub fn enqueue(&mut self, kind: OperationKind, path: &str, size: u64) -> Uuid {
        self.enqueue_operation(kind, path, size, None)
    }

    /// Queue a move of `original_path` to `path`.
    pub fn enqueue_move(&mut self, path: &str, original_path: &str, size: u64) -> Uuid {
        self.enqueue_operation(
            OperationKind::Move,
            path,
            size,
            Some(original_path.to_string()),
        )
    }

    fn enqueue_operation(
        &mut self,
        kind: OperationKind,
        path: &str,
        size: u64,
        original_path: Option<String>,
    ) -> Uuid {
        let operation = FileOperation {
            id: Uuid::new_v4(),
            path: path.to_string(),
            kind,
            size,
            priority: calculate_priority(kind, size, path),
            dependencies: dependencies_for(path),
            original_path,
            status: OperationStatus::Queued,
        };
        debug!(path, %kind, priority = operation.priority, "queued operation");

        if kind != OperationKind::Delete {
            self.tracker.add_total(size);
        }
        let id = operation.id;
        self.push(operation);
        id
    }

    fn push(&mut self, operation: FileOperation) {
        *self.queued_paths.entry(operation.path.clone()).or_insert(0) += 1;
        let seq = self.next_seq;
        self.next_seq += 1;
        self.queue.push(QueuedOperation { seq, operation });
    }

    fn unmark_queued(&mut self, path: &str) {
        if let Some(count) = self.queued_paths.get_mut(path) {
            *count -= 1;
            if *count == 0 {
                self.queued_paths.remove(path);
            }
        }
    }

    fn dependency_satisfied(&self, dependency: &str) -> bool {
        self.completed.contains(dependency)
            || (!self.queued_paths.contains_key(dependency)
                && !self.in_progress.contains_key(dependency))
    }

    /// Take the highest-priority operation whose dependencies are satisfied.
    ///
    /// Returns `None` when the queue is empty or every queued operation is
    /// blocked on a dependency that has not completed yet.
    pub fn dequeue(&mut self) -> Option<FileOperation> {
        let mut deferred = Vec::new();
        let mut ready = None;

        while let Some(entry) = self.queue.pop() {
            let mut operation = entry.operation;
            self.unmark_queued(&operation.path);

            let blocked = operation
                .dependencies
                .iter()
                .any(|dependency| !self.dependency_satisfied(dependency));
            if blocked {
                trace!(path = %operation.path, "dependencies pending, deferring");
                deferred.push(operation);
                continue;
            }

            operation.status = OperationStatus::InProgress;
            self.in_progress
                .insert(operation.path.clone(), operation.clone());
            ready = Some(operation);
            break;
        }

        for operation in deferred {
            // fresh snapshot, the popped entry is never mutated in place
            let snapshot = FileOperation {
                priority: operation.priority - REQUEUE_DECAY,
                ..operation
            };
            self.push(snapshot);
        }

        ready
    }

    /// Mark the in-progress operation on `path` as completed.
    ///
    /// Returns false if no operation on `path` was in progress.
    pub fn complete(&mut self, path: &str) -> bool {
        match self.in_progress.remove(path) {
            Some(mut operation) => {
                operation.status = OperationStatus::Completed;
                self.completed.insert(operation);
                true
            }
            None => false,
        }
    }

    pub fn is_completed(&self, path: &str) -> bool {
        self.completed.contains(path)
    }

    pub fn completed(&self) -> &CompletedLog {
        &self.completed
    }

    /// Number of queued operations.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn in_progress_count(&self) -> usize {
        self.in_progress.len()
    }

    /// Start the throughput clock.
    pub fn start(&mut self) {
        self.tracker.start();
    }

    pub fn tracker_mut(&mut self) -> &mut ThroughputTracker {
        &mut self.tracker
    }

    pub fn stats(&self) -> TransferStats {
        self.tracker.stats()
    }
}
