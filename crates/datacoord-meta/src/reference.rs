use std::collections::{HashMap, HashSet};

use datacoord_core::{CoreError, CoreResult, LockTaskId, NodeId, SegmentId, SegmentLockChecker};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Segments pinned by one external task running on a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentReferenceLock {
    pub task_id: LockTaskId,
    pub node_id: NodeId,
    pub segment_ids: Vec<SegmentId>,
}

#[derive(Default)]
struct References {
    /// Lock per task.
    locks: HashMap<LockTaskId, SegmentReferenceLock>,
    /// Number of tasks referencing each segment.
    refer_count: HashMap<SegmentId, usize>,
}

impl References {
    fn remove_task(&mut self, task_id: LockTaskId) -> Option<SegmentReferenceLock> {
        let lock = self.locks.remove(&task_id)?;
        for segment_id in &lock.segment_ids {
            if let Some(count) = self.refer_count.get_mut(segment_id) {
                *count -= 1;
                if *count == 0 {
                    self.refer_count.remove(segment_id);
                }
            }
        }
        Some(lock)
    }
}

/// Tracks segments that external readers (queries, index builds) still
/// depend on. A referenced segment must not be compacted away.
#[derive(Default)]
pub struct SegmentReferenceManager {
    inner: RwLock<References>,
}

impl SegmentReferenceManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pins `segment_ids` on behalf of `task_id`.
    ///
    /// # Errors
    ///
    /// Fails if the task already holds a lock; release it first.
    pub fn add_segments_lock(
        &self,
        task_id: LockTaskId,
        node_id: NodeId,
        segment_ids: &[SegmentId],
    ) -> CoreResult<()> {
        let mut inner = self.inner.write();
        if inner.locks.contains_key(&task_id) {
            return Err(CoreError::already_exists("segment lock", task_id));
        }

        let unique: HashSet<SegmentId> = segment_ids.iter().copied().collect();
        for segment_id in &unique {
            *inner.refer_count.entry(*segment_id).or_insert(0) += 1;
        }
        inner.locks.insert(
            task_id,
            SegmentReferenceLock {
                task_id,
                node_id,
                segment_ids: unique.into_iter().collect(),
            },
        );
        info!(task_id = %task_id, node_id = %node_id, segments = segment_ids.len(), "Added segment lock");
        Ok(())
    }

    /// Releases the lock held by `task_id`. Releasing an unknown task is a no-op.
    pub fn release_segments_lock(&self, task_id: LockTaskId, node_id: NodeId) {
        let mut inner = self.inner.write();
        match inner.locks.get(&task_id) {
            None => {
                warn!(task_id = %task_id, "Segment lock to release does not exist");
            }
            Some(lock) if lock.node_id != node_id => {
                warn!(
                    task_id = %task_id,
                    node_id = %node_id,
                    owner = %lock.node_id,
                    "Segment lock is owned by another node"
                );
            }
            Some(_) => {
                inner.remove_task(task_id);
                info!(task_id = %task_id, node_id = %node_id, "Released segment lock");
            }
        }
    }

    /// Releases every lock held by tasks on `node_id`. Returns the count released.
    pub fn release_segments_lock_by_node(&self, node_id: NodeId) -> usize {
        let mut inner = self.inner.write();
        let tasks: Vec<LockTaskId> = inner
            .locks
            .values()
            .filter(|l| l.node_id == node_id)
            .map(|l| l.task_id)
            .collect();
        for task_id in &tasks {
            inner.remove_task(*task_id);
        }
        if !tasks.is_empty() {
            info!(node_id = %node_id, released = tasks.len(), "Released segment locks of node");
        }
        tasks.len()
    }

    /// Drops locks held by nodes that are no longer online.
    pub fn recover(&self, online_nodes: &[NodeId]) -> usize {
        let online: HashSet<NodeId> = online_nodes.iter().copied().collect();
        let offline: HashSet<NodeId> = self
            .inner
            .read()
            .locks
            .values()
            .map(|l| l.node_id)
            .filter(|n| !online.contains(n))
            .collect();

        offline
            .into_iter()
            .map(|node_id| self.release_segments_lock_by_node(node_id))
            .sum()
    }

    /// Snapshot of the lock held by `task_id`.
    pub fn get_lock(&self, task_id: LockTaskId) -> Option<SegmentReferenceLock> {
        self.inner.read().locks.get(&task_id).cloned()
    }
}

impl SegmentLockChecker for SegmentReferenceManager {
    fn has_segment_lock(&self, segment_id: SegmentId) -> bool {
        self.inner.read().refer_count.contains_key(&segment_id)
    }
}
