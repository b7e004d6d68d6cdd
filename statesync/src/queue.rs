//! Chunk queue (C2): a fixed-size, per-snapshot reassembly buffer with
//! strictly ordered delivery. Grounded on the slot-state-machine style of
//! `near-chunks`'s `EncodedChunksCache`/`ChunkRequestInfo` bookkeeping
//! (`chain/chunks/src/shards_manager_actor.rs`), adapted from "parts owned by
//! validators" to "indexed chunk slots awaiting delivery".

use parking_lot::Mutex;
use statesync_primitives::{Chunk, ChunkIndex, Format, Height, PeerId};
use std::path::Path;
use tempfile::TempDir;
use thiserror::Error;
use tokio::sync::Notify;

#[derive(Error, Debug, PartialEq, Eq, Clone, Copy)]
pub enum QueueError {
    /// Sentinel returned by `Allocate`/`Next` when there is nothing left to
    /// hand out right now (queue closed, or fully drained).
    #[error("chunk queue is done")]
    Done,
    #[error("chunk does not belong to this snapshot")]
    Mismatch,
    #[error("chunk index {0} is out of range")]
    IndexOutOfRange(ChunkIndex),
}

#[derive(Clone, Debug)]
enum SlotState {
    Empty,
    Allocated(Option<PeerId>),
    Present { payload: Vec<u8>, sender: PeerId },
}

struct Inner {
    slots: Vec<SlotState>,
    next_index: ChunkIndex,
    closed: bool,
    temp_dir: Option<TempDir>,
}

/// One in-progress snapshot's chunk reassembly buffer. Shared between the
/// syncer (which drains it via `next`) and the fetcher pool (which fills it
/// via `allocate`/`add`), hence always held behind `Arc`.
pub struct ChunkQueue {
    pub height: Height,
    pub format: Format,
    pub chunk_count: u32,
    inner: Mutex<Inner>,
    notifies: Vec<Notify>,
}

impl ChunkQueue {
    pub fn new(height: Height, format: Format, chunk_count: u32, temp_root: &Path) -> Self {
        let temp_dir = tempfile::Builder::new()
            .prefix("statesync-chunks-")
            .tempdir_in(temp_root)
            .ok();
        let slots = (0..chunk_count).map(|_| SlotState::Empty).collect();
        let notifies = (0..chunk_count).map(|_| Notify::new()).collect();
        Self {
            height,
            format,
            chunk_count,
            inner: Mutex::new(Inner { slots, next_index: 0, closed: false, temp_dir }),
            notifies,
        }
    }

    /// Writes `chunk.payload` into its slot. Returns `false` on a duplicate
    /// delivery (slot already `present`) rather than an error.
    pub fn add(&self, chunk: Chunk) -> Result<bool, QueueError> {
        if !chunk.matches(self.height, self.format) {
            return Err(QueueError::Mismatch);
        }
        let index = chunk.index;
        if index >= self.chunk_count {
            return Err(QueueError::IndexOutOfRange(index));
        }
        let added = {
            let mut inner = self.inner.lock();
            let slot = &mut inner.slots[index as usize];
            match slot {
                SlotState::Present { .. } => false,
                SlotState::Empty | SlotState::Allocated(_) => {
                    *slot = SlotState::Present { payload: chunk.payload, sender: chunk.sender };
                    true
                }
            }
        };
        if added {
            self.notifies[index as usize].notify_waiters();
        }
        Ok(added)
    }

    /// Allocates the lowest index at or after the delivery cursor that is
    /// not yet claimed. `Err(Done)` means there is nothing allocatable right
    /// now (the caller should back off and retry, not treat it as final).
    pub fn allocate(&self) -> Result<ChunkIndex, QueueError> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(QueueError::Done);
        }
        let start = inner.next_index;
        for i in start..self.chunk_count {
            if matches!(inner.slots[i as usize], SlotState::Empty) {
                inner.slots[i as usize] = SlotState::Allocated(None);
                return Ok(i);
            }
        }
        Err(QueueError::Done)
    }

    /// Blocks until slot `next_index` becomes `present`, then advances the
    /// cursor and returns the chunk. `Err(Done)` once every slot has been
    /// delivered (or the queue is closed).
    pub async fn next(&self) -> Result<Chunk, QueueError> {
        loop {
            let index = {
                let inner = self.inner.lock();
                if inner.closed {
                    return Err(QueueError::Done);
                }
                if inner.next_index >= self.chunk_count {
                    return Err(QueueError::Done);
                }
                inner.next_index
            };
            let notified = self.notifies[index as usize].notified();
            tokio::pin!(notified);
            {
                let mut inner = self.inner.lock();
                if inner.closed {
                    return Err(QueueError::Done);
                }
                if let SlotState::Present { .. } = &inner.slots[index as usize] {
                    let slot = std::mem::replace(&mut inner.slots[index as usize], SlotState::Empty);
                    inner.next_index += 1;
                    if let SlotState::Present { payload, sender } = slot {
                        return Ok(Chunk { height: self.height, format: self.format, index, payload, sender });
                    }
                    unreachable!("matched Present above");
                }
            }
            notified.await;
        }
    }

    /// A one-shot readiness signal for slot `index`: resolves once that slot
    /// becomes `present`, or immediately if the queue is already closed.
    pub async fn wait_for(&self, index: ChunkIndex) {
        loop {
            let notified = self.notifies[index as usize].notified();
            tokio::pin!(notified);
            {
                let inner = self.inner.lock();
                if inner.closed || matches!(inner.slots[index as usize], SlotState::Present { .. }) {
                    return;
                }
            }
            notified.await;
        }
    }

    /// Resets slot `index` back to `empty`, rewinding the delivery cursor to
    /// `index` if it had already advanced past it. Used when the application
    /// responds `Retry` to a chunk it refuses to accept as-is, so the next
    /// `next()` call must redeliver that same index once refetched.
    pub fn retry(&self, index: ChunkIndex) {
        let mut inner = self.inner.lock();
        inner.slots[index as usize] = SlotState::Empty;
        if inner.next_index > index {
            inner.next_index = index;
        }
    }

    /// Resets every slot at or after the delivery cursor that is not yet
    /// `present` back to `empty`, preserving already-delivered payloads.
    /// Used when the application responds `RetrySnapshot`.
    pub fn retry_all(&self) {
        let mut inner = self.inner.lock();
        let start = inner.next_index;
        for i in start..self.chunk_count {
            let idx = i as usize;
            if !matches!(inner.slots[idx], SlotState::Present { .. }) {
                inner.slots[idx] = SlotState::Empty;
            }
        }
    }

    /// Forces index `index` to be re-fetched even if already `present`.
    /// Used when the application names it in a chunk-apply response's
    /// refetch hint.
    pub fn discard(&self, index: ChunkIndex) {
        let mut inner = self.inner.lock();
        inner.slots[index as usize] = SlotState::Empty;
    }

    /// Discards every slot whose delivered payload came from `peer`. Used
    /// when the application flags `peer` as a sender to reject.
    pub fn discard_sender(&self, peer: &PeerId) {
        let mut inner = self.inner.lock();
        for slot in inner.slots.iter_mut() {
            if let SlotState::Present { sender, .. } = slot {
                if sender == peer {
                    *slot = SlotState::Empty;
                }
            }
        }
    }

    /// Releases all staged payloads and the scoped temp directory, and wakes
    /// every waiter with `Done`. Idempotent.
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        if inner.closed {
            return;
        }
        inner.closed = true;
        for slot in inner.slots.iter_mut() {
            *slot = SlotState::Empty;
        }
        inner.temp_dir = None;
        drop(inner);
        for notify in &self.notifies {
            notify.notify_waiters();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Path of the scoped staging directory, if it still exists (for tests
    /// asserting no leaked temp files after `close()`).
    #[cfg(test)]
    fn temp_dir_path(&self) -> Option<std::path::PathBuf> {
        self.inner.lock().temp_dir.as_ref().map(|d| d.path().to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use statesync_primitives::PeerId;

    fn chunk(index: ChunkIndex, payload: &str) -> Chunk {
        Chunk { height: 100, format: 1, index, payload: payload.as_bytes().to_vec(), sender: PeerId::from("p1") }
    }

    #[tokio::test]
    async fn delivers_strictly_in_order_regardless_of_arrival_order() {
        let dir = tempfile::tempdir().unwrap();
        let q = ChunkQueue::new(100, 1, 3, dir.path());
        q.add(chunk(2, "c")).unwrap();
        q.add(chunk(0, "a")).unwrap();
        q.add(chunk(1, "b")).unwrap();

        let c0 = q.next().await.unwrap();
        let c1 = q.next().await.unwrap();
        let c2 = q.next().await.unwrap();
        assert_eq!(c0.index, 0);
        assert_eq!(c1.index, 1);
        assert_eq!(c2.index, 2);
        assert_eq!(q.next().await.unwrap_err(), QueueError::Done);
    }

    #[tokio::test]
    async fn duplicate_add_returns_false_without_altering_queue() {
        let dir = tempfile::tempdir().unwrap();
        let q = ChunkQueue::new(100, 1, 1, dir.path());
        assert!(q.add(chunk(0, "a")).unwrap());
        assert!(!q.add(chunk(0, "b")).unwrap());
        let c = q.next().await.unwrap();
        assert_eq!(c.payload, b"a");
    }

    #[test]
    fn mismatched_and_out_of_range_chunks_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let q = ChunkQueue::new(100, 1, 2, dir.path());
        let mut wrong_height = chunk(0, "a");
        wrong_height.height = 99;
        assert_eq!(q.add(wrong_height).unwrap_err(), QueueError::Mismatch);
        assert_eq!(q.add(chunk(5, "a")).unwrap_err(), QueueError::IndexOutOfRange(5));
    }

    #[test]
    fn allocate_skips_delivered_region_and_reports_done_when_exhausted() {
        let dir = tempfile::tempdir().unwrap();
        let q = ChunkQueue::new(100, 1, 2, dir.path());
        assert_eq!(q.allocate().unwrap(), 0);
        assert_eq!(q.allocate().unwrap(), 1);
        assert_eq!(q.allocate().unwrap_err(), QueueError::Done);
    }

    #[tokio::test]
    async fn retry_rewinds_cursor_so_next_redelivers_same_index() {
        let dir = tempfile::tempdir().unwrap();
        let q = ChunkQueue::new(100, 1, 2, dir.path());
        q.add(chunk(0, "a")).unwrap();
        q.add(chunk(1, "b")).unwrap();
        let c0 = q.next().await.unwrap();
        assert_eq!(c0.index, 0);

        q.retry(0);
        assert_eq!(q.allocate().unwrap(), 0);
        q.add(chunk(0, "a2")).unwrap();
        let redelivered = q.next().await.unwrap();
        assert_eq!(redelivered.index, 0);
        assert_eq!(redelivered.payload, b"a2");
    }

    #[tokio::test]
    async fn retry_all_preserves_already_present_slots() {
        let dir = tempfile::tempdir().unwrap();
        let q = ChunkQueue::new(100, 1, 3, dir.path());
        q.add(chunk(0, "a")).unwrap();
        let _ = q.next().await.unwrap();
        q.add(chunk(1, "b")).unwrap();
        q.allocate().unwrap(); // claims slot 2

        q.retry_all();
        // slot 1 stays present
        let c1 = q.next().await.unwrap();
        assert_eq!(c1.index, 1);
        assert_eq!(c1.payload, b"b");
        // slot 2 was reset and is allocatable again
        assert_eq!(q.allocate().unwrap(), 2);
    }

    #[test]
    fn close_is_idempotent_and_removes_temp_dir() {
        let dir = tempfile::tempdir().unwrap();
        let q = ChunkQueue::new(100, 1, 1, dir.path());
        let temp_path = q.temp_dir_path().unwrap();
        assert!(temp_path.exists());
        q.close();
        assert!(!temp_path.exists());
        q.close(); // no panic
        assert!(q.is_closed());
    }

    #[tokio::test]
    async fn close_unblocks_waiters_with_done() {
        let dir = tempfile::tempdir().unwrap();
        let q = std::sync::Arc::new(ChunkQueue::new(100, 1, 1, dir.path()));
        let q2 = q.clone();
        let waiter = tokio::spawn(async move { q2.next().await });
        tokio::task::yield_now().await;
        q.close();
        let result = waiter.await.unwrap();
        assert_eq!(result.unwrap_err(), QueueError::Done);
    }
}
