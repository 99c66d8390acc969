//! C5 — the abstract at-least-once work queue contract, plus two concrete
//! implementations: an in-process queue (suitable for a single-instance
//! deployment or as a building block) and the file-backed substitute tests
//! use in place of a cloud queue driver (§9, §10.4).
//!
//! Grounded on `chem-core`'s `EventStore` trait (`event/store.rs`): a small
//! trait plus an in-memory implementation behind a mutex.

use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use stairway_core::{CancellationToken, EngineError, EngineResult};

/// The engine's dependency on a shared message bus. `dispatch_messages`
/// must stop early and propagate cancellation rather than run its full
/// budget once `cancel` fires (§4.5, §5).
pub trait WorkQueue: Send + Sync {
    /// Blocking durable enqueue. Fails with `QueueError` if durable enqueue
    /// cannot be confirmed.
    fn enqueue_message(&self, text: &str) -> EngineResult<()>;

    /// Pull up to `max_n` messages; call `handler(text)` for each. On
    /// `true` the message is acknowledged (removed); on `false` it is left
    /// for redelivery. Returns the number of messages offered to the
    /// handler (not just acked). Stops early if `cancel` is signalled.
    fn dispatch_messages(
        &self,
        max_n: usize,
        cancel: &dyn CancellationToken,
        handler: &mut dyn FnMut(&str) -> bool,
    ) -> EngineResult<usize>;

    /// Drain all messages without processing them (test support only).
    fn purge_queue_for_testing(&self);
}

/// An in-process FIFO queue. Durable only for the lifetime of the process;
/// useful as the default when no cluster-wide queue is configured, and as
/// the simplest correct implementation to test the engine's C5 contract
/// against.
#[derive(Default)]
pub struct InMemoryWorkQueue {
    messages: Mutex<VecDeque<String>>,
}

impl InMemoryWorkQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

impl WorkQueue for InMemoryWorkQueue {
    fn enqueue_message(&self, text: &str) -> EngineResult<()> {
        let mut q = self.messages.lock().map_err(|_| EngineError::QueueError("queue lock poisoned".into()))?;
        q.push_back(text.to_string());
        Ok(())
    }

    fn dispatch_messages(
        &self,
        max_n: usize,
        cancel: &dyn CancellationToken,
        handler: &mut dyn FnMut(&str) -> bool,
    ) -> EngineResult<usize> {
        let mut offered = 0;
        for _ in 0..max_n {
            if cancel.is_cancelled() {
                break;
            }
            let maybe_msg = {
                let mut q = self.messages.lock().map_err(|_| EngineError::QueueError("queue lock poisoned".into()))?;
                q.pop_front()
            };
            let Some(msg) = maybe_msg else { break };
            offered += 1;
            let ack = handler(&msg);
            if !ack {
                let mut q = self.messages.lock().map_err(|_| EngineError::QueueError("queue lock poisoned".into()))?;
                q.push_back(msg);
            }
        }
        Ok(offered)
    }

    fn purge_queue_for_testing(&self) {
        if let Ok(mut q) = self.messages.lock() {
            q.clear();
        }
    }
}

/// Test substitute for a cloud queue driver: `dispatchMessages` scans a
/// directory of one-file-per-message (§9 "tests may substitute a
/// file-backed queue whose dispatchMessages scans a directory").
pub struct FileBackedWorkQueue {
    dir: PathBuf,
}

impl FileBackedWorkQueue {
    pub fn new(dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn message_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    fn list_message_files(&self) -> EngineResult<Vec<PathBuf>> {
        let mut entries: Vec<PathBuf> = fs::read_dir(&self.dir)
            .map_err(|e| EngineError::QueueError(e.to_string()))?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|p| p.extension().map(|ext| ext == "json").unwrap_or(false))
            .collect();
        entries.sort();
        Ok(entries)
    }
}

impl WorkQueue for FileBackedWorkQueue {
    fn enqueue_message(&self, text: &str) -> EngineResult<()> {
        let id = uuid::Uuid::new_v4().to_string();
        let tmp_path = self.message_path(&format!("{id}.tmp"));
        let final_path = self.message_path(&id);
        fs::write(&tmp_path, text).map_err(|e| EngineError::QueueError(e.to_string()))?;
        fs::rename(&tmp_path, &final_path).map_err(|e| EngineError::QueueError(e.to_string()))?;
        Ok(())
    }

    fn dispatch_messages(
        &self,
        max_n: usize,
        cancel: &dyn CancellationToken,
        handler: &mut dyn FnMut(&str) -> bool,
    ) -> EngineResult<usize> {
        let files = self.list_message_files()?;
        let mut offered = 0;
        for path in files.into_iter().take(max_n) {
            if cancel.is_cancelled() {
                break;
            }
            let Ok(text) = fs::read_to_string(&path) else { continue };
            offered += 1;
            if handler(&text) {
                let _ = fs::remove_file(&path);
            }
        }
        Ok(offered)
    }

    fn purge_queue_for_testing(&self) {
        if let Ok(files) = self.list_message_files() {
            for path in files {
                let _ = fs::remove_file(path);
            }
        }
    }
}

impl AsRef<Path> for FileBackedWorkQueue {
    fn as_ref(&self) -> &Path {
        &self.dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stairway_core::NeverCancelled;

    #[test]
    fn in_memory_at_least_once_nack_redelivers() {
        let q = InMemoryWorkQueue::new();
        q.enqueue_message("msg-1").unwrap();
        let mut seen = Vec::new();
        q.dispatch_messages(1, &NeverCancelled, &mut |m| {
            seen.push(m.to_string());
            false
        })
        .unwrap();
        assert_eq!(seen, vec!["msg-1".to_string()]);
        let mut seen2 = Vec::new();
        q.dispatch_messages(1, &NeverCancelled, &mut |m| {
            seen2.push(m.to_string());
            true
        })
        .unwrap();
        assert_eq!(seen2, vec!["msg-1".to_string()]);
        let mut seen3 = Vec::new();
        q.dispatch_messages(1, &NeverCancelled, &mut |m| {
            seen3.push(m.to_string());
            true
        })
        .unwrap();
        assert!(seen3.is_empty());
    }

    #[test]
    fn file_backed_round_trips_and_purges() {
        let tmp = tempfile::tempdir().unwrap();
        let q = FileBackedWorkQueue::new(tmp.path()).unwrap();
        q.enqueue_message("hello").unwrap();
        let mut got = Vec::new();
        q.dispatch_messages(10, &NeverCancelled, &mut |m| {
            got.push(m.to_string());
            true
        })
        .unwrap();
        assert_eq!(got, vec!["hello".to_string()]);

        q.enqueue_message("a").unwrap();
        q.enqueue_message("b").unwrap();
        q.purge_queue_for_testing();
        let mut got2 = Vec::new();
        q.dispatch_messages(10, &NeverCancelled, &mut |m| {
            got2.push(m.to_string());
            true
        })
        .unwrap();
        assert!(got2.is_empty());
    }
}
