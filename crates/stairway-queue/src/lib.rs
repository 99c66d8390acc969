//! C5 — the work queue interface and its in-memory / file-backed
//! implementations.

pub mod envelope;
pub mod queue;

pub use envelope::{MessageKind, QueueMessage, ENVELOPE_VERSION};
pub use queue::{FileBackedWorkQueue, InMemoryWorkQueue, WorkQueue};
