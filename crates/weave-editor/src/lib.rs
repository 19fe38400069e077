//! Stateful editing session over the element graph.
//!
//! [`ElementGraphStore`] is the only writer of the graph. Everything with a
//! side effect lives here: history, selection, deferred tasks and
//! persistence.

pub mod config;
pub mod history;
pub mod persist;
pub mod schedule;
pub mod selection;
pub mod store;

pub use config::StoreConfig;
pub use history::{HistoryEntry, HistoryKind, HistoryManager, HistoryStep};
pub use persist::{
    MemoryRowBackend, MessagePackStore, Notification, PersistError, PersistOp, PersistOutcome,
    PersistTarget, Persistence, PersistenceAdapter, PersistenceResult, RemoteAdapter, RowBackend,
    SkipReason,
};
pub use schedule::{Scheduler, TaskHandle, TaskKind};
pub use selection::SelectionState;
pub use store::{ElementGraphStore, StoreError};
