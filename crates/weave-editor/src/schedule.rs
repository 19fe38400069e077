//! Deferred tasks on a virtual clock.
//!
//! Background work (reorder passes, selection hydration, persistence
//! flushes) is queued here as plain data and executed by the store when the
//! host advances the clock. Nothing runs on its own, which keeps every
//! timing-dependent path deterministic.

use weave_core::{ElementId, Owner};

/// What a deferred task does when it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    /// Reconcile sibling order within one owner scope.
    Reorder(Owner),
    /// Replace the selected element's raw props with resolved props.
    HydrateSelection(ElementId),
    /// Drain the persistence outbox.
    FlushPersistence,
}

/// Identifies one scheduled task. Handles are never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskHandle(u64);

#[derive(Debug, Clone)]
struct Task {
    handle: TaskHandle,
    due_at: u64,
    kind: TaskKind,
}

#[derive(Debug, Default)]
pub struct Scheduler {
    now: u64,
    next_handle: u64,
    pending: Vec<Task>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current virtual time in milliseconds.
    pub fn now(&self) -> u64 {
        self.now
    }

    /// Queue `kind` to fire `delay_ms` from now.
    pub fn schedule(&mut self, kind: TaskKind, delay_ms: u64) -> TaskHandle {
        let handle = TaskHandle(self.next_handle);
        self.next_handle += 1;
        self.pending.push(Task {
            handle,
            due_at: self.now + delay_ms,
            kind,
        });
        log::debug!("schedule {kind:?} in {delay_ms}ms ({handle:?})");
        handle
    }

    /// Like [`Scheduler::schedule`], but first cancels any pending task of
    /// the same kind, so a burst collapses into one trailing run.
    pub fn debounce(&mut self, kind: TaskKind, delay_ms: u64) -> TaskHandle {
        self.pending.retain(|task| task.kind != kind);
        self.schedule(kind, delay_ms)
    }

    /// Queue `kind` unless an identical task is already pending.
    pub fn ensure(&mut self, kind: TaskKind, delay_ms: u64) -> TaskHandle {
        match self.pending.iter().find(|task| task.kind == kind) {
            Some(task) => task.handle,
            None => self.schedule(kind, delay_ms),
        }
    }

    /// Returns whether the task was still pending.
    pub fn cancel(&mut self, handle: TaskHandle) -> bool {
        let before = self.pending.len();
        self.pending.retain(|task| task.handle != handle);
        before != self.pending.len()
    }

    pub fn is_pending(&self, handle: TaskHandle) -> bool {
        self.pending.iter().any(|task| task.handle == handle)
    }

    pub fn has_pending(&self, kind: TaskKind) -> bool {
        self.pending.iter().any(|task| task.kind == kind)
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Move the clock forward without running anything.
    pub fn advance_clock(&mut self, ms: u64) {
        self.now += ms;
    }

    /// Pop the earliest task due at the current time, ordered by
    /// `(due time, handle)`.
    pub fn pop_due(&mut self) -> Option<(TaskHandle, TaskKind)> {
        let index = self
            .pending
            .iter()
            .enumerate()
            .filter(|(_, task)| task.due_at <= self.now)
            .min_by_key(|(_, task)| (task.due_at, task.handle))
            .map(|(i, _)| i)?;
        let task = self.pending.remove(index);
        Some((task.handle, task.kind))
    }

    /// Every task due now, in firing order, removed from the queue.
    pub fn due(&mut self) -> Vec<(TaskHandle, TaskKind)> {
        let mut out = Vec::new();
        while let Some(task) = self.pop_due() {
            out.push(task);
        }
        out
    }

    /// Time of the next pending task, if any.
    pub fn next_due_at(&self) -> Option<u64> {
        self.pending.iter().map(|task| task.due_at).min()
    }
}
