//! In-memory roster of the current user's threads.

use super::model::{Message, Thread, ThreadId, ThreadSummary};

/// Ordered roster of threads, replaced wholesale on every successful load.
#[derive(Debug, Default)]
pub struct SessionStore {
    threads: Vec<Thread>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole roster.  Callers only reach this with a fully
    /// decoded listing, so a failed load never leaves a partial roster.
    pub fn replace(&mut self, threads: Vec<Thread>) {
        self.threads = threads;
    }

    /// Insert or overwrite a single thread, keeping its roster position.
    pub fn upsert(&mut self, thread: Thread) {
        match self.threads.iter_mut().find(|t| t.id == thread.id) {
            Some(slot) => *slot = thread,
            None => self.threads.push(thread),
        }
    }

    /// Exact identifier match.
    pub fn get(&self, id: &ThreadId) -> Option<&Thread> {
        self.threads.iter().find(|t| &t.id == id)
    }

    pub fn first(&self) -> Option<&Thread> {
        self.threads.first()
    }

    pub fn summaries(&self) -> Vec<ThreadSummary> {
        self.threads.iter().map(Thread::summary).collect()
    }

    pub fn len(&self) -> usize {
        self.threads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.threads.is_empty()
    }

    pub(crate) fn messages_mut(&mut self, id: &ThreadId) -> Option<&mut Vec<Message>> {
        self.threads
            .iter_mut()
            .find(|t| &t.id == id)
            .map(|t| &mut t.messages)
    }
}
