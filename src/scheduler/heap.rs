use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use chrono::{DateTime, Utc};

use crate::job::{Job, JobId};
use crate::scheduler::deferred::DeferredJob;

/// Payload scheduled on the system-job heap: either a real job row or a
/// placeholder retrying a not-yet-visible one.
#[derive(Debug)]
pub enum SystemEntry {
    Job(Job),
    Deferred(DeferredJob),
}

impl SystemEntry {
    pub fn job_id(&self) -> JobId {
        match self {
            SystemEntry::Job(job) => job.id,
            SystemEntry::Deferred(deferred) => deferred.job_id,
        }
    }
}

#[derive(Debug)]
pub struct HeapEntry {
    pub wakeup: DateTime<Utc>,
    pub job_id: JobId,
    pub payload: SystemEntry,
}

// Ordering is defined over (wakeup, job_id) only; the payload is never
// compared. Job ids are unique, so the order is total.
impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.wakeup == other.wakeup && self.job_id == other.job_id
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.wakeup, self.job_id).cmp(&(other.wakeup, other.job_id))
    }
}

/// Min-heap of system jobs keyed by next-wakeup time.
#[derive(Default)]
pub struct SystemHeap {
    entries: BinaryHeap<Reverse<HeapEntry>>,
}

impl SystemHeap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, wakeup: DateTime<Utc>, payload: SystemEntry) {
        self.entries.push(Reverse(HeapEntry {
            wakeup,
            job_id: payload.job_id(),
            payload,
        }));
    }

    /// Earliest entry, if any.
    pub fn peek(&self) -> Option<&HeapEntry> {
        self.entries.peek().map(|Reverse(entry)| entry)
    }

    pub fn pop(&mut self) -> Option<HeapEntry> {
        self.entries.pop().map(|Reverse(entry)| entry)
    }

    /// Remove the scheduled *job* entry with the given id, if present.
    /// Deferred placeholders are deliberately not matched: a REFRESH for a
    /// job still in the deferred state is reported as "not scheduled".
    /// Linear scan; periodic-job counts are small.
    pub fn remove_job(&mut self, job_id: JobId) -> Option<Job> {
        let mut entries: Vec<Reverse<HeapEntry>> = std::mem::take(&mut self.entries).into_vec();
        let pos = entries.iter().position(
            |Reverse(e)| matches!(&e.payload, SystemEntry::Job(job) if job.id == job_id),
        );
        let removed = pos.map(|i| entries.swap_remove(i));
        self.entries = entries.into();
        removed.map(|Reverse(entry)| match entry.payload {
            SystemEntry::Job(job) => job,
            SystemEntry::Deferred(_) => unreachable!("position matched a job entry"),
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
