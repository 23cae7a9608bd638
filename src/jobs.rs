//! Retryable replica-write jobs.
//!
//! A write that fails on one replica while succeeding on another is not an
//! error for the caller; it becomes a [`WriteJob`] handed to the job
//! scheduler, which re-applies it with bounded retries and backoff. Every
//! retried operation is naturally idempotent (see the shard module), so
//! re-application is always safe. Jobs are JSON-encoded with base64 entry
//! payloads; the external journaled schedulers are out of scope, only the
//! contract and the in-memory development scheduler live here.

use std::{
    collections::{HashMap, VecDeque},
    sync::Mutex,
    time::Duration,
};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::entry::Entry;

/// Scheduler parameters for one job queue.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct JobPolicy {
    /// Failed attempts after which a job is diverted to the bad-jobs log.
    pub error_limit: usize,
    /// Delay before a failed job is retried.
    pub error_retry_delay: Duration,
}

impl JobPolicy {
    /// Default value for the [`Self::error_limit`] parameter.
    pub const DEFAULT_ERROR_LIMIT: usize = 25;

    /// Queue parameters for replica-write retries.
    #[must_use]
    pub fn writes() -> Self {
        Self {
            error_limit: Self::DEFAULT_ERROR_LIMIT,
            error_retry_delay: Duration::from_secs(60),
        }
    }

    /// Queue parameters for copy and migration jobs, which back off much
    /// longer between attempts.
    #[must_use]
    pub fn copies() -> Self {
        Self {
            error_limit: Self::DEFAULT_ERROR_LIMIT,
            error_retry_delay: Duration::from_secs(900),
        }
    }
}

impl Default for JobPolicy {
    fn default() -> Self {
        Self::writes()
    }
}

/// One retryable write against one replica, keyed by timeline, operation,
/// and entry.
#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum WriteJob {
    Push {
        replica: String,
        timeline: String,
        #[serde(with = "entry_data")]
        entry: Vec<u8>,
    },
    Pop {
        replica: String,
        timeline: String,
        #[serde(with = "entry_data")]
        entry: Vec<u8>,
    },
    PushAfter {
        replica: String,
        timeline: String,
        #[serde(with = "entry_data")]
        after: Vec<u8>,
        #[serde(with = "entry_data")]
        entry: Vec<u8>,
    },
    Delete {
        replica: String,
        timeline: String,
    },
}

impl WriteJob {
    #[must_use]
    pub fn push(replica: &str, timeline: &str, entry: &Entry) -> Self {
        Self::Push {
            replica: replica.to_owned(),
            timeline: timeline.to_owned(),
            entry: entry.as_bytes().to_vec(),
        }
    }

    #[must_use]
    pub fn pop(replica: &str, timeline: &str, entry: &Entry) -> Self {
        Self::Pop {
            replica: replica.to_owned(),
            timeline: timeline.to_owned(),
            entry: entry.as_bytes().to_vec(),
        }
    }

    #[must_use]
    pub fn push_after(replica: &str, timeline: &str, after: &Entry, entry: &Entry) -> Self {
        Self::PushAfter {
            replica: replica.to_owned(),
            timeline: timeline.to_owned(),
            after: after.as_bytes().to_vec(),
            entry: entry.as_bytes().to_vec(),
        }
    }

    #[must_use]
    pub fn delete(replica: &str, timeline: &str) -> Self {
        Self::Delete {
            replica: replica.to_owned(),
            timeline: timeline.to_owned(),
        }
    }

    /// The replica host this job targets.
    #[must_use]
    pub fn replica(&self) -> &str {
        match self {
            Self::Push { replica, .. }
            | Self::Pop { replica, .. }
            | Self::PushAfter { replica, .. }
            | Self::Delete { replica, .. } => replica,
        }
    }

    /// The wire form handed to the scheduler.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(data: &str) -> serde_json::Result<Self> {
        serde_json::from_str(data)
    }
}

/// The scheduler contract: accept a job for later re-application. Must not
/// block; fan-out calls it on the write path.
pub trait JobQueue: Send + Sync {
    fn enqueue(&self, job: WriteJob);
}

/// Discards every job. For deployments without replication there is
/// nothing to retry against.
#[derive(Clone, Copy, Debug, Default)]
pub struct DiscardJobQueue;

impl JobQueue for DiscardJobQueue {
    fn enqueue(&self, _job: WriteJob) {}
}

#[derive(Debug, Default)]
struct QueueState {
    queue: VecDeque<WriteJob>,
    errors: HashMap<WriteJob, usize>,
    bad: Vec<WriteJob>,
}

/// In-memory scheduler used in development and tests.
///
/// Jobs are popped by an external worker loop; a failed attempt goes back
/// through [`Self::retry`], which re-queues it until the error limit is
/// exhausted and then diverts it to the bad-jobs log.
#[derive(Debug)]
pub struct MemoryJobQueue {
    name: String,
    policy: JobPolicy,
    state: Mutex<QueueState>,
}

impl MemoryJobQueue {
    #[must_use]
    pub fn new(name: impl Into<String>, policy: JobPolicy) -> Self {
        Self {
            name: name.into(),
            policy,
            state: Mutex::new(QueueState::default()),
        }
    }

    pub fn pop(&self) -> Option<WriteJob> {
        self.state.lock().expect("queue lock poisoned").queue.pop_front()
    }

    /// Report a failed attempt. The job re-queues until its error count
    /// reaches the limit, then lands in the bad-jobs log. Bad jobs never
    /// halt the service.
    pub fn retry(&self, job: WriteJob) {
        let mut state = self.state.lock().expect("queue lock poisoned");
        let errors = state.errors.entry(job.clone()).or_insert(0);
        *errors += 1;
        if *errors >= self.policy.error_limit {
            warn!(
                target: "bad_jobs",
                queue = %self.name,
                job = ?job,
                "retries exhausted, diverting job",
            );
            state.errors.remove(&job);
            state.bad.push(job);
        } else {
            state.queue.push_back(job);
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().expect("queue lock poisoned").queue.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Jobs that exhausted their retries.
    #[must_use]
    pub fn bad_jobs(&self) -> Vec<WriteJob> {
        self.state.lock().expect("queue lock poisoned").bad.clone()
    }
}

impl JobQueue for MemoryJobQueue {
    fn enqueue(&self, job: WriteJob) {
        self.state
            .lock()
            .expect("queue lock poisoned")
            .queue
            .push_back(job);
    }
}

mod entry_data {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&base64::encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<u8>, D::Error> {
        base64::decode(String::deserialize(de)?).map_err(Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::{JobPolicy, MemoryJobQueue, WriteJob};
    use crate::entry::Entry;

    #[test]
    fn jobs_encode_as_tagged_json() {
        let job = WriteJob::push("replica-1", "home:42", &Entry::from("e1"));
        let json = job.to_json().unwrap();
        assert_eq!(
            json,
            r#"{"op":"push","replica":"replica-1","timeline":"home:42","entry":"ZTE="}"#
        );
        assert_eq!(WriteJob::from_json(&json).unwrap(), job);
    }

    #[test]
    fn exhausted_jobs_divert_to_bad_log() {
        let queue = MemoryJobQueue::new(
            "write",
            JobPolicy {
                error_limit: 2,
                ..JobPolicy::writes()
            },
        );
        let job = WriteJob::delete("replica-1", "home:42");

        queue.retry(job.clone());
        assert_eq!(queue.pop(), Some(job.clone()));
        assert!(queue.bad_jobs().is_empty());

        queue.retry(job.clone());
        assert!(queue.pop().is_none());
        assert_eq!(queue.bad_jobs(), vec![job]);
    }
}
