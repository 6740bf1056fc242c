use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use serde::Serialize;
use tokio::sync::Notify;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    Idle,
    Busy,
}

/// FIFO of submission ids awaiting processing, plus the worker registry.
///
/// The queue is the sole dispatch point between the HTTP handlers and the
/// worker pool. Its content is recoverable from the store: every PENDING
/// submission is re-enqueued at startup, so an id that was enqueued is never
/// lost across restarts.
pub struct JobQueue {
    name: String,
    queue: Mutex<VecDeque<Uuid>>,
    notify: Notify,
    workers: Mutex<HashMap<String, WorkerState>>,
    failed: Mutex<Vec<Uuid>>,
}

impl JobQueue {
    pub fn new(name: String) -> Self {
        Self {
            name,
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            workers: Mutex::new(HashMap::new()),
            failed: Mutex::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn push(&self, id: Uuid) {
        self.queue.lock().unwrap().push_back(id);
        self.notify.notify_one();
    }

    pub async fn pop(&self) -> Uuid {
        loop {
            if let Some(id) = self.queue.lock().unwrap().pop_front() {
                return id;
            }
            self.notify.notified().await;
        }
    }

    /// Removes a still-queued id; returns whether it was present
    pub fn cancel(&self, id: Uuid) -> bool {
        let mut queue = self.queue.lock().unwrap();
        let before_len = queue.len();
        queue.retain(|queued| *queued != id);
        before_len != queue.len()
    }

    pub fn len(&self) -> usize {
        self.queue.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn register_worker(&self, name: &str) {
        self.workers
            .lock()
            .unwrap()
            .insert(name.to_string(), WorkerState::Idle);
    }

    pub fn unregister_worker(&self, name: &str) {
        self.workers.lock().unwrap().remove(name);
    }

    pub fn set_worker_state(&self, name: &str, state: WorkerState) {
        if let Some(entry) = self.workers.lock().unwrap().get_mut(name) {
            *entry = state;
        }
    }

    pub fn workers(&self) -> Vec<(String, WorkerState)> {
        let mut workers: Vec<(String, WorkerState)> = self
            .workers
            .lock()
            .unwrap()
            .iter()
            .map(|(name, state)| (name.clone(), *state))
            .collect();
        workers.sort_by(|a, b| a.0.cmp(&b.0));
        workers
    }

    /// Records a job the worker could not commit (crash mid-processing)
    pub fn mark_failed(&self, id: Uuid) {
        self.failed.lock().unwrap().push(id);
    }

    pub fn failed_count(&self) -> usize {
        self.failed.lock().unwrap().len()
    }
}
