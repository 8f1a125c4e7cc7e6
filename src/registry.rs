//! Owns the volatile [`Task`] records and coordinates with the
//! [`Broadcaster`] to route frames to subscribers, including the attach-time
//! `connection` + `progress`/`waiting` snapshot and the idle-resend
//! liveness ping.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::broadcast;
use tokio::time::sleep;

use crate::broadcaster::Broadcaster;
use crate::domain::{FrameType, ProgressFrame, Task, TaskStatus};
use crate::errors::RegistryError;

struct TaskEntry {
    task: Task,
    cancel_flag: Arc<AtomicBool>,
    last_mutation: Instant,
    /// One-off phases invoked without a `session_id` are evicted
    /// immediately after their terminal frame rather than waiting out the
    /// standard grace period.
    ephemeral: bool,
}

pub struct TaskRegistry {
    tasks: Mutex<HashMap<String, TaskEntry>>,
    broadcaster: Broadcaster,
    eviction_grace: Duration,
}

impl TaskRegistry {
    pub fn new(eviction_grace: Duration) -> Arc<Self> {
        Arc::new(Self {
            tasks: Mutex::new(HashMap::new()),
            broadcaster: Broadcaster::new(),
            eviction_grace,
        })
    }

    /// Exactly one record per active `task_id`; fails if it already exists.
    pub fn create(
        &self,
        task_id: &str,
        session_id: Option<String>,
        ephemeral: bool,
    ) -> Result<Arc<AtomicBool>, RegistryError> {
        let mut tasks = self.tasks.lock().expect("task registry lock poisoned");
        if tasks.contains_key(task_id) {
            return Err(RegistryError::AlreadyExists(task_id.to_string()));
        }
        let cancel_flag = Arc::new(AtomicBool::new(false));
        tasks.insert(
            task_id.to_string(),
            TaskEntry {
                task: Task::new(task_id.to_string(), session_id),
                cancel_flag: cancel_flag.clone(),
                last_mutation: Instant::now(),
                ephemeral,
            },
        );
        Ok(cancel_flag)
    }

    pub fn get(&self, task_id: &str) -> Option<Task> {
        let tasks = self.tasks.lock().expect("task registry lock poisoned");
        tasks.get(task_id).map(|e| e.task.clone())
    }

    /// Applies `mutation` to the task atomically and publishes the
    /// resulting snapshot as a `progress` frame.
    pub fn update(
        &self,
        task_id: &str,
        mutation: impl FnOnce(&mut Task),
    ) -> Result<Task, RegistryError> {
        let snapshot = {
            let mut tasks = self.tasks.lock().expect("task registry lock poisoned");
            let entry = tasks
                .get_mut(task_id)
                .ok_or_else(|| RegistryError::NotFound(task_id.to_string()))?;
            mutation(&mut entry.task);
            entry.last_mutation = Instant::now();
            entry.task.clone()
        };
        self.broadcaster
            .publish(task_id, ProgressFrame::from_task(FrameType::Progress, &snapshot));
        Ok(snapshot)
    }

    /// Publishes a final frame for `status` then evicts the task after the
    /// configured grace period (immediately for ephemeral tasks).
    pub async fn terminate(self: &Arc<Self>, task_id: &str, status: TaskStatus) -> Result<(), RegistryError> {
        let (snapshot, ephemeral) = {
            let mut tasks = self.tasks.lock().expect("task registry lock poisoned");
            let entry = tasks
                .get_mut(task_id)
                .ok_or_else(|| RegistryError::NotFound(task_id.to_string()))?;
            entry.task.status = status;
            (entry.task.clone(), entry.ephemeral)
        };

        // A cancelled task must never publish `completed`. Failed tasks
        // publish `error`; cancelled tasks publish a `progress` frame
        // carrying `status = cancelled` (the only terminal-shaped frame
        // that doesn't risk being read as a successful completion).
        let frame = match status {
            TaskStatus::Completed => ProgressFrame::from_task(FrameType::Completed, &snapshot),
            TaskStatus::Failed => {
                let mut frame = ProgressFrame::from_task(FrameType::Error, &snapshot);
                frame.frame_type = FrameType::Error;
                frame
            }
            TaskStatus::Cancelled => ProgressFrame::from_task(FrameType::Progress, &snapshot),
            TaskStatus::Pending | TaskStatus::Running => {
                ProgressFrame::from_task(FrameType::Progress, &snapshot)
            }
        };
        self.broadcaster.publish(task_id, frame);

        let grace = if ephemeral { Duration::ZERO } else { self.eviction_grace };
        let registry = Arc::clone(self);
        let task_id = task_id.to_string();
        tokio::spawn(async move {
            sleep(grace).await;
            registry.evict(&task_id);
        });

        Ok(())
    }

    fn evict(&self, task_id: &str) {
        self.tasks.lock().expect("task registry lock poisoned").remove(task_id);
        self.broadcaster.remove(task_id);
    }

    /// Sets the cancellation flag; returns immediately without stopping the
    /// worker synchronously.
    pub fn cancel(&self, task_id: &str) -> Result<(), RegistryError> {
        let tasks = self.tasks.lock().expect("task registry lock poisoned");
        let entry = tasks
            .get(task_id)
            .ok_or_else(|| RegistryError::NotFound(task_id.to_string()))?;
        entry.cancel_flag.store(true, Ordering::SeqCst);
        Ok(())
    }

    pub fn cancel_flag(&self, task_id: &str) -> Option<Arc<AtomicBool>> {
        let tasks = self.tasks.lock().expect("task registry lock poisoned");
        tasks.get(task_id).map(|e| e.cancel_flag.clone())
    }

    /// Snapshots every currently tracked task, in no particular order.
    pub fn list(&self) -> Vec<Task> {
        let tasks = self.tasks.lock().expect("task registry lock poisoned");
        tasks.values().map(|e| e.task.clone()).collect()
    }

    /// Attaches a subscriber: returns the attach-time frames (`connection`
    /// then `progress`/`waiting`) plus a live receiver for everything
    /// published afterward.
    pub fn subscribe(&self, task_id: &str) -> (Vec<ProgressFrame>, broadcast::Receiver<ProgressFrame>) {
        let receiver = self.broadcaster.subscribe(task_id);
        let mut attach_frames = vec![ProgressFrame::connection(task_id)];
        match self.get(task_id) {
            Some(task) => attach_frames.push(ProgressFrame::from_task(FrameType::Progress, &task)),
            None => attach_frames.push(ProgressFrame::waiting(task_id)),
        }
        (attach_frames, receiver)
    }

    /// Background loop: re-emits the current snapshot for any task that
    /// hasn't mutated in `idle_interval`, so late-attaching or
    /// silently-dropped-connection clients still observe liveness.
    pub fn spawn_idle_resend_loop(self: &Arc<Self>, idle_interval: Duration) {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                sleep(idle_interval / 2).await;
                let stale: Vec<Task> = {
                    let tasks = registry.tasks.lock().expect("task registry lock poisoned");
                    tasks
                        .values()
                        .filter(|e| e.last_mutation.elapsed() >= idle_interval)
                        .map(|e| e.task.clone())
                        .collect()
                };
                for task in stale {
                    registry
                        .broadcaster
                        .publish(&task.task_id, ProgressFrame::from_task(FrameType::Progress, &task));
                }
            }
        });
    }
}
