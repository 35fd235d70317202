use crate::agent::{AgentLoop, LoopEvent, LoopObserver, LoopRequest, LoopResult};
use crate::error::TaskError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

pub const DEFAULT_RESULT_RETENTION: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Working,
    /// Reserved for loops that pause for external input. The loop never
    /// pauses today, so no task reaches this state.
    InputRequired,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        match self {
            Self::Working => next != Self::Working,
            Self::InputRequired => next != Self::InputRequired,
            Self::Completed | Self::Failed | Self::Cancelled => false,
        }
    }

    pub fn from_result(result: &LoopResult) -> Self {
        match result {
            LoopResult::Completed { .. } => Self::Completed,
            LoopResult::Cancelled { .. } => Self::Cancelled,
            _ => Self::Failed,
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Working => write!(f, "working"),
            Self::InputRequired => write!(f, "input_required"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskProgress {
    pub iterations: u32,
    pub tool_calls: u32,
    pub updated_at: DateTime<Utc>,
}

struct Shared {
    status: watch::Sender<TaskStatus>,
    progress: Mutex<TaskProgress>,
    result: Mutex<Option<LoopResult>>,
    expired: AtomicBool,
}

impl Shared {
    fn transition(&self, next: TaskStatus) -> bool {
        self.status.send_if_modified(|current| {
            if current.can_transition_to(next) {
                *current = next;
                true
            } else {
                false
            }
        })
    }

    fn progress(&self) -> MutexGuard<'_, TaskProgress> {
        self.progress.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn result(&self) -> MutexGuard<'_, Option<LoopResult>> {
        self.result.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Feeds loop events into the task's progress, then to the caller's observer.
struct ProgressObserver {
    shared: Arc<Shared>,
    inner: Option<Arc<dyn LoopObserver>>,
}

impl LoopObserver for ProgressObserver {
    fn on_event(&self, event: &LoopEvent) {
        {
            let mut progress = self.shared.progress();
            match event {
                LoopEvent::IterationStarted { iteration } => progress.iterations = *iteration,
                LoopEvent::ToolFinished { .. } | LoopEvent::ToolRejected { .. } => {
                    progress.tool_calls += 1
                }
                _ => {}
            }
            progress.updated_at = Utc::now();
        }
        if let Some(inner) = &self.inner {
            inner.on_event(event);
        }
    }
}

/// Handle to a loop running on its own tokio task.
///
/// The result is kept until [`await_result`](Self::await_result) takes it or
/// the retention period after completion elapses.
pub struct TaskHandle {
    id: Uuid,
    created_at: DateTime<Utc>,
    cancel: CancellationToken,
    shared: Arc<Shared>,
    status_rx: watch::Receiver<TaskStatus>,
    retention: Duration,
    join: JoinHandle<()>,
}

impl TaskHandle {
    pub fn spawn(agent_loop: AgentLoop, request: LoopRequest) -> Self {
        Self::spawn_with_retention(agent_loop, request, DEFAULT_RESULT_RETENTION)
    }

    pub fn spawn_with_retention(
        mut agent_loop: AgentLoop,
        request: LoopRequest,
        retention: Duration,
    ) -> Self {
        let id = Uuid::new_v4();
        let created_at = Utc::now();
        let (status_tx, status_rx) = watch::channel(TaskStatus::Working);
        let shared = Arc::new(Shared {
            status: status_tx,
            progress: Mutex::new(TaskProgress {
                iterations: 0,
                tool_calls: 0,
                updated_at: created_at,
            }),
            result: Mutex::new(None),
            expired: AtomicBool::new(false),
        });

        let observer = ProgressObserver {
            shared: shared.clone(),
            inner: agent_loop.take_observer(),
        };
        agent_loop = agent_loop.with_observer(Arc::new(observer));
        let cancel = agent_loop.cancellation_token();

        let task_shared = shared.clone();
        let join = tokio::spawn(async move {
            let result = agent_loop.run(request).await;
            let status = TaskStatus::from_result(&result);
            *task_shared.result() = Some(result);
            task_shared.transition(status);
            debug!(task = %id, %status, "Task finished");

            tokio::time::sleep(retention).await;
            if task_shared.result().take().is_some() {
                task_shared.expired.store(true, Ordering::SeqCst);
                debug!(task = %id, "Discarding unobserved task result");
            }
        });

        Self {
            id,
            created_at,
            cancel,
            shared,
            status_rx,
            retention,
            join,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn status(&self) -> TaskStatus {
        *self.status_rx.borrow()
    }

    pub fn progress(&self) -> TaskProgress {
        self.shared.progress().clone()
    }

    /// Requests cancellation. Returns `false` without effect once the task is terminal.
    pub fn cancel(&self) -> bool {
        if self.status().is_terminal() {
            return false;
        }
        self.cancel.cancel();
        true
    }

    /// Waits for the next status change and returns the new status.
    pub async fn wait_for_status_change(&mut self) -> TaskStatus {
        let _ = self.status_rx.changed().await;
        *self.status_rx.borrow_and_update()
    }

    pub async fn wait_until_terminal(&self) -> TaskStatus {
        let mut rx = self.status_rx.clone();
        let status = rx.wait_for(TaskStatus::is_terminal).await.map(|s| *s);
        status.unwrap_or_else(|_| *rx.borrow())
    }

    pub async fn await_result(mut self) -> Result<LoopResult, TaskError> {
        let mut rx = self.status_rx.clone();
        let mut join_finished = false;

        tokio::select! {
            _ = rx.wait_for(TaskStatus::is_terminal) => {}
            joined = &mut self.join => {
                join_finished = true;
                if let Err(e) = joined {
                    return Err(TaskError::Aborted(e.to_string()));
                }
            }
        }

        let taken = self.shared.result().take();
        if !join_finished {
            self.join.abort();
        }

        match taken {
            Some(result) => Ok(result),
            None if self.shared.expired.load(Ordering::SeqCst) => Err(TaskError::Expired {
                retention_ms: self.retention.as_millis() as u64,
            }),
            None => Err(TaskError::Aborted("task result missing".to_string())),
        }
    }
}
