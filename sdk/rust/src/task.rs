//! Asynchronous routine tasks.
//!
//! A started task is polled until it reaches a terminal state. Polling is
//! pull based: [`TaskWatcher::next`] issues at most one status request per
//! call and a consumer cancels simply by no longer calling it.
//!
//! ```no_run
//! # async fn demo(task: mrs_sdk::Task) -> mrs_sdk::MrsResult<()> {
//! use mrs_sdk::TaskOptions;
//! use std::time::Duration;
//!
//! let options = TaskOptions::new()
//!     .refresh_rate(Duration::from_secs(1))?
//!     .timeout(Duration::from_secs(30));
//! let mut watcher = task.watch(options);
//! while let Some(snapshot) = watcher.next().await {
//!     println!("{:?}", snapshot?.status);
//! }
//! # Ok(())
//! # }
//! ```

use crate::error::{ErrorCode, MrsError, MrsResult};
use crate::gateway::{FetchOptions, Gateway};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Poll interval used when none is configured.
pub const DEFAULT_REFRESH_RATE: Duration = Duration::from_millis(2000);

/// Smallest accepted poll interval.
pub const MIN_REFRESH_RATE: Duration = Duration::from_millis(500);

const TIMEOUT_MESSAGE: &str = "Task execution has reached the specified timeout";

/// Lifecycle state of a task. `Timeout` is produced by the client only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Scheduled,
    Running,
    Completed,
    Cancelled,
    Error,
    Timeout,
}

impl TaskStatus {
    /// Whether the server is done with the task.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Error)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Scheduled => "SCHEDULED",
            Self::Running => "RUNNING",
            Self::Completed => "COMPLETED",
            Self::Cancelled => "CANCELLED",
            Self::Error => "ERROR",
            Self::Timeout => "TIMEOUT",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One status report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl TaskSnapshot {
    /// The synthetic report emitted once the watch timeout has elapsed.
    pub fn timeout() -> Self {
        Self {
            status: TaskStatus::Timeout,
            message: Some(TIMEOUT_MESSAGE.to_string()),
            progress: None,
            data: None,
        }
    }

    fn message_or_empty(&self) -> String {
        self.message.clone().unwrap_or_default()
    }
}

/// Called with every non-terminal report.
pub type ProgressCallback = Arc<dyn Fn(&TaskSnapshot) + Send + Sync>;

/// Polling options.
#[derive(Clone)]
pub struct TaskOptions {
    refresh_rate: Duration,
    timeout: Option<Duration>,
    progress: Option<ProgressCallback>,
}

impl fmt::Debug for TaskOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskOptions")
            .field("refresh_rate", &self.refresh_rate)
            .field("timeout", &self.timeout)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

impl Default for TaskOptions {
    fn default() -> Self {
        Self {
            refresh_rate: DEFAULT_REFRESH_RATE,
            timeout: None,
            progress: None,
        }
    }
}

impl TaskOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the poll interval. Fails below [`MIN_REFRESH_RATE`].
    pub fn refresh_rate(mut self, refresh_rate: Duration) -> MrsResult<Self> {
        if refresh_rate < MIN_REFRESH_RATE {
            return Err(MrsError::configuration(format!(
                "Refresh rate must be greater than or equal to {} ms.",
                MIN_REFRESH_RATE.as_millis()
            )));
        }
        self.refresh_rate = refresh_rate;
        Ok(self)
    }

    /// Time after which a single TIMEOUT report is produced.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn progress<F>(mut self, progress: F) -> Self
    where
        F: Fn(&TaskSnapshot) + Send + Sync + 'static,
    {
        self.progress = Some(Arc::new(progress));
        self
    }

    pub fn get_refresh_rate(&self) -> Duration {
        self.refresh_rate
    }

    pub fn get_timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

/// A task running on the server.
#[derive(Debug, Clone)]
pub struct Task {
    gateway: Arc<Gateway>,
    id: String,
    path: String,
}

impl Task {
    pub(crate) fn new(gateway: Arc<Gateway>, routine_path: String, id: String) -> Self {
        let path = format!("{}/{}", routine_path, id);
        Self { gateway, id, path }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Path of the task resource relative to the service URL.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Fetches the current status.
    pub async fn status(&self) -> MrsResult<TaskSnapshot> {
        self.gateway
            .fetch_json(
                &self.path,
                FetchOptions::get().error_msg("Failed to get the task status."),
            )
            .await
    }

    /// Asks the server to stop the task.
    pub async fn kill(&self) -> MrsResult<()> {
        self.gateway
            .do_fetch(
                &self.path,
                FetchOptions::delete().error_msg("Failed to kill the task."),
            )
            .await?;
        Ok(())
    }

    /// Starts watching the task. Nothing is sent until the first
    /// [`TaskWatcher::next`].
    pub fn watch(&self, options: TaskOptions) -> TaskWatcher {
        TaskWatcher {
            task: self.clone(),
            options,
            started: Instant::now(),
            timed_out: false,
            state: WatchState::Poll,
        }
    }

    /// Waits for the task to complete and returns its data.
    ///
    /// ERROR, CANCELLED and TIMEOUT become errors. On TIMEOUT the task is
    /// killed first.
    pub async fn run(&self, options: TaskOptions) -> MrsResult<Value> {
        let mut watcher = self.watch(options);
        while let Some(snapshot) = watcher.next().await {
            let snapshot = snapshot?;
            match snapshot.status {
                TaskStatus::Completed => return Ok(snapshot.data.unwrap_or(Value::Null)),
                TaskStatus::Error => {
                    return Err(MrsError::new(ErrorCode::TaskError, snapshot.message_or_empty()))
                }
                TaskStatus::Cancelled => {
                    return Err(MrsError::new(
                        ErrorCode::TaskCancelled,
                        snapshot.message_or_empty(),
                    ))
                }
                TaskStatus::Timeout => {
                    if let Err(error) = self.kill().await {
                        warn!(task_id = %self.id, error = %error, "failed to kill timed out task");
                    }
                    return Err(MrsError::new(
                        ErrorCode::TaskTimeout,
                        snapshot.message_or_empty(),
                    ));
                }
                TaskStatus::Scheduled | TaskStatus::Running => {}
            }
        }
        Err(MrsError::new(
            ErrorCode::TaskError,
            "Got an invalid execution report",
        ))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WatchState {
    /// Next call requests the status.
    Poll,
    /// Next call waits a refresh interval, then requests the status.
    Sleep,
    Done,
}

/// Lazy sequence of task reports.
///
/// Ends after the first terminal report or the first failed status request.
/// The watch timeout bounds both the status requests and the waits between
/// them until the single TIMEOUT report has been produced.
#[derive(Debug)]
pub struct TaskWatcher {
    task: Task,
    options: TaskOptions,
    started: Instant,
    timed_out: bool,
    state: WatchState,
}

impl TaskWatcher {
    pub fn is_done(&self) -> bool {
        self.state == WatchState::Done
    }

    /// Time left before the TIMEOUT report, if one is still pending.
    fn remaining(&self) -> Option<Duration> {
        if self.timed_out {
            return None;
        }
        self.options
            .timeout
            .map(|timeout| timeout.saturating_sub(self.started.elapsed()))
    }

    fn time_out(&mut self) -> TaskSnapshot {
        self.timed_out = true;
        self.state = WatchState::Poll;
        warn!(task_id = %self.task.id, "task watch timed out");
        TaskSnapshot::timeout()
    }

    /// The next report, or `None` once the task has finished.
    pub async fn next(&mut self) -> Option<MrsResult<TaskSnapshot>> {
        if self.state == WatchState::Done {
            return None;
        }

        if self.state == WatchState::Sleep {
            let sleep = tokio::time::sleep(self.options.refresh_rate);
            match self.remaining() {
                Some(remaining) => {
                    if tokio::time::timeout(remaining, sleep).await.is_err() {
                        return Some(Ok(self.time_out()));
                    }
                }
                None => sleep.await,
            }
            self.state = WatchState::Poll;
        }

        let outcome = match self.remaining() {
            Some(remaining) => tokio::time::timeout(remaining, self.task.status()).await,
            None => Ok(self.task.status().await),
        };
        let result = match outcome {
            Ok(result) => result,
            Err(_) => return Some(Ok(self.time_out())),
        };

        let snapshot = match result {
            Ok(snapshot) => snapshot,
            Err(error) => {
                self.state = WatchState::Done;
                return Some(Err(error));
            }
        };
        debug!(task_id = %self.task.id, status = %snapshot.status, "task polled");

        if snapshot.status.is_terminal() {
            self.state = WatchState::Done;
        } else {
            if let Some(progress) = &self.options.progress {
                progress(&snapshot);
            }
            self.state = WatchState::Sleep;
        }
        Some(Ok(snapshot))
    }
}
