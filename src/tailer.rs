use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crossterm::style::Color;
use futures::AsyncBufRead;
use futures::io::AsyncBufReadExt;
use k8s_openapi::api::core::v1::Pod;
use kube::Api;
use kube::api::LogParams;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::types::LogRecord;

/// First delay when the API refuses a log stream because the container has
/// not produced output yet; doubled on every further attempt.
const RETRY_INITIAL_DELAY: Duration = Duration::from_secs(5);
const RETRY_FACTOR: u32 = 2;
const RETRY_ATTEMPTS: u32 = 5;

/// Everything needed to start tailing one pod.
#[derive(Debug, Clone)]
pub struct TailTarget {
    pub pod_name: String,
    /// Init containers first, then regular containers, in declared order.
    pub containers: Vec<String>,
    pub pod_color: Option<Color>,
    pub container_color: Option<Color>,
}

/// Streams logs for one pod's containers. The watch loop only talks to this
/// trait, so tests can substitute a recording fake.
pub trait Tailer {
    /// Spawn one follow task per container.
    fn start(&mut self);
    /// Restart the named containers whose previous task already finished.
    fn retry_containers(&mut self, names: &[String]);
    /// Cancel every task. Idempotent.
    fn close(&mut self);
    /// Fetch each container's log to completion, in order, without retry.
    async fn tail_sync(&mut self);
}

/// Source of container log byte streams; `Api<Pod>` in production.
pub trait LogSource: Clone + Send + Sync + 'static {
    fn fetch(
        &self,
        pod_name: &str,
        params: &LogParams,
    ) -> impl Future<Output = kube::Result<Pin<Box<dyn AsyncBufRead + Send>>>> + Send;
}

impl LogSource for Api<Pod> {
    async fn fetch(
        &self,
        pod_name: &str,
        params: &LogParams,
    ) -> kube::Result<Pin<Box<dyn AsyncBufRead + Send>>> {
        let stream = self.log_stream(pod_name, params).await?;
        Ok(Box::pin(stream))
    }
}

#[derive(Debug, thiserror::Error)]
enum TailError {
    #[error("opening stream: {0}")]
    Open(#[from] kube::Error),
    #[error("reading stream: {0}")]
    Read(#[from] std::io::Error),
}

impl TailError {
    /// The API answers 400 while a container exists but has not started;
    /// that is the only error worth waiting out.
    fn is_retryable(&self) -> bool {
        matches!(self, TailError::Open(kube::Error::Api(response)) if response.code == 400)
    }
}

/// Handle to one running container task. `completed` flips exactly once
/// when the task ends, whatever the reason; the restart path reads it.
struct ContainerTask {
    cancel: CancellationToken,
    completed: Arc<AtomicBool>,
}

impl ContainerTask {
    fn finished(&self) -> bool {
        self.completed.load(Ordering::Acquire)
    }
}

/// The one concrete [`Tailer`]: owns a task per container, all cancelled
/// together through a shared root token.
pub struct PodTailer<S> {
    source: S,
    pod_name: String,
    containers: Vec<String>,
    pod_color: Option<Color>,
    container_color: Option<Color>,
    params: LogParams,
    tx: mpsc::Sender<LogRecord>,
    root: CancellationToken,
    tasks: HashMap<String, ContainerTask>,
}

impl<S: LogSource> PodTailer<S> {
    pub fn new(
        source: S,
        target: TailTarget,
        params: LogParams,
        tx: mpsc::Sender<LogRecord>,
    ) -> Self {
        Self {
            source,
            pod_name: target.pod_name,
            containers: target.containers,
            pod_color: target.pod_color,
            container_color: target.container_color,
            params,
            tx,
            root: CancellationToken::new(),
            tasks: HashMap::new(),
        }
    }

    fn container_params(&self, container: &str) -> LogParams {
        let mut params = self.params.clone();
        params.container = Some(container.to_string());
        params
    }

    fn spawn_task(&self, container: String) -> ContainerTask {
        let cancel = self.root.child_token();
        let completed = Arc::new(AtomicBool::new(false));

        let source = self.source.clone();
        let pod_name = self.pod_name.clone();
        let params = self.container_params(&container);
        let tx = self.tx.clone();
        let colors = (self.pod_color, self.container_color);
        let task_cancel = cancel.clone();
        let task_completed = Arc::clone(&completed);
        tokio::spawn(async move {
            follow_with_retry(
                &source,
                &pod_name,
                &container,
                &params,
                &tx,
                colors,
                &task_cancel,
            )
            .await;
            task_completed.store(true, Ordering::Release);
        });

        ContainerTask { cancel, completed }
    }

    #[cfg(test)]
    pub(crate) fn task_finished(&self, container: &str) -> Option<bool> {
        self.tasks.get(container).map(ContainerTask::finished)
    }
}

impl<S: LogSource> Tailer for PodTailer<S> {
    fn start(&mut self) {
        for container in self.containers.clone() {
            let task = self.spawn_task(container.clone());
            self.tasks.insert(container, task);
        }
    }

    fn retry_containers(&mut self, names: &[String]) {
        for name in names {
            let Some(task) = self.tasks.get(name) else {
                continue;
            };
            if !task.finished() {
                continue;
            }
            task.cancel.cancel();
            debug!(
                "[{}/{}] restarting tail after container restart",
                self.pod_name, name
            );
            let fresh = self.spawn_task(name.clone());
            self.tasks.insert(name.clone(), fresh);
        }
    }

    fn close(&mut self) {
        self.root.cancel();
    }

    async fn tail_sync(&mut self) {
        for container in self.containers.clone() {
            let params = self.container_params(&container);
            if let Err(err) = stream_once(
                &self.source,
                &self.pod_name,
                &container,
                &params,
                &self.tx,
                (self.pod_color, self.container_color),
                &self.root,
            )
            .await
            {
                warn!("[{}/{}] fetching logs: {err}", self.pod_name, container);
            }
        }
    }
}

/// Open-and-read loop with bounded exponential backoff. Giving up is logged
/// and ends the task; it never takes other tailers down.
async fn follow_with_retry<S: LogSource>(
    source: &S,
    pod_name: &str,
    container: &str,
    params: &LogParams,
    tx: &mpsc::Sender<LogRecord>,
    colors: (Option<Color>, Option<Color>),
    cancel: &CancellationToken,
) {
    let mut delay = RETRY_INITIAL_DELAY;
    for attempt in 1..=RETRY_ATTEMPTS {
        match stream_once(source, pod_name, container, params, tx, colors, cancel).await {
            Ok(()) => return,
            Err(err) if err.is_retryable() && attempt < RETRY_ATTEMPTS => {
                debug!("[{pod_name}/{container}] stream not ready (attempt {attempt}): {err}");
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(jittered(delay)) => {}
                }
                delay = delay.saturating_mul(RETRY_FACTOR);
            }
            Err(err) => {
                warn!("[{pod_name}/{container}] tail ended: {err}");
                return;
            }
        }
    }
}

/// One streaming fetch, split at newline boundaries. A non-empty remainder
/// at end of stream still goes out as a final record.
async fn stream_once<S: LogSource>(
    source: &S,
    pod_name: &str,
    container: &str,
    params: &LogParams,
    tx: &mpsc::Sender<LogRecord>,
    colors: (Option<Color>, Option<Color>),
    cancel: &CancellationToken,
) -> Result<(), TailError> {
    let mut reader = source.fetch(pod_name, params).await?;
    loop {
        let mut content = Vec::new();
        let read = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            read = reader.read_until(b'\n', &mut content) => read,
        };
        match read {
            Ok(0) => return Ok(()),
            Ok(_) => {
                let record = LogRecord {
                    pod_name: pod_name.to_string(),
                    container_name: container.to_string(),
                    content,
                    pod_color: colors.0,
                    container_color: colors.1,
                };
                if tx.send(record).await.is_err() {
                    return Ok(());
                }
            }
            Err(err) => return Err(err.into()),
        }
    }
}

/// Up to 10% extra delay, seeded from the clock.
fn jittered(delay: Duration) -> Duration {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|t| t.subsec_nanos())
        .unwrap_or(0);
    delay.mul_f64(1.0 + f64::from(nanos % 1000) / 10_000.0)
}
