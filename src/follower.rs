//! Live log following
//!
//! Each (subscriber, camera) pair owns at most one `tail -F` child. Events
//! reach the subscriber over a bounded channel in a fixed order: one status
//! event, the backlog, then live lines as the tail produces them.

pub mod state;

use crate::controller::CameraStatus;
use crate::error::{Error, Result};
use crate::{camera, logbook};
use chrono::{DateTime, Utc};
use serde::Serialize;
use state::Subscription;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Events buffered per subscription before the follow waits on the reader
const CHANNEL_CAPACITY: usize = 256;

/// How long a detaching follow may take to reap its tail before it is aborted
const DETACH_GRACE: Duration = Duration::from_secs(2);

pub type SubscriberId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Status,
    Log,
    Error,
    System,
}

/// One message delivered to a subscriber
#[derive(Debug, Clone, Serialize)]
pub struct LogEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl LogEvent {
    fn new(kind: EventKind, content: impl Into<String>) -> Self {
        Self {
            kind,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

type FollowKey = (SubscriberId, String);

struct ActiveFollow {
    generation: u64,
    cancel: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

type FollowTable = Arc<Mutex<HashMap<FollowKey, ActiveFollow>>>;

/// Registry of live follows
pub struct LogFollower {
    base_dir: PathBuf,
    tail_program: PathBuf,
    table: FollowTable,
    next_generation: AtomicU64,
}

impl LogFollower {
    pub fn new(base_dir: impl Into<PathBuf>, tail_program: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            tail_program: tail_program.into(),
            table: Arc::new(Mutex::new(HashMap::new())),
            next_generation: AtomicU64::new(1),
        }
    }

    /// Begin following a camera's log
    ///
    /// Any follow already held by this subscriber for this camera is torn
    /// down first.
    pub async fn start(
        &self,
        subscriber: &str,
        camera: &str,
        status: &CameraStatus,
        backlog: usize,
    ) -> Result<mpsc::Receiver<LogEvent>> {
        camera::validate_name(camera)?;
        let path = logbook::log_path(&self.base_dir, camera);
        logbook::ensure(&path)?;

        self.stop(subscriber, camera).await;

        // The tail is attached before the backlog is read so that no line
        // written in between is lost.
        let child = self.spawn_tail(&path)?;

        let mut initial = Vec::with_capacity(backlog + 1);
        let status_json = serde_json::to_string(status).unwrap_or_else(|_| status.message.clone());
        initial.push(LogEvent::new(EventKind::Status, status_json));
        initial.extend(
            logbook::tail_lines(&path, backlog)?
                .into_iter()
                .map(|line| LogEvent::new(EventKind::Log, line)),
        );

        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (cancel_tx, cancel_rx) = oneshot::channel();
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let key: FollowKey = (subscriber.to_string(), camera.to_string());

        // Hold the table while spawning so that a follow which ends at once
        // still finds its own slot to release.
        let mut table = self.table.lock().await;
        let task = tokio::spawn(follow(
            child,
            tx,
            cancel_rx,
            initial,
            key.clone(),
            generation,
            Arc::clone(&self.table),
        ));
        table.insert(
            key,
            ActiveFollow {
                generation,
                cancel: cancel_tx,
                task,
            },
        );

        info!(subscriber, camera, generation, "log follow started");
        Ok(rx)
    }

    /// Attach a fresh follow for the pair, replacing any current one
    ///
    /// Clients that reconnect go through here, so repeated reconnects never
    /// leave more than one tail behind.
    pub async fn restart(
        &self,
        subscriber: &str,
        camera: &str,
        status: &CameraStatus,
        backlog: usize,
    ) -> Result<mpsc::Receiver<LogEvent>> {
        self.start(subscriber, camera, status, backlog).await
    }

    /// Detach one follow; returns whether one was active
    pub async fn stop(&self, subscriber: &str, camera: &str) -> bool {
        let key: FollowKey = (subscriber.to_string(), camera.to_string());
        let removed = self.table.lock().await.remove(&key);
        match removed {
            Some(active) => {
                detach(active).await;
                debug!(subscriber, camera, "log follow stopped");
                true
            }
            None => false,
        }
    }

    /// Detach every follow held by a subscriber
    pub async fn stop_subscriber(&self, subscriber: &str) -> usize {
        let count = self.stop_matching(|(sub, _)| sub == subscriber).await;
        if count > 0 {
            debug!(subscriber, count, "subscriber follows stopped");
        }
        count
    }

    /// Detach every follow of a camera, whoever holds it
    pub async fn stop_camera(&self, camera: &str) -> usize {
        let count = self.stop_matching(|(_, cam)| cam == camera).await;
        if count > 0 {
            debug!(camera, count, "camera follows stopped");
        }
        count
    }

    async fn stop_matching(&self, matches: impl Fn(&FollowKey) -> bool) -> usize {
        let removed: Vec<ActiveFollow> = {
            let mut table = self.table.lock().await;
            let keys: Vec<FollowKey> = table.keys().filter(|k| matches(k)).cloned().collect();
            keys.iter().filter_map(|k| table.remove(k)).collect()
        };

        let count = removed.len();
        for active in removed {
            detach(active).await;
        }
        count
    }

    /// Terminate every follow; used on shutdown
    pub async fn close_all(&self) -> usize {
        let removed: Vec<ActiveFollow> = self.table.lock().await.drain().map(|(_, v)| v).collect();
        let count = removed.len();
        for active in removed {
            detach(active).await;
        }
        if count > 0 {
            info!(count, "closed all log follows");
        }
        count
    }

    #[cfg(test)]
    pub async fn active_count(&self) -> usize {
        self.table.lock().await.len()
    }

    fn spawn_tail(&self, path: &Path) -> Result<Child> {
        Command::new(&self.tail_program)
            .args(["-n", "0", "-F"])
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::CommandFailed {
                command: self.tail_program.display().to_string(),
                message: e.to_string(),
            })
    }
}

async fn detach(active: ActiveFollow) {
    let ActiveFollow { cancel, mut task, .. } = active;
    let _ = cancel.send(());
    if tokio::time::timeout(DETACH_GRACE, &mut task).await.is_err() {
        // Dropping the task drops the child, which kills the tail
        task.abort();
    }
}

enum Outcome {
    Detached,
    Exited(ExitStatus),
    Failed(std::io::Error),
}

async fn follow(
    mut child: Child,
    tx: mpsc::Sender<LogEvent>,
    mut cancel: oneshot::Receiver<()>,
    initial: Vec<LogEvent>,
    key: FollowKey,
    generation: u64,
    table: FollowTable,
) {
    let mut subscription = Subscription::new();
    let _ = subscription.attach();

    let mut stdout = child.stdout.take().map(|s| BufReader::new(s).lines());
    let mut stderr = child.stderr.take().map(|s| BufReader::new(s).lines());

    let mut outcome = None;
    for event in initial {
        if tx.send(event).await.is_err() {
            outcome = Some(Outcome::Detached);
            break;
        }
    }

    let outcome = match outcome {
        Some(outcome) => outcome,
        None => loop {
            tokio::select! {
                _ = &mut cancel => break Outcome::Detached,
                _ = tx.closed() => break Outcome::Detached,
                line = next_line(&mut stdout) => match line {
                    Some(line) => {
                        if tx.send(LogEvent::new(EventKind::Log, line)).await.is_err() {
                            break Outcome::Detached;
                        }
                    }
                    None => stdout = None,
                },
                line = next_line(&mut stderr) => match line {
                    Some(line) => {
                        if tx.send(LogEvent::new(EventKind::Error, line)).await.is_err() {
                            break Outcome::Detached;
                        }
                    }
                    None => stderr = None,
                },
                status = child.wait() => match status {
                    Ok(status) => break Outcome::Exited(status),
                    Err(e) => break Outcome::Failed(e),
                },
            }
        },
    };

    let (subscriber, camera) = &key;
    match outcome {
        Outcome::Detached => {
            let _ = child.start_kill();
            let _ = child.wait().await;
            let _ = subscription.detach();
        }
        Outcome::Exited(status) => {
            drain(&mut stdout, EventKind::Log, &tx).await;
            drain(&mut stderr, EventKind::Error, &tx).await;
            let _ = tx
                .send(LogEvent::new(EventKind::System, format!("tail ended: {}", status)))
                .await;
            let _ = subscription.close();
            warn!(subscriber = %subscriber, camera = %camera, %status, "log tail ended");
        }
        Outcome::Failed(e) => {
            let _ = tx
                .send(LogEvent::new(EventKind::System, format!("tail failed: {}", e)))
                .await;
            let _ = subscription.close();
            warn!(subscriber = %subscriber, camera = %camera, error = %e, "log tail failed");
        }
    }

    debug!(
        subscriber = %subscriber,
        camera = %camera,
        state = ?subscription.state(),
        "follow finished"
    );

    let mut table = table.lock().await;
    if table.get(&key).is_some_and(|active| active.generation == generation) {
        table.remove(&key);
    }
}

/// Next line from an optional stream; pends forever once the stream is gone
async fn next_line<R>(lines: &mut Option<Lines<BufReader<R>>>) -> Option<String>
where
    R: tokio::io::AsyncRead + Unpin,
{
    match lines {
        Some(lines) => lines.next_line().await.ok().flatten(),
        None => std::future::pending().await,
    }
}

async fn drain<R>(
    lines: &mut Option<Lines<BufReader<R>>>,
    kind: EventKind,
    tx: &mpsc::Sender<LogEvent>,
) where
    R: tokio::io::AsyncRead + Unpin,
{
    if let Some(lines) = lines {
        while let Ok(Some(line)) = lines.next_line().await {
            if tx.send(LogEvent::new(kind, line)).await.is_err() {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn status() -> CameraStatus {
        CameraStatus::stopped(None)
    }

    async fn recv(rx: &mut mpsc::Receiver<LogEvent>) -> LogEvent {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("channel closed")
    }

    #[tokio::test]
    async fn test_status_then_backlog_then_live() {
        let dir = tempfile::tempdir().unwrap();
        let path = logbook::log_path(dir.path(), "gate01");
        std::fs::write(&path, "old 1\nold 2\nold 3\n").unwrap();

        let follower = LogFollower::new(dir.path(), "tail");
        let mut rx = follower.start("ui-1", "gate01", &status(), 2).await.unwrap();

        let first = recv(&mut rx).await;
        assert_eq!(first.kind, EventKind::Status);
        assert!(first.content.contains("\"running\":false"));

        let a = recv(&mut rx).await;
        let b = recv(&mut rx).await;
        assert_eq!((a.kind, a.content.as_str()), (EventKind::Log, "old 2"));
        assert_eq!((b.kind, b.content.as_str()), (EventKind::Log, "old 3"));

        // Give tail a moment to open the file before appending
        tokio::time::sleep(Duration::from_millis(300)).await;
        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(file, "fresh line").unwrap();
        drop(file);

        let live = recv(&mut rx).await;
        assert_eq!(live.kind, EventKind::Log);
        assert_eq!(live.content, "fresh line");

        assert!(follower.stop("ui-1", "gate01").await);
        assert_eq!(follower.active_count().await, 0);
    }

    #[tokio::test]
    async fn test_missing_log_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let follower = LogFollower::new(dir.path(), "tail");
        let mut rx = follower.start("ui-1", "gate02", &status(), 50).await.unwrap();

        assert_eq!(recv(&mut rx).await.kind, EventKind::Status);
        assert!(logbook::log_path(dir.path(), "gate02").exists());
        follower.close_all().await;
    }

    #[tokio::test]
    async fn test_second_start_replaces_first() {
        let dir = tempfile::tempdir().unwrap();
        let follower = LogFollower::new(dir.path(), "tail");

        let mut first = follower.start("ui-1", "gate01", &status(), 0).await.unwrap();
        let _second = follower.restart("ui-1", "gate01", &status(), 0).await.unwrap();
        assert_eq!(follower.active_count().await, 1);

        // The replaced follow drains and closes its channel
        assert_eq!(recv(&mut first).await.kind, EventKind::Status);
        let closed = tokio::time::timeout(Duration::from_secs(5), first.recv()).await.unwrap();
        assert!(closed.is_none());

        let _other = follower.start("ui-2", "gate01", &status(), 0).await.unwrap();
        assert_eq!(follower.active_count().await, 2);
        assert_eq!(follower.stop_subscriber("ui-1").await, 1);
        assert_eq!(follower.close_all().await, 1);
        assert_eq!(follower.active_count().await, 0);
    }

    #[tokio::test]
    async fn test_dropped_receiver_releases_slot() {
        let dir = tempfile::tempdir().unwrap();
        let follower = LogFollower::new(dir.path(), "tail");
        let rx = follower.start("ui-1", "gate01", &status(), 0).await.unwrap();
        drop(rx);

        for _ in 0..50 {
            if follower.active_count().await == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert_eq!(follower.active_count().await, 0);
    }

    #[tokio::test]
    async fn test_tail_exit_emits_system_event() {
        let dir = tempfile::tempdir().unwrap();
        // `true` ignores its arguments and exits at once
        let follower = LogFollower::new(dir.path(), "true");
        let mut rx = follower.start("ui-1", "gate01", &status(), 0).await.unwrap();

        assert_eq!(recv(&mut rx).await.kind, EventKind::Status);
        let system = recv(&mut rx).await;
        assert_eq!(system.kind, EventKind::System);
        assert!(system.content.starts_with("tail ended"));
    }

    #[tokio::test]
    async fn test_invalid_camera_name() {
        let dir = tempfile::tempdir().unwrap();
        let follower = LogFollower::new(dir.path(), "tail");
        assert!(follower.start("ui-1", "../etc", &status(), 0).await.is_err());
    }
}
