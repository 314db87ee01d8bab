//! Background process session manager.
//!
//! Powers the exec tool's background and auto-yield modes. Each session owns
//! a spawned shell command whose stdout/stderr drain into a single capped
//! buffer on independent tasks. Offsets are absolute so poll cursors stay
//! valid when the buffer trims its oldest content.
//!
//! A session with a recorded exit code never transitions back to running.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{ChildStdin, Command};
use tokio::sync::{watch, Mutex as TokioMutex, Notify, RwLock};
use tracing::{debug, info, warn};

/// Output buffer cap per session, in bytes.
pub const DEFAULT_BUFFER_CAP: usize = 200_000;

/// Extra bytes dropped beyond the cap so trims don't run on every append.
const TRIM_MARGIN: usize = 4_096;

/// Maximum derived session name length.
const NAME_MAX_LEN: usize = 40;

// ─────────────────────────────────────────────
// Output buffer
// ─────────────────────────────────────────────

/// Append-only text buffer with absolute offsets and a byte cap.
///
/// `start` is the absolute offset of the first retained byte; when the cap
/// is exceeded the oldest content (plus a margin) is dropped and `start`
/// advances, so stale cursors clamp into the live range.
struct OutputBuffer {
    data: String,
    start: usize,
    cap: usize,
}

impl OutputBuffer {
    fn new(cap: usize) -> Self {
        Self {
            data: String::new(),
            start: 0,
            cap,
        }
    }

    fn append(&mut self, chunk: &str) {
        self.data.push_str(chunk);
        if self.data.len() > self.cap {
            let mut cut = self.data.len() - self.cap + TRIM_MARGIN;
            cut = cut.min(self.data.len());
            while cut < self.data.len() && !self.data.is_char_boundary(cut) {
                cut += 1;
            }
            self.data.drain(..cut);
            self.start += cut;
        }
    }

    /// Absolute offset just past the last byte.
    fn end(&self) -> usize {
        self.start + self.data.len()
    }

    /// Content from an absolute offset (clamped into the live range).
    fn slice_from(&self, abs: usize) -> &str {
        let mut rel = abs.max(self.start) - self.start;
        rel = rel.min(self.data.len());
        while rel < self.data.len() && !self.data.is_char_boundary(rel) {
            rel += 1;
        }
        &self.data[rel..]
    }

    /// Last `chars` characters of the buffer.
    fn tail(&self, chars: usize) -> String {
        let total = self.data.chars().count();
        self.data
            .chars()
            .skip(total.saturating_sub(chars))
            .collect()
    }
}

// ─────────────────────────────────────────────
// ProcessSession
// ─────────────────────────────────────────────

/// A backgrounded shell command with captured output.
pub struct ProcessSession {
    /// Short unique identifier.
    pub id: String,
    /// OS process id of the spawned shell, if available.
    pub pid: Option<u32>,
    /// Derived short display name.
    pub name: String,
    /// The full command line.
    pub command: String,
    /// Working directory the command ran in.
    pub cwd: PathBuf,
    /// When the session started.
    pub started_at: DateTime<Utc>,

    buffer: Arc<StdMutex<OutputBuffer>>,
    /// Absolute offset of the next unread byte for `poll_new_output`.
    cursor: StdMutex<usize>,
    exit_rx: watch::Receiver<Option<i32>>,
    finished_at: Arc<StdMutex<Option<DateTime<Utc>>>>,
    kill_signal: Arc<Notify>,
    stdin: TokioMutex<Option<ChildStdin>>,
}

impl ProcessSession {
    /// Exit code, or `None` while still running.
    pub fn exit_code(&self) -> Option<i32> {
        *self.exit_rx.borrow()
    }

    /// Whether the process is still running.
    pub fn is_running(&self) -> bool {
        self.exit_code().is_none()
    }

    /// When the process finished, if it has.
    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        *self.finished_at.lock().unwrap()
    }

    /// Read output accumulated since the previous poll and advance the cursor.
    pub fn poll_new_output(&self) -> String {
        let buffer = self.buffer.lock().unwrap();
        let mut cursor = self.cursor.lock().unwrap();
        let output = buffer.slice_from(*cursor).to_string();
        *cursor = buffer.end();
        output
    }

    /// Last `chars` characters of captured output.
    pub fn get_tail(&self, chars: usize) -> String {
        self.buffer.lock().unwrap().tail(chars)
    }

    /// Line-based log access. Negative `offset` counts from the end.
    pub fn get_log(&self, offset: i64, limit: usize) -> String {
        let buffer = self.buffer.lock().unwrap();
        let lines: Vec<&str> = buffer.data.lines().collect();
        let total = lines.len();

        let start = if offset < 0 {
            total.saturating_sub(offset.unsigned_abs() as usize)
        } else {
            (offset as usize).min(total)
        };

        lines[start..]
            .iter()
            .take(limit)
            .copied()
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Entire captured output (for foreground collection).
    pub fn full_output(&self) -> String {
        self.buffer.lock().unwrap().data.clone()
    }

    /// Write to the process's stdin; `eof` closes the pipe afterwards.
    pub async fn write_stdin(&self, data: &str, eof: bool) -> anyhow::Result<()> {
        let mut guard = self.stdin.lock().await;
        let stdin = guard
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("stdin already closed for session {}", self.id))?;
        stdin.write_all(data.as_bytes()).await?;
        stdin.flush().await?;
        if eof {
            *guard = None;
        }
        Ok(())
    }

    /// Request termination. Idempotent; a finished session is unaffected.
    pub fn kill(&self) {
        self.kill_signal.notify_waiters();
    }

    /// Wait for the process to exit, up to `timeout`.
    ///
    /// Returns `true` when exited (now or already), `false` on timeout.
    pub async fn wait_for_exit(&self, timeout: Duration) -> bool {
        let mut rx = self.exit_rx.clone();
        tokio::time::timeout(timeout, rx.wait_for(|exit| exit.is_some()))
            .await
            .map(|r| r.is_ok())
            .unwrap_or(false)
    }
}

// ─────────────────────────────────────────────
// ProcessSessionManager
// ─────────────────────────────────────────────

/// Concurrent map of background process sessions.
pub struct ProcessSessionManager {
    sessions: RwLock<HashMap<String, Arc<ProcessSession>>>,
    buffer_cap: usize,
    /// Watchdog limit after which a running session is killed.
    max_runtime: Duration,
    /// How long finished sessions linger before the reaper removes them.
    session_ttl: Duration,
}

impl ProcessSessionManager {
    /// Create a new manager.
    pub fn new(max_runtime: Duration, session_ttl: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            buffer_cap: DEFAULT_BUFFER_CAP,
            max_runtime,
            session_ttl,
        }
    }

    /// Spawn `command` via the platform shell and start capturing output.
    pub async fn start_session(
        &self,
        command: &str,
        cwd: &Path,
    ) -> anyhow::Result<Arc<ProcessSession>> {
        let mut cmd = if cfg!(target_os = "windows") {
            let mut c = Command::new("cmd");
            c.arg("/C").arg(command);
            c
        } else {
            let mut c = Command::new("/bin/sh");
            c.arg("-c").arg(command);
            c
        };

        let mut child = cmd
            .current_dir(cwd)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| anyhow::anyhow!("Failed to spawn command: {e}"))?;

        let id = generate_session_id();
        let pid = child.id();
        let buffer = Arc::new(StdMutex::new(OutputBuffer::new(self.buffer_cap)));
        let (exit_tx, exit_rx) = watch::channel(None);
        let finished_at = Arc::new(StdMutex::new(None));
        let kill_signal = Arc::new(Notify::new());

        // Drain stdout and stderr into the shared buffer on their own tasks.
        if let Some(stdout) = child.stdout.take() {
            spawn_reader(stdout, buffer.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_reader(stderr, buffer.clone());
        }
        let stdin = child.stdin.take();

        let session = Arc::new(ProcessSession {
            id: id.clone(),
            pid,
            name: derive_session_name(command),
            command: command.to_string(),
            cwd: cwd.to_path_buf(),
            started_at: Utc::now(),
            buffer,
            cursor: StdMutex::new(0),
            exit_rx,
            finished_at: finished_at.clone(),
            kill_signal: kill_signal.clone(),
            stdin: TokioMutex::new(stdin),
        });

        // Waiter task: records the exit code and services kill requests.
        {
            let finished_at = finished_at.clone();
            let kill_signal = kill_signal.clone();
            let session_id = id.clone();
            tokio::spawn(async move {
                let status = tokio::select! {
                    status = child.wait() => status,
                    _ = kill_signal.notified() => {
                        let _ = child.start_kill();
                        child.wait().await
                    }
                };

                let code = status.ok().and_then(|s| s.code()).unwrap_or(-1);
                *finished_at.lock().unwrap() = Some(Utc::now());
                let _ = exit_tx.send(Some(code));
                debug!(session_id = %session_id, code = code, "process session exited");
            });
        }

        // Detached watchdog: kill the session once it outlives the limit.
        {
            let session = session.clone();
            let max_runtime = self.max_runtime;
            tokio::spawn(async move {
                if !session.wait_for_exit(max_runtime).await {
                    warn!(
                        session_id = %session.id,
                        limit_secs = max_runtime.as_secs(),
                        "process session exceeded runtime limit, killing"
                    );
                    session.kill();
                }
            });
        }

        info!(
            session_id = %id,
            pid = ?pid,
            command = %command,
            "started process session"
        );

        let mut sessions = self.sessions.write().await;
        sessions.insert(id, session.clone());
        Ok(session)
    }

    /// Look up a session by id.
    pub async fn get(&self, id: &str) -> Option<Arc<ProcessSession>> {
        self.sessions.read().await.get(id).cloned()
    }

    /// All sessions, sorted by start time (oldest first).
    pub async fn list(&self) -> Vec<Arc<ProcessSession>> {
        let mut sessions: Vec<Arc<ProcessSession>> =
            self.sessions.read().await.values().cloned().collect();
        sessions.sort_by_key(|s| s.started_at);
        sessions
    }

    /// Kill (if running) and remove a session. Returns whether it existed.
    pub async fn remove(&self, id: &str) -> bool {
        let removed = self.sessions.write().await.remove(id);
        if let Some(session) = removed {
            session.kill();
            info!(session_id = %id, "removed process session");
            true
        } else {
            false
        }
    }

    /// Remove all finished sessions, regardless of age. Returns the count.
    pub async fn clear_finished(&self) -> usize {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, s| s.is_running());
        before - sessions.len()
    }

    /// Remove finished sessions older than the TTL. Returns the count.
    pub async fn reap_expired(&self) -> usize {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.session_ttl)
                .unwrap_or_else(|_| chrono::Duration::seconds(600));

        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, s| match s.finished_at() {
            Some(finished) => finished > cutoff,
            None => true,
        });
        let reaped = before - sessions.len();
        if reaped > 0 {
            debug!(reaped = reaped, "reaped expired process sessions");
        }
        reaped
    }

    /// Spawn the periodic reaper task.
    pub fn spawn_reaper(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                manager.reap_expired().await;
            }
        })
    }
}

impl Default for ProcessSessionManager {
    fn default() -> Self {
        Self::new(Duration::from_secs(30 * 60), Duration::from_secs(10 * 60))
    }
}

// ─────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────

fn spawn_reader<R>(mut reader: R, buffer: Arc<StdMutex<OutputBuffer>>)
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut chunk = [0u8; 4096];
        loop {
            match reader.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    let text = String::from_utf8_lossy(&chunk[..n]).into_owned();
                    buffer.lock().unwrap().append(&text);
                }
            }
        }
    });
}

/// Derive a short display name from a command line.
///
/// Strips a shell prefix and surrounding quotes, takes the first 3 words,
/// caps the result at 40 characters.
pub fn derive_session_name(command: &str) -> String {
    let mut rest = command.trim();

    let lower = rest.to_lowercase();
    for prefix in ["/bin/sh -c", "sh -c", "bash -c", "cmd.exe /c", "cmd /c"] {
        if lower.starts_with(prefix) {
            rest = rest[prefix.len()..].trim_start();
            break;
        }
    }

    let rest = rest.trim_matches(|c| c == '"' || c == '\'');

    let name: String = rest
        .split_whitespace()
        .take(3)
        .collect::<Vec<_>>()
        .join(" ");

    if name.is_empty() {
        return "shell".to_string();
    }
    name.chars().take(NAME_MAX_LEN).collect()
}

/// Generate a short unique session id (8 hex chars).
fn generate_session_id() -> String {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::{SystemTime, UNIX_EPOCH};

    static COUNTER: AtomicU32 = AtomicU32::new(0);

    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;

    let count = COUNTER.fetch_add(1, Ordering::Relaxed);
    let mixed = nanos
        .wrapping_mul(6364136223846793005)
        .wrapping_add(count as u64);
    format!("{:08x}", (mixed >> 32) as u32)
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
