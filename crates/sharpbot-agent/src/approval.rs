//! Exec approval — operator decisions gating shell commands.
//!
//! The runtime delegates execution policy to the operator: when the policy
//! matrix says "ask", a pending request is parked here under a random id
//! until somebody resolves it (status interface, CLI) or the deadline hits.
//! `allow-always` persists the resolved executable path into a glob
//! allowlist stored as JSON `{"version":1,"allowlist":[…]}`.

use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::RwLock;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{oneshot, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use sharpbot_core::config::schema::{ExecAsk, ExecFallback, ExecSecurity};
use sharpbot_core::utils::base64url_encode;

// ─────────────────────────────────────────────
// Policy matrix
// ─────────────────────────────────────────────

/// What the policy layer decided before any operator involvement.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PolicyAction {
    /// Run the command without asking.
    Allow,
    /// Refuse the command without asking.
    Block,
    /// Park the command pending an operator decision.
    Ask,
}

/// Evaluate the `security` × `ask` policy matrix for one command.
pub fn evaluate_policy(
    security: ExecSecurity,
    ask: ExecAsk,
    fallback: ExecFallback,
    allowlisted: bool,
) -> PolicyAction {
    match security {
        ExecSecurity::Deny => PolicyAction::Block,
        ExecSecurity::Full => match ask {
            ExecAsk::Always => PolicyAction::Ask,
            _ => PolicyAction::Allow,
        },
        ExecSecurity::Allowlist => {
            if allowlisted && ask != ExecAsk::Always {
                return PolicyAction::Allow;
            }
            match ask {
                ExecAsk::Off => match fallback {
                    ExecFallback::Allow => PolicyAction::Allow,
                    ExecFallback::Deny => PolicyAction::Block,
                },
                ExecAsk::OnMiss | ExecAsk::Always => PolicyAction::Ask,
            }
        }
    }
}

// ─────────────────────────────────────────────
// Decisions
// ─────────────────────────────────────────────

/// Operator decision on a pending approval.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApprovalDecision {
    AllowOnce,
    AllowAlways,
    Deny,
}

/// Outcome of waiting for an approval.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApprovalOutcome {
    Allowed,
    Denied,
    /// No decision arrived; the fallback policy applied.
    TimedOut,
}

/// A request awaiting an operator decision.
#[derive(Clone, Debug)]
pub struct PendingRequest {
    pub id: String,
    pub command: String,
    pub executable: String,
}

// ─────────────────────────────────────────────
// Allowlist persistence
// ─────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
struct AllowlistFile {
    version: u32,
    allowlist: Vec<String>,
}

// ─────────────────────────────────────────────
// ApprovalManager
// ─────────────────────────────────────────────

/// Holds pending approval requests and the persistent path allowlist.
pub struct ApprovalManager {
    /// Path to `exec_allowlist.json` under the data directory.
    allowlist_path: PathBuf,
    /// Allowed executable patterns (exact paths or `*`/`?` globs), sorted.
    allowlist: RwLock<BTreeSet<String>>,
    /// Pending requests keyed by id; resolving sends the decision.
    pending: Mutex<HashMap<String, PendingApprovalSlot>>,
    /// How long to wait for a decision.
    timeout: Duration,
    /// Policy applied when no decision arrives.
    fallback: ExecFallback,
}

struct PendingApprovalSlot {
    request: PendingRequest,
    tx: oneshot::Sender<ApprovalDecision>,
}

impl ApprovalManager {
    /// Create a manager, loading any persisted allowlist.
    pub fn new(allowlist_path: PathBuf, timeout: Duration, fallback: ExecFallback) -> Self {
        let allowlist = load_allowlist(&allowlist_path);
        Self {
            allowlist_path,
            allowlist: RwLock::new(allowlist),
            pending: Mutex::new(HashMap::new()),
            timeout,
            fallback,
        }
    }

    /// Whether an executable path matches the allowlist.
    ///
    /// Patterns are exact paths or globs with `*`/`?`; matching is
    /// case-insensitive.
    pub fn is_allowlisted(&self, executable: &str) -> bool {
        let allowlist = self.allowlist.read().unwrap();
        allowlist.iter().any(|pattern| glob_match(pattern, executable))
    }

    /// Add a pattern to the allowlist and persist it.
    pub fn add_to_allowlist(&self, pattern: &str) {
        {
            let mut allowlist = self.allowlist.write().unwrap();
            allowlist.insert(pattern.to_string());
        }
        if let Err(e) = self.save() {
            warn!(error = %e, "failed to persist exec allowlist");
        }
    }

    /// Current allowlist patterns, sorted.
    pub fn allowlist(&self) -> Vec<String> {
        self.allowlist.read().unwrap().iter().cloned().collect()
    }

    /// Requests currently awaiting a decision.
    pub async fn pending_requests(&self) -> Vec<PendingRequest> {
        let pending = self.pending.lock().await;
        pending.values().map(|slot| slot.request.clone()).collect()
    }

    /// Resolve a pending request. Returns `false` for unknown ids.
    pub async fn resolve(&self, id: &str, decision: ApprovalDecision) -> bool {
        let slot = {
            let mut pending = self.pending.lock().await;
            pending.remove(id)
        };

        match slot {
            Some(slot) => {
                if decision == ApprovalDecision::AllowAlways {
                    self.add_to_allowlist(&slot.request.executable);
                }
                let _ = slot.tx.send(decision);
                true
            }
            None => false,
        }
    }

    /// Park a request and wait for a decision, the deadline, or cancellation.
    ///
    /// The wait uses a token linked from `cancel` so shutdown aborts it; the
    /// per-approval deadline applies the fallback policy.
    pub async fn request(
        &self,
        command: &str,
        executable: &str,
        cancel: &CancellationToken,
    ) -> ApprovalOutcome {
        let id = generate_request_id();
        let (tx, rx) = oneshot::channel();

        {
            let mut pending = self.pending.lock().await;
            pending.insert(
                id.clone(),
                PendingApprovalSlot {
                    request: PendingRequest {
                        id: id.clone(),
                        command: command.to_string(),
                        executable: executable.to_string(),
                    },
                    tx,
                },
            );
        }

        info!(
            approval_id = %id,
            command = %command,
            "exec approval requested"
        );

        let linked = cancel.child_token();
        let outcome = tokio::select! {
            decision = rx => match decision {
                Ok(ApprovalDecision::AllowOnce) | Ok(ApprovalDecision::AllowAlways) => {
                    ApprovalOutcome::Allowed
                }
                Ok(ApprovalDecision::Deny) | Err(_) => ApprovalOutcome::Denied,
            },
            _ = tokio::time::sleep(self.timeout) => ApprovalOutcome::TimedOut,
            _ = linked.cancelled() => ApprovalOutcome::Denied,
        };

        // Drop the slot if it is still parked (timeout/cancel path).
        {
            let mut pending = self.pending.lock().await;
            pending.remove(&id);
        }

        match outcome {
            ApprovalOutcome::TimedOut => {
                debug!(approval_id = %id, "approval timed out, applying fallback");
                match self.fallback {
                    ExecFallback::Allow => ApprovalOutcome::Allowed,
                    ExecFallback::Deny => ApprovalOutcome::TimedOut,
                }
            }
            other => other,
        }
    }

    /// Persist the allowlist as `{"version":1,"allowlist":[…]}`.
    fn save(&self) -> std::io::Result<()> {
        if let Some(parent) = self.allowlist_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = AllowlistFile {
            version: 1,
            allowlist: self.allowlist.read().unwrap().iter().cloned().collect(),
        };
        let json = serde_json::to_string_pretty(&file)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        std::fs::write(&self.allowlist_path, json)
    }
}

fn load_allowlist(path: &PathBuf) -> BTreeSet<String> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(_) => return BTreeSet::new(),
    };
    match serde_json::from_str::<AllowlistFile>(&content) {
        Ok(file) => file.allowlist.into_iter().collect(),
        Err(e) => {
            warn!(error = %e, path = %path.display(), "invalid exec allowlist file");
            BTreeSet::new()
        }
    }
}

// ─────────────────────────────────────────────
// Glob matching
// ─────────────────────────────────────────────

/// Case-insensitive glob match supporting `*` (any run) and `?` (one char).
pub fn glob_match(pattern: &str, input: &str) -> bool {
    let pattern: Vec<char> = pattern.to_lowercase().chars().collect();
    let input: Vec<char> = input.to_lowercase().chars().collect();
    glob_match_inner(&pattern, &input)
}

fn glob_match_inner(pattern: &[char], input: &[char]) -> bool {
    match pattern.first() {
        None => input.is_empty(),
        Some('*') => {
            // '*' matches zero or more characters
            (0..=input.len()).any(|skip| glob_match_inner(&pattern[1..], &input[skip..]))
        }
        Some('?') => !input.is_empty() && glob_match_inner(&pattern[1..], &input[1..]),
        Some(&c) => input.first() == Some(&c) && glob_match_inner(&pattern[1..], &input[1..]),
    }
}

/// Generate a random request id (base64url over time+counter entropy).
fn generate_request_id() -> String {
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::{SystemTime, UNIX_EPOCH};

    static COUNTER: AtomicU64 = AtomicU64::new(0);

    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;
    let count = COUNTER.fetch_add(1, Ordering::Relaxed);
    let mixed = nanos
        .wrapping_mul(0x9E3779B97F4A7C15)
        .wrapping_add(count.wrapping_mul(0xBF58476D1CE4E5B9));

    base64url_encode(&mixed.to_be_bytes())
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
