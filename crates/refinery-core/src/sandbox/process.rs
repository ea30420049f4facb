//! Process-isolated candidate execution.
//!
//! Every execution spawns a fresh interpreter in an empty temporary working
//! directory with a cleared environment, in its own process group and under
//! the [`isolation`](super::isolation) confinement. The whole group is killed
//! when the wall-clock limit elapses. A semaphore bounds how many children run
//! at once across every expert sharing the sandbox.

use std::path::PathBuf;
use std::process::{Output, Stdio};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::domain::{ExecutionResult, Grid};

use super::harness::{truncate, HarnessReply, HarnessRequest, HARNESS_SOURCE};
use super::isolation::{default_masked_paths, Confinement, IsolationMode, ResourceLimits};
use super::policy::ImportPolicy;
use super::Sandbox;

/// Configuration for sandboxed candidate execution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SandboxConfig {
    /// Interpreter executable.
    pub interpreter: String,
    /// Flags passed before `-c <harness>`.
    pub interpreter_args: Vec<String>,
    /// Maximum wall-clock time for a single execution (milliseconds).
    pub timeout_ms: u64,
    /// Maximum concurrent interpreter processes.
    pub max_workers: usize,
    /// Largest reply accepted from the harness (bytes).
    pub max_output_bytes: usize,
    /// Importable top-level modules.
    pub import_policy: ImportPolicy,
    pub isolation: IsolationMode,
    pub limits: ResourceLimits,
    /// Directories replaced by empty read-only mounts inside the child.
    pub masked_paths: Vec<PathBuf>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            interpreter: "python3".to_string(),
            interpreter_args: vec!["-s".to_string(), "-B".to_string()],
            timeout_ms: 1_500,
            max_workers: 8,
            max_output_bytes: 1 << 20,
            import_policy: ImportPolicy::default(),
            isolation: IsolationMode::default(),
            limits: ResourceLimits::default(),
            masked_paths: default_masked_paths(),
        }
    }
}

impl SandboxConfig {
    /// CPU-time ceiling: the wall-clock limit rounded up, plus one second.
    fn cpu_seconds(&self) -> u64 {
        self.timeout_ms.saturating_add(999) / 1_000 + 1
    }

    fn confinement(&self) -> std::io::Result<Confinement> {
        Confinement::plan(self.isolation, &self.limits, self.cpu_seconds(), &self.masked_paths)
    }
}

/// Returns `true` when the configured interpreter can be launched.
pub fn is_interpreter_available(config: &SandboxConfig) -> bool {
    std::process::Command::new(&config.interpreter)
        .arg("--version")
        .env_clear()
        .envs(inherited_path())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Returns `true` when the host can run the interpreter under full namespace
/// confinement, whatever `config.isolation` says.
pub fn is_isolation_available(config: &SandboxConfig) -> bool {
    let strict = SandboxConfig {
        isolation: IsolationMode::Required,
        ..config.clone()
    };
    let Ok(confinement) = strict.confinement() else {
        return false;
    };

    let mut command = std::process::Command::new(&config.interpreter);
    command
        .args(&config.interpreter_args)
        .args(["-c", "pass"])
        .env_clear()
        .envs(inherited_path())
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    probe_confined(command, confinement)
}

#[cfg(unix)]
fn probe_confined(mut command: std::process::Command, confinement: Confinement) -> bool {
    use std::os::unix::process::CommandExt;
    // SAFETY: `apply` only issues system calls on data resolved before fork.
    unsafe {
        command.pre_exec(move || confinement.apply());
    }
    command.status().map(|s| s.success()).unwrap_or(false)
}

#[cfg(not(unix))]
fn probe_confined(_command: std::process::Command, _confinement: Confinement) -> bool {
    false
}

/// Sandbox backed by one interpreter process per execution.
#[derive(Debug, Clone)]
pub struct ProcessSandbox {
    config: SandboxConfig,
    workers: Arc<Semaphore>,
    confinement: Result<Arc<Confinement>, String>,
}

impl ProcessSandbox {
    pub fn new(config: SandboxConfig) -> Self {
        let workers = Arc::new(Semaphore::new(config.max_workers.max(1)));
        let confinement = config.confinement().map(Arc::new).map_err(|e| {
            warn!(error = %e, "cannot plan sandbox isolation; executions will be refused");
            e.to_string()
        });
        if let Ok(planned) = &confinement {
            debug!(isolation = ?planned.mode(), "sandbox confinement planned");
        }
        Self {
            config,
            workers,
            confinement,
        }
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    fn command(&self, workdir: &std::path::Path) -> Result<Command, String> {
        let confinement = self
            .confinement
            .as_ref()
            .map_err(|e| format!("cannot plan isolation: {e}"))?;

        let mut command = Command::new(&self.config.interpreter);
        command
            .args(&self.config.interpreter_args)
            .arg("-c")
            .arg(HARNESS_SOURCE)
            .env_clear()
            .envs(inherited_path())
            .env("PYTHONHASHSEED", "0")
            .env("OPENBLAS_NUM_THREADS", "1")
            .env("OMP_NUM_THREADS", "1")
            .current_dir(workdir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        #[cfg(unix)]
        {
            command.process_group(0);
            let confinement = Arc::clone(confinement);
            // SAFETY: `apply` only issues system calls on data resolved before fork.
            unsafe {
                command.pre_exec(move || confinement.apply());
            }
        }
        #[cfg(not(unix))]
        {
            if confinement.mode() == IsolationMode::Required {
                return Err("process isolation is not supported on this platform".to_string());
            }
        }

        Ok(command)
    }

    async fn run_child(&self, source: &str, input: &Grid, deadline: Instant) -> ExecutionResult {
        let request = HarnessRequest {
            source,
            input,
            allowed_modules: self.config.import_policy.modules().collect(),
        };
        let payload = match serde_json::to_vec(&request) {
            Ok(p) => p,
            Err(e) => return unavailable(format!("failed to encode request: {e}")),
        };

        let workdir = match tempfile::tempdir() {
            Ok(dir) => dir,
            Err(e) => return unavailable(format!("failed to create workdir: {e}")),
        };

        let mut command = match self.command(workdir.path()) {
            Ok(command) => command,
            Err(message) => return unavailable(message),
        };
        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!(interpreter = %self.config.interpreter, error = %e, "failed to spawn sandbox interpreter");
                return unavailable(format!("failed to spawn {}: {e}", self.config.interpreter));
            }
        };
        let pid = child.id();

        let exchange = async move {
            if let Some(mut stdin) = child.stdin.take() {
                stdin
                    .write_all(&payload)
                    .await
                    .map_err(|e| format!("failed to write request: {e}"))?;
                // Dropping stdin closes the pipe so the harness sees EOF.
            }
            child
                .wait_with_output()
                .await
                .map_err(|e| format!("failed to collect output: {e}"))
        };
        // On elapse the exchange future is dropped, which kills the leader.
        let outcome = tokio::time::timeout_at(deadline, exchange).await;

        // Descendants the candidate forked share the group; none may outlive
        // the execution.
        #[cfg(unix)]
        {
            if let Some(pid) = pid {
                super::isolation::kill_process_group(pid);
            }
        }
        #[cfg(not(unix))]
        let _ = pid;

        match outcome {
            Err(_elapsed) => ExecutionResult::Timeout {
                limit_ms: self.config.timeout_ms,
            },
            Ok(Err(message)) => unavailable(message),
            Ok(Ok(output)) => self.classify(&output),
        }
    }

    fn classify(&self, output: &Output) -> ExecutionResult {
        if output.stdout.len() > self.config.max_output_bytes {
            return ExecutionResult::InvalidOutput {
                raw: String::new(),
                detail: format!(
                    "reply of {} bytes exceeds the {} byte limit",
                    output.stdout.len(),
                    self.config.max_output_bytes
                ),
            };
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        match HarnessReply::parse(&stdout) {
            Some(reply) => reply.into_result(),
            None => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                ExecutionResult::RuntimeError {
                    kind: "SandboxCrash".to_string(),
                    message: format!(
                        "interpreter ended ({}) without a reply: {}",
                        output.status,
                        truncate(stderr.trim(), 1_000)
                    ),
                }
            }
        }
    }
}

#[async_trait]
impl Sandbox for ProcessSandbox {
    async fn execute(&self, source: &str, input: &Grid) -> ExecutionResult {
        if let Err(violation) = self.config.import_policy.check_source(source) {
            debug!(%violation, "candidate rejected before spawn");
            return ExecutionResult::SandboxViolation { violation };
        }

        let _permit = match Arc::clone(&self.workers).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => return unavailable("sandbox worker pool closed".to_string()),
        };

        let start = Instant::now();
        let deadline = start + Duration::from_millis(self.config.timeout_ms);
        let result = self.run_child(source, input, deadline).await;
        debug!(
            elapsed_ms = start.elapsed().as_millis() as u64,
            outcome = result.label(),
            "sandbox execution finished"
        );
        result
    }
}

/// `PATH` is the only variable children inherit, so the interpreter resolves
/// the same way it does for the host.
fn inherited_path() -> Option<(&'static str, std::ffi::OsString)> {
    std::env::var_os("PATH").map(|path| ("PATH", path))
}

fn unavailable(message: String) -> ExecutionResult {
    ExecutionResult::RuntimeError {
        kind: "SandboxUnavailable".to_string(),
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Violation;

    #[test]
    fn test_sandbox_config_default() {
        let cfg = SandboxConfig::default();
        assert_eq!(cfg.timeout_ms, 1_500);
        assert_eq!(cfg.max_workers, 8);
        assert_eq!(cfg.interpreter, "python3");
        assert!(cfg.import_policy.allows("numpy"));
    }

    #[test]
    fn test_cpu_seconds_rounds_up() {
        let cfg = SandboxConfig {
            timeout_ms: 1_500,
            ..SandboxConfig::default()
        };
        assert_eq!(cfg.cpu_seconds(), 3);
        assert_eq!(SandboxConfig { timeout_ms: 0, ..cfg }.cpu_seconds(), 1);
    }

    #[test]
    fn test_sandbox_config_partial_toml() {
        let cfg: SandboxConfig = toml::from_str("timeout_ms = 250\n").unwrap();
        assert_eq!(cfg.timeout_ms, 250);
        assert_eq!(cfg.max_workers, 8);
        assert_eq!(cfg.isolation, IsolationMode::Required);

        let cfg: SandboxConfig =
            toml::from_str("isolation = \"best_effort\"\n[limits]\nmemory_mb = 256\n").unwrap();
        assert_eq!(cfg.isolation, IsolationMode::BestEffort);
        assert_eq!(cfg.limits.memory_mb, Some(256));
        assert_eq!(cfg.limits.max_open_files, Some(256));
    }

    #[tokio::test]
    async fn test_disallowed_import_fails_closed_without_spawning() {
        let sandbox = ProcessSandbox::new(SandboxConfig {
            interpreter: "/nonexistent/interpreter".to_string(),
            ..SandboxConfig::default()
        });
        let grid = Grid::new(vec![vec![1]]).unwrap();
        let result = sandbox
            .execute("import os\n\ndef transform(g):\n    return g\n", &grid)
            .await;
        assert_eq!(
            result,
            ExecutionResult::SandboxViolation {
                violation: Violation::DisallowedImport {
                    module: "os".into()
                }
            }
        );
    }

    #[tokio::test]
    async fn test_missing_interpreter_is_runtime_error() {
        let sandbox = ProcessSandbox::new(SandboxConfig {
            interpreter: "/nonexistent/interpreter".to_string(),
            ..SandboxConfig::default()
        });
        let grid = Grid::new(vec![vec![1]]).unwrap();
        match sandbox.execute("def transform(g):\n    return g\n", &grid).await {
            ExecutionResult::RuntimeError { kind, .. } => assert_eq!(kind, "SandboxUnavailable"),
            other => panic!("expected RuntimeError, got {:?}", other),
        }
    }
}
