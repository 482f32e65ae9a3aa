use anyhow::Result;
use async_trait::async_trait;
use std::fmt;
use std::process::ExitStatus;
use std::sync::Arc;
use std::time::Duration;

use crate::launch::LaunchSpec;

/// Unique identifier for an OS process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProcessId(pub u32);

impl From<u32> for ProcessId {
    fn from(pid: u32) -> Self {
        Self(pid)
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Result of one bounded blocking wait on a process handle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The process terminated
    Exited,
    /// The timeout elapsed while the process was still running
    TimedOut,
    /// The wait itself failed and cannot be retried
    Failed(String),
}

/// Error types for process operations
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("Failed to spawn process: {0}")]
    SpawnFailed(String),
    #[error("Process not found: {0}")]
    ProcessNotFound(ProcessId),
    #[error("Permission denied: {0}")]
    PermissionDenied(String),
    #[error("Not supported on this platform: {0}")]
    Unsupported(String),
    #[error("Other error: {0}")]
    Other(String),
}

impl ProcessError {
    /// The referenced process no longer exists
    pub fn is_gone(&self) -> bool {
        matches!(self, ProcessError::ProcessNotFound(_))
    }
}

/// Handle to a process this system spawned itself.
///
/// Waiting through this handle uses the parent/child linkage the OS already
/// maintains, which is cheaper than opening a watcher and also yields the
/// exit status.
#[async_trait]
pub trait LaunchHandle: Send + Sync {
    /// Get the process ID (None if the process has already been reaped)
    fn get_pid(&self) -> Option<ProcessId>;

    /// Executable file name of the spawned process (e.g. `launcher.exe`)
    fn get_name(&self) -> &str;

    /// Try to get exit status without blocking; `None` while still running
    async fn try_wait(&mut self) -> Result<Option<ExitStatus>>;

    /// Wait for the process to exit
    async fn wait(&mut self) -> Result<ExitStatus>;
}

/// Spawns external executables
#[async_trait]
pub trait ProcessLauncher: Send + Sync {
    /// Spawn the executable described by `spec`; returns as soon as the OS has
    /// created the process
    async fn spawn(&self, spec: &LaunchSpec) -> Result<Box<dyn LaunchHandle>, ProcessError>;
}

/// Queries against the OS process table
pub trait ProcessTable: Send + Sync {
    /// Find a running process by executable name (ASCII case-insensitive)
    fn find_pid_by_name(&self, name: &str) -> Option<ProcessId>;

    /// Check whether the process still exists
    fn is_alive(&self, pid: ProcessId) -> bool;
}

/// An open OS handle to a process. Dropping it releases the handle.
pub trait WaitHandle: Send {
    /// Block the calling thread for at most `timeout` waiting for exit
    fn wait_timeout(&mut self, timeout: Duration) -> WaitOutcome;
}

/// Native wait-for-process-exit primitive
pub trait ProcessWaiter: Send + Sync {
    /// Acquire a waitable handle; fails when the process has already exited or
    /// cannot be referenced
    fn open(&self, pid: ProcessId) -> Result<Box<dyn WaitHandle>, ProcessError>;
}

/// Native "which process owns the foreground window" primitive
pub trait ForegroundQuery: Send + Sync {
    /// Owner of the current foreground window; `Ok(None)` when no window has
    /// focus, `Err` when the primitive is unavailable
    fn foreground_pid(&self) -> Result<Option<ProcessId>, ProcessError>;

    /// Whether `pid` currently owns the foreground window
    fn is_focused(&self, pid: ProcessId) -> Result<bool, ProcessError> {
        Ok(self.foreground_pid()? == Some(pid))
    }
}

/// Foreground query for platforms without a usable primitive
#[derive(Debug, Default, Clone, Copy)]
pub struct NoForegroundQuery;

impl ForegroundQuery for NoForegroundQuery {
    fn foreground_pid(&self) -> Result<Option<ProcessId>, ProcessError> {
        Err(ProcessError::Unsupported(
            "foreground window query".to_string(),
        ))
    }
}

/// The full set of OS seams the tracking engine needs from one platform
#[derive(Clone)]
pub struct ProcessBackend {
    pub launcher: Arc<dyn ProcessLauncher>,
    pub table: Arc<dyn ProcessTable>,
    pub waiter: Arc<dyn ProcessWaiter>,
    pub foreground: Arc<dyn ForegroundQuery>,
}

/// Factory trait for creating platform-specific backends
pub trait ProcessBackendFactory {
    /// Create the backend for the current platform
    fn create_backend() -> ProcessBackend;

    /// Get the platform name for logging and debugging
    fn platform_name() -> &'static str;
}

/// Case-insensitive executable name comparison used across process lookups
pub fn process_names_match(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}
