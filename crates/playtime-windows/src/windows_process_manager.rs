use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use playtime_core::{
    ForegroundQuery, LaunchHandle, LaunchSpec, ProcessError, ProcessId, ProcessLauncher,
    ProcessTable, ProcessWaiter, WaitHandle, WaitOutcome, process_names_match,
};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use sysinfo::{ProcessRefreshKind, ProcessesToUpdate, System};
use tokio::process::{Child, Command};
use tracing::{debug, info};
use windows::Win32::Foundation::{
    CloseHandle, ERROR_ACCESS_DENIED, ERROR_INVALID_PARAMETER, HANDLE, WAIT_OBJECT_0,
    WAIT_TIMEOUT,
};
use windows::Win32::System::Threading::{
    OpenProcess, PROCESS_ACCESS_RIGHTS, PROCESS_SYNCHRONIZE, WaitForSingleObject,
};
use windows::Win32::UI::WindowsAndMessaging::{GetForegroundWindow, GetWindowThreadProcessId};

/// Windows-specific handle to a spawned launcher
pub struct WindowsLaunchHandle {
    child: Child,
    pid: Option<ProcessId>,
    name: String,
}

impl WindowsLaunchHandle {
    pub fn new(child: Child, name: String) -> Self {
        let pid = child.id().map(ProcessId::from);
        Self { child, pid, name }
    }
}

#[async_trait]
impl LaunchHandle for WindowsLaunchHandle {
    fn get_pid(&self) -> Option<ProcessId> {
        self.pid
    }

    fn get_name(&self) -> &str {
        &self.name
    }

    async fn try_wait(&mut self) -> Result<Option<ExitStatus>> {
        Ok(self.child.try_wait()?)
    }

    async fn wait(&mut self) -> Result<ExitStatus> {
        Ok(self.child.wait().await?)
    }
}

/// Spawns game executables with `tokio::process`
#[derive(Debug, Default)]
pub struct WindowsProcessLauncher;

impl WindowsProcessLauncher {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ProcessLauncher for WindowsProcessLauncher {
    async fn spawn(&self, spec: &LaunchSpec) -> Result<Box<dyn LaunchHandle>, ProcessError> {
        let mut cmd = Command::new(&spec.executable);
        cmd.args(&spec.args).stdin(Stdio::null());

        if let Some(dir) = &spec.working_directory {
            cmd.current_dir(dir);
        }

        for (key, value) in &spec.env {
            cmd.env(key, value);
        }

        let child = cmd.spawn().map_err(|e| {
            ProcessError::SpawnFailed(format!("{}: {e}", spec.executable.display()))
        })?;

        if let Some(pid) = child.id() {
            info!(
                pid = %pid,
                executable = %spec.executable.display(),
                args = ?spec.args,
                "Spawned Windows process"
            );
        }

        Ok(Box::new(WindowsLaunchHandle::new(
            child,
            spec.executable_name(),
        )))
    }
}

/// Owned process HANDLE, closed on drop
struct OwnedHandle(HANDLE);

// A process HANDLE is a kernel object reference usable from any thread.
unsafe impl Send for OwnedHandle {}

impl OwnedHandle {
    fn open(pid: ProcessId, access: PROCESS_ACCESS_RIGHTS) -> Result<Self, ProcessError> {
        let handle = unsafe { OpenProcess(access, false, pid.0) }.map_err(|e| {
            if e.code() == ERROR_INVALID_PARAMETER.to_hresult() {
                ProcessError::ProcessNotFound(pid)
            } else if e.code() == ERROR_ACCESS_DENIED.to_hresult() {
                ProcessError::PermissionDenied(format!("OpenProcess({pid}): {e}"))
            } else {
                ProcessError::Other(format!("OpenProcess({pid}): {e}"))
            }
        })?;

        if handle.is_invalid() {
            return Err(ProcessError::ProcessNotFound(pid));
        }
        Ok(Self(handle))
    }

    /// A process object is signalled once it exits, whatever its exit code
    fn is_running(&self) -> bool {
        unsafe { WaitForSingleObject(self.0, 0) == WAIT_TIMEOUT }
    }
}

impl Drop for OwnedHandle {
    fn drop(&mut self) {
        let _ = unsafe { CloseHandle(self.0) };
    }
}

/// `WaitForSingleObject` on a SYNCHRONIZE handle
pub struct WindowsWaitHandle {
    pid: ProcessId,
    handle: OwnedHandle,
}

impl WaitHandle for WindowsWaitHandle {
    fn wait_timeout(&mut self, timeout: Duration) -> WaitOutcome {
        let millis = u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX - 1);
        let result = unsafe { WaitForSingleObject(self.handle.0, millis) };

        if result == WAIT_OBJECT_0 {
            WaitOutcome::Exited
        } else if result == WAIT_TIMEOUT {
            WaitOutcome::TimedOut
        } else {
            let error = windows::core::Error::from_win32();
            WaitOutcome::Failed(format!("WaitForSingleObject({}): {error}", self.pid))
        }
    }
}

impl Drop for WindowsWaitHandle {
    fn drop(&mut self) {
        debug!(pid = %self.pid, "Released Windows process handle");
    }
}

#[derive(Debug, Default)]
pub struct WindowsProcessWaiter;

impl ProcessWaiter for WindowsProcessWaiter {
    fn open(&self, pid: ProcessId) -> Result<Box<dyn WaitHandle>, ProcessError> {
        let handle = OwnedHandle::open(pid, PROCESS_SYNCHRONIZE)?;

        // A handle to an exited process is still valid; report it as gone
        if !handle.is_running() {
            return Err(ProcessError::ProcessNotFound(pid));
        }
        Ok(Box::new(WindowsWaitHandle { pid, handle }))
    }
}

/// Process-table lookups backed by `sysinfo`
pub struct WindowsProcessTable {
    system: Mutex<System>,
}

impl Default for WindowsProcessTable {
    fn default() -> Self {
        Self::new()
    }
}

impl WindowsProcessTable {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }
}

impl ProcessTable for WindowsProcessTable {
    fn find_pid_by_name(&self, name: &str) -> Option<ProcessId> {
        let mut system = self.system.lock();
        system.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::nothing(),
        );

        system
            .processes()
            .iter()
            .filter(|(_, process)| process_names_match(&process.name().to_string_lossy(), name))
            .map(|(pid, _)| ProcessId(pid.as_u32()))
            .min()
    }

    fn is_alive(&self, pid: ProcessId) -> bool {
        OwnedHandle::open(pid, PROCESS_SYNCHRONIZE)
            .map(|handle| handle.is_running())
            .unwrap_or(false)
    }
}

/// `GetForegroundWindow` + `GetWindowThreadProcessId`
#[derive(Debug, Default)]
pub struct WindowsForegroundQuery;

impl ForegroundQuery for WindowsForegroundQuery {
    fn foreground_pid(&self) -> Result<Option<ProcessId>, ProcessError> {
        let hwnd = unsafe { GetForegroundWindow() };
        if hwnd.is_invalid() {
            return Ok(None);
        }

        let mut pid: u32 = 0;
        unsafe { GetWindowThreadProcessId(hwnd, Some(&mut pid)) };
        Ok((pid != 0).then_some(ProcessId(pid)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_process_is_alive() {
        let table = WindowsProcessTable::new();
        assert!(table.is_alive(ProcessId(std::process::id())));
    }

    #[test]
    fn test_wait_on_running_process_times_out() {
        let waiter = WindowsProcessWaiter;
        let mut handle = waiter.open(ProcessId(std::process::id())).unwrap();
        assert_eq!(
            handle.wait_timeout(Duration::from_millis(20)),
            WaitOutcome::TimedOut
        );
    }

    #[tokio::test]
    async fn test_process_exiting_with_still_active_code_is_not_running() {
        let mut child = Command::new("cmd")
            .args(["/C", "exit 259"])
            .spawn()
            .unwrap();
        let pid = ProcessId(child.id().unwrap());
        let status = child.wait().await.unwrap();
        assert_eq!(status.code(), Some(259));

        // `child` still owns its handle, so the pid cannot be reused yet
        assert!(!WindowsProcessTable::new().is_alive(pid));
        assert!(matches!(
            WindowsProcessWaiter.open(pid),
            Err(ProcessError::ProcessNotFound(_))
        ));
        drop(child);
    }

    #[test]
    #[ignore] // Requires an interactive desktop
    fn test_foreground_pid() {
        println!("Foreground owner: {:?}", WindowsForegroundQuery.foreground_pid());
    }
}
