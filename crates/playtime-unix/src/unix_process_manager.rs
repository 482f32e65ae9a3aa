use anyhow::Result;
use async_trait::async_trait;
use nix::errno::Errno;
use nix::sys::signal;
use nix::unistd::Pid as NixPid;
use parking_lot::Mutex;
use playtime_core::{
    LaunchHandle, LaunchSpec, ProcessError, ProcessId, ProcessLauncher, ProcessTable,
    ProcessWaiter, WaitHandle, WaitOutcome, process_names_match,
};
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};
use sysinfo::{ProcessRefreshKind, ProcessesToUpdate, System, UpdateKind};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

/// Unix-specific handle to a spawned launcher
pub struct UnixLaunchHandle {
    child: Child,
    pid: Option<ProcessId>,
    name: String,
}

impl UnixLaunchHandle {
    pub fn new(child: Child, name: String) -> Self {
        let pid = child.id().map(ProcessId::from);
        Self { child, pid, name }
    }
}

#[async_trait]
impl LaunchHandle for UnixLaunchHandle {
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
pub struct UnixProcessLauncher;

impl UnixProcessLauncher {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ProcessLauncher for UnixProcessLauncher {
    async fn spawn(&self, spec: &LaunchSpec) -> Result<Box<dyn LaunchHandle>, ProcessError> {
        let mut cmd = Command::new(&spec.executable);
        cmd.args(&spec.args).stdin(Stdio::null());

        if let Some(dir) = &spec.working_directory {
            cmd.current_dir(dir);
        }

        for (key, value) in &spec.env {
            cmd.env(key, value);
        }

        // Own process group: a terminal Ctrl+C aimed at the tracker must not
        // take the game down with it.
        cmd.process_group(0);

        let child = cmd.spawn().map_err(|e| {
            ProcessError::SpawnFailed(format!("{}: {e}", spec.executable.display()))
        })?;

        if let Some(pid) = child.id() {
            info!(
                pid = %pid,
                executable = %spec.executable.display(),
                args = ?spec.args,
                "Spawned Unix process"
            );
        }

        Ok(Box::new(UnixLaunchHandle::new(child, spec.executable_name())))
    }
}

/// Probe process existence with signal 0
fn probe(pid: ProcessId) -> Result<bool, ProcessError> {
    // kill() reads zero and negative pids as process groups
    let raw = i32::try_from(pid.0)
        .ok()
        .filter(|raw| *raw > 0)
        .ok_or(ProcessError::ProcessNotFound(pid))?;
    let nix_pid = NixPid::from_raw(raw);
    match signal::kill(nix_pid, None) {
        Ok(()) => Ok(!is_zombie(pid)),
        Err(Errno::ESRCH) => Ok(false),
        // Exists but belongs to another user
        Err(Errno::EPERM) => Ok(true),
        Err(e) => Err(ProcessError::Other(format!("kill(0) on {pid} failed: {e}"))),
    }
}

/// A terminated but unreaped process still answers signal 0
#[cfg(target_os = "linux")]
fn is_zombie(pid: ProcessId) -> bool {
    std::fs::read_to_string(format!("/proc/{}/stat", pid.0))
        .ok()
        .and_then(|stat| {
            stat.rsplit_once(')')
                .map(|(_, rest)| rest.trim_start().starts_with('Z'))
        })
        .unwrap_or(false)
}

#[cfg(not(target_os = "linux"))]
fn is_zombie(_pid: ProcessId) -> bool {
    false
}

/// Bounded wait built on liveness probes.
///
/// Unix has no wait primitive for processes that are not our children, so
/// each slice re-probes at `probe_interval` until the slice runs out.
pub struct UnixWaitHandle {
    pid: ProcessId,
    probe_interval: Duration,
}

impl WaitHandle for UnixWaitHandle {
    fn wait_timeout(&mut self, timeout: Duration) -> WaitOutcome {
        let deadline = Instant::now() + timeout;
        loop {
            match probe(self.pid) {
                Ok(false) => return WaitOutcome::Exited,
                Ok(true) => {}
                Err(e) => return WaitOutcome::Failed(e.to_string()),
            }

            let now = Instant::now();
            if now >= deadline {
                return WaitOutcome::TimedOut;
            }
            std::thread::sleep(self.probe_interval.min(deadline - now));
        }
    }
}

impl Drop for UnixWaitHandle {
    fn drop(&mut self) {
        debug!(pid = %self.pid, "Released Unix wait handle");
    }
}

pub struct UnixProcessWaiter {
    probe_interval: Duration,
}

impl Default for UnixProcessWaiter {
    fn default() -> Self {
        Self::new(Duration::from_millis(100))
    }
}

impl UnixProcessWaiter {
    pub fn new(probe_interval: Duration) -> Self {
        Self { probe_interval }
    }
}

impl ProcessWaiter for UnixProcessWaiter {
    fn open(&self, pid: ProcessId) -> Result<Box<dyn WaitHandle>, ProcessError> {
        if !probe(pid)? {
            return Err(ProcessError::ProcessNotFound(pid));
        }

        Ok(Box::new(UnixWaitHandle {
            pid,
            probe_interval: self.probe_interval,
        }))
    }
}

/// Process-table lookups backed by `sysinfo`
pub struct SysinfoProcessTable {
    system: Mutex<System>,
}

impl Default for SysinfoProcessTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SysinfoProcessTable {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }
}

impl ProcessTable for SysinfoProcessTable {
    fn find_pid_by_name(&self, name: &str) -> Option<ProcessId> {
        let mut system = self.system.lock();
        system.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::nothing().with_exe(UpdateKind::OnlyIfNotSet),
        );

        // The kernel truncates comm to 15 bytes, so also match the exe name
        let found = system
            .processes()
            .iter()
            .filter(|(_, process)| {
                process_names_match(&process.name().to_string_lossy(), name)
                    || process
                        .exe()
                        .and_then(|exe| exe.file_name())
                        .is_some_and(|exe| process_names_match(&exe.to_string_lossy(), name))
            })
            .map(|(pid, _)| ProcessId(pid.as_u32()))
            .min();

        if found.is_none() {
            debug!(name = %name, "No running process matches name");
        }
        found
    }

    fn is_alive(&self, pid: ProcessId) -> bool {
        match probe(pid) {
            Ok(alive) => alive,
            Err(e) if e.is_gone() => false,
            Err(e) => {
                warn!(pid = %pid, error = %e, "Liveness probe failed");
                false
            }
        }
    }
}
