//! Windows-specific process backend
#![cfg(windows)]

mod windows_process_manager;

pub use windows_process_manager::{
    WindowsForegroundQuery, WindowsLaunchHandle, WindowsProcessLauncher, WindowsProcessTable,
    WindowsProcessWaiter,
};

use playtime_core::{ProcessBackend, ProcessBackendFactory};
use std::sync::Arc;

/// Windows-specific backend factory
pub struct WindowsBackendFactory;

impl ProcessBackendFactory for WindowsBackendFactory {
    fn create_backend() -> ProcessBackend {
        ProcessBackend {
            launcher: Arc::new(WindowsProcessLauncher::new()),
            table: Arc::new(WindowsProcessTable::new()),
            waiter: Arc::new(WindowsProcessWaiter),
            foreground: Arc::new(WindowsForegroundQuery),
        }
    }

    fn platform_name() -> &'static str {
        "Windows"
    }
}
