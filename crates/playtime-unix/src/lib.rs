//! Unix-specific process backend
#![cfg(unix)]

mod unix_process_manager;
#[cfg(target_os = "linux")]
mod x11_foreground;

pub use unix_process_manager::{
    SysinfoProcessTable, UnixLaunchHandle, UnixProcessLauncher, UnixProcessWaiter,
};
#[cfg(target_os = "linux")]
pub use x11_foreground::X11ForegroundQuery;

use playtime_core::{ProcessBackend, ProcessBackendFactory};
use std::sync::Arc;

/// Unix-specific backend factory
pub struct UnixBackendFactory;

impl ProcessBackendFactory for UnixBackendFactory {
    fn create_backend() -> ProcessBackend {
        #[cfg(target_os = "linux")]
        let foreground: Arc<dyn playtime_core::ForegroundQuery> =
            Arc::new(X11ForegroundQuery::new());

        // No portable foreground primitive elsewhere; active-time tracking
        // degrades to counting every second.
        #[cfg(not(target_os = "linux"))]
        let foreground: Arc<dyn playtime_core::ForegroundQuery> =
            Arc::new(playtime_core::NoForegroundQuery);

        ProcessBackend {
            launcher: Arc::new(UnixProcessLauncher::new()),
            table: Arc::new(SysinfoProcessTable::new()),
            waiter: Arc::new(UnixProcessWaiter::default()),
            foreground,
        }
    }

    fn platform_name() -> &'static str {
        "Unix"
    }
}
