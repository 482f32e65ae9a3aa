use playtime_core::{ProcessBackend, ProcessBackendFactory};
use tracing::info;

/// Platform-independent factory that selects the appropriate backend at compile time
pub struct PlatformBackendFactory;

impl ProcessBackendFactory for PlatformBackendFactory {
    fn create_backend() -> ProcessBackend {
        info!(platform = Self::platform_name(), "Creating native process backend");

        #[cfg(unix)]
        return playtime_unix::UnixBackendFactory::create_backend();

        #[cfg(windows)]
        return playtime_windows::WindowsBackendFactory::create_backend();

        #[cfg(not(any(unix, windows)))]
        compile_error!("Unsupported platform: only Unix and Windows are currently supported");
    }

    fn platform_name() -> &'static str {
        #[cfg(unix)]
        return playtime_unix::UnixBackendFactory::platform_name();

        #[cfg(windows)]
        return playtime_windows::WindowsBackendFactory::platform_name();

        #[cfg(not(any(unix, windows)))]
        return "Unknown";
    }
}

/// Backend for the platform this binary was built for
pub fn native_backend() -> ProcessBackend {
    PlatformBackendFactory::create_backend()
}
