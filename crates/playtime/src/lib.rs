//! Playtime - game launch and play-time tracking engine
//!
//! Launches a game, works out which OS process really is the game, watches it
//! until it exits and records the play session through the injected
//! collaborators. Platform specifics come from `playtime-unix` or
//! `playtime-windows`, selected at compile time.

mod catch;
mod events;
pub mod monitor;
mod orchestrator;
mod platform_factory;
mod registry;
mod selection;

pub use events::{DiscardReason, MonitoringPath, TrackerEvent};
pub use monitor::{
    ActiveTimeAccumulator, ActiveTimeHandle, ExitCause, ExitSignal, FocusEvent, FocusPoller,
    FocusSettings, FocusStrategy, ProcessWatcher,
};
pub use orchestrator::{LaunchOutcome, SessionOrchestrator};
pub use platform_factory::{PlatformBackendFactory, native_backend};
pub use registry::{Reservation, TrackingRegistry, TrackingSession, TrackingSnapshot, TrackingState};
pub use selection::{SelectionMailbox, SelectionMiss, SelectionSlot};

// Re-export core functionality
pub use playtime_core::*;
