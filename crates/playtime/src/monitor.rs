//! Process-level monitors: exit watching, foreground focus polling and
//! active-time accumulation.

mod active_time;
mod focus;
mod watcher;

pub use active_time::{ActiveTimeAccumulator, ActiveTimeHandle, FocusStrategy};
pub use focus::{FocusEvent, FocusPoller, FocusSettings};
pub use watcher::{ExitCause, ExitSignal, ProcessWatcher};
