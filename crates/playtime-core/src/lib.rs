//! Playtime Core - Platform-independent abstractions and configurations
//!
//! This crate provides the data model, the OS seams and the collaborator
//! traits shared by the tracking engine and the platform-specific backends.

mod collaborators;
mod config;
mod error;
mod launch;
mod process;

pub use collaborators::*;
pub use config::*;
pub use error::*;
pub use launch::*;
pub use process::*;
