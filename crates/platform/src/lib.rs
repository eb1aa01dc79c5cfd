#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Platform abstraction layer for Debian systems.
//!
//! This crate provides a unified interface for the operating-system work the
//! crossgrader needs:
//! - Process execution with event emission and a fixed C locale
//! - Reading the machine type out of ELF headers
//! - Atomic file replacement and login shell discovery

pub mod binary;
pub mod core;
pub mod fs;
pub mod implementations;
pub mod process;
pub mod system;

pub use crate::core::{Platform, PlatformContext};
pub use implementations::linux::LinuxPlatform;

/// Re-export commonly used types
pub use binary::{BinaryFormat, BinaryOperations, ElfClass, ElfData, ElfHeader};
pub use process::{CommandOutput, PlatformCommand, ProcessOperations};
