#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Binary architecture guard
//!
//! Decides whether the system is safe to reboot after a crossgrade stage:
//! [`ArchVerifier`] compares ELF machine types with the target
//! architecture, the scan and pre-flight entry points apply it to many
//! files, and [`InitramfsHook`] wires the check into initramfs builds.

mod hook;
mod scan;
mod verifier;

pub use hook::{insert_snippet, render_snippet, InitramfsHook, HOOK_BEGIN, HOOK_END};
pub use scan::VerificationReport;
pub use verifier::{classify, ArchVerifier};
