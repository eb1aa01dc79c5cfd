//! Linux platform implementation

pub mod binary;
pub mod process;

use std::sync::Arc;

/// Linux platform implementation
pub struct LinuxPlatform;

impl LinuxPlatform {
    /// Create a new Linux platform instance
    #[allow(clippy::new_ret_no_self)]
    #[must_use]
    pub fn new() -> crate::core::Platform {
        use binary::LinuxBinaryOperations;
        use process::LinuxProcessOperations;

        crate::core::Platform::new(
            Arc::new(LinuxBinaryOperations::new()),
            Arc::new(LinuxProcessOperations::new()),
        )
    }
}
