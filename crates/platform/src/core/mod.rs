//! Core platform abstractions and context management

use crossgrader_events::{AppEvent, EventEmitter, EventSender};
use std::sync::Arc;

use crate::binary::BinaryOperations;
use crate::process::ProcessOperations;

/// Context for platform operations, providing event emission
#[derive(Clone, Default)]
pub struct PlatformContext {
    event_sender: Option<EventSender>,
}

impl PlatformContext {
    /// Create a new platform context with event emission capabilities
    pub fn new(event_sender: Option<EventSender>) -> Self {
        Self { event_sender }
    }

    /// Emit a platform event if event sender is available
    pub async fn emit_event(&self, event: AppEvent) {
        self.emit(event);
    }
}

impl EventEmitter for PlatformContext {
    fn event_sender(&self) -> Option<&EventSender> {
        self.event_sender.as_ref()
    }
}

/// Main platform abstraction providing access to all platform operations
///
/// Cloning is cheap; the operation tables are shared.
#[derive(Clone)]
pub struct Platform {
    binary_ops: Arc<dyn BinaryOperations>,
    process_ops: Arc<dyn ProcessOperations>,
}

impl Platform {
    /// Create a new platform instance with the specified implementations
    pub fn new(
        binary_ops: Arc<dyn BinaryOperations>,
        process_ops: Arc<dyn ProcessOperations>,
    ) -> Self {
        Self {
            binary_ops,
            process_ops,
        }
    }

    /// The running Linux system
    pub fn current() -> Self {
        crate::implementations::linux::LinuxPlatform::new()
    }

    pub fn binary(&self) -> &dyn BinaryOperations {
        &*self.binary_ops
    }

    pub fn process(&self) -> &dyn ProcessOperations {
        &*self.process_ops
    }

    /// Shared handle to the process operations for long-lived adapters
    pub fn process_handle(&self) -> Arc<dyn ProcessOperations> {
        Arc::clone(&self.process_ops)
    }

    /// Create a platform context with event emission
    pub fn create_context(&self, event_sender: Option<EventSender>) -> PlatformContext {
        PlatformContext::new(event_sender)
    }

    /// Convenience method: Execute a command and get output
    pub async fn execute_command(
        &self,
        ctx: &PlatformContext,
        cmd: crate::process::PlatformCommand,
    ) -> Result<crate::process::CommandOutput, crossgrader_errors::Error> {
        self.process().execute_command(ctx, cmd).await
    }

    /// Convenience method: Create a new command builder
    pub fn command(&self, program: &str) -> crate::process::PlatformCommand {
        self.process().create_command(program)
    }
}
