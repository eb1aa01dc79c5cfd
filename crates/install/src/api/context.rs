use crossgrader_events::{EventEmitter, EventSender};
use crossgrader_types::{Arch, PackageRef};
use std::path::PathBuf;

/// One batch handed to the transaction executor
#[derive(Clone, Debug)]
pub struct BatchContext {
    /// Identifier carried by every event of the batch
    pub batch_id: String,
    /// Downloaded archives with the instance each one installs
    pub debs: Vec<(PackageRef, PathBuf)>,
    /// Run `apt-get install -f` after the configure step of each pass
    pub fix_broken: bool,
    /// Re-mark previously auto-installed names once their new instance converges
    pub preserve_auto: bool,

    /// Event sender for progress reporting
    pub event_sender: Option<EventSender>,
}

context_builder! {
    BatchContext {
        batch_id: String,
        debs: Vec<(PackageRef, PathBuf)>,
        fix_broken: bool,
        preserve_auto: bool,
    }
}

impl BatchContext {
    /// Add one downloaded archive to the batch
    #[must_use]
    pub fn add_deb(mut self, package: PackageRef, path: impl Into<PathBuf>) -> Self {
        self.debs.push((package, path.into()));
        self
    }
}

/// Removal of every listed package still installed in `arch`
#[derive(Clone, Debug)]
pub struct RemovalContext {
    pub arch: Arch,
    pub packages: Vec<String>,
    pub event_sender: Option<EventSender>,
}

impl RemovalContext {
    #[must_use]
    pub fn new(arch: Arch) -> Self {
        Self {
            arch,
            packages: Vec::new(),
            event_sender: None,
        }
    }

    #[must_use]
    pub fn with_packages(mut self, packages: Vec<String>) -> Self {
        self.packages = packages;
        self
    }

    #[must_use]
    pub fn with_event_sender(mut self, sender: EventSender) -> Self {
        self.event_sender = Some(sender);
        self
    }
}

impl EventEmitter for RemovalContext {
    fn event_sender(&self) -> Option<&EventSender> {
        self.event_sender.as_ref()
    }
}
