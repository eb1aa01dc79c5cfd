use serde::{Deserialize, Serialize};

/// Resolver domain events for dependency ordering
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResolverEvent {
    OrderingStarted {
        packages: usize,
        roots: Vec<String>,
    },

    /// A dependency cycle was cut by emitting a package before all its dependencies
    CycleBroken {
        package: String,
        unresolved: Vec<String>,
    },

    OrderingCompleted {
        leading: usize,
        total: usize,
        batches: usize,
        cycles_broken: usize,
    },
}
