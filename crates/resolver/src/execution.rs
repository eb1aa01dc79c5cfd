//! Batching of an ordered package list

use crate::graph::OrderedPlan;

/// Ordered batches handed to the transaction executor one at a time
///
/// The leading closure never shares a batch with the rest.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExecutionPlan {
    batches: Vec<Vec<String>>,
}

impl ExecutionPlan {
    /// Split `plan` into batches of at most `batch_size` packages (`0` = unbounded)
    #[must_use]
    pub fn from_ordered(plan: &OrderedPlan, batch_size: usize) -> Self {
        let mut batches = Vec::new();
        for part in [&plan.leading, &plan.rest] {
            if part.is_empty() {
                continue;
            }
            if batch_size == 0 {
                batches.push(part.clone());
            } else {
                batches.extend(part.chunks(batch_size).map(<[String]>::to_vec));
            }
        }
        Self { batches }
    }

    /// Plan with a single fixed batch, used for the emulation layer
    #[must_use]
    pub fn single(packages: Vec<String>) -> Self {
        if packages.is_empty() {
            Self::default()
        } else {
            Self {
                batches: vec![packages],
            }
        }
    }

    #[must_use]
    pub fn batches(&self) -> &[Vec<String>] {
        &self.batches
    }

    #[must_use]
    pub fn into_batches(self) -> Vec<Vec<String>> {
        self.batches
    }

    #[must_use]
    pub fn package_count(&self) -> usize {
        self.batches.iter().map(Vec::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }
}

/// Summary numbers for reporting a plan
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionStats {
    pub total_packages: usize,
    pub leading: usize,
    pub batch_count: usize,
    pub max_batch_size: usize,
    pub cycles_broken: usize,
}

impl ExecutionStats {
    #[must_use]
    pub fn from_plan(ordered: &OrderedPlan, plan: &ExecutionPlan) -> Self {
        Self {
            total_packages: plan.package_count(),
            leading: ordered.leading.len(),
            batch_count: plan.batches().len(),
            max_batch_size: plan.batches().iter().map(Vec::len).max().unwrap_or(0),
            cycles_broken: ordered.cycles_broken.len(),
        }
    }
}
