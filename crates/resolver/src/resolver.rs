//! Ordering a selection against live dependency metadata

use crossgrader_dpkg::PackageManager;
use crossgrader_errors::Error;
use crossgrader_events::{AppEvent, EventEmitter, EventSender, ResolverEvent};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::execution::ExecutionPlan;
use crate::graph::{DependencyGraph, OrderedPlan};

/// Dependency order resolver
#[derive(Clone)]
pub struct Resolver {
    pm: Arc<dyn PackageManager>,
    /// Packages whose runtime closure always goes first
    roots: Vec<String>,
    tx: Option<EventSender>,
}

impl EventEmitter for Resolver {
    fn event_sender(&self) -> Option<&EventSender> {
        self.tx.as_ref()
    }
}

impl Resolver {
    pub fn new(pm: Arc<dyn PackageManager>, roots: Vec<String>) -> Self {
        Self {
            pm,
            roots,
            tx: None,
        }
    }

    #[must_use]
    pub fn with_events(mut self, tx: EventSender) -> Self {
        self.tx = Some(tx);
        self
    }

    /// Order `selected` using Depends/Pre-Depends of the installed instances
    ///
    /// Dependency metadata comes from a single read of the package database;
    /// instances of the same name in several architectures contribute the
    /// union of their dependencies.
    ///
    /// # Errors
    ///
    /// Returns an error if the package database cannot be read.
    pub async fn order(&self, selected: &[String]) -> Result<OrderedPlan, Error> {
        self.emit(AppEvent::Resolver(ResolverEvent::OrderingStarted {
            packages: selected.len(),
            roots: self.roots.clone(),
        }));

        let mut depends: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for pkg in self.pm.list_installed().await? {
            depends.entry(pkg.name).or_default().extend(pkg.depends);
        }

        let graph = DependencyGraph::from_selection(selected.iter().map(String::as_str), |name| {
            depends.get(name).cloned().unwrap_or_default()
        });
        let plan = graph.order(self.roots.iter().map(String::as_str));

        for (package, unresolved) in &plan.cycles_broken {
            self.emit(AppEvent::Resolver(ResolverEvent::CycleBroken {
                package: package.clone(),
                unresolved: unresolved.clone(),
            }));
        }
        Ok(plan)
    }

    /// Order `selected` and split it into executor batches
    ///
    /// # Errors
    ///
    /// Returns an error if the package database cannot be read.
    pub async fn plan(
        &self,
        selected: &[String],
        batch_size: usize,
    ) -> Result<(OrderedPlan, ExecutionPlan), Error> {
        let ordered = self.order(selected).await?;
        let plan = ExecutionPlan::from_ordered(&ordered, batch_size);
        self.emit(AppEvent::Resolver(ResolverEvent::OrderingCompleted {
            leading: ordered.leading.len(),
            total: ordered.len(),
            batches: plan.batches().len(),
            cycles_broken: ordered.cycles_broken.len(),
        }));
        Ok((ordered, plan))
    }
}
