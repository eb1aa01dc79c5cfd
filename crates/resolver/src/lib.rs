#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Dependency ordering for the crossgrader
//!
//! Computes a best-effort processing order for a package selection:
//! dependencies before dependents wherever no cycle forbids it, with the
//! package manager's own runtime closure always leading. Cycles never fail
//! ordering; they are cut deterministically and reported.

mod execution;
mod graph;
mod resolver;

pub use execution::{ExecutionPlan, ExecutionStats};
pub use graph::{DependencyGraph, OrderedPlan};
pub use resolver::Resolver;
