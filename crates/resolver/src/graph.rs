//! Dependency graph restricted to a package selection

use std::collections::{BTreeMap, BTreeSet};

/// Dependency graph over package names
///
/// Edges point from a package to the packages it depends on. Edges to
/// names outside the graph are dropped when added.
#[derive(Clone, Debug, Default)]
pub struct DependencyGraph {
    edges: BTreeMap<String, BTreeSet<String>>,
}

/// Result of ordering a graph
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OrderedPlan {
    /// Dependency closure of the roots, processed first
    pub leading: Vec<String>,
    pub rest: Vec<String>,
    /// `(package, unresolved deps)` for each package emitted early to cut a cycle
    pub cycles_broken: Vec<(String, Vec<String>)>,
}

impl OrderedPlan {
    /// Full processing order
    pub fn order(&self) -> impl Iterator<Item = &String> {
        self.leading.iter().chain(self.rest.iter())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.leading.len() + self.rest.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DependencyGraph {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a graph over `selected` using `depends` for each package's dependencies
    pub fn from_selection<'a, I, F>(selected: I, depends: F) -> Self
    where
        I: IntoIterator<Item = &'a str>,
        F: Fn(&str) -> Vec<String>,
    {
        let mut graph = Self::new();
        let names: Vec<&str> = selected.into_iter().collect();
        for name in &names {
            graph.add_node(name);
        }
        for name in &names {
            for dep in depends(name) {
                graph.add_edge(name, &dep);
            }
        }
        graph
    }

    pub fn add_node(&mut self, name: &str) {
        self.edges.entry(name.to_string()).or_default();
    }

    /// Record that `from` depends on `to`; ignored unless both are nodes
    pub fn add_edge(&mut self, from: &str, to: &str) {
        if from == to || !self.edges.contains_key(to) {
            return;
        }
        if let Some(deps) = self.edges.get_mut(from) {
            deps.insert(to.to_string());
        }
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.edges.contains_key(name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.edges.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    pub fn dependencies(&self, name: &str) -> impl Iterator<Item = &String> {
        self.edges.get(name).into_iter().flatten()
    }

    /// Check for cycles using DFS
    #[must_use]
    pub fn has_cycles(&self) -> bool {
        let mut visited = BTreeSet::new();
        let mut stack = BTreeSet::new();
        self.edges
            .keys()
            .any(|n| !visited.contains(n) && self.has_cycle_from(n, &mut visited, &mut stack))
    }

    fn has_cycle_from<'a>(
        &'a self,
        node: &'a String,
        visited: &mut BTreeSet<&'a String>,
        stack: &mut BTreeSet<&'a String>,
    ) -> bool {
        visited.insert(node);
        stack.insert(node);
        for dep in self.dependencies(node) {
            if stack.contains(dep) {
                return true;
            }
            if !visited.contains(dep) && self.has_cycle_from(dep, visited, stack) {
                return true;
            }
        }
        stack.remove(node);
        false
    }

    /// Roots present in the graph plus everything they transitively depend on
    #[must_use]
    pub fn closure<'a, I>(&self, roots: I) -> BTreeSet<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut seen = BTreeSet::new();
        let mut todo: Vec<String> = roots
            .into_iter()
            .filter(|r| self.contains(r))
            .map(str::to_string)
            .collect();
        while let Some(name) = todo.pop() {
            if seen.insert(name.clone()) {
                todo.extend(self.dependencies(&name).filter(|d| !seen.contains(*d)).cloned());
            }
        }
        seen
    }

    /// Best-effort order: the closure of `roots` first, then everything else
    #[must_use]
    pub fn order<'a, I>(&self, roots: I) -> OrderedPlan
    where
        I: IntoIterator<Item = &'a str>,
    {
        let leading_set = self.closure(roots);
        let mut plan = OrderedPlan::default();
        plan.leading = self.order_subset(&leading_set, &mut plan.cycles_broken);

        let rest_set: BTreeSet<String> = self
            .edges
            .keys()
            .filter(|n| !leading_set.contains(*n))
            .cloned()
            .collect();
        plan.rest = self.order_subset(&rest_set, &mut plan.cycles_broken);
        plan
    }

    /// Kahn's algorithm over `subset`, cutting cycles instead of failing
    ///
    /// Ready packages are taken in name order. When nothing is ready, the
    /// remaining package with the fewest unresolved dependencies (then the
    /// smallest name) is emitted and recorded in `broken`.
    fn order_subset(
        &self,
        subset: &BTreeSet<String>,
        broken: &mut Vec<(String, Vec<String>)>,
    ) -> Vec<String> {
        let mut unresolved: BTreeMap<&String, BTreeSet<&String>> = subset
            .iter()
            .map(|n| {
                let deps = self.dependencies(n).filter(|d| subset.contains(*d)).collect();
                (n, deps)
            })
            .collect();

        let mut dependents: BTreeMap<&String, Vec<&String>> = BTreeMap::new();
        for (node, deps) in &unresolved {
            for dep in deps {
                dependents.entry(*dep).or_default().push(*node);
            }
        }

        let mut ready: BTreeSet<&String> = unresolved
            .iter()
            .filter(|(_, deps)| deps.is_empty())
            .map(|(n, _)| *n)
            .collect();

        let mut order = Vec::with_capacity(subset.len());
        while !unresolved.is_empty() {
            let next = if let Some(first) = ready.pop_first() {
                first
            } else {
                let Some((node, deps)) = unresolved
                    .iter()
                    .min_by(|(a, da), (b, db)| da.len().cmp(&db.len()).then_with(|| a.cmp(b)))
                else {
                    break;
                };
                broken.push(((*node).clone(), deps.iter().map(|d| (*d).clone()).collect()));
                *node
            };

            unresolved.remove(next);
            ready.remove(next);
            order.push(next.clone());

            for dependent in dependents.get(next).into_iter().flatten() {
                if let Some(deps) = unresolved.get_mut(dependent) {
                    deps.remove(next);
                    if deps.is_empty() {
                        ready.insert(*dependent);
                    }
                }
            }
        }
        order
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph(edges: &[(&str, &[&str])]) -> DependencyGraph {
        let deps: BTreeMap<&str, Vec<String>> = edges
            .iter()
            .map(|(n, d)| (*n, d.iter().map(|s| (*s).to_string()).collect()))
            .collect();
        DependencyGraph::from_selection(edges.iter().map(|(n, _)| *n), |n| {
            deps.get(n).cloned().unwrap_or_default()
        })
    }

    fn pos(order: &[String], name: &str) -> usize {
        order.iter().position(|n| n == name).unwrap()
    }

    #[test]
    fn test_edges_outside_selection_are_dropped() {
        let g = graph(&[("a", &["b", "libc6"]), ("b", &["b"])]);
        assert_eq!(g.dependencies("a").collect::<Vec<_>>(), vec!["b"]);
        assert_eq!(g.dependencies("b").count(), 0);
        assert!(!g.has_cycles());
    }

    #[test]
    fn test_chain_orders_dependencies_first() {
        let g = graph(&[("a", &["b"]), ("b", &["c"]), ("c", &[])]);
        let plan = g.order([]);
        assert!(plan.leading.is_empty());
        assert_eq!(plan.rest, vec!["c", "b", "a"]);
        assert!(plan.cycles_broken.is_empty());
    }

    #[test]
    fn test_cycle_is_cut_deterministically() {
        // a <-> b, c depends on a
        let g = graph(&[("a", &["b"]), ("b", &["a"]), ("c", &["a"])]);
        assert!(g.has_cycles());

        let plan = g.order([]);
        assert_eq!(plan.rest, vec!["a", "b", "c"]);
        assert_eq!(
            plan.cycles_broken,
            vec![("a".to_string(), vec!["b".to_string()])]
        );
    }

    #[test]
    fn test_roots_closure_leads() {
        let g = graph(&[
            ("dpkg", &["libc6", "tar"]),
            ("tar", &["libacl1"]),
            ("libacl1", &[]),
            ("libc6", &[]),
            ("bash", &["libc6"]),
            ("zsh", &[]),
        ]);
        let plan = g.order(["dpkg", "not-selected"]);
        let leading: BTreeSet<_> = plan.leading.iter().cloned().collect();
        assert_eq!(
            leading,
            ["dpkg", "libacl1", "libc6", "tar"]
                .into_iter()
                .map(String::from)
                .collect()
        );
        assert_eq!(plan.rest, vec!["bash", "zsh"]);

        let order: Vec<String> = plan.order().cloned().collect();
        assert!(pos(&order, "libacl1") < pos(&order, "tar"));
        assert!(pos(&order, "tar") < pos(&order, "dpkg"));
    }
}
