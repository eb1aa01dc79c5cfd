//! Integration tests for resolver crate

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crossgrader_dpkg::testing::{FakePackage, FakePackageManager};
use crossgrader_events::{AppEvent, ResolverEvent};
use crossgrader_resolver::{DependencyGraph, ExecutionPlan, Resolver};
use proptest::prelude::*;

fn name(i: usize) -> String {
    format!("pkg{i:02}")
}

fn build(nodes: usize, edges: &[(usize, usize)]) -> DependencyGraph {
    let mut deps: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for &(from, to) in edges {
        deps.entry(name(from % nodes)).or_default().push(name(to % nodes));
    }
    let names: Vec<String> = (0..nodes).map(name).collect();
    DependencyGraph::from_selection(names.iter().map(String::as_str), |n| {
        deps.get(n).cloned().unwrap_or_default()
    })
}

proptest! {
    #[test]
    fn prop_order_is_a_permutation(
        nodes in 1usize..16,
        edges in prop::collection::vec((0usize..16, 0usize..16), 0..40),
        root in 0usize..16,
    ) {
        let graph = build(nodes, &edges);
        let root = name(root % nodes);
        let plan = graph.order([root.as_str()]);

        let ordered: Vec<&String> = plan.order().collect();
        let unique: BTreeSet<&String> = ordered.iter().copied().collect();
        prop_assert_eq!(ordered.len(), nodes);
        prop_assert_eq!(unique.len(), nodes);
    }

    #[test]
    fn prop_leading_is_the_root_closure(
        nodes in 1usize..16,
        edges in prop::collection::vec((0usize..16, 0usize..16), 0..40),
        root in 0usize..16,
    ) {
        let graph = build(nodes, &edges);
        let root = name(root % nodes);
        let plan = graph.order([root.as_str()]);

        let leading: BTreeSet<String> = plan.leading.iter().cloned().collect();
        prop_assert_eq!(&leading, &graph.closure([root.as_str()]));
        prop_assert!(leading.contains(&root));
        for name in &plan.rest {
            prop_assert!(!leading.contains(name));
        }
    }

    #[test]
    fn prop_acyclic_dependencies_come_first(
        nodes in 2usize..16,
        edges in prop::collection::vec((0usize..16, 0usize..16), 0..40),
    ) {
        // Only keep edges pointing at a lower index so the graph is a DAG
        let edges: Vec<(usize, usize)> = edges
            .into_iter()
            .map(|(a, b)| (a % nodes, b % nodes))
            .filter(|(a, b)| a > b)
            .collect();
        let graph = build(nodes, &edges);
        prop_assert!(!graph.has_cycles());

        let plan = graph.order(std::iter::empty());
        prop_assert!(plan.cycles_broken.is_empty());

        let position: BTreeMap<&String, usize> =
            plan.order().enumerate().map(|(i, n)| (n, i)).collect();
        for (from, to) in edges {
            prop_assert!(position[&name(to)] < position[&name(from)]);
        }
    }

    #[test]
    fn prop_batches_preserve_order(
        nodes in 1usize..16,
        edges in prop::collection::vec((0usize..16, 0usize..16), 0..40),
        root in 0usize..16,
        batch_size in 0usize..6,
    ) {
        let graph = build(nodes, &edges);
        let root = name(root % nodes);
        let ordered = graph.order([root.as_str()]);
        let plan = ExecutionPlan::from_ordered(&ordered, batch_size);

        let flat: Vec<&String> = plan.batches().iter().flatten().collect();
        let expected: Vec<&String> = ordered.order().collect();
        prop_assert_eq!(flat, expected);
        if batch_size > 0 {
            prop_assert!(plan.batches().iter().all(|b| b.len() <= batch_size));
        }
    }
}

#[tokio::test]
async fn test_resolver_uses_installed_dependencies() {
    let pm = FakePackageManager::new("amd64");
    pm.install(FakePackage::new("libc6", "amd64", "2.36"))
        .install(FakePackage::new("tar", "amd64", "1.34").depends(["libc6"]))
        .install(FakePackage::new("dpkg", "amd64", "1.21").depends(["libc6", "tar"]))
        .install(FakePackage::new("bash", "amd64", "5.2").depends(["libc6", "base-files"]))
        .install(FakePackage::new("hello", "amd64", "2.10").depends(["libc6"]));

    let (tx, mut rx) = crossgrader_events::channel();
    let resolver = Resolver::new(Arc::new(pm), vec!["dpkg".to_string()]).with_events(tx);

    let selected: Vec<String> = ["hello", "bash", "dpkg", "tar", "libc6"]
        .into_iter()
        .map(String::from)
        .collect();
    let (ordered, plan) = resolver.plan(&selected, 0).await.unwrap();

    assert_eq!(ordered.leading, vec!["libc6", "tar", "dpkg"]);
    assert_eq!(ordered.rest, vec!["bash", "hello"]);
    assert_eq!(plan.batches().len(), 2);

    let mut completed = false;
    while let Ok(msg) = rx.try_recv() {
        if let AppEvent::Resolver(ResolverEvent::OrderingCompleted {
            leading,
            total,
            batches,
            cycles_broken,
        }) = msg.event
        {
            assert_eq!((leading, total, batches, cycles_broken), (3, 5, 2, 0));
            completed = true;
        }
    }
    assert!(completed);
}

#[tokio::test]
async fn test_resolver_reports_cut_cycles() {
    let pm = FakePackageManager::new("amd64");
    pm.install(FakePackage::new("perl-base", "amd64", "5.36").depends(["perl"]))
        .install(FakePackage::new("perl", "amd64", "5.36").depends(["perl-base"]));

    let (tx, mut rx) = crossgrader_events::channel();
    let resolver = Resolver::new(Arc::new(pm), Vec::new()).with_events(tx);
    let selected = vec!["perl".to_string(), "perl-base".to_string()];
    let ordered = resolver.order(&selected).await.unwrap();

    assert_eq!(ordered.rest, vec!["perl", "perl-base"]);
    let cuts: Vec<String> = std::iter::from_fn(|| rx.try_recv().ok())
        .filter_map(|msg| match msg.event {
            AppEvent::Resolver(ResolverEvent::CycleBroken { package, .. }) => Some(package),
            _ => None,
        })
        .collect();
    assert_eq!(cuts, vec!["perl"]);
}
