//! Property tests for validation and planning over generated fleets

use std::collections::{BTreeSet, HashMap};

use proptest::prelude::*;

use procfleet::domain::{DependencyConfig, Service, ServiceGroup};
use procfleet::{Config, DependencyValidator, Scope, StartupPlanner};

/// Group `i` may only depend on groups with a smaller index, so any mask is acyclic
fn dag_config(n: usize, masks: &[u8]) -> Config {
    let mut config = Config::default();
    for i in 0..n {
        let mut group = ServiceGroup::new(format!("g{}", i), format!("Group {}", i));
        group.order = (masks[i] % 3) as i32;
        group.dependencies = (0..i)
            .filter(|j| masks[i] & (1 << j) != 0)
            .map(|j| format!("g{}", j))
            .collect();
        config.groups.push(group);
    }
    config
}

fn service_config(n: usize, edges: &BTreeSet<(usize, usize)>, typed: bool) -> Config {
    let mut group = ServiceGroup::new("g", "G");
    for i in 0..n {
        let mut svc = Service::new(format!("s{}", i), format!("S{}", i), "g", "/bin/true");
        let targets: Vec<String> = edges
            .iter()
            .filter(|(from, _)| *from == i)
            .map(|(_, to)| format!("s{}", to))
            .collect();
        if typed {
            svc.dependency_configs =
                Some(targets.into_iter().map(DependencyConfig::required).collect());
        } else {
            svc.dependencies = targets;
        }
        group.services.push(svc);
    }
    Config {
        groups: vec![group],
        ..Config::default()
    }
}

fn has_cycle(config: &Config) -> bool {
    DependencyValidator::new()
        .validate(config)
        .errors
        .iter()
        .any(|e| e.message.starts_with("Circular dependencies detected"))
}

proptest! {
    #[test]
    fn acyclic_groups_plan_every_group_once(
        n in 1usize..8,
        masks in prop::collection::vec(any::<u8>(), 8),
    ) {
        let config = dag_config(n, &masks);

        let result = DependencyValidator::new().validate(&config);
        prop_assert!(result.valid, "{:?}", result.errors);

        let plan = StartupPlanner::plan(&config, Scope::All).unwrap();
        prop_assert_eq!(plan.order.len(), n);

        let position: HashMap<&str, usize> = plan
            .order
            .iter()
            .enumerate()
            .map(|(i, id)| (id.as_str(), i))
            .collect();
        prop_assert_eq!(position.len(), n);

        for group in &config.groups {
            for dep in &group.dependencies {
                prop_assert!(position[dep.as_str()] < position[group.id.as_str()]);
            }
        }
    }

    #[test]
    fn legacy_and_typed_edges_agree_on_cycles(
        n in 2usize..6,
        raw in prop::collection::vec((0usize..6, 0usize..6), 0..10),
    ) {
        let edges: BTreeSet<(usize, usize)> = raw
            .into_iter()
            .filter(|(from, to)| from < &n && to < &n && from != to)
            .collect();

        let legacy = service_config(n, &edges, false);
        let typed = service_config(n, &edges, true);

        prop_assert_eq!(has_cycle(&legacy), has_cycle(&typed));
        prop_assert_eq!(
            DependencyValidator::new().validate(&legacy).valid,
            DependencyValidator::new().validate(&typed).valid
        );
    }
}
