//! Dependency-aware stop/start planning.
//!
//! Edges come from the depends-on label and from legacy runtime links. The
//! stop order puts dependents before their dependencies; the start order is
//! its reverse. Ties are broken by original enumeration order so identical
//! snapshots always produce identical plans.

use std::collections::HashMap;

use crate::container::Container;

/// The ordered outcome of planning over one snapshot. All vectors hold
/// indices into the snapshot slice.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Plan {
    /// Every non-cycle container, dependents before dependencies.
    pub stop_order: Vec<usize>,
    /// Members of dependency cycles, reported and excluded from the orders.
    pub cycle: Vec<usize>,
}

impl Plan {
    /// Start order is the reverse of the stop order.
    pub fn start_order(&self) -> impl Iterator<Item = usize> + '_ {
        self.stop_order.iter().rev().copied()
    }
}

/// Indices each container depends on, resolved by name within the snapshot.
/// Dependencies outside the snapshot are ignored.
fn dependency_edges(containers: &[Container], label_precedence: bool) -> Vec<Vec<usize>> {
    let by_name: HashMap<&str, usize> = containers
        .iter()
        .enumerate()
        .map(|(i, c)| (c.name(), i))
        .collect();

    containers
        .iter()
        .map(|c| {
            c.dependency_names(label_precedence)
                .iter()
                .filter_map(|name| by_name.get(name.as_str()).copied())
                .collect()
        })
        .collect()
}

pub fn plan(containers: &[Container], label_precedence: bool) -> Plan {
    let deps = dependency_edges(containers, label_precedence);
    let mut placed = vec![false; containers.len()];
    let mut start_order = Vec::with_capacity(containers.len());

    // Repeated sweeps in index order: dependencies are placed before their
    // dependents, and ties fall back to enumeration order. Whatever is left
    // when no sweep makes progress sits on a cycle.
    loop {
        let mut progressed = false;
        for i in 0..containers.len() {
            if !placed[i] && deps[i].iter().all(|&d| placed[d]) {
                placed[i] = true;
                start_order.push(i);
                progressed = true;
            }
        }
        if !progressed {
            break;
        }
    }

    let cycle = (0..containers.len()).filter(|&i| !placed[i]).collect();
    let stop_order = start_order.into_iter().rev().collect();
    Plan { stop_order, cycle }
}

/// Rolling-restart planning: one group per stale container, holding the
/// container itself and its transitive dependents, in stop order. Cycle
/// members never end up in a group.
pub fn rolling_groups(
    containers: &[Container],
    stale: &[bool],
    label_precedence: bool,
) -> Vec<Vec<usize>> {
    let full = plan(containers, label_precedence);
    let deps = dependency_edges(containers, label_precedence);

    // dependents[j] = containers that depend on j
    let mut dependents = vec![Vec::new(); containers.len()];
    for (i, dep_list) in deps.iter().enumerate() {
        for &d in dep_list {
            dependents[d].push(i);
        }
    }

    let mut groups = Vec::new();
    for (i, &is_stale) in stale.iter().enumerate() {
        if !is_stale || full.cycle.contains(&i) {
            continue;
        }
        let mut members = vec![false; containers.len()];
        members[i] = true;
        let mut queue = vec![i];
        while let Some(current) = queue.pop() {
            for &dependent in &dependents[current] {
                if !members[dependent] {
                    members[dependent] = true;
                    queue.push(dependent);
                }
            }
        }
        groups.push(
            full.stop_order
                .iter()
                .copied()
                .filter(|&j| members[j])
                .collect(),
        );
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::testing::container;
    use crate::container::DEPENDS_ON_LABEL;

    fn named(names_and_deps: &[(&str, &str)]) -> Vec<Container> {
        names_and_deps
            .iter()
            .map(|(name, deps)| {
                let labels: Vec<(&str, &str)> = if deps.is_empty() {
                    Vec::new()
                } else {
                    vec![(DEPENDS_ON_LABEL, *deps)]
                };
                container(name, "img", &labels, &[], true)
            })
            .collect()
    }

    #[test]
    fn independent_containers_keep_enumeration_order() {
        let containers = named(&[("a", ""), ("b", ""), ("c", "")]);
        let plan = plan(&containers, false);
        assert_eq!(plan.stop_order, vec![2, 1, 0]);
        assert_eq!(plan.start_order().collect::<Vec<_>>(), vec![0, 1, 2]);
        assert!(plan.cycle.is_empty());
    }

    #[test]
    fn dependents_stop_before_dependencies() {
        // web -> db, worker -> db
        let containers = named(&[("web", "db"), ("db", ""), ("worker", "db")]);
        let plan = plan(&containers, false);

        let stop_pos = |name: &str| {
            let idx = containers.iter().position(|c| c.name() == name).unwrap();
            plan.stop_order.iter().position(|&i| i == idx).unwrap()
        };
        assert!(stop_pos("web") < stop_pos("db"));
        assert!(stop_pos("worker") < stop_pos("db"));
    }

    #[test]
    fn links_create_edges_too() {
        let web = container("web", "nginx", &[], &["/db:/web/db"], true);
        let db = container("db", "postgres", &[], &[], true);
        let containers = vec![web, db];
        let plan = plan(&containers, false);
        assert_eq!(plan.stop_order, vec![0, 1]);
    }

    #[test]
    fn identical_snapshots_give_identical_plans() {
        let containers = named(&[("a", "c"), ("b", ""), ("c", "b"), ("d", "")]);
        let first = plan(&containers, false);
        let second = plan(&containers, false);
        assert_eq!(first, second);
    }

    #[test]
    fn cycle_members_are_reported_and_excluded() {
        let containers = named(&[("a", "b"), ("b", "a"), ("c", "")]);
        let plan = plan(&containers, false);
        assert_eq!(plan.cycle, vec![0, 1]);
        assert_eq!(plan.stop_order, vec![2]);
    }

    #[test]
    fn unknown_dependencies_are_ignored() {
        let containers = named(&[("a", "ghost"), ("b", "")]);
        let plan = plan(&containers, false);
        assert!(plan.cycle.is_empty());
        assert_eq!(plan.stop_order.len(), 2);
    }

    #[test]
    fn rolling_groups_isolate_transitive_dependents() {
        // api -> db, web -> api, cache independent; db and cache stale
        let containers = named(&[("db", ""), ("api", "db"), ("web", "api"), ("cache", "")]);
        let stale = vec![true, false, false, true];
        let groups = rolling_groups(&containers, &stale, false);

        assert_eq!(groups.len(), 2);
        // group for db: web stops first, then api, then db
        assert_eq!(groups[0], vec![2, 1, 0]);
        // group for cache: just cache
        assert_eq!(groups[1], vec![3]);
    }

    #[test]
    fn rolling_groups_skip_cycle_members() {
        let containers = named(&[("a", "b"), ("b", "a")]);
        let groups = rolling_groups(&containers, &[true, true], false);
        assert!(groups.is_empty());
    }
}
