//! Dependency planner: turns `depends_on` / `parallel_group` declarations into
//! an ordered list of steps.
//!
//! Every parallel group is scheduled as a single unit whose dependencies are
//! the union of its members' dependencies; depending on any member means
//! depending on the whole group. Conditional edges are not part of the static
//! graph, so routing loops never count as cycles here.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::fmt;

use weft_core::error::ValidationError;

use crate::template::{ConditionalEdge, WorkflowTemplate};

/// One unit of scheduled work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Single(String),
    /// Members run concurrently; the step completes when all of them finish.
    Group { label: String, nodes: Vec<String> },
}

impl Step {
    pub fn nodes(&self) -> Vec<&str> {
        match self {
            Step::Single(id) => vec![id.as_str()],
            Step::Group { nodes, .. } => nodes.iter().map(|s| s.as_str()).collect(),
        }
    }

    pub fn contains(&self, node_id: &str) -> bool {
        match self {
            Step::Single(id) => id == node_id,
            Step::Group { nodes, .. } => nodes.iter().any(|n| n == node_id),
        }
    }

    /// Keep only members matching `keep`; `None` if nothing is left.
    fn retain(self, keep: impl Fn(&str) -> bool) -> Option<Step> {
        match self {
            Step::Single(id) => keep(id.as_str()).then_some(Step::Single(id)),
            Step::Group { label, nodes } => {
                let nodes: Vec<String> = nodes.into_iter().filter(|n| keep(n.as_str())).collect();
                match nodes.len() {
                    0 => None,
                    _ => Some(Step::Group { label, nodes }),
                }
            }
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Single(id) => write!(f, "{}", id),
            Step::Group { label, nodes } => write!(f, "[{}] {}", label, nodes.join(", ")),
        }
    }
}

/// Static execution order for a template.
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    steps: Vec<Step>,
    /// Node id -> index of the unit (group or single node) it belongs to.
    unit_of: HashMap<String, usize>,
    /// Unit index -> member node ids, declaration order.
    members: Vec<Vec<String>>,
    /// Unit index -> units that depend on it.
    dependents: Vec<BTreeSet<usize>>,
    /// Unit index -> units it depends on.
    dependencies: Vec<BTreeSet<usize>>,
}

impl ExecutionPlan {
    /// Build the plan, rejecting cyclic `depends_on` and malformed groups.
    pub fn build(template: &WorkflowTemplate) -> Result<Self, ValidationError> {
        let mut unit_of: HashMap<String, usize> = HashMap::new();
        let mut members: Vec<Vec<String>> = Vec::new();
        let mut labels: Vec<Option<String>> = Vec::new();
        let mut group_units: HashMap<&str, usize> = HashMap::new();

        for node in &template.nodes {
            let unit = match node.parallel_group.as_deref() {
                Some(group) => {
                    if template.edge_from(&node.id).is_some() {
                        return Err(ValidationError::ConditionalNodeInGroup {
                            node: node.id.clone(),
                            group: group.to_string(),
                        });
                    }
                    *group_units.entry(group).or_insert_with(|| {
                        members.push(Vec::new());
                        labels.push(Some(group.to_string()));
                        members.len() - 1
                    })
                }
                None => {
                    members.push(Vec::new());
                    labels.push(None);
                    members.len() - 1
                }
            };
            members[unit].push(node.id.clone());
            unit_of.insert(node.id.clone(), unit);
        }

        let unit_count = members.len();
        let mut dependencies = vec![BTreeSet::new(); unit_count];
        let mut dependents = vec![BTreeSet::new(); unit_count];
        for node in &template.nodes {
            let unit = unit_of[&node.id];
            for dep in &node.depends_on {
                let Some(&dep_unit) = unit_of.get(dep) else {
                    return Err(ValidationError::DanglingDependency {
                        node: node.id.clone(),
                        dependency: dep.clone(),
                    });
                };
                if dep_unit == unit {
                    return Err(match &labels[unit] {
                        Some(group) => ValidationError::IntraGroupDependency {
                            node: node.id.clone(),
                            dependency: dep.clone(),
                            group: group.clone(),
                        },
                        None => ValidationError::SelfDependency(node.id.clone()),
                    });
                }
                dependencies[unit].insert(dep_unit);
                dependents[dep_unit].insert(unit);
            }
        }

        // Kahn's algorithm; units become ready in declaration order.
        let mut in_degree: Vec<usize> = dependencies.iter().map(|d| d.len()).collect();
        let mut ready: BTreeSet<usize> = (0..unit_count).filter(|&u| in_degree[u] == 0).collect();
        let mut steps = Vec::with_capacity(unit_count);

        while let Some(unit) = ready.pop_first() {
            steps.push(match (&labels[unit], members[unit].len()) {
                (Some(label), n) if n > 1 => Step::Group {
                    label: label.clone(),
                    nodes: members[unit].clone(),
                },
                _ => Step::Single(members[unit][0].clone()),
            });
            for &next in &dependents[unit] {
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    ready.insert(next);
                }
            }
        }

        if steps.len() < unit_count {
            let cycle = find_cycle(&dependencies, &in_degree)
                .into_iter()
                .map(|u| match &labels[u] {
                    Some(label) => format!("[{}]", label),
                    None => members[u][0].clone(),
                })
                .collect();
            return Err(ValidationError::CyclicDependency { cycle });
        }

        Ok(Self {
            steps,
            unit_of,
            members,
            dependents,
            dependencies,
        })
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Node ids in planned order.
    pub fn node_order(&self) -> Vec<&str> {
        self.steps.iter().flat_map(|s| s.nodes()).collect()
    }

    /// Index of the step containing a node.
    pub fn position(&self, node_id: &str) -> Option<usize> {
        self.steps.iter().position(|s| s.contains(node_id))
    }

    /// Every node that (transitively) depends on `node_id`. Group siblings are
    /// not included, but the dependents of any sibling are.
    pub fn descendants(&self, node_id: &str) -> HashSet<String> {
        self.reachable(node_id, &self.dependents)
    }

    /// Every node `node_id` (transitively) depends on.
    pub fn ancestors(&self, node_id: &str) -> HashSet<String> {
        self.reachable(node_id, &self.dependencies)
    }

    fn reachable(&self, node_id: &str, edges: &[BTreeSet<usize>]) -> HashSet<String> {
        let Some(&start) = self.unit_of.get(node_id) else {
            return HashSet::new();
        };
        let mut seen = HashSet::new();
        let mut queue: VecDeque<usize> = edges[start].iter().copied().collect();
        while let Some(unit) = queue.pop_front() {
            if seen.insert(unit) {
                queue.extend(edges[unit].iter().copied());
            }
        }
        seen.into_iter()
            .flat_map(|u| self.members[u].iter().cloned())
            .collect()
    }

    /// Nodes on a static `depends_on` path from `from` to `to`, both included.
    pub fn path_between(&self, from: &str, to: &str) -> HashSet<String> {
        let mut forward = self.descendants(from);
        forward.insert(from.to_string());
        let mut backward = self.ancestors(to);
        backward.insert(to.to_string());
        forward.intersection(&backward).cloned().collect()
    }

    /// A fresh copy of the static steps, ready to be consumed by the engine.
    pub fn queue(&self) -> VecDeque<Step> {
        self.steps.iter().cloned().collect()
    }

    /// Apply a routing decision taken after `edge.from_node` ran.
    ///
    /// `has_run` reports whether a node was already attempted in this run.
    ///
    /// Targets of the edge that were not chosen and have not run yet are
    /// removed from `remaining`, along with their dependents that are neither
    /// ancestors nor dependents of `next`. A target that already ran (a loop
    /// head being exited) removes nothing.
    ///
    /// The chosen node is moved to the front, preceded by any of its
    /// dependencies that are still queued. When `next` already ran, the
    /// static path from `next` back to the routing node is queued after it
    /// so the loop body runs again.
    ///
    /// Returns the ids removed from `remaining` as unrouted.
    pub fn reroute(
        &self,
        remaining: &mut VecDeque<Step>,
        edge: &ConditionalEdge,
        next: &str,
        has_run: impl Fn(&str) -> bool,
    ) -> Vec<String> {
        let mut keep = self.descendants(next);
        keep.extend(self.ancestors(next));
        keep.insert(next.to_string());

        let mut dropped: HashSet<String> = HashSet::new();
        for target in edge.targets().into_iter().filter(|t| *t != next && !has_run(*t)) {
            if !keep.contains(target) {
                dropped.insert(target.to_string());
            }
            dropped.extend(self.descendants(target).into_iter().filter(|d| !keep.contains(d)));
        }

        let mut pending = if has_run(next) {
            self.path_between(next, &edge.from_node)
        } else {
            let queued: HashSet<&str> = remaining.iter().flat_map(|s| s.nodes()).collect();
            self.ancestors(next)
                .into_iter()
                .filter(|a| queued.contains(a.as_str()) && !has_run(a.as_str()))
                .collect()
        };
        pending.insert(next.to_string());

        // Plan order puts pending dependencies before `next` and the loop body after it.
        let front: Vec<Step> = self
            .steps
            .iter()
            .filter_map(|step| step.clone().retain(|n| pending.contains(n)))
            .collect();

        let mut skipped: Vec<String> = remaining
            .iter()
            .flat_map(|s| s.nodes())
            .filter(|n| dropped.contains(*n))
            .map(String::from)
            .collect();
        skipped.dedup();

        let mut remove = dropped;
        remove.extend(pending);
        let rest: Vec<Step> = remaining
            .drain(..)
            .filter_map(|s| s.retain(|n| !remove.contains(n)))
            .collect();

        remaining.extend(front);
        remaining.extend(rest);
        skipped
    }
}

impl fmt::Display for ExecutionPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, step) in self.steps.iter().enumerate() {
            writeln!(f, "{:>3}. {}", i + 1, step)?;
        }
        Ok(())
    }
}

/// Extract one cycle among the units Kahn's algorithm could not schedule.
fn find_cycle(dependencies: &[BTreeSet<usize>], in_degree: &[usize]) -> Vec<usize> {
    let stuck: BTreeSet<usize> = (0..in_degree.len()).filter(|&u| in_degree[u] > 0).collect();
    let Some(&start) = stuck.first() else {
        return vec![];
    };

    // Every stuck unit has a stuck dependency, so walking dependencies must revisit a unit.
    let mut path = vec![start];
    let mut seen: HashMap<usize, usize> = HashMap::from([(start, 0)]);
    let mut current = start;
    loop {
        let Some(&next) = dependencies[current].iter().find(|d| stuck.contains(d)) else {
            return path;
        };
        if let Some(&at) = seen.get(&next) {
            let mut cycle: Vec<usize> = path[at..].to_vec();
            cycle.reverse();
            cycle.insert(0, next);
            return cycle;
        }
        seen.insert(next, path.len());
        path.push(next);
        current = next;
    }
}
