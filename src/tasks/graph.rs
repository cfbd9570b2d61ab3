//! Dependency-graph validation and queries.
//!
//! Validation runs before any task file is written, so a rejected plan never
//! leaves a partially created task set. Cycle detection is an iterative
//! three-color depth-first traversal over an index-addressed task array —
//! no recursion depth limit, O(V+E).

use std::collections::BTreeMap;

use super::model::TaskStatus;

/// Minimal view of a task for graph purposes. Built from existing tasks or
/// from a not-yet-written plan (status `pending`).
#[derive(Debug, Clone)]
pub struct TaskNode {
    pub id: String,
    pub status: TaskStatus,
    pub depends_on: Vec<String>,
}

/// Graph validation failures. All are fatal and raised before any write;
/// messages reference the offending entries.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    #[error("task {task} depends on unknown task {reference}")]
    UnknownDependency { task: String, reference: String },

    #[error("task {task} depends on itself")]
    SelfDependency { task: String },

    #[error("dependency cycle detected: {}", path.join(" -> "))]
    CycleDetected { path: Vec<String> },

    #[error("dependency references unknown task order {order}")]
    UnknownOrder { order: u32 },

    #[error("duplicate task order {order}")]
    DuplicateOrder { order: u32 },
}

/// Pending tasks split by dependency readiness. Every pending task appears
/// in exactly one side; non-pending tasks appear in neither.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskPartition {
    /// Pending tasks whose every dependency is `done`.
    pub runnable: Vec<String>,
    /// Pending task id → its unsatisfied dependency ids.
    pub blocked: BTreeMap<String, Vec<String>>,
}

#[derive(Clone, Copy, PartialEq)]
enum Color {
    White,
    Gray,
    Black,
}

/// Reject unknown references, self-dependencies, and cycles.
pub fn validate_dependency_graph(nodes: &[TaskNode]) -> Result<(), GraphError> {
    let index: BTreeMap<&str, usize> = nodes
        .iter()
        .enumerate()
        .map(|(i, n)| (n.id.as_str(), i))
        .collect();

    for node in nodes {
        for dep in &node.depends_on {
            if dep == &node.id {
                return Err(GraphError::SelfDependency {
                    task: node.id.clone(),
                });
            }
            if !index.contains_key(dep.as_str()) {
                return Err(GraphError::UnknownDependency {
                    task: node.id.clone(),
                    reference: dep.clone(),
                });
            }
        }
    }

    let adjacency: Vec<Vec<usize>> = nodes
        .iter()
        .map(|n| {
            n.depends_on
                .iter()
                .filter_map(|d| index.get(d.as_str()).copied())
                .collect()
        })
        .collect();

    let mut color = vec![Color::White; nodes.len()];
    for start in 0..nodes.len() {
        if color[start] != Color::White {
            continue;
        }
        // Explicit stack of (node, next-edge cursor).
        let mut stack: Vec<(usize, usize)> = vec![(start, 0)];
        color[start] = Color::Gray;

        while let Some(frame) = stack.last_mut() {
            let node = frame.0;
            if frame.1 < adjacency[node].len() {
                let child = adjacency[node][frame.1];
                frame.1 += 1;
                match color[child] {
                    Color::White => {
                        color[child] = Color::Gray;
                        stack.push((child, 0));
                    }
                    Color::Gray => {
                        // Back edge to a node still on the stack: the cycle
                        // runs from that node to the top of the stack.
                        let from = stack
                            .iter()
                            .position(|&(n, _)| n == child)
                            .unwrap_or_default();
                        let mut path: Vec<String> = stack[from..]
                            .iter()
                            .map(|&(i, _)| nodes[i].id.clone())
                            .collect();
                        path.push(nodes[child].id.clone());
                        return Err(GraphError::CycleDetected { path });
                    }
                    Color::Black => {}
                }
            } else {
                color[node] = Color::Black;
                stack.pop();
            }
        }
    }
    Ok(())
}

/// Partition pending tasks into runnable and blocked. A dependency is
/// satisfied only by status `done`; a reference to a missing task counts as
/// unsatisfied.
pub fn compute_runnable_and_blocked(nodes: &[TaskNode]) -> TaskPartition {
    let status_by_id: BTreeMap<&str, TaskStatus> = nodes
        .iter()
        .map(|n| (n.id.as_str(), n.status))
        .collect();

    let mut partition = TaskPartition::default();
    for node in nodes {
        if node.status != TaskStatus::Pending {
            continue;
        }
        let unsatisfied: Vec<String> = node
            .depends_on
            .iter()
            .filter(|dep| {
                !status_by_id
                    .get(dep.as_str())
                    .is_some_and(|s| s.satisfies_dependency())
            })
            .cloned()
            .collect();

        if unsatisfied.is_empty() {
            partition.runnable.push(node.id.clone());
        } else {
            partition.blocked.insert(node.id.clone(), unsatisfied);
        }
    }
    partition
}

/// Map requested dependency order numbers to folder ids.
///
/// - `None`: implicit fallback to the nearest preceding task by order; a
///   task of order 1 (or with no preceding task) gets no dependency.
/// - `Some([])`: explicitly no dependencies.
/// - `Some(orders)`: each order must name a known task.
pub fn resolve_dependencies(
    known: &[(u32, String)],
    requested: Option<&[u32]>,
    order: u32,
) -> Result<Vec<String>, GraphError> {
    match requested {
        Some(orders) if orders.is_empty() => Ok(Vec::new()),
        Some(orders) => orders
            .iter()
            .map(|o| {
                known
                    .iter()
                    .find(|(ko, _)| ko == o)
                    .map(|(_, id)| id.clone())
                    .ok_or(GraphError::UnknownOrder { order: *o })
            })
            .collect(),
        None => Ok(known
            .iter()
            .filter(|(ko, _)| *ko < order)
            .max_by_key(|(ko, _)| *ko)
            .map(|(_, id)| vec![id.clone()])
            .unwrap_or_default()),
    }
}
