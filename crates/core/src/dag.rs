//! Dependency-graph validation and ready-set computation.
//!
//! A workflow's `depends_on` edges must form a DAG over existing step
//! ids. Validation runs before persistence: cyclic or dangling
//! definitions are never stored. Cycle detection is a DFS with an
//! explicit recursion stack; any back-edge is a cycle.

use std::collections::{HashMap, HashSet};

use thiserror::Error;

use crate::workflow::WorkflowStep;

/// Rejection reasons for a workflow definition's dependency graph.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DagError {
    /// Two steps share an id, making dependency resolution ambiguous.
    #[error("duplicate step id: {id}")]
    DuplicateStepId {
        /// The repeated id.
        id: String,
    },
    /// A `depends_on` entry names a step that does not exist.
    #[error("step {step} depends on unknown step {reference}")]
    UnknownStepReference {
        /// The step carrying the dangling reference.
        step: String,
        /// The missing id.
        reference: String,
    },
    /// The dependency graph contains a cycle through the given step.
    #[error("cyclic dependency detected through step {step}")]
    CyclicDependency {
        /// A step on the detected cycle.
        step: String,
    },
}

/// Validates that `steps` have unique ids, resolvable references, and
/// an acyclic dependency graph.
///
/// # Errors
///
/// Returns the first [`DagError`] found, in the order: duplicate ids,
/// unknown references, cycles.
pub fn validate_steps(steps: &[WorkflowStep]) -> Result<(), DagError> {
    let mut ids = HashSet::with_capacity(steps.len());
    for step in steps {
        if !ids.insert(step.id.as_str()) {
            return Err(DagError::DuplicateStepId {
                id: step.id.clone(),
            });
        }
    }

    for step in steps {
        for dep in &step.depends_on {
            if !ids.contains(dep.as_str()) {
                return Err(DagError::UnknownStepReference {
                    step: step.id.clone(),
                    reference: dep.clone(),
                });
            }
        }
    }

    detect_cycle(steps)
}

/// DFS visitation state for cycle detection.
#[derive(Clone, Copy, PartialEq)]
enum Visit {
    /// On the current recursion stack; reaching it again is a back-edge.
    InStack,
    /// Fully explored; subtree is known acyclic.
    Done,
}

fn detect_cycle(steps: &[WorkflowStep]) -> Result<(), DagError> {
    let by_id: HashMap<&str, &WorkflowStep> =
        steps.iter().map(|s| (s.id.as_str(), s)).collect();
    let mut state: HashMap<&str, Visit> = HashMap::with_capacity(steps.len());

    for step in steps {
        if state.contains_key(step.id.as_str()) {
            continue;
        }
        // Iterative DFS: (step, next dependency index to explore).
        let mut stack: Vec<(&WorkflowStep, usize)> = vec![(step, 0)];
        state.insert(step.id.as_str(), Visit::InStack);

        while let Some(frame) = stack.last_mut() {
            let current = frame.0;
            if frame.1 < current.depends_on.len() {
                let dep_id = current.depends_on[frame.1].as_str();
                frame.1 += 1;
                match state.get(dep_id) {
                    Some(Visit::InStack) => {
                        return Err(DagError::CyclicDependency {
                            step: dep_id.to_string(),
                        });
                    }
                    Some(Visit::Done) => {}
                    None => {
                        // References are pre-validated, so the lookup holds.
                        let dep = by_id[dep_id];
                        state.insert(dep_id, Visit::InStack);
                        stack.push((dep, 0));
                    }
                }
            } else {
                state.insert(current.id.as_str(), Visit::Done);
                stack.pop();
            }
        }
    }

    Ok(())
}

/// Returns the ids of steps whose dependencies are all in `succeeded`
/// and which are not themselves in `started`.
///
/// The engine calls this after every step completion to find newly
/// unlocked work. Order follows the workflow's step declaration order.
#[must_use]
pub fn ready_steps<'a>(
    steps: &'a [WorkflowStep],
    succeeded: &HashSet<String>,
    started: &HashSet<String>,
) -> Vec<&'a WorkflowStep> {
    steps
        .iter()
        .filter(|s| !started.contains(&s.id))
        .filter(|s| s.depends_on.iter().all(|d| succeeded.contains(d)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::{DEFAULT_MAX_RETRIES, DEFAULT_STEP_TIMEOUT_MS};

    fn step(id: &str, deps: &[&str]) -> WorkflowStep {
        WorkflowStep {
            id: id.to_string(),
            service: "svc".to_string(),
            operation: "op".to_string(),
            parameters: serde_json::Value::Null,
            depends_on: deps.iter().map(ToString::to_string).collect(),
            timeout_ms: DEFAULT_STEP_TIMEOUT_MS,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    #[test]
    fn empty_workflow_is_valid() {
        assert_eq!(validate_steps(&[]), Ok(()));
    }

    #[test]
    fn linear_chain_is_valid() {
        let steps = vec![step("a", &[]), step("b", &["a"]), step("c", &["b"])];
        assert_eq!(validate_steps(&steps), Ok(()));
    }

    #[test]
    fn diamond_is_valid() {
        let steps = vec![
            step("a", &[]),
            step("b", &["a"]),
            step("c", &["a"]),
            step("d", &["b", "c"]),
        ];
        assert_eq!(validate_steps(&steps), Ok(()));
    }

    #[test]
    fn duplicate_id_rejected() {
        let steps = vec![step("a", &[]), step("a", &[])];
        assert_eq!(
            validate_steps(&steps),
            Err(DagError::DuplicateStepId {
                id: "a".to_string()
            })
        );
    }

    #[test]
    fn unknown_reference_rejected() {
        let steps = vec![step("a", &["ghost"])];
        assert_eq!(
            validate_steps(&steps),
            Err(DagError::UnknownStepReference {
                step: "a".to_string(),
                reference: "ghost".to_string(),
            })
        );
    }

    #[test]
    fn self_cycle_rejected() {
        let steps = vec![step("a", &["a"])];
        assert!(matches!(
            validate_steps(&steps),
            Err(DagError::CyclicDependency { .. })
        ));
    }

    #[test]
    fn two_step_cycle_rejected() {
        let steps = vec![step("a", &["b"]), step("b", &["a"])];
        assert!(matches!(
            validate_steps(&steps),
            Err(DagError::CyclicDependency { .. })
        ));
    }

    #[test]
    fn long_cycle_behind_valid_prefix_rejected() {
        let steps = vec![
            step("root", &[]),
            step("a", &["root", "c"]),
            step("b", &["a"]),
            step("c", &["b"]),
        ];
        assert!(matches!(
            validate_steps(&steps),
            Err(DagError::CyclicDependency { .. })
        ));
    }

    #[test]
    fn shared_dependency_is_not_a_cycle() {
        // d is reached twice through b and c -- a diamond, not a back-edge.
        let steps = vec![
            step("d", &[]),
            step("b", &["d"]),
            step("c", &["d"]),
            step("a", &["b", "c"]),
        ];
        assert_eq!(validate_steps(&steps), Ok(()));
    }

    #[test]
    fn ready_steps_initial_roots() {
        let steps = vec![step("a", &[]), step("b", &["a"]), step("c", &["a"])];
        let ready = ready_steps(&steps, &HashSet::new(), &HashSet::new());
        let ids: Vec<_> = ready.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["a"]);
    }

    #[test]
    fn ready_steps_unlock_after_success() {
        let steps = vec![step("a", &[]), step("b", &["a"]), step("c", &["a"])];
        let succeeded: HashSet<String> = ["a".to_string()].into();
        let started: HashSet<String> = ["a".to_string()].into();
        let ready = ready_steps(&steps, &succeeded, &started);
        let ids: Vec<_> = ready.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c"]);
    }

    #[test]
    fn ready_steps_excludes_started() {
        let steps = vec![step("a", &[]), step("b", &["a"])];
        let succeeded: HashSet<String> = ["a".to_string()].into();
        let started: HashSet<String> = ["a".to_string(), "b".to_string()].into();
        assert!(ready_steps(&steps, &succeeded, &started).is_empty());
    }

    #[test]
    fn ready_steps_requires_all_dependencies() {
        let steps = vec![
            step("a", &[]),
            step("b", &[]),
            step("c", &["a", "b"]),
        ];
        let succeeded: HashSet<String> = ["a".to_string()].into();
        let started: HashSet<String> = ["a".to_string(), "b".to_string()].into();
        assert!(ready_steps(&steps, &succeeded, &started).is_empty());
    }
}
