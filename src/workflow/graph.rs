//! Step definitions and the validated step-dependency graph

use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::modules::WorkflowModule;
use crate::store::ProcessingState;

/// Stable identifier of a step within a module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct StepId(pub &'static str);

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// Everything a step predicate may look at
pub struct StepContext<'a, M: WorkflowModule> {
    pub primary: &'a M::Primary,
    pub secondary: &'a M::Secondary,
    pub processing: &'a ProcessingState,
}

impl<M: WorkflowModule> StepContext<'_, M> {
    /// Whether the named async operation is in flight
    pub fn is_processing(&self, key: &str) -> bool {
        self.processing.is_active(key)
    }
}

/// Pure predicate over a step context
pub type StepPredicate<M> = fn(&StepContext<'_, M>) -> bool;

/// One unit of a guided workflow
pub struct StepDefinition<M: WorkflowModule> {
    pub id: StepId,
    pub title: &'static str,
    /// Groups steps for progress display
    pub phase: &'static str,
    /// Steps whose data this step's unlock predicate reads
    pub prerequisites: Vec<StepId>,
    pub unlock: StepPredicate<M>,
    pub complete: StepPredicate<M>,
}

impl<M: WorkflowModule> fmt::Debug for StepDefinition<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepDefinition")
            .field("id", &self.id)
            .field("title", &self.title)
            .field("phase", &self.phase)
            .field("prerequisites", &self.prerequisites)
            .finish_non_exhaustive()
    }
}

/// Predicate that always holds, for entry steps
pub fn always<M: WorkflowModule>(_: &StepContext<'_, M>) -> bool {
    true
}

/// Errors detected while building a [`StepGraph`]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("a workflow needs at least one step")]
    Empty,

    #[error("step '{0}' is defined more than once")]
    DuplicateStep(StepId),

    #[error("step '{step}' depends on unknown step '{prerequisite}'")]
    UnknownPrerequisite { step: StepId, prerequisite: StepId },

    #[error("step dependencies form a cycle: {}", format_cycle(.0))]
    Cycle(Vec<StepId>),

    #[error("step '{step}' depends on '{prerequisite}', which comes after it")]
    ForwardDependency { step: StepId, prerequisite: StepId },
}

fn format_cycle(ids: &[StepId]) -> String {
    ids.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// Evaluated status of one step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Locked,
    Unlocked,
    Complete,
}

/// Completed-step count for one phase
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PhaseProgress {
    pub phase: &'static str,
    pub completed: usize,
    pub total: usize,
}

/// Ordered, immutable, validated list of steps
pub struct StepGraph<M: WorkflowModule> {
    steps: Vec<StepDefinition<M>>,
    /// Resolved prerequisite indices, parallel to `steps`
    prerequisites: Vec<Vec<usize>>,
}

impl<M: WorkflowModule> fmt::Debug for StepGraph<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepGraph")
            .field("module", &M::KEY)
            .field("steps", &self.steps)
            .finish()
    }
}

impl<M: WorkflowModule> StepGraph<M> {
    /// Resolve prerequisites and validate the graph
    pub fn new(steps: Vec<StepDefinition<M>>) -> Result<Self, GraphError> {
        if steps.is_empty() {
            return Err(GraphError::Empty);
        }

        let mut index = HashMap::with_capacity(steps.len());
        for (i, step) in steps.iter().enumerate() {
            if index.insert(step.id, i).is_some() {
                return Err(GraphError::DuplicateStep(step.id));
            }
        }

        let mut prerequisites = Vec::with_capacity(steps.len());
        for step in &steps {
            let mut resolved = Vec::with_capacity(step.prerequisites.len());
            for prerequisite in &step.prerequisites {
                let i = index
                    .get(prerequisite)
                    .copied()
                    .ok_or(GraphError::UnknownPrerequisite {
                        step: step.id,
                        prerequisite: *prerequisite,
                    })?;
                resolved.push(i);
            }
            prerequisites.push(resolved);
        }

        if let Some(cycle) = find_cycle(&steps, &prerequisites) {
            return Err(GraphError::Cycle(cycle));
        }

        for (i, step) in steps.iter().enumerate() {
            if let Some(&later) = prerequisites[i].iter().find(|&&p| p > i) {
                return Err(GraphError::ForwardDependency {
                    step: step.id,
                    prerequisite: steps[later].id,
                });
            }
        }

        Ok(Self {
            steps,
            prerequisites,
        })
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn steps(&self) -> &[StepDefinition<M>] {
        &self.steps
    }

    pub fn get(&self, index: usize) -> Option<&StepDefinition<M>> {
        self.steps.get(index)
    }

    /// Position of a step by id
    pub fn index_of(&self, id: StepId) -> Option<usize> {
        self.steps.iter().position(|s| s.id == id)
    }

    /// Whether step `index` may be entered.
    ///
    /// A step is unlocked when its own predicate holds and every declared
    /// prerequisite is unlocked. Out-of-range indices are never unlocked.
    pub fn is_unlocked(&self, index: usize, ctx: &StepContext<'_, M>) -> bool {
        let Some(step) = self.steps.get(index) else {
            return false;
        };
        (step.unlock)(ctx)
            && self.prerequisites[index]
                .iter()
                .all(|&p| self.is_unlocked(p, ctx))
    }

    /// Whether step `index` has all the data it needs
    pub fn is_complete(&self, index: usize, ctx: &StepContext<'_, M>) -> bool {
        self.steps
            .get(index)
            .is_some_and(|step| (step.complete)(ctx))
    }

    /// Status of one step, completion taking precedence over unlock
    pub fn status(&self, index: usize, ctx: &StepContext<'_, M>) -> StepStatus {
        if !self.is_unlocked(index, ctx) {
            StepStatus::Locked
        } else if self.is_complete(index, ctx) {
            StepStatus::Complete
        } else {
            StepStatus::Unlocked
        }
    }

    /// Per-phase completion counts in first-appearance order
    pub fn progress(&self, ctx: &StepContext<'_, M>) -> Vec<PhaseProgress> {
        let mut phases: Vec<PhaseProgress> = Vec::new();
        for (i, step) in self.steps.iter().enumerate() {
            let done = self.status(i, ctx) == StepStatus::Complete;
            match phases.iter_mut().find(|p| p.phase == step.phase) {
                Some(phase) => {
                    phase.total += 1;
                    phase.completed += usize::from(done);
                }
                None => phases.push(PhaseProgress {
                    phase: step.phase,
                    completed: usize::from(done),
                    total: 1,
                }),
            }
        }
        phases
    }
}

/// Depth-first search for a dependency cycle, returning its path if found
fn find_cycle<M: WorkflowModule>(
    steps: &[StepDefinition<M>],
    prerequisites: &[Vec<usize>],
) -> Option<Vec<StepId>> {
    fn visit(
        node: usize,
        prerequisites: &[Vec<usize>],
        done: &mut HashSet<usize>,
        path: &mut Vec<usize>,
    ) -> Option<Vec<usize>> {
        if let Some(start) = path.iter().position(|&n| n == node) {
            let mut cycle = path[start..].to_vec();
            cycle.push(node);
            return Some(cycle);
        }
        if done.contains(&node) {
            return None;
        }
        path.push(node);
        for &next in &prerequisites[node] {
            if let Some(cycle) = visit(next, prerequisites, done, path) {
                return Some(cycle);
            }
        }
        path.pop();
        done.insert(node);
        None
    }

    let mut done = HashSet::new();
    for node in 0..steps.len() {
        let mut path = Vec::new();
        if let Some(cycle) = visit(node, prerequisites, &mut done, &mut path) {
            return Some(cycle.into_iter().map(|i| steps[i].id).collect());
        }
    }
    None
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::modules::testing::{Scratch, ScratchForm};

    fn has_name(ctx: &StepContext<'_, Scratch>) -> bool {
        !ctx.primary.name.is_empty()
    }

    fn name_done(ctx: &StepContext<'_, Scratch>) -> bool {
        ctx.primary.name.len() >= 3 && !ctx.is_processing("name")
    }

    fn has_notes(ctx: &StepContext<'_, Scratch>) -> bool {
        !ctx.primary.notes.is_empty()
    }

    fn step(
        id: &'static str,
        prerequisites: &[&'static str],
        unlock: StepPredicate<Scratch>,
        complete: StepPredicate<Scratch>,
    ) -> StepDefinition<Scratch> {
        StepDefinition {
            id: StepId(id),
            title: id,
            phase: if id == "review" { "Finish" } else { "Draft" },
            prerequisites: prerequisites.iter().map(|&p| StepId(p)).collect(),
            unlock,
            complete,
        }
    }

    pub(crate) fn sample_graph() -> StepGraph<Scratch> {
        StepGraph::new(vec![
            step("name", &[], always, name_done),
            step("notes", &["name"], has_name, has_notes),
            step("review", &["notes"], has_notes, always),
        ])
        .unwrap()
    }

    fn eval<R>(form: &ScratchForm, f: impl FnOnce(&StepContext<'_, Scratch>) -> R) -> R {
        let processing = ProcessingState::default();
        f(&StepContext {
            primary: form,
            secondary: &(),
            processing: &processing,
        })
    }

    #[test]
    fn test_rejects_empty_graph() {
        assert_eq!(
            StepGraph::<Scratch>::new(vec![]).unwrap_err(),
            GraphError::Empty
        );
    }

    #[test]
    fn test_rejects_duplicate_ids() {
        let err = StepGraph::new(vec![
            step("name", &[], always, always),
            step("name", &[], always, always),
        ])
        .unwrap_err();
        assert_eq!(err, GraphError::DuplicateStep(StepId("name")));
    }

    #[test]
    fn test_rejects_unknown_prerequisite() {
        let err = StepGraph::new(vec![step("name", &["ghost"], always, always)]).unwrap_err();
        assert_eq!(
            err,
            GraphError::UnknownPrerequisite {
                step: StepId("name"),
                prerequisite: StepId("ghost"),
            }
        );
    }

    #[test]
    fn test_rejects_cycles() {
        let err = StepGraph::new(vec![
            step("a", &["b"], always, always),
            step("b", &["a"], always, always),
        ])
        .unwrap_err();
        match err {
            GraphError::Cycle(path) => {
                assert_eq!(path.first(), path.last());
                assert!(path.contains(&StepId("a")));
                assert!(path.contains(&StepId("b")));
            }
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn test_rejects_self_dependency() {
        let err = StepGraph::new(vec![step("a", &["a"], always, always)]).unwrap_err();
        assert_eq!(err, GraphError::Cycle(vec![StepId("a"), StepId("a")]));
    }

    #[test]
    fn test_rejects_forward_dependency() {
        let err = StepGraph::new(vec![
            step("a", &["b"], always, always),
            step("b", &[], always, always),
        ])
        .unwrap_err();
        assert_eq!(
            err,
            GraphError::ForwardDependency {
                step: StepId("a"),
                prerequisite: StepId("b"),
            }
        );
    }

    #[test]
    fn test_unlock_is_looser_than_completion() {
        let graph = sample_graph();
        let form = ScratchForm {
            name: "x".to_string(),
            ..Default::default()
        };

        eval(&form, |ctx| {
            assert!(!graph.is_complete(0, ctx));
            assert!(graph.is_unlocked(1, ctx));
            assert!(!graph.is_unlocked(2, ctx));
        });
    }

    #[test]
    fn test_unlock_requires_prerequisites() {
        let graph = sample_graph();
        // notes filled but name empty: review's own predicate holds, its
        // prerequisite chain does not
        let form = ScratchForm {
            notes: "some notes".to_string(),
            ..Default::default()
        };

        eval(&form, |ctx| {
            assert!(!graph.is_unlocked(1, ctx));
            assert!(!graph.is_unlocked(2, ctx));
        });
    }

    #[test]
    fn test_processing_blocks_completion() {
        let graph = sample_graph();
        let form = ScratchForm {
            name: "long enough".to_string(),
            ..Default::default()
        };
        let processing = std::sync::Arc::new(crate::store::StateContainer::new());
        let _guard = crate::store::ProcessingGuard::begin(processing.clone(), "name");
        let busy: ProcessingState = processing.snapshot();

        let ctx = StepContext::<Scratch> {
            primary: &form,
            secondary: &(),
            processing: &busy,
        };
        assert!(!graph.is_complete(0, &ctx));
    }

    #[test]
    fn test_out_of_range_is_locked() {
        let graph = sample_graph();
        eval(&ScratchForm::default(), |ctx| {
            assert!(!graph.is_unlocked(99, ctx));
            assert!(!graph.is_complete(99, ctx));
        });
    }

    #[test]
    fn test_progress_groups_by_phase() {
        let graph = sample_graph();
        let form = ScratchForm {
            name: "named".to_string(),
            notes: "noted".to_string(),
        };

        let progress = eval(&form, |ctx| graph.progress(ctx));
        assert_eq!(
            progress,
            vec![
                PhaseProgress {
                    phase: "Draft",
                    completed: 2,
                    total: 2,
                },
                PhaseProgress {
                    phase: "Finish",
                    completed: 1,
                    total: 1,
                },
            ]
        );
    }

    #[test]
    fn test_status_precedence() {
        let graph = sample_graph();
        eval(&ScratchForm::default(), |ctx| {
            assert_eq!(graph.status(0, ctx), StepStatus::Unlocked);
            assert_eq!(graph.status(1, ctx), StepStatus::Locked);
        });
    }
}
