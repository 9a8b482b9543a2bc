//! Gated navigation over a step graph

use std::sync::Arc;

use serde::Serialize;

use super::graph::{StepContext, StepGraph};
use crate::modules::WorkflowModule;

/// Why a navigation request was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockReason {
    /// Already on the first step
    AtFirstStep,
    /// Already on the last step
    AtLastStep,
    /// The current step's completion predicate does not hold
    StepIncomplete,
    /// The target step's prerequisites are not met
    TargetLocked,
    /// The target index does not exist
    OutOfRange,
}

/// Result of a navigation request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "result")]
pub enum Navigation {
    Moved { from: usize, to: usize },
    Blocked { reason: BlockReason },
}

impl Navigation {
    pub fn moved(&self) -> bool {
        matches!(self, Navigation::Moved { .. })
    }

    fn blocked(reason: BlockReason) -> Self {
        Navigation::Blocked { reason }
    }
}

/// Finite-state machine over step indices.
///
/// Invalid requests are no-ops reported as [`Navigation::Blocked`]; the
/// index is never clamped to a nearby step.
pub struct NavigationController<M: WorkflowModule> {
    graph: Arc<StepGraph<M>>,
    current: usize,
    read_only: bool,
}

impl<M: WorkflowModule> std::fmt::Debug for NavigationController<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NavigationController")
            .field("module", &M::KEY)
            .field("current", &self.current)
            .field("read_only", &self.read_only)
            .finish()
    }
}

impl<M: WorkflowModule> NavigationController<M> {
    pub fn new(graph: Arc<StepGraph<M>>, read_only: bool) -> Self {
        Self {
            graph,
            current: 0,
            read_only,
        }
    }

    pub fn graph(&self) -> &Arc<StepGraph<M>> {
        &self.graph
    }

    pub fn current(&self) -> usize {
        self.current
    }

    pub fn read_only(&self) -> bool {
        self.read_only
    }

    pub fn set_read_only(&mut self, read_only: bool) {
        self.read_only = read_only;
    }

    pub fn step_count(&self) -> usize {
        self.graph.len()
    }

    /// Whether the current step is the terminal one (commit instead of next)
    pub fn is_last_step(&self) -> bool {
        self.current + 1 == self.graph.len()
    }

    /// Whether step `index` may be entered, honouring read-only mode
    pub fn is_unlocked(&self, index: usize, ctx: &StepContext<'_, M>) -> bool {
        if index >= self.graph.len() {
            return false;
        }
        self.read_only || self.graph.is_unlocked(index, ctx)
    }

    /// Advance one step if the current step is complete and the next one is
    /// unlocked
    pub fn go_next(&mut self, ctx: &StepContext<'_, M>) -> Navigation {
        if self.is_last_step() {
            return Navigation::blocked(BlockReason::AtLastStep);
        }
        if !self.read_only && !self.graph.is_complete(self.current, ctx) {
            tracing::debug!(
                module = M::KEY,
                step = %self.graph.steps()[self.current].id,
                "next blocked: step incomplete"
            );
            return Navigation::blocked(BlockReason::StepIncomplete);
        }
        let next = self.current + 1;
        if !self.is_unlocked(next, ctx) {
            tracing::debug!(
                module = M::KEY,
                step = %self.graph.steps()[next].id,
                "next blocked: target locked"
            );
            return Navigation::blocked(BlockReason::TargetLocked);
        }
        self.move_to(next)
    }

    /// Go back one step; never gated
    pub fn go_previous(&mut self) -> Navigation {
        if self.current == 0 {
            return Navigation::blocked(BlockReason::AtFirstStep);
        }
        self.move_to(self.current - 1)
    }

    /// Jump to a visited step, or ahead to an unlocked one
    pub fn go_to_step(&mut self, index: usize, ctx: &StepContext<'_, M>) -> Navigation {
        if index >= self.graph.len() {
            return Navigation::blocked(BlockReason::OutOfRange);
        }
        if index <= self.current || self.is_unlocked(index, ctx) {
            return self.move_to(index);
        }
        tracing::debug!(
            module = M::KEY,
            step = %self.graph.steps()[index].id,
            "jump blocked: target locked"
        );
        Navigation::blocked(BlockReason::TargetLocked)
    }

    /// Return to the first step
    pub fn rewind(&mut self) {
        self.current = 0;
    }

    fn move_to(&mut self, to: usize) -> Navigation {
        let from = self.current;
        self.current = to;
        tracing::debug!(module = M::KEY, from, to, "step changed");
        Navigation::Moved { from, to }
    }
}
