//! Step graph and navigation state machine

pub mod graph;
pub mod navigation;

pub use graph::{
    always, GraphError, PhaseProgress, StepContext, StepDefinition, StepGraph, StepId,
    StepPredicate, StepStatus,
};
pub use navigation::{BlockReason, Navigation, NavigationController};
