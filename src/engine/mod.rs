pub mod assignment;
pub mod lifecycle;
pub mod orchestrator;
pub mod queue;
pub mod reconciler;
