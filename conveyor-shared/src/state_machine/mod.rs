//! Run and task state definitions and transition rules.

pub mod states;

pub use states::{ReasonCreated, ReasonResolved, RunState, TaskState};
