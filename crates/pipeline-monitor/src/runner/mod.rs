//! Interaction with pipeline processes and the automaton which drives them
//! through the lifecycle.

pub mod error;
pub mod interaction;
pub mod logs_buffer;
pub mod pipeline_automata;
pub mod pipeline_executor;
pub(crate) mod pipeline_logs;

#[cfg(test)]
pub(crate) mod mock;
