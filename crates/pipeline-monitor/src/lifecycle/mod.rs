pub mod error;
pub mod events;
pub mod pipeline;
pub mod registry;
pub mod state_machine;
