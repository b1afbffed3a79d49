pub mod commands;
pub mod containers;
pub mod orchestrator;
pub mod poll;
pub mod release;
pub mod retrieval;
pub mod workflows;
