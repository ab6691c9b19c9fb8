#![forbid(unsafe_code)]

pub mod fields;
pub mod orchestrator;
pub mod workspace;
