#![forbid(unsafe_code)]

pub mod calc;
pub mod common;
pub mod gene;
pub mod pedigree;
pub mod result;

pub use common::{ContractViolation, Validate};
