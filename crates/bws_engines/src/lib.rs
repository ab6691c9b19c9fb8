#![forbid(unsafe_code)]

pub mod config;
pub mod decoder;
pub mod job_files;
pub mod pedigree_file;
pub mod runner;
