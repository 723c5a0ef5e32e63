//! Core domain logic for choreography generation.
//!
//! Pure, I/O-free building blocks shared by the pipeline, the job
//! executor and the worker: embedding combination, the move index,
//! music feature types, the blueprint contract and its validator, the
//! retry policy and the task status state machine.

pub mod blueprint;
pub mod categories;
pub mod config;
pub mod embedding;
pub mod error;
pub mod move_index;
pub mod music;
pub mod paths;
pub mod retry;
pub mod task;
pub mod types;
