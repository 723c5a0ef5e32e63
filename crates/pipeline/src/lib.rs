//! Music analysis, blueprint generation and video assembly.

pub mod assembler;
pub mod config;
pub mod ffmpeg;
pub mod generator;
pub mod job;
pub mod music;
pub mod storage;

pub use assembler::{AssemblyOutput, AssemblyStage, VideoAssembler, VideoAssemblyError};
pub use generator::{BlueprintGenerator, GenerationError};
pub use job::{JobError, JobRunner};
