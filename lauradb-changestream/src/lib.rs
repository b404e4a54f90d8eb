//! Resumable change-stream tailing cursor over LauraDB's operation log.

#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod event;
pub mod stream;

pub use event::{ChangeEvent, OperationType, UpdateDescription};
pub use stream::{ChangeStream, ChangeStreamOptions, PipelineStage, Predicate};
