//! OpenRouter model-routing pipe.
//!
//! Exposes the aggregator's model catalog as selectable pipes for a host
//! chat application and relays chat completions upstream, streaming or
//! single-shot, with reasoning tokens framed in `<think>` tags.

mod catalog;
mod config;
mod error;
mod payload;
mod pipe;
mod relay;
mod types;

pub use config::PipeConfig;
pub use error::{PipeError, Result};
pub use pipe::Pipe;
pub use types::{
    ChatMessage, ChatRequest, ModelDescriptor, PipeModel, PipeOutput, TextStream,
};
