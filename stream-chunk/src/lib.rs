//! Chunk protocol shared by the store, the orchestrator, and the HTTP layer.
//!
//! Three layers, lowest first:
//! - [`chunk`]: the closed sum type persisted per message ([`MessageChunk`]).
//! - [`delta`]: events a provider stream yields while a turn runs ([`DeltaEvent`]).
//! - [`wire`]: OpenAI-compatible `chat.completion.chunk` DTOs for the SSE channel.

pub mod chunk;
pub mod delta;
pub mod wire;

pub use chunk::{merge_adjacent, plain_text, MediaKind, MessageChunk};
pub use delta::{DeltaEvent, FinishReason, Usage};
pub use wire::{
    ChatCompletionChunk, ChunkChoice, ChunkDelta, WireFunctionDelta, WireToolCallDelta, SSE_DONE,
};
