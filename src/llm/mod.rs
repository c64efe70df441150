//! Reply generation: the language-model capability, conversation memory and
//! the interruptible turn generator.

pub mod client;
pub mod generator;
pub mod memory;

pub use client::{GenerationRequest, Generator, MockGenerator};
#[cfg(feature = "http")]
pub use client::HttpGenerator;
pub use generator::{Generation, TurnGenerator};
pub use memory::{ChatMessage, ConversationMemory, Role};
