//! Mender LLM - Completion service abstraction
//!
//! This crate provides the completion-service seam used by every repair agent:
//! - Provider: the `LlmProvider` trait
//! - Completion: request/response types with JSON response mode
//! - Message: conversation messages with inline image parts
//! - OpenAI: an OpenAI-compatible chat completions provider
//! - Mock: a scripted provider for tests

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod completion;
pub mod error;
pub mod message;
pub mod mock;
pub mod openai;
pub mod provider;
pub mod util;

pub use completion::{CompletionRequest, CompletionResponse, TokenUsage};
pub use error::{Error, Result};
pub use message::{ImageContent, Message, MessageRole};
pub use mock::{MockProvider, MockReply};
pub use openai::{OpenAiCompatibleConfig, OpenAiCompatibleProvider};
pub use provider::LlmProvider;
