//! Generative-model plumbing: HTTP client, prompts, and reply parsing.

mod client;
pub mod parse;
pub mod prompts;

pub use client::ModelClient;
pub use parse::{parse_reply, strip_code_fences, ModelReply};
