//! Ember core library.
//!
//! Supervises a local OpenAI-compatible inference server, streams
//! completions from it or from a remote endpoint, and runs the agentic
//! tool-calling loop on top.

pub mod agent;
pub mod completion;
pub mod config;
pub mod endpoint;
pub mod mcp;
pub mod message;
pub mod provider;
pub mod server;
pub mod status;
pub mod telemetry;
pub mod text;
pub mod tools;
