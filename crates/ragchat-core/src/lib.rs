//! ragchat-core — Pure chat logic, no HTTP surface.
//!
//! This crate holds the bounded bot invocation protocol, the per-conversation
//! session state, configuration, and the LLM host adapters. Frontends
//! subscribe to session events via tokio::broadcast.

pub mod bot;
pub mod config;
pub mod conversation;
pub mod events;
pub mod invocation;
pub mod providers;
pub mod retrieval;
pub mod types;
