//! Language model access for flowlens.
//!
//! This crate provides:
//! - [`ApiKey`] for secrets that must never reach the logs
//! - The [`providers::ModelProvider`] trait the enrichment stage talks to
//! - [`providers::OpenAiProvider`], a chat completions client
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────┐      ┌───────────────────────────┐
//! │   enrichment stage   │ ───▶ │  dyn ModelProvider        │
//! │   (flowlens-core)    │      │  ┌─────────────────────┐  │
//! └──────────────────────┘      │  │   OpenAiProvider    │  │
//!                               │  └─────────────────────┘  │
//!                               └───────────────────────────┘
//! ```

mod auth;
mod error;

pub mod providers;

pub use auth::ApiKey;
pub use error::{Error, Result};
