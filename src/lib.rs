//! SP-API tool bridge.
//!
//! This library adapts a controlled subset of the Amazon Selling Partner API
//! to a line-delimited JSON-RPC tool protocol. It hides dual-credential
//! authentication, request signing, per-endpoint rate limiting, retry
//! classification, and response filtering behind a uniform envelope.

pub mod api;
pub mod auth;
pub mod config;
pub mod constants;
pub mod core;
pub mod dispatch;
pub mod filter;
pub mod limiter;
pub mod mcp;
pub mod utils;
