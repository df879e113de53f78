//! The per-line pipeline: filter programs, configuration and the stream
//! orchestrator.
pub mod config;
pub mod context;
pub mod engine;
pub mod filter;
pub mod global_functions;
pub mod script;
pub mod stream;
