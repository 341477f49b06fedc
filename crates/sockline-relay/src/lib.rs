//! Sockline relay library - WebSocket fan-out relay for the sockline frame protocol.
//!
//! This library provides the HTTP routes, WebSocket session handling, and application
//! state for the relay. It's separated from main.rs to enable integration testing.

pub mod config;
pub mod hub;
pub mod logging;
pub mod routes;
pub mod state;
pub mod ws;
