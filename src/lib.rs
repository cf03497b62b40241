// Configuration and error taxonomy
pub mod config;
pub mod error;

// Entity/component store
pub mod store;

// World instance registry
pub mod world;

// Handshake credentials
pub mod auth;

// Session handshake and peer channels
pub mod session;

// Orchestrator lifecycle
pub mod lifecycle;

// Health endpoints and WebSocket signaling
pub mod api;
