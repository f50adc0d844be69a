// Shared infrastructure
pub mod config;
pub mod error;
pub mod metrics;
pub mod telemetry;

// Gateway core
pub mod connection;
pub mod drain;
pub mod gateway;
pub mod hub;
pub mod topic;

// Collaborators
pub mod auth;
pub mod events;
pub mod intents;

// Application layer
pub mod api;
pub mod server;
pub mod websocket;

// Background tasks
pub mod tasks;
