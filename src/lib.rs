//! placeherd - coordinates a swarm of pixel-placing bots toward a target image

pub mod auth;
pub mod board;
pub mod commands;
pub mod config;
pub mod coordinator;
pub mod dispatch;
pub mod error;
pub mod maintenance;
pub mod palette;
pub mod protocol;
pub mod queue;
pub mod reconcile;
pub mod server;
pub mod session;
pub mod source;
pub mod telemetry;
pub mod template;
