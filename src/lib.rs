pub mod agents;
pub mod chat;
pub mod cli;
pub mod config;
pub mod dispatcher;
pub mod doctor;
pub mod envelope;
pub mod error;
pub mod model;
pub mod pipeline;
pub mod planner;
pub mod provider;
pub mod registry;
pub mod router;
pub mod server;
pub mod streaming;
pub mod telemetry;
pub mod todos;
