//! Barista Agent Orchestrator
//!
//! A conversational coffee-ordering agent that:
//! - Keeps an in-progress order per customer session
//! - Lets the model edit the order through a closed set of typed tools
//! - Pauses for explicit customer approval before submitting
//! - Persists sessions and submitted orders (Postgres or in-memory)
//!
//! TURN LOOP:
//! MESSAGE → MODEL → TOOLS → MODEL … → RESPONSE | CONFIRMATION

pub mod agent;
pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod gemini;
pub mod interrupt;
pub mod llm;
pub mod media;
pub mod memory;
pub mod menu;
pub mod models;
pub mod session;
pub mod state;
pub mod submission;
pub mod tools;

pub use error::Result;

// Re-export common types
pub use models::*;
pub use agent::Orchestrator;
