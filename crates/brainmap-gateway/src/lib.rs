//! Brainmap Gateway - WebSocket server, session handling, and configuration

pub mod config;
pub mod handlers;
pub mod server;
pub mod sessions;
pub mod ws;

pub use config::{BindMode, BrainmapConfig};
pub use server::{router, start_gateway, AppState};
pub use sessions::SessionRegistry;
