pub mod admin;
pub mod health;
pub mod websocket;

// Re-export all handlers for easy route registration
pub use admin::get_database_stats;
pub use health::{health_handler, health_live_handler, health_ready_handler, metrics_handler};
pub use websocket::websocket_handler;
