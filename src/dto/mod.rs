//! Data-transfer shapes for the HTTP and WebSocket surfaces.

pub mod health;
pub mod validation;
pub mod ws;
