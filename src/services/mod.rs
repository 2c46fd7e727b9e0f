//! Game logic services.

/// Fuzzy answer comparison with Turkish-aware normalization.
pub mod answer_matcher;
/// Fan-out helpers for player, viewer, and room-wide messages.
pub mod broadcast;
/// Round lifecycle state machine and its timers.
pub mod round_service;
/// Rank-based scoring and end-of-round reconciliation.
pub mod score_service;
/// WebSocket connection and message handling service.
pub mod websocket_service;
