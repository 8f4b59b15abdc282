//! Mock realtime endpoint servers for integration tests.
//!
//! - WebSocket (OpenAI Realtime protocol)

// Shared between test binaries; not every binary uses every helper.
#![allow(dead_code)]

pub mod websocket_mock;

pub use websocket_mock::{MockConnection, MockRealtimeServer};
