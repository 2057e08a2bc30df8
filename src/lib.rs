//! Expose a local folder as a website through a public relay.
//!
//! A host keeps one outbound websocket to the relay; the relay answers
//! public HTTP requests by asking a host of the requested domain for the
//! file over that websocket.

pub mod assets;
pub mod channel;
pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod index;
pub mod names;
pub mod registry;
pub mod router;
pub mod server;
pub mod tunnel;
