//! Test harness: scripted WebSocket servers for driving virtual users.
//!
//! The same server logic runs over real TCP ([`TestServer`]) and over
//! in-memory pipes ([`DuplexConnector`]); the latter works with a paused
//! tokio clock.

#![allow(dead_code, unused_imports)]

mod connector;
mod server;

pub use connector::DuplexConnector;
pub use server::{Behavior, ServerStats, TestServer, serve, unused_port};
