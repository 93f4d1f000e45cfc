//! # wsload - WebSocket virtual-user load generator
//!
//! `wsload` opens many concurrent WebSocket connections against one target,
//! sends periodic JSON events and checks server replies for an
//! acknowledgment marker.
//!
//! ## Features
//!
//! - **Virtual users** as independent tokio tasks with a shared deadline
//! - **Named checks** tallied per run, never failing it
//! - **RFC 6455 client** with masking, fragment reassembly and close handshake
//! - **Graceful abort** with a bounded grace period
//! - **wss://** via rustls (feature `tls-rustls`)
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use wsload::{LoadDriver, Target, TestConfig};
//!
//! let config = TestConfig::new(Target::parse("ws://localhost:8583")?)
//!     .with_virtual_users(10)
//!     .with_duration(std::time::Duration::from_secs(60));
//! let summary = LoadDriver::tcp(config).run().await?;
//! println!("{}", summary.render_text());
//! ```

pub mod check;
pub mod codec;
pub mod config;
pub mod connection;
pub mod driver;
pub mod error;
pub mod message;
pub mod payload;
pub mod protocol;
pub mod summary;
pub mod transport;
pub mod vu;

pub use check::CheckTally;
pub use config::{FileConfig, Limits, SessionPlan, Target, TestConfig};
pub use connection::{ConnectionState, Socket};
pub use driver::LoadDriver;
pub use error::{ConfigError, Error, Result};
pub use message::{CloseCode, CloseFrame, Message};
pub use payload::Event;
pub use protocol::{OpCode, compute_accept_key};
pub use summary::{IterationOutcome, RunSummary};
pub use transport::{Connector, TcpConnector};

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_send<T: Send>() {}
    fn assert_sync<T: Sync>() {}

    #[test]
    fn test_public_types_are_send() {
        assert_send::<Error>();
        assert_send::<TestConfig>();
        assert_send::<Limits>();
        assert_send::<Message>();
        assert_send::<CloseFrame>();
        assert_send::<IterationOutcome>();
        assert_send::<RunSummary>();
        assert_send::<LoadDriver>();
        assert_send::<Socket<tokio::io::DuplexStream>>();
    }

    #[test]
    fn test_public_types_are_sync() {
        assert_sync::<Error>();
        assert_sync::<TestConfig>();
        assert_sync::<Limits>();
        assert_sync::<Message>();
        assert_sync::<ConnectionState>();
        assert_sync::<RunSummary>();
        assert_sync::<LoadDriver>();
    }
}
