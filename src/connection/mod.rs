//! Message-level client socket over an upgraded stream.
//!
//! ## Connection Lifecycle
//!
//! 1. **Open** - state after a successful handshake
//! 2. **Closing** - our close frame was sent; further sends fail with
//!    [`Error::CloseSent`](crate::Error::CloseSent)
//! 3. **Closed** - the peer's close frame arrived or the stream ended
//!
//! ## Example
//!
//! ```rust,ignore
//! use wsload::{CloseCode, Message};
//!
//! let mut socket = wsload::transport::open(&connector, &config).await?;
//! socket.send_text(r#"{"event":"hello"}"#).await?;
//! if let Message::Text(reply) = socket.recv().await? {
//!     println!("received: {reply}");
//! }
//! socket.close(CloseCode::Normal, "").await?;
//! ```

mod socket;
mod state;

pub use socket::Socket;
pub use state::ConnectionState;
