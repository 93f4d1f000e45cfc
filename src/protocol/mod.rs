//! WebSocket protocol primitives for the client side of RFC 6455.

pub mod frame;
pub mod handshake;
pub mod mask;
pub mod opcode;

pub use frame::{Frame, MAX_CONTROL_FRAME_PAYLOAD};
pub use handshake::{ClientRequest, HandshakeResponse, WS_GUID, compute_accept_key, generate_key};
pub use mask::{apply_mask, random_mask};
pub use opcode::OpCode;
