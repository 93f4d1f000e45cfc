//! Frame-level reading and writing over async streams.

mod framed;

pub use framed::FrameCodec;
