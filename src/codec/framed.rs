use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::config::Limits;
use crate::error::{Error, Result};
use crate::protocol::{Frame, random_mask};

const READ_CHUNK: usize = 4096;

/// Buffered client frame codec.
///
/// Reading only ever appends to the internal buffer, so a `read_frame` future
/// can be dropped (for example by losing a `select!` race) without losing
/// bytes.
pub struct FrameCodec<T> {
    io: T,
    read_buf: BytesMut,
    write_buf: BytesMut,
    max_frame_size: usize,
}

impl<T> FrameCodec<T> {
    /// Wrap a stream with empty buffers.
    #[must_use]
    pub fn new(io: T, limits: &Limits) -> Self {
        Self::with_buffered(io, BytesMut::new(), limits)
    }

    /// Wrap a stream whose first bytes were already read, typically frames
    /// that arrived in the same packet as the handshake response.
    #[must_use]
    pub fn with_buffered(io: T, buffered: BytesMut, limits: &Limits) -> Self {
        let mut read_buf = buffered;
        read_buf.reserve(READ_CHUNK);
        Self {
            io,
            read_buf,
            write_buf: BytesMut::with_capacity(READ_CHUNK),
            max_frame_size: limits.max_frame_size,
        }
    }

    /// Bytes received but not yet decoded.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.read_buf.len()
    }

    #[must_use]
    pub fn get_ref(&self) -> &T {
        &self.io
    }

}

impl<T: AsyncRead + AsyncWrite + Unpin> FrameCodec<T> {
    /// Read the next server frame.
    ///
    /// # Errors
    ///
    /// Returns `Error::ConnectionClosed(None)` on EOF, or any frame violation
    /// reported by [`Frame::parse`].
    pub async fn read_frame(&mut self) -> Result<Frame> {
        loop {
            match Frame::parse(&self.read_buf, self.max_frame_size) {
                Ok((frame, consumed)) => {
                    self.read_buf.advance(consumed);
                    return Ok(frame);
                }
                Err(Error::IncompleteFrame { needed }) => {
                    self.read_buf.reserve(needed.max(READ_CHUNK));
                }
                Err(e) => return Err(e),
            }

            if self.io.read_buf(&mut self.read_buf).await? == 0 {
                return Err(Error::ConnectionClosed(None));
            }
        }
    }

    /// Mask and write a frame, then flush.
    ///
    /// # Errors
    ///
    /// Control frame violations from [`Frame::validate`], checked before
    /// anything is written, or `Error::Io` if the write fails.
    pub async fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        frame.validate()?;
        self.write_buf.clear();
        frame.encode_masked(&mut self.write_buf, random_mask());
        self.io.write_all(&self.write_buf).await?;
        self.io.flush().await?;
        Ok(())
    }

    /// Shut down the write half.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if the shutdown fails.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.io.shutdown().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::ReadBuf;

    use crate::protocol::{OpCode, apply_mask};

    /// Serves `read_data` in chunks of at most `chunk` bytes and records writes.
    struct MockStream {
        read_data: Cursor<Vec<u8>>,
        chunk: usize,
        write_data: Vec<u8>,
    }

    impl MockStream {
        fn new(data: Vec<u8>) -> Self {
            Self::chunked(data, usize::MAX)
        }

        fn chunked(data: Vec<u8>, chunk: usize) -> Self {
            Self {
                read_data: Cursor::new(data),
                chunk,
                write_data: Vec::new(),
            }
        }
    }

    impl AsyncRead for MockStream {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<std::io::Result<()>> {
            let pos = self.read_data.position() as usize;
            let data = self.read_data.get_ref();
            if pos >= data.len() {
                return Poll::Ready(Ok(()));
            }
            let to_copy = (data.len() - pos).min(buf.remaining()).min(self.chunk);
            buf.put_slice(&data[pos..pos + to_copy]);
            self.read_data.set_position((pos + to_copy) as u64);
            Poll::Ready(Ok(()))
        }
    }

    impl AsyncWrite for MockStream {
        fn poll_write(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<std::io::Result<usize>> {
            self.write_data.extend_from_slice(buf);
            Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn test_write_frame_is_masked() {
        let mut codec = FrameCodec::new(MockStream::new(vec![]), &Limits::default());
        codec.write_frame(&Frame::text("Hi")).await.unwrap();

        let written = &codec.get_ref().write_data;
        assert_eq!(written[0], 0x81);
        assert_eq!(written[1], 0x82);
        assert_eq!(written.len(), 8);

        let mask = [written[2], written[3], written[4], written[5]];
        let mut payload = written[6..].to_vec();
        apply_mask(&mut payload, mask);
        assert_eq!(payload, b"Hi");
    }

    #[tokio::test]
    async fn test_write_frame_rejects_oversized_control_frame() {
        let mut codec = FrameCodec::new(MockStream::new(vec![]), &Limits::default());
        let result = codec.write_frame(&Frame::pong(vec![0u8; 126])).await;

        assert_eq!(result, Err(Error::ControlFrameTooLarge(126)));
        assert!(codec.get_ref().write_data.is_empty());
    }

    #[tokio::test]
    async fn test_read_frames_across_chunks() {
        let data = vec![
            0x81, 0x05, b'H', b'e', b'l', b'l', b'o', // text "Hello"
            0x82, 0x03, 0x01, 0x02, 0x03, // binary
        ];
        let mut codec = FrameCodec::new(MockStream::chunked(data, 3), &Limits::default());

        let first = codec.read_frame().await.unwrap();
        assert_eq!(first.payload(), b"Hello");
        let second = codec.read_frame().await.unwrap();
        assert_eq!(second.opcode, OpCode::Binary);
        assert_eq!(second.payload(), &[1, 2, 3]);
    }

    #[tokio::test]
    async fn test_buffered_bytes_are_decoded_first() {
        let leftover = BytesMut::from(&[0x81, 0x03, b'A', b'C', b'K'][..]);
        let mut codec =
            FrameCodec::with_buffered(MockStream::new(vec![]), leftover, &Limits::default());
        assert_eq!(codec.buffered(), 5);

        let frame = codec.read_frame().await.unwrap();
        assert_eq!(frame.payload(), b"ACK");
        assert_eq!(codec.buffered(), 0);
    }

    #[tokio::test]
    async fn test_read_connection_closed() {
        let mut codec = FrameCodec::new(MockStream::new(vec![]), &Limits::default());
        assert_eq!(
            codec.read_frame().await,
            Err(Error::ConnectionClosed(None))
        );
    }

    #[tokio::test]
    async fn test_read_rejects_oversized_frame() {
        let limits = Limits {
            max_frame_size: 100,
            ..Limits::default()
        };
        let mut codec = FrameCodec::new(MockStream::new(vec![0x82, 0x7e, 0x01, 0x00]), &limits);
        assert_eq!(
            codec.read_frame().await,
            Err(Error::FrameTooLarge { size: 256, max: 100 })
        );
    }

    #[tokio::test]
    async fn test_masks_differ_between_frames() {
        use std::collections::HashSet;

        let mut codec = FrameCodec::new(MockStream::new(vec![]), &Limits::default());
        for _ in 0..5 {
            codec.write_frame(&Frame::text("x")).await.unwrap();
        }
        let masks: HashSet<&[u8]> = codec
            .get_ref()
            .write_data
            .chunks(7)
            .map(|frame| &frame[2..6])
            .collect();
        assert!(masks.len() >= 2);
    }
}
