use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::codec::FrameCodec;
use crate::config::Limits;
use crate::connection::ConnectionState;
use crate::error::{Error, Result};
use crate::message::{CloseCode, CloseFrame, Message};
use crate::protocol::{Frame, OpCode};

/// A client WebSocket over an already upgraded stream.
///
/// [`recv`](Socket::recv) never writes to the stream, which keeps it safe to
/// use as a `tokio::select!` branch. Replies the protocol requires (pongs and
/// the answer to a peer's close) are queued and go out on the next
/// [`flush_pending`](Socket::flush_pending).
pub struct Socket<T> {
    codec: FrameCodec<T>,
    state: ConnectionState,
    limits: Limits,
    partial: Option<(OpCode, Vec<u8>)>,
    pending_pong: Option<Vec<u8>>,
    pending_close: Option<Frame>,
    peer_close_code: Option<u16>,
}

impl<T> Socket<T> {
    /// Wrap an upgraded stream.
    pub fn new(io: T, limits: &Limits) -> Self {
        Self::with_buffered(io, BytesMut::new(), limits)
    }

    /// Wrap an upgraded stream together with bytes that were read past the
    /// end of the handshake response.
    pub fn with_buffered(io: T, buffered: BytesMut, limits: &Limits) -> Self {
        Self {
            codec: FrameCodec::with_buffered(io, buffered, limits),
            state: ConnectionState::Open,
            limits: limits.clone(),
            partial: None,
            pending_pong: None,
            pending_close: None,
            peer_close_code: None,
        }
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == ConnectionState::Open
    }

    /// Close code the peer sent, if its close frame carried one.
    pub fn peer_close_code(&self) -> Option<u16> {
        self.peer_close_code
    }

    /// `true` if a pong or close reply is queued.
    pub fn has_pending(&self) -> bool {
        self.pending_pong.is_some() || self.pending_close.is_some()
    }

    fn closed_error(&self) -> Error {
        Error::ConnectionClosed(self.peer_close_code)
    }
}

fn finish_message(opcode: OpCode, payload: Vec<u8>) -> Result<Message> {
    match opcode {
        OpCode::Text => String::from_utf8(payload)
            .map(Message::Text)
            .map_err(|_| Error::InvalidUtf8),
        OpCode::Binary => Ok(Message::Binary(payload)),
        other => Err(Error::ProtocolViolation(format!(
            "{other} frame cannot start a message"
        ))),
    }
}

impl<T: AsyncRead + AsyncWrite + Unpin> Socket<T> {
    /// Send a text message as a single frame.
    ///
    /// ## Errors
    ///
    /// - `Error::CloseSent` once our close frame has gone out
    /// - `Error::ConnectionClosed` after the peer closed
    /// - I/O errors from the underlying stream
    pub async fn send_text(&mut self, text: &str) -> Result<()> {
        self.send_data(Frame::text(text.to_owned())).await
    }

    async fn send_data(&mut self, frame: Frame) -> Result<()> {
        match self.state {
            ConnectionState::Open => {}
            ConnectionState::Closing => return Err(Error::CloseSent),
            ConnectionState::Closed => return Err(self.closed_error()),
        }
        self.limits.check_message_size(frame.payload().len())?;
        self.codec.write_frame(&frame).await
    }

    /// Receive the next message.
    ///
    /// Fragmented messages are reassembled and text is UTF-8 validated.
    /// A ping queues a pong; a close from the peer queues the close reply and
    /// moves the socket to `Closed`.
    ///
    /// ## Errors
    ///
    /// - `Error::ConnectionClosed` on EOF or when called after `Closed`
    /// - protocol violations, oversized frames or messages, invalid UTF-8
    pub async fn recv(&mut self) -> Result<Message> {
        loop {
            if !self.state.can_receive() {
                return Err(self.closed_error());
            }

            let frame = match self.codec.read_frame().await {
                Ok(frame) => frame,
                Err(e) => {
                    self.state = ConnectionState::Closed;
                    return Err(e);
                }
            };

            match frame.opcode {
                OpCode::Ping => {
                    let data = frame.into_payload().to_vec();
                    if self.state == ConnectionState::Open {
                        self.pending_pong = Some(data.clone());
                    }
                    return Ok(Message::Ping(data));
                }
                OpCode::Pong => return Ok(Message::Pong(frame.into_payload().to_vec())),
                OpCode::Close => {
                    let close = match CloseFrame::parse(frame.payload()) {
                        Ok(close) => close,
                        Err(e) => {
                            self.state = ConnectionState::Closed;
                            return Err(e);
                        }
                    };
                    self.peer_close_code = close.as_ref().map(|c| c.code.as_u16());
                    if self.state == ConnectionState::Open {
                        self.pending_close = Some(Frame::close(self.peer_close_code, ""));
                    }
                    self.state = ConnectionState::Closed;
                    return Ok(Message::Close(close));
                }
                OpCode::Text | OpCode::Binary => {
                    if self.partial.is_some() {
                        return Err(Error::ProtocolViolation(
                            "data frame while a fragmented message is in progress".into(),
                        ));
                    }
                    let payload = frame.payload().to_vec();
                    if frame.fin {
                        return finish_message(frame.opcode, payload);
                    }
                    self.limits.check_message_size(payload.len())?;
                    self.partial = Some((frame.opcode, payload));
                }
                OpCode::Continuation => {
                    let Some((opcode, mut buffer)) = self.partial.take() else {
                        return Err(Error::ProtocolViolation(
                            "continuation frame without a message in progress".into(),
                        ));
                    };
                    self.limits
                        .check_message_size(buffer.len() + frame.payload().len())?;
                    buffer.extend_from_slice(frame.payload());
                    if frame.fin {
                        return finish_message(opcode, buffer);
                    }
                    self.partial = Some((opcode, buffer));
                }
            }
        }
    }

    /// Write queued protocol replies.
    ///
    /// ## Errors
    ///
    /// I/O errors from the underlying stream.
    pub async fn flush_pending(&mut self) -> Result<()> {
        if let Some(data) = self.pending_pong.take() {
            if self.state.can_send() {
                self.codec.write_frame(&Frame::pong(data)).await?;
            }
        }
        if let Some(reply) = self.pending_close.take() {
            self.codec.write_frame(&reply).await?;
            self.codec.shutdown().await?;
        }
        Ok(())
    }

    /// Start the close handshake.
    ///
    /// Only the first call on an open socket writes a close frame; later
    /// calls and calls after the peer closed do nothing.
    ///
    /// ## Errors
    ///
    /// `Error::ControlFrameTooLarge` if `reason` is longer than 123 bytes,
    /// in which case the socket stays open. I/O errors from the underlying
    /// stream.
    pub async fn close(&mut self, code: CloseCode, reason: &str) -> Result<()> {
        if self.state != ConnectionState::Open {
            return Ok(());
        }
        let frame = Frame::close(Some(code.as_u16()), reason);
        frame.validate()?;
        self.state = ConnectionState::Closing;
        self.pending_pong = None;
        self.codec.write_frame(&frame).await
    }

    /// Read and discard until the peer's close frame arrives, the stream ends
    /// or `limit` elapses, then shut the stream down.
    ///
    /// ## Errors
    ///
    /// `Error::Timeout` if the peer did not answer in time, or the error
    /// that ended the read.
    pub async fn wait_for_close(&mut self, limit: Duration) -> Result<()> {
        let drain = async {
            while self.state.can_receive() {
                match self.recv().await {
                    Ok(_) | Err(Error::ConnectionClosed(_)) => {}
                    Err(e) => return Err(e),
                }
            }
            Ok(())
        };
        let result = tokio::time::timeout(limit, drain)
            .await
            .unwrap_or(Err(Error::Timeout {
                stage: "close",
                after: limit,
            }));
        self.state = ConnectionState::Closed;
        self.pending_close = None;
        let _ = self.codec.shutdown().await;
        result
    }
}
