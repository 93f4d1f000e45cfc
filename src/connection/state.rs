/// Where a [`Socket`](super::Socket) is in the close handshake.
///
/// ```text
/// Open ──close()──▶ Closing ──peer close / EOF──▶ Closed
///   └──────────peer close / EOF / error──────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Open,
    /// Our close frame is out; waiting for the server's.
    Closing,
    Closed,
}

impl ConnectionState {
    #[must_use]
    pub const fn can_send(self) -> bool {
        matches!(self, Self::Open)
    }

    #[must_use]
    pub const fn can_receive(self) -> bool {
        !matches!(self, Self::Closed)
    }
}
