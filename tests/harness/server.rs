//! Minimal WebSocket server speaking just enough RFC 6455 for the tests.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use wsload::compute_accept_key;

/// How the server treats each connection after the upgrade.
#[derive(Debug, Clone)]
pub enum Behavior {
    /// Reply to every text message with `ACK-<n>`.
    Ack,
    /// Echo every text message back unchanged.
    Echo,
    /// Never send data; only answer pings and close.
    Silent,
    /// Send a close frame right after the upgrade.
    CloseImmediately,
    /// Refuse the upgrade with this HTTP status.
    Reject(u16),
    /// Read and ignore everything, including the client's close frame.
    Unresponsive,
}

/// Counters shared between the test and its server.
#[derive(Debug, Default)]
pub struct ServerStats {
    pub connections: AtomicU64,
    pub upgraded: AtomicU64,
    pub texts_received: AtomicU64,
    pub closes_received: AtomicU64,
}

impl ServerStats {
    pub fn connections(&self) -> u64 {
        self.connections.load(Ordering::Relaxed)
    }

    pub fn upgraded(&self) -> u64 {
        self.upgraded.load(Ordering::Relaxed)
    }

    pub fn texts_received(&self) -> u64 {
        self.texts_received.load(Ordering::Relaxed)
    }

    pub fn closes_received(&self) -> u64 {
        self.closes_received.load(Ordering::Relaxed)
    }
}

pub struct TestServer {
    handle: JoinHandle<()>,
    pub stats: Arc<ServerStats>,
}

impl TestServer {
    /// Listen on an ephemeral localhost port.
    pub async fn spawn(behavior: Behavior) -> (Self, SocketAddr) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let stats = Arc::new(ServerStats::default());

        let server_stats = Arc::clone(&stats);
        let handle = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let behavior = behavior.clone();
                let stats = Arc::clone(&server_stats);
                tokio::spawn(async move {
                    let _ = serve(stream, behavior, stats).await;
                });
            }
        });

        (Self { handle, stats }, addr)
    }

    pub fn url(addr: SocketAddr) -> String {
        format!("ws://{addr}/")
    }

    pub async fn shutdown(self) {
        self.handle.abort();
        let _ = self.handle.await;
    }
}

/// A localhost port with nothing listening on it.
pub async fn unused_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

/// Serve one connection until the close handshake completes or the client
/// goes away.
pub async fn serve<S>(mut io: S, behavior: Behavior, stats: Arc<ServerStats>) -> std::io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stats.connections.fetch_add(1, Ordering::Relaxed);

    let request = read_request(&mut io).await?;
    if let Behavior::Reject(status) = behavior {
        let response = format!("HTTP/1.1 {status} Rejected\r\nContent-Length: 0\r\n\r\n");
        io.write_all(response.as_bytes()).await?;
        return io.shutdown().await;
    }

    let key = request
        .lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.eq_ignore_ascii_case("sec-websocket-key")
                .then(|| value.trim().to_string())
        })
        .unwrap_or_default();
    let response = format!(
        "HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\n\
         Connection: Upgrade\r\nSec-WebSocket-Accept: {}\r\n\r\n",
        compute_accept_key(&key)
    );
    io.write_all(response.as_bytes()).await?;
    stats.upgraded.fetch_add(1, Ordering::Relaxed);

    let mut sent_close = false;
    if let Behavior::CloseImmediately = behavior {
        write_frame(&mut io, 0x8, &1000u16.to_be_bytes()).await?;
        sent_close = true;
    }

    let mut acks = 0u64;
    loop {
        let Some((opcode, payload)) = read_frame(&mut io).await? else {
            return Ok(());
        };
        if let Behavior::Unresponsive = behavior {
            continue;
        }
        match opcode {
            0x1 => {
                stats.texts_received.fetch_add(1, Ordering::Relaxed);
                match behavior {
                    Behavior::Ack => {
                        acks += 1;
                        write_frame(&mut io, 0x1, format!("ACK-{acks}").as_bytes()).await?;
                    }
                    Behavior::Echo => write_frame(&mut io, 0x1, &payload).await?,
                    _ => {}
                }
            }
            0x9 => write_frame(&mut io, 0xA, &payload).await?,
            0x8 => {
                stats.closes_received.fetch_add(1, Ordering::Relaxed);
                if !sent_close {
                    write_frame(&mut io, 0x8, &payload).await?;
                }
                return io.shutdown().await;
            }
            _ => {}
        }
    }
}

async fn read_request<S: AsyncRead + Unpin>(io: &mut S) -> std::io::Result<String> {
    let mut buf = Vec::new();
    let mut byte = [0u8; 1];
    while !buf.ends_with(b"\r\n\r\n") {
        io.read_exact(&mut byte).await?;
        buf.push(byte[0]);
    }
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Read one masked client frame. `None` on EOF.
async fn read_frame<S: AsyncRead + Unpin>(io: &mut S) -> std::io::Result<Option<(u8, Vec<u8>)>> {
    let mut head = [0u8; 2];
    match io.read_exact(&mut head).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }
    let len = match head[1] & 0x7F {
        126 => io.read_u16().await? as usize,
        127 => io.read_u64().await? as usize,
        n => n as usize,
    };
    let mut mask = [0u8; 4];
    if head[1] & 0x80 != 0 {
        io.read_exact(&mut mask).await?;
    }
    let mut payload = vec![0u8; len];
    io.read_exact(&mut payload).await?;
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte ^= mask[i % 4];
    }
    Ok(Some((head[0] & 0x0F, payload)))
}

/// Write one unmasked, final server frame.
async fn write_frame<S: AsyncWrite + Unpin>(
    io: &mut S,
    opcode: u8,
    payload: &[u8],
) -> std::io::Result<()> {
    let mut frame = vec![0x80 | opcode];
    if payload.len() <= 125 {
        frame.push(payload.len() as u8);
    } else {
        frame.push(126);
        frame.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    }
    frame.extend_from_slice(payload);
    io.write_all(&frame).await?;
    io.flush().await
}
