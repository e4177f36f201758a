//! Duplex byte copy between an open peer channel and a local socket.

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use crate::error::TunnelError;
use crate::transport::PeerChannel;

/// Largest chunk forwarded as one channel message.
pub const CHUNK_SIZE: usize = 16 * 1024;

#[derive(Debug, Default)]
pub struct BridgeSummary {
    pub bytes_to_channel: u64,
    pub bytes_to_socket: u64,
    /// First i/o failure on either side, if any loop ended on one.
    pub error: Option<TunnelError>,
}

/// Copies `socket -> channel` and `channel -> socket` until either side
/// ends, then closes both. `shutdown` stops the bridge from outside.
///
/// Both loops watch one close token at every await, including writes into a
/// peer that stopped reading: whichever finishes first fires it and the
/// other stops. The channel is closed exactly once, after both loops have
/// returned; the socket closes when its halves drop.
pub async fn bridge<S>(channel: PeerChannel, socket: S, shutdown: CancellationToken) -> BridgeSummary
where
    S: AsyncRead + AsyncWrite + Send + Unpin,
{
    let PeerChannel { sink, mut inbound } = channel;
    let (mut reader, mut writer) = tokio::io::split(socket);
    let close = shutdown.child_token();

    let upstream = async {
        let mut buf = vec![0u8; CHUNK_SIZE];
        let mut total = 0u64;
        let result = loop {
            let read = tokio::select! {
                biased;
                _ = close.cancelled() => break Ok(()),
                read = reader.read(&mut buf) => read,
            };
            match read {
                Ok(0) => break Ok(()),
                Ok(n) => {
                    let sent = tokio::select! {
                        biased;
                        _ = close.cancelled() => break Ok(()),
                        sent = sink.send(Bytes::copy_from_slice(&buf[..n])) => sent,
                    };
                    if let Err(err) = sent {
                        break Err(err);
                    }
                    total += n as u64;
                }
                Err(err) => break Err(TunnelError::Bridge(format!("socket read: {err}"))),
            }
        };
        close.cancel();
        (total, result)
    };

    let downstream = async {
        let mut total = 0u64;
        let result = loop {
            let next = tokio::select! {
                biased;
                _ = close.cancelled() => break Ok(()),
                next = inbound.recv() => next,
            };
            let Some(chunk) = next else {
                break Ok(());
            };
            let written = tokio::select! {
                biased;
                _ = close.cancelled() => break Ok(()),
                written = writer.write_all(&chunk) => written,
            };
            if let Err(err) = written {
                break Err(TunnelError::Bridge(format!("socket write: {err}")));
            }
            total += chunk.len() as u64;
        };
        if !close.is_cancelled() {
            let _ = writer.shutdown().await;
        }
        close.cancel();
        (total, result)
    };

    let ((to_channel, up), (to_socket, down)) = tokio::join!(upstream, downstream);
    sink.close().await;

    let error = up.err().or(down.err());
    if let Some(err) = &error {
        tracing::debug!(target = "beach_tunnel::bridge", error = %err, "bridge ended on error");
    }
    tracing::debug!(
        target = "beach_tunnel::bridge",
        bytes_to_channel = to_channel,
        bytes_to_socket = to_socket,
        "bridge closed"
    );
    BridgeSummary {
        bytes_to_channel: to_channel,
        bytes_to_socket: to_socket,
        error,
    }
}
