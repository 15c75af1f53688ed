//! Bidirectional byte relay between a client and a target stream

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Bytes moved in each direction over the life of a tunnel
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub client_to_target: u64,
    pub target_to_client: u64,
}

/// Relay until either side closes, fails, or `cancel` fires.
///
/// Both copy loops share `cancel`. Whichever finishes first cancels it, which
/// unblocks the other loop's pending read or write. Both streams are dropped
/// when this returns.
pub async fn relay<C, T>(
    client: C,
    target: T,
    cancel: CancellationToken,
    buffer_size: usize,
) -> RelayStats
where
    C: AsyncRead + AsyncWrite + Unpin,
    T: AsyncRead + AsyncWrite + Unpin,
{
    let (mut client_read, mut client_write) = tokio::io::split(client);
    let (mut target_read, mut target_write) = tokio::io::split(target);

    let (client_to_target, target_to_client) = tokio::join!(
        pump(
            &mut client_read,
            &mut target_write,
            &cancel,
            buffer_size,
            "client->target"
        ),
        pump(
            &mut target_read,
            &mut client_write,
            &cancel,
            buffer_size,
            "target->client"
        ),
    );

    RelayStats {
        client_to_target,
        target_to_client,
    }
}

async fn pump<R, W>(
    reader: &mut R,
    writer: &mut W,
    cancel: &CancellationToken,
    buffer_size: usize,
    direction: &'static str,
) -> u64
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buffer = vec![0u8; buffer_size];
    let mut total = 0u64;

    loop {
        let n = tokio::select! {
            _ = cancel.cancelled() => break,
            read = reader.read(&mut buffer) => match read {
                Ok(0) => {
                    debug!(direction = direction, "EOF");
                    break;
                }
                Ok(n) => n,
                Err(e) => {
                    debug!(direction = direction, "Read failed: {}", e);
                    break;
                }
            },
        };

        let written = tokio::select! {
            _ = cancel.cancelled() => break,
            written = writer.write_all(&buffer[..n]) => written,
        };
        if let Err(e) = written {
            debug!(direction = direction, "Write failed: {}", e);
            break;
        }
        total += n as u64;
    }

    cancel.cancel();
    if let Err(e) = writer.shutdown().await {
        debug!(direction = direction, "Shutdown failed: {}", e);
    }
    total
}
