use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::TransportError;

/// Write one frame and close our half of the connection.
///
/// The frame carries its own length and checksum, so the connection close
/// is the only delimiter needed on the wire.
pub(crate) async fn write_frame<W: AsyncWrite + Unpin>(
    stream: &mut W,
    data: &[u8],
) -> std::io::Result<()> {
    stream.write_all(data).await?;
    stream.flush().await?;
    stream.shutdown().await
}

/// Read one frame: everything until the sender closes, capped at `max_size`.
pub(crate) async fn read_frame<R: AsyncRead + Unpin>(
    stream: &mut R,
    max_size: usize,
    timeout: Duration,
) -> Result<Vec<u8>, TransportError> {
    let mut buf = Vec::new();
    let mut limited = stream.take(max_size as u64 + 1);

    tokio::time::timeout(timeout, limited.read_to_end(&mut buf))
        .await
        .map_err(|_| {
            TransportError::Receive(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "frame read timed out",
            ))
        })?
        .map_err(TransportError::Receive)?;

    if buf.len() > max_size {
        return Err(TransportError::FrameTooLarge {
            size: buf.len(),
            max: max_size,
        });
    }
    Ok(buf)
}
