//! Length-prefixed framing over byte streams
//!
//! Every frame on the wire is a 4-byte big-endian length followed by that
//! many bytes. Reads deliver either a complete frame or nothing: a clean
//! close between frames yields `None`, a close mid-frame is an error.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use latch_core::TransportError;

/// Length prefix size in bytes
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Write one complete frame: length prefix plus body
pub async fn write_frame<W>(writer: &mut W, frame: &[u8], max: usize) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin,
{
    if frame.len() > max {
        return Err(TransportError::FrameTooLarge {
            size: frame.len(),
            max,
        });
    }
    writer.write_u32(frame.len() as u32).await?;
    writer.write_all(frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one complete frame
///
/// Returns `Ok(None)` when the peer closed the stream between frames.
pub async fn read_frame<R>(reader: &mut R, max: usize) -> Result<Option<Vec<u8>>, TransportError>
where
    R: AsyncRead + Unpin,
{
    let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
    match reader.read_exact(&mut prefix).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(prefix) as usize;
    if len > max {
        return Err(TransportError::FrameTooLarge { size: len, max });
    }

    let mut frame = vec![0u8; len];
    reader.read_exact(&mut frame).await?;
    Ok(Some(frame))
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const MAX: usize = 1024;

    #[tokio::test]
    async fn test_write_read_round_trip() {
        let (mut a, mut b) = tokio::io::duplex(4096);
        write_frame(&mut a, b"hello", MAX).await.unwrap();
        write_frame(&mut a, b"", MAX).await.unwrap();
        drop(a);

        assert_eq!(read_frame(&mut b, MAX).await.unwrap(), Some(b"hello".to_vec()));
        assert_eq!(read_frame(&mut b, MAX).await.unwrap(), Some(Vec::new()));
        assert_eq!(read_frame(&mut b, MAX).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_oversize_frame_rejected_on_write() {
        let (mut a, _b) = tokio::io::duplex(4096);
        let err = write_frame(&mut a, &vec![0u8; MAX + 1], MAX).await.unwrap_err();
        assert!(matches!(err, TransportError::FrameTooLarge { .. }));
    }

    #[tokio::test]
    async fn test_oversize_frame_rejected_on_read() {
        let (mut a, mut b) = tokio::io::duplex(4096);
        tokio::io::AsyncWriteExt::write_u32(&mut a, (MAX as u32) + 1)
            .await
            .unwrap();
        let err = read_frame(&mut b, MAX).await.unwrap_err();
        assert!(matches!(err, TransportError::FrameTooLarge { .. }));
    }

    #[tokio::test]
    async fn test_truncated_frame_is_an_error() {
        let (mut a, mut b) = tokio::io::duplex(4096);
        tokio::io::AsyncWriteExt::write_u32(&mut a, 10).await.unwrap();
        tokio::io::AsyncWriteExt::write_all(&mut a, b"abc").await.unwrap();
        drop(a);

        let err = read_frame(&mut b, MAX).await.unwrap_err();
        assert!(matches!(err, TransportError::NetworkIo(_)));
    }
}
