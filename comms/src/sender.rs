//! The implementation of the sending end of the application layer protocol.

use std::io;

use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::{FrameLenType, LEN_TYPE_SIZE, LenType, MAX_MSG_LEN, Multipart};

/// The sending end handle of the communication.
pub struct OnoSender<W>
where
    W: AsyncWrite + Unpin,
{
    tx: W,
    buf: Vec<u8>,
}

impl<W: AsyncWrite + Unpin> OnoSender<W> {
    /// Creates a new `OnoSender` instance.
    ///
    /// # Arguments
    /// * `tx` - The underlying writer.
    pub(super) fn new(tx: W) -> Self {
        Self {
            tx,
            buf: Vec::new(),
        }
    }

    /// Sends a multi-part message through the inner writer.
    ///
    /// The message is written as the body length, followed by the amount of frames
    /// and every frame prefixed by its own length.
    ///
    /// # Arguments
    /// * `msg` - The frames to send, in order.
    ///
    /// # Returns
    /// A result object that returns `io::Error` on failure.
    pub async fn send(&mut self, msg: &Multipart) -> io::Result<()> {
        let Self { buf, tx } = self;

        buf.clear();
        buf.resize(LEN_TYPE_SIZE, 0);
        buf.extend_from_slice(&frame_len(msg.len())?.to_be_bytes());

        for frame in msg {
            buf.extend_from_slice(&frame_len(frame.len())?.to_be_bytes());
            buf.extend_from_slice(frame);
        }

        let len = buf.len() - LEN_TYPE_SIZE;
        if len > MAX_MSG_LEN {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("a message can hold at most {MAX_MSG_LEN} bytes, got {len}"),
            ));
        }

        buf[..LEN_TYPE_SIZE].copy_from_slice(&(len as LenType).to_be_bytes());

        tx.write_all(buf).await?;
        tx.flush().await
    }

    /// Shuts down the writing half, the peer will observe an end of stream.
    pub async fn shutdown(&mut self) -> io::Result<()> {
        self.tx.shutdown().await
    }
}

fn frame_len(len: usize) -> io::Result<FrameLenType> {
    FrameLenType::try_from(len).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("a frame can hold at most {} bytes, got {len}", FrameLenType::MAX),
        )
    })
}
