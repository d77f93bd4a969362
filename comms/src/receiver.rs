use std::io;

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::{FRAME_LEN_TYPE_SIZE, FrameLenType, LEN_TYPE_SIZE, LenType, MAX_MSG_LEN, Multipart};

/// The receiving end handle of the communication.
pub struct OnoReceiver<R: AsyncRead + Unpin> {
    rx: R,
    buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin> OnoReceiver<R> {
    /// Creates a new `OnoReceiver` instance.
    ///
    /// # Arguments
    /// * `rx` - The underlying reader.
    pub(super) fn new(rx: R) -> Self {
        Self {
            rx,
            buf: Vec::new(),
        }
    }

    /// Waits to receive a new multi-part message from the inner receiver.
    ///
    /// Partially read messages are kept inside the receiver, so this future can be
    /// dropped at any point (i.e. used as a `tokio::select!` branch) without losing data.
    ///
    /// # Returns
    /// A result object that returns the frames on success or `io::Error` on failure.
    pub async fn recv(&mut self) -> io::Result<Multipart> {
        loop {
            if let Some(msg) = self.try_decode()? {
                return Ok(msg);
            }

            if self.rx.read_buf(&mut self.buf).await? == 0 {
                let text = if self.buf.is_empty() {
                    "the peer closed the connection".to_string()
                } else {
                    format!("the peer closed the connection with {} bytes unread", self.buf.len())
                };

                return Err(io::Error::new(io::ErrorKind::UnexpectedEof, text));
            }
        }
    }

    /// Tries to take a whole message out of the internal buffer.
    ///
    /// # Returns
    /// The message if it was fully buffered, `None` if more bytes are needed.
    ///
    /// # Errors
    /// Fails with `io::ErrorKind::InvalidData` if the header announces more than
    /// `MAX_MSG_LEN` bytes, before any room is reserved for them.
    fn try_decode(&mut self) -> io::Result<Option<Multipart>> {
        if self.buf.len() < LEN_TYPE_SIZE {
            return Ok(None);
        }

        let mut header = [0; LEN_TYPE_SIZE];
        header.copy_from_slice(&self.buf[..LEN_TYPE_SIZE]);
        let len = LenType::from_be_bytes(header);

        let end = usize::try_from(len)
            .ok()
            .filter(|&len| len <= MAX_MSG_LEN)
            .and_then(|len| len.checked_add(LEN_TYPE_SIZE))
            .ok_or_else(|| {
                invalid_data(format!(
                    "a message of {len} bytes exceeds the limit of {MAX_MSG_LEN}"
                ))
            })?;

        if self.buf.len() < end {
            self.buf.reserve(end - self.buf.len());
            return Ok(None);
        }

        let msg = decode_body(&self.buf[LEN_TYPE_SIZE..end])?;
        self.buf.drain(..end);
        Ok(Some(msg))
    }
}

fn decode_body(body: &[u8]) -> io::Result<Multipart> {
    let (count, mut rest) = split_len(body)?;
    let mut frames = Vec::with_capacity(count.min(rest.len() / FRAME_LEN_TYPE_SIZE));

    for i in 0..count {
        let (len, tail) = split_len(rest)?;
        if tail.len() < len {
            return Err(invalid_data(format!(
                "frame {i} claims {len} bytes but only {} remain",
                tail.len()
            )));
        }

        let (frame, tail) = tail.split_at(len);
        frames.push(frame.to_vec());
        rest = tail;
    }

    if !rest.is_empty() {
        return Err(invalid_data(format!(
            "{} trailing bytes after the last frame",
            rest.len()
        )));
    }

    Ok(frames)
}

fn split_len(buf: &[u8]) -> io::Result<(usize, &[u8])> {
    if buf.len() < FRAME_LEN_TYPE_SIZE {
        return Err(invalid_data(format!(
            "expected a {FRAME_LEN_TYPE_SIZE} byte length, got {} bytes",
            buf.len()
        )));
    }

    let (len, rest) = buf.split_at(FRAME_LEN_TYPE_SIZE);
    let mut header = [0; FRAME_LEN_TYPE_SIZE];
    header.copy_from_slice(len);
    Ok((FrameLenType::from_be_bytes(header) as usize, rest))
}

fn invalid_data(text: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, text)
}
