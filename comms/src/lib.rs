pub mod inproc;
pub mod item;
pub mod msg;
mod receiver;
mod router;
mod sender;

use tokio::io::{AsyncRead, AsyncWrite};

pub use item::{Step, Tagged};
pub use msg::{Capabilities, Multipart};
pub use receiver::OnoReceiver;
pub use router::{Envelope, PeerId, Router, connect};
pub use sender::OnoSender;

type LenType = u64;
const LEN_TYPE_SIZE: usize = size_of::<LenType>();

/// The largest message body accepted on the wire, in bytes.
pub const MAX_MSG_LEN: usize = 1 << 28;

type FrameLenType = u32;
const FRAME_LEN_TYPE_SIZE: usize = size_of::<FrameLenType>();

/// Creates both `OnoReceiver` and `OnoSender` network channel parts.
///
/// Given a writer and reader creates and returns both ends of the communication.
///
/// # Arguments
/// * `rx` - An async readable.
/// * `tx` - An async writable.
///
/// # Returns
/// A communication stream in the form of an ono receiver and sender.
pub fn channel<R, W>(rx: R, tx: W) -> (OnoReceiver<R>, OnoSender<W>)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    (OnoReceiver::new(rx), OnoSender::new(tx))
}
