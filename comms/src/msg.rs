//! Wire tags and frame codecs shared by the broker, its workers and the clients.

use std::io;

use serde::{Deserialize, Serialize, de::DeserializeOwned};

/// A multi-part message, every element is a single frame.
pub type Multipart = Vec<Vec<u8>>;

/// The single frame a client sends to open a session.
pub const GREETING: &[u8] = b"servus";

/// The single frame requesting every pending step to be flushed.
pub const FLUSH: &[u8] = b"adieu";

/// The external identifier reserved for synthetic barrier acknowledgements.
pub const SENTINEL_ID: u32 = u32::MAX;

type IdType = u32;
const ID_SIZE: usize = size_of::<IdType>();

/// The batching constraints agreed across every configured engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub work_group_size: usize,
    pub max_bunch_size: usize,
}

impl Capabilities {
    /// Encodes the capabilities as the greeting reply frame, a `(group, max)` pair.
    ///
    /// # Errors
    /// Fails with `io::ErrorKind::InvalidData` if a size doesn't fit the wire's `u32`.
    pub fn to_frame(&self) -> io::Result<Vec<u8>> {
        let pair: (u32, u32) = (
            size_to_wire(self.work_group_size)?,
            size_to_wire(self.max_bunch_size)?,
        );
        serde_json::to_vec(&pair).map_err(io::Error::from)
    }

    /// Decodes the capabilities from a greeting reply frame.
    pub fn from_frame(frame: &[u8]) -> io::Result<Self> {
        let (work_group_size, max_bunch_size): (u32, u32) = serde_json::from_slice(frame)?;

        Ok(Self {
            work_group_size: size_from_wire(work_group_size)?,
            max_bunch_size: size_from_wire(max_bunch_size)?,
        })
    }
}

fn size_to_wire(size: usize) -> io::Result<u32> {
    u32::try_from(size).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("a size of {size} doesn't fit the capabilities frame"),
        )
    })
}

fn size_from_wire(size: u32) -> io::Result<usize> {
    usize::try_from(size).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("a size of {size} doesn't fit this platform"),
        )
    })
}

/// Returns true if `msg` is the single frame `tag`.
pub fn is_tag(msg: &Multipart, tag: &[u8]) -> bool {
    matches!(msg.as_slice(), [frame] if frame == tag)
}

/// Returns true if `msg` is a worker's idle signal, a single empty frame.
pub fn is_idle_signal(msg: &Multipart) -> bool {
    matches!(msg.as_slice(), [frame] if frame.is_empty())
}

/// The idle signal a worker sends whenever it's able to take more work.
pub fn idle_signal() -> Multipart {
    vec![Vec::new()]
}

/// Encodes an identifier frame.
pub fn encode_id(id: u32) -> Vec<u8> {
    id.to_be_bytes().to_vec()
}

/// Decodes an identifier frame.
pub fn decode_id(frame: &[u8]) -> io::Result<u32> {
    let bytes: [u8; ID_SIZE] = frame.try_into().map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("an identifier frame must be {ID_SIZE} bytes, got {}", frame.len()),
        )
    })?;

    Ok(IdType::from_be_bytes(bytes))
}

/// Encodes the client side barrier flag frame.
pub fn encode_flag(flag: bool) -> Vec<u8> {
    vec![flag as u8]
}

/// Decodes the client side barrier flag frame.
pub fn decode_flag(frame: &[u8]) -> io::Result<bool> {
    match frame {
        [0] => Ok(false),
        [1] => Ok(true),
        other => Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("invalid barrier flag frame {other:?}"),
        )),
    }
}

/// Encodes a sequence of items into a single frame.
pub fn encode_items<T: Serialize>(items: &[T]) -> io::Result<Vec<u8>> {
    serde_json::to_vec(items).map_err(io::Error::from)
}

/// Decodes a sequence of items from a single frame.
pub fn decode_items<T: DeserializeOwned>(frame: &[u8]) -> io::Result<Vec<T>> {
    serde_json::from_slice(frame).map_err(io::Error::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capabilities_travel_as_a_pair() {
        let caps = Capabilities {
            work_group_size: 32,
            max_bunch_size: 1024,
        };

        let frame = caps.to_frame().unwrap();
        assert_eq!(frame, b"[32,1024]");
        assert_eq!(Capabilities::from_frame(&frame).unwrap(), caps);
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn oversized_capabilities_are_not_truncated() {
        let caps = Capabilities {
            work_group_size: 1,
            max_bunch_size: u32::MAX as usize + 1,
        };

        let err = caps.to_frame().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn id_frames_have_a_fixed_width() {
        assert_eq!(decode_id(&encode_id(7)).unwrap(), 7);
        assert_eq!(decode_id(&encode_id(SENTINEL_ID)).unwrap(), u32::MAX);

        let err = decode_id(&[1, 2, 3]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn tags_are_matched_on_single_frames_only() {
        assert!(is_tag(&vec![FLUSH.to_vec()], FLUSH));
        assert!(!is_tag(&vec![FLUSH.to_vec(), Vec::new()], FLUSH));
        assert!(!is_tag(&vec![GREETING.to_vec()], FLUSH));
        assert!(is_idle_signal(&idle_signal()));
        assert!(!is_idle_signal(&vec![Vec::new(), Vec::new()]));
    }

    #[test]
    fn flag_frames_reject_garbage() {
        assert!(decode_flag(&encode_flag(true)).unwrap());
        assert!(!decode_flag(&encode_flag(false)).unwrap());
        assert!(decode_flag(&[2]).is_err());
        assert!(decode_flag(&[]).is_err());
    }
}
