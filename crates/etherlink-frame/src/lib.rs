//! Ethernet frame buffers shared by every `etherlink` crate.
//!
//! A [`Frame`] is an owned byte buffer holding one link-layer packet (14-byte header plus up to
//! 1500 bytes of payload). Backends hand frames to the reception pipeline without validating them;
//! the length checks happen right before dispatch so that short reads can be discarded instead of
//! being reported as transport errors.
#![forbid(unsafe_code)]

use core::fmt;

/// Size of the Ethernet header (destination, source, type/length).
pub const ETH_HEADER_LEN: usize = 14;

/// Largest payload carried by a single frame.
pub const ETH_MAX_PAYLOAD_LEN: usize = 1500;

/// Largest frame (header + payload) accepted in either direction.
pub const ETH_MAX_FRAME_LEN: usize = ETH_HEADER_LEN + ETH_MAX_PAYLOAD_LEN;

/// Byte offset of the 16-bit type/length field.
pub const ETH_TYPE_OFFSET: usize = 12;

/// Type/length values up to and including this one are 802.3 lengths, not protocol types.
pub const ETH_MAX_8023_LENGTH: u16 = 1500;

/// Dispatch key shared by every 802.3 (length-field) frame.
pub const DEFAULT_PROTOCOL_KEY: u16 = 0;

/// Map a type/length field to the key used by protocol dispatch.
///
/// 802.3 frames carry a length instead of a protocol type, so they all share
/// [`DEFAULT_PROTOCOL_KEY`].
pub fn protocol_key(type_or_len: u16) -> u16 {
    if type_or_len <= ETH_MAX_8023_LENGTH {
        DEFAULT_PROTOCOL_KEY
    } else {
        type_or_len
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("frame too short: {len} bytes (need at least {})", ETH_HEADER_LEN)]
    TooShort { len: usize },
    #[error("frame too long: {len} bytes (limit {})", ETH_MAX_FRAME_LEN)]
    TooLong { len: usize },
}

/// Check that `len` is a valid frame length.
pub fn check_frame_len(len: usize) -> Result<(), FrameError> {
    if len < ETH_HEADER_LEN {
        return Err(FrameError::TooShort { len });
    }
    if len > ETH_MAX_FRAME_LEN {
        return Err(FrameError::TooLong { len });
    }
    Ok(())
}

/// 48-bit hardware address.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
    pub const BROADCAST: MacAddr = MacAddr([0xff; 6]);

    pub const fn new(octets: [u8; 6]) -> Self {
        Self(octets)
    }

    pub const fn octets(self) -> [u8; 6] {
        self.0
    }

    /// Group (multicast or broadcast) addresses have the low bit of the first octet set.
    pub const fn is_group(self) -> bool {
        self.0[0] & 1 != 0
    }

    /// Locally administered address of the form `fe:fd:<tag as 4 big-endian bytes>`.
    ///
    /// Host tap drivers use the low 32 bits to identify the owning process.
    pub const fn from_host_tag(tag: u32) -> Self {
        let t = tag.to_be_bytes();
        Self([0xfe, 0xfd, t[0], t[1], t[2], t[3]])
    }

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let octets: [u8; 6] = bytes.get(..6)?.try_into().ok()?;
        Some(Self(octets))
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

impl fmt::Debug for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MacAddr({self})")
    }
}

/// One received or transmitted Ethernet frame.
///
/// The buffer is not validated on construction; use [`Frame::validate`] (or the accessors that
/// return `Option`) before interpreting the header.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct Frame {
    bytes: Vec<u8>,
}

impl Frame {
    pub fn from_vec(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn copy_from_slice(bytes: &[u8]) -> Self {
        Self {
            bytes: bytes.to_vec(),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// A runt cannot hold a complete header and is discarded before dispatch.
    pub fn is_runt(&self) -> bool {
        self.bytes.len() < ETH_HEADER_LEN
    }

    pub fn validate(&self) -> Result<(), FrameError> {
        check_frame_len(self.bytes.len())
    }

    pub fn destination(&self) -> Option<MacAddr> {
        MacAddr::from_slice(self.bytes.get(0..6)?)
    }

    pub fn source(&self) -> Option<MacAddr> {
        MacAddr::from_slice(self.bytes.get(6..12)?)
    }

    /// Raw type/length field (big-endian at offset 12).
    pub fn ether_type(&self) -> Option<u16> {
        let field = self.bytes.get(ETH_TYPE_OFFSET..ETH_HEADER_LEN)?;
        Some(u16::from_be_bytes([field[0], field[1]]))
    }

    pub fn header(&self) -> Option<&[u8]> {
        self.bytes.get(..ETH_HEADER_LEN)
    }

    /// Everything after the header.
    pub fn payload(&self) -> Option<&[u8]> {
        self.bytes.get(ETH_HEADER_LEN..)
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("len", &self.bytes.len())
            .field("ether_type", &self.ether_type())
            .finish()
    }
}

impl From<Vec<u8>> for Frame {
    fn from(bytes: Vec<u8>) -> Self {
        Self::from_vec(bytes)
    }
}

impl AsRef<[u8]> for Frame {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}

/// Host-transport framing quirk applied around every frame.
///
/// Linux ethertap devices put two meaningless bytes in front of each packet. They are stripped on
/// receive and re-added (as zeros) on send so the rest of the stack only ever sees plain frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkPadding {
    #[default]
    None,
    LeadingPad2,
}

impl LinkPadding {
    pub const fn prefix_len(self) -> usize {
        match self {
            LinkPadding::None => 0,
            LinkPadding::LeadingPad2 => 2,
        }
    }

    /// Size of the read buffer needed to receive a maximum-length frame.
    pub const fn read_capacity(self) -> usize {
        ETH_MAX_FRAME_LEN + self.prefix_len()
    }

    /// Remove the leading pad from a received buffer.
    ///
    /// Buffers shorter than the pad become empty frames (and are later discarded as runts).
    pub fn strip(self, mut buf: Vec<u8>) -> Frame {
        let pad = self.prefix_len().min(buf.len());
        buf.drain(..pad);
        Frame::from_vec(buf)
    }

    /// Build the on-the-wire buffer for an outbound frame.
    pub fn apply(self, frame: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.prefix_len() + frame.len());
        out.resize(self.prefix_len(), 0);
        out.extend_from_slice(frame);
        out
    }
}
