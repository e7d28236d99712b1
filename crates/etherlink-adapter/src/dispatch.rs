//! Protocol handler registry and per-frame dispatch into guest code.

use std::collections::HashMap;

use etherlink_frame::{protocol_key, Frame, FrameError, ETH_HEADER_LEN};

use crate::guest::{GuestLayout, GuestServices, HandlerRef, HandlerRegisters};
use crate::status::EtherStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("protocol {0:#06x} already has a handler")]
    Duplicate(u16),
    #[error("protocol {0:#06x} has no handler")]
    NotFound(u16),
}

impl ProtocolError {
    pub fn status(self) -> EtherStatus {
        EtherStatus::LapProtErr
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Delivered { handler: HandlerRef, payload_len: u32 },
    NoHandler { ether_type: u16 },
    Runt { len: usize },
    Oversize { len: usize },
}

/// Registered guest handlers keyed by protocol type.
///
/// Received type/length values of 1500 or less are looked up under the 802.3 key `0`.
#[derive(Debug, Default)]
pub struct ProtocolTable {
    handlers: HashMap<u16, HandlerRef>,
}

impl ProtocolTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&mut self, protocol: u16, handler: HandlerRef) -> Result<(), ProtocolError> {
        if self.handlers.contains_key(&protocol) {
            return Err(ProtocolError::Duplicate(protocol));
        }
        self.handlers.insert(protocol, handler);
        Ok(())
    }

    pub fn detach(&mut self, protocol: u16) -> Result<HandlerRef, ProtocolError> {
        self.handlers
            .remove(&protocol)
            .ok_or(ProtocolError::NotFound(protocol))
    }

    pub fn clear(&mut self) {
        self.handlers.clear();
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Handler that would receive a frame carrying `type_or_len`.
    pub fn handler_for(&self, type_or_len: u16) -> Option<HandlerRef> {
        self.handlers
            .get(&protocol_key(type_or_len))
            .copied()
            .filter(|handler| !handler.is_none())
    }

    /// Deliver `frame` to its handler.
    ///
    /// The frame is copied to the layout's packet buffer and its header to the read-header area
    /// before the handler runs.
    pub fn dispatch(
        &self,
        frame: &Frame,
        layout: &GuestLayout,
        guest: &mut dyn GuestServices,
    ) -> DispatchOutcome {
        match frame.validate() {
            Ok(()) => {}
            Err(FrameError::TooShort { len }) => return DispatchOutcome::Runt { len },
            Err(FrameError::TooLong { len }) => return DispatchOutcome::Oversize { len },
        }
        let (Some(header), Some(ether_type)) = (frame.header(), frame.ether_type()) else {
            return DispatchOutcome::Runt { len: frame.len() };
        };
        let Some(handler) = self.handler_for(ether_type) else {
            return DispatchOutcome::NoHandler { ether_type };
        };

        let header_len = ETH_HEADER_LEN as u32;
        let payload_len = (frame.len() - ETH_HEADER_LEN) as u32;
        guest.write_memory(layout.packet_buffer, frame.as_bytes());
        guest.write_memory(layout.read_header_area, header);

        let mut registers = HandlerRegisters {
            packet_type: ether_type,
            remaining_len: payload_len,
            packet_ptr: layout.packet_buffer.wrapping_add(header_len),
            header_tail_ptr: layout.read_header_area.wrapping_add(header_len),
            read_packet_ptr: layout.read_packet,
        };
        tracing::trace!(
            ?handler,
            ether_type = format_args!("{ether_type:#06x}"),
            len = frame.len(),
            "dispatching frame"
        );
        guest.invoke_handler(handler, &mut registers);

        DispatchOutcome::Delivered {
            handler,
            payload_len,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct RecordingGuest {
        writes: Vec<(u32, Vec<u8>)>,
        calls: Vec<(HandlerRef, HandlerRegisters)>,
    }

    impl GuestServices for RecordingGuest {
        fn read_memory(&mut self, _addr: u32, buf: &mut [u8]) {
            buf.fill(0);
        }

        fn write_memory(&mut self, addr: u32, bytes: &[u8]) {
            self.writes.push((addr, bytes.to_vec()));
        }

        fn invoke_handler(&mut self, handler: HandlerRef, registers: &mut HandlerRegisters) {
            self.calls.push((handler, *registers));
        }
    }

    const LAYOUT: GuestLayout = GuestLayout {
        packet_buffer: 0x1000,
        read_header_area: 0x2000,
        read_packet: 0x3000,
    };

    fn frame(ether_type: u16, payload_len: usize) -> Frame {
        let mut bytes = vec![0u8; ETH_HEADER_LEN + payload_len];
        bytes[..6].copy_from_slice(&[0xff; 6]);
        bytes[6..12].copy_from_slice(&[0x02, 0, 0, 0, 0, 9]);
        bytes[12..14].copy_from_slice(&ether_type.to_be_bytes());
        Frame::from_vec(bytes)
    }

    #[test]
    fn duplicate_attach_keeps_first_handler() {
        let mut table = ProtocolTable::new();
        table.attach(0x809b, HandlerRef(1)).unwrap();
        assert_eq!(
            table.attach(0x809b, HandlerRef(2)),
            Err(ProtocolError::Duplicate(0x809b))
        );
        assert_eq!(table.handler_for(0x809b), Some(HandlerRef(1)));
    }

    #[test]
    fn detach_of_unknown_type_leaves_others() {
        let mut table = ProtocolTable::new();
        table.attach(0x0800, HandlerRef(1)).unwrap();
        assert_eq!(table.detach(0x86dd), Err(ProtocolError::NotFound(0x86dd)));
        assert_eq!(table.len(), 1);
        assert_eq!(table.detach(0x0800), Ok(HandlerRef(1)));
        assert!(table.is_empty());
    }

    #[test]
    fn length_fields_use_the_8023_handler() {
        let mut table = ProtocolTable::new();
        table.attach(0, HandlerRef(7)).unwrap();
        assert_eq!(table.handler_for(46), Some(HandlerRef(7)));
        assert_eq!(table.handler_for(1500), Some(HandlerRef(7)));
        assert_eq!(table.handler_for(1501), None);
    }

    #[test]
    fn dispatch_copies_frame_and_header_then_calls_handler() {
        let mut table = ProtocolTable::new();
        table.attach(0x809b, HandlerRef(0x4000)).unwrap();
        let frame = frame(0x809b, 100);
        let mut guest = RecordingGuest::default();

        let outcome = table.dispatch(&frame, &LAYOUT, &mut guest);

        assert_eq!(
            outcome,
            DispatchOutcome::Delivered {
                handler: HandlerRef(0x4000),
                payload_len: 100
            }
        );
        assert_eq!(guest.writes[0], (0x1000, frame.as_bytes().to_vec()));
        assert_eq!(guest.writes[1], (0x2000, frame.as_bytes()[..14].to_vec()));
        assert_eq!(
            guest.calls,
            vec![(
                HandlerRef(0x4000),
                HandlerRegisters {
                    packet_type: 0x809b,
                    remaining_len: 100,
                    packet_ptr: 0x100e,
                    header_tail_ptr: 0x200e,
                    read_packet_ptr: 0x3000,
                }
            )]
        );
    }

    #[test]
    fn unregistered_null_and_runt_frames_are_not_dispatched() {
        let mut table = ProtocolTable::new();
        table.attach(0x0806, HandlerRef::NONE).unwrap();
        let mut guest = RecordingGuest::default();

        assert_eq!(
            table.dispatch(&frame(0x0800, 20), &LAYOUT, &mut guest),
            DispatchOutcome::NoHandler { ether_type: 0x0800 }
        );
        assert_eq!(
            table.dispatch(&frame(0x0806, 28), &LAYOUT, &mut guest),
            DispatchOutcome::NoHandler { ether_type: 0x0806 }
        );
        assert_eq!(
            table.dispatch(&Frame::from_vec(vec![0; 13]), &LAYOUT, &mut guest),
            DispatchOutcome::Runt { len: 13 }
        );
        assert_eq!(
            table.dispatch(&frame(0x0800, 1501), &LAYOUT, &mut guest),
            DispatchOutcome::Oversize { len: 1515 }
        );
        assert!(guest.calls.is_empty());
        assert!(guest.writes.is_empty());
    }
}
