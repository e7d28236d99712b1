mod common;

use common::{RecordingGuest, LAYOUT};
use etherlink_adapter::{DispatchOutcome, GuestServices, HandlerRef, ProtocolTable};
use etherlink_frame::{Frame, ETH_HEADER_LEN, ETH_MAX_FRAME_LEN};
use proptest::prelude::*;

fn frame_of(len: usize, ether_type: u16, fill: u8) -> Frame {
    let mut bytes = vec![fill; len];
    if len >= ETH_HEADER_LEN {
        bytes[12..14].copy_from_slice(&ether_type.to_be_bytes());
    }
    Frame::from_vec(bytes)
}

proptest! {
    #[test]
    fn every_valid_length_dispatches_once(
        len in ETH_HEADER_LEN..=ETH_MAX_FRAME_LEN,
        ether_type in any::<u16>(),
        fill in any::<u8>(),
    ) {
        let mut table = ProtocolTable::new();
        table.attach(0, HandlerRef(1)).unwrap();
        if ether_type > 1500 {
            table.attach(ether_type, HandlerRef(2)).unwrap();
        }
        let mut guest = RecordingGuest::default();
        guest.enter_interrupt();
        let frame = frame_of(len, ether_type, fill);

        let outcome = table.dispatch(&frame, &LAYOUT, &mut guest);

        let expected_len = (len - ETH_HEADER_LEN) as u32;
        prop_assert!(matches!(
            outcome,
            DispatchOutcome::Delivered { payload_len, .. } if payload_len == expected_len
        ), "unexpected outcome: {:?}", outcome);
        prop_assert_eq!(guest.calls.len(), 1);
        prop_assert_eq!(guest.calls[0].1.remaining_len, expected_len);
        prop_assert_eq!(guest.calls[0].1.packet_type, ether_type);
    }

    #[test]
    fn short_frames_never_reach_a_handler(len in 0..ETH_HEADER_LEN, fill in any::<u8>()) {
        let mut table = ProtocolTable::new();
        table.attach(0, HandlerRef(1)).unwrap();
        let mut guest = RecordingGuest::default();
        guest.enter_interrupt();

        let outcome = table.dispatch(&frame_of(len, 0, fill), &LAYOUT, &mut guest);

        prop_assert_eq!(outcome, DispatchOutcome::Runt { len });
        prop_assert!(guest.calls.is_empty());
    }
}
