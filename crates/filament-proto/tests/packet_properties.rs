//! Property-based tests for the packet codec.
//!
//! Round-trip properties over arbitrary headers, meta lists and bodies,
//! verifying that magic dispatch returns the same variant with equal
//! fields for every input the fabric can produce.

use bytes::Bytes;
use filament_proto::{
    BasicPkt, Header, Location, LogicPkt, MetaEntry, MetaValue, Packet, Status,
};
use proptest::prelude::*;

fn arbitrary_status() -> impl Strategy<Value = Status> {
    prop_oneof![
        Just(Status::Success),
        Just(Status::NoDestination),
        Just(Status::InvalidCommand),
        Just(Status::InvalidPacketBody),
        Just(Status::Unauthorized),
        Just(Status::SystemException),
    ]
}

fn arbitrary_meta() -> impl Strategy<Value = MetaEntry> {
    (
        "[a-z.]{1,16}",
        prop_oneof![
            ".{0,32}".prop_map(MetaValue::String),
            any::<i64>().prop_map(MetaValue::Int),
            (-1.0e9f64..1.0e9).prop_map(MetaValue::Float),
        ],
    )
        .prop_map(|(key, value)| MetaEntry { key, value })
}

fn arbitrary_header() -> impl Strategy<Value = Header> {
    (
        "[a-z]{1,8}\\.[a-z.]{1,16}",
        ".{0,48}",
        any::<u32>(),
        arbitrary_status(),
        ".{0,24}",
        prop::collection::vec(arbitrary_meta(), 0..4),
    )
        .prop_map(|(command, channel_id, sequence, status, dest, meta)| Header {
            command,
            channel_id,
            sequence,
            status,
            dest,
            meta,
        })
}

proptest! {
    #[test]
    fn logic_packet_round_trip(
        header in arbitrary_header(),
        body in prop::collection::vec(any::<u8>(), 0..512),
    ) {
        let pkt = LogicPkt { header, body: Bytes::from(body) };

        let wire = Packet::Logic(pkt.clone()).marshal().unwrap();
        let parsed = Packet::read(&mut &wire[..]).unwrap();

        prop_assert_eq!(parsed, Packet::Logic(pkt));
    }

    #[test]
    fn basic_packet_round_trip(
        code in any::<u16>(),
        body in prop::collection::vec(any::<u8>(), 0..256),
    ) {
        let pkt = BasicPkt { code, body: Bytes::from(body) };

        let wire = Packet::Basic(pkt.clone()).marshal().unwrap();
        let parsed = Packet::read(&mut &wire[..]).unwrap();

        prop_assert_eq!(parsed, Packet::Basic(pkt));
    }

    #[test]
    fn location_round_trip(channel_id in ".{0,200}", gate_id in ".{0,64}") {
        let loc = Location { channel_id, gate_id };

        prop_assert_eq!(Location::from_bytes(&loc.to_bytes().unwrap()).unwrap(), loc);
    }
}
