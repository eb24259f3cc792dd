//! Property-based tests for the envelope codec.
//!
//! Uses proptest to verify:
//! 1. Arbitrary text never panics `decode_client`; it decodes or is rejected.
//! 2. Any well-formed `join-room` frame decodes to the room it names.
//! 3. Any well-formed `send-message` frame keeps its room, body, and sender.
//! 4. Frames with an unrecognized `event` are always `UnknownEvent`.

use proptest::prelude::*;
use serde_json::json;

use bazaar_proto::codec::{self, EnvelopeError};
use bazaar_proto::{ClientEvent, RoomId};

/// Strategy for room ids in either textual or numeric form.
fn arb_room_id() -> impl Strategy<Value = RoomId> {
    prop_oneof![
        ".{0,64}".prop_map(RoomId::from),
        any::<u64>().prop_map(RoomId::from),
        any::<i64>().prop_map(RoomId::from),
    ]
}

/// Strategy for message bodies: plain text or a small listing-like object.
fn arb_message() -> impl Strategy<Value = serde_json::Value> {
    prop_oneof![
        ".{0,256}".prop_map(serde_json::Value::from),
        (".{1,32}", any::<u32>()).prop_map(|(item, qty)| json!({"item": item, "qty": qty})),
    ]
}

proptest! {
    #[test]
    fn arbitrary_text_never_panics(text in ".{0,512}") {
        let _ = codec::decode_client(&text);
    }

    #[test]
    fn arbitrary_bytes_never_panic(bytes in prop::collection::vec(any::<u8>(), 0..512)) {
        let _ = codec::decode_client_bytes(&bytes);
    }

    #[test]
    fn join_room_decodes_named_room(room in arb_room_id()) {
        let frame = json!({"event": "join-room", "data": room.clone()}).to_string();
        prop_assert_eq!(codec::decode_client(&frame), Ok(ClientEvent::JoinRoom(room)));
    }

    #[test]
    fn send_message_keeps_fields(
        room in arb_room_id(),
        message in arb_message(),
        sender in ".{0,64}"
    ) {
        let frame = json!({
            "event": "send-message",
            "data": {"roomId": room.clone(), "message": message.clone(), "sender": sender.clone()}
        })
        .to_string();

        match codec::decode_client(&frame) {
            Ok(ClientEvent::SendMessage(msg)) => {
                prop_assert_eq!(msg.room_id, room);
                prop_assert_eq!(msg.message, message);
                prop_assert_eq!(msg.sender, sender);
            }
            other => prop_assert!(false, "expected SendMessage, got {:?}", other),
        }
    }

    #[test]
    fn unrecognized_event_is_unknown(event in "[a-z-]{1,24}", data in ".{0,32}") {
        prop_assume!(event != ClientEvent::JOIN_ROOM && event != ClientEvent::SEND_MESSAGE);
        let frame = json!({"event": event.clone(), "data": data}).to_string();
        prop_assert_eq!(codec::decode_client(&frame), Err(EnvelopeError::UnknownEvent(event)));
    }
}
