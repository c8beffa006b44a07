//! Host-level tests for the WebSocket frame codec.

use chat_portal::websocket::frame::MAX_HEADER_LEN;
use chat_portal::websocket::{
    Decoded, Flow, FrameHeader, Opcode, apply_mask, decode_frame, drain_frames,
    encode_text_frame,
};
use chat_portal::{Error, FRAME_BUFFER_LEN, FrameError, MAX_MESSAGE_LEN};

type Inbound = heapless::Vec<u8, FRAME_BUFFER_LEN>;

const KEY: [u8; 4] = [0x37, 0xFA, 0x21, 0x3D];

/// A masked client frame, as a browser would send it.
fn client_frame(first: u8, payload: &[u8], key: [u8; 4]) -> Vec<u8> {
    let mut out = vec![first];
    match payload.len() {
        len @ 0..=125 => out.push(0x80 | u8::try_from(len).unwrap()),
        len @ 126..=65535 => {
            out.push(0x80 | 126);
            out.extend_from_slice(&u16::try_from(len).unwrap().to_be_bytes());
        }
        len => {
            out.push(0x80 | 127);
            out.extend_from_slice(&u64::try_from(len).unwrap().to_be_bytes());
        }
    }
    out.extend_from_slice(&key);
    let mut masked = payload.to_vec();
    apply_mask(&mut masked, key);
    out.extend_from_slice(&masked);
    out
}

#[test]
fn decodes_the_rfc_hello_example() {
    let mut bytes = [
        0x81, 0x85, 0x37, 0xFA, 0x21, 0x3D, 0x7F, 0x9F, 0x4D, 0x51, 0x58,
    ];
    let Decoded::Frame(frame) = decode_frame(&mut bytes) else {
        panic!("expected a frame");
    };
    assert!(frame.fin);
    assert_eq!(frame.opcode, Opcode::Text);
    assert_eq!(frame.payload, b"Hello");
    assert_eq!(frame.len, 11);
}

#[test]
fn decodes_each_length_encoding() {
    for len in [0usize, 10, 125, 126, 200, 65535, 65536, 70000] {
        let payload: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
        let mut bytes = client_frame(0x81, &payload, KEY);
        let total = bytes.len();
        let Decoded::Frame(frame) = decode_frame(&mut bytes) else {
            panic!("expected a frame for {len} bytes");
        };
        assert_eq!(frame.payload, payload.as_slice(), "{len} bytes");
        assert_eq!(frame.len, total);
    }
}

#[test]
fn every_truncation_is_incomplete() {
    let payload = vec![b'x'; 200];
    let full = client_frame(0x81, &payload, KEY);
    for cut in 0..full.len() {
        let mut prefix = full[..cut].to_vec();
        assert_eq!(decode_frame(&mut prefix), Decoded::Incomplete, "cut at {cut}");
        assert_eq!(prefix, &full[..cut], "incomplete decode must not touch the buffer");
    }
}

#[test]
fn only_the_first_frame_is_consumed() {
    let mut bytes = client_frame(0x81, b"one", KEY);
    let first_len = bytes.len();
    bytes.extend(client_frame(0x81, b"two", [1, 2, 3, 4]));

    let Decoded::Frame(frame) = decode_frame(&mut bytes) else {
        panic!("expected a frame");
    };
    assert_eq!(frame.payload, b"one");
    assert_eq!(frame.len, first_len);

    let rest = &mut bytes[first_len..];
    let Decoded::Frame(frame) = decode_frame(rest) else {
        panic!("expected a second frame");
    };
    assert_eq!(frame.payload, b"two");
}

#[test]
fn control_and_fragment_frames_are_reported_as_such() {
    let mut close = client_frame(0x88, &[0x03, 0xE8], KEY);
    let Decoded::Frame(frame) = decode_frame(&mut close) else {
        panic!("expected a frame");
    };
    assert_eq!(frame.opcode, Opcode::Close);

    let mut fragment = client_frame(0x01, b"part", KEY);
    let Decoded::Frame(frame) = decode_frame(&mut fragment) else {
        panic!("expected a frame");
    };
    assert!(!frame.fin);
    assert_eq!(frame.opcode, Opcode::Text);
}

#[test]
fn unmasked_client_frame_is_invalid() {
    let mut bytes = [0x81, 0x05, b'H', b'e', b'l', b'l', b'o'];
    assert_eq!(
        decode_frame(&mut bytes),
        Decoded::Invalid(FrameError::Unmasked)
    );
}

#[test]
fn reserved_bits_are_invalid() {
    let mut bytes = client_frame(0xC1, b"hi", KEY);
    assert_eq!(
        decode_frame(&mut bytes),
        Decoded::Invalid(FrameError::ReservedBits)
    );
}

#[test]
fn oversized_64_bit_length_is_invalid() {
    let mut bytes = vec![0x81, 0x80 | 127];
    bytes.extend_from_slice(&(1u64 << 63).to_be_bytes());
    bytes.extend_from_slice(&KEY);
    assert_eq!(
        decode_frame(&mut bytes),
        Decoded::Invalid(FrameError::LengthOverflow)
    );
}

#[test]
fn mask_is_its_own_inverse() {
    let original = b"The quick brown fox".to_vec();
    let mut bytes = original.clone();
    apply_mask(&mut bytes, KEY);
    assert_ne!(bytes, original);
    apply_mask(&mut bytes, KEY);
    assert_eq!(bytes, original);
}

#[test]
fn encodes_with_the_shortest_length_form() {
    let mut out = vec![0u8; 70_000 + MAX_HEADER_LEN];

    let len = encode_text_frame(b"", &mut out).unwrap();
    assert_eq!(&out[..len], &[0x81, 0x00]);

    let len = encode_text_frame(b"0123456789", &mut out).unwrap();
    assert_eq!(&out[..2], &[0x81, 10]);
    assert_eq!(&out[2..len], b"0123456789");

    let payload = vec![b'a'; 200];
    let len = encode_text_frame(&payload, &mut out).unwrap();
    assert_eq!(&out[..4], &[0x81, 126, 0, 200]);
    assert_eq!(len, 204);

    let payload = vec![b'b'; 70_000];
    let len = encode_text_frame(&payload, &mut out).unwrap();
    assert_eq!(&out[..2], &[0x81, 127]);
    assert_eq!(&out[2..10], &70_000u64.to_be_bytes());
    assert_eq!(len, 70_010);
    assert!(out[10..len].iter().all(|&byte| byte == b'b'));
}

#[test]
fn length_form_boundaries() {
    assert_eq!(FrameHeader::text(125).as_bytes().len(), 2);
    assert_eq!(FrameHeader::text(126).as_bytes().len(), 4);
    assert_eq!(FrameHeader::text(65535).as_bytes().len(), 4);
    assert_eq!(FrameHeader::text(65536).as_bytes().len(), 10);
    assert_eq!(FrameHeader::new(Opcode::Close, 0).as_bytes(), &[0x88, 0x00]);
}

#[test]
fn encoding_into_a_short_buffer_fails() {
    let mut out = [0u8; 6];
    assert!(matches!(
        encode_text_frame(b"hello", &mut out),
        Err(Error::BufferTooSmall)
    ));
}

#[test]
fn opcode_round_trips_through_its_wire_value() {
    for bits in 0u8..16 {
        assert_eq!(u8::from(Opcode::from(bits)), bits);
    }
    assert_eq!(Opcode::from(0x3), Opcode::Reserved(0x3));
}

fn inbound(bytes: &[u8]) -> Inbound {
    Inbound::from_slice(bytes).unwrap()
}

fn drain(buffer: &mut Inbound) -> (Result<Flow, Error>, Vec<Vec<u8>>) {
    let mut relayed = Vec::new();
    let flow = drain_frames(buffer, |text| relayed.push(text.to_vec()));
    (flow, relayed)
}

#[test]
fn two_frames_in_one_read_are_both_relayed() {
    let third = client_frame(0x81, b"three", KEY);
    let mut bytes = client_frame(0x81, b"one", KEY);
    bytes.extend(client_frame(0x81, b"two", KEY));
    bytes.extend_from_slice(&third[..3]);
    let mut buffer = inbound(&bytes);

    let (flow, relayed) = drain(&mut buffer);
    assert!(matches!(flow, Ok(Flow::Continue)));
    assert_eq!(relayed, vec![b"one".to_vec(), b"two".to_vec()]);
    assert_eq!(buffer.as_slice(), &third[..3], "partial frame kept");

    buffer.extend_from_slice(&third[3..]).unwrap();
    let (flow, relayed) = drain(&mut buffer);
    assert!(matches!(flow, Ok(Flow::Continue)));
    assert_eq!(relayed, vec![b"three".to_vec()]);
    assert!(buffer.is_empty());
}

#[test]
fn close_after_text_relays_the_text_then_closes() {
    let mut bytes = client_frame(0x81, b"bye", KEY);
    bytes.extend(client_frame(0x88, b"", KEY));
    bytes.extend(client_frame(0x81, b"after close", KEY));
    let mut buffer = inbound(&bytes);

    let (flow, relayed) = drain(&mut buffer);
    assert!(matches!(flow, Ok(Flow::Close)));
    assert_eq!(relayed, vec![b"bye".to_vec()]);
}

#[test]
fn binary_ping_and_fragments_are_dropped() {
    let mut bytes = client_frame(0x82, b"\x00\x01", KEY);
    bytes.extend(client_frame(0x89, b"ping", KEY));
    bytes.extend(client_frame(0x01, b"frag", KEY));
    bytes.extend(client_frame(0x80, b"ment", KEY));
    bytes.extend(client_frame(0x81, b"text", KEY));
    let mut buffer = inbound(&bytes);

    let (flow, relayed) = drain(&mut buffer);
    assert!(matches!(flow, Ok(Flow::Continue)));
    assert_eq!(relayed, vec![b"text".to_vec()]);
    assert!(buffer.is_empty());
}

#[test]
fn largest_message_fits_and_one_more_byte_is_rejected() {
    let largest = vec![b'a'; MAX_MESSAGE_LEN + 6];
    let frame = client_frame(0x81, &largest, KEY);
    assert_eq!(frame.len(), FRAME_BUFFER_LEN);
    let mut buffer = inbound(&frame);
    let (flow, relayed) = drain(&mut buffer);
    assert!(matches!(flow, Ok(Flow::Continue)));
    assert_eq!(relayed, vec![largest]);

    let too_large = client_frame(0x81, &vec![b'a'; MAX_MESSAGE_LEN + 7], KEY);
    let mut buffer = inbound(&too_large[..FRAME_BUFFER_LEN]);
    let (flow, relayed) = drain(&mut buffer);
    assert!(matches!(flow, Err(Error::FrameTooLarge)));
    assert!(relayed.is_empty());
}

#[test]
fn unmasked_frame_in_the_buffer_is_an_error() {
    let mut buffer = inbound(&[0x81, 0x02, b'h', b'i', 0, 0]);
    let (flow, relayed) = drain(&mut buffer);
    assert!(matches!(
        flow,
        Err(Error::InvalidFrame(FrameError::Unmasked))
    ));
    assert!(relayed.is_empty());
}
