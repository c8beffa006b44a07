//! Host-level tests for request-head accumulation and parsing.

use chat_portal::{Error, HeadBuffer, HeadStatus, RequestHead};

#[test]
fn terminator_split_across_reads_is_found() {
    let mut head = HeadBuffer::<128>::new();
    assert_eq!(head.push(b"GET / HTTP/1.1\r\nHost: x\r"), HeadStatus::Partial);
    assert_eq!(head.push(b"\n\r"), HeadStatus::Partial);
    assert_eq!(head.push(b"\n"), HeadStatus::Complete(27));
    assert_eq!(head.head().unwrap(), b"GET / HTTP/1.1\r\nHost: x\r\n\r\n");
    assert!(head.trailing().is_empty());
}

#[test]
fn bytes_after_the_head_are_kept() {
    let mut head = HeadBuffer::<64>::new();
    let status = head.push(b"GET /ws HTTP/1.1\r\n\r\n\x81\x80abcd");
    assert_eq!(status, HeadStatus::Complete(20));
    assert_eq!(head.trailing(), b"\x81\x80abcd");
}

#[test]
fn overflow_without_terminator() {
    let mut head = HeadBuffer::<16>::new();
    assert_eq!(head.push(b"GET /0123456789"), HeadStatus::Partial);
    assert_eq!(head.push(b"abcdef"), HeadStatus::Overflow);
    assert_eq!(head.as_bytes().len(), 16);
    assert_eq!(head.head(), None);
}

#[test]
fn excess_after_a_complete_head_is_not_an_overflow() {
    let mut head = HeadBuffer::<24>::new();
    let status = head.push(b"GET / HTTP/1.1\r\n\r\nmore than fits here");
    assert_eq!(status, HeadStatus::Complete(18));
    assert_eq!(head.trailing(), b"more t");
}

#[test]
fn parses_request_line_and_headers() {
    let bytes = b"GET /chat?x=1 HTTP/1.1\r\nHost: 192.168.4.1\r\nUpgrade:  websocket \r\n\r\n";
    let request = RequestHead::parse(bytes).unwrap();
    assert_eq!(request.method(), "GET");
    assert_eq!(request.path(), "/chat?x=1");
    assert_eq!(request.header("host"), Some("192.168.4.1"));
    assert_eq!(request.header("UPGRADE"), Some("websocket"));
    assert_eq!(request.header("Origin"), None);
    assert_eq!(request.headers().count(), 2);
}

#[test]
fn request_line_alone_is_enough() {
    let request = RequestHead::parse(b"GET /generate_204 HTTP/1.1\r\nHost: conn").unwrap();
    assert_eq!(request.path(), "/generate_204");

    let request = RequestHead::parse(b"GET /").unwrap();
    assert_eq!(request.path(), "/");
}

#[test]
fn cut_inside_a_utf8_character_keeps_the_valid_prefix() {
    let request = RequestHead::parse(b"GET /caf\xC3").unwrap();
    assert_eq!(request.path(), "/caf");
}

#[test]
fn missing_path_is_malformed() {
    assert!(matches!(
        RequestHead::parse(b"GET\r\n\r\n"),
        Err(Error::MalformedRequest)
    ));
    assert!(matches!(RequestHead::parse(b""), Err(Error::MalformedRequest)));
    assert!(matches!(
        RequestHead::parse(b"GET \xFF\xFE HTTP/1.1\r\n\r\n"),
        Err(Error::MalformedRequest)
    ));
}
