//! Unit tests for the stdout line codec.
//!
//! Validates chunk-boundary independence, ANSI/control stripping, and
//! the maximum line length guard.

use bytes::BytesMut;
use tokio_util::codec::Decoder;

use session_relay::driver::codec::{strip_control_sequences, EventStreamCodec, MAX_LINE_BYTES};

/// Decode a stream fed in `chunks`, collecting every complete line.
fn decode_chunked(chunks: &[&[u8]]) -> Vec<String> {
    let mut codec = EventStreamCodec::new();
    let mut buf = BytesMut::new();
    let mut lines = Vec::new();
    for chunk in chunks {
        buf.extend_from_slice(chunk);
        while let Some(line) = codec.decode(&mut buf).expect("decode") {
            lines.push(line);
        }
    }
    while let Some(line) = codec.decode_eof(&mut buf).expect("decode_eof") {
        lines.push(line);
    }
    lines
}

#[test]
fn splitting_at_arbitrary_boundaries_is_equivalent() {
    let stream = b"{\"type\":\"system\"}\nhello world\npartial tail";
    let whole = decode_chunked(&[stream]);

    // Split at every byte boundary and compare against the whole-stream
    // decode.
    for split in 1..stream.len() {
        let (a, b) = stream.split_at(split);
        let pieces = decode_chunked(&[a, b]);
        assert_eq!(pieces, whole, "split at byte {split} diverged");
    }
}

#[test]
fn partial_fragment_is_retained_until_newline() {
    let mut codec = EventStreamCodec::new();
    let mut buf = BytesMut::from(&b"no newline yet"[..]);
    assert!(codec.decode(&mut buf).expect("decode").is_none());

    buf.extend_from_slice(b" done\n");
    let line = codec.decode(&mut buf).expect("decode").expect("line");
    assert_eq!(line, "no newline yet done");
}

#[test]
fn crlf_line_endings_are_normalized() {
    let lines = decode_chunked(&[b"first\r\nsecond\r\n"]);
    assert_eq!(lines, vec!["first", "second"]);
}

#[test]
fn ansi_sequences_are_stripped() {
    assert_eq!(
        strip_control_sequences("\x1b[31mred\x1b[0m plain"),
        "red plain"
    );
    assert_eq!(
        strip_control_sequences("\x1b]0;title\x07body"),
        "body"
    );
    assert_eq!(strip_control_sequences("keep\ttab"), "keep\ttab");
    assert_eq!(strip_control_sequences("drop\x08bell\x07"), "dropbell");
}

#[test]
fn ansi_inside_a_line_survives_chunk_splits() {
    let stream = b"\x1b[1mbold\x1b[22m text\n";
    let whole = decode_chunked(&[stream]);
    for split in 1..stream.len() {
        let (a, b) = stream.split_at(split);
        assert_eq!(decode_chunked(&[a, b]), whole, "split at byte {split}");
    }
    assert_eq!(whole, vec!["bold text"]);
}

#[test]
fn oversized_line_is_an_error_not_an_allocation() {
    let mut codec = EventStreamCodec::new();
    let mut buf = BytesMut::new();
    buf.extend_from_slice(&vec![b'x'; MAX_LINE_BYTES + 2]);
    buf.extend_from_slice(b"\n");
    let err = codec.decode(&mut buf).expect_err("line too long");
    assert!(err.to_string().contains("line too long"), "{err}");
}

#[test]
fn eof_flushes_the_trailing_fragment() {
    let lines = decode_chunked(&[b"complete\ntrailing"]);
    assert_eq!(lines, vec!["complete", "trailing"]);
}
