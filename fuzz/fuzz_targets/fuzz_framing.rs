#![no_main]

//! Fuzz target for NDJSON framing.
//!
//! `parse_frame` and `parse_body` must never panic and must only accept JSON
//! objects. The stream reader must run to EOF over arbitrary garbage between
//! records, whatever its size limit.

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;

use stdiogate::framing::{FrameReader, parse_body, parse_frame};

#[derive(Arbitrary, Debug)]
struct FuzzFramingInput {
    /// Raw bytes to parse as a body
    raw_bytes: Vec<u8>,
    /// Lines fed through the stream reader
    lines: Vec<Vec<u8>>,
    /// Per-reader size limit, clamped to a small range
    max_bytes: u16,
}

fuzz_target!(|input: FuzzFramingInput| {
    if let Ok(frame) = parse_body(&input.raw_bytes) {
        assert!(frame.message.is_object());
    }
    if let Ok(text) = std::str::from_utf8(&input.raw_bytes) {
        let _ = parse_frame(text);
    }

    let mut stream = Vec::new();
    for line in &input.lines {
        stream.extend_from_slice(line);
        stream.push(b'\n');
    }
    let max_bytes = usize::from(input.max_bytes).clamp(16, 4096);

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    rt.block_on(async {
        let mut reader = FrameReader::with_max_bytes(stream.as_slice(), max_bytes);
        while let Some(item) = reader.next_frame().await {
            if let Ok(frame) = item {
                assert!(frame.message.is_object());
            }
        }
    });
});
