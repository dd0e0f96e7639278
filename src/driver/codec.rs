//! Line codec for the child's event stream.
//!
//! Wraps [`tokio_util::codec::LinesCodec`] with a maximum line length,
//! then normalizes each decoded line by stripping ANSI escape and
//! control sequences. The partial trailing fragment of a chunk stays in
//! the framing buffer, so splitting the raw stream at arbitrary byte
//! boundaries yields the same decoded lines as feeding it whole.

use std::sync::LazyLock;

use bytes::BytesMut;
use regex::Regex;
use tokio_util::codec::{Decoder, LinesCodec, LinesCodecError};

use crate::{AppError, Result};

/// Maximum line length accepted from the child: 1 MiB.
///
/// Longer lines cause [`EventStreamCodec::decode`] to return
/// [`AppError::Decode`] rather than allocating without bound.
pub const MAX_LINE_BYTES: usize = 1_048_576;

/// CSI / OSC / single-character ANSI escape sequences.
static ANSI_SEQUENCES: LazyLock<Regex> = LazyLock::new(|| {
    match Regex::new(r"\x1b(?:\[[0-9;?]*[ -/]*[@-~]|\][^\x07\x1b]*(?:\x07|\x1b\\)?|[@-Z\\^_])") {
        Ok(pattern) => pattern,
        Err(err) => unreachable!("ANSI pattern is a checked constant: {err}"),
    }
});

/// Strip ANSI escape sequences and stray control characters from a line.
///
/// Tabs are preserved; carriage returns and other C0 controls are not.
#[must_use]
pub fn strip_control_sequences(line: &str) -> String {
    let without_ansi = ANSI_SEQUENCES.replace_all(line, "");
    without_ansi
        .chars()
        .filter(|c| !c.is_control() || *c == '\t')
        .collect()
}

/// Newline framing codec over the child's stdout.
#[derive(Debug)]
pub struct EventStreamCodec(LinesCodec);

impl EventStreamCodec {
    /// Create a codec with the default [`MAX_LINE_BYTES`] limit.
    #[must_use]
    pub fn new() -> Self {
        Self(LinesCodec::new_with_max_length(MAX_LINE_BYTES))
    }
}

impl Default for EventStreamCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for EventStreamCodec {
    type Item = String;
    type Error = AppError;

    /// Decode the next complete line, normalized.
    ///
    /// Returns `Ok(None)` while the buffer holds only a partial line.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        match self.0.decode(src).map_err(map_codec_error)? {
            Some(line) => Ok(Some(strip_control_sequences(&line))),
            None => Ok(None),
        }
    }

    /// Decode the final (possibly unterminated) line at EOF.
    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        match self.0.decode_eof(src).map_err(map_codec_error)? {
            Some(line) => Ok(Some(strip_control_sequences(&line))),
            None => Ok(None),
        }
    }
}

fn map_codec_error(e: LinesCodecError) -> AppError {
    match e {
        LinesCodecError::MaxLineLengthExceeded => {
            AppError::Decode(format!("line too long: exceeded {MAX_LINE_BYTES} bytes"))
        }
        LinesCodecError::Io(io_err) => AppError::Io(io_err.to_string()),
    }
}
