// Copyright (c) The testwire Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Framing of raw output chunks into complete lines.
//!
//! Test processes write their protocol in arbitrarily sized chunks, which may split a line, a
//! multi-byte character or a `\r\n` pair. The [`LineFramer`] decodes the configured text encoding
//! in streaming fashion and only hands out complete lines, without their terminators.

use debug_ignore::DebugIgnore;
use encoding_rs::{CoderResult, Decoder, Encoding, UTF_8};

/// Accumulates raw chunks into complete lines.
///
/// Recognized line terminators are `\n`, `\r\n` and a lone `\r`.
#[derive(Debug)]
pub struct LineFramer {
    encoding: &'static Encoding,
    decoder: DebugIgnore<Decoder>,
    text: String,
    // Set after a `\r`: a `\n` immediately following it belongs to the same terminator.
    skip_lf: bool,
}

impl LineFramer {
    /// Creates a new framer for the given encoding.
    pub fn new(encoding: &'static Encoding) -> Self {
        Self {
            encoding,
            decoder: DebugIgnore(encoding.new_decoder_with_bom_removal()),
            text: String::new(),
            skip_lf: false,
        }
    }

    /// Creates a new framer for UTF-8 input.
    pub fn utf8() -> Self {
        Self::new(UTF_8)
    }

    /// Returns the encoding this framer decodes.
    pub fn encoding(&self) -> &'static Encoding {
        self.encoding
    }

    /// Feeds a chunk of raw output, returning all lines completed by it.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        self.decode(chunk, false);
        self.drain_lines()
    }

    /// Signals the end of the stream, returning the final unterminated line if there is one.
    ///
    /// The framer can be reused for a new stream afterwards.
    pub fn flush(&mut self) -> Option<String> {
        // Completing an incomplete sequence yields at most a replacement character, never a
        // terminator, so no further lines can be completed here.
        self.decode(&[], true);
        self.decoder = DebugIgnore(self.encoding.new_decoder_with_bom_removal());
        self.skip_lf = false;
        let remainder = std::mem::take(&mut self.text);
        (!remainder.is_empty()).then_some(remainder)
    }

    /// Returns true if no partial line is buffered.
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    fn decode(&mut self, mut input: &[u8], last: bool) {
        loop {
            let needed = self
                .decoder
                .max_utf8_buffer_length(input.len())
                .unwrap_or(input.len().saturating_mul(3).saturating_add(16));
            self.text.reserve(needed);
            let (result, read, _replaced) =
                self.decoder
                    .decode_to_string(input, &mut self.text, last);
            input = &input[read..];
            match result {
                CoderResult::InputEmpty => break,
                CoderResult::OutputFull => continue,
            }
        }
    }

    fn drain_lines(&mut self) -> Vec<String> {
        let mut lines = Vec::new();
        let mut consumed = 0;
        for (i, b) in self.text.bytes().enumerate() {
            if self.skip_lf {
                self.skip_lf = false;
                if b == b'\n' {
                    consumed = i + 1;
                    continue;
                }
            }
            match b {
                b'\n' => {
                    lines.push(self.text[consumed..i].to_owned());
                    consumed = i + 1;
                }
                b'\r' => {
                    lines.push(self.text[consumed..i].to_owned());
                    consumed = i + 1;
                    self.skip_lf = true;
                }
                _ => {}
            }
        }
        self.text.drain(..consumed);
        lines
    }
}

impl Default for LineFramer {
    fn default() -> Self {
        Self::utf8()
    }
}
