use std::cmp;
use std::io;
use std::str;

use bytes::Buf;
use bytes::BytesMut;
use tokio_util::codec::Decoder;
use tracing::debug;
use tracing::warn;

/// One framed line of an event stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamLine {
    /// Line content without its `\n` / `\r\n` terminator
    Text(String),
    /// Line that was not valid UTF-8 or exceeded the length limit; it
    /// spoils only the record it belongs to
    Malformed,
}

/// Splits a byte stream on `\n` and decodes each line on its own.
///
/// Unlike `LinesCodec`, a bad line never fails the stream: it is yielded
/// as [`StreamLine::Malformed`] and framing resumes at the next newline.
#[derive(Debug)]
pub(crate) struct EventLineCodec {
    max_length: usize,
    /// Bytes of the buffer already searched for a newline
    next_index: usize,
    /// Skipping the rest of an oversized line
    discarding: bool,
}

impl EventLineCodec {
    pub(crate) fn new(max_length: usize) -> Self {
        Self {
            max_length,
            next_index: 0,
            discarding: false,
        }
    }
}

fn decode_line(bytes: &[u8]) -> StreamLine {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    match str::from_utf8(bytes) {
        Ok(text) => StreamLine::Text(text.to_string()),
        Err(e) => {
            debug!("undecodable event stream line: {}", e);
            StreamLine::Malformed
        }
    }
}

impl Decoder for EventLineCodec {
    type Item = StreamLine;
    type Error = io::Error;

    fn decode(
        &mut self,
        buf: &mut BytesMut,
    ) -> Result<Option<StreamLine>, io::Error> {
        loop {
            let read_to = cmp::min(self.max_length.saturating_add(1), buf.len());
            let newline = buf[self.next_index..read_to].iter().position(|b| *b == b'\n');

            match (self.discarding, newline) {
                (true, Some(offset)) => {
                    buf.advance(self.next_index + offset + 1);
                    self.next_index = 0;
                    self.discarding = false;
                    return Ok(Some(StreamLine::Malformed));
                }
                (true, None) => {
                    buf.advance(read_to);
                    self.next_index = 0;
                    if buf.is_empty() {
                        return Ok(None);
                    }
                }
                (false, Some(offset)) => {
                    let end = self.next_index + offset;
                    self.next_index = 0;
                    let line = buf.split_to(end + 1);
                    return Ok(Some(decode_line(&line[..end])));
                }
                (false, None) if buf.len() > self.max_length => {
                    warn!(max_length = self.max_length, "event stream line too long, skipping it");
                    self.next_index = 0;
                    self.discarding = true;
                }
                (false, None) => {
                    self.next_index = read_to;
                    return Ok(None);
                }
            }
        }
    }

    fn decode_eof(
        &mut self,
        buf: &mut BytesMut,
    ) -> Result<Option<StreamLine>, io::Error> {
        if let Some(line) = self.decode(buf)? {
            return Ok(Some(line));
        }
        self.next_index = 0;
        if self.discarding {
            self.discarding = false;
            buf.clear();
            return Ok(Some(StreamLine::Malformed));
        }
        if buf.is_empty() {
            return Ok(None);
        }
        let line = buf.split_to(buf.len());
        Ok(Some(decode_line(&line)))
    }
}
