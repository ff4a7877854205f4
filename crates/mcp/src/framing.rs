// Newline-delimited JSON framing over a byte stream

use crate::error::FramingError;
use crate::protocol::Message;
use bytes::{BufMut, BytesMut};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{Decoder, Encoder, FramedRead, FramedWrite};

/// Longest record accepted before it is discarded (4 MiB)
pub const DEFAULT_MAX_LINE_LENGTH: usize = 4 * 1024 * 1024;

/// Consecutive malformed records tolerated before the connection is dropped
pub const DEFAULT_MAX_CONSECUTIVE_MALFORMED: u32 = 32;

const PREVIEW_CHARS: usize = 120;

/// Limits applied by the framing layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FramingLimits {
    #[serde(default = "default_max_line_length")]
    pub max_line_length: usize,

    /// 0 tolerates malformed records forever
    #[serde(default = "default_max_consecutive_malformed")]
    pub max_consecutive_malformed: u32,
}

fn default_max_line_length() -> usize {
    DEFAULT_MAX_LINE_LENGTH
}

fn default_max_consecutive_malformed() -> u32 {
    DEFAULT_MAX_CONSECUTIVE_MALFORMED
}

impl Default for FramingLimits {
    fn default() -> Self {
        Self {
            max_line_length: default_max_line_length(),
            max_consecutive_malformed: default_max_consecutive_malformed(),
        }
    }
}

/// A record that was terminated but could not be decoded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedRecord {
    pub reason: String,
    /// Leading characters of the record, for logs
    pub preview: String,
}

impl MalformedRecord {
    fn new(reason: impl Into<String>, raw: &[u8]) -> Self {
        Self {
            reason: reason.into(),
            preview: String::from_utf8_lossy(raw).chars().take(PREVIEW_CHARS).collect(),
        }
    }
}

/// One decoded record
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Message(Message),
    Malformed(MalformedRecord),
}

/// Codec for one JSON object per `\n`-terminated line.
///
/// Partial records stay buffered until their terminator arrives. Oversized
/// records are dropped up to the next terminator and reported as malformed.
#[derive(Debug, Clone)]
pub struct MessageCodec {
    max_line_length: usize,
    /// Bytes already scanned for a terminator
    next_index: usize,
    /// Inside an oversized record
    discarding: bool,
}

impl MessageCodec {
    pub fn new() -> Self {
        Self::with_max_line_length(DEFAULT_MAX_LINE_LENGTH)
    }

    pub fn with_max_line_length(max_line_length: usize) -> Self {
        Self {
            max_line_length,
            next_index: 0,
            discarding: false,
        }
    }

    fn reset(&mut self, buf: &mut BytesMut) {
        buf.clear();
        self.next_index = 0;
        self.discarding = false;
    }
}

impl Default for MessageCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for MessageCodec {
    type Item = Frame;
    type Error = FramingError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Frame>, FramingError> {
        loop {
            let terminator = buf[self.next_index..]
                .iter()
                .position(|b| *b == b'\n')
                .map(|offset| self.next_index + offset);

            let Some(end) = terminator else {
                if self.discarding {
                    buf.clear();
                    self.next_index = 0;
                } else if buf.len() > self.max_line_length {
                    self.discarding = true;
                    buf.clear();
                    self.next_index = 0;
                } else {
                    self.next_index = buf.len();
                }
                return Ok(None);
            };

            self.next_index = 0;
            let record = buf.split_to(end + 1);

            if std::mem::take(&mut self.discarding) || end > self.max_line_length {
                return Ok(Some(Frame::Malformed(MalformedRecord::new(
                    format!("record exceeds {} bytes", self.max_line_length),
                    &record[..end.min(PREVIEW_CHARS)],
                ))));
            }

            let line = strip_carriage_return(&record[..end]);
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }

            return Ok(Some(decode_record(line)));
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Frame>, FramingError> {
        if let Some(frame) = self.decode(buf)? {
            return Ok(Some(frame));
        }

        let blank = buf.iter().all(u8::is_ascii_whitespace) && !self.discarding;
        let residue = MalformedRecord::new("unterminated record at end of stream", &buf[..]);
        self.reset(buf);

        if blank {
            Ok(None)
        } else {
            Ok(Some(Frame::Malformed(residue)))
        }
    }
}

impl<'a> Encoder<&'a Message> for MessageCodec {
    type Error = FramingError;

    fn encode(&mut self, item: &'a Message, dst: &mut BytesMut) -> Result<(), FramingError> {
        let json = item.to_json()?;
        dst.reserve(json.len() + 1);
        dst.put_slice(json.as_bytes());
        dst.put_u8(b'\n');
        Ok(())
    }
}

fn strip_carriage_return(line: &[u8]) -> &[u8] {
    line.strip_suffix(b"\r").unwrap_or(line)
}

fn decode_record(line: &[u8]) -> Frame {
    let text = match std::str::from_utf8(line) {
        Ok(text) => text,
        Err(_) => return Frame::Malformed(MalformedRecord::new("invalid UTF-8", line)),
    };

    match Message::parse(text) {
        Ok(message) => Frame::Message(message),
        Err(e) => Frame::Malformed(MalformedRecord::new(e.to_string(), line)),
    }
}

/// Outcome of a single receive
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Message(Message),
    /// Recoverable: the record was dropped and the stream is still usable
    Malformed(MalformedRecord),
    /// Peer closed its end
    EndOfStream,
}

/// Reading half of a connection
pub struct FrameReader<R> {
    frames: FramedRead<R, MessageCodec>,
    max_consecutive_malformed: u32,
    consecutive_malformed: u32,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self::with_limits(reader, &FramingLimits::default())
    }

    pub fn with_limits(reader: R, limits: &FramingLimits) -> Self {
        Self {
            frames: FramedRead::new(reader, MessageCodec::with_max_line_length(limits.max_line_length)),
            max_consecutive_malformed: limits.max_consecutive_malformed,
            consecutive_malformed: 0,
        }
    }

    /// Wait for the next record and report exactly what arrived
    pub async fn next_inbound(&mut self) -> Result<Inbound, FramingError> {
        match self.frames.next().await {
            None => Ok(Inbound::EndOfStream),
            Some(Ok(Frame::Message(message))) => Ok(Inbound::Message(message)),
            Some(Ok(Frame::Malformed(record))) => Ok(Inbound::Malformed(record)),
            Some(Err(e)) => Err(e),
        }
    }

    /// Wait for the next well-formed message.
    ///
    /// Malformed records are logged and skipped. Returns `Ok(None)` once the
    /// peer has closed the stream.
    pub async fn receive(&mut self) -> Result<Option<Message>, FramingError> {
        loop {
            match self.next_inbound().await? {
                Inbound::Message(message) => {
                    self.consecutive_malformed = 0;
                    return Ok(Some(message));
                }
                Inbound::EndOfStream => return Ok(None),
                Inbound::Malformed(record) => {
                    self.consecutive_malformed += 1;
                    tracing::warn!(
                        reason = %record.reason,
                        preview = %record.preview,
                        consecutive = self.consecutive_malformed,
                        "Discarding malformed record"
                    );

                    let limit = self.max_consecutive_malformed;
                    if limit > 0 && self.consecutive_malformed >= limit {
                        return Err(FramingError::TooManyMalformed(self.consecutive_malformed));
                    }
                }
            }
        }
    }
}

/// Writing half of a connection
pub struct FrameWriter<W> {
    frames: FramedWrite<W, MessageCodec>,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            frames: FramedWrite::new(writer, MessageCodec::new()),
        }
    }

    /// Encode, terminate and flush one message
    pub async fn send(&mut self, message: &Message) -> Result<(), FramingError> {
        self.frames.send(message).await
    }

    pub fn into_inner(self) -> W {
        self.frames.into_inner()
    }
}
