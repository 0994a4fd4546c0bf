//! # Line Decoder
//!
//! Reads the controller stream one line at a time and decodes each line as a
//! `Message` as soon as it arrives; nothing waits for the stream to finish.
//! Lines are framed by `LinesCodec` with a length cap, so a peer that never
//! sends a newline cannot grow the buffer without bound.

use std::io;

use futures_util::StreamExt;
use tokio::io::AsyncRead;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};

use crate::configs::config_receiver::DEFAULT_MAX_LINE_BYTES;
use crate::error::{DecodeError, ReceiverError, TransportError};
use crate::protocol::message::Message;

/// What the next read from the stream produced.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// A well-formed message.
    Message(Message),
    /// The controller sent a blank line: orderly end of stream.
    EndMarker,
    /// The connection reached EOF without an end marker.
    Closed,
}

/// Incremental newline-delimited JSON decoder over any async byte source.
pub struct LineDecoder<R> {
    lines: FramedRead<R, LinesCodec>,
    max_line_bytes: usize,
    line_number: u64,
    verbose: bool,
}

impl<R: AsyncRead + Unpin> LineDecoder<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: FramedRead::new(reader, LinesCodec::new_with_max_length(DEFAULT_MAX_LINE_BYTES)),
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
            line_number: 0,
            verbose: false,
        }
    }

    /// Caps the length of a single line, newline excluded.
    pub fn max_line_bytes(mut self, max_line_bytes: usize) -> Self {
        *self.lines.decoder_mut() = LinesCodec::new_with_max_length(max_line_bytes);
        self.max_line_bytes = max_line_bytes;
        self
    }

    /// Logs every raw line at info level when enabled.
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Number of lines read so far, including the end marker.
    pub fn lines_read(&self) -> u64 {
        self.line_number
    }

    /// Reads and decodes the next line.
    ///
    /// Cancel-safe: dropping the returned future before completion loses no
    /// buffered data, so it can be raced against a cancellation token.
    pub async fn next_frame(&mut self) -> Result<Frame, ReceiverError> {
        let line = match self.lines.next().await {
            Some(Ok(line)) => line,
            None => return Ok(Frame::Closed),
            Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                return Err(DecodeError::LineTooLong {
                    line: self.line_number + 1,
                    limit: self.max_line_bytes,
                }
                .into());
            }
            Some(Err(LinesCodecError::Io(err))) if err.kind() == io::ErrorKind::InvalidData => {
                return Err(DecodeError::InvalidUtf8 {
                    line: self.line_number + 1,
                }
                .into());
            }
            Some(Err(LinesCodecError::Io(err))) => return Err(TransportError::Read(err).into()),
        };
        self.line_number += 1;

        if line.is_empty() {
            return Ok(Frame::EndMarker);
        }
        if self.verbose {
            tracing::info!(line = %line, number = self.line_number, "received line");
        }

        let message = serde_json::from_str::<Message>(&line).map_err(|source| DecodeError::Json {
            line: self.line_number,
            source,
        })?;
        Ok(Frame::Message(message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::message::MessageKind;
    use tokio::io::AsyncWriteExt;

    fn decoder(input: &'static str) -> LineDecoder<&'static [u8]> {
        LineDecoder::new(input.as_bytes())
    }

    #[tokio::test]
    async fn blank_line_ends_the_stream() {
        let mut dec = decoder(
            "{\"messageType\":\"Update\",\"key\":\"a\",\"routes\":[],\"cluster\":{}}\n\n{\"messageType\":\"Update\"}\n",
        );
        match dec.next_frame().await.unwrap() {
            Frame::Message(msg) => assert_eq!(msg.key, "a"),
            other => panic!("unexpected frame {other:?}"),
        }
        assert_eq!(dec.next_frame().await.unwrap(), Frame::EndMarker);
        assert_eq!(dec.lines_read(), 2);
    }

    #[tokio::test]
    async fn eof_without_marker_is_closed() {
        let mut dec = decoder("{\"messageType\":\"Heartbeat\"}\r\n");
        assert!(matches!(dec.next_frame().await.unwrap(), Frame::Message(_)));
        assert_eq!(dec.next_frame().await.unwrap(), Frame::Closed);
    }

    #[tokio::test]
    async fn malformed_line_reports_its_number() {
        let mut dec = decoder("{\"messageType\":\"Heartbeat\"}\n{\"messageType\": oops}\n");
        dec.next_frame().await.unwrap();
        let err = dec.next_frame().await.unwrap_err();
        assert!(matches!(
            err,
            ReceiverError::Decode(DecodeError::Json { line: 2, .. })
        ));
    }

    #[tokio::test]
    async fn invalid_utf8_is_a_decode_error() {
        let bytes: &'static [u8] = b"\xff\xfe{}\n";
        let mut dec = LineDecoder::new(bytes);
        let err = dec.next_frame().await.unwrap_err();
        assert!(matches!(
            err,
            ReceiverError::Decode(DecodeError::InvalidUtf8 { line: 1 })
        ));
    }

    #[tokio::test]
    async fn endless_line_hits_the_length_cap() {
        let (mut tx, rx) = tokio::io::duplex(4096);
        let mut dec = LineDecoder::new(rx).max_line_bytes(64);

        tx.write_all(b"{\"messageType\":\"Heartbeat\"}\n").await.unwrap();
        assert!(matches!(dec.next_frame().await.unwrap(), Frame::Message(_)));

        // No newline ever follows; the writer stays open.
        tx.write_all(&[b'x'; 1024]).await.unwrap();
        let err = dec.next_frame().await.unwrap_err();
        assert!(matches!(
            err,
            ReceiverError::Decode(DecodeError::LineTooLong { line: 2, limit: 64 })
        ));
    }

    #[tokio::test]
    async fn yields_messages_before_the_stream_finishes() {
        let (mut tx, rx) = tokio::io::duplex(256);
        let mut dec = LineDecoder::new(rx);

        tx.write_all(b"{\"messageType\":\"Update\",\"key\":\"first\"}\n")
            .await
            .unwrap();
        // The writer stays open: the first message must still come through.
        match dec.next_frame().await.unwrap() {
            Frame::Message(msg) => {
                assert_eq!(msg.kind, MessageKind::Update);
                assert_eq!(msg.key, "first");
            }
            other => panic!("unexpected frame {other:?}"),
        }

        tx.write_all(b"{\"messageType\":\"Heartbeat\"}\n").await.unwrap();
        drop(tx);
        assert!(matches!(dec.next_frame().await.unwrap(), Frame::Message(_)));
        assert_eq!(dec.next_frame().await.unwrap(), Frame::Closed);
    }
}
