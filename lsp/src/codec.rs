//! `Content-Length` framing for JSON-RPC over the server's stdio.
//!
//! Each message is `Content-Length: N\r\n\r\n` followed by exactly `N` bytes
//! of UTF-8 JSON. Other headers are accepted and ignored.

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

/// Upper bound on a single message body. Interactive goal trees for large
/// proofs are big, but anything past this is a broken stream.
const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("i/o error on server stream: {0}")]
    Io(#[from] std::io::Error),
    #[error("stream ended inside a message header")]
    TruncatedHeader,
    #[error("message header has no Content-Length")]
    MissingContentLength,
    #[error("invalid Content-Length `{0}`")]
    InvalidContentLength(String),
    #[error("Content-Length {len} exceeds maximum {MAX_FRAME_BYTES}")]
    Oversized { len: usize },
    #[error("message body is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

pub struct FrameReader<R> {
    reader: BufReader<R>,
    line: String,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
            line: String::new(),
        }
    }

    /// Read the next message.
    ///
    /// Returns `Ok(None)` on a clean EOF between messages.
    pub async fn read_frame(&mut self) -> Result<Option<Value>, CodecError> {
        let Some(len) = self.read_header().await? else {
            return Ok(None);
        };
        if len > MAX_FRAME_BYTES {
            return Err(CodecError::Oversized { len });
        }

        let mut body = vec![0u8; len];
        self.reader.read_exact(&mut body).await?;
        Ok(Some(serde_json::from_slice(&body)?))
    }

    async fn read_header(&mut self) -> Result<Option<usize>, CodecError> {
        let mut content_length = None;
        let mut started = false;

        loop {
            self.line.clear();
            if self.reader.read_line(&mut self.line).await? == 0 {
                // EOF is only clean before the first header byte.
                return if started {
                    Err(CodecError::TruncatedHeader)
                } else {
                    Ok(None)
                };
            }
            started = true;

            let line = self.line.trim();
            if line.is_empty() {
                break;
            }
            if let Some((key, value)) = line.split_once(':')
                && key.trim().eq_ignore_ascii_case("Content-Length")
            {
                let value = value.trim();
                content_length = Some(
                    value
                        .parse::<usize>()
                        .map_err(|_| CodecError::InvalidContentLength(value.to_string()))?,
                );
            }
        }

        content_length
            .map(Some)
            .ok_or(CodecError::MissingContentLength)
    }
}

pub struct FrameWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub async fn write_frame(&mut self, message: &Value) -> Result<(), CodecError> {
        let body = serde_json::to_vec(message)?;
        let header = format!("Content-Length: {}\r\n\r\n", body.len());
        self.writer.write_all(header.as_bytes()).await?;
        self.writer.write_all(&body).await?;
        self.writer.flush().await?;
        Ok(())
    }
}
