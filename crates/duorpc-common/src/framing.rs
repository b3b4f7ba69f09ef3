//! Content-Length message framing over async byte streams.
//!
//! Each frame is an HTTP-style header block followed by a JSON body, the
//! same framing used by the Language Server Protocol family:
//!
//! ```text
//! Content-Length: <length>\r\n
//! \r\n
//! <message-body>
//! ```
//!
//! Header names are ASCII case-insensitive and unknown headers are
//! skipped. An optional `Content-Type: application/vscode-jsonrpc;
//! charset=<enc>` header may override the encoding of the body for that
//! frame; the default is UTF-8.
//!
//! All decode failures (missing or malformed `Content-Length`, truncated
//! body, unsupported charset) are fatal to the connection. A clean end of
//! stream at a frame boundary is reported separately so the peer can
//! distinguish "remote closed" from "remote sent garbage".

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use crate::protocol::error::{DuorpcError, Result};

/// Maximum frame size (100 MB) to bound allocations driven by a remote
/// `Content-Length` value.
pub const MAX_FRAME_SIZE: usize = 100 * 1024 * 1024;

/// A validated body encoding.
///
/// The frame codec computes `Content-Length` in bytes under this encoding
/// and decodes inbound bodies with it. Only the UTF-8 family is supported;
/// US-ASCII is accepted as a strict subset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Encoding {
    charset: String,
}

impl Encoding {
    /// The default encoding, UTF-8.
    pub fn utf8() -> Self {
        Self {
            charset: "utf-8".to_string(),
        }
    }

    /// Creates an encoding from a charset label.
    ///
    /// # Errors
    ///
    /// Returns [`DuorpcError::InvalidArgument`] for charsets outside the
    /// UTF-8 family.
    pub fn from_charset(label: &str) -> Result<Self> {
        let normalized = label.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "utf-8" | "utf8" | "us-ascii" | "ascii" => Ok(Self {
                charset: normalized,
            }),
            other => Err(DuorpcError::InvalidArgument(format!(
                "unsupported charset: {other:?}"
            ))),
        }
    }

    /// The normalized charset label.
    pub fn charset(&self) -> &str {
        &self.charset
    }

    fn decode(&self, bytes: Vec<u8>) -> Result<String> {
        String::from_utf8(bytes)
            .map_err(|e| DuorpcError::Framing(format!("frame body is not valid {}: {e}", self.charset)))
    }
}

impl Default for Encoding {
    fn default() -> Self {
        Self::utf8()
    }
}

/// Reads the next frame body from the stream.
///
/// Returns `Ok(None)` on a clean end of stream (EOF before any header
/// byte of the next frame). EOF anywhere inside a frame is a framing
/// error.
///
/// # Arguments
///
/// * `reader` - Buffered receiving stream
/// * `encoding` - Body encoding to use unless a `Content-Type` header
///   overrides it
///
/// # Errors
///
/// Returns [`DuorpcError::Framing`] if the header block has no
/// `Content-Length`, the length is not an integer, the length exceeds
/// [`MAX_FRAME_SIZE`], the body is shorter than advertised, or the body
/// does not decode under the effective encoding.
pub async fn read_frame<R>(reader: &mut BufReader<R>, encoding: &Encoding) -> Result<Option<String>>
where
    R: AsyncRead + Unpin,
{
    let mut content_length: Option<usize> = None;
    let mut frame_encoding = encoding.clone();
    let mut line = String::new();
    let mut saw_header = false;

    loop {
        line.clear();
        let bytes_read = reader
            .read_line(&mut line)
            .await
            .map_err(|e| DuorpcError::Framing(format!("failed to read header line: {e}")))?;

        if bytes_read == 0 {
            if saw_header {
                return Err(DuorpcError::Framing(
                    "stream ended inside a frame header block".to_string(),
                ));
            }
            return Ok(None);
        }
        saw_header = true;

        let trimmed = line.trim();
        if trimmed.is_empty() {
            break;
        }

        // Header names are ASCII case-insensitive; lines without a colon
        // and unknown headers are skipped.
        let Some(colon) = trimmed.find(':') else {
            continue;
        };
        let name = trimmed[..colon].trim();
        let value = trimmed[colon + 1..].trim();

        if name.eq_ignore_ascii_case("Content-Length") {
            let length = value.parse::<usize>().map_err(|_| {
                DuorpcError::Framing(format!("invalid Content-Length value: {value:?}"))
            })?;
            content_length = Some(length);
        } else if name.eq_ignore_ascii_case("Content-Type") {
            if let Some(charset) = parse_charset(value) {
                frame_encoding = Encoding::from_charset(charset)
                    .map_err(|e| DuorpcError::Framing(e.to_string()))?;
            }
        }
    }

    let length = content_length
        .ok_or_else(|| DuorpcError::Framing("missing Content-Length header".to_string()))?;

    if length > MAX_FRAME_SIZE {
        return Err(DuorpcError::Framing(format!(
            "frame of {length} bytes exceeds the {MAX_FRAME_SIZE} byte limit"
        )));
    }

    let mut body = vec![0u8; length];
    reader.read_exact(&mut body).await.map_err(|e| {
        DuorpcError::Framing(format!("stream ended before the advertised frame body: {e}"))
    })?;

    frame_encoding.decode(body).map(Some)
}

/// Writes one frame as a single logical write: header, blank line, and
/// body land in one buffer and one `write_all`, so concurrent writers can
/// never interleave partial frames.
///
/// # Errors
///
/// Returns [`DuorpcError::Io`] if the write or flush fails.
pub async fn write_frame<W>(writer: &mut W, body: &str, _encoding: &Encoding) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    // All supported charsets are UTF-8 subsets, so the byte length under
    // the configured encoding is the UTF-8 byte length.
    let body_bytes = body.as_bytes();
    let header = format!("Content-Length: {}\r\n\r\n", body_bytes.len());

    let mut frame = Vec::with_capacity(header.len() + body_bytes.len());
    frame.extend_from_slice(header.as_bytes());
    frame.extend_from_slice(body_bytes);

    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Extracts the `charset` parameter from a `Content-Type` value such as
/// `application/vscode-jsonrpc; charset=utf-8`.
fn parse_charset(value: &str) -> Option<&str> {
    value.split(';').skip(1).find_map(|segment| {
        let (key, charset) = segment.split_once('=')?;
        key.trim().eq_ignore_ascii_case("charset").then(|| charset.trim())
    })
}
