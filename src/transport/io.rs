use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{AppError, AppResult, DistributedError};

use super::protocol::WireMessage;

pub(crate) const MAX_MESSAGE_BYTES: usize = 4 * 1024 * 1024;

/// Reads one newline-delimited message.
///
/// # Errors
///
/// Returns an error when the stream is closed, the line is too large or is
/// not a valid message.
pub async fn read_message<R>(reader: &mut R) -> AppResult<WireMessage>
where
    R: AsyncBufRead + Unpin,
{
    let mut buffer: Vec<u8> = Vec::with_capacity(1024);
    let bytes = reader.read_until(b'\n', &mut buffer).await.map_err(|err| {
        AppError::distributed(DistributedError::Io {
            context: "read wire message",
            source: err,
        })
    })?;
    if bytes == 0 {
        return Err(AppError::distributed(DistributedError::ConnectionClosed));
    }
    if buffer.len() > MAX_MESSAGE_BYTES {
        return Err(AppError::distributed(
            DistributedError::WireMessageTooLarge {
                max_bytes: MAX_MESSAGE_BYTES,
            },
        ));
    }
    decode_line(&buffer)
}

/// Decodes one line, with or without its trailing newline.
///
/// # Errors
///
/// Returns an error for invalid UTF-8 or JSON that is not a message.
pub fn decode_line(line: &[u8]) -> AppResult<WireMessage> {
    let mut line = line;
    if let Some(stripped) = line.strip_suffix(b"\n") {
        line = stripped;
    }
    if let Some(stripped) = line.strip_suffix(b"\r") {
        line = stripped;
    }
    let line = std::str::from_utf8(line).map_err(|err| {
        AppError::distributed(DistributedError::WireMessageInvalidUtf8 { source: err })
    })?;
    serde_json::from_str::<WireMessage>(line).map_err(|err| {
        AppError::distributed(DistributedError::Deserialize {
            context: "wire message",
            source: err,
        })
    })
}

/// Encodes a message as a single line including the trailing newline.
///
/// # Errors
///
/// Returns an error if the message cannot be serialized.
pub fn encode_line(message: &WireMessage) -> AppResult<String> {
    let mut payload = serde_json::to_string(message).map_err(|err| {
        AppError::distributed(DistributedError::Serialize {
            context: "wire message",
            source: err,
        })
    })?;
    payload.push('\n');
    Ok(payload)
}

/// Writes one message followed by a newline.
///
/// # Errors
///
/// Returns an error if serialization or the write fails.
pub async fn send_message<W>(writer: &mut W, message: &WireMessage) -> AppResult<()>
where
    W: AsyncWrite + Unpin,
{
    let payload = encode_line(message)?;
    writer.write_all(payload.as_bytes()).await.map_err(|err| {
        AppError::distributed(DistributedError::Io {
            context: "send wire message",
            source: err,
        })
    })?;
    writer.flush().await.map_err(|err| {
        AppError::distributed(DistributedError::Io {
            context: "flush wire message",
            source: err,
        })
    })
}
