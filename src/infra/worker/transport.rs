//! Framed transport for process-hosted workers
//!
//! Messages are framed with a Content-Length header:
//! ```text
//! Content-Length: 123\r\n
//! \r\n
//! {"jsonrpc":"2.0",...}
//! ```

use std::io;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Read one framed message body. `Ok(None)` on a clean end of stream.
pub async fn read_message<R>(reader: &mut R) -> io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    let Some(content_length) = read_headers(reader).await? else {
        return Ok(None);
    };

    let mut body = vec![0u8; content_length];
    reader.read_exact(&mut body).await?;

    let json =
        String::from_utf8(body).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

    tracing::trace!("worker <- {}", json);
    Ok(Some(json))
}

async fn read_headers<R>(reader: &mut R) -> io::Result<Option<usize>>
where
    R: AsyncBufRead + Unpin,
{
    let mut content_length: Option<usize> = None;
    let mut line = String::new();
    let mut saw_header = false;

    loop {
        line.clear();
        let bytes_read = reader.read_line(&mut line).await?;

        if bytes_read == 0 {
            if saw_header {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "Worker closed connection mid-message",
                ));
            }
            return Ok(None);
        }
        saw_header = true;

        let line = line.trim();

        if line.is_empty() {
            break;
        }

        if let Some(value) = line.strip_prefix("Content-Length:") {
            content_length = Some(
                value
                    .trim()
                    .parse()
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?,
            );
        }
        // Other headers (Content-Type) are ignored
    }

    content_length
        .map(Some)
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "Missing Content-Length"))
}

/// Write one message with Content-Length framing
pub async fn write_message<W>(writer: &mut W, json: &str) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    tracing::trace!("worker -> {}", json);

    let message = format!("Content-Length: {}\r\n\r\n{}", json.len(), json);
    writer.write_all(message.as_bytes()).await?;
    writer.flush().await
}
