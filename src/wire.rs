use std::io;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

const LINE_ENDINGS: &[char] = &['\n', '\r'];

/// Fixed prompt sent before anything else on a new connection.
pub const NAME_PROMPT: &str = "please type your name:";

/// Header preceding the member roster sent to a joining client.
pub const WELCOME_HEADER: &str = "welcome from the users:";

pub fn arrival(name: &str) -> String {
    format!("{name} has arrived")
}

pub fn departure(name: &str) -> String {
    format!("{name} has left")
}

pub fn chat(name: &str, text: &str) -> String {
    format!("{name}: {text}")
}

/// Reads the next newline-terminated line with the terminator stripped.
/// Returns `None` at end of stream. An empty line is a valid message and is
/// returned as an empty string, not skipped.
pub async fn read_line<R>(reader: &mut R) -> io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    let bytes = reader.read_line(&mut line).await?;
    if bytes == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim_end_matches(LINE_ENDINGS).to_string()))
}

pub async fn write_line<W>(writer: &mut W, line: &str) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    // Flush per line so peers see chat as it happens, not when a buffer fills.
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}
