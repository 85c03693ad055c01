//! Minimal sender for exercising a running listener.

use anyhow::{Context, Result};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

/// Normalize a one-line message: strip trailing CR/LF, end with a single `\n`.
pub fn single_line(message: &str) -> Vec<u8> {
    let mut line = message.trim_end_matches(['\r', '\n']).as_bytes().to_vec();
    line.push(b'\n');
    line
}

/// Connect, write `payload` and close. Returns the number of bytes sent.
pub async fn send_message(host: &str, port: u16, payload: &[u8]) -> Result<usize> {
    let mut stream = TcpStream::connect((host, port))
        .await
        .with_context(|| format!("Failed to connect to {}:{}", host, port))?;
    stream
        .write_all(payload)
        .await
        .context("Failed to send message")?;
    stream.shutdown().await.context("Failed to close connection")?;
    Ok(payload.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_line() {
        assert_eq!(single_line("hello"), b"hello\n");
        assert_eq!(single_line("hello\r\n\n"), b"hello\n");
        assert_eq!(single_line(""), b"\n");
        assert_eq!(single_line("a\nb"), b"a\nb\n");
    }

    #[tokio::test]
    async fn test_send_to_closed_port_fails() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        assert!(send_message("127.0.0.1", port, b"x").await.is_err());
    }
}
