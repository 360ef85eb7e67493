//! Framed I/O over a ManageSieve connection: CRLF line reads, `{n+}`
//! literal-body reads, and quoted/literal-framed writes, all under a single
//! wall-clock deadline per operation.
//!
//! Plain TCP until [`Transport::starttls`] upgrades it in place, driven by
//! the caller's `starttls` flag and the server's advertised `STARTTLS`
//! capability (see [`super::client`]) rather than performed eagerly at
//! connect time.

use std::sync::Arc;
use std::time::Duration;

use rustls::{ClientConfig, RootCertStore};
use rustls_pki_types::ServerName;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::{TlsConnector, client::TlsStream};

use crate::error::{TimeoutError, TransportError};

enum Stream {
    Plain(TcpStream),
    Tls(TlsStream<TcpStream>),
}

/// A connected ManageSieve transport, plain or TLS-upgraded.
pub struct Transport {
    reader: BufReader<ReadHalf>,
    writer: WriteHalf,
    deadline: Duration,
}

enum ReadHalf {
    Plain(tokio::io::ReadHalf<TcpStream>),
    Tls(tokio::io::ReadHalf<TlsStream<TcpStream>>),
}

enum WriteHalf {
    Plain(tokio::io::WriteHalf<TcpStream>),
    Tls(tokio::io::WriteHalf<TlsStream<TcpStream>>),
}

impl tokio::io::AsyncRead for ReadHalf {
    fn poll_read(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        match self.get_mut() {
            ReadHalf::Plain(r) => std::pin::Pin::new(r).poll_read(cx, buf),
            ReadHalf::Tls(r) => std::pin::Pin::new(r).poll_read(cx, buf),
        }
    }
}

impl tokio::io::AsyncWrite for WriteHalf {
    fn poll_write(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &[u8],
    ) -> std::task::Poll<std::io::Result<usize>> {
        match self.get_mut() {
            WriteHalf::Plain(w) => std::pin::Pin::new(w).poll_write(cx, buf),
            WriteHalf::Tls(w) => std::pin::Pin::new(w).poll_write(cx, buf),
        }
    }

    fn poll_flush(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        match self.get_mut() {
            WriteHalf::Plain(w) => std::pin::Pin::new(w).poll_flush(cx),
            WriteHalf::Tls(w) => std::pin::Pin::new(w).poll_flush(cx),
        }
    }

    fn poll_shutdown(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        match self.get_mut() {
            WriteHalf::Plain(w) => std::pin::Pin::new(w).poll_shutdown(cx),
            WriteHalf::Tls(w) => std::pin::Pin::new(w).poll_shutdown(cx),
        }
    }
}

impl Transport {
    pub async fn connect(
        host: &str,
        port: u16,
        deadline: Duration,
    ) -> Result<Self, TransportError> {
        let stream = timeout(deadline, TcpStream::connect((host, port)))
            .await
            .map_err(|_| TransportError::Io(std::io::Error::from(std::io::ErrorKind::TimedOut)))??;
        let (read, write) = tokio::io::split(stream);
        Ok(Transport {
            reader: BufReader::new(ReadHalf::Plain(read)),
            writer: WriteHalf::Plain(write),
            deadline,
        })
    }

    /// Upgrades the plain connection to TLS in place. The caller is
    /// responsible for having already read the server's `OK` response to
    /// `STARTTLS` before calling this.
    pub async fn upgrade_tls(self, host: &str) -> Result<Self, TransportError> {
        let Transport {
            reader,
            writer,
            deadline,
        } = self;

        let plain_read = match reader.into_inner() {
            ReadHalf::Plain(r) => r,
            ReadHalf::Tls(_) => return Err(TransportError::UnexpectedEof),
        };
        let plain_write = match writer {
            WriteHalf::Plain(w) => w,
            WriteHalf::Tls(_) => return Err(TransportError::UnexpectedEof),
        };
        let stream = plain_read
            .unsplit(plain_write);

        let mut root_store = RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let config = ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth();
        let connector = TlsConnector::from(Arc::new(config));
        let server_name = ServerName::try_from(host)
            .map_err(|_| TransportError::InvalidServerName(host.to_string()))?
            .to_owned();

        let tls_stream = timeout(deadline, connector.connect(server_name, stream))
            .await
            .map_err(|_| TransportError::Io(std::io::Error::from(std::io::ErrorKind::TimedOut)))??;

        let (read, write) = tokio::io::split(tls_stream);
        Ok(Transport {
            reader: BufReader::new(ReadHalf::Tls(read)),
            writer: WriteHalf::Tls(write),
            deadline,
        })
    }

    /// Reads one CRLF-terminated line, with the trailing CRLF stripped.
    pub async fn read_line(&mut self) -> Result<String, TransportError> {
        let mut raw = String::new();
        let n = timeout(self.deadline, self.reader.read_line(&mut raw))
            .await
            .map_err(|_| TransportError::Io(std::io::Error::from(std::io::ErrorKind::TimedOut)))??;
        if n == 0 {
            return Err(TransportError::UnexpectedEof);
        }
        while raw.ends_with('\n') || raw.ends_with('\r') {
            raw.pop();
        }
        Ok(raw)
    }

    /// Reads exactly `length` octets followed by a CRLF, as framed by a
    /// preceding `{length}`/`{length+}` literal header.
    pub async fn read_literal(&mut self, length: usize) -> Result<Vec<u8>, TransportError> {
        let mut buf = vec![0u8; length];
        timeout(self.deadline, self.reader.read_exact(&mut buf))
            .await
            .map_err(|_| TransportError::Io(std::io::Error::from(std::io::ErrorKind::TimedOut)))??;
        let mut crlf = [0u8; 2];
        timeout(self.deadline, self.reader.read_exact(&mut crlf))
            .await
            .map_err(|_| TransportError::Io(std::io::Error::from(std::io::ErrorKind::TimedOut)))??;
        Ok(buf)
    }

    /// Writes a raw command line, appending CRLF.
    pub async fn write_line(&mut self, line: &str) -> Result<(), TransportError> {
        let framed = format!("{line}\r\n");
        timeout(self.deadline, self.writer.write_all(framed.as_bytes()))
            .await
            .map_err(|_| TransportError::Io(std::io::Error::from(std::io::ErrorKind::TimedOut)))??;
        timeout(self.deadline, self.writer.flush())
            .await
            .map_err(|_| TransportError::Io(std::io::Error::from(std::io::ErrorKind::TimedOut)))??;
        Ok(())
    }

    /// Writes raw literal bytes (the payload following a `{n+}` header),
    /// without a trailing CRLF — the caller's next `write_line` supplies it.
    pub async fn write_literal_body(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        timeout(self.deadline, self.writer.write_all(bytes))
            .await
            .map_err(|_| TransportError::Io(std::io::Error::from(std::io::ErrorKind::TimedOut)))??;
        timeout(self.deadline, self.writer.flush())
            .await
            .map_err(|_| TransportError::Io(std::io::Error::from(std::io::ErrorKind::TimedOut)))??;
        Ok(())
    }
}

/// Quotes `s` as a ManageSieve string literal, or reports that it must be
/// sent as a `{n+}` literal instead (contains CR/LF/NUL or is oversized).
pub enum OutboundString<'a> {
    Quoted(String),
    Literal(&'a str),
}

const MAX_QUOTED_LEN: usize = 1024;

/// Chooses the wire representation for an outbound string per the quoting
/// rules: literal framing for control characters or length, quoted
/// otherwise with `"` and `\` escaped.
pub fn quote_or_literal(s: &str) -> OutboundString<'_> {
    let needs_literal = s.len() > MAX_QUOTED_LEN
        || s.bytes().any(|b| b == b'\r' || b == b'\n' || b == 0);
    if needs_literal {
        OutboundString::Literal(s)
    } else {
        let mut out = String::with_capacity(s.len() + 2);
        out.push('"');
        for c in s.chars() {
            match c {
                '"' => out.push_str("\\\""),
                '\\' => out.push_str("\\\\"),
                other => out.push(other),
            }
        }
        out.push('"');
        OutboundString::Quoted(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_plain_string_is_quoted() {
        match quote_or_literal("hello") {
            OutboundString::Quoted(s) => assert_eq!(s, "\"hello\""),
            OutboundString::Literal(_) => panic!("expected quoted"),
        }
    }

    #[test]
    fn string_with_embedded_quote_is_escaped() {
        match quote_or_literal("a\"b") {
            OutboundString::Quoted(s) => assert_eq!(s, "\"a\\\"b\""),
            OutboundString::Literal(_) => panic!("expected quoted"),
        }
    }

    #[test]
    fn string_with_newline_is_literal() {
        match quote_or_literal("a\nb") {
            OutboundString::Literal(s) => assert_eq!(s, "a\nb"),
            OutboundString::Quoted(_) => panic!("expected literal"),
        }
    }

    #[test]
    fn oversized_string_is_literal() {
        let big = "x".repeat(MAX_QUOTED_LEN + 1);
        match quote_or_literal(&big) {
            OutboundString::Literal(_) => {}
            OutboundString::Quoted(_) => panic!("expected literal"),
        }
    }
}
