use std::{
    io::{ErrorKind, Read, Write},
    net::{SocketAddr, TcpStream},
    os::fd::{AsRawFd, RawFd},
};

use harbor_http::{ParseStatus, Request, RequestParser};
use mio::Token;
use tracing::{event, Level};

/// A client connection, together with the parser state of its current request.
///
/// Owned either by the reactor while waiting for bytes, or by a single worker while a request
/// handler runs. Handlers write their response through the `Write` implementation.
pub struct Connection {
    token: Token,
    peer: SocketAddr,
    stream: TcpStream,
    parser: RequestParser,
    /// Bytes of the current response written so far.
    written: u64,
    /// Set when a handler failed, the response may be missing or cut short.
    broken: bool,
}

/// Result of draining a readable socket.
#[derive(Debug, PartialEq)]
pub(crate) enum ReadOutcome {
    /// Parser status after everything currently available was fed.
    Parsed(ParseStatus),
    /// The peer closed its side.
    Closed,
}

impl Connection {
    pub(crate) fn new(token: Token, stream: TcpStream, peer: SocketAddr) -> Self {
        Self {
            token,
            peer,
            stream,
            parser: RequestParser::default(),
            written: 0,
            broken: false,
        }
    }

    pub fn token(&self) -> Token {
        self.token
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// The request currently being served.
    pub fn request(&self) -> Option<&Request> {
        self.parser.request()
    }

    /// Whether the client asked to keep the connection open.
    pub fn keep_alive(&self) -> bool {
        self.parser.keep_alive()
    }

    /// Number of response bytes written for the current request.
    pub fn bytes_written(&self) -> u64 {
        self.written
    }

    pub(crate) fn mark_broken(&mut self) {
        self.broken = true;
    }

    /// Whether the connection can serve another request after this one.
    pub(crate) fn reusable(&self) -> bool {
        self.keep_alive() && !self.broken
    }

    pub(crate) fn raw_fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }

    pub(crate) fn set_blocking(&self, blocking: bool) -> Result<(), std::io::Error> {
        self.stream.set_nonblocking(!blocking)
    }

    /// Read until the socket would block, feeding everything into the parser.
    ///
    /// Stops early once the parser has a complete or malformed request, leaving anything else
    /// on the socket for after the request has been handled.
    pub(crate) fn read_available(
        &mut self,
        scratch: &mut [u8],
    ) -> Result<ReadOutcome, std::io::Error> {
        let mut status = ParseStatus::NeedMore;

        loop {
            let len = match self.stream.read(scratch) {
                Ok(len) => len,
                Err(error) => match error.kind() {
                    ErrorKind::WouldBlock => break,
                    ErrorKind::Interrupted => continue,
                    _ => return Err(error),
                },
            };

            // Read of zero means the stream has been closed
            if len == 0 {
                return Ok(ReadOutcome::Closed);
            }

            event!(Level::TRACE, token = ?self.token, len, "received bytes");
            status = self.parser.feed(&scratch[..len]);

            if status != ParseStatus::NeedMore {
                break;
            }
        }

        Ok(ReadOutcome::Parsed(status))
    }

    /// Prepare for the next request on this connection.
    ///
    /// Bytes the client already sent past the previous request are fed into the fresh parser.
    pub(crate) fn recycle(&mut self) -> ParseStatus {
        let residue = self.parser.take_residue();
        self.parser.reset();
        self.written = 0;

        if !residue.is_empty() {
            event!(Level::TRACE, len = residue.len(), "replaying pipelined bytes");
        }
        self.parser.feed(&residue)
    }
}

impl Write for Connection {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let len = self.stream.write(buf)?;
        self.written += len as u64;
        Ok(len)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.stream.flush()
    }
}
