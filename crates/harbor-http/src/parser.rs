use bytes::{Buf, Bytes, BytesMut};
use thiserror::Error;
use tracing::{event, Level};

use crate::{
    request::{trim_range, HttpField},
    Request,
};

/// Incremental HTTP/1.1 request parser.
///
/// Bytes are buffered internally, so a request may be split across any number of `feed` calls.
/// Bytes received after a complete request are retained as residue, see `take_residue`.
#[derive(Default)]
pub struct RequestParser {
    /// Received bytes not yet consumed by the state machine.
    buffer: BytesMut,
    /// How far `buffer` has already been searched for a line terminator.
    scanned: usize,
    state: State,
    request: Request,
    content_length: usize,
    body: BytesMut,
}

#[derive(Default)]
enum State {
    #[default]
    RequestLine,
    Headers,
    Body,
    Complete,
    Malformed(ParseError),
}

impl RequestParser {
    /// Consume bytes into the parser.
    ///
    /// Any bytes that don't complete the current element are kept, and consumption resumes from
    /// there on the next call.
    pub fn feed(&mut self, data: &[u8]) -> ParseStatus {
        self.buffer.extend_from_slice(data);
        self.advance()
    }

    pub fn state(&self) -> ParseState {
        match self.state {
            State::RequestLine => ParseState::AwaitingRequestLine,
            State::Headers => ParseState::AwaitingHeaders,
            State::Body => ParseState::AwaitingBody,
            State::Complete => ParseState::Complete,
            State::Malformed(_) => ParseState::Malformed,
        }
    }

    /// The parsed request, available once parsing is complete.
    pub fn request(&self) -> Option<&Request> {
        match self.state {
            State::Complete => Some(&self.request),
            _ => None,
        }
    }

    /// Keep-alive as negotiated by the headers seen so far.
    pub fn keep_alive(&self) -> bool {
        self.request.keep_alive
    }

    /// Number of received bytes the parser hasn't consumed yet.
    pub fn residue_len(&self) -> usize {
        self.buffer.len()
    }

    /// Take the bytes received past the end of a complete request.
    ///
    /// These belong to the next request on the same connection.
    pub fn take_residue(&mut self) -> Bytes {
        self.scanned = 0;
        self.buffer.split().freeze()
    }

    /// Return to awaiting a request line, dropping all accumulated state and residue.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.scanned = 0;
        self.state = State::RequestLine;
        self.request = Request::default();
        self.content_length = 0;
        self.body.clear();
    }

    fn advance(&mut self) -> ParseStatus {
        loop {
            match &self.state {
                State::RequestLine => {
                    let Some(line) = self.next_line() else {
                        return ParseStatus::NeedMore;
                    };

                    if let Err(error) = self.on_request_line(line) {
                        return self.fail(error);
                    }
                    self.state = State::Headers;
                }
                State::Headers => {
                    let Some(line) = self.next_line() else {
                        return ParseStatus::NeedMore;
                    };

                    // Empty line signals end of the header
                    if line.is_empty() {
                        if self.content_length > 0 {
                            self.state = State::Body;
                        } else {
                            self.complete();
                        }
                        continue;
                    }

                    if let Err(error) = self.on_header_line(line) {
                        return self.fail(error);
                    }
                }
                State::Body => {
                    let needed = self.content_length - self.body.len();
                    let available = needed.min(self.buffer.len());
                    self.body.extend_from_slice(&self.buffer[..available]);
                    self.buffer.advance(available);

                    if self.body.len() < self.content_length {
                        return ParseStatus::NeedMore;
                    }
                    self.complete();
                }
                State::Complete => return ParseStatus::Complete,
                State::Malformed(error) => return ParseStatus::Malformed(error.clone()),
            }
        }
    }

    /// Split the next CRLF terminated line off the buffer, without the terminator.
    fn next_line(&mut self) -> Option<Bytes> {
        // A CR may have been the last byte scanned, so step back one to catch a split CRLF
        let start = self.scanned.saturating_sub(1);
        let found = self.buffer[start..]
            .windows(2)
            .position(|window| window == b"\r\n");

        let Some(offset) = found else {
            self.scanned = self.buffer.len();
            return None;
        };

        let line = self.buffer.split_to(start + offset).freeze();
        self.buffer.advance(2);
        self.scanned = 0;

        Some(line)
    }

    fn on_request_line(&mut self, line: Bytes) -> Result<(), ParseError> {
        let line = std::str::from_utf8(&line).map_err(|_| ParseError::Encoding)?;

        let (method, rest) = line.split_once(' ').ok_or(ParseError::RequestLine)?;
        let (target, version) = rest.split_once(' ').ok_or(ParseError::RequestLine)?;

        self.request.method = method.to_string();
        self.request.target = target.to_string();
        self.request.version = version.to_string();

        Ok(())
    }

    fn on_header_line(&mut self, line: Bytes) -> Result<(), ParseError> {
        let field = HttpField::parse(line);

        if field.is("content-length") {
            self.content_length = field
                .value_str()
                .and_then(|value| value.parse().ok())
                .ok_or(ParseError::ContentLength)?;
        } else if field.is("connection") {
            self.request.keep_alive = field
                .value
                .split(|byte| *byte == b',')
                .any(|token| token[trim_range(token)].eq_ignore_ascii_case(b"keep-alive"));
        }

        self.request.fields.push(field);

        Ok(())
    }

    fn complete(&mut self) {
        self.request.body = self.body.split().freeze();
        self.state = State::Complete;
    }

    fn fail(&mut self, error: ParseError) -> ParseStatus {
        event!(Level::DEBUG, ?error, "malformed request");
        self.state = State::Malformed(error.clone());
        ParseStatus::Malformed(error)
    }
}

/// Externally visible parser state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseState {
    AwaitingRequestLine,
    AwaitingHeaders,
    AwaitingBody,
    Complete,
    Malformed,
}

/// Result of feeding bytes to the parser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseStatus {
    /// A full request has been parsed.
    Complete,
    /// The request isn't complete yet, call again with more bytes.
    NeedMore,
    /// The request is definitively invalid, the connection should be closed.
    Malformed(ParseError),
}

/// Reason a request was rejected as malformed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("request line must have a method, target and version separated by spaces")]
    RequestLine,
    #[error("request line is not valid utf-8")]
    Encoding,
    #[error("content-length is missing a value or is not an integer")]
    ContentLength,
}
