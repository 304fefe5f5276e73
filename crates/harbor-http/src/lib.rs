//! Incremental HTTP/1.1 request parsing for harbor.
//!
//! The parser in this crate is a pure state machine, it never performs I/O. Bytes can be handed
//! to it in arbitrarily sized chunks, and anything that does not yet form a complete line or body
//! is kept until the next call.

mod parser;
mod request;
pub mod url;

pub use self::{
    parser::{ParseError, ParseState, ParseStatus, RequestParser},
    request::{HttpField, Request},
};
