use std::io::Write;

use anyhow::Error;
use bytes::{BufMut, BytesMut};
use harbor_mio::Connection;

pub const HTML: &str = "text/html; charset=utf-8";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    Forbidden,
    NotFound,
    InternalServerError,
}

impl Status {
    pub fn code(self) -> u16 {
        match self {
            Status::Ok => 200,
            Status::Forbidden => 403,
            Status::NotFound => 404,
            Status::InternalServerError => 500,
        }
    }

    pub fn reason(self) -> &'static str {
        match self {
            Status::Ok => "OK",
            Status::Forbidden => "Forbidden",
            Status::NotFound => "Not Found",
            Status::InternalServerError => "Internal Server Error",
        }
    }
}

/// Build a response head, up to and including the blank line.
pub fn head(status: Status, content_type: &str, length: u64, keep_alive: bool) -> BytesMut {
    let mut data = BytesMut::new();

    let status_line = format!("HTTP/1.1 {} {}\r\n", status.code(), status.reason());
    data.put(status_line.as_bytes());
    data.put(&b"Content-Type: "[..]);
    data.put(content_type.as_bytes());
    data.put(&b"\r\nContent-Length: "[..]);
    data.put(length.to_string().as_bytes());

    if keep_alive {
        data.put(&b"\r\nConnection: keep-alive\r\n\r\n"[..]);
    } else {
        data.put(&b"\r\nConnection: close\r\n\r\n"[..]);
    }

    data
}

/// Send a complete response with an in-memory body.
pub fn send(
    connection: &mut Connection,
    status: Status,
    content_type: &str,
    body: &[u8],
) -> Result<(), Error> {
    let mut data = head(status, content_type, body.len() as u64, connection.keep_alive());
    data.put(body);

    connection.write_all(&data)?;
    Ok(())
}

/// Send a minimal HTML page for an error status.
pub fn send_error(connection: &mut Connection, status: Status) -> Result<(), Error> {
    let body = format!(
        "<html><body><h1>{} {}</h1></body></html>",
        status.code(),
        status.reason()
    );
    send(connection, status, HTML, body.as_bytes())
}
