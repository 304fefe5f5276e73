use anyhow::{Context, Error};
use harbor_http::{ParseError, ParseState, ParseStatus, Request, RequestParser};
use tracing_test::traced_test;

const SIMPLE: &[u8] = b"GET /a HTTP/1.1\r\nHost: x\r\n\r\n";
const WITH_BODY: &[u8] =
    b"POST /upload?x=1 HTTP/1.1\r\nHost: x\r\nConnection: keep-alive\r\nContent-Length: 5\r\n\r\nhello";

#[test]
#[traced_test]
fn request_split_across_two_calls() -> Result<(), Error> {
    let mut parser = RequestParser::default();

    assert_eq!(parser.feed(&SIMPLE[..5]), ParseStatus::NeedMore);
    assert_eq!(parser.feed(&SIMPLE[5..]), ParseStatus::Complete);

    let request = parser.request().context("request not available")?;
    assert_eq!(request.method, "GET");
    assert_eq!(request.target, "/a");
    assert_eq!(request.version, "HTTP/1.1");
    assert_eq!(request.field("host").and_then(|f| f.value_str()), Some("x"));

    Ok(())
}

#[test]
#[traced_test]
fn body_in_one_call() -> Result<(), Error> {
    let mut parser = RequestParser::default();

    let status = parser.feed(b"POST / HTTP/1.1\r\nContent-Length: 5\r\n\r\nhello");
    assert_eq!(status, ParseStatus::Complete);

    let request = parser.request().context("request not available")?;
    assert_eq!(&request.body[..], b"hello");

    Ok(())
}

#[test]
#[traced_test]
fn body_across_calls() -> Result<(), Error> {
    let mut parser = RequestParser::default();

    let status = parser.feed(b"POST / HTTP/1.1\r\nContent-Length: 5\r\n\r\nhe");
    assert_eq!(status, ParseStatus::NeedMore);
    assert_eq!(parser.state(), ParseState::AwaitingBody);

    assert_eq!(parser.feed(b"llo"), ParseStatus::Complete);
    let request = parser.request().context("request not available")?;
    assert_eq!(&request.body[..], b"hello");

    Ok(())
}

#[test]
#[traced_test]
fn missing_separator_is_malformed() {
    let mut parser = RequestParser::default();

    let status = parser.feed(b"BADLINE\r\n");
    assert_eq!(status, ParseStatus::Malformed(ParseError::RequestLine));
    assert_eq!(parser.state(), ParseState::Malformed);

    // Stays malformed until reset
    assert_eq!(
        parser.feed(SIMPLE),
        ParseStatus::Malformed(ParseError::RequestLine)
    );

    let mut parser = RequestParser::default();
    let status = parser.feed(b"GET /only-two\r\n");
    assert_eq!(status, ParseStatus::Malformed(ParseError::RequestLine));
}

#[test]
#[traced_test]
fn bad_content_length_is_malformed() {
    for line in [
        &b"Content-Length: abc\r\n"[..],
        b"Content-Length:\r\n",
        b"content-length: -1\r\n",
    ] {
        let mut parser = RequestParser::default();
        parser.feed(b"GET / HTTP/1.1\r\n");

        let status = parser.feed(line);
        assert_eq!(status, ParseStatus::Malformed(ParseError::ContentLength));
    }
}

#[test]
#[traced_test]
fn every_chunking_matches_single_call() -> Result<(), Error> {
    let expected = parse_whole(WITH_BODY)?;

    // Every single split point
    for split in 0..=WITH_BODY.len() {
        let mut parser = RequestParser::default();
        parser.feed(&WITH_BODY[..split]);
        let status = parser.feed(&WITH_BODY[split..]);

        assert_eq!(status, ParseStatus::Complete, "split at {}", split);
        assert_eq!(parser.request(), Some(&expected), "split at {}", split);
    }

    // Uniform chunk sizes, down to a byte at a time
    for size in 1..=7 {
        let mut parser = RequestParser::default();
        let mut last = ParseStatus::NeedMore;

        for chunk in WITH_BODY.chunks(size) {
            assert_eq!(last, ParseStatus::NeedMore, "chunk size {}", size);
            last = parser.feed(chunk);
        }

        assert_eq!(last, ParseStatus::Complete, "chunk size {}", size);
        assert_eq!(parser.request(), Some(&expected), "chunk size {}", size);
    }

    Ok(())
}

#[test]
#[traced_test]
fn keep_alive_and_fields() -> Result<(), Error> {
    let request = parse_whole(WITH_BODY)?;

    assert!(request.keep_alive);
    assert_eq!(request.path(), "/upload");
    assert_eq!(request.fields.len(), 3);
    assert_eq!(
        request
            .field("CONTENT-LENGTH")
            .and_then(|field| field.value_str()),
        Some("5")
    );

    let request = parse_whole(b"GET / HTTP/1.1\r\nConnection: Upgrade, Keep-Alive\r\n\r\n")?;
    assert!(request.keep_alive);

    let request = parse_whole(b"GET / HTTP/1.1\r\nConnection: close\r\n\r\n")?;
    assert!(!request.keep_alive);

    let request = parse_whole(b"GET / HTTP/1.1\r\nX-Odd\r\n\r\n")?;
    assert_eq!(&request.fields[0].name[..], b"X-Odd");
    assert!(request.fields[0].value.is_empty());

    Ok(())
}

#[test]
#[traced_test]
fn reset_clears_everything() {
    let mut parser = RequestParser::default();

    // After a complete cycle with trailing bytes
    parser.feed(b"GET / HTTP/1.1\r\n\r\nGET /next HT");
    assert_eq!(parser.state(), ParseState::Complete);
    assert!(parser.residue_len() > 0);

    parser.reset();
    assert_eq!(parser.state(), ParseState::AwaitingRequestLine);
    assert_eq!(parser.residue_len(), 0);
    assert!(!parser.keep_alive());

    // After a malformed cycle, twice to check it is idempotent
    parser.feed(b"NOPE\r\nleftover");
    assert_eq!(parser.state(), ParseState::Malformed);

    parser.reset();
    parser.reset();
    assert_eq!(parser.state(), ParseState::AwaitingRequestLine);
    assert_eq!(parser.residue_len(), 0);
    assert_eq!(parser.request(), None);
}

#[test]
#[traced_test]
fn pipelined_residue_is_kept() -> Result<(), Error> {
    let mut parser = RequestParser::default();

    let status = parser.feed(b"GET /one HTTP/1.1\r\n\r\nGET /two HTTP/1.1\r\n\r\n");
    assert_eq!(status, ParseStatus::Complete);
    assert_eq!(parser.request().map(|r| r.target.as_str()), Some("/one"));

    let residue = parser.take_residue();
    parser.reset();

    assert_eq!(parser.feed(&residue), ParseStatus::Complete);
    let request = parser.request().context("request not available")?;
    assert_eq!(request.target, "/two");

    Ok(())
}

fn parse_whole(data: &[u8]) -> Result<Request, Error> {
    let mut parser = RequestParser::default();

    let status = parser.feed(data);
    anyhow::ensure!(status == ParseStatus::Complete, "unexpected {:?}", status);

    parser.request().cloned().context("request not available")
}
