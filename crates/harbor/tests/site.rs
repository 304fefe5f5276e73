use std::{
    fs,
    io::{Read, Write},
    net::{SocketAddr, TcpStream},
    path::PathBuf,
    sync::Arc,
    thread::{self, JoinHandle},
    time::Duration,
};

use anyhow::{anyhow, bail, Context, Error};
use harbor::handler;
use harbor_mio::{Connection, Reactor, ReactorOptions, RequestHandler, StopHandle};
use harbor_pool::{PoolOptions, WorkerPool};
use serde_json::Value;
use tracing_test::traced_test;

#[test]
#[traced_test]
fn serves_index_for_root() -> Result<(), Error> {
    let site = Site::start("index")?;
    let mut stream = site.connect()?;

    let response = site.get(&mut stream, "/", true)?;
    assert_eq!(response.status, 200);
    assert_eq!(response.header("Content-Type"), Some("text/html; charset=utf-8"));
    assert_eq!(response.header("Connection"), Some("keep-alive"));
    assert_eq!(response.body, b"<h1>home</h1>");

    // Same connection, second request
    let response = site.get(&mut stream, "/style.css", true)?;
    assert_eq!(response.status, 200);
    assert_eq!(response.header("Content-Type"), Some("text/css"));
    assert_eq!(response.body, b"body {}");

    site.stop()
}

#[test]
#[traced_test]
fn missing_file_uses_custom_page() -> Result<(), Error> {
    let site = Site::start("missing")?;
    let mut stream = site.connect()?;

    let response = site.get(&mut stream, "/nope.html", false)?;
    assert_eq!(response.status, 404);
    assert_eq!(response.header("Connection"), Some("close"));
    assert_eq!(response.body, b"<h1>lost</h1>");

    site.stop()
}

#[test]
#[traced_test]
fn traversal_is_forbidden() -> Result<(), Error> {
    let site = Site::start("traversal")?;
    let mut stream = site.connect()?;

    let response = site.get(&mut stream, "/%2E%2E/secret.txt", false)?;
    assert_eq!(response.status, 403);

    site.stop()
}

#[test]
#[traced_test]
fn directories_are_listed() -> Result<(), Error> {
    let site = Site::start("listing")?;
    let mut stream = site.connect()?;

    let response = site.get(&mut stream, "/docs", false)?;
    assert_eq!(response.status, 200);

    let body = String::from_utf8(response.body)?;
    assert!(body.contains("<a href=\"/docs/read%20me.txt\">read me.txt</a>"), "{}", body);

    site.stop()
}

#[test]
#[traced_test]
fn admin_endpoint_reports_pool_status() -> Result<(), Error> {
    let site = Site::start("admin")?;
    let mut stream = site.connect()?;

    let response = site.get(&mut stream, "/admin/threadpool-status", false)?;
    assert_eq!(response.status, 200);
    assert_eq!(response.header("Content-Type"), Some("application/json"));

    let status: Value = serde_json::from_slice(&response.body)?;
    assert_eq!(status["minThreads"], 1);
    assert_eq!(status["maxThreads"], 2);

    // The worker serving this request counts as busy
    assert!(status["liveThreads"].as_u64() >= Some(1));
    assert!(status["busyThreads"].as_u64() >= Some(1));
    assert!(status["queueDepth"].is_u64());
    assert!(status["loadFactor"].is_number());

    site.stop()
}

#[test]
#[traced_test]
fn failed_request_answers_internal_error() -> Result<(), Error> {
    let pool = Arc::new(WorkerPool::new(PoolOptions::new(1, 2))?);
    let failing: RequestHandler = Arc::new(|connection: &mut Connection| -> Result<(), Error> {
        handler::with_fallback(connection, |_| Err(anyhow!("read_dir failed")))
    });

    let site = Site::start_with(pool, failing)?;
    let mut stream = site.connect()?;

    let response = site.get(&mut stream, "/dir/", true)?;
    assert_eq!(response.status, 500);
    assert_eq!(response.header("Connection"), Some("keep-alive"));

    // A complete error response leaves the connection usable
    let response = site.get(&mut stream, "/dir/", true)?;
    assert_eq!(response.status, 500);

    site.stop()
}

struct Site {
    addr: SocketAddr,
    stop: StopHandle,
    thread: JoinHandle<Result<(), Error>>,
}

impl Site {
    fn start(name: &str) -> Result<Self, Error> {
        let base_dir = create_site(name)?;

        let pool = Arc::new(WorkerPool::new(PoolOptions::new(1, 2))?);
        let router = handler::router(base_dir, pool.clone());

        Self::start_with(pool, router)
    }

    fn start_with(
        pool: Arc<WorkerPool<Connection>>,
        handler: RequestHandler,
    ) -> Result<Self, Error> {
        let options = ReactorOptions::new(SocketAddr::from(([127, 0, 0, 1], 0)));

        let reactor = Reactor::bind(options, pool, handler)?;
        let addr = reactor.local_addr();
        let stop = reactor.stop_handle();
        let thread = thread::spawn(move || reactor.run());

        Ok(Self { addr, stop, thread })
    }

    fn connect(&self) -> Result<TcpStream, Error> {
        let stream = TcpStream::connect(self.addr)?;
        stream.set_read_timeout(Some(Duration::from_secs(5)))?;
        Ok(stream)
    }

    fn get(&self, stream: &mut TcpStream, path: &str, keep_alive: bool) -> Result<Response, Error> {
        let connection = if keep_alive { "keep-alive" } else { "close" };
        let request = format!("GET {} HTTP/1.1\r\nConnection: {}\r\n\r\n", path, connection);
        stream.write_all(request.as_bytes())?;

        read_response(stream)
    }

    fn stop(self) -> Result<(), Error> {
        self.stop.stop()?;
        self.thread
            .join()
            .map_err(|_| anyhow!("reactor thread panicked"))?
    }
}

/// Lay out a small site, with a file just outside of it.
fn create_site(name: &str) -> Result<PathBuf, Error> {
    let root = std::env::temp_dir().join(format!("harbor-site-{}-{}", name, std::process::id()));
    let _ = fs::remove_dir_all(&root);

    let base = root.join("site");
    fs::create_dir_all(base.join("docs"))?;
    fs::write(base.join("index.html"), "<h1>home</h1>")?;
    fs::write(base.join("404.html"), "<h1>lost</h1>")?;
    fs::write(base.join("style.css"), "body {}")?;
    fs::write(base.join("docs/read me.txt"), "hello")?;
    fs::write(root.join("secret.txt"), "secret")?;

    Ok(base.canonicalize()?)
}

struct Response {
    status: u16,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl Response {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

fn read_response(stream: &mut TcpStream) -> Result<Response, Error> {
    let mut head = Vec::new();
    let mut byte = [0; 1];

    while !head.ends_with(b"\r\n\r\n") {
        if stream.read(&mut byte)? == 0 {
            bail!("stream closed before end of response head");
        }
        head.push(byte[0]);
    }

    let head = String::from_utf8(head)?;
    let mut lines = head.lines();

    let status = lines
        .next()
        .and_then(|line| line.split(' ').nth(1))
        .context("missing status line")?
        .parse()?;

    let headers: Vec<_> = lines
        .filter_map(|line| line.split_once(": "))
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect();

    let mut response = Response {
        status,
        headers,
        body: Vec::new(),
    };

    let length: usize = response
        .header("Content-Length")
        .context("response without content length")?
        .parse()?;
    response.body = vec![0; length];
    stream.read_exact(&mut response.body)?;

    Ok(response)
}
