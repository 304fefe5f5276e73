use std::{
    io::{ErrorKind, Write},
    mem,
    net::{SocketAddr, TcpListener, TcpStream},
    os::fd::AsRawFd,
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::{self, Receiver},
        Arc,
    },
    time::{Duration, Instant},
};

use anyhow::{Context as _, Error};
use harbor_http::ParseStatus;
use harbor_pool::WorkerPool;
use mio::{unix::SourceFd, Events, Interest, Poll, Token, Waker};
use socket2::{Domain, Protocol, Socket, Type};
use tracing::{event, instrument, Level};

use crate::{
    connection::ReadOutcome,
    registry::ConnectionRegistry,
    Connection,
};

const LISTENER: Token = Token(usize::MAX - 1);
const WAKER: Token = Token(usize::MAX);

/// Handler invoked on a worker for every complete request.
///
/// The handler writes the full response to the connection. Whether the connection stays open
/// afterwards is decided by the request's keep-alive flag, not by the handler. A handler
/// returning an error always closes the connection.
pub type RequestHandler = Arc<dyn Fn(&mut Connection) -> Result<(), Error> + Send + Sync>;

#[derive(Debug, Clone)]
pub struct ReactorOptions {
    pub address: SocketAddr,
    /// Pending connection queue length passed to `listen`.
    pub backlog: i32,
    /// Size of the buffer socket reads go through.
    pub scratch_size: usize,
    /// Maximum readiness events handled per poll.
    pub event_capacity: usize,
    /// How often the pool status is logged.
    pub status_interval: Duration,
    /// Delay before accepting again after a failed accept, such as running out of descriptors.
    pub accept_retry: Duration,
}

impl ReactorOptions {
    pub fn new(address: SocketAddr) -> Self {
        Self {
            address,
            ..Self::default()
        }
    }
}

impl Default for ReactorOptions {
    fn default() -> Self {
        Self {
            address: SocketAddr::from(([0, 0, 0, 0], 8080)),
            backlog: 1024,
            scratch_size: 8 * 1024,
            event_capacity: 1024,
            status_interval: Duration::from_secs(30),
            accept_retry: Duration::from_millis(100),
        }
    }
}

/// Requests a running reactor to stop, from any thread.
#[derive(Clone)]
pub struct StopHandle {
    stop: Arc<AtomicBool>,
    waker: Arc<Waker>,
}

impl StopHandle {
    pub fn stop(&self) -> Result<(), Error> {
        self.stop.store(true, Ordering::Release);
        self.waker.wake().context("failed to wake reactor")?;
        Ok(())
    }
}

/// Single-threaded readiness loop, accepting connections and parsing requests.
///
/// Complete requests are handed to the worker pool together with their connection. While a
/// worker owns a connection its socket is deregistered from the poll, it is registered again
/// when the connection comes back through the completion channel.
pub struct Reactor {
    options: ReactorOptions,
    poll: Poll,
    events: Events,
    listener: TcpListener,
    local_addr: SocketAddr,

    registry: ConnectionRegistry,
    pool: Arc<WorkerPool<Connection>>,
    handler: RequestHandler,

    stop: Arc<AtomicBool>,
    waker: Arc<Waker>,
    completed: Receiver<Connection>,

    /// Scratch buffer for socket reads.
    scratch: Vec<u8>,
    /// Scratch buffer for ready tokens.
    ready: Vec<Token>,
    last_status: Instant,
    /// Set when accepting failed before the backlog was drained. The listener is edge
    /// triggered, so no new readiness comes for connections already waiting.
    accept_pending: bool,
}

impl Reactor {
    /// Bind the listening socket and install the completion callback on `pool`.
    #[instrument("Reactor::bind", skip_all)]
    pub fn bind(
        options: ReactorOptions,
        pool: Arc<WorkerPool<Connection>>,
        handler: RequestHandler,
    ) -> Result<Self, Error> {
        let listener = listen(options.address, options.backlog)
            .with_context(|| format!("failed to listen on {}", options.address))?;
        let local_addr = listener.local_addr()?;

        let poll = Poll::new()?;
        poll.registry().register(
            &mut SourceFd(&listener.as_raw_fd()),
            LISTENER,
            Interest::READABLE,
        )?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKER)?);

        // Finished connections are sent back to the reactor thread, workers never touch the
        // registry themselves
        let (sender, completed) = mpsc::channel();
        let completion_waker = waker.clone();
        pool.set_completion(move |connection: Connection| {
            if sender.send(connection).is_err() {
                event!(Level::DEBUG, "reactor gone, dropping connection");
                return;
            }

            if let Err(error) = completion_waker.wake() {
                event!(Level::ERROR, ?error, "failed to wake reactor");
            }
        });

        event!(Level::DEBUG, %local_addr, "listener bound");

        let value = Self {
            events: Events::with_capacity(options.event_capacity),
            scratch: vec![0; options.scratch_size],
            options,
            poll,
            listener,
            local_addr,

            registry: ConnectionRegistry::default(),
            pool,
            handler,

            stop: Arc::new(AtomicBool::new(false)),
            waker,
            completed,

            ready: Vec::new(),
            last_status: Instant::now(),
            accept_pending: false,
        };
        Ok(value)
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            stop: self.stop.clone(),
            waker: self.waker.clone(),
        }
    }

    /// Run the readiness loop until stopped.
    ///
    /// On exit all connections owned by the reactor are closed and the pool is shut down.
    #[instrument("Reactor::run", skip_all, fields(addr = %self.local_addr))]
    pub fn run(mut self) -> Result<(), Error> {
        event!(Level::INFO, "listening");

        let result = self.run_poll_loop();
        if let Err(error) = &result {
            event!(Level::ERROR, "error in reactor loop: {:#}", error);
        }

        self.teardown();

        result
    }

    fn run_poll_loop(&mut self) -> Result<(), Error> {
        loop {
            let accept_retry = self.accept_pending.then_some(self.options.accept_retry);
            let timeout = poll_timeout(
                self.options.status_interval,
                self.last_status.elapsed(),
                accept_retry,
            );

            if let Err(error) = self.poll.poll(&mut self.events, Some(timeout)) {
                if error.kind() == ErrorKind::Interrupted {
                    continue;
                }
                return Err(error).context("failed to wait for readiness");
            }

            let mut ready = mem::take(&mut self.ready);
            ready.extend(self.events.iter().map(|event| event.token()));

            for token in ready.drain(..) {
                match token {
                    LISTENER => self.on_listener_ready(),
                    WAKER => self.on_completed(),
                    token => self.on_connection_ready(token),
                }
            }
            self.ready = ready;

            if self.accept_pending {
                self.on_listener_ready();
            }

            if self.stop.load(Ordering::Acquire) {
                event!(Level::INFO, "stop requested");
                return Ok(());
            }

            if self.last_status.elapsed() >= self.options.status_interval {
                self.log_status();
            }
        }
    }

    fn on_listener_ready(&mut self) {
        self.accept_pending = false;

        // Accept until the backlog is drained
        loop {
            let (stream, peer) = match self.listener.accept() {
                Ok(accepted) => accepted,
                Err(error) => match error.kind() {
                    ErrorKind::WouldBlock => break,
                    ErrorKind::Interrupted => continue,
                    _ => {
                        event!(Level::WARN, ?error, "failed to accept stream, retrying later");
                        self.accept_pending = true;
                        break;
                    }
                },
            };

            if let Err(error) = self.on_accepted(stream, peer) {
                event!(Level::WARN, ?peer, "failed to set up stream: {:#}", error);
            }
        }
    }

    fn on_accepted(&mut self, stream: TcpStream, peer: SocketAddr) -> Result<(), Error> {
        stream.set_nonblocking(true)?;
        let fd = stream.as_raw_fd();

        let token = self.registry.insert(stream, peer);
        event!(Level::DEBUG, ?peer, ?token, "stream accepted");

        let result = self
            .poll
            .registry()
            .register(&mut SourceFd(&fd), token, Interest::READABLE);
        if let Err(error) = result {
            self.registry.remove(token);
            return Err(error).context("failed to register stream");
        }

        Ok(())
    }

    fn on_connection_ready(&mut self, token: Token) {
        let Some(connection) = self.registry.get_mut(token) else {
            let worker_owned = self.registry.is_worker_owned(token);
            event!(Level::TRACE, ?token, worker_owned, "readiness for connection not owned by reactor");
            return;
        };

        match connection.read_available(&mut self.scratch) {
            Ok(ReadOutcome::Parsed(ParseStatus::NeedMore)) => {}
            Ok(ReadOutcome::Parsed(ParseStatus::Complete)) => self.dispatch(token),
            Ok(ReadOutcome::Parsed(ParseStatus::Malformed(error))) => {
                event!(Level::DEBUG, ?token, %error, "closing connection on malformed request");
                self.close(token);
            }
            Ok(ReadOutcome::Closed) => {
                event!(Level::DEBUG, ?token, "stream closed by peer");
                self.close(token);
            }
            Err(error) => {
                event!(Level::DEBUG, ?token, ?error, "closing connection on read error");
                self.close(token);
            }
        }
    }

    /// Move a connection with a complete request from the poll to a worker.
    fn dispatch(&mut self, token: Token) {
        let Some(connection) = self.registry.checkout(token) else {
            return;
        };

        // No more readiness until the worker is done, then the socket is registered again
        let disarmed = self
            .poll
            .registry()
            .deregister(&mut SourceFd(&connection.raw_fd()))
            .and_then(|_| connection.set_blocking(true));
        if let Err(error) = disarmed {
            event!(Level::DEBUG, ?token, ?error, "failed to disarm connection");
            self.registry.remove(token);
            return;
        }

        self.submit(connection);
    }

    fn submit(&mut self, connection: Connection) {
        let token = connection.token();
        let handler = self.handler.clone();

        let result = self.pool.submit(
            move |connection: &mut Connection| {
                let result = handler(connection).and_then(|_| Ok(connection.flush()?));

                // The client can't tell where a failed response ends, so it won't be reused
                if result.is_err() {
                    connection.mark_broken();
                }

                result
            },
            connection,
        );

        if let Err(error) = result {
            event!(Level::DEBUG, ?token, %error, "request dropped");
            self.registry.remove(token);
        }
    }

    fn on_completed(&mut self) {
        while let Ok(connection) = self.completed.try_recv() {
            self.on_connection_returned(connection);
        }
    }

    fn on_connection_returned(&mut self, mut connection: Connection) {
        let token = connection.token();

        if !connection.reusable() {
            event!(Level::DEBUG, ?token, "closing connection after response");
            self.registry.remove(token);
            return;
        }

        match connection.recycle() {
            // A pipelined request was already fully received, it goes straight back to a worker
            ParseStatus::Complete => self.submit(connection),
            ParseStatus::Malformed(error) => {
                event!(Level::DEBUG, ?token, %error, "closing connection on malformed request");
                self.registry.remove(token);
            }
            ParseStatus::NeedMore => {
                if let Err(error) = self.rearm(connection) {
                    event!(Level::DEBUG, ?token, "failed to rearm connection: {:#}", error);
                    self.registry.remove(token);
                }
            }
        }
    }

    fn rearm(&mut self, connection: Connection) -> Result<(), Error> {
        let token = connection.token();
        let fd = connection.raw_fd();
        connection.set_blocking(false)?;

        if self.registry.checkin(connection).is_err() {
            event!(Level::DEBUG, ?token, "connection no longer tracked, dropping");
            return Ok(());
        }

        self.poll
            .registry()
            .register(&mut SourceFd(&fd), token, Interest::READABLE)?;
        event!(Level::TRACE, ?token, "connection rearmed");

        Ok(())
    }

    fn close(&mut self, token: Token) {
        if let Some(connection) = self.registry.remove(token) {
            self.deregister(&connection);
        }
    }

    fn deregister(&self, connection: &Connection) {
        let result = self
            .poll
            .registry()
            .deregister(&mut SourceFd(&connection.raw_fd()));

        if let Err(error) = result {
            event!(Level::TRACE, token = ?connection.token(), ?error, "failed to deregister");
        }
    }

    fn log_status(&mut self) {
        let status = self.pool.status();
        event!(
            Level::INFO,
            connections = self.registry.len(),
            live = status.live_threads,
            busy = status.busy_threads,
            queued = status.queue_depth,
            load = status.load_factor,
            "pool status"
        );
        self.last_status = Instant::now();
    }

    #[instrument("Reactor::teardown", skip_all)]
    fn teardown(&mut self) {
        let connections = self.registry.drain();
        event!(Level::DEBUG, count = connections.len(), "closing connections");
        for connection in connections {
            self.deregister(&connection);
        }

        let listener = self.listener.as_raw_fd();
        if let Err(error) = self.poll.registry().deregister(&mut SourceFd(&listener)) {
            event!(Level::TRACE, ?error, "failed to deregister listener");
        }

        // Clears the completion callback first, workers still running drop their connections
        self.pool.shutdown();

        // Connections that made it back before the callback was cleared
        while self.completed.try_recv().is_ok() {}
    }
}

/// How long a poll may block before periodic work is due.
fn poll_timeout(
    status_interval: Duration,
    since_status: Duration,
    accept_retry: Option<Duration>,
) -> Duration {
    let until_status = status_interval.saturating_sub(since_status);

    match accept_retry {
        Some(retry) => until_status.min(retry),
        None => until_status,
    }
}

/// Bind a non-blocking listening socket.
fn listen(address: SocketAddr, backlog: i32) -> Result<TcpListener, std::io::Error> {
    let socket = Socket::new(Domain::for_address(address), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&address.into())?;
    socket.listen(backlog)?;

    Ok(socket.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poll_waits_for_next_status_log() {
        let timeout = poll_timeout(Duration::from_secs(30), Duration::from_secs(10), None);
        assert_eq!(timeout, Duration::from_secs(20));

        let overdue = poll_timeout(Duration::from_secs(30), Duration::from_secs(45), None);
        assert_eq!(overdue, Duration::ZERO);
    }

    #[test]
    fn failed_accept_shortens_poll() {
        let retry = Some(Duration::from_millis(100));

        let timeout = poll_timeout(Duration::from_secs(30), Duration::ZERO, retry);
        assert_eq!(timeout, Duration::from_millis(100));

        // Status log still wins when it's due sooner
        let timeout = poll_timeout(Duration::from_secs(30), Duration::from_millis(29_950), retry);
        assert_eq!(timeout, Duration::from_millis(50));
    }
}
