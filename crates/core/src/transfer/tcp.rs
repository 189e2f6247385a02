use std::collections::BTreeMap;
use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::os::fd::AsRawFd;
use std::time::{Duration, Instant};

use nix::errno::Errno;
use socket2::{Domain, Protocol, Socket, Type};

use super::{Completion, Request, TransferEngine, TransferHandle};
use crate::error::{Result, WallError};
use crate::protocol::uri::{self, Target};
use crate::protocol::{Method, Progress, ResponseHead, ResponseReader};
use crate::reactor::Interest;
use crate::session::Continuation;

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

const READ_CHUNK: usize = 16 * 1024;

/// Socket reads per transfer per `perform`, so one busy camera cannot
/// starve the others.
const MAX_READS_PER_PERFORM: usize = 8;

struct Connection {
    stream: TcpStream,
    authority: String,
    connected: bool,
    reader: ResponseReader,
}

impl Connection {
    /// Start a non-blocking connect. Name resolution blocks.
    fn open(target: &Target) -> Result<Self> {
        let addr = (target.host.as_str(), target.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| WallError::InvalidUri(target.authority()))?;

        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
        socket.set_nonblocking(true)?;

        let connected = match socket.connect(&addr.into()) {
            Ok(()) => true,
            Err(e)
                if e.raw_os_error() == Some(Errno::EINPROGRESS as i32)
                    || e.kind() == io::ErrorKind::WouldBlock =>
            {
                false
            }
            Err(e) => return Err(e.into()),
        };

        let stream: TcpStream = socket.into();
        stream.set_nodelay(true)?;
        tracing::debug!(%addr, connected, "opened camera connection");

        Ok(Connection {
            stream,
            authority: target.authority(),
            connected,
            reader: ResponseReader::new(),
        })
    }

    /// Check whether a pending connect has finished.
    fn poll_connect(&mut self) -> Result<bool> {
        if let Some(e) = self.stream.take_error()? {
            return Err(e.into());
        }
        match self.stream.peer_addr() {
            Ok(_) => {
                self.connected = true;
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

struct Exchange {
    request: Request,
    continuation: Continuation,
    outgoing: Vec<u8>,
    written: usize,
    deadline: Option<Instant>,
    /// Bytes buffered by an earlier exchange still need parsing.
    replay: bool,
}

#[derive(Default)]
struct Transfer {
    conn: Option<Connection>,
    cseq: u32,
    session: Option<String>,
    exchange: Option<Exchange>,
}

impl Transfer {
    fn close(&mut self) {
        self.conn = None;
        self.session = None;
    }

    /// Drive the running exchange. `Some` once it has finished.
    fn drive(&mut self, request_timeout: Duration) -> Option<Result<()>> {
        let now = Instant::now();
        let exchange = self.exchange.as_mut()?;
        let Some(conn) = self.conn.as_mut() else {
            return Some(Err(WallError::Disconnected));
        };
        let receiving = exchange.request.message.method == Method::Receive;

        if !conn.connected {
            match conn.poll_connect() {
                Ok(true) => exchange.deadline = (!receiving).then(|| now + request_timeout),
                Ok(false) => return expired(exchange.deadline, now),
                Err(e) => return Some(Err(e)),
            }
        }

        while exchange.written < exchange.outgoing.len() {
            match conn.stream.write(&exchange.outgoing[exchange.written..]) {
                Ok(0) => return Some(Err(WallError::Disconnected)),
                Ok(n) => exchange.written += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Some(Err(e.into())),
            }
        }

        exchange.replay = false;
        let handler = exchange.request.handler.as_mut();
        let mut buf = [0u8; READ_CHUNK];
        let mut reads = 0;

        loop {
            match conn.reader.advance(handler) {
                Ok(Progress::Complete(head)) => {
                    return Some(finish(&head, &mut self.session, receiving));
                }
                Ok(Progress::Pending) => {}
                Err(e) => return Some(Err(e)),
            }

            if reads == MAX_READS_PER_PERFORM {
                break;
            }

            match conn.stream.read(&mut buf) {
                Ok(0) => {
                    return Some(match conn.reader.finish_on_close() {
                        Ok(Progress::Complete(head)) => finish(&head, &mut self.session, receiving),
                        Ok(Progress::Pending) => Err(WallError::Disconnected),
                        Err(e) => Err(e),
                    });
                }
                Ok(n) => {
                    reads += 1;
                    conn.reader.extend(&buf[..n]);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Some(Err(e.into())),
            }
        }

        expired(exchange.deadline, now)
    }
}

fn expired(deadline: Option<Instant>, now: Instant) -> Option<Result<()>> {
    deadline
        .filter(|deadline| now >= *deadline)
        .map(|_| Err(WallError::Timeout))
}

/// Record the session id and map the status to an outcome. A message that
/// ends a RECEIVE succeeds whatever its status.
fn finish(head: &ResponseHead, session: &mut Option<String>, receiving: bool) -> Result<()> {
    if let Some(id) = head.session_id()
        && session.as_deref() != Some(id)
    {
        tracing::debug!(session = id, "session established");
        *session = Some(id.to_string());
    }

    if receiving || head.is_success() {
        Ok(())
    } else {
        Err(WallError::Status {
            code: head.status_code,
            reason: head.reason.clone(),
        })
    }
}

/// [`TransferEngine`] over plain non-blocking TCP sockets.
///
/// Each [`TransferHandle`] owns at most one persistent connection, reused by
/// successive RTSP requests to the same host. CSeq numbering and the
/// `Session` id are kept per handle. HTTP requests always use a fresh
/// connection that is closed when the response completes.
pub struct TcpEngine {
    transfers: BTreeMap<TransferHandle, Transfer>,
    next_id: u64,
    completions: Vec<Completion>,
    connect_timeout: Duration,
    request_timeout: Duration,
}

impl Default for TcpEngine {
    fn default() -> Self {
        Self::new(DEFAULT_CONNECT_TIMEOUT, DEFAULT_REQUEST_TIMEOUT)
    }
}

impl TcpEngine {
    pub fn new(connect_timeout: Duration, request_timeout: Duration) -> Self {
        Self {
            transfers: BTreeMap::new(),
            next_id: 1,
            completions: Vec::new(),
            connect_timeout,
            request_timeout,
        }
    }

    /// Number of live transfers.
    pub fn len(&self) -> usize {
        self.transfers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transfers.is_empty()
    }
}

impl TransferEngine for TcpEngine {
    fn create(&mut self) -> TransferHandle {
        let handle = TransferHandle::new(self.next_id);
        self.next_id += 1;
        self.transfers.insert(handle, Transfer::default());
        tracing::trace!(transfer = %handle, "transfer created");
        handle
    }

    fn submit(
        &mut self,
        handle: TransferHandle,
        request: Request,
        continuation: Continuation,
    ) -> Result<()> {
        let transfer = self
            .transfers
            .get_mut(&handle)
            .ok_or(WallError::UnknownTransfer)?;
        if transfer.exchange.is_some() {
            return Err(WallError::Protocol(format!(
                "transfer {handle} already has an exchange in flight"
            )));
        }

        let method = request.message.method;
        let now = Instant::now();

        if method != Method::Receive {
            let target = uri::parse(&request.message.uri)?;
            let reusable = transfer
                .conn
                .as_ref()
                .is_some_and(|c| c.authority == target.authority() && !method.is_http());
            if !reusable {
                transfer.close();
                transfer.conn = Some(Connection::open(&target)?);
            }
        }

        let conn = transfer.conn.as_mut().ok_or(WallError::Disconnected)?;
        conn.reader.set_read_to_close(method.is_http());

        let outgoing = if method == Method::Receive {
            Vec::new()
        } else {
            transfer.cseq += 1;
            request
                .message
                .serialize(transfer.cseq, transfer.session.as_deref())?
                .into_bytes()
        };

        let deadline = if !conn.connected {
            Some(now + self.connect_timeout)
        } else if method == Method::Receive {
            None
        } else {
            Some(now + self.request_timeout)
        };

        tracing::debug!(
            transfer = %handle,
            %method,
            uri = %request.message.uri,
            cseq = transfer.cseq,
            "request submitted"
        );

        transfer.exchange = Some(Exchange {
            request,
            continuation,
            outgoing,
            written: 0,
            deadline,
            replay: conn.reader.buffered() > 0,
        });
        Ok(())
    }

    fn release(&mut self, handle: TransferHandle) {
        if self.transfers.remove(&handle).is_some() {
            tracing::trace!(transfer = %handle, "transfer released");
        }
        self.completions.retain(|c| c.handle != handle);
    }

    fn interests(&self) -> Vec<Interest> {
        self.transfers
            .values()
            .filter_map(|t| {
                let exchange = t.exchange.as_ref()?;
                let conn = t.conn.as_ref()?;
                let fd = conn.stream.as_raw_fd();
                Some(if !conn.connected {
                    Interest::writable(fd)
                } else if exchange.written < exchange.outgoing.len() {
                    Interest {
                        fd,
                        readable: true,
                        writable: true,
                    }
                } else {
                    Interest::readable(fd)
                })
            })
            .collect()
    }

    fn timeout(&self) -> Option<Duration> {
        let replay = self
            .transfers
            .values()
            .any(|t| t.exchange.as_ref().is_some_and(|e| e.replay));
        if replay || !self.completions.is_empty() {
            return Some(Duration::ZERO);
        }

        let now = Instant::now();
        self.transfers
            .values()
            .filter_map(|t| t.exchange.as_ref()?.deadline)
            .min()
            .map(|deadline| deadline.saturating_duration_since(now))
    }

    fn is_active(&self) -> bool {
        !self.completions.is_empty() || self.transfers.values().any(|t| t.exchange.is_some())
    }

    fn perform(&mut self) {
        let running: Vec<TransferHandle> = self
            .transfers
            .iter()
            .filter(|(_, t)| t.exchange.is_some())
            .map(|(handle, _)| *handle)
            .collect();

        for handle in running {
            let Some(transfer) = self.transfers.get_mut(&handle) else {
                continue;
            };
            let Some(outcome) = transfer.drive(self.request_timeout) else {
                continue;
            };
            let Some(exchange) = transfer.exchange.take() else {
                continue;
            };

            let method = exchange.request.message.method;
            match &outcome {
                Ok(()) => tracing::trace!(transfer = %handle, %method, "exchange complete"),
                Err(e) => tracing::debug!(transfer = %handle, %method, error = %e, "exchange failed"),
            }
            if outcome.is_err() || method.is_http() {
                transfer.close();
            }

            self.completions.push(Completion {
                handle,
                outcome,
                request: exchange.request,
                continuation: exchange.continuation,
            });
        }
    }

    fn drain_completions(&mut self) -> Vec<Completion> {
        std::mem::take(&mut self.completions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::RtspRequest;
    use crate::transfer::{ExchangeHandler, Flow};
    use std::cell::RefCell;
    use std::io::{BufRead, BufReader};
    use std::net::TcpListener;
    use std::rc::Rc;
    use std::sync::mpsc;
    use std::thread;

    #[derive(Default)]
    struct Captured {
        body: Vec<u8>,
        frames: Vec<Vec<u8>>,
    }

    struct Capture(Rc<RefCell<Captured>>);

    impl ExchangeHandler for Capture {
        fn on_body(&mut self, chunk: &[u8]) -> Flow {
            self.0.borrow_mut().body.extend_from_slice(chunk);
            Flow::Continue
        }

        fn on_interleaved(&mut self, frame: &[u8]) -> Flow {
            self.0.borrow_mut().frames.push(frame.to_vec());
            Flow::Continue
        }
    }

    fn command() -> Continuation {
        Continuation::Command {
            label: "test".to_string(),
        }
    }

    /// Read one request head from the client.
    fn read_head(reader: &mut BufReader<TcpStream>) -> String {
        let mut head = String::new();
        loop {
            let mut line = String::new();
            if reader.read_line(&mut line).unwrap() == 0 {
                break;
            }
            head.push_str(&line);
            if line == "\r\n" {
                break;
            }
        }
        head
    }

    fn wait_for_completion(engine: &mut TcpEngine) -> Completion {
        for _ in 0..400 {
            engine.perform();
            if let Some(completion) = engine.drain_completions().pop() {
                return completion;
            }
            thread::sleep(Duration::from_millis(5));
        }
        panic!("exchange did not complete");
    }

    #[test]
    fn describe_then_setup_reuse_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let (tx, rx) = mpsc::channel();

        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut writer = stream.try_clone().unwrap();
            let mut reader = BufReader::new(stream);

            tx.send(read_head(&mut reader)).unwrap();
            writer
                .write_all(b"RTSP/1.0 200 OK\r\nCSeq: 1\r\nContent-Length: 5\r\n\r\nv=0\r\n")
                .unwrap();

            tx.send(read_head(&mut reader)).unwrap();
            writer
                .write_all(b"RTSP/1.0 200 OK\r\nCSeq: 2\r\nSession: abc123;timeout=60\r\n\r\n")
                .unwrap();

            tx.send(read_head(&mut reader)).unwrap();
            writer.write_all(b"RTSP/1.0 200 OK\r\nCSeq: 3\r\n\r\n").unwrap();
        });

        let url = format!("rtsp://127.0.0.1:{port}/live");
        let mut engine = TcpEngine::default();
        let handle = engine.create();
        let captured = Rc::new(RefCell::new(Captured::default()));

        let describe = Request::new(
            RtspRequest::describe(&url),
            Box::new(Capture(captured.clone())),
        );
        engine.submit(handle, describe, command()).unwrap();
        let done = wait_for_completion(&mut engine);
        assert!(done.outcome.is_ok());
        assert_eq!(captured.borrow().body, b"v=0\r\n");
        let head = rx.recv().unwrap();
        assert!(head.starts_with("DESCRIBE "), "{head}");
        assert!(head.contains("CSeq: 1\r\n"));

        let setup = Request::discarding(RtspRequest::setup(&format!("{url}/trackID=1")));
        engine.submit(handle, setup, command()).unwrap();
        assert!(wait_for_completion(&mut engine).outcome.is_ok());
        let head = rx.recv().unwrap();
        assert!(head.contains("CSeq: 2\r\n"));

        let play = Request::discarding(RtspRequest::play(&format!("{url}/trackID=1")));
        engine.submit(handle, play, command()).unwrap();
        assert!(wait_for_completion(&mut engine).outcome.is_ok());
        let head = rx.recv().unwrap();
        assert!(head.contains("CSeq: 3\r\n"));
        assert!(head.contains("Session: abc123\r\n"), "session id echoed: {head}");

        server.join().unwrap();
    }

    #[test]
    fn error_status_fails_exchange() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut writer = stream.try_clone().unwrap();
            let mut reader = BufReader::new(stream);
            read_head(&mut reader);
            writer
                .write_all(b"RTSP/1.0 404 Not Found\r\nCSeq: 1\r\n\r\n")
                .unwrap();
        });

        let mut engine = TcpEngine::default();
        let handle = engine.create();
        let url = format!("rtsp://127.0.0.1:{port}/missing");
        engine
            .submit(handle, Request::discarding(RtspRequest::describe(&url)), command())
            .unwrap();

        let done = wait_for_completion(&mut engine);
        assert!(matches!(
            done.outcome,
            Err(WallError::Status { code: 404, .. })
        ));
        server.join().unwrap();
    }

    #[test]
    fn receive_delivers_frames_until_close() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut writer = stream.try_clone().unwrap();
            let mut reader = BufReader::new(stream);
            read_head(&mut reader);
            // Response and first frame in one write: the frame must survive
            // into the following RECEIVE.
            writer
                .write_all(b"RTSP/1.0 200 OK\r\nCSeq: 1\r\n\r\n$\x00\x00\x03abc")
                .unwrap();
            writer.write_all(b"$\x00\x00\x02de").unwrap();
        });

        let mut engine = TcpEngine::default();
        let handle = engine.create();
        let url = format!("rtsp://127.0.0.1:{port}/live");
        let captured = Rc::new(RefCell::new(Captured::default()));

        engine
            .submit(handle, Request::discarding(RtspRequest::play(&url)), command())
            .unwrap();
        let done = wait_for_completion(&mut engine);
        assert!(done.outcome.is_ok());
        server.join().unwrap();

        let receive = Request::new(
            RtspRequest::receive(&url),
            Box::new(Capture(captured.clone())),
        );
        engine.submit(handle, receive, command()).unwrap();
        let done = wait_for_completion(&mut engine);
        assert!(matches!(done.outcome, Err(WallError::Disconnected)));
        assert_eq!(
            captured.borrow().frames,
            vec![b"$\x00\x00\x03abc".to_vec(), b"$\x00\x00\x02de".to_vec()]
        );
    }

    #[test]
    fn receive_without_connection_is_rejected() {
        let mut engine = TcpEngine::default();
        let handle = engine.create();
        let receive = Request::discarding(RtspRequest::receive("rtsp://127.0.0.1/x"));
        assert!(matches!(
            engine.submit(handle, receive, command()),
            Err(WallError::Disconnected)
        ));
    }

    #[test]
    fn unknown_and_released_handles() {
        let mut engine = TcpEngine::default();
        let handle = engine.create();
        engine.release(handle);
        assert!(engine.is_empty());

        let request = Request::discarding(RtspRequest::describe("rtsp://127.0.0.1/x"));
        assert!(matches!(
            engine.submit(handle, request, command()),
            Err(WallError::UnknownTransfer)
        ));
        assert!(!engine.is_active());
        assert_eq!(engine.timeout(), None);
    }
}
