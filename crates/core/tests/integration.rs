//! Integration test: a camera session against a fake RTSP camera.
//!
//! The camera answers DESCRIBE → SETUP → PLAY on a local TCP listener and
//! then streams interleaved RTP. A real reactor, TCP transfer engine and
//! stream renderer must rebuild the Annex-B elementary stream.

use std::cell::RefCell;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::rc::Rc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use videowall::{
    CameraSession, Reactor, RendererRef, SessionState, StreamRenderer, TcpEngine, TargetId,
};

const SDP: &str = "v=0\r\n\
    o=- 0 0 IN IP4 127.0.0.1\r\n\
    s=Fake Camera\r\n\
    t=0 0\r\n\
    m=video 0 RTP/AVP 96\r\n\
    a=rtpmap:96 H264/90000\r\n\
    a=fmtp:96 packetization-mode=1;sprop-parameter-sets=Z0IAHw==,aM48gA==\r\n\
    a=control:trackID=1\r\n";

#[derive(Clone, Default)]
struct SharedSink(Arc<Mutex<Vec<u8>>>);

impl Write for SharedSink {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

fn read_request(stream: &mut TcpStream) -> Option<String> {
    let mut data = Vec::new();
    let mut byte = [0u8; 1];
    while !data.ends_with(b"\r\n\r\n") {
        match stream.read(&mut byte) {
            Ok(0) | Err(_) => return None,
            Ok(_) => data.push(byte[0]),
        }
    }
    String::from_utf8(data).ok()
}

fn header<'a>(request: &'a str, name: &str) -> Option<&'a str> {
    request.lines().find_map(|line| {
        let (key, value) = line.split_once(':')?;
        key.eq_ignore_ascii_case(name).then(|| value.trim())
    })
}

fn rtp_frame(seq: u16, payload: &[u8]) -> Vec<u8> {
    let mut rtp = vec![0x80, 0x60];
    rtp.extend_from_slice(&seq.to_be_bytes());
    rtp.extend_from_slice(&90_000u32.to_be_bytes());
    rtp.extend_from_slice(&0xCAFE_F00Du32.to_be_bytes());
    rtp.extend_from_slice(payload);

    let mut frame = vec![b'$', 0];
    frame.extend_from_slice(&(rtp.len() as u16).to_be_bytes());
    frame.extend_from_slice(&rtp);
    frame
}

/// SEI as a single NAL unit, then an IDR slice split into three FU-A
/// fragments. An RTCP frame on channel 1 is mixed in and must be ignored.
fn media() -> Vec<u8> {
    let mut out = Vec::new();
    out.extend(rtp_frame(100, &[0x06, 0xAA]));
    out.extend(rtp_frame(101, &[0x7C, 0x85, 1, 2]));
    out.extend([b'$', 1, 0, 2, 0x80, 0xC8]);
    out.extend(rtp_frame(102, &[0x7C, 0x05, 3, 4]));
    out.extend(rtp_frame(103, &[0x7C, 0x45, 5, 6]));
    out
}

const EXPECTED: &[u8] = &[
    0, 0, 0, 1, 0x67, 0x42, 0x00, 0x1F, // SPS
    0, 0, 0, 1, 0x68, 0xCE, 0x3C, 0x80, // PPS
    0, 0, 0, 1, 0x06, 0xAA, // SEI
    0, 0, 0, 1, 0x65, 1, 2, 3, 4, 5, 6, // IDR
];

/// Serve one client; returns every request it received.
fn fake_camera(listener: TcpListener, close_after_play: bool) -> JoinHandle<Vec<String>> {
    let port = listener.local_addr().unwrap().port();
    thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        let mut seen = Vec::new();

        while let Some(request) = read_request(&mut stream) {
            let cseq = header(&request, "CSeq").unwrap_or("0").to_string();
            let method = request.split(' ').next().unwrap_or_default().to_string();
            seen.push(request);

            match method.as_str() {
                "DESCRIBE" => {
                    let response = format!(
                        "RTSP/1.0 200 OK\r\nCSeq: {cseq}\r\n\
                         Content-Base: rtsp://127.0.0.1:{port}/cam/\r\n\
                         Content-Type: application/sdp\r\n\
                         Content-Length: {}\r\n\r\n{SDP}",
                        SDP.len()
                    );
                    stream.write_all(response.as_bytes()).unwrap();
                }
                "SETUP" => {
                    let response = format!(
                        "RTSP/1.0 200 OK\r\nCSeq: {cseq}\r\n\
                         Session: 4242;timeout=60\r\n\
                         Transport: RTP/AVP/TCP;unicast;interleaved=0-1\r\n\r\n"
                    );
                    stream.write_all(response.as_bytes()).unwrap();
                }
                "PLAY" => {
                    let mut response = format!(
                        "RTSP/1.0 200 OK\r\nCSeq: {cseq}\r\nSession: 4242\r\n\r\n"
                    )
                    .into_bytes();
                    response.extend(media());
                    stream.write_all(&response).unwrap();
                    if close_after_play {
                        break;
                    }
                }
                _ => {
                    let response = format!("RTSP/1.0 405 Method Not Allowed\r\nCSeq: {cseq}\r\n\r\n");
                    stream.write_all(response.as_bytes()).unwrap();
                }
            }
        }
        seen
    })
}

struct Rig {
    reactor: Reactor,
    renderer: Rc<RefCell<StreamRenderer>>,
    sink: SharedSink,
    camera: videowall::CameraRef,
}

fn rig(port: u16, retry: Duration) -> Rig {
    let sink = SharedSink::default();
    let renderer = Rc::new(RefCell::new(StreamRenderer::new(8, 64 * 1024, None)));
    let target = renderer
        .borrow_mut()
        .add_sink_target("cam", Some(Box::new(sink.clone())))
        .unwrap();
    assert_eq!(target, TargetId(0));

    let shared: RendererRef = renderer.clone();
    let camera = CameraSession::new("cam", &format!("rtsp://127.0.0.1:{port}/cam"), shared, target)
        .with_retry_interval(retry)
        .into_shared();

    let mut reactor = Reactor::new();
    reactor.attach_engine(Box::new(TcpEngine::default()));
    CameraSession::attach(&camera, &mut reactor).unwrap();

    Rig {
        reactor,
        renderer,
        sink,
        camera,
    }
}

fn run_until(reactor: &mut Reactor, mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        reactor.run_once(Duration::from_millis(20));
        if done() {
            return true;
        }
    }
    false
}

#[test]
fn negotiates_and_rebuilds_annex_b_stream() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = fake_camera(listener, false);

    let Rig {
        mut reactor,
        renderer,
        sink,
        camera,
    } = rig(port, Duration::from_secs(10));

    let complete = run_until(&mut reactor, || sink.0.lock().len() >= EXPECTED.len());
    assert!(complete, "stream not reconstructed: {:?}", sink.0.lock());
    assert_eq!(sink.0.lock().as_slice(), EXPECTED);
    assert_eq!(camera.borrow().state(), SessionState::Receiving);
    assert_eq!(
        camera.borrow().control(),
        Some(format!("rtsp://127.0.0.1:{port}/cam/trackID=1").as_str())
    );
    assert_eq!(camera.borrow().stats().other_channel, 1);

    drop(reactor);
    renderer.borrow_mut().shutdown();
    let requests = server.join().unwrap();

    assert_eq!(requests.len(), 3);
    assert!(requests[0].starts_with(&format!("DESCRIBE rtsp://127.0.0.1:{port}/cam RTSP/1.0\r\n")));
    assert_eq!(header(&requests[0], "Accept"), Some("application/sdp"));
    assert_eq!(header(&requests[0], "CSeq"), Some("1"));

    assert!(requests[1].starts_with(&format!(
        "SETUP rtsp://127.0.0.1:{port}/cam/trackID=1 RTSP/1.0\r\n"
    )));
    assert_eq!(
        header(&requests[1], "Transport"),
        Some("RTP/AVP/TCP;unicast;interleaved=0-1")
    );
    assert_eq!(header(&requests[1], "Session"), None);

    assert!(requests[2].starts_with("PLAY "));
    assert_eq!(header(&requests[2], "Session"), Some("4242"));
    assert_eq!(header(&requests[2], "CSeq"), Some("3"));
}

#[test]
fn closed_connection_fails_session_and_arms_retry() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = fake_camera(listener, true);

    let retry = Duration::from_secs(30);
    let Rig {
        mut reactor,
        sink,
        camera,
        ..
    } = rig(port, retry);

    let failed = run_until(&mut reactor, || {
        camera.borrow().state() == SessionState::Failed
    });
    assert!(failed, "session did not fail after the camera hung up");

    let endpoint = {
        let session = camera.borrow();
        assert!(session.transfer().is_none());
        assert_eq!(session.restarts(), 1);
        session.endpoint().unwrap()
    };
    let deadline = reactor.next_deadline(endpoint).unwrap().unwrap();
    assert!(deadline > Instant::now() + retry - Duration::from_secs(5));

    // Media sent before the hang-up was still delivered.
    let delivered = run_until(&mut reactor, || sink.0.lock().len() >= EXPECTED.len());
    assert!(delivered);

    assert_eq!(server.join().unwrap().len(), 3);
}
