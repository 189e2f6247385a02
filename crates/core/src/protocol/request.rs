use std::fmt;

use super::uri;
use crate::error::Result;

/// Client identification string sent with every request (RFC 2326 §12.41).
pub const USER_AGENT: &str = "videowall/0.1";

/// Transport requested in SETUP: RTP over the RTSP connection, channels 0-1.
pub const INTERLEAVED_TRANSPORT: &str = "RTP/AVP/TCP;unicast;interleaved=0-1";

/// Range requested in PLAY: from the start, open ended.
pub const PLAY_RANGE: &str = "0.000-";

/// Request methods the client issues.
///
/// [`Receive`](Self::Receive) is not an RTSP method: it puts nothing on the
/// wire and only waits on the open connection for interleaved data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Options,
    Describe,
    Setup,
    Play,
    Teardown,
    GetParameter,
    Receive,
    HttpGet,
    HttpPost,
    HttpPut,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Options => "OPTIONS",
            Self::Describe => "DESCRIBE",
            Self::Setup => "SETUP",
            Self::Play => "PLAY",
            Self::Teardown => "TEARDOWN",
            Self::GetParameter => "GET_PARAMETER",
            Self::Receive => "RECEIVE",
            Self::HttpGet => "GET",
            Self::HttpPost => "POST",
            Self::HttpPut => "PUT",
        }
    }

    pub fn is_http(&self) -> bool {
        matches!(self, Self::HttpGet | Self::HttpPost | Self::HttpPut)
    }

    /// Case-insensitive lookup of an HTTP method name, as used by PTZ
    /// command templates.
    pub fn http(name: &str) -> Option<Self> {
        [Self::HttpGet, Self::HttpPost, Self::HttpPut]
            .into_iter()
            .find(|m| m.as_str().eq_ignore_ascii_case(name))
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An outgoing RTSP (or HTTP) request.
///
/// ```text
/// SETUP rtsp://cam/stream/trackID=1 RTSP/1.0\r\n
/// CSeq: 3\r\n
/// User-Agent: videowall/0.1\r\n
/// Session: 12345678\r\n
/// Transport: RTP/AVP/TCP;unicast;interleaved=0-1\r\n
/// \r\n
/// ```
///
/// Builder style: chain [`add_header`](Self::add_header) and
/// [`with_body`](Self::with_body). `CSeq`, `Session` and `Content-Length`
/// belong to the connection and are filled in by
/// [`serialize`](Self::serialize).
#[must_use]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtspRequest {
    pub method: Method,
    pub uri: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

impl RtspRequest {
    pub fn new(method: Method, uri: &str) -> Self {
        RtspRequest {
            method,
            uri: uri.to_string(),
            headers: Vec::new(),
            body: None,
        }
    }

    /// DESCRIBE, asking for an SDP presentation description (RFC 2326 §10.2).
    pub fn describe(uri: &str) -> Self {
        Self::new(Method::Describe, uri).add_header("Accept", "application/sdp")
    }

    /// SETUP of the video track over interleaved TCP (RFC 2326 §10.4).
    pub fn setup(control: &str) -> Self {
        Self::new(Method::Setup, control).add_header("Transport", INTERLEAVED_TRANSPORT)
    }

    /// PLAY from the start of the stream (RFC 2326 §10.5).
    pub fn play(control: &str) -> Self {
        Self::new(Method::Play, control).add_header("Range", PLAY_RANGE)
    }

    pub fn receive(uri: &str) -> Self {
        Self::new(Method::Receive, uri)
    }

    pub fn add_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn with_body(mut self, body: String) -> Self {
        self.body = Some(body);
        self
    }

    /// Look up a header value by name (case-insensitive, RFC 2326 §4.2).
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Serialize to wire format.
    ///
    /// RTSP requests carry `cseq` and, once SETUP has assigned one, the
    /// session id. HTTP requests get a `Host` header and `Connection: close`
    /// instead. [`Method::Receive`] serializes to nothing.
    pub fn serialize(&self, cseq: u32, session: Option<&str>) -> Result<String> {
        if self.method == Method::Receive {
            return Ok(String::new());
        }

        let mut out = if self.method.is_http() {
            let target = uri::parse(&self.uri)?;
            let host = if target.port == uri::DEFAULT_HTTP_PORT {
                target.host.clone()
            } else {
                target.authority()
            };
            format!(
                "{} {} HTTP/1.1\r\nHost: {}\r\nUser-Agent: {}\r\nConnection: close\r\n",
                self.method, target.path, host, USER_AGENT
            )
        } else {
            let mut head = format!(
                "{} {} RTSP/1.0\r\nCSeq: {}\r\nUser-Agent: {}\r\n",
                self.method, self.uri, cseq, USER_AGENT
            );
            if let Some(session) = session {
                head.push_str(&format!("Session: {session}\r\n"));
            }
            head
        };

        for (name, value) in &self.headers {
            out.push_str(&format!("{name}: {value}\r\n"));
        }

        match &self.body {
            Some(body) => {
                out.push_str(&format!("Content-Length: {}\r\n\r\n", body.len()));
                out.push_str(body);
            }
            None if self.method.is_http() && self.method != Method::HttpGet => {
                out.push_str("Content-Length: 0\r\n\r\n");
            }
            None => out.push_str("\r\n"),
        }

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialize_describe() {
        let s = RtspRequest::describe("rtsp://cam/live")
            .serialize(1, None)
            .unwrap();
        assert!(s.starts_with("DESCRIBE rtsp://cam/live RTSP/1.0\r\n"));
        assert!(s.contains("CSeq: 1\r\n"));
        assert!(s.contains("User-Agent: videowall/0.1\r\n"));
        assert!(s.contains("Accept: application/sdp\r\n"));
        assert!(!s.contains("Session:"));
        assert!(s.ends_with("\r\n\r\n"));
    }

    #[test]
    fn serialize_setup_and_play() {
        let setup = RtspRequest::setup("rtsp://cam/live/trackID=1")
            .serialize(2, None)
            .unwrap();
        assert!(setup.contains("Transport: RTP/AVP/TCP;unicast;interleaved=0-1\r\n"));

        let play = RtspRequest::play("rtsp://cam/live/trackID=1")
            .serialize(3, Some("66334873"))
            .unwrap();
        assert!(play.starts_with("PLAY rtsp://cam/live/trackID=1 RTSP/1.0\r\n"));
        assert!(play.contains("Session: 66334873\r\n"));
        assert!(play.contains("Range: 0.000-\r\n"));
    }

    #[test]
    fn receive_writes_nothing() {
        let s = RtspRequest::receive("rtsp://cam/live")
            .serialize(9, Some("1"))
            .unwrap();
        assert!(s.is_empty());
    }

    #[test]
    fn serialize_http_with_body() {
        let s = RtspRequest::new(Method::HttpPost, "http://cam:8080/ptz?op=left")
            .add_header("Content-Type", "text/plain")
            .with_body("speed=3".to_string())
            .serialize(1, None)
            .unwrap();
        assert!(s.starts_with("POST /ptz?op=left HTTP/1.1\r\n"));
        assert!(s.contains("Host: cam:8080\r\n"));
        assert!(s.contains("Connection: close\r\n"));
        assert!(!s.contains("CSeq"));
        assert!(s.contains("Content-Length: 7\r\n\r\nspeed=3"));
    }

    #[test]
    fn http_method_lookup() {
        assert_eq!(Method::http("get"), Some(Method::HttpGet));
        assert_eq!(Method::http("PUT"), Some(Method::HttpPut));
        assert_eq!(Method::http("DESCRIBE"), None);
    }

    #[test]
    fn header_lookup_case_insensitive() {
        let req = RtspRequest::setup("rtsp://cam/x");
        assert_eq!(
            req.get_header("transport"),
            Some(INTERLEAVED_TRANSPORT)
        );
    }
}
