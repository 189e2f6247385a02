use crate::error::{ParseErrorKind, Result, WallError};
use crate::transfer::{ExchangeHandler, Flow};

/// Longest status line plus header block accepted before a blank line.
const MAX_HEAD_LEN: usize = 64 * 1024;

/// Status line and headers of a parsed response (RFC 2326 §7).
///
/// ```text
/// RTSP/1.0 200 OK\r\n
/// CSeq: 2\r\n
/// Session: 66334873;timeout=60\r\n
/// \r\n
/// ```
///
/// Header lookup is case-insensitive per RFC 2326 §4.2.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHead {
    /// `RTSP/1.0` or `HTTP/1.x`.
    pub version: String,
    pub status_code: u16,
    pub reason: String,
    /// Headers as ordered (name, value) pairs, names as received.
    pub headers: Vec<(String, String)>,
}

impl ResponseHead {
    /// Parse `Version SP Code SP Reason`.
    pub fn parse_status_line(line: &str) -> Result<Self> {
        if line.trim().is_empty() {
            return Err(WallError::parse(ParseErrorKind::EmptyResponse));
        }

        let mut parts = line.splitn(3, ' ');
        let version = parts.next().unwrap_or_default();
        let code = parts.next().unwrap_or_default();
        let reason = parts.next().unwrap_or_default();

        if !(version.starts_with("RTSP/") || version.starts_with("HTTP/")) {
            return Err(WallError::parse(ParseErrorKind::InvalidStatusLine));
        }
        let status_code = code
            .parse()
            .map_err(|_| WallError::parse(ParseErrorKind::InvalidStatusLine))?;

        Ok(ResponseHead {
            version: version.to_string(),
            status_code,
            reason: reason.trim().to_string(),
            headers: Vec::new(),
        })
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }

    pub fn is_http(&self) -> bool {
        self.version.starts_with("HTTP/")
    }

    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// `Content-Length` as a byte count, `None` when absent.
    pub fn content_length(&self) -> Result<Option<usize>> {
        self.get_header("Content-Length")
            .map(|v| {
                v.trim()
                    .parse()
                    .map_err(|_| WallError::parse(ParseErrorKind::InvalidContentLength))
            })
            .transpose()
    }

    /// Session identifier without its `;timeout=` parameter (RFC 2326 §12.37).
    pub fn session_id(&self) -> Option<&str> {
        self.get_header("Session")
            .and_then(|v| v.split(';').next())
            .map(str::trim)
            .filter(|id| !id.is_empty())
    }

    pub fn cseq(&self) -> Option<&str> {
        self.get_header("CSeq")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadState {
    StatusLine,
    Headers,
    Body { remaining: usize },
    UntilClose,
}

/// Result of feeding buffered bytes through a [`ResponseReader`].
#[derive(Debug, PartialEq, Eq)]
pub enum Progress {
    /// More bytes are needed.
    Pending,
    /// A full response (head plus body) was consumed.
    Complete(ResponseHead),
}

/// Incremental response parser for one connection.
///
/// Bytes are appended with [`extend`](Self::extend) as they arrive and
/// consumed by [`advance`](Self::advance), which reports each header line,
/// body chunk and interleaved frame to an [`ExchangeHandler`] as soon as it
/// is complete. Bytes past the end of a response stay buffered for the next
/// exchange on the same connection.
#[derive(Debug)]
pub struct ResponseReader {
    buf: Vec<u8>,
    state: ReadState,
    head: Option<ResponseHead>,
    /// Bytes of status line and headers consumed for the current message.
    head_len: usize,
    read_to_close: bool,
}

impl Default for ResponseReader {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseReader {
    pub fn new() -> Self {
        Self {
            buf: Vec::with_capacity(16 * 1024),
            state: ReadState::StatusLine,
            head: None,
            head_len: 0,
            read_to_close: false,
        }
    }

    /// When set, a response without `Content-Length` has a body that runs
    /// until the peer closes (HTTP/1.x with `Connection: close`).
    pub fn set_read_to_close(&mut self, enabled: bool) {
        self.read_to_close = enabled;
    }

    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// No partial message is held.
    pub fn is_idle(&self) -> bool {
        self.state == ReadState::StatusLine && self.head.is_none()
    }

    /// Drop any partial message and buffered bytes.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.state = ReadState::StatusLine;
        self.head = None;
        self.head_len = 0;
    }

    /// Consume as much of the buffer as possible.
    ///
    /// Stops after one complete response so the caller can finish the
    /// exchange before later bytes are interpreted.
    pub fn advance(&mut self, handler: &mut dyn ExchangeHandler) -> Result<Progress> {
        let mut pos = 0;

        let result = loop {
            let avail = &self.buf[pos..];
            match self.state {
                ReadState::StatusLine => {
                    if avail.is_empty() {
                        break Ok(Progress::Pending);
                    }
                    if avail[0] == b'$' {
                        if avail.len() < 4 {
                            break Ok(Progress::Pending);
                        }
                        let len = u16::from_be_bytes([avail[2], avail[3]]) as usize;
                        if avail.len() < 4 + len {
                            break Ok(Progress::Pending);
                        }
                        let frame = &avail[..4 + len];
                        pos += frame.len();
                        if handler.on_interleaved(frame) == Flow::Abort {
                            break Err(WallError::Aborted);
                        }
                        continue;
                    }
                    let Some(end) = find_crlf(avail) else {
                        if avail.len() > MAX_HEAD_LEN {
                            break Err(WallError::parse(ParseErrorKind::MessageTooLarge));
                        }
                        break Ok(Progress::Pending);
                    };
                    let line = String::from_utf8_lossy(&avail[..end]);
                    pos += end + 2;
                    // Blank lines between messages are tolerated.
                    if line.is_empty() {
                        continue;
                    }
                    match ResponseHead::parse_status_line(&line) {
                        Ok(head) => {
                            self.head = Some(head);
                            self.head_len = end + 2;
                            self.state = ReadState::Headers;
                        }
                        Err(e) => break Err(e),
                    }
                }
                ReadState::Headers => {
                    let Some(end) = find_crlf(avail) else {
                        if self.head_len + avail.len() > MAX_HEAD_LEN {
                            break Err(WallError::parse(ParseErrorKind::MessageTooLarge));
                        }
                        break Ok(Progress::Pending);
                    };
                    self.head_len += end + 2;
                    if self.head_len > MAX_HEAD_LEN {
                        break Err(WallError::parse(ParseErrorKind::MessageTooLarge));
                    }
                    let line = String::from_utf8_lossy(&avail[..end]).into_owned();
                    pos += end + 2;

                    let Some(head) = self.head.as_mut() else {
                        break Err(WallError::parse(ParseErrorKind::EmptyResponse));
                    };

                    if line.is_empty() {
                        let length = match head.content_length() {
                            Ok(length) => length,
                            Err(e) => break Err(e),
                        };
                        match length {
                            Some(0) => break Ok(self.complete()),
                            Some(n) => self.state = ReadState::Body { remaining: n },
                            None if self.read_to_close && head.is_http() => {
                                self.state = ReadState::UntilClose
                            }
                            None => break Ok(self.complete()),
                        }
                        continue;
                    }

                    let Some((name, value)) = line.split_once(':') else {
                        break Err(WallError::parse(ParseErrorKind::InvalidHeader));
                    };
                    head.headers
                        .push((name.trim().to_string(), value.trim().to_string()));
                    if handler.on_header(&line) == Flow::Abort {
                        break Err(WallError::Aborted);
                    }
                }
                ReadState::Body { remaining } => {
                    if avail.is_empty() {
                        break Ok(Progress::Pending);
                    }
                    let take = avail.len().min(remaining);
                    pos += take;
                    if handler.on_body(&avail[..take]) == Flow::Abort {
                        break Err(WallError::Aborted);
                    }
                    if take == remaining {
                        break Ok(self.complete());
                    }
                    self.state = ReadState::Body {
                        remaining: remaining - take,
                    };
                }
                ReadState::UntilClose => {
                    if !avail.is_empty() {
                        pos += avail.len();
                        if handler.on_body(avail) == Flow::Abort {
                            break Err(WallError::Aborted);
                        }
                    }
                    break Ok(Progress::Pending);
                }
            }
        };

        self.buf.drain(..pos);
        result
    }

    /// The peer closed the connection.
    ///
    /// Completes a read-to-close body, otherwise the exchange is lost.
    pub fn finish_on_close(&mut self) -> Result<Progress> {
        if self.state == ReadState::UntilClose {
            return Ok(self.complete());
        }
        Err(WallError::Disconnected)
    }

    fn complete(&mut self) -> Progress {
        self.state = ReadState::StatusLine;
        match self.head.take() {
            Some(head) => Progress::Complete(head),
            None => Progress::Pending,
        }
    }
}

fn find_crlf(data: &[u8]) -> Option<usize> {
    data.windows(2).position(|w| w == b"\r\n")
}
