//! RTSP client protocol (RFC 2326) plus the minimal HTTP needed for PTZ.
//!
//! This module handles the text side of the camera conversation: building
//! requests, incrementally parsing responses (with `$`-interleaved RTP
//! frames mixed in), parsing SDP and resolving control URIs.
//!
//! ## Session sequence
//!
//! ```text
//! DESCRIBE rtsp://camera/stream RTSP/1.0     → 200 OK + SDP (Content-Length: n)
//! SETUP    <control> RTSP/1.0                → 200 OK + Session: <id>
//!          Transport: RTP/AVP/TCP;unicast;interleaved=0-1
//! PLAY     <control> RTSP/1.0                → 200 OK
//!          Range: 0.000-
//! (receive)                                  ← $ 0x00 <len> <RTP packet> ...
//! ```
//!
//! Interleaved frames (RFC 2326 §10.12) share the TCP connection with
//! responses:
//!
//! ```text
//! +-----+---------+----------------+------------------+
//! | '$' | channel | length (BE 16) | RTP packet       |
//! +-----+---------+----------------+------------------+
//! ```

pub mod request;
pub mod response;
pub mod sdp;
pub mod uri;

pub use request::{Method, RtspRequest};
pub use response::{Progress, ResponseHead, ResponseReader};
pub use sdp::{MediaDescription, SessionDescription};
