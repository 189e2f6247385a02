//! RTP reception and H.264 depacketization.
//!
//! Interleaved frames arrive from the transfer engine as
//! `$ | channel | length | RTP packet`. [`rtp`] validates the framing and
//! the RTP fixed header; [`h264`] turns payloads into an Annex-B
//! elementary stream in renderer buffers.
//!
//! | Payload | RFC | Status |
//! |---------|-----|--------|
//! | H.264 single NAL, FU-A, FU-B | [RFC 6184](https://tools.ietf.org/html/rfc6184) | Implemented |
//! | H.264 STAP-A/B, MTAP16/24 | RFC 6184 §5.7 | Dropped (logged) |

pub mod h264;
pub mod rtp;

pub use h264::{DepacketizerStats, H264Depacketizer, NalKind};
pub use rtp::{FrameError, InterleavedFrame, RtpPacket};
