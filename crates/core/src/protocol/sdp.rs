//! SDP (Session Description Protocol) parsing (RFC 4566 / RFC 8866).
//!
//! Only the video media section matters to the wall:
//!
//! ```text
//! v=0
//! o=- 1 1 IN IP4 192.168.1.20
//! s=Camera
//! t=0 0
//! a=control:*                                   ← session level, ignored
//! m=video 0 RTP/AVP 96                          ← video section starts
//! a=rtpmap:96 H264/90000                        ← codec/clock rate
//! a=fmtp:96 packetization-mode=1;sprop-parameter-sets=Z0IAH5W...,aM48gA==
//! a=control:trackID=1                           ← what SETUP targets
//! m=audio 0 RTP/AVP 8                           ← any other m= ends it
//! a=control:trackID=2
//! ```

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

/// Attributes of the `m=video` section.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MediaDescription {
    pub payload_type: Option<u8>,
    /// Raw `a=control:` value; the last one in the section wins.
    pub control: Option<String>,
    /// Encoding name from `a=rtpmap`, e.g. `H264`.
    pub encoding: Option<String>,
    pub clock_rate: Option<u32>,
    /// Decoded `sprop-parameter-sets` (SPS, PPS) from `a=fmtp`.
    pub parameter_sets: Vec<Vec<u8>>,
}

/// The parts of a presentation description the wall uses.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionDescription {
    pub session_name: Option<String>,
    pub video: Option<MediaDescription>,
}

impl SessionDescription {
    /// Parse an SDP body. Unknown or malformed lines are skipped.
    pub fn parse(body: &[u8]) -> Self {
        let mut sdp = SessionDescription::default();
        let mut in_video = false;

        for line in lines(body) {
            let Ok(line) = std::str::from_utf8(line) else {
                tracing::trace!("skipping non-UTF-8 SDP line");
                continue;
            };

            if let Some(media) = line.strip_prefix("m=") {
                in_video = media.starts_with("video ");
                if in_video {
                    let video = sdp.video.get_or_insert_with(MediaDescription::default);
                    video.payload_type = media.split_whitespace().nth(3).and_then(|pt| pt.parse().ok());
                }
                continue;
            }

            if let Some(name) = line.strip_prefix("s=") {
                sdp.session_name.get_or_insert_with(|| name.trim().to_string());
                continue;
            }

            if !in_video {
                continue;
            }
            let Some(video) = sdp.video.as_mut() else {
                continue;
            };

            if let Some(control) = line.strip_prefix("a=control:") {
                video.control = Some(control.trim().to_string());
            } else if let Some(rtpmap) = line.strip_prefix("a=rtpmap:") {
                parse_rtpmap(video, rtpmap);
            } else if let Some(fmtp) = line.strip_prefix("a=fmtp:") {
                parse_fmtp(video, fmtp);
            }
        }

        tracing::debug!(
            control = sdp.video.as_ref().and_then(|v| v.control.as_deref()),
            encoding = sdp.video.as_ref().and_then(|v| v.encoding.as_deref()),
            "parsed SDP"
        );
        sdp
    }

    /// Control attribute of the video section, if any.
    pub fn video_control(&self) -> Option<&str> {
        self.video.as_ref()?.control.as_deref()
    }
}

/// Split on `\n`, dropping a trailing `\r`. Empty lines are skipped.
fn lines(body: &[u8]) -> impl Iterator<Item = &[u8]> {
    body.split(|&b| b == b'\n')
        .map(|line| line.strip_suffix(b"\r").unwrap_or(line))
        .filter(|line| !line.is_empty())
}

/// `96 H264/90000`
fn parse_rtpmap(video: &mut MediaDescription, value: &str) {
    let Some((_, encoding)) = value.split_once(' ') else {
        return;
    };
    let mut parts = encoding.trim().split('/');
    video.encoding = parts.next().map(str::to_string);
    video.clock_rate = parts.next().and_then(|rate| rate.parse().ok());
}

/// `96 packetization-mode=1;profile-level-id=42001f;sprop-parameter-sets=Z0IA,aM4=`
fn parse_fmtp(video: &mut MediaDescription, value: &str) {
    let Some((_, params)) = value.split_once(' ') else {
        return;
    };
    for param in params.split(';') {
        let Some((key, sets)) = param.trim().split_once('=') else {
            continue;
        };
        if !key.eq_ignore_ascii_case("sprop-parameter-sets") {
            continue;
        }
        video.parameter_sets = sets
            .split(',')
            .filter(|set| !set.is_empty())
            .filter_map(|set| match STANDARD.decode(set) {
                Ok(bytes) => Some(bytes),
                Err(e) => {
                    tracing::debug!(error = %e, "undecodable sprop-parameter-set");
                    None
                }
            })
            .collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CAMERA_SDP: &str = "v=0\r\n\
        o=- 1 1 IN IP4 192.168.1.20\r\n\
        s=Front Door\r\n\
        t=0 0\r\n\
        a=control:*\r\n\
        m=video 0 RTP/AVP 96\r\n\
        a=rtpmap:96 H264/90000\r\n\
        a=fmtp:96 packetization-mode=1;sprop-parameter-sets=Z0IAH5WoFAFuQA==,aM48gA==\r\n\
        a=control:trackID=1\r\n\
        m=audio 0 RTP/AVP 8\r\n\
        a=control:trackID=2\r\n";

    #[test]
    fn parses_video_section() {
        let sdp = SessionDescription::parse(CAMERA_SDP.as_bytes());
        assert_eq!(sdp.session_name.as_deref(), Some("Front Door"));
        let video = sdp.video.as_ref().unwrap();
        assert_eq!(video.payload_type, Some(96));
        assert_eq!(video.encoding.as_deref(), Some("H264"));
        assert_eq!(video.clock_rate, Some(90000));
        assert_eq!(sdp.video_control(), Some("trackID=1"));
    }

    #[test]
    fn decodes_parameter_sets() {
        let sdp = SessionDescription::parse(CAMERA_SDP.as_bytes());
        let sets = &sdp.video.unwrap().parameter_sets;
        assert_eq!(sets.len(), 2);
        assert_eq!(sets[0][0] & 0x1F, 7, "first set is an SPS");
        assert_eq!(sets[1], vec![0x68, 0xCE, 0x3C, 0x80]);
    }

    #[test]
    fn control_outside_video_is_ignored() {
        let sdp = SessionDescription::parse(b"v=0\r\na=control:*\r\nm=audio 0 RTP/AVP 0\r\na=control:a1\r\n");
        assert_eq!(sdp.video_control(), None);
    }

    #[test]
    fn last_control_in_video_wins() {
        let body = b"m=video 0 RTP/AVP 96\r\na=control:first\r\na=control:second\r\n";
        let sdp = SessionDescription::parse(body);
        assert_eq!(sdp.video_control(), Some("second"));
    }

    #[test]
    fn accepts_bare_newlines() {
        let body = b"v=0\nm=video 0 RTP/AVP 97\na=control:track0\n";
        let sdp = SessionDescription::parse(body);
        assert_eq!(sdp.video_control(), Some("track0"));
        assert_eq!(sdp.video.unwrap().payload_type, Some(97));
    }

    #[test]
    fn empty_body() {
        assert_eq!(SessionDescription::parse(b""), SessionDescription::default());
    }
}
