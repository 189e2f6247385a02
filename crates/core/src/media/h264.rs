use super::rtp::{FrameError, InterleavedFrame, RtpPacket, VIDEO_CHANNEL};
use crate::render::{Renderer, TargetId};

/// Annex-B start code written before every NAL unit.
pub const START_CODE: [u8; 4] = [0x00, 0x00, 0x00, 0x01];

/// RTP payload structure, from the type field of the first payload byte
/// (RFC 6184 §5.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NalKind {
    /// 1-23: one complete NAL unit.
    Single(u8),
    StapA,
    StapB,
    Mtap16,
    Mtap24,
    FuA,
    FuB,
    /// 0, 30, 31.
    Reserved(u8),
}

impl NalKind {
    pub fn from_byte(byte: u8) -> Self {
        match byte & 0x1F {
            t @ 1..=23 => Self::Single(t),
            24 => Self::StapA,
            25 => Self::StapB,
            26 => Self::Mtap16,
            27 => Self::Mtap24,
            28 => Self::FuA,
            29 => Self::FuB,
            t => Self::Reserved(t),
        }
    }
}

/// Per-camera depacketizer counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DepacketizerStats {
    /// Buffers handed to the renderer.
    pub submitted: u64,
    /// Packets dropped because the renderer had no free buffer.
    pub no_buffer: u64,
    /// Packets dropped because the NAL unit exceeded buffer capacity.
    pub oversized: u64,
    /// Aggregation packets and reserved types.
    pub unsupported: u64,
    /// Fragments discarded after a sequence gap or a missing start.
    pub lost_fragments: u64,
    /// Frames on a channel other than video RTP.
    pub other_channel: u64,
    pub malformed: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fragment {
    Idle,
    /// Inside a fragmented NAL unit, expecting this sequence number next.
    InProgress { next: u16 },
    /// The current NAL unit lost a fragment; skip to the next start.
    Discarding,
}

/// Turns interleaved RTP/H.264 frames into an Annex-B elementary stream
/// (RFC 6184).
///
/// Output is written straight into renderer buffers, one buffer per RTP
/// packet:
///
/// ```text
/// single NAL (1-23)    00 00 00 01 | NAL bytes
/// FU start (S=1)       00 00 00 01 | (indicator & 0xE0) | (fu & 0x1F) | data
/// FU continuation      data
/// ```
///
/// FU-B start fragments drop their 2-byte DON. Fragments are submitted as
/// they arrive, so a NAL unit spans several buffers and needs no
/// reassembly memory here. Aggregation packets (STAP, MTAP) and reserved
/// types are counted and dropped.
///
/// Sequence numbers are tracked inside a fragmented NAL unit: after a gap,
/// or a continuation with no start, the rest of that unit is discarded up
/// to the next start fragment. Whatever was already submitted stays in the
/// stream, so the decoder may see a truncated NAL unit followed by the next
/// start code, but never data from two units spliced together.
#[derive(Debug)]
pub struct H264Depacketizer {
    fragment: Fragment,
    stats: DepacketizerStats,
}

impl Default for H264Depacketizer {
    fn default() -> Self {
        Self::new()
    }
}

impl H264Depacketizer {
    pub fn new() -> Self {
        Self {
            fragment: Fragment::Idle,
            stats: DepacketizerStats::default(),
        }
    }

    pub fn stats(&self) -> DepacketizerStats {
        self.stats
    }

    /// Forget any partial NAL unit, e.g. after a reconnect.
    pub fn reset(&mut self) {
        self.fragment = Fragment::Idle;
    }

    /// Submit SDP `sprop-parameter-sets` (SPS, PPS) as Annex-B NAL units.
    pub fn push_parameter_sets(
        &mut self,
        sets: &[Vec<u8>],
        renderer: &mut dyn Renderer,
        target: TargetId,
    ) {
        for set in sets.iter().filter(|set| !set.is_empty()) {
            self.submit(renderer, target, &[START_CODE.as_slice(), set.as_slice()]);
        }
    }

    /// Process one whole interleaved frame, `$` header included.
    pub fn push(&mut self, frame: &[u8], renderer: &mut dyn Renderer, target: TargetId) {
        let packet = match self.parse(frame) {
            Ok(Some(packet)) => packet,
            Ok(None) => return,
            Err(e) => {
                tracing::warn!(%target, error = %e, "dropping malformed RTP frame");
                self.stats.malformed += 1;
                return;
            }
        };

        let payload = packet.payload;
        let Some(&first) = payload.first() else {
            self.stats.malformed += 1;
            return;
        };

        match NalKind::from_byte(first) {
            NalKind::Single(nal_type) => {
                if let Fragment::InProgress { .. } = self.fragment {
                    tracing::debug!(%target, "fragmented NAL unit ended without end fragment");
                    self.fragment = Fragment::Idle;
                }
                tracing::trace!(%target, nal_type, len = payload.len(), "single NAL unit");
                self.submit(renderer, target, &[START_CODE.as_slice(), payload]);
            }
            kind @ (NalKind::FuA | NalKind::FuB) => {
                self.push_fragment(kind, packet.sequence, payload, renderer, target);
            }
            kind @ (NalKind::StapA | NalKind::StapB | NalKind::Mtap16 | NalKind::Mtap24) => {
                tracing::debug!(%target, ?kind, "unsupported aggregation packet");
                self.stats.unsupported += 1;
            }
            NalKind::Reserved(nal_type) => {
                tracing::debug!(%target, nal_type, "reserved NAL type");
                self.stats.unsupported += 1;
            }
        }
    }

    /// `Ok(None)` for frames on other channels.
    fn parse<'a>(&mut self, frame: &'a [u8]) -> Result<Option<RtpPacket<'a>>, FrameError> {
        let frame = InterleavedFrame::parse(frame)?;
        if frame.channel != VIDEO_CHANNEL {
            self.stats.other_channel += 1;
            return Ok(None);
        }
        RtpPacket::parse(frame.payload).map(Some)
    }

    fn push_fragment(
        &mut self,
        kind: NalKind,
        sequence: u16,
        payload: &[u8],
        renderer: &mut dyn Renderer,
        target: TargetId,
    ) {
        if payload.len() < 2 {
            self.stats.malformed += 1;
            return;
        }
        let indicator = payload[0];
        let header = payload[1];
        let start = header & 0x80 != 0;
        let end = header & 0x40 != 0;
        let after = |ok: bool| match (ok, end) {
            (false, _) => Fragment::Discarding,
            (true, true) => Fragment::Idle,
            (true, false) => Fragment::InProgress {
                next: sequence.wrapping_add(1),
            },
        };

        if start {
            let mut data = &payload[2..];
            if kind == NalKind::FuB {
                let Some(rest) = data.get(2..) else {
                    self.stats.malformed += 1;
                    return;
                };
                data = rest;
            }
            let nal_header = (indicator & 0xE0) | (header & 0x1F);
            let ok = self.submit(
                renderer,
                target,
                &[START_CODE.as_slice(), std::slice::from_ref(&nal_header), data],
            );
            self.fragment = after(ok);
            return;
        }

        match self.fragment {
            Fragment::InProgress { next } if next == sequence => {
                let ok = self.submit(renderer, target, &[&payload[2..]]);
                self.fragment = after(ok);
            }
            Fragment::InProgress { next } => {
                tracing::debug!(%target, expected = next, got = sequence, "sequence gap inside fragmented NAL unit");
                self.stats.lost_fragments += 1;
                self.fragment = if end { Fragment::Idle } else { Fragment::Discarding };
            }
            Fragment::Idle | Fragment::Discarding => {
                self.stats.lost_fragments += 1;
                if end {
                    self.fragment = Fragment::Idle;
                }
            }
        }
    }

    /// Copy `parts` into one renderer buffer and submit it.
    fn submit(&mut self, renderer: &mut dyn Renderer, target: TargetId, parts: &[&[u8]]) -> bool {
        let Some(mut buffer) = renderer.acquire_buffer(target) else {
            tracing::trace!(%target, "no free renderer buffer, packet dropped");
            self.stats.no_buffer += 1;
            return false;
        };

        for part in parts {
            if let Err(e) = buffer.extend_from_slice(part) {
                tracing::warn!(%target, error = %e, "NAL data exceeds buffer capacity");
                renderer.release_buffer(target, buffer);
                self.stats.oversized += 1;
                return false;
            }
        }

        renderer.submit_buffer(target, buffer, false);
        self.stats.submitted += 1;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::testing::RecordingRenderer;

    const TARGET: TargetId = TargetId(0);

    fn frame(channel: u8, seq: u16, payload: &[u8]) -> Vec<u8> {
        let mut rtp = vec![0x80, 96];
        rtp.extend_from_slice(&seq.to_be_bytes());
        rtp.extend_from_slice(&[0, 0, 0, 0, 0, 0, 0, 1]);
        rtp.extend_from_slice(payload);

        let mut out = vec![b'$', channel];
        out.extend_from_slice(&(rtp.len() as u16).to_be_bytes());
        out.extend_from_slice(&rtp);
        out
    }

    #[test]
    fn classifies_nal_types() {
        assert_eq!(NalKind::from_byte(0x65), NalKind::Single(5));
        assert_eq!(NalKind::from_byte(0x78), NalKind::StapA);
        assert_eq!(NalKind::from_byte(0x7C), NalKind::FuA);
        assert_eq!(NalKind::from_byte(0x7D), NalKind::FuB);
        assert_eq!(NalKind::from_byte(0x00), NalKind::Reserved(0));
        assert_eq!(NalKind::from_byte(0x1F), NalKind::Reserved(31));
    }

    #[test]
    fn single_nal_gets_start_code() {
        let mut renderer = RecordingRenderer::default();
        let mut depay = H264Depacketizer::new();

        depay.push(&frame(0, 1, &[0x65, 0xAA, 0xBB]), &mut renderer, TARGET);
        assert_eq!(renderer.submitted.len(), 1);
        assert_eq!(renderer.submitted[0].1, vec![0, 0, 0, 1, 0x65, 0xAA, 0xBB]);
        assert!(!renderer.submitted[0].2, "never end-of-stream");
    }

    #[test]
    fn fu_a_reconstructs_nal_unit() {
        let mut renderer = RecordingRenderer::default();
        let mut depay = H264Depacketizer::new();
        let indicator = 0x7C; // F=0 NRI=3 type=28

        depay.push(&frame(0, 10, &[indicator, 0x85, 1, 2, 3]), &mut renderer, TARGET);
        depay.push(&frame(0, 11, &[indicator, 0x05, 4, 5]), &mut renderer, TARGET);
        depay.push(&frame(0, 12, &[indicator, 0x45, 6]), &mut renderer, TARGET);

        assert_eq!(renderer.submitted.len(), 3, "fragments are submitted eagerly");
        assert_eq!(
            renderer.stream(TARGET),
            vec![0, 0, 0, 1, 0x65, 1, 2, 3, 4, 5, 6]
        );
    }

    #[test]
    fn fu_b_start_skips_don() {
        let mut renderer = RecordingRenderer::default();
        let mut depay = H264Depacketizer::new();

        depay.push(&frame(0, 1, &[0x7D, 0xC1, 0x00, 0x07, 9, 9]), &mut renderer, TARGET);
        assert_eq!(renderer.stream(TARGET), vec![0, 0, 0, 1, 0x61, 9, 9]);
    }

    #[test]
    fn gap_discards_rest_of_fragmented_unit() {
        let mut renderer = RecordingRenderer::default();
        let mut depay = H264Depacketizer::new();

        depay.push(&frame(0, 1, &[0x7C, 0x85, 1]), &mut renderer, TARGET);
        // seq 2 lost
        depay.push(&frame(0, 3, &[0x7C, 0x05, 3]), &mut renderer, TARGET);
        depay.push(&frame(0, 4, &[0x7C, 0x45, 4]), &mut renderer, TARGET);
        depay.push(&frame(0, 5, &[0x41, 7]), &mut renderer, TARGET);

        assert_eq!(renderer.stream(TARGET), vec![0, 0, 0, 1, 0x65, 1, 0, 0, 0, 1, 0x41, 7]);
        assert_eq!(depay.stats().lost_fragments, 2);
    }

    #[test]
    fn truncated_unit_stays_in_stream() {
        let mut renderer = RecordingRenderer::default();
        let mut depay = H264Depacketizer::new();

        depay.push(&frame(0, 1, &[0x7C, 0x85, 1, 2]), &mut renderer, TARGET);
        // seq 2 and the end fragment lost, next unit starts at seq 3
        depay.push(&frame(0, 3, &[0x7C, 0xC1, 9]), &mut renderer, TARGET);

        assert_eq!(
            renderer.stream(TARGET),
            vec![0, 0, 0, 1, 0x65, 1, 2, 0, 0, 0, 1, 0x61, 9]
        );
        assert_eq!(renderer.submitted.len(), 2);
    }

    #[test]
    fn orphan_continuation_is_dropped() {
        let mut renderer = RecordingRenderer::default();
        let mut depay = H264Depacketizer::new();

        depay.push(&frame(0, 7, &[0x7C, 0x45, 1, 2]), &mut renderer, TARGET);
        assert!(renderer.submitted.is_empty());

        depay.push(&frame(0, 8, &[0x7C, 0x85, 3]), &mut renderer, TARGET);
        assert_eq!(renderer.stream(TARGET), vec![0, 0, 0, 1, 0x65, 3]);
    }

    #[test]
    fn sequence_wraps() {
        let mut renderer = RecordingRenderer::default();
        let mut depay = H264Depacketizer::new();

        depay.push(&frame(0, u16::MAX, &[0x7C, 0x85, 1]), &mut renderer, TARGET);
        depay.push(&frame(0, 0, &[0x7C, 0x45, 2]), &mut renderer, TARGET);
        assert_eq!(renderer.stream(TARGET), vec![0, 0, 0, 1, 0x65, 1, 2]);
    }

    #[test]
    fn unsupported_and_foreign_frames_are_dropped() {
        let mut renderer = RecordingRenderer::default();
        let mut depay = H264Depacketizer::new();

        depay.push(&frame(0, 1, &[0x78, 0, 2, 0x67, 0x42]), &mut renderer, TARGET);
        depay.push(&frame(0, 2, &[0x1E, 1]), &mut renderer, TARGET);
        depay.push(&frame(1, 3, &[0x80, 0xC8]), &mut renderer, TARGET);
        depay.push(b"$\x00\x00\x09abc", &mut renderer, TARGET);

        assert!(renderer.submitted.is_empty());
        let stats = depay.stats();
        assert_eq!(stats.unsupported, 2);
        assert_eq!(stats.other_channel, 1);
        assert_eq!(stats.malformed, 1);
    }

    #[test]
    fn no_buffer_skips_silently() {
        let mut renderer = RecordingRenderer {
            available: Some(0),
            ..Default::default()
        };
        let mut depay = H264Depacketizer::new();

        depay.push(&frame(0, 1, &[0x65, 1]), &mut renderer, TARGET);
        assert!(renderer.submitted.is_empty());
        assert_eq!(depay.stats().no_buffer, 1);
    }

    #[test]
    fn oversized_nal_releases_buffer() {
        let mut renderer = RecordingRenderer {
            buffer_size: 6,
            ..Default::default()
        };
        let mut depay = H264Depacketizer::new();

        depay.push(&frame(0, 1, &[0x65, 1, 2, 3]), &mut renderer, TARGET);
        assert!(renderer.submitted.is_empty());
        assert_eq!(renderer.released, 1);
        assert_eq!(depay.stats().oversized, 1);
    }

    #[test]
    fn parameter_sets_prefixed() {
        let mut renderer = RecordingRenderer::default();
        let mut depay = H264Depacketizer::new();
        depay.push_parameter_sets(&[vec![0x67, 0x42], vec![0x68, 0xCE]], &mut renderer, TARGET);
        assert_eq!(
            renderer.stream(TARGET),
            vec![0, 0, 0, 1, 0x67, 0x42, 0, 0, 0, 1, 0x68, 0xCE]
        );
    }
}
