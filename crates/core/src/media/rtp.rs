/// Bytes in the `$` interleaved frame header (RFC 2326 §10.12).
pub const INTERLEAVED_HEADER_LEN: usize = 4;

/// Bytes in the RTP fixed header.
pub const RTP_HEADER_LEN: usize = 12;

/// Interleaved channel carrying video RTP (`interleaved=0-1`).
pub const VIDEO_CHANNEL: u8 = 0;

/// Why an interleaved frame or RTP packet was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("missing '$' magic byte")]
    Magic,
    #[error("length field {declared} does not match {actual} delivered bytes")]
    LengthMismatch { declared: usize, actual: usize },
    #[error("truncated packet ({0} bytes)")]
    Truncated(usize),
    #[error("unsupported RTP version {0}")]
    Version(u8),
    #[error("padding longer than payload")]
    Padding,
}

/// One `$`-framed packet as delivered by the transfer engine.
///
/// ```text
/// +-----+---------+----------------+------------------+
/// | '$' | channel | length (BE 16) | RTP packet       |
/// +-----+---------+----------------+------------------+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterleavedFrame<'a> {
    pub channel: u8,
    pub payload: &'a [u8],
}

impl<'a> InterleavedFrame<'a> {
    /// Parse a whole frame; the length field must match exactly.
    pub fn parse(data: &'a [u8]) -> Result<Self, FrameError> {
        if data.len() < INTERLEAVED_HEADER_LEN {
            return Err(FrameError::Truncated(data.len()));
        }
        if data[0] != b'$' {
            return Err(FrameError::Magic);
        }
        let declared = u16::from_be_bytes([data[2], data[3]]) as usize;
        let actual = data.len() - INTERLEAVED_HEADER_LEN;
        if declared != actual {
            return Err(FrameError::LengthMismatch { declared, actual });
        }
        Ok(Self {
            channel: data[1],
            payload: &data[INTERLEAVED_HEADER_LEN..],
        })
    }
}

/// A received RTP packet (RFC 3550 §5.1).
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |V=2|P|X|  CC   |M|     PT      |       Sequence Number         |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                           Timestamp                           |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                             SSRC                              |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |            CSRC list (CC × 32 bits), extension (if X)         |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
///
/// The CSRC list and header extension are skipped; trailing padding
/// (P bit, count in the last byte) is removed from the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtpPacket<'a> {
    pub marker: bool,
    pub payload_type: u8,
    pub sequence: u16,
    pub timestamp: u32,
    pub ssrc: u32,
    pub payload: &'a [u8],
}

impl<'a> RtpPacket<'a> {
    pub fn parse(data: &'a [u8]) -> Result<Self, FrameError> {
        if data.len() < RTP_HEADER_LEN {
            return Err(FrameError::Truncated(data.len()));
        }

        let version = data[0] >> 6;
        if version != 2 {
            return Err(FrameError::Version(version));
        }
        let padding = data[0] & 0x20 != 0;
        let extension = data[0] & 0x10 != 0;
        let csrc_count = (data[0] & 0x0F) as usize;

        let mut offset = RTP_HEADER_LEN + csrc_count * 4;
        if extension {
            // 16-bit profile id, 16-bit length in 32-bit words.
            let Some(ext) = data.get(offset..offset + 4) else {
                return Err(FrameError::Truncated(data.len()));
            };
            offset += 4 + u16::from_be_bytes([ext[2], ext[3]]) as usize * 4;
        }
        if offset > data.len() {
            return Err(FrameError::Truncated(data.len()));
        }

        let mut end = data.len();
        if padding {
            let pad = data[end - 1] as usize;
            if pad == 0 || pad > end - offset {
                return Err(FrameError::Padding);
            }
            end -= pad;
        }

        Ok(Self {
            marker: data[1] & 0x80 != 0,
            payload_type: data[1] & 0x7F,
            sequence: u16::from_be_bytes([data[2], data[3]]),
            timestamp: u32::from_be_bytes([data[4], data[5], data[6], data[7]]),
            ssrc: u32::from_be_bytes([data[8], data[9], data[10], data[11]]),
            payload: &data[offset..end],
        })
    }
}
