//! Upstream source abstraction and codec metadata

use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Upstream source errors
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("dial failed: {0}")]
    Dial(String),
    #[error("no response within {0:?}")]
    Timeout(Duration),
    #[error("stream negotiation failed: {0}")]
    Negotiation(String),
    #[error("read failed: {0}")]
    Read(String),
    #[error("upstream closed the stream")]
    Eof,
    #[error("close failed: {0}")]
    Close(String),
    #[error("invalid H.264 parameters: {0}")]
    InvalidParameters(String),
}

/// Cached H.264 parameter sets, one SPS and one PPS NAL unit without start codes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct H264Parameters {
    pub sps: Bytes,
    pub pps: Bytes,
}

impl H264Parameters {
    pub fn new(sps: impl Into<Bytes>, pps: impl Into<Bytes>) -> Self {
        Self {
            sps: sps.into(),
            pps: pps.into(),
        }
    }

    /// Extract the first SPS and PPS from an `AVCDecoderConfigurationRecord`
    /// (ISO/IEC 14496-15 `avcC` box payload).
    pub fn from_avc_decoder_config(record: &[u8]) -> Result<Self, SourceError> {
        let truncated = || SourceError::InvalidParameters("truncated avcC record".to_string());

        if record.len() < 6 {
            return Err(truncated());
        }
        if record[0] != 1 {
            return Err(SourceError::InvalidParameters(format!(
                "unsupported avcC version {}",
                record[0]
            )));
        }

        let mut pos = 5;
        let sps_count = (record[pos] & 0x1F) as usize;
        pos += 1;
        let mut sps = None;
        for _ in 0..sps_count {
            let nal = read_u16_prefixed(record, &mut pos).ok_or_else(truncated)?;
            sps.get_or_insert(nal);
        }

        let pps_count = *record.get(pos).ok_or_else(truncated)? as usize;
        pos += 1;
        let mut pps = None;
        for _ in 0..pps_count {
            let nal = read_u16_prefixed(record, &mut pos).ok_or_else(truncated)?;
            pps.get_or_insert(nal);
        }

        match (sps, pps) {
            (Some(sps), Some(pps)) => Ok(Self::new(
                Bytes::copy_from_slice(sps),
                Bytes::copy_from_slice(pps),
            )),
            _ => Err(SourceError::InvalidParameters(
                "avcC record has no SPS or no PPS".to_string(),
            )),
        }
    }
}

fn read_u16_prefixed<'a>(buf: &'a [u8], pos: &mut usize) -> Option<&'a [u8]> {
    let len_bytes = buf.get(*pos..*pos + 2)?;
    let len = u16::from_be_bytes([len_bytes[0], len_bytes[1]]) as usize;
    let start = *pos + 2;
    let nal = buf.get(start..start + len)?;
    *pos = start + len;
    Some(nal)
}

/// Codec metadata for one declared upstream stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamCodec {
    /// H.264 video; parameters are `None` when the SDP carried no
    /// `sprop-parameter-sets` and they only arrive in-band.
    H264 { parameters: Option<H264Parameters> },
    /// Anything else, kept for logging only
    Other { media: String, encoding: String },
}

impl fmt::Display for StreamCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamCodec::H264 { .. } => write!(f, "H264"),
            StreamCodec::Other { media, encoding } => write!(f, "{}/{}", media, encoding),
        }
    }
}

/// One upstream video frame as delivered by the depacketizer
#[derive(Debug, Clone)]
pub struct VideoPacket {
    /// Index of the declared stream this packet belongs to
    pub stream_index: usize,
    /// AVC payload: NAL units each preceded by a 4-byte big-endian length
    pub data: Bytes,
    pub is_keyframe: bool,
    /// Presentation time relative to the start of the connection
    pub timestamp: Duration,
    /// Parameter sets announced alongside this packet, if they changed
    pub new_parameters: Option<H264Parameters>,
}

/// Timeouts applied while talking to the upstream source
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectOptions {
    /// Bound on DESCRIBE/SETUP/PLAY
    pub rtsp_timeout: Option<Duration>,
    /// Bound on the wait for each packet
    pub rtp_timeout: Option<Duration>,
}

/// Dials upstream sources
#[async_trait]
pub trait SourceConnector: Send + Sync {
    /// Open a playing session for `url`
    async fn connect(
        &self,
        url: &str,
        options: &ConnectOptions,
    ) -> Result<Box<dyn SourceSession>, SourceError>;
}

/// A live upstream connection
#[async_trait]
pub trait SourceSession: Send {
    /// Declared streams, in SDP order
    fn streams(&self) -> &[StreamCodec];

    /// Wait for the next video packet
    async fn read_packet(&mut self) -> Result<VideoPacket, SourceError>;

    /// Close the connection
    async fn close(self: Box<Self>) -> Result<(), SourceError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn avcc(sps: &[&[u8]], pps: &[&[u8]]) -> Vec<u8> {
        let mut out = vec![1, 0x42, 0xC0, 0x1F, 0xFF, 0xE0 | sps.len() as u8];
        for nal in sps {
            out.extend_from_slice(&(nal.len() as u16).to_be_bytes());
            out.extend_from_slice(nal);
        }
        out.push(pps.len() as u8);
        for nal in pps {
            out.extend_from_slice(&(nal.len() as u16).to_be_bytes());
            out.extend_from_slice(nal);
        }
        out
    }

    #[test]
    fn test_parse_avcc() {
        let record = avcc(&[&[0x67, 0x42, 0x00, 0x1F]], &[&[0x68, 0xCE, 0x38, 0x80]]);
        let params = H264Parameters::from_avc_decoder_config(&record).unwrap();
        assert_eq!(&params.sps[..], &[0x67, 0x42, 0x00, 0x1F]);
        assert_eq!(&params.pps[..], &[0x68, 0xCE, 0x38, 0x80]);
    }

    #[test]
    fn test_parse_avcc_takes_first_of_many() {
        let record = avcc(&[&[0x67, 0x01], &[0x67, 0x02]], &[&[0x68, 0x01], &[0x68, 0x02]]);
        let params = H264Parameters::from_avc_decoder_config(&record).unwrap();
        assert_eq!(&params.sps[..], &[0x67, 0x01]);
        assert_eq!(&params.pps[..], &[0x68, 0x01]);
    }

    #[test]
    fn test_parse_avcc_rejects_truncated() {
        let mut record = avcc(&[&[0x67, 0x42, 0x00, 0x1F]], &[&[0x68, 0xCE]]);
        record.truncate(record.len() - 1);
        assert!(matches!(
            H264Parameters::from_avc_decoder_config(&record),
            Err(SourceError::InvalidParameters(_))
        ));
        assert!(H264Parameters::from_avc_decoder_config(&[1, 2]).is_err());
    }

    #[test]
    fn test_parse_avcc_requires_both_sets() {
        let record = avcc(&[&[0x67, 0x42]], &[]);
        assert!(H264Parameters::from_avc_decoder_config(&record).is_err());
    }

    #[test]
    fn test_stream_codec_display() {
        assert_eq!(StreamCodec::H264 { parameters: None }.to_string(), "H264");
        let other = StreamCodec::Other {
            media: "audio".into(),
            encoding: "mpeg4-generic".into(),
        };
        assert_eq!(other.to_string(), "audio/mpeg4-generic");
    }
}
