//! AVC to Annex B repacketization
//!
//! The RTSP depacketizer hands out NAL units prefixed with a 4-byte
//! length. `TrackLocalStaticSample` wants start-code delimited data
//! instead, and every keyframe must carry SPS/PPS so a viewer joining
//! mid-stream can start decoding there.

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

use super::source::{H264Parameters, VideoPacket};

/// Annex B NAL unit start code
pub const ANNEXB_START_CODE: [u8; 4] = [0x00, 0x00, 0x00, 0x01];

const LENGTH_PREFIX_SIZE: usize = 4;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RepacketizeError {
    #[error("packet of {0} bytes is shorter than the length prefix")]
    Truncated(usize),
}

/// Convert one packet into a self-contained Annex B sample
///
/// Keyframes become `start code + SPS + start code + PPS + start code + payload`
/// when parameter sets are known; everything else is the payload with its
/// length prefix removed. Output depends only on the inputs.
pub fn repacketize(
    packet: &VideoPacket,
    parameters: Option<&H264Parameters>,
) -> Result<Bytes, RepacketizeError> {
    let payload = strip_length_prefix(&packet.data)?;

    let Some(params) = parameters.filter(|_| packet.is_keyframe) else {
        return Ok(payload);
    };

    let mut out = BytesMut::with_capacity(
        3 * ANNEXB_START_CODE.len() + params.sps.len() + params.pps.len() + payload.len(),
    );
    out.put_slice(&ANNEXB_START_CODE);
    out.put_slice(&params.sps);
    out.put_slice(&ANNEXB_START_CODE);
    out.put_slice(&params.pps);
    out.put_slice(&ANNEXB_START_CODE);
    out.put_slice(&payload);
    Ok(out.freeze())
}

/// Drop the leading length prefix
///
/// If the first NAL unit does not fill the packet and the rest is itself a
/// well-formed length-prefixed sequence, the following NAL units are joined
/// with start codes. Otherwise the remainder is returned untouched.
fn strip_length_prefix(data: &Bytes) -> Result<Bytes, RepacketizeError> {
    if data.len() < LENGTH_PREFIX_SIZE {
        return Err(RepacketizeError::Truncated(data.len()));
    }

    let body = data.slice(LENGTH_PREFIX_SIZE..);
    let first_len = read_length(data, 0);
    if first_len == 0 || first_len >= body.len() {
        return Ok(body);
    }

    let Some(rest) = split_nal_units(&body[first_len..]) else {
        return Ok(body);
    };

    let extra: usize = rest.iter().map(|nal| nal.len() + ANNEXB_START_CODE.len()).sum();
    let mut out = BytesMut::with_capacity(first_len + extra);
    out.put_slice(&body[..first_len]);
    for nal in rest {
        out.put_slice(&ANNEXB_START_CODE);
        out.put_slice(nal);
    }
    Ok(out.freeze())
}

fn read_length(buf: &[u8], pos: usize) -> usize {
    u32::from_be_bytes([buf[pos], buf[pos + 1], buf[pos + 2], buf[pos + 3]]) as usize
}

/// Split a length-prefixed sequence, `None` if it is malformed
fn split_nal_units(mut buf: &[u8]) -> Option<Vec<&[u8]>> {
    let mut nals = Vec::new();
    while !buf.is_empty() {
        if buf.len() < LENGTH_PREFIX_SIZE {
            return None;
        }
        let len = read_length(buf, 0);
        let end = LENGTH_PREFIX_SIZE.checked_add(len)?;
        if len == 0 || end > buf.len() {
            return None;
        }
        nals.push(&buf[LENGTH_PREFIX_SIZE..end]);
        buf = &buf[end..];
    }
    Some(nals)
}
