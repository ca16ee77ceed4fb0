//! Frame codec for the G3 RPC channel.
//!
//! Wire layout, fixed six-byte header followed by the payload:
//!
//! | offset | size | meaning                          |
//! |--------|------|----------------------------------|
//! | 0      | 1    | frame kind                       |
//! | 1      | 1    | method                           |
//! | 2      | 4    | payload length, big endian       |
//! | 6      | n    | field-tagged payload (see wire)  |
//!
//! Frame kinds: `0x01` request, `0x02` response, `0x03` stream item,
//! `0x04` error (payload is a UTF-8 message). Methods: `0x01` GetInstances,
//! `0x02` GetRevision, `0x03` Subscribe.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use gridpanel_error::PanelError;
use tokio_util::codec::{Decoder, Encoder};

pub const FRAME_HEADER_SIZE: usize = 6;
/// Upper bound on a single payload; anything larger is a malformed frame.
pub const MAX_FRAME_PAYLOAD: usize = 1 << 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameKind {
    Request = 0x01,
    Response = 0x02,
    StreamItem = 0x03,
    Error = 0x04,
}

impl TryFrom<u8> for FrameKind {
    type Error = PanelError;

    fn try_from(raw: u8) -> Result<Self, PanelError> {
        match raw {
            0x01 => Ok(FrameKind::Request),
            0x02 => Ok(FrameKind::Response),
            0x03 => Ok(FrameKind::StreamItem),
            0x04 => Ok(FrameKind::Error),
            other => Err(PanelError::Codec(format!("unknown frame kind 0x{other:02x}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RpcMethod {
    GetInstances = 0x01,
    GetRevision = 0x02,
    Subscribe = 0x03,
}

impl TryFrom<u8> for RpcMethod {
    type Error = PanelError;

    fn try_from(raw: u8) -> Result<Self, PanelError> {
        match raw {
            0x01 => Ok(RpcMethod::GetInstances),
            0x02 => Ok(RpcMethod::GetRevision),
            0x03 => Ok(RpcMethod::Subscribe),
            other => Err(PanelError::Codec(format!("unknown method 0x{other:02x}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RpcFrame {
    pub kind: FrameKind,
    pub method: RpcMethod,
    pub payload: Bytes,
}

impl RpcFrame {
    pub fn request(method: RpcMethod, payload: impl Into<Bytes>) -> Self {
        Self {
            kind: FrameKind::Request,
            method,
            payload: payload.into(),
        }
    }
}

#[derive(Debug, Default, PartialEq)]
pub struct RpcCodec;

impl Encoder<RpcFrame> for RpcCodec {
    type Error = PanelError;

    fn encode(&mut self, frame: RpcFrame, buf: &mut BytesMut) -> Result<(), PanelError> {
        if frame.payload.len() > MAX_FRAME_PAYLOAD {
            return Err(PanelError::Codec(format!(
                "payload of {} bytes exceeds the frame limit",
                frame.payload.len()
            )));
        }
        buf.reserve(FRAME_HEADER_SIZE + frame.payload.len());
        buf.put_u8(frame.kind as u8);
        buf.put_u8(frame.method as u8);
        buf.put_u32(frame.payload.len() as u32);
        buf.extend_from_slice(&frame.payload);
        Ok(())
    }
}

impl Decoder for RpcCodec {
    type Item = RpcFrame;
    type Error = PanelError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<RpcFrame>, PanelError> {
        if buf.len() < FRAME_HEADER_SIZE {
            return Ok(None);
        }
        let len = u32::from_be_bytes([buf[2], buf[3], buf[4], buf[5]]) as usize;
        if len > MAX_FRAME_PAYLOAD {
            return Err(PanelError::Codec(format!(
                "declared payload of {len} bytes exceeds the frame limit"
            )));
        }
        if buf.len() < FRAME_HEADER_SIZE + len {
            return Ok(None);
        }
        let kind = FrameKind::try_from(buf[0])?;
        let method = RpcMethod::try_from(buf[1])?;
        buf.advance(FRAME_HEADER_SIZE);
        let payload = buf.split_to(len).freeze();
        Ok(Some(RpcFrame { kind, method, payload }))
    }
}
