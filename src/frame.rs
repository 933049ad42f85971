//! Newcamd wire frame codec.
//!
//! Wire shape (outside in):
//! `[u16 BE outer-length][ciphertext ...][8-byte IV]`
//! where `outer-length` counts everything after itself (ciphertext + IV).
//!
//! Decrypting the ciphertext region under DES-EDE2-CBC yields the frame
//! body, laid out as:
//! `[u16 mid][u16 sid][u16 caid-hint][3-byte pid][1 reserved]`
//! `[u8 command][u8 status|len-hi][u8 len-lo][payload ...][pad ...][u8 xor-checksum]`
//!
//! The length field is 12 bits, split across the high nibble of the
//! status byte and the following byte; `status & 0xF0` survives
//! alongside it. Padding brings the pre-checksum region to a multiple of
//! 8 bytes and is filled with random bytes, not zeros.

use crate::constants::{NC_HDR_LEN, NC_MSG_MAX};
use crate::crypto::{csprng, ede2_cbc};
use crate::error::GatewayError;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// A decoded Newcamd message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub message_id: u16,
    pub service_id: u16,
    pub caid_hint: u16,
    pub program_id: [u8; 3],
    pub command: u8,
    /// Raw status byte as carried on the wire: high nibble is the real
    /// status, low nibble is shared with the length field's high bits.
    pub status: u8,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(command: u8, status: u8, payload: Vec<u8>) -> Self {
        Frame {
            message_id: 0,
            service_id: 0,
            caid_hint: 0,
            program_id: [0; 3],
            command,
            status,
            payload,
        }
    }

    pub fn with_ids(mut self, message_id: u16, service_id: u16, program_id: u32) -> Self {
        self.message_id = message_id;
        self.service_id = service_id;
        self.program_id = [
            ((program_id >> 16) & 0xff) as u8,
            ((program_id >> 8) & 0xff) as u8,
            (program_id & 0xff) as u8,
        ];
        self
    }

    pub fn pid_u32(&self) -> u32 {
        ((self.program_id[0] as u32) << 16) | ((self.program_id[1] as u32) << 8) | self.program_id[2] as u32
    }
}

fn xor_checksum(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |acc, b| acc ^ b)
}

/// Decode a decrypted, checksum-verified frame body (everything between
/// the IV-stripped ciphertext and the trailing checksum byte) into a
/// [`Frame`]. `body` must already have the checksum byte removed.
fn decode_body(body: &[u8]) -> Result<Frame, GatewayError> {
    if body.len() < NC_HDR_LEN + 5 {
        return Err(GatewayError::InvalidFrame("body shorter than minimum header"));
    }
    let message_id = u16::from_be_bytes([body[0], body[1]]);
    let service_id = u16::from_be_bytes([body[2], body[3]]);
    let caid_hint = u16::from_be_bytes([body[4], body[5]]);
    let program_id = [body[6], body[7], body[8]];
    // body[9] is reserved.
    let command = body[NC_HDR_LEN + 2];
    let status = body[NC_HDR_LEN + 3];
    let len_lo = body[NC_HDR_LEN + 4];
    let rlen = ((((status as u16) << 8) | len_lo as u16) & 0x0fff) as usize + 3;

    let payload_start = NC_HDR_LEN + 5;
    let payload_len = rlen.saturating_sub(3);
    if payload_start + payload_len > body.len() {
        return Err(GatewayError::InvalidFrame("declared payload length exceeds frame body"));
    }
    let payload = body[payload_start..payload_start + payload_len].to_vec();

    Ok(Frame {
        message_id,
        service_id,
        caid_hint,
        program_id,
        command,
        status,
        payload,
    })
}

/// Encode a [`Frame`] into the decrypted body layout, before padding and
/// checksum are appended.
fn encode_body(frame: &Frame) -> Vec<u8> {
    let dlen = 3 + frame.payload.len();
    let mut body = vec![0u8; NC_HDR_LEN + 2 + dlen];
    body[0..2].copy_from_slice(&frame.message_id.to_be_bytes());
    body[2..4].copy_from_slice(&frame.service_id.to_be_bytes());
    body[4..6].copy_from_slice(&frame.caid_hint.to_be_bytes());
    body[6..9].copy_from_slice(&frame.program_id);
    // body[9] left reserved/zero.
    body[NC_HDR_LEN + 2] = frame.command;
    body[NC_HDR_LEN + 3] = (frame.status & 0xf0) | (((dlen - 3) >> 8) as u8 & 0x0f);
    body[NC_HDR_LEN + 4] = ((dlen - 3) & 0xff) as u8;
    body[NC_HDR_LEN + 5..].copy_from_slice(&frame.payload);
    body
}

/// Read and decrypt one frame from `stream` under session keys `(k1, k2)`.
pub async fn recv_frame<S>(stream: &mut S, k1: &[u8; 8], k2: &[u8; 8]) -> Result<Frame, GatewayError>
where
    S: tokio::io::AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 2];
    stream.read_exact(&mut len_buf).await?;
    let total_len = u16::from_be_bytes(len_buf);
    if total_len == 0 || total_len > NC_MSG_MAX {
        return Err(GatewayError::InvalidFrame("outer length out of bounds"));
    }
    let mut buf = vec![0u8; total_len as usize];
    stream.read_exact(&mut buf).await?;
    if buf.len() < 8 {
        return Err(GatewayError::InvalidFrame("frame shorter than IV"));
    }

    let payload_len = buf.len() - 8;
    if payload_len % 8 != 0 {
        return Err(GatewayError::InvalidFrame("ciphertext length not block-aligned"));
    }
    let mut iv = [0u8; 8];
    iv.copy_from_slice(&buf[payload_len..]);
    let ciphertext = &buf[..payload_len];

    let mut key16 = [0u8; 16];
    key16[..8].copy_from_slice(k1);
    key16[8..].copy_from_slice(k2);

    let decrypted = ede2_cbc(&key16, &iv, ciphertext, false);

    if decrypted.is_empty() {
        return Err(GatewayError::InvalidFrame("empty ciphertext"));
    }
    let (body, checksum_byte) = decrypted.split_at(decrypted.len() - 1);
    if xor_checksum(body) != checksum_byte[0] {
        return Err(GatewayError::ChecksumMismatch);
    }

    decode_body(body)
}

/// Pad `body`, append the checksum byte, encrypt, append a fresh IV, and
/// write the whole frame (with outer length prefix) to `stream`.
pub async fn send_frame<S>(
    stream: &mut S,
    k1: &[u8; 8],
    k2: &[u8; 8],
    frame: &Frame,
) -> Result<(), GatewayError>
where
    S: tokio::io::AsyncWrite + Unpin,
{
    let mut body = encode_body(frame);

    let pad_len = (8 - ((body.len().max(1) - 1) % 8)) % 8;
    if pad_len > 0 {
        let mut pad = vec![0u8; pad_len];
        csprng(&mut pad)?;
        body.extend_from_slice(&pad);
    }
    body.push(xor_checksum(&body));

    let iv = crate::crypto::random_array::<8>()?;

    let mut key16 = [0u8; 16];
    key16[..8].copy_from_slice(k1);
    key16[8..].copy_from_slice(k2);

    let ciphertext = ede2_cbc(&key16, &iv, &body, true);

    let mut out = Vec::with_capacity(2 + ciphertext.len() + 8);
    let outer_len = (ciphertext.len() + 8) as u16;
    out.extend_from_slice(&outer_len.to_be_bytes());
    out.extend_from_slice(&ciphertext);
    out.extend_from_slice(&iv);

    stream.write_all(&out).await?;
    Ok(())
}

/// Build the unsolicited ADD-CARD announcement (`MSG_ADDCARD = 0xD3`).
pub fn addcard_frame(caid: u16, provider_id: u32, message_id: u16) -> Frame {
    Frame {
        message_id,
        service_id: 0,
        caid_hint: caid,
        program_id: [
            ((provider_id >> 16) & 0xff) as u8,
            ((provider_id >> 8) & 0xff) as u8,
            (provider_id & 0xff) as u8,
        ],
        command: crate::constants::MSG_ADDCARD,
        status: 0,
        payload: vec![crate::constants::MSG_ADDCARD, 0, 0],
    }
}

/// Build the GET-VERSION reply (`MSG_GET_VERSION = 0xD6`).
pub fn version_frame(message_id: u16) -> Frame {
    let ver = crate::constants::VERSION_STRING;
    let mut payload = vec![crate::constants::MSG_GET_VERSION, 0, ver.len() as u8];
    payload.extend_from_slice(ver.as_bytes());
    Frame::new(crate::constants::MSG_GET_VERSION, 0, payload).with_ids(message_id, 0, 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn test_keys() -> ([u8; 8], [u8; 8]) {
        let root = [1u8, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14];
        let token = [0u8; 14];
        let (k1, k2, _) = crate::crypto::handshake_keys(&root, &token);
        (k1, k2)
    }

    #[tokio::test]
    async fn frame_round_trips_through_send_and_recv() {
        let (k1, k2) = test_keys();
        let frame = Frame::new(0xe0, 0, b"hello world".to_vec()).with_ids(7, 42, 0x010203);

        let mut buf: Vec<u8> = Vec::new();
        send_frame(&mut buf, &k1, &k2, &frame).await.unwrap();

        let mut cursor = Cursor::new(buf);
        let decoded = recv_frame(&mut cursor, &k1, &k2).await.unwrap();

        assert_eq!(decoded.message_id, 7);
        assert_eq!(decoded.service_id, 42);
        assert_eq!(decoded.program_id, [0x01, 0x02, 0x03]);
        assert_eq!(decoded.command, 0xe0);
        assert_eq!(decoded.payload, b"hello world");
    }

    #[tokio::test]
    async fn empty_payload_round_trips() {
        let (k1, k2) = test_keys();
        let frame = Frame::new(0x8d, 0, vec![]);

        let mut buf: Vec<u8> = Vec::new();
        send_frame(&mut buf, &k1, &k2, &frame).await.unwrap();

        let mut cursor = Cursor::new(buf);
        let decoded = recv_frame(&mut cursor, &k1, &k2).await.unwrap();
        assert_eq!(decoded.command, 0x8d);
        assert!(decoded.payload.is_empty());
    }

    #[tokio::test]
    async fn tampered_ciphertext_fails_checksum() {
        let (k1, k2) = test_keys();
        let frame = Frame::new(0xe0, 0, b"payload".to_vec());

        let mut buf: Vec<u8> = Vec::new();
        send_frame(&mut buf, &k1, &k2, &frame).await.unwrap();
        // Flip a bit inside the ciphertext region (after the 2-byte length).
        buf[3] ^= 0xff;

        let mut cursor = Cursor::new(buf);
        let result = recv_frame(&mut cursor, &k1, &k2).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn oversized_outer_length_is_rejected() {
        let (k1, k2) = test_keys();
        let mut buf = vec![0u8; 2];
        buf[0..2].copy_from_slice(&(NC_MSG_MAX + 1).to_be_bytes());
        let mut cursor = Cursor::new(buf);
        let result = recv_frame(&mut cursor, &k1, &k2).await;
        assert!(matches!(result, Err(GatewayError::InvalidFrame(_))));
    }

    #[tokio::test]
    async fn non_block_aligned_ciphertext_is_rejected_without_panic() {
        let (k1, k2) = test_keys();
        // total_len = 9 gives payload_len = 1, not a multiple of 8.
        let mut buf = vec![0u8; 2];
        buf[0..2].copy_from_slice(&9u16.to_be_bytes());
        buf.extend_from_slice(&[0u8; 9]);
        let mut cursor = Cursor::new(buf);
        let result = recv_frame(&mut cursor, &k1, &k2).await;
        assert!(matches!(result, Err(GatewayError::InvalidFrame(_))));
    }

    #[test]
    fn version_frame_carries_version_string() {
        let f = version_frame(1);
        assert_eq!(f.command, crate::constants::MSG_GET_VERSION);
        assert_eq!(&f.payload[3..], crate::constants::VERSION_STRING.as_bytes());
    }
}
