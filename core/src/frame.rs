//! The fixed-layout frame carried inside every WebSocket binary message.
//!
//! ```text
//! offset 0      : circuit-id   (4 bytes)
//! offset 4      : flag         (1 byte, ASCII '0'..'3')
//! offset 5      : payload      (variable, may be empty)
//! offset len-8  : tag          (8 bytes)
//! ```
//!
//! Minimum legal length is 13 bytes; anything shorter is a protocol
//! violation that terminates the transport.

use crate::error::FrameError;
use crate::hash::HashAlgo;
use crate::otp;

pub const CIRCUIT_ID_LEN: usize = 4;
pub const TAG_LEN: usize = 8;
pub const MIN_FRAME_LEN: usize = CIRCUIT_ID_LEN + 1 + TAG_LEN;

pub type CircuitId = [u8; CIRCUIT_ID_LEN];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flag {
    /// client→server only: UTF-8 `host:port` target.
    Dial,
    /// both ways: opaque circuit bytes.
    Data,
    /// both ways: empty or ignored payload.
    Close,
    /// client→server (benchmark only): echoed back with `Close`.
    Loop,
}

impl Flag {
    pub fn to_byte(self) -> u8 {
        match self {
            Flag::Dial => b'0',
            Flag::Data => b'1',
            Flag::Close => b'2',
            Flag::Loop => b'3',
        }
    }

    pub fn from_byte(b: u8) -> Result<Self, FrameError> {
        match b {
            b'0' => Ok(Flag::Dial),
            b'1' => Ok(Flag::Data),
            b'2' => Ok(Flag::Close),
            b'3' => Ok(Flag::Loop),
            other => Err(FrameError::UnknownFlag(other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub circuit_id: CircuitId,
    pub flag: Flag,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(circuit_id: CircuitId, flag: Flag, payload: Vec<u8>) -> Self {
        Self { circuit_id, flag, payload }
    }

    /// Serialize to `circuit-id || flag || payload || generate(payload, H)`.
    pub fn encode(&self, algo: HashAlgo) -> Vec<u8> {
        let tag = otp::generate(&self.payload, algo);
        let mut buf = Vec::with_capacity(CIRCUIT_ID_LEN + 1 + self.payload.len() + TAG_LEN);
        buf.extend_from_slice(&self.circuit_id);
        buf.push(self.flag.to_byte());
        buf.extend_from_slice(&self.payload);
        buf.extend_from_slice(&tag);
        buf
    }

    /// Decode and verify a binary WebSocket message. Any length or tag
    /// mismatch is a protocol violation that the caller must treat as fatal
    /// to the transport.
    pub fn decode(msg: &[u8], secret: &[u8], algo: HashAlgo) -> Result<Self, FrameError> {
        if msg.len() < MIN_FRAME_LEN {
            return Err(FrameError::TooShort(msg.len()));
        }
        let mut circuit_id = [0u8; CIRCUIT_ID_LEN];
        circuit_id.copy_from_slice(&msg[..CIRCUIT_ID_LEN]);
        let flag = Flag::from_byte(msg[CIRCUIT_ID_LEN])?;
        let payload_end = msg.len() - TAG_LEN;
        let payload = msg[CIRCUIT_ID_LEN + 1..payload_end].to_vec();
        let tag = &msg[payload_end..];

        if !otp::verify(secret, &payload, tag, algo) {
            return Err(FrameError::BadTag);
        }

        Ok(Frame { circuit_id, flag, payload })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup(secret: &[u8]) {
        let canon = otp::canonicalize_secret(secret);
        otp::refresh_cached_seed(&canon);
    }

    #[test]
    fn round_trip_all_flags() {
        let secret = b"round-trip-secret".to_vec();
        let canon = otp::canonicalize_secret(&secret);
        setup(&secret);

        for flag in [Flag::Dial, Flag::Data, Flag::Close, Flag::Loop] {
            for payload in [Vec::new(), b"hello".to_vec(), vec![0xAB; 4096]] {
                let id = [1, 2, 3, 4];
                let frame = Frame::new(id, flag, payload.clone());
                let wire = frame.encode(HashAlgo::Crc);
                let decoded = Frame::decode(&wire, &canon, HashAlgo::Crc).unwrap();
                assert_eq!(decoded.circuit_id, id);
                assert_eq!(decoded.flag, flag);
                assert_eq!(decoded.payload, payload);
            }
        }
    }

    #[test]
    fn too_short_is_rejected() {
        let secret = otp::canonicalize_secret(b"short");
        let err = Frame::decode(&[0u8; 12], &secret, HashAlgo::Mem).unwrap_err();
        assert!(matches!(err, FrameError::TooShort(12)));
    }

    #[test]
    fn corrupted_payload_fails_tag_check() {
        let secret = b"corrupt-secret".to_vec();
        let canon = otp::canonicalize_secret(&secret);
        setup(&secret);

        let frame = Frame::new([9, 9, 9, 9], Flag::Data, b"original".to_vec());
        let mut wire = frame.encode(HashAlgo::Adler);
        let mid = wire.len() / 2;
        wire[mid] ^= 0xFF;
        assert!(matches!(
            Frame::decode(&wire, &canon, HashAlgo::Adler),
            Err(FrameError::BadTag)
        ));
    }

    #[test]
    fn unknown_flag_is_rejected() {
        assert!(matches!(Flag::from_byte(b'9'), Err(FrameError::UnknownFlag(b'9'))));
    }
}
