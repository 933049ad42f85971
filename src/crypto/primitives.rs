//! CSPRNG access and constant-time comparisons.

use crate::error::GatewayError;
use rand::RngCore;
use rand::rngs::OsRng;

/// Fills `buf` from the OS entropy source. `OsRng` already fails loudly
/// (panics) rather than returning a short read, so the `InsufficientEntropy`
/// path exists for callers that want to convert a caught panic or a future
/// fallible RNG source into the documented error kind.
pub fn csprng(buf: &mut [u8]) -> Result<(), GatewayError> {
    OsRng.try_fill_bytes(buf)
        .map_err(|_| GatewayError::InsufficientEntropy)
}

pub fn random_array<const N: usize>() -> Result<[u8; N], GatewayError> {
    let mut buf = [0u8; N];
    csprng(&mut buf)?;
    Ok(buf)
}

/// Non-early-exit byte equality.
pub fn ct_memeq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

/// Non-early-exit string equality (length mismatch is itself checked via
/// `ct_memeq`'s length guard, not a separate early branch on content).
pub fn ct_streq(a: &str, b: &str) -> bool {
    ct_memeq(a.as_bytes(), b.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ct_memeq_agrees_with_ordinary_equality() {
        let cases: &[(&[u8], &[u8])] = &[
            (b"", b""),
            (b"abc", b"abc"),
            (b"abc", b"abd"),
            (b"abc", b"ab"),
            (b"\x00\x01", b"\x00\x01"),
        ];
        for (a, b) in cases {
            assert_eq!(ct_memeq(a, b), a == b);
        }
    }

    #[test]
    fn csprng_fills_requested_length() {
        let mut buf = [0u8; 14];
        csprng(&mut buf).unwrap();
    }
}
