//! MD5 digest (ECM fingerprinting) and the classic `$1$` MD5-crypt scheme
//! used for password verification.

use md5::{Digest, Md5};
use zeroize::Zeroize;

pub const MAGIC: &str = "$1$";
const B64_ALPHABET: &[u8; 64] =
    b"./0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

/// 16-byte MD5 digest of `data`.
pub fn md5(data: &[u8]) -> [u8; 16] {
    let mut hasher = Md5::new();
    hasher.update(data);
    hasher.finalize().into()
}

fn to64(mut v: u32, n: usize, out: &mut String) {
    for _ in 0..n {
        out.push(B64_ALPHABET[(v & 0x3f) as usize] as char);
        v >>= 6;
    }
}

/// Classic MD5-crypt: `salt_in` is either a bare salt or a full
/// `$1$salt$...` string (only the salt portion, up to 8 chars, is used).
/// Returns the full `$1$salt$hash` string.
pub fn md5_crypt(password: &str, salt_in: &str) -> String {
    let stripped = salt_in.strip_prefix(MAGIC).unwrap_or(salt_in);
    let salt = match stripped.find('$') {
        Some(idx) => &stripped[..idx],
        None => stripped,
    };
    let salt = if salt.len() > 8 { &salt[..8] } else { salt };

    let pw = password.as_bytes();

    // Alternate hash: MD5(pw || salt || pw)
    let mut alt_input = Vec::with_capacity(pw.len() * 2 + salt.len());
    alt_input.extend_from_slice(pw);
    alt_input.extend_from_slice(salt.as_bytes());
    alt_input.extend_from_slice(pw);
    let mut alt = md5(&alt_input);
    alt_input.zeroize();

    // ctx1 = pw || magic || salt || (alt repeated to pw.len()) || (pw.len() in binary, msb dropped per bit)
    let mut ctx1 = Vec::with_capacity(pw.len() * 2 + 32);
    ctx1.extend_from_slice(pw);
    ctx1.extend_from_slice(MAGIC.as_bytes());
    ctx1.extend_from_slice(salt.as_bytes());

    let mut remaining = pw.len();
    while remaining > 0 {
        let take = remaining.min(16);
        ctx1.extend_from_slice(&alt[..take]);
        remaining -= take;
    }
    alt.zeroize();

    let mut bit_count = pw.len();
    while bit_count > 0 {
        if bit_count & 1 != 0 {
            ctx1.push(0);
        } else {
            ctx1.push(pw[0]);
        }
        bit_count >>= 1;
    }

    let mut fh = md5(&ctx1);
    ctx1.zeroize();

    // 1000-round stretch
    for i in 0..1000u32 {
        let mut tmp = Vec::with_capacity(pw.len() * 2 + 16 + salt.len());
        if i & 1 != 0 {
            tmp.extend_from_slice(pw);
        } else {
            tmp.extend_from_slice(&fh);
        }
        if i % 3 != 0 {
            tmp.extend_from_slice(salt.as_bytes());
        }
        if i % 7 != 0 {
            tmp.extend_from_slice(pw);
        }
        if i & 1 != 0 {
            tmp.extend_from_slice(&fh);
        } else {
            tmp.extend_from_slice(pw);
        }
        fh = md5(&tmp);
        tmp.zeroize();
    }

    let mut out = String::with_capacity(MAGIC.len() + salt.len() + 1 + 22);
    out.push_str(MAGIC);
    out.push_str(salt);
    out.push('$');

    let groups: [(usize, usize, usize); 5] = [(0, 6, 12), (1, 7, 13), (2, 8, 14), (3, 9, 15), (4, 10, 5)];
    for (a, b, c) in groups {
        let v = ((fh[a] as u32) << 16) | ((fh[b] as u32) << 8) | fh[c] as u32;
        to64(v, 4, &mut out);
    }
    to64(fh[11] as u32, 2, &mut out);

    fh.zeroize();
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn md5_of_empty_matches_known_digest() {
        let digest = md5(b"");
        assert_eq!(hex::encode(digest), "d41d8cd98f00b204e9800998ecf8427e");
    }

    #[test]
    fn md5_crypt_is_deterministic_for_same_salt() {
        let a = md5_crypt("hunter2", "abcdefgh");
        let b = md5_crypt("hunter2", "abcdefgh");
        assert_eq!(a, b);
        assert!(a.starts_with("$1$abcdefgh$"));
    }

    #[test]
    fn md5_crypt_truncates_salt_to_eight_chars() {
        let a = md5_crypt("pw", "123456789999");
        assert!(a.starts_with("$1$12345678$"));
    }

    #[test]
    fn md5_crypt_differs_across_passwords() {
        let a = md5_crypt("password-one", "saltsalt");
        let b = md5_crypt("password-two", "saltsalt");
        assert_ne!(a, b);
    }

    #[test]
    fn md5_crypt_accepts_full_magic_prefixed_salt_string() {
        let a = md5_crypt("pw", "salt1234");
        let b = md5_crypt("pw", "$1$salt1234$ignoredhashportion");
        assert_eq!(a, b);
    }
}
