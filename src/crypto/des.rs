//! FIPS-46 DES, DES-EDE2-CBC, and the 14→16 session-key spread.
//!
//! Table-driven, bit-for-bit identical to the reference Newcamd client —
//! no timing-side-channel mitigation is attempted, since the attack
//! surface here is a private card-sharing link, not a public oracle.

use zeroize::Zeroize;

const IP: [u8; 64] = [
    58, 50, 42, 34, 26, 18, 10, 2, 60, 52, 44, 36, 28, 20, 12, 4, 62, 54, 46, 38, 30, 22, 14, 6,
    64, 56, 48, 40, 32, 24, 16, 8, 57, 49, 41, 33, 25, 17, 9, 1, 59, 51, 43, 35, 27, 19, 11, 3, 61,
    53, 45, 37, 29, 21, 13, 5, 63, 55, 47, 39, 31, 23, 15, 7,
];
const FP: [u8; 64] = [
    40, 8, 48, 16, 56, 24, 64, 32, 39, 7, 47, 15, 55, 23, 63, 31, 38, 6, 46, 14, 54, 22, 62, 30,
    37, 5, 45, 13, 53, 21, 61, 29, 36, 4, 44, 12, 52, 20, 60, 28, 35, 3, 43, 11, 51, 19, 59, 27,
    34, 2, 42, 10, 50, 18, 58, 26, 33, 1, 41, 9, 49, 17, 57, 25,
];
const E: [u8; 48] = [
    32, 1, 2, 3, 4, 5, 4, 5, 6, 7, 8, 9, 8, 9, 10, 11, 12, 13, 12, 13, 14, 15, 16, 17, 16, 17, 18,
    19, 20, 21, 20, 21, 22, 23, 24, 25, 24, 25, 26, 27, 28, 29, 28, 29, 30, 31, 32, 1,
];
const P: [u8; 32] = [
    16, 7, 20, 21, 29, 12, 28, 17, 1, 15, 23, 26, 5, 18, 31, 10, 2, 8, 24, 14, 32, 27, 3, 9, 19,
    13, 30, 6, 22, 11, 4, 25,
];
const PC1: [u8; 56] = [
    57, 49, 41, 33, 25, 17, 9, 1, 58, 50, 42, 34, 26, 18, 10, 2, 59, 51, 43, 35, 27, 19, 11, 3, 60,
    52, 44, 36, 63, 55, 47, 39, 31, 23, 15, 7, 62, 54, 46, 38, 30, 22, 14, 6, 61, 53, 45, 37, 29,
    21, 13, 5, 28, 20, 12, 4,
];
const PC2: [u8; 48] = [
    14, 17, 11, 24, 1, 5, 3, 28, 15, 6, 21, 10, 23, 19, 12, 4, 26, 8, 16, 7, 27, 20, 13, 2, 41, 52,
    31, 37, 47, 55, 30, 40, 51, 45, 33, 48, 44, 49, 39, 56, 34, 53, 46, 42, 50, 36, 29, 32,
];
const SH: [u32; 16] = [1, 1, 2, 2, 2, 2, 2, 2, 1, 2, 2, 2, 2, 2, 2, 1];
#[rustfmt::skip]
const SB: [[u32; 64]; 8] = [
    [14,4,13,1,2,15,11,8,3,10,6,12,5,9,0,7,0,15,7,4,14,2,13,1,10,6,12,11,9,5,3,8,4,1,14,8,13,6,2,11,15,12,9,7,3,10,5,0,15,12,8,2,4,9,1,7,5,11,3,14,10,0,6,13],
    [15,1,8,14,6,11,3,4,9,7,2,13,12,0,5,10,3,13,4,7,15,2,8,14,12,0,1,10,6,9,11,5,0,14,7,11,10,4,13,1,5,8,12,6,9,3,2,15,13,8,10,1,3,15,4,2,11,6,7,12,0,5,14,9],
    [10,0,9,14,6,3,15,5,1,13,12,7,11,4,2,8,13,7,0,9,3,4,6,10,2,8,5,14,12,11,15,1,13,6,4,9,8,15,3,0,11,1,2,12,5,10,14,7,1,10,13,0,6,9,8,7,4,15,14,3,11,5,2,12],
    [7,13,14,3,0,6,9,10,1,2,8,5,11,12,4,15,13,8,11,5,6,15,0,3,4,7,2,12,1,10,14,9,10,6,9,0,12,11,7,13,15,1,3,14,5,2,8,4,3,15,0,6,10,1,13,8,9,4,5,11,12,7,2,14],
    [2,12,4,1,7,10,11,6,8,5,3,15,13,0,14,9,14,11,2,12,4,7,13,1,5,0,15,10,3,9,8,6,4,2,1,11,10,13,7,8,15,9,12,5,6,3,0,14,11,8,12,7,1,14,2,13,6,15,0,9,10,4,5,3],
    [12,1,10,15,9,2,6,8,0,13,3,4,14,7,5,11,10,15,4,2,7,12,9,5,6,1,13,14,0,11,3,8,9,14,15,5,2,8,12,3,7,0,4,10,1,13,11,6,4,3,2,12,9,5,15,10,11,14,1,7,6,0,8,13],
    [4,11,2,14,15,0,8,13,3,12,9,7,5,10,6,1,13,0,11,7,4,9,1,10,14,3,5,12,2,15,8,6,1,4,11,13,12,3,7,14,10,15,6,8,0,5,9,2,6,11,13,8,1,4,10,7,9,5,0,15,14,2,3,12],
    [13,2,8,4,6,15,11,1,10,9,3,14,5,0,12,7,1,15,13,8,10,3,7,4,12,5,6,11,0,14,9,2,7,11,4,1,9,12,14,2,0,6,10,13,15,3,5,8,2,1,14,7,4,10,8,13,15,12,9,0,3,5,6,11],
];

fn permute64(input: u64, tbl: &[u8], n: usize) -> u64 {
    let mut out = 0u64;
    for (i, &t) in tbl.iter().take(n).enumerate() {
        if input & (1u64 << (64 - t as u32)) != 0 {
            out |= 1u64 << (n - 1 - i);
        }
    }
    out
}

fn permute32(input: u32, tbl: &[u8], n: usize) -> u32 {
    let mut out = 0u32;
    for (i, &t) in tbl.iter().take(n).enumerate() {
        if input & (1u32 << (32 - t as u32)) != 0 {
            out |= 1u32 << (n - 1 - i);
        }
    }
    out
}

fn subkeys(key: &[u8; 8]) -> [u64; 16] {
    let mut key64 = 0u64;
    for (i, &b) in key.iter().enumerate() {
        key64 |= (b as u64) << (56 - i * 8);
    }
    let perm = permute64(key64, &PC1, 56);
    let mut c = ((perm >> 28) & 0x0FFF_FFFF) as u32;
    let mut d = (perm & 0x0FFF_FFFF) as u32;
    let mut sk = [0u64; 16];
    for i in 0..16 {
        for _ in 0..SH[i] {
            c = ((c << 1) | (c >> 27)) & 0x0FFF_FFFF;
            d = ((d << 1) | (d >> 27)) & 0x0FFF_FFFF;
        }
        let cd = ((c as u64) << 28) | d as u64;
        sk[i] = permute48_pc2(cd);
    }
    sk
}

fn permute48_pc2(cd: u64) -> u64 {
    let mut out = 0u64;
    for (j, &t) in PC2.iter().enumerate() {
        if cd & (1u64 << (56 - t as u32)) != 0 {
            out |= 1u64 << (47 - j);
        }
    }
    out
}

fn f(r: u32, sk: u64) -> u32 {
    let mut exp = 0u64;
    for (i, &t) in E.iter().enumerate() {
        if r & (1u32 << (32 - t as u32)) != 0 {
            exp |= 1u64 << (47 - i);
        }
    }
    exp ^= sk;
    let mut out = 0u32;
    for i in 0..8 {
        let bi = ((exp >> (42 - i * 6)) & 0x3F) as u32;
        let row = ((bi & 0x20) >> 4) | (bi & 1);
        let col = (bi >> 1) & 0x0F;
        out |= SB[i as usize][(row * 16 + col) as usize] << (28 - i * 4);
    }
    permute32(out, &P, 32)
}

/// Single DES block operation. `key` parity bits are ignored (not checked).
fn block(input: &[u8; 8], key: &[u8; 8], decrypt: bool) -> [u8; 8] {
    let mut sk = subkeys(key);
    let mut blk = 0u64;
    for (i, &b) in input.iter().enumerate() {
        blk |= (b as u64) << (56 - i * 8);
    }
    blk = permute64(blk, &IP, 64);
    let mut l = (blk >> 32) as u32;
    let mut r = (blk & 0xFFFF_FFFF) as u32;
    for i in 0..16 {
        let tmp = r;
        let round_key = if decrypt { sk[15 - i] } else { sk[i] };
        r = l ^ f(r, round_key);
        l = tmp;
    }
    blk = ((r as u64) << 32) | l as u64;
    blk = permute64(blk, &FP, 64);
    let mut out = [0u8; 8];
    for (i, o) in out.iter_mut().enumerate() {
        *o = ((blk >> (56 - i * 8)) & 0xFF) as u8;
    }
    sk.zeroize();
    out
}

pub fn des_encrypt(key: &[u8; 8], input: &[u8; 8]) -> [u8; 8] {
    block(input, key, false)
}

pub fn des_decrypt(key: &[u8; 8], input: &[u8; 8]) -> [u8; 8] {
    block(input, key, true)
}

/// Triple-DES EDE2, one 8-byte block: D(k0) ∘ E(k1) ∘ D(k0).
///
/// This is the order the CAID-0B00 ECM section decrypt uses; note it
/// differs from the encrypt/decrypt directions of DES-EDE2-CBC below,
/// which is its own, separate EDE2 construction (E(K1)∘D(K2)∘E(K1) /
/// D(K1)∘E(K2)∘D(K1)) used for frame encryption.
pub fn tdes_ede2_dec_enc_dec(k0: &[u8; 8], k1: &[u8; 8], block8: &[u8; 8]) -> [u8; 8] {
    let a = des_decrypt(k0, block8);
    let b = des_encrypt(k1, &a);
    des_decrypt(k0, &b)
}

/// Deterministic 14→16 byte expansion with odd-parity fixup per output byte.
/// The exact bit schedule must be preserved; clients depend on byte-identical
/// derived keys.
pub fn key_spread(k: &[u8; 14]) -> [u8; 16] {
    let mut s = [0u8; 16];
    s[0] = k[0] & 0xfe;
    s[1] = ((k[0] << 7) | (k[1] >> 1)) & 0xfe;
    s[2] = ((k[1] << 6) | (k[2] >> 2)) & 0xfe;
    s[3] = ((k[2] << 5) | (k[3] >> 3)) & 0xfe;
    s[4] = ((k[3] << 4) | (k[4] >> 4)) & 0xfe;
    s[5] = ((k[4] << 3) | (k[5] >> 5)) & 0xfe;
    s[6] = ((k[5] << 2) | (k[6] >> 6)) & 0xfe;
    s[7] = k[6] << 1;
    s[8] = k[7] & 0xfe;
    s[9] = ((k[7] << 7) | (k[8] >> 1)) & 0xfe;
    s[10] = ((k[8] << 6) | (k[9] >> 2)) & 0xfe;
    s[11] = ((k[9] << 5) | (k[10] >> 3)) & 0xfe;
    s[12] = ((k[10] << 4) | (k[11] >> 4)) & 0xfe;
    s[13] = ((k[11] << 3) | (k[12] >> 5)) & 0xfe;
    s[14] = ((k[12] << 2) | (k[13] >> 6)) & 0xfe;
    s[15] = k[13] << 1;
    for b in s.iter_mut() {
        let mut par = 0u8;
        for j in 1..8 {
            par ^= (*b >> j) & 1;
        }
        *b = (*b & 0xFE) | (par ^ 1);
    }
    s
}

/// DES-EDE2-CBC over `data`, which must be a multiple of 8 bytes long.
/// `key16` is K1 (bytes 0..8) concatenated with K2 (bytes 8..16).
pub fn ede2_cbc(key16: &[u8; 16], iv: &[u8; 8], data: &[u8], encrypt: bool) -> Vec<u8> {
    assert_eq!(data.len() % 8, 0, "ede2_cbc requires block-aligned input");
    let mut k1 = [0u8; 8];
    let mut k2 = [0u8; 8];
    k1.copy_from_slice(&key16[0..8]);
    k2.copy_from_slice(&key16[8..16]);

    let mut out = vec![0u8; data.len()];
    let mut ivec = *iv;
    if encrypt {
        for chunk_start in (0..data.len()).step_by(8) {
            let mut block8 = [0u8; 8];
            for j in 0..8 {
                block8[j] = data[chunk_start + j] ^ ivec[j];
            }
            let a = des_encrypt(&k1, &block8);
            let b = des_decrypt(&k2, &a);
            let c = des_encrypt(&k1, &b);
            out[chunk_start..chunk_start + 8].copy_from_slice(&c);
            ivec = c;
        }
    } else {
        for chunk_start in (0..data.len()).step_by(8) {
            let mut block8 = [0u8; 8];
            block8.copy_from_slice(&data[chunk_start..chunk_start + 8]);
            let a = des_decrypt(&k1, &block8);
            let b = des_encrypt(&k2, &a);
            let mut c = des_decrypt(&k1, &b);
            for j in 0..8 {
                c[j] ^= ivec[j];
            }
            out[chunk_start..chunk_start + 8].copy_from_slice(&c);
            ivec = block8;
        }
    }
    k1.zeroize();
    k2.zeroize();
    ivec.zeroize();
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn des_decrypt_inverts_encrypt() {
        let key = [0x01, 0x23, 0x45, 0x67, 0x89, 0xab, 0xcd, 0xef];
        let plain = [0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88];
        let ct = des_encrypt(&key, &plain);
        let pt = des_decrypt(&key, &ct);
        assert_eq!(pt, plain);
    }

    #[test]
    fn key_spread_has_odd_parity_every_byte() {
        let input = [
            0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x10, 0x11, 0x12, 0x13, 0x14,
        ];
        let spread = key_spread(&input);
        for b in spread {
            assert_eq!(b.count_ones() % 2, 1, "byte {:#04x} has even parity", b);
        }
    }

    #[test]
    fn key_spread_zero_root_is_deterministic() {
        let input = [0u8; 14];
        let a = key_spread(&input);
        let b = key_spread(&input);
        assert_eq!(a, b);
    }

    #[test]
    fn ede2_cbc_round_trips() {
        let key16 = [
            1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16,
        ];
        let iv = [0xaa; 8];
        let plain = [0u8; 32];
        let ct = ede2_cbc(&key16, &iv, &plain, true);
        let pt = ede2_cbc(&key16, &iv, &ct, false);
        assert_eq!(pt, plain);
    }
}
