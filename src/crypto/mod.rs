//! Cryptographic primitives: DES / DES-EDE2-CBC / key-spread (`des`),
//! MD5 / MD5-crypt (`md5crypt`), and CSPRNG / constant-time compare
//! (`primitives`).

pub mod des;
pub mod md5crypt;
pub mod primitives;

pub use des::{des_decrypt, des_encrypt, ede2_cbc, key_spread, tdes_ede2_dec_enc_dec};
pub use md5crypt::{md5, md5_crypt};
pub use primitives::{csprng, ct_memeq, ct_streq, random_array};

/// Derive the initial (K1, K2) pair from the server root key and the
/// cleartext handshake token: `seed = root XOR token`; `spread =
/// key_spread(seed)`; K1 = spread[0..8], K2 = spread[8..16].
pub fn handshake_keys(root: &[u8; 14], token: &[u8; 14]) -> ([u8; 8], [u8; 8], [u8; 14]) {
    let mut seed = [0u8; 14];
    for i in 0..14 {
        seed[i] = root[i] ^ token[i];
    }
    let spread = key_spread(&seed);
    let mut k1 = [0u8; 8];
    let mut k2 = [0u8; 8];
    k1.copy_from_slice(&spread[0..8]);
    k2.copy_from_slice(&spread[8..16]);
    (k1, k2, seed)
}

/// Re-key at login: XOR the client-sent hash bytes into the session seed
/// cyclically (mod 14), then spread again. Required for wire
/// compatibility — if `hash` is shorter than 14 bytes, the remaining seed
/// bytes are left untouched.
pub fn rekey_on_login(seed: &[u8; 14], hash: &[u8]) -> ([u8; 8], [u8; 8]) {
    let mut new_seed = *seed;
    for (i, b) in hash.iter().enumerate() {
        new_seed[i % 14] ^= *b;
    }
    let spread = key_spread(&new_seed);
    let mut k1 = [0u8; 8];
    let mut k2 = [0u8; 8];
    k1.copy_from_slice(&spread[0..8]);
    k2.copy_from_slice(&spread[8..16]);
    (k1, k2)
}
