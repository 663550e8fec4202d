//! Password stretching and per-block encryption.
//!
//! The archive salt encodes when (and therefore how hard) the passphrase was
//! stretched: iteration counts scale with the wall-clock year so that the
//! work factor tracks hardware growth without changing the header format.
//! The stretched 64-byte SHA-512 state is then combined with an 8-byte
//! per-block salt to derive an AES-128 key and IV for each Block Record.
//!
//! Payloads are encrypted with CBC plus ciphertext stealing, so no padding
//! is ever stored and the ciphertext length equals the plaintext length.
//! Payloads shorter than one cipher block are combined with a single
//! keystream block derived from the IV.  All key material lives in
//! [`Zeroizing`] buffers and is wiped on drop.

use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use aes::{Aes128, Block};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha512};
use zeroize::Zeroizing;

use crate::error::{LrzError, Result};

/// Archive and per-block salt width.
pub const SALT_LEN: usize = 8;
/// SHA-512 digest width.
pub const HASH_LEN: usize = 64;
/// AES block width.
pub const CBC_LEN: usize = 16;
/// Fixed-size staging area for salt + passphrase.
pub const PASS_LEN: usize = 512;

// Work-factor calibration: one million digests per second at the start of
// 2011, doubling every ~1.1 years since.
const MOORE: f64 = 1.835;
const ARBITRARY: u64 = 1_000_000;
const T_ZERO: u64 = 1_293_840_000;
const SECONDS_IN_A_YEAR: f64 = 365.0 * 86400.0;

/// Iteration count for a stretch performed at `now` seconds since the epoch,
/// split into the `(nbits, nloops)` pair stored in the first two salt bytes.
fn moore_loops(now: u64) -> (u8, u8) {
    let now = now.max(T_ZERO);
    // Hardware no longer keeps pace with the 2011 curve; advance the clock
    // at quarter speed to keep the header format unchanged.
    let eff = T_ZERO + (now - T_ZERO) / 4;
    let times_per_second = MOORE.powf(1.0 / SECONDS_IN_A_YEAR);
    let mut nloops = (ARBITRARY as f64 * times_per_second.powf((eff - T_ZERO) as f64)) as u64;
    if nloops < ARBITRARY {
        nloops = ARBITRARY;
    }
    let mut nbits = 0u8;
    while nloops > 255 {
        nloops >>= 1;
        nbits += 1;
    }
    (nbits, nloops as u8)
}

/// Effective iteration count encoded in a salt.
pub fn loops_from_salt(salt: &[u8; SALT_LEN]) -> u64 {
    u64::from(salt[1]) << u64::from(salt[0])
}

/// Fresh archive salt: two work-factor bytes plus six bytes of OS
/// randomness.
pub fn generate_salt(now: u64) -> [u8; SALT_LEN] {
    let (nbits, nloops) = moore_loops(now);
    let mut salt = [0u8; SALT_LEN];
    salt[0] = nbits;
    salt[1] = nloops;
    OsRng.fill_bytes(&mut salt[2..]);
    salt
}

/// Fresh per-block salt, all eight bytes random.
pub fn random_block_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    salt
}

/// Stretched passphrase state shared by every block of one archive.
pub struct KeyMaterial {
    hash: Zeroizing<[u8; HASH_LEN]>,
    salt_pass: Zeroizing<Vec<u8>>,
}

impl KeyMaterial {
    /// Stretch `password` under `salt`, performing the iteration count the
    /// salt encodes.
    pub fn stretch(salt: &[u8; SALT_LEN], password: &str) -> Result<Self> {
        if password.is_empty() {
            return Err(LrzError::Crypto("empty passphrase".into()));
        }
        if password.len() > PASS_LEN - SALT_LEN {
            return Err(LrzError::Crypto("passphrase too long".into()));
        }
        let mut salt_pass = Zeroizing::new(Vec::with_capacity(SALT_LEN + password.len()));
        salt_pass.extend_from_slice(salt);
        salt_pass.extend_from_slice(password.as_bytes());

        let encloops = loops_from_salt(salt);
        let n = encloops * HASH_LEN as u64 / (salt_pass.len() as u64 + 8);
        let mut ctx = Sha512::new();
        for counter in 0..n {
            ctx.update(counter.to_le_bytes());
            ctx.update(&*salt_pass);
        }
        let mut hash = Zeroizing::new([0u8; HASH_LEN]);
        hash.copy_from_slice(&ctx.finalize());
        Ok(KeyMaterial { hash, salt_pass })
    }

    /// Derive the AES key and IV for one block.
    ///
    /// The key digest feeds the IV digest in full, so the two values never
    /// coincide even for identical salts.
    fn block_keys(
        &self,
        block_salt: &[u8; SALT_LEN],
    ) -> (Zeroizing<[u8; CBC_LEN]>, Zeroizing<[u8; CBC_LEN]>) {
        let mut ctx = Sha512::new();
        ctx.update(&*self.hash);
        ctx.update(block_salt);
        ctx.update(&*self.salt_pass);
        let mut key_digest = Zeroizing::new([0u8; HASH_LEN]);
        key_digest.copy_from_slice(&ctx.finalize());

        let mut ctx = Sha512::new();
        ctx.update(&*key_digest);
        ctx.update(block_salt);
        ctx.update(&*self.salt_pass);
        let mut iv_digest = Zeroizing::new([0u8; HASH_LEN]);
        iv_digest.copy_from_slice(&ctx.finalize());

        let mut key = Zeroizing::new([0u8; CBC_LEN]);
        let mut iv = Zeroizing::new([0u8; CBC_LEN]);
        key.copy_from_slice(&key_digest[..CBC_LEN]);
        iv.copy_from_slice(&iv_digest[..CBC_LEN]);
        (key, iv)
    }

    /// Encrypt `buf` in place under the block salt.
    pub fn encrypt_block(&self, block_salt: &[u8; SALT_LEN], buf: &mut [u8]) -> Result<()> {
        self.crypt_block(block_salt, buf, true)
    }

    /// Decrypt `buf` in place under the block salt.
    pub fn decrypt_block(&self, block_salt: &[u8; SALT_LEN], buf: &mut [u8]) -> Result<()> {
        self.crypt_block(block_salt, buf, false)
    }

    fn crypt_block(
        &self,
        block_salt: &[u8; SALT_LEN],
        buf: &mut [u8],
        encrypt: bool,
    ) -> Result<()> {
        if buf.is_empty() {
            return Err(LrzError::Crypto("refusing to encrypt empty payload".into()));
        }
        let (key, iv) = self.block_keys(block_salt);
        let cipher = Aes128::new_from_slice(&*key)
            .map_err(|_| LrzError::Crypto("AES key setup failed".into()))?;

        let m = buf.len() % CBC_LEN;
        let n = buf.len() - m;

        if n == 0 {
            // Sub-block payload: one keystream block derived from the IV.
            let mut ks = Block::clone_from_slice(&*iv);
            cipher.encrypt_block(&mut ks);
            for (b, k) in buf.iter_mut().zip(ks.iter()) {
                *b ^= k;
            }
            return Ok(());
        }

        let mut chain = Zeroizing::new(*iv);
        if encrypt {
            cbc_encrypt(&cipher, &mut chain, &mut buf[..n]);
            if m > 0 {
                // Steal from the last full ciphertext block: the stolen tail
                // becomes the stored partial block and the freshly encrypted
                // padded block takes its place.
                let mut tmp0 = Zeroizing::new([0u8; CBC_LEN]);
                tmp0[..m].copy_from_slice(&buf[n..]);
                xor16(&mut *tmp0, &chain);
                let mut tmp1 = Block::clone_from_slice(&*tmp0);
                cipher.encrypt_block(&mut tmp1);
                buf.copy_within(n - CBC_LEN..n - CBC_LEN + m, n);
                buf[n - CBC_LEN..n].copy_from_slice(&tmp1);
            }
        } else if m > 0 {
            cbc_decrypt(&cipher, &mut chain, &mut buf[..n - CBC_LEN]);
            // chain now holds the ciphertext block preceding the stolen one.
            let mut tmp0 = Block::clone_from_slice(&buf[n - CBC_LEN..n]);
            cipher.decrypt_block(&mut tmp0);
            let mut tmp1 = Zeroizing::new([0u8; CBC_LEN]);
            tmp1[..m].copy_from_slice(&buf[n..]);
            for (t, s) in tmp0.iter_mut().zip(tmp1.iter()) {
                *t ^= s;
            }
            buf[n..].copy_from_slice(&tmp0[..m]);
            tmp1[m..].copy_from_slice(&tmp0[m..]);
            let mut last = Block::clone_from_slice(&*tmp1);
            cipher.decrypt_block(&mut last);
            let out = &mut buf[n - CBC_LEN..n];
            out.copy_from_slice(&last);
            xor16(out, &chain);
        } else {
            cbc_decrypt(&cipher, &mut chain, buf);
        }
        Ok(())
    }
}

fn xor16(dst: &mut [u8], src: &[u8; CBC_LEN]) {
    for (d, s) in dst.iter_mut().zip(src.iter()) {
        *d ^= s;
    }
}

fn cbc_encrypt(cipher: &Aes128, chain: &mut [u8; CBC_LEN], data: &mut [u8]) {
    debug_assert_eq!(data.len() % CBC_LEN, 0);
    for block in data.chunks_exact_mut(CBC_LEN) {
        xor16(block, chain);
        let mut b = Block::clone_from_slice(block);
        cipher.encrypt_block(&mut b);
        block.copy_from_slice(&b);
        chain.copy_from_slice(block);
    }
}

fn cbc_decrypt(cipher: &Aes128, chain: &mut [u8; CBC_LEN], data: &mut [u8]) {
    debug_assert_eq!(data.len() % CBC_LEN, 0);
    for block in data.chunks_exact_mut(CBC_LEN) {
        let saved: [u8; CBC_LEN] = block.try_into().unwrap();
        let mut b = Block::clone_from_slice(block);
        cipher.decrypt_block(&mut b);
        block.copy_from_slice(&b);
        xor16(block, chain);
        *chain = saved;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn material() -> KeyMaterial {
        let salt = [0u8, 200, 1, 2, 3, 4, 5, 6];
        KeyMaterial::stretch(&salt, "hunter2").unwrap()
    }

    #[test]
    fn loops_encoding_round_trips() {
        let (nbits, nloops) = moore_loops(T_ZERO);
        let salt = [nbits, nloops, 0, 0, 0, 0, 0, 0];
        assert!(loops_from_salt(&salt) >= ARBITRARY / 2);
    }

    #[test]
    fn stretch_is_deterministic() {
        let salt = [0u8, 5, 9, 9, 9, 9, 9, 9];
        let a = KeyMaterial::stretch(&salt, "pw").unwrap();
        let b = KeyMaterial::stretch(&salt, "pw").unwrap();
        assert_eq!(&*a.hash as &[u8], &*b.hash as &[u8]);
    }

    #[test]
    fn round_trip_all_tail_lengths() {
        let km = material();
        let bsalt = [7u8; SALT_LEN];
        for len in [1usize, 15, 16, 17, 31, 32, 33, 100, 257] {
            let original: Vec<u8> = (0..len).map(|i| (i * 37) as u8).collect();
            let mut buf = original.clone();
            km.encrypt_block(&bsalt, &mut buf).unwrap();
            if len >= CBC_LEN {
                assert_ne!(buf, original, "len {len} must actually encrypt");
            }
            km.decrypt_block(&bsalt, &mut buf).unwrap();
            assert_eq!(buf, original, "len {len} must round-trip");
        }
    }

    #[test]
    fn empty_payload_is_rejected() {
        let km = material();
        assert!(km.encrypt_block(&[0; SALT_LEN], &mut []).is_err());
    }

    #[test]
    fn different_block_salts_differ() {
        let km = material();
        let mut a = vec![0u8; 64];
        let mut b = vec![0u8; 64];
        km.encrypt_block(&[1; SALT_LEN], &mut a).unwrap();
        km.encrypt_block(&[2; SALT_LEN], &mut b).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn wrong_password_does_not_decrypt() {
        let salt = [0u8, 200, 1, 2, 3, 4, 5, 6];
        let km = KeyMaterial::stretch(&salt, "hunter2").unwrap();
        let other = KeyMaterial::stretch(&salt, "wrong").unwrap();
        let original = vec![0x42u8; 48];
        let mut buf = original.clone();
        km.encrypt_block(&[3; SALT_LEN], &mut buf).unwrap();
        other.decrypt_block(&[3; SALT_LEN], &mut buf).unwrap();
        assert_ne!(buf, original);
    }
}
