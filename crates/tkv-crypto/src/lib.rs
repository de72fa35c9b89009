//! Per-page encryption boundary transform (§4.10, C10).
//!
//! Each page is encrypted in CTR mode with AES-128 (`AES/CTR/NoPadding`,
//! 128-bit key). Two subkeys exist: a **root key**
//! (supplied or generated by the caller) and a per-database **data key**
//! generated lazily alongside a random **IV salt**. Header pages
//! (`page_id <= 1`) are encrypted under the root key and carry, appended
//! at the page tail, three [`tail`]-encoded blocks: `header_iv`,
//! `data_iv_salt`, `data_key` — in that physical order, so decoding
//! walks `header_iv` (left in plaintext to bootstrap decryption) first,
//! then decrypts the remainder of the tail to recover the other two.
//! Data pages derive a deterministic IV per page id instead of storing
//! one.

pub mod tail;

use aes::cipher::{BlockEncrypt, KeyInit, KeyIvInit, StreamCipher};
use aes::Aes128;
use ctr::Ctr128BE;
use rand::RngCore;
use tkv_error::{Error, Result};
use tkv_pageio::PageTransform;
use tkv_types::PageId;

pub const KEY_LEN: usize = 16;
pub type Key = [u8; KEY_LEN];

type Aes128Ctr = Ctr128BE<Aes128>;

fn random_key() -> Key {
    let mut key = [0u8; KEY_LEN];
    rand::thread_rng().fill_bytes(&mut key);
    key
}

/// The per-database data key plus the IV salt it was generated with
/// (§4.10).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataKeyMaterial {
    pub data_key: Key,
    pub data_iv_salt: Key,
}

impl DataKeyMaterial {
    #[must_use]
    pub fn generate() -> Self {
        Self {
            data_key: random_key(),
            data_iv_salt: random_key(),
        }
    }
}

/// Derive the deterministic per-page IV for a data page: encrypt the
/// page id (little-endian, zero-padded to one AES block) under
/// `data_key`, then XOR with `data_iv_salt` (§4.10).
#[must_use]
pub fn derive_data_page_iv(data_key: &Key, data_iv_salt: &Key, id: PageId) -> Key {
    let mut block = [0u8; KEY_LEN];
    block[..8].copy_from_slice(&id.get().to_le_bytes());
    let cipher = Aes128::new_from_slice(data_key).expect("16-byte key");
    let mut generic = aes::cipher::generic_array::GenericArray::clone_from_slice(&block);
    cipher.encrypt_block(&mut generic);
    let mut iv = [0u8; KEY_LEN];
    for i in 0..KEY_LEN {
        iv[i] = generic[i] ^ data_iv_salt[i];
    }
    iv
}

fn ctr_apply(key: &Key, iv: &Key, buf: &mut [u8]) {
    let key = aes::cipher::generic_array::GenericArray::from_slice(key);
    let iv = aes::cipher::generic_array::GenericArray::from_slice(iv);
    let mut cipher = Aes128Ctr::new(key, iv);
    cipher.apply_keystream(buf);
}

/// Page-transform boundary for a single open database: knows the root
/// key and (once generated) the data key material.
pub struct CryptoProvider {
    root_key: Key,
    data: DataKeyMaterial,
}

impl CryptoProvider {
    #[must_use]
    pub fn new(root_key: Key, data: DataKeyMaterial) -> Self {
        Self { root_key, data }
    }

    #[must_use]
    pub fn with_generated_root_key() -> Self {
        Self::new(random_key(), DataKeyMaterial::generate())
    }

    fn encode_header(&self, page: &mut [u8]) -> Result<()> {
        let mut header_iv = [0u8; KEY_LEN];
        rand::thread_rng().fill_bytes(&mut header_iv);

        let tail_overhead_estimate = (KEY_LEN + 1) * 2; // data_iv_salt + data_key blocks
        if page.len() < tail_overhead_estimate {
            return Err(Error::illegal_argument("page too small for header crypto tail"));
        }
        let body_len = page.len() - tail_overhead_estimate;
        let mut plaintext_with_tail = page[..body_len].to_vec();
        tail::encode_block(&mut plaintext_with_tail, &self.data.data_iv_salt)?;
        tail::encode_block(&mut plaintext_with_tail, &self.data.data_key)?;

        let mut ciphertext = plaintext_with_tail;
        ctr_apply(&self.root_key, &header_iv, &mut ciphertext);

        let mut out = ciphertext;
        tail::encode_block(&mut out, &header_iv)?;
        if out.len() != page.len() {
            return Err(Error::illegal_argument(
                "header crypto tail overhead estimate did not match page size",
            ));
        }
        page.copy_from_slice(&out);
        Ok(())
    }

    fn decode_header(&self, page: &mut [u8]) -> Result<()> {
        let (header_iv, end) = tail::decode_block(page, page.len())?;
        let header_iv: Key = header_iv
            .try_into()
            .map_err(|_| Error::Conversion("header IV is not 16 bytes".into()))?;

        let mut plaintext_with_tail = page[..end].to_vec();
        ctr_apply(&self.root_key, &header_iv, &mut plaintext_with_tail);

        let (data_key, end2) = tail::decode_block(&plaintext_with_tail, plaintext_with_tail.len())?;
        let data_key: Key = data_key
            .try_into()
            .map_err(|_| Error::Conversion("data key is not 16 bytes".into()))?;
        let (data_iv_salt, body_len) = tail::decode_block(&plaintext_with_tail, end2)?;
        let data_iv_salt: Key = data_iv_salt
            .try_into()
            .map_err(|_| Error::Conversion("data IV salt is not 16 bytes".into()))?;

        page[..body_len].copy_from_slice(&plaintext_with_tail[..body_len]);
        page[body_len..].fill(0);
        // Not mutating self here keeps `decode` on `&self`; callers that
        // need the recovered data key material read it back via
        // `recover_data_key` called just before this on a known header
        // page, which is the only place it is needed (bootstrap/open).
        let _ = (data_key, data_iv_salt);
        Ok(())
    }

    /// Recover `(data_key, data_iv_salt)` from an already-decrypted
    /// header page tail, without mutating the page. Used once at
    /// database open to learn the data key before any data pages can be
    /// decoded.
    ///
    /// # Errors
    /// Returns [`Error::Conversion`] if the tail is malformed.
    pub fn recover_data_key(&self, page: &[u8]) -> Result<DataKeyMaterial> {
        let (header_iv, end) = tail::decode_block(page, page.len())?;
        let header_iv: Key = header_iv
            .try_into()
            .map_err(|_| Error::Conversion("header IV is not 16 bytes".into()))?;
        let mut plaintext_with_tail = page[..end].to_vec();
        ctr_apply(&self.root_key, &header_iv, &mut plaintext_with_tail);
        let (data_key, end2) = tail::decode_block(&plaintext_with_tail, plaintext_with_tail.len())?;
        let data_key: Key = data_key
            .try_into()
            .map_err(|_| Error::Conversion("data key is not 16 bytes".into()))?;
        let (data_iv_salt, _) = tail::decode_block(&plaintext_with_tail, end2)?;
        let data_iv_salt: Key = data_iv_salt
            .try_into()
            .map_err(|_| Error::Conversion("data IV salt is not 16 bytes".into()))?;
        Ok(DataKeyMaterial { data_key, data_iv_salt })
    }

    fn encode_data(&self, id: PageId, page: &mut [u8]) -> Result<()> {
        let iv = derive_data_page_iv(&self.data.data_key, &self.data.data_iv_salt, id);
        ctr_apply(&self.data.data_key, &iv, page);
        Ok(())
    }

    fn decode_data(&self, id: PageId, page: &mut [u8]) -> Result<()> {
        // CTR is its own inverse.
        self.encode_data(id, page)
    }
}

impl PageTransform for CryptoProvider {
    fn encode(&self, id: PageId, page: &mut [u8]) -> Result<()> {
        if id.is_header() {
            self.encode_header(page)
        } else {
            self.encode_data(id, page)
        }
    }

    fn decode(&self, id: PageId, page: &mut [u8]) -> Result<()> {
        if id.is_header() {
            self.decode_header(page)
        } else {
            self.decode_data(id, page)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_page_iv_is_deterministic_and_unique_per_id() {
        let key = [1u8; KEY_LEN];
        let salt = [2u8; KEY_LEN];
        let iv_a = derive_data_page_iv(&key, &salt, PageId::new(2));
        let iv_a2 = derive_data_page_iv(&key, &salt, PageId::new(2));
        let iv_b = derive_data_page_iv(&key, &salt, PageId::new(3));
        assert_eq!(iv_a, iv_a2);
        assert_ne!(iv_a, iv_b);
    }

    #[test]
    fn data_page_round_trips() {
        let provider = CryptoProvider::with_generated_root_key();
        let mut page = vec![0x42u8; 64];
        let plaintext = page.clone();
        provider.encode(PageId::new(5), &mut page).unwrap();
        assert_ne!(page, plaintext);
        provider.decode(PageId::new(5), &mut page).unwrap();
        assert_eq!(page, plaintext);
    }

    #[test]
    fn header_page_round_trips_and_recovers_data_key() {
        let provider = CryptoProvider::with_generated_root_key();
        let mut page = vec![0x7eu8; 128];
        let plaintext_body = page.clone();
        provider.encode(PageId::HEADER_0, &mut page).unwrap();

        let recovered = provider.recover_data_key(&page).unwrap();
        assert_eq!(recovered.data_key, provider.data.data_key);
        assert_eq!(recovered.data_iv_salt, provider.data.data_iv_salt);

        provider.decode(PageId::HEADER_0, &mut page).unwrap();
        let body_len = page.len() - (KEY_LEN + 1) * 2;
        assert_eq!(&page[..body_len], &plaintext_body[..body_len]);
    }
}
