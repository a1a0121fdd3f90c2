use aes::Aes128;
use ccm::aead::generic_array::{ArrayLength, GenericArray};
use ccm::aead::{Aead, KeyInit, Payload};
use ccm::consts::{U10, U12, U13, U14, U16, U4, U6, U8};
use ccm::{Ccm, TagSize};
use thiserror::Error;

const KEY_LEN: usize = 16;
const NONCE_LEN: usize = 13;
const VALID_TAG_LENS: [usize; 7] = [4, 6, 8, 10, 12, 14, 16];

#[derive(Debug, Error)]
pub enum CcmError {
    #[error("key must be {KEY_LEN} bytes, got {0}")]
    InvalidKeyLength(usize),
    #[error("nonce must be {NONCE_LEN} bytes, got {0}")]
    InvalidNonceLength(usize),
    #[error("tag length {0} is not one of {VALID_TAG_LENS:?}")]
    InvalidTagLength(usize),
    #[error("ciphertext shorter than the declared tag length")]
    CiphertextTooShort,
    #[error("decryption failed (authentication tag mismatch)")]
    AuthenticationFailed,
}

/// Build the BLE link-layer CCM nonce: `iv[8] || counter[5 LE]`, with the
/// top bit of the counter encoding direction (master->slave = 1).
pub fn build_nonce(iv: [u8; 8], packet_counter: u64, master_to_slave: bool) -> [u8; NONCE_LEN] {
    let counter_le = packet_counter.to_le_bytes();
    let mut counter_bytes = [0u8; 5];
    counter_bytes.copy_from_slice(&counter_le[0..5]);
    if master_to_slave {
        counter_bytes[4] |= 0x80;
    } else {
        counter_bytes[4] &= 0x7F;
    }

    let mut nonce = [0u8; NONCE_LEN];
    nonce[0..8].copy_from_slice(&iv);
    nonce[8..13].copy_from_slice(&counter_bytes);
    nonce
}

fn decrypt_with<M>(key: &[u8], nonce: &[u8], aad: &[u8], ciphertext_and_tag: &[u8]) -> Result<Vec<u8>, CcmError>
where
    M: ArrayLength<u8> + TagSize,
{
    let cipher = Ccm::<Aes128, M, U13>::new(GenericArray::from_slice(key));
    let nonce = GenericArray::from_slice(nonce);
    cipher
        .decrypt(nonce, Payload { msg: ciphertext_and_tag, aad })
        .map_err(|_| CcmError::AuthenticationFailed)
}

/// Decrypt `ciphertext||tag` with the BLE link-layer AAD convention
/// (`header||length`). `tag_len` must be one of the CCM-valid sizes; BLE
/// itself always uses 4.
pub fn decrypt(key: &[u8], nonce: &[u8], aad: &[u8], ciphertext_and_tag: &[u8], tag_len: usize) -> Result<Vec<u8>, CcmError> {
    if key.len() != KEY_LEN {
        return Err(CcmError::InvalidKeyLength(key.len()));
    }
    if nonce.len() != NONCE_LEN {
        return Err(CcmError::InvalidNonceLength(nonce.len()));
    }
    if !VALID_TAG_LENS.contains(&tag_len) {
        return Err(CcmError::InvalidTagLength(tag_len));
    }
    if ciphertext_and_tag.len() < tag_len {
        return Err(CcmError::CiphertextTooShort);
    }

    match tag_len {
        4 => decrypt_with::<U4>(key, nonce, aad, ciphertext_and_tag),
        6 => decrypt_with::<U6>(key, nonce, aad, ciphertext_and_tag),
        8 => decrypt_with::<U8>(key, nonce, aad, ciphertext_and_tag),
        10 => decrypt_with::<U10>(key, nonce, aad, ciphertext_and_tag),
        12 => decrypt_with::<U12>(key, nonce, aad, ciphertext_and_tag),
        14 => decrypt_with::<U14>(key, nonce, aad, ciphertext_and_tag),
        16 => decrypt_with::<U16>(key, nonce, aad, ciphertext_and_tag),
        _ => unreachable!("tag_len already validated"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nonce_sets_direction_bit_for_master_to_slave() {
        let nonce = build_nonce([0u8; 8], 1, true);
        assert_eq!(nonce[12] & 0x80, 0x80);
    }

    #[test]
    fn nonce_clears_direction_bit_for_slave_to_master() {
        let nonce = build_nonce([0u8; 8], 1, false);
        assert_eq!(nonce[12] & 0x80, 0);
    }

    #[test]
    fn rejects_wrong_key_length() {
        let err = decrypt(&[0u8; 10], &[0u8; NONCE_LEN], &[], &[0u8; 4], 4);
        assert!(matches!(err, Err(CcmError::InvalidKeyLength(10))));
    }

    #[test]
    fn rejects_invalid_tag_length() {
        let err = decrypt(&[0u8; KEY_LEN], &[0u8; NONCE_LEN], &[], &[0u8; 20], 5);
        assert!(matches!(err, Err(CcmError::InvalidTagLength(5))));
    }

    #[test]
    fn encrypt_then_decrypt_round_trips() {
        use ccm::aead::Payload;
        let key = [0x42u8; KEY_LEN];
        let nonce = build_nonce([0x11u8; 8], 7, true);
        let aad = [0x01, 0x02];
        let plaintext = b"hello BLE link layer";

        let cipher = Ccm::<Aes128, U4, U13>::new(GenericArray::from_slice(&key));
        let ciphertext = cipher
            .encrypt(GenericArray::from_slice(&nonce), Payload { msg: plaintext, aad: &aad })
            .unwrap();

        let decrypted = decrypt(&key, &nonce, &aad, &ciphertext, 4).unwrap();
        assert_eq!(decrypted, plaintext);
    }
}
