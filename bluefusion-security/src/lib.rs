//! Bond store, pairing orchestration, and the BLE AES-CCM/XOR crypto
//! helpers.

mod ble_ccm;
mod bond_store;
mod pairing;
mod xor;

pub use ble_ccm::{build_nonce, decrypt as ccm_decrypt, CcmError};
pub use bond_store::{BondRecord, BondStore, BondStoreError};
pub use pairing::{PairingCallback, PairingMethod, SecurityError, SecurityManager, SecurityRequirement};
pub use xor::{
    analyze_key_length_candidates, decrypt_counter_incrementing, decrypt_repeating, likely_key_lengths,
    recover_key_known_plaintext, KeyLengthCandidate,
};
