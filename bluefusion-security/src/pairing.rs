use std::collections::HashMap;

use bluefusion_types::Address;
use thiserror::Error;

use crate::bond_store::{BondRecord, BondStore, BondStoreError};

#[derive(Debug, Error)]
pub enum SecurityError {
    #[error(transparent)]
    BondStore(#[from] BondStoreError),
    #[error("no callback registered for pairing method {0:?}")]
    NoCallback(PairingMethod),
    #[error("pairing callback rejected the request")]
    Rejected,
}

/// How a device is paired. Passkey entry is the default; per-address
/// overrides let a device whose UI can't support passkey entry be pinned to
/// numeric comparison, or an unauthenticated device be pinned to Just
/// Works, without a policy rewrite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PairingMethod {
    PasskeyEntry,
    NumericComparison,
    JustWorks,
}

impl Default for PairingMethod {
    fn default() -> Self {
        PairingMethod::PasskeyEntry
    }
}

/// Minimum security level a security-gated operation requires.
#[derive(Debug, Clone, Copy)]
pub struct SecurityRequirement {
    pub min_security_level: u8,
}

pub trait PairingCallback: Send + Sync {
    /// `passkey_request(address, prompt) -> 6-digit code`.
    fn passkey_request(&self, address: Address, prompt: &str) -> Result<String, SecurityError>;
    /// `numeric_comparison(address, code) -> accept?`.
    fn numeric_comparison(&self, address: Address, code: &str) -> Result<bool, SecurityError>;
}

/// Owns the bond store, the named pairing callbacks, and per-address
/// pairing-method overrides.
pub struct SecurityManager {
    bonds: BondStore,
    callback: Box<dyn PairingCallback>,
    method_overrides: HashMap<Address, PairingMethod>,
}

impl SecurityManager {
    pub fn new(bonds: BondStore, callback: Box<dyn PairingCallback>) -> Self {
        SecurityManager { bonds, callback, method_overrides: HashMap::new() }
    }

    pub fn set_pairing_method(&mut self, address: Address, method: PairingMethod) {
        self.method_overrides.insert(address, method);
    }

    pub fn pairing_method(&self, address: &Address) -> PairingMethod {
        self.method_overrides.get(address).copied().unwrap_or_default()
    }

    /// Runs the configured pairing dialog for `address`; on success,
    /// records a bond and persists it. Passkey entry and numeric comparison
    /// produce an `authenticated-enc` bond (security level 2); Just Works
    /// produces an `unauthenticated-enc` bond (security level 1), since it
    /// has no protection against a man-in-the-middle.
    pub fn pair(&mut self, address: Address) -> Result<(), SecurityError> {
        let method = self.pairing_method(&address);
        let accepted = match method {
            PairingMethod::PasskeyEntry => {
                let code = self.callback.passkey_request(address, "Enter the passkey shown on the device")?;
                code.len() == 6 && code.chars().all(|c| c.is_ascii_digit())
            }
            PairingMethod::NumericComparison => {
                let code = format!("{:06}", address.bytes().iter().map(|&b| b as u32).sum::<u32>() % 1_000_000);
                self.callback.numeric_comparison(address, &code)?
            }
            PairingMethod::JustWorks => true,
        };

        if !accepted {
            return Err(SecurityError::Rejected);
        }

        let security_level = if method == PairingMethod::JustWorks { 1 } else { 2 };
        self.bonds.insert(address, BondRecord { security_level, authenticated: method != PairingMethod::JustWorks })?;
        Ok(())
    }

    pub fn check_security_requirements(&self, address: &Address, req: SecurityRequirement) -> bool {
        self.bonds.meets_requirement(address, req.min_security_level)
    }

    pub fn bonds(&self) -> &BondStore {
        &self.bonds
    }

    pub fn bonds_mut(&mut self) -> &mut BondStore {
        &mut self.bonds
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct ScriptedCallback {
        passkey: Mutex<Option<String>>,
        comparison: Mutex<bool>,
    }

    impl PairingCallback for ScriptedCallback {
        fn passkey_request(&self, _address: Address, _prompt: &str) -> Result<String, SecurityError> {
            Ok(self.passkey.lock().unwrap().clone().unwrap_or_default())
        }

        fn numeric_comparison(&self, _address: Address, _code: &str) -> Result<bool, SecurityError> {
            Ok(*self.comparison.lock().unwrap())
        }
    }

    fn addr() -> Address {
        "AA:BB:CC:DD:EE:01".parse().unwrap()
    }

    #[test]
    fn successful_passkey_pairing_records_authenticated_bond() {
        let dir = tempfile::tempdir().unwrap();
        let bonds = BondStore::load(dir.path().join("bonds.json"));
        let callback = ScriptedCallback { passkey: Mutex::new(Some("123456".into())), comparison: Mutex::new(false) };
        let mut manager = SecurityManager::new(bonds, Box::new(callback));

        manager.pair(addr()).unwrap();
        assert!(manager.check_security_requirements(&addr(), SecurityRequirement { min_security_level: 2 }));
    }

    #[test]
    fn malformed_passkey_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let bonds = BondStore::load(dir.path().join("bonds.json"));
        let callback = ScriptedCallback { passkey: Mutex::new(Some("abc".into())), comparison: Mutex::new(false) };
        let mut manager = SecurityManager::new(bonds, Box::new(callback));

        assert!(matches!(manager.pair(addr()), Err(SecurityError::Rejected)));
    }

    #[test]
    fn per_address_override_switches_to_numeric_comparison() {
        let dir = tempfile::tempdir().unwrap();
        let bonds = BondStore::load(dir.path().join("bonds.json"));
        let callback = ScriptedCallback { passkey: Mutex::new(None), comparison: Mutex::new(true) };
        let mut manager = SecurityManager::new(bonds, Box::new(callback));
        manager.set_pairing_method(addr(), PairingMethod::NumericComparison);

        manager.pair(addr()).unwrap();
        assert!(manager.check_security_requirements(&addr(), SecurityRequirement { min_security_level: 1 }));
    }

    #[test]
    fn just_works_override_bonds_unauthenticated() {
        let dir = tempfile::tempdir().unwrap();
        let bonds = BondStore::load(dir.path().join("bonds.json"));
        let callback = ScriptedCallback { passkey: Mutex::new(None), comparison: Mutex::new(false) };
        let mut manager = SecurityManager::new(bonds, Box::new(callback));
        manager.set_pairing_method(addr(), PairingMethod::JustWorks);

        manager.pair(addr()).unwrap();
        assert!(manager.check_security_requirements(&addr(), SecurityRequirement { min_security_level: 1 }));
        assert!(!manager.check_security_requirements(&addr(), SecurityRequirement { min_security_level: 2 }));
    }
}
