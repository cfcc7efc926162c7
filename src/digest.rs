//! Digest registry (component A).
//!
//! Maps TCG algorithm IDs to names and digest sizes, and computes digests
//! over byte ranges. Built-in algorithms match the TCG `TPM_ALG_ID`
//! enumeration; unknown IDs observed in a log's "Spec ID Event03" header
//! are registered on the fly with a synthesized name.

use sha1::Sha1;
use sha2::{Digest as Sha2DigestTrait, Sha256, Sha384, Sha512};
use std::collections::HashMap;

pub type AlgoId = u16;

pub const ALG_SHA1: AlgoId = 0x0004;
pub const ALG_SHA256: AlgoId = 0x000b;
pub const ALG_SHA384: AlgoId = 0x000c;
pub const ALG_SHA512: AlgoId = 0x000d;
pub const ALG_SM3_256: AlgoId = 0x0012;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlgoInfo {
    pub id: AlgoId,
    pub name: String,
    pub digest_size: usize,
}

/// A single measured digest: the algorithm it was taken under and its bytes.
///
/// A digest is "invalid" (§3) if every byte is 0x00 or every byte is 0xFF;
/// the bank simulator treats such registers as unused rather than folding
/// them in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Digest {
    pub algo_id: AlgoId,
    pub bytes: Vec<u8>,
}

impl Digest {
    pub fn new(algo_id: AlgoId, bytes: Vec<u8>) -> Self {
        Digest { algo_id, bytes }
    }

    pub fn zero(algo: &AlgoInfo) -> Self {
        Digest {
            algo_id: algo.id,
            bytes: vec![0u8; algo.digest_size],
        }
    }

    pub fn is_sentinel(&self) -> bool {
        self.bytes.iter().all(|b| *b == 0x00) || self.bytes.iter().all(|b| *b == 0xff)
    }
}

/// Registry of known algorithms, seeded with the built-ins and extended by
/// whatever a log's Spec ID Event03 header declares.
#[derive(Debug, Clone)]
pub struct AlgoRegistry {
    known: HashMap<AlgoId, AlgoInfo>,
}

impl Default for AlgoRegistry {
    fn default() -> Self {
        let mut known = HashMap::new();
        for (id, name, size) in [
            (ALG_SHA1, "sha1", 20),
            (ALG_SHA256, "sha256", 32),
            (ALG_SHA384, "sha384", 48),
            (ALG_SHA512, "sha512", 64),
            (ALG_SM3_256, "sm3_256", 32),
        ] {
            known.insert(
                id,
                AlgoInfo {
                    id,
                    name: name.to_string(),
                    digest_size: size,
                },
            );
        }
        AlgoRegistry { known }
    }
}

impl AlgoRegistry {
    pub fn lookup(&self, id: AlgoId) -> Option<&AlgoInfo> {
        self.known.get(&id)
    }

    pub fn lookup_by_name(&self, name: &str) -> Option<&AlgoInfo> {
        self.known.values().find(|a| a.name == name)
    }

    /// Learn about an algorithm declared in a log header. If the id is
    /// already a built-in with a conflicting size, keep the built-in size
    /// and let the caller log a warning.
    pub fn declare(&mut self, id: AlgoId, size: usize) -> bool {
        if let Some(existing) = self.known.get(&id) {
            return existing.digest_size == size;
        }
        self.known.insert(
            id,
            AlgoInfo {
                id,
                name: format!("TPM2_ALG_{:#06x}", id),
                digest_size: size,
            },
        );
        true
    }

    /// Compute a digest over `data` using the named algorithm.
    pub fn hash(&self, algo: &AlgoInfo, data: &[u8]) -> crate::error::Result<Digest> {
        let bytes = match algo.id {
            ALG_SHA1 => Sha1::digest(data).to_vec(),
            ALG_SHA256 => Sha256::digest(data).to_vec(),
            ALG_SHA384 => Sha384::digest(data).to_vec(),
            ALG_SHA512 => Sha512::digest(data).to_vec(),
            _ => {
                return Err(crate::error::PredictError::UnsupportedAlgo(
                    algo.name.clone(),
                ))
            }
        };
        Ok(Digest::new(algo.id, bytes))
    }

    /// Extend-fold two digests: `H(a || b)`.
    pub fn extend(&self, algo: &AlgoInfo, a: &[u8], b: &[u8]) -> crate::error::Result<Digest> {
        let mut buf = Vec::with_capacity(a.len() + b.len());
        buf.extend_from_slice(a);
        buf.extend_from_slice(b);
        self.hash(algo, &buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_sizes() {
        let reg = AlgoRegistry::default();
        assert_eq!(reg.lookup(ALG_SHA1).unwrap().digest_size, 20);
        assert_eq!(reg.lookup(ALG_SHA256).unwrap().digest_size, 32);
    }

    #[test]
    fn declare_unknown_registers_synthetic_name() {
        let mut reg = AlgoRegistry::default();
        assert!(reg.declare(0x0099, 16));
        let info = reg.lookup(0x0099).unwrap();
        assert_eq!(info.digest_size, 16);
        assert!(info.name.starts_with("TPM2_ALG_"));
    }

    #[test]
    fn declare_conflicting_builtin_keeps_builtin() {
        let mut reg = AlgoRegistry::default();
        assert!(!reg.declare(ALG_SHA256, 16));
        assert_eq!(reg.lookup(ALG_SHA256).unwrap().digest_size, 32);
    }

    #[test]
    fn sentinel_detection() {
        let d = Digest::new(ALG_SHA256, vec![0u8; 32]);
        assert!(d.is_sentinel());
        let d = Digest::new(ALG_SHA256, vec![0xffu8; 32]);
        assert!(d.is_sentinel());
        let mut bytes = vec![0u8; 32];
        bytes[0] = 1;
        let d = Digest::new(ALG_SHA256, bytes);
        assert!(!d.is_sentinel());
    }

    #[test]
    fn sha1_of_two_zero_blocks_matches_known_vector() {
        let reg = AlgoRegistry::default();
        let algo = reg.lookup(ALG_SHA1).unwrap();
        let zero20 = vec![0u8; 20];
        let digest = reg.extend(algo, &zero20, &zero20).unwrap();
        let hex: String = digest.bytes.iter().map(|b| format!("{:02x}", b)).collect();
        assert!(hex.starts_with("9e0e"));
    }
}
