//! PCR bank simulator (component F).
//!
//! Folds event digests into simulated PCR registers per hash algorithm,
//! applying the same reset-time initial conditions TPM 2.0 hardware does.

use crate::digest::{AlgoInfo, AlgoRegistry, Digest};

pub const PCR_BANK_REGISTER_MAX: usize = 24;

/// PCR registers 17..22 are reset to all-0xFF (TPM default for the
/// trusted-OS / DRTM PCRs) rather than zero.
const FF_RESET_PCRS: std::ops::RangeInclusive<usize> = 17..=22;

#[derive(Debug, Clone)]
pub struct PcrBank {
    pub pcr_mask: u32,
    pub valid_mask: u32,
    pub algo: AlgoInfo,
    pub pcr: [Digest; PCR_BANK_REGISTER_MAX],
}

impl PcrBank {
    /// Initialize a bank for `mask` under `algo`, applying reset-time
    /// initial conditions. `pcr0_locality`, if the log carried a
    /// `StartupLocality` record, seeds PCR 0's leading byte.
    pub fn initialize(mask: u32, algo: AlgoInfo, pcr0_locality: Option<u8>) -> Self {
        let pcr = std::array::from_fn(|i| {
            let mut bytes = vec![0u8; algo.digest_size];
            if FF_RESET_PCRS.contains(&i) {
                bytes.fill(0xff);
            } else if i == 0 {
                if let Some(loc) = pcr0_locality {
                    bytes[0] = loc;
                }
            }
            Digest::new(algo.id, bytes)
        });

        PcrBank {
            pcr_mask: mask,
            valid_mask: 0,
            algo,
            pcr,
        }
    }

    pub fn wants_pcr(&self, index: usize) -> bool {
        index < PCR_BANK_REGISTER_MAX && (self.pcr_mask & (1 << index)) != 0
    }

    pub fn is_valid(&self, index: usize) -> bool {
        index < PCR_BANK_REGISTER_MAX && (self.valid_mask & (1 << index)) != 0
    }

    pub fn get(&self, index: usize) -> &Digest {
        &self.pcr[index]
    }

    /// Fold `event_digest` into register `index`: `pcr ← H(pcr || event_digest)`.
    /// A no-op if `index` is not in `pcr_mask`.
    pub fn extend(&mut self, registry: &AlgoRegistry, index: usize, event_digest: &Digest) -> crate::error::Result<()> {
        if !self.wants_pcr(index) {
            return Ok(());
        }
        let folded = registry.extend(&self.algo, &self.pcr[index].bytes, &event_digest.bytes)?;
        self.pcr[index] = folded;
        self.valid_mask |= 1 << index;
        Ok(())
    }

    /// Force every register to zero, used to compute the authorized-policy
    /// digest template (the template must not depend on live register
    /// contents — see the Authorized-policy-invariance property).
    pub fn init_from_zero(mut self) -> Self {
        for d in self.pcr.iter_mut() {
            d.bytes.fill(0);
        }
        self.valid_mask = self.pcr_mask;
        self
    }

    /// Populate from a live snapshot (e.g. `tpm2_pcrread`'s output),
    /// supplied by the caller rather than queried directly here so this
    /// module stays free of any TPM transport dependency.
    pub fn init_from_snapshot(&mut self, values: &[(usize, Vec<u8>)]) {
        for (index, bytes) in values {
            if *index < PCR_BANK_REGISTER_MAX {
                self.pcr[*index] = Digest::new(self.algo.id, bytes.clone());
                self.valid_mask |= 1 << index;
            }
        }
    }

    /// `H(pcr[i0] || pcr[i1] || ...)` over every register in `valid_mask`,
    /// in ascending index order. This is what a trial `PolicyPCR` session
    /// is fed in place of a live PCR read when computing a policy digest
    /// against *predicted* rather than current register contents.
    pub fn composite_digest(&self, registry: &AlgoRegistry) -> crate::error::Result<Digest> {
        let mut buf = Vec::new();
        for i in 0..PCR_BANK_REGISTER_MAX {
            if self.is_valid(i) {
                buf.extend_from_slice(&self.pcr[i].bytes);
            }
        }
        registry.hash(&self.algo, &buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::{ALG_SHA1, ALG_SHA256};

    fn sha1() -> AlgoInfo {
        AlgoRegistry::default().lookup(ALG_SHA1).unwrap().clone()
    }

    #[test]
    fn reset_defaults_match_tcg_convention() {
        let bank = PcrBank::initialize(0x00ff_ffff, sha1(), None);
        assert_eq!(bank.get(0).bytes, vec![0u8; 20]);
        assert_eq!(bank.get(16).bytes, vec![0u8; 20]);
        assert_eq!(bank.get(17).bytes, vec![0xffu8; 20]);
        assert_eq!(bank.get(22).bytes, vec![0xffu8; 20]);
        assert_eq!(bank.get(23).bytes, vec![0u8; 20]);
    }

    #[test]
    fn startup_locality_seeds_pcr0() {
        let bank = PcrBank::initialize(1, sha1(), Some(3));
        assert_eq!(bank.get(0).bytes[0], 3);
        assert_eq!(&bank.get(0).bytes[1..], &[0u8; 19]);
    }

    #[test]
    fn extend_is_noop_outside_mask() {
        let registry = AlgoRegistry::default();
        let mut bank = PcrBank::initialize(1 << 7, sha1(), None);
        let digest = Digest::new(ALG_SHA1, vec![0u8; 20]);
        bank.extend(&registry, 3, &digest).unwrap();
        assert!(!bank.is_valid(3));
        bank.extend(&registry, 7, &digest).unwrap();
        assert!(bank.is_valid(7));
    }

    #[test]
    fn v1_fast_path_matches_known_digest() {
        let registry = AlgoRegistry::default();
        let mut bank = PcrBank::initialize((1 << 0) | (1 << 7), sha1(), None);
        let zero = Digest::new(ALG_SHA1, vec![0u8; 20]);
        bank.extend(&registry, 0, &zero).unwrap();
        bank.extend(&registry, 7, &zero).unwrap();
        let hex: String = bank.get(0).bytes.iter().map(|b| format!("{:02x}", b)).collect();
        assert!(hex.starts_with("9e0e"));
        let hex7: String = bank.get(7).bytes.iter().map(|b| format!("{:02x}", b)).collect();
        assert_eq!(hex, hex7);
    }

    #[test]
    fn determinism_across_fresh_banks() {
        let registry = AlgoRegistry::default();
        let mut a = PcrBank::initialize(0xffff_ff, sha1(), None);
        let mut b = PcrBank::initialize(0xffff_ff, sha1(), None);
        let d1 = Digest::new(ALG_SHA1, vec![1u8; 20]);
        let d2 = Digest::new(ALG_SHA1, vec![2u8; 20]);
        for bank in [&mut a, &mut b] {
            bank.extend(&registry, 4, &d1).unwrap();
            bank.extend(&registry, 4, &d2).unwrap();
        }
        assert_eq!(a.get(4).bytes, b.get(4).bytes);
    }

    #[test]
    fn composite_digest_only_covers_valid_registers() {
        let registry = AlgoRegistry::default();
        let mut bank = PcrBank::initialize((1 << 0) | (1 << 7), sha1(), None);
        let d = Digest::new(ALG_SHA1, vec![5u8; 20]);
        bank.extend(&registry, 0, &d).unwrap();
        let partial = bank.composite_digest(&registry).unwrap();
        bank.extend(&registry, 7, &d).unwrap();
        let full = bank.composite_digest(&registry).unwrap();
        assert_ne!(partial, full);
    }

    #[test]
    fn from_zero_ignores_live_contents() {
        let sha256 = AlgoRegistry::default().lookup(ALG_SHA256).unwrap().clone();
        let bank = PcrBank::initialize(0x3ff, sha256, Some(3)).init_from_zero();
        for i in 0..24 {
            if bank.wants_pcr(i) {
                assert!(bank.get(i).bytes.iter().all(|b| *b == 0));
            }
        }
    }
}
