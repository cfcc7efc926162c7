//! Platform adapters (component J).
//!
//! Three named targets serialize a sealed secret and, optionally, a
//! signed PCR policy in the interchange format the corresponding boot
//! chain expects. Each adapter is a thin (de)serializer over bytes the
//! policy builder (component H) already produced — none of them touch
//! the TPM directly.

pub mod oldgrub;
pub mod pe;
pub mod systemd;
pub mod tpm2key;

use crate::config::TargetPlatform;

/// Capability bits a target advertises, matching §4.J's table.
pub type Capabilities = u8;

pub const NEEDS_INPUT_FILE: Capabilities = 1 << 0;
pub const NEEDS_OUTPUT_FILE: Capabilities = 1 << 1;
pub const NEEDS_PCR_SELECTION: Capabilities = 1 << 2;

/// The capability set a given target advertises. `systemd` additionally
/// needs an input file because sealing upserts into an existing JSON
/// document rather than overwriting it (see [`systemd::upsert`]).
pub fn capabilities(target: TargetPlatform) -> Capabilities {
    match target {
        TargetPlatform::Oldgrub => NEEDS_OUTPUT_FILE | NEEDS_PCR_SELECTION,
        TargetPlatform::Tpm2_0 => NEEDS_OUTPUT_FILE | NEEDS_PCR_SELECTION,
        TargetPlatform::Systemd => {
            NEEDS_INPUT_FILE | NEEDS_OUTPUT_FILE | NEEDS_PCR_SELECTION
        }
    }
}

pub fn needs(capabilities: Capabilities, flag: Capabilities) -> bool {
    capabilities & flag != 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn systemd_is_the_only_target_needing_an_input_file() {
        assert!(!needs(
            capabilities(TargetPlatform::Oldgrub),
            NEEDS_INPUT_FILE
        ));
        assert!(!needs(
            capabilities(TargetPlatform::Tpm2_0),
            NEEDS_INPUT_FILE
        ));
        assert!(needs(
            capabilities(TargetPlatform::Systemd),
            NEEDS_INPUT_FILE
        ));
    }
}
