//! Typed engine configuration (component L).
//!
//! [`EngineConfig`] is the one place every setting named in the design's
//! "Configuration recognized by the core" lands. It is built in two
//! layers: [`EngineConfig::default`] seeds every field, an optional TOML
//! file ([`EngineConfigFile`]) overlays whatever it sets, and CLI flags
//! (applied by `main`) have the final word.

use serde::Deserialize;
use std::path::PathBuf;

use crate::error::{PredictError, Result};

/// Which of the three adapters (component J) a `seal`/`sign`/`unseal`
/// invocation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetPlatform {
    Oldgrub,
    Tpm2_0,
    Systemd,
}

impl TargetPlatform {
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "oldgrub" => Ok(TargetPlatform::Oldgrub),
            "tpm2.0" => Ok(TargetPlatform::Tpm2_0),
            "systemd" => Ok(TargetPlatform::Systemd),
            other => Err(PredictError::BadFormat(format!(
                "unknown target platform {other:?}, expected oldgrub, tpm2.0, or systemd"
            ))),
        }
    }
}

impl std::fmt::Display for TargetPlatform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            TargetPlatform::Oldgrub => "oldgrub",
            TargetPlatform::Tpm2_0 => "tpm2.0",
            TargetPlatform::Systemd => "systemd",
        })
    }
}

/// Which kernel/initrd/cmdline the prediction should rehash grub- and
/// systemd-measured events against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NextKernel {
    /// Use the boot entry whose `.conf` lives at this path.
    Path(PathBuf),
    /// Discover the next kernel via the UAPI boot-entry sort (component I).
    Auto,
    /// Do not resolve a boot entry; grub-/systemd-measured events that
    /// need one reuse their historical digest or fail per
    /// `eventlog::rehash::source_is_mandatory`.
    None,
}

impl NextKernel {
    pub fn parse(s: &str) -> Self {
        match s {
            "auto" => NextKernel::Auto,
            "none" => NextKernel::None,
            path => NextKernel::Path(PathBuf::from(path)),
        }
    }
}

/// Typed, fully-resolved configuration driving one invocation of the core.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub algo: String,
    pub pcr_mask: u32,
    pub target_platform: TargetPlatform,
    pub next_kernel: NextKernel,
    pub policy_name: String,
    pub srk_rsa_bits: u16,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            algo: "sha256".to_string(),
            // PCR 0 (firmware/bootloader code) and PCR 9 (boot file
            // measurements) — the minimal selection the original covers
            // by default when neither `--pcrs` nor a config file sets one.
            pcr_mask: (1 << 0) | (1 << 9),
            target_platform: TargetPlatform::Tpm2_0,
            next_kernel: NextKernel::Auto,
            policy_name: "default".to_string(),
            srk_rsa_bits: 2048,
        }
    }
}

/// Raw, partially-populated form loaded from a `--config` TOML file.
/// Every field is optional so the file only needs to mention what it
/// overrides; [`EngineConfig::apply_file`] fills in the rest from
/// [`EngineConfig::default`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct EngineConfigFile {
    pub algo: Option<String>,
    pub pcr_mask: Option<String>,
    pub target_platform: Option<String>,
    pub next_kernel: Option<String>,
    pub policy_name: Option<String>,
    pub srk_rsa_bits: Option<u16>,
}

/// Parses a PCR mask given as `0x...` hex or plain decimal.
pub fn parse_pcr_mask(s: &str) -> Result<u32> {
    let parsed = if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16)
    } else {
        s.parse::<u32>()
    };
    parsed.map_err(|_| PredictError::BadFormat(format!("invalid PCR mask: {s:?}")))
}

impl EngineConfig {
    pub fn load(path: Option<&std::path::Path>) -> Result<Self> {
        let mut config = EngineConfig::default();
        if let Some(path) = path {
            let content = std::fs::read_to_string(path)?;
            let file: EngineConfigFile = toml::from_str(&content)
                .map_err(|e| PredictError::BadFormat(format!("{}: {e}", path.display())))?;
            config.apply_file(file)?;
        }
        Ok(config)
    }

    fn apply_file(&mut self, file: EngineConfigFile) -> Result<()> {
        if let Some(algo) = file.algo {
            self.algo = algo;
        }
        if let Some(mask) = file.pcr_mask {
            self.pcr_mask = parse_pcr_mask(&mask)?;
        }
        if let Some(target) = file.target_platform {
            self.target_platform = TargetPlatform::parse(&target)?;
        }
        if let Some(next_kernel) = file.next_kernel {
            self.next_kernel = NextKernel::parse(&next_kernel);
        }
        if let Some(name) = file.policy_name {
            self.policy_name = name;
        }
        if let Some(bits) = file.srk_rsa_bits {
            self.srk_rsa_bits = bits;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_selects_pcr0_and_pcr9() {
        let config = EngineConfig::default();
        assert_eq!(config.pcr_mask, 0b10_0000_0001);
    }

    #[test]
    fn parses_hex_and_decimal_masks() {
        assert_eq!(parse_pcr_mask("0x201").unwrap(), 0x201);
        assert_eq!(parse_pcr_mask("513").unwrap(), 513);
        assert!(parse_pcr_mask("not-a-number").is_err());
    }

    #[test]
    fn target_platform_round_trips_through_display() {
        for t in [
            TargetPlatform::Oldgrub,
            TargetPlatform::Tpm2_0,
            TargetPlatform::Systemd,
        ] {
            assert_eq!(TargetPlatform::parse(&t.to_string()).unwrap(), t);
        }
    }

    #[test]
    fn file_overlay_overrides_only_set_fields() {
        let mut config = EngineConfig::default();
        config
            .apply_file(EngineConfigFile {
                algo: Some("sha384".to_string()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(config.algo, "sha384");
        assert_eq!(config.policy_name, "default");
    }
}
