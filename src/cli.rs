//! Command-line surface (component K).
//!
//! Thin by design: every subcommand only parses its arguments and a
//! `--config` overlay, then calls into `bank`/`eventlog`/`policy`/
//! `adapters` — none of the prediction or sealing logic lives here.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "pcrpredict")]
#[command(about = "Predicts post-update TPM PCR values and seals secrets under the resulting policy", long_about = None)]
pub struct Cli {
    /// Optional TOML configuration file overlaying the built-in defaults.
    #[arg(long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    /// TCTI locator for the TPM (e.g. `device:/dev/tpmrm0`); defaults to
    /// the `TCTI`/`TPM2TOOLS_TCTI` environment variable.
    #[arg(long, global = true)]
    pub tcti: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Predict post-update PCR values from an event log, printing the
    /// resulting bank as JSON on stdout.
    Predict {
        /// Hash algorithm the prediction runs under (`sha1`, `sha256`, ...).
        #[arg(long)]
        algo: Option<String>,

        /// PCR selection, as a `0x`-prefixed hex mask or plain decimal.
        #[arg(long)]
        pcrs: Option<String>,

        /// Firmware TCG event log to replay.
        #[arg(long, value_name = "PATH")]
        event_log: PathBuf,

        /// Root filesystem mount point consulted for grub/file rehashes.
        #[arg(long, value_name = "PATH", default_value = "/")]
        rootfs: PathBuf,

        /// EFI system partition mount point.
        #[arg(long, value_name = "PATH", default_value = "/boot/efi")]
        efi_partition: PathBuf,

        /// Which boot entry to rehash grub-/systemd-measured events
        /// against: a `.conf` path, `auto` (UAPI sort), or `none`.
        #[arg(long)]
        next_kernel: Option<String>,

        /// Start the bank from an all-zero snapshot instead of TPM reset
        /// defaults (used to compute policy templates independent of
        /// live register contents).
        #[arg(long)]
        from_zero: bool,
    },

    /// Predict, build a direct `PolicyPCR` policy, seal a secret under it,
    /// and write the sealed object via the chosen platform adapter.
    Seal {
        #[arg(long)]
        target: String,

        #[arg(long)]
        algo: Option<String>,

        #[arg(long)]
        pcrs: Option<String>,

        /// File holding the plaintext secret to seal.
        #[arg(long, value_name = "PATH")]
        input: PathBuf,

        /// Where to write the sealed object.
        #[arg(long, value_name = "PATH")]
        output: PathBuf,

        #[arg(long, value_name = "PATH", default_value = "/boot/efi")]
        efi_partition: PathBuf,
    },

    /// Compute an authorized-policy digest for a zero bank and the given
    /// PCR selection, sign it with a private key, and write the
    /// signed-policy container for the chosen target.
    Sign {
        /// PEM-encoded RSA private key used to sign the policy digest.
        #[arg(long, value_name = "PATH")]
        private_key: PathBuf,

        #[arg(long)]
        algo: Option<String>,

        #[arg(long)]
        pcrs: Option<String>,

        /// Label recorded alongside the signed policy (`systemd` target).
        #[arg(long)]
        policy_name: Option<String>,

        #[arg(long)]
        target: String,

        #[arg(long, value_name = "PATH")]
        output: PathBuf,
    },

    /// Build a standalone authorized-policy digest, independent of
    /// sealing any particular secret.
    CreateAuthorizedPolicy {
        #[arg(long, value_name = "PATH")]
        public_key: PathBuf,

        #[arg(long)]
        algo: Option<String>,

        #[arg(long)]
        pcrs: Option<String>,

        #[arg(long, value_name = "PATH")]
        output: PathBuf,
    },

    /// Extract and store an RSA signing key's TPM2B_PUBLIC form, so later
    /// unseal/authorize operations don't need the private key on hand.
    StorePublicKey {
        #[arg(long, value_name = "PATH")]
        private_key: PathBuf,

        #[arg(long, value_name = "PATH")]
        output: PathBuf,
    },

    /// Unseal a secret sealed under any of the three supported policy
    /// shapes (direct PCR, authorized, or embedded policy sequence).
    Unseal {
        #[arg(long)]
        target: String,

        #[arg(long)]
        algo: Option<String>,

        #[arg(long)]
        pcrs: Option<String>,

        #[arg(long, value_name = "PATH")]
        input: PathBuf,

        #[arg(long, value_name = "PATH")]
        output: PathBuf,

        /// Standalone signature file, required by the `oldgrub` target's
        /// authorized-policy unseal path.
        #[arg(long, value_name = "PATH")]
        signature: Option<PathBuf>,

        /// Public key matching the signature, for the authorized path.
        #[arg(long, value_name = "PATH")]
        public_key: Option<PathBuf>,
    },
}
