//! `pcrpredict` CLI entry point.
//!
//! Dispatches each subcommand through the same pipeline: read the event
//! log (component D), parse each event (E), rehash it against the
//! predicted post-update environment (G), fold the result into a PCR
//! bank (F), then hand the bank to the policy builder (H) and, for
//! `seal`/`sign`/`unseal`, a platform adapter (J).

use std::path::{Path, PathBuf};

use clap::Parser;

use pcrpredict::adapters::{oldgrub, systemd, tpm2key};
use pcrpredict::bank::PcrBank;
use pcrpredict::bootentry::{self, BootEntry};
use pcrpredict::cli::{Cli, Commands};
use pcrpredict::config::{EngineConfig, NextKernel, TargetPlatform};
use pcrpredict::digest::{AlgoInfo, AlgoRegistry};
use pcrpredict::error::{PredictError, Result};
use pcrpredict::eventlog::rehash::{rehash, source_is_mandatory, RehashContext};
use pcrpredict::eventlog::{parse_event, rehash_strategy_for, EventLogReader, RehashStrategy};
use pcrpredict::policy::{PcrSelection, SealedObject, TpmPolicyEngine};
use pcrpredict::runtime::{OsRuntimeSurface, RuntimeSurface};

/// Default location of the firmware-maintained event log on a running
/// Linux system; `predict`/`seal`/`unseal` read from here unless the
/// caller points `--event-log` elsewhere.
fn default_event_log_path() -> PathBuf {
    PathBuf::from("/sys/kernel/security/tpm0/binary_bios_measurements")
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = EngineConfig::load(cli.config.as_deref())?;
    let tcti = cli.tcti.as_deref();

    let result = match &cli.command {
        Commands::Predict {
            algo,
            pcrs,
            event_log,
            rootfs,
            efi_partition,
            next_kernel,
            from_zero,
        } => run_predict(
            &config,
            algo.as_deref(),
            pcrs.as_deref(),
            event_log,
            rootfs,
            efi_partition,
            next_kernel.as_deref(),
            *from_zero,
        ),
        Commands::Seal {
            target,
            algo,
            pcrs,
            input,
            output,
            efi_partition,
        } => run_seal(
            &config,
            tcti,
            target,
            algo.as_deref(),
            pcrs.as_deref(),
            input,
            output,
            efi_partition,
        ),
        Commands::Sign {
            private_key,
            algo,
            pcrs,
            policy_name,
            target,
            output,
        } => run_sign(
            &config,
            tcti,
            private_key,
            algo.as_deref(),
            pcrs.as_deref(),
            policy_name.as_deref(),
            target,
            output,
        ),
        Commands::CreateAuthorizedPolicy {
            public_key,
            algo,
            pcrs,
            output,
        } => run_create_authorized_policy(
            &config,
            tcti,
            public_key,
            algo.as_deref(),
            pcrs.as_deref(),
            output,
        ),
        Commands::StorePublicKey { private_key, output } => run_store_public_key(private_key, output),
        Commands::Unseal {
            target,
            algo,
            pcrs,
            input,
            output,
            signature,
            public_key,
        } => run_unseal(
            &config,
            tcti,
            target,
            algo.as_deref(),
            pcrs.as_deref(),
            input,
            output,
            signature.as_deref(),
            public_key.as_deref(),
        ),
    };

    result.map_err(Into::into)
}

fn resolve_algo(registry: &AlgoRegistry, config: &EngineConfig, cli_algo: Option<&str>) -> Result<AlgoInfo> {
    let name = cli_algo.unwrap_or(&config.algo);
    registry
        .lookup_by_name(name)
        .cloned()
        .ok_or_else(|| PredictError::UnsupportedAlgo(name.to_string()))
}

fn resolve_pcr_mask(config: &EngineConfig, cli_pcrs: Option<&str>) -> Result<u32> {
    match cli_pcrs {
        Some(s) => pcrpredict::config::parse_pcr_mask(s),
        None => Ok(config.pcr_mask),
    }
}

/// Resolves the boot entry the rehasher should substitute kernel/initrd
/// paths against, per `--next-kernel`/the config default.
fn resolve_boot_entry(
    efi_partition: &Path,
    next_kernel: &NextKernel,
) -> Result<(Option<BootEntry>, Option<PathBuf>)> {
    match next_kernel {
        NextKernel::None => Ok((None, None)),
        NextKernel::Path(path) => {
            let entry = bootentry::load_entry(path)?;
            Ok((Some(entry), Some(path.clone())))
        }
        NextKernel::Auto => {
            let entries_dir = efi_partition.join("loader").join("entries");
            let entry = bootentry::next_kernel(&entries_dir, None)?;
            Ok((entry, None))
        }
    }
}

/// Runs the D→E→G→F pipeline over `event_log`, returning the predicted
/// PCR bank.
#[allow(clippy::too_many_arguments)]
fn predict(
    event_log: &Path,
    rootfs: &Path,
    efi_partition: &Path,
    next_kernel: &NextKernel,
    algo_name_override: Option<&str>,
    pcr_mask: u32,
    config: &EngineConfig,
    from_zero: bool,
) -> Result<PcrBank> {
    let raw = std::fs::read(event_log)?;

    let mut reader = EventLogReader::new();
    let events = reader.read_all(&raw)?;
    let registry = reader.registry().clone();
    let info = reader.info();

    let algo = resolve_algo(&registry, config, algo_name_override)?;
    let (boot_entry, boot_entry_path) = resolve_boot_entry(efi_partition, next_kernel)?;

    let runtime = RootedRuntimeSurface::new(efi_partition, rootfs);
    if runtime.secure_boot_enabled() {
        log::info!("secure boot is enabled on this system");
    }

    let ctx = RehashContext {
        algo: algo.clone(),
        boot_entry: boot_entry.as_ref(),
        boot_entry_path: boot_entry_path.as_deref(),
        efi_partition_path: efi_partition.to_path_buf(),
    };

    let mut bank = PcrBank::initialize(pcr_mask, algo.clone(), info.pcr0_locality);
    if from_zero {
        bank = bank.init_from_zero();
    }

    for event in &events {
        if !bank.wants_pcr(event.pcr_index as usize) {
            continue;
        }

        let parsed = match parse_event(event) {
            Ok(p) => p,
            Err(e) => {
                log::warn!(
                    "event {} (pcr {}) failed to parse: {e}; reusing historical digest",
                    event.index,
                    event.pcr_index
                );
                None
            }
        };

        let strategy = rehash_strategy_for(event, &parsed);
        if strategy == RehashStrategy::ParseFail {
            log::warn!(
                "event {} (pcr {}) is an unrecognized variant of a known type; reusing historical digest",
                event.index,
                event.pcr_index
            );
        }

        let digest = match &parsed {
            Some(p) => {
                let computed = rehash(&registry, &runtime, &ctx, event, p)?;
                match computed {
                    Some(d) => d,
                    None if source_is_mandatory(p) => {
                        return Err(PredictError::Unavailable(p.describe()))
                    }
                    None => continue,
                }
            }
            None => match event.digest_for(algo.id) {
                Some(d) => d.clone(),
                None => continue,
            },
        };

        bank.extend(&registry, event.pcr_index as usize, &digest)?;
    }

    Ok(bank)
}

/// Wraps [`OsRuntimeSurface`] so root-filesystem reads go through
/// `--rootfs` rather than the live `/`; every other method delegates
/// straight through to the EFI-partition-rooted surface.
struct RootedRuntimeSurface {
    inner: OsRuntimeSurface,
    rootfs: PathBuf,
}

impl RootedRuntimeSurface {
    fn new(efi_partition: &Path, rootfs: &Path) -> Self {
        RootedRuntimeSurface {
            inner: OsRuntimeSurface::new(efi_partition),
            rootfs: rootfs.to_path_buf(),
        }
    }
}

impl RuntimeSurface for RootedRuntimeSurface {
    fn read_efi_variable(&self, full_name: &str) -> Result<Option<Vec<u8>>> {
        self.inner.read_efi_variable(full_name)
    }

    fn hash_root_fs_file(
        &self,
        path: &Path,
        registry: &AlgoRegistry,
        algo: &AlgoInfo,
    ) -> Result<Option<pcrpredict::digest::Digest>> {
        let rooted = self.rootfs.join(path.strip_prefix("/").unwrap_or(path));
        match std::fs::read(&rooted) {
            Ok(data) => Ok(Some(registry.hash(algo, &data)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn hash_efi_partition_file(
        &self,
        path: &Path,
        registry: &AlgoRegistry,
        algo: &AlgoInfo,
    ) -> Result<Option<pcrpredict::digest::Digest>> {
        self.inner.hash_efi_partition_file(path, registry, algo)
    }

    fn read_efi_partition_file_raw(&self, path: &Path) -> Result<Option<Vec<u8>>> {
        self.inner.read_efi_partition_file_raw(path)
    }

    fn read_gpt_raw(&self) -> Result<Option<Vec<u8>>> {
        self.inner.read_gpt_raw()
    }

    fn secure_boot_enabled(&self) -> bool {
        self.inner.secure_boot_enabled()
    }
}

#[derive(serde::Serialize)]
struct BankSummary {
    algo: String,
    pcr_mask: u32,
    valid_mask: u32,
    pcrs: Vec<PcrSummary>,
}

#[derive(serde::Serialize)]
struct PcrSummary {
    index: usize,
    valid: bool,
    digest: String,
}

fn summarize(bank: &PcrBank) -> BankSummary {
    let pcrs = (0..pcrpredict::bank::PCR_BANK_REGISTER_MAX)
        .filter(|i| bank.wants_pcr(*i))
        .map(|i| PcrSummary {
            index: i,
            valid: bank.is_valid(i),
            digest: hex::encode(&bank.get(i).bytes),
        })
        .collect();
    BankSummary {
        algo: bank.algo.name.clone(),
        pcr_mask: bank.pcr_mask,
        valid_mask: bank.valid_mask,
        pcrs,
    }
}

#[allow(clippy::too_many_arguments)]
fn run_predict(
    config: &EngineConfig,
    algo: Option<&str>,
    pcrs: Option<&str>,
    event_log: &Path,
    rootfs: &Path,
    efi_partition: &Path,
    next_kernel: Option<&str>,
    from_zero: bool,
) -> Result<()> {
    let pcr_mask = resolve_pcr_mask(config, pcrs)?;
    let next_kernel = next_kernel
        .map(NextKernel::parse)
        .unwrap_or_else(|| config.next_kernel.clone());

    let bank = predict(
        event_log,
        rootfs,
        efi_partition,
        &next_kernel,
        algo,
        pcr_mask,
        config,
        from_zero,
    )?;

    log::info!(
        "predicted {} PCR registers under {}",
        bank.valid_mask.count_ones(),
        bank.algo.name
    );
    println!("{}", serde_json::to_string_pretty(&summarize(&bank))?);
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn run_seal(
    config: &EngineConfig,
    tcti: Option<&str>,
    target: &str,
    algo: Option<&str>,
    pcrs: Option<&str>,
    input: &Path,
    output: &Path,
    efi_partition: &Path,
) -> Result<()> {
    let target = TargetPlatform::parse(target)?;
    let pcr_mask = resolve_pcr_mask(config, pcrs)?;

    let event_log = default_event_log_path();
    let bank = predict(
        &event_log,
        Path::new("/"),
        efi_partition,
        &config.next_kernel,
        algo,
        pcr_mask,
        config,
        false,
    )?;

    let mut engine = TpmPolicyEngine::new(tcti)?;
    let policy_digest = engine.pcr_policy_digest(&bank)?;

    let plaintext = std::fs::read(input)?;
    let sealed = engine.seal(&policy_digest, &plaintext)?;

    write_sealed_for_target(target, &sealed, pcr_mask, output)?;
    log::info!("sealed {} bytes to {}", plaintext.len(), output.display());
    Ok(())
}

fn write_sealed_for_target(
    target: TargetPlatform,
    sealed: &SealedObject,
    pcr_mask: u32,
    output: &Path,
) -> Result<()> {
    match target {
        TargetPlatform::Oldgrub => oldgrub::write_sealed(output, sealed),
        TargetPlatform::Tpm2_0 | TargetPlatform::Systemd => {
            let bytes = tpm2key::encode(sealed, Some(pcr_mask), &[])?;
            tpm2key::write(output, &bytes)
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn run_sign(
    config: &EngineConfig,
    tcti: Option<&str>,
    private_key: &Path,
    algo: Option<&str>,
    pcrs: Option<&str>,
    policy_name: Option<&str>,
    target: &str,
    output: &Path,
) -> Result<()> {
    let target = TargetPlatform::parse(target)?;
    let pcr_mask = resolve_pcr_mask(config, pcrs)?;
    let registry = AlgoRegistry::default();
    let algo = resolve_algo(&registry, config, algo)?;
    let policy_name = policy_name.unwrap_or(&config.policy_name);

    let rsa_key = pcrpredict::policy::load_rsa_private_key(private_key)?;
    let public_key = rsa_key.to_public_key();

    let mut engine = TpmPolicyEngine::new(tcti)?;
    let selection = PcrSelection { pcr_mask, algo };
    let digest = pcrpredict::policy::authorized_policy_create(&mut engine, selection, &public_key)?;
    let raw_signature = pcrpredict::policy::sign_policy(&rsa_key, &digest)?;
    let marshalled_signature = pcrpredict::policy::marshall_rsassa_signature(raw_signature)?;

    match target {
        TargetPlatform::Oldgrub => oldgrub::write_signature(output, &marshalled_signature)?,
        TargetPlatform::Tpm2_0 => std::fs::write(output, &marshalled_signature)?,
        TargetPlatform::Systemd => {
            let public_key_bytes = pcrpredict::policy::store_public_key(private_key)?;
            let fingerprint = registry.hash(
                registry.lookup(pcrpredict::digest::ALG_SHA256).unwrap(),
                &public_key_bytes,
            )?;
            systemd::upsert(
                output,
                policy_name,
                pcr_mask,
                &fingerprint.bytes,
                &digest.bytes,
                &marshalled_signature,
            )?;
        }
    }

    log::info!(
        "signed policy for {} PCRs written to {}",
        pcr_mask.count_ones(),
        output.display()
    );
    Ok(())
}

fn run_create_authorized_policy(
    config: &EngineConfig,
    tcti: Option<&str>,
    public_key: &Path,
    algo: Option<&str>,
    pcrs: Option<&str>,
    output: &Path,
) -> Result<()> {
    let pcr_mask = resolve_pcr_mask(config, pcrs)?;
    let registry = AlgoRegistry::default();
    let algo = resolve_algo(&registry, config, algo)?;

    let rsa_public_key = pcrpredict::policy::load_rsa_public_key(public_key)?;
    let mut engine = TpmPolicyEngine::new(tcti)?;
    let selection = PcrSelection { pcr_mask, algo };
    let digest = pcrpredict::policy::authorized_policy_create(&mut engine, selection, &rsa_public_key)?;

    std::fs::write(output, &digest.bytes)?;
    log::info!("authorized-policy digest written to {}", output.display());
    Ok(())
}

fn run_store_public_key(private_key: &Path, output: &Path) -> Result<()> {
    let bytes = pcrpredict::policy::store_public_key(private_key)?;
    std::fs::write(output, &bytes)?;
    log::info!("public key stored at {}", output.display());
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn run_unseal(
    config: &EngineConfig,
    tcti: Option<&str>,
    target: &str,
    algo: Option<&str>,
    pcrs: Option<&str>,
    input: &Path,
    output: &Path,
    signature: Option<&Path>,
    public_key: Option<&Path>,
) -> Result<()> {
    let target = TargetPlatform::parse(target)?;
    let pcr_mask = resolve_pcr_mask(config, pcrs)?;
    let registry = AlgoRegistry::default();
    let algo = resolve_algo(&registry, config, algo)?;

    let event_log = default_event_log_path();
    let bank = predict(
        &event_log,
        Path::new("/"),
        Path::new("/boot/efi"),
        &config.next_kernel,
        Some(&algo.name),
        pcr_mask,
        config,
        false,
    )?;

    let mut engine = TpmPolicyEngine::new(tcti)?;

    let plaintext = match target {
        TargetPlatform::Oldgrub => {
            let sealed = oldgrub::read_sealed(input)?;
            match (signature, public_key) {
                (Some(sig_path), Some(pub_path)) => {
                    let signature_bytes = oldgrub::read_signature(sig_path)?;
                    let public_key_bytes = std::fs::read(pub_path)?;
                    unseal_authorized_raw(&mut engine, &bank, &public_key_bytes, &signature_bytes, &sealed)?
                }
                _ => engine.unseal_secret(&bank, &sealed)?,
            }
        }
        TargetPlatform::Tpm2_0 => {
            let raw = tpm2key::read(input)?;
            let decoded = tpm2key::decode(&raw)?;
            if decoded.alternatives.is_empty() {
                engine.unseal_secret(&bank, &decoded.sealed)?
            } else {
                engine.unseal_policy_seq(&decoded.sealed, &decoded.alternatives)?
            }
        }
        TargetPlatform::Systemd => {
            return Err(PredictError::Unavailable(
                "the systemd target is unsealed by systemd-cryptsetup at boot, not this crate"
                    .to_string(),
            ))
        }
    };

    std::fs::write(output, &plaintext)?;
    log::info!("unsealed {} bytes to {}", plaintext.len(), output.display());
    Ok(())
}

/// Unmarshals `public_key`/`signature` bytes into the TSS structures
/// [`TpmPolicyEngine::unseal_authorized`] expects.
fn unseal_authorized_raw(
    engine: &mut TpmPolicyEngine,
    bank: &PcrBank,
    public_key: &[u8],
    signature: &[u8],
    sealed: &SealedObject,
) -> Result<Vec<u8>> {
    use tss_esapi::structures::{Public as TpmPublic, Signature as TpmSignature};
    use tss_esapi::traits::UnMarshall;

    let public_key = TpmPublic::unmarshall(public_key).map_err(PredictError::from)?;
    let signature = TpmSignature::unmarshall(signature).map_err(PredictError::from)?;
    engine.unseal_authorized(bank, &public_key, &signature, sealed)
}
