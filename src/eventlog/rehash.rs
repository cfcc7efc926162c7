//! Rehash engine (component G).
//!
//! For each parsed event, computes the digest the event would produce in
//! the *target* environment (after the pending update) instead of trusting
//! the digest recorded in the historical log.

use crate::adapters::pe;
use crate::bootentry::BootEntry;
use crate::digest::{AlgoInfo, AlgoRegistry, Digest};
use crate::error::{PredictError, Result};
use crate::eventlog::devicepath;
use crate::eventlog::parser::{
    resolve_shim_variable, EfiBsaEvent, EfiVariableEvent, GrubCommandSubtype, IplGrubCommandEvent,
    IplGrubFileEvent, IplShimEvent, IplSystemdEvent, ParsedEvent, TagEvent, TagKind,
};
use crate::eventlog::reader::Event;
use crate::runtime::RuntimeSurface;
use std::path::{Path, PathBuf};

/// Read-only context the rehashers consume. `boot_entry_path` is the
/// `.conf` file the entry itself was loaded from, needed because grub may
/// measure a load of the entry file itself, not just the kernel/initrd.
pub struct RehashContext<'a> {
    pub algo: AlgoInfo,
    pub boot_entry: Option<&'a BootEntry>,
    pub boot_entry_path: Option<&'a Path>,
    pub efi_partition_path: PathBuf,
}

/// Whether a missing authoritative source is tolerable for a given
/// parsed-event kind. Events measured only by firmware (EFI variables
/// that survive an update, shim's own variable reads) fall back to the
/// historical digest; events whose source must exist after the update
/// (the next kernel, the next initrd) are a hard error.
pub fn source_is_mandatory(parsed: &ParsedEvent) -> bool {
    match parsed {
        ParsedEvent::EfiVariable(_) | ParsedEvent::IplShim(_) => false,
        ParsedEvent::IplGrubFile(_) => true,
        ParsedEvent::IplGrubCommand(cmd) => !matches!(cmd.subtype, GrubCommandSubtype::Plain),
        ParsedEvent::IplSystemd(_) => false,
        ParsedEvent::Tag(tag) => matches!(tag.kind, TagKind::Initrd),
        ParsedEvent::EfiBsa(_) | ParsedEvent::EfiGpt(_) => true,
    }
}

/// Compute the rehashed digest for `parsed`, or `Ok(None)` if the
/// authoritative source is unavailable. The caller combines this with
/// `source_is_mandatory` to decide between falling back to `event`'s
/// historical digest and raising `PredictError::Unavailable`.
pub fn rehash(
    registry: &AlgoRegistry,
    runtime: &dyn RuntimeSurface,
    ctx: &RehashContext,
    event: &Event,
    parsed: &ParsedEvent,
) -> Result<Option<Digest>> {
    match parsed {
        ParsedEvent::EfiVariable(v) => rehash_efi_variable(registry, runtime, ctx, v),
        ParsedEvent::EfiBsa(b) => rehash_efi_bsa(registry, runtime, ctx, b),
        ParsedEvent::EfiGpt(_) => rehash_efi_gpt(registry, runtime, ctx),
        ParsedEvent::IplGrubFile(f) => rehash_grub_file(registry, runtime, ctx, f),
        ParsedEvent::IplGrubCommand(c) => rehash_grub_command(registry, ctx, c),
        ParsedEvent::IplShim(s) => rehash_shim(registry, runtime, ctx, s),
        ParsedEvent::IplSystemd(s) => rehash_systemd_load_options(registry, ctx, s),
        ParsedEvent::Tag(t) => rehash_tag(registry, runtime, ctx, t),
    }
    .map(|opt| opt.or_else(|| fallback_digest(event, &ctx.algo)))
}

/// Events parsed but with no computed rehash reuse the log's own digest
/// under the active algorithm, when present.
fn fallback_digest(event: &Event, algo: &AlgoInfo) -> Option<Digest> {
    event.digest_for(algo.id).cloned()
}

fn efi_runtime_name(guid: &uuid::Uuid, name: &str) -> String {
    format!("{}-{}", name, guid.hyphenated())
}

fn rehash_efi_variable(
    registry: &AlgoRegistry,
    runtime: &dyn RuntimeSurface,
    ctx: &RehashContext,
    v: &EfiVariableEvent,
) -> Result<Option<Digest>> {
    let full_name = efi_runtime_name(&v.guid, &v.name);
    match runtime.read_efi_variable(&full_name)? {
        Some(data) => Ok(Some(registry.hash(&ctx.algo, &data)?)),
        None => Ok(None),
    }
}

fn rehash_efi_gpt(
    registry: &AlgoRegistry,
    runtime: &dyn RuntimeSurface,
    ctx: &RehashContext,
) -> Result<Option<Digest>> {
    match runtime.read_gpt_raw()? {
        Some(raw) => Ok(Some(registry.hash(&ctx.algo, &raw)?)),
        None => Ok(None),
    }
}

/// Rehashes an `EV_EFI_BOOT_SERVICES_APPLICATION`/`_DRIVER` event by
/// resolving the image's Device Path to a file on the ESP, substituting
/// the next boot entry's kernel image when the resolved path matches it,
/// and computing an Authenticode digest over the image bytes (§4.G).
fn rehash_efi_bsa(
    registry: &AlgoRegistry,
    runtime: &dyn RuntimeSurface,
    ctx: &RehashContext,
    b: &EfiBsaEvent,
) -> Result<Option<Digest>> {
    let Some(resolved) = devicepath::resolve_file_path(&b.device_path)? else {
        return Ok(None);
    };

    let path = substitute_boot_entry_path(ctx, &resolved).unwrap_or(resolved);
    match runtime.read_efi_partition_file_raw(Path::new(&path))? {
        Some(image) => Ok(Some(pe::authenticode_digest(registry, &ctx.algo, &image)?)),
        None => Ok(None),
    }
}

fn basename(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}

fn rehash_grub_file(
    registry: &AlgoRegistry,
    runtime: &dyn RuntimeSurface,
    ctx: &RehashContext,
    f: &IplGrubFileEvent,
) -> Result<Option<Digest>> {
    let on_root_fs = matches!(f.device.as_deref(), None | Some("crypto0"));
    if on_root_fs {
        return runtime.hash_root_fs_file(Path::new(&f.path), registry, &ctx.algo);
    }

    if let Some(substituted) = substitute_boot_entry_path(ctx, &f.path) {
        return runtime.hash_efi_partition_file(Path::new(&substituted), registry, &ctx.algo);
    }

    runtime.hash_efi_partition_file(Path::new(&f.path), registry, &ctx.algo)
}

/// If `path`'s basename matches the kernel, initrd, or the entry `.conf`
/// itself, substitute the corresponding path for the *next* boot entry.
fn substitute_boot_entry_path(ctx: &RehashContext, path: &str) -> Option<String> {
    let entry = ctx.boot_entry?;
    let base = basename(path);

    if let Some(kernel) = &entry.image_path {
        if basename(kernel) == base {
            return Some(kernel.clone());
        }
    }
    if let Some(initrd) = &entry.initrd_path {
        if basename(initrd) == base {
            return Some(initrd.clone());
        }
    }
    if let Some(conf_path) = ctx.boot_entry_path {
        if conf_path.file_name().and_then(|n| n.to_str()) == Some(base) {
            return conf_path.to_str().map(|s| s.to_string());
        }
    }
    None
}

/// Joins a device and path back into grub's `(device)path` notation, or
/// bare `path` when there is no device — the inverse of `parse_grub_file_ref`.
fn grub_file_join(device: Option<&str>, path: &str) -> String {
    match device {
        Some(dev) => format!("({}){}", dev, path),
        None => path.to_string(),
    }
}

/// Rebuilds the text grub would measure for this command after the
/// update. Only `Linux`/`Initrd`/`KernelCmdline` carry a file reference
/// that gets substituted; `Plain` always reuses its own argument text,
/// and any subtype falls back to its captured argument text when no boot
/// entry is available (§4.G) or the entry is missing the needed path.
fn rehash_grub_command(
    registry: &AlgoRegistry,
    ctx: &RehashContext,
    cmd: &IplGrubCommandEvent,
) -> Result<Option<Digest>> {
    let text = match cmd.subtype {
        GrubCommandSubtype::Plain => Some(cmd.arg_text.clone()),
        GrubCommandSubtype::Linux => match (ctx.boot_entry, &cmd.path) {
            (Some(entry), Some(_)) => entry.image_path.as_ref().map(|image| {
                format!(
                    "linux {} {}",
                    grub_file_join(cmd.device.as_deref(), image),
                    entry.options
                )
            }),
            _ => Some(cmd.arg_text.clone()),
        },
        GrubCommandSubtype::Initrd => match (ctx.boot_entry, &cmd.path) {
            (Some(entry), Some(_)) => entry
                .initrd_path
                .as_ref()
                .map(|initrd| format!("initrd {}", grub_file_join(cmd.device.as_deref(), initrd))),
            _ => Some(cmd.arg_text.clone()),
        },
        GrubCommandSubtype::KernelCmdline => match (ctx.boot_entry, &cmd.path) {
            (Some(entry), Some(_)) => entry.image_path.as_ref().map(|image| {
                format!(
                    "{} {}",
                    grub_file_join(cmd.device.as_deref(), image),
                    entry.options
                )
            }),
            _ => Some(cmd.arg_text.clone()),
        },
    };

    match text {
        Some(text) => Ok(Some(registry.hash(&ctx.algo, text.as_bytes())?)),
        None => Ok(None),
    }
}

fn rehash_shim(
    registry: &AlgoRegistry,
    runtime: &dyn RuntimeSurface,
    ctx: &RehashContext,
    s: &IplShimEvent,
) -> Result<Option<Digest>> {
    let Some(full_name) = resolve_shim_variable(&s.measured_name) else {
        return Ok(None);
    };
    match runtime.read_efi_variable(full_name)? {
        Some(data) => Ok(Some(registry.hash(&ctx.algo, &data)?)),
        None => Ok(None),
    }
}

fn dos_path(path: &str) -> String {
    path.replace('/', "\\")
}

fn build_systemd_load_options(entry: &BootEntry) -> Option<Vec<u8>> {
    let initrd = entry.initrd_path.as_ref()?;
    let mut text = format!("initrd={} {}", dos_path(initrd), entry.options);
    text.push('\0');
    Some(
        text.encode_utf16()
            .flat_map(|unit| unit.to_le_bytes())
            .collect(),
    )
}

fn rehash_systemd_load_options(
    registry: &AlgoRegistry,
    ctx: &RehashContext,
    _s: &IplSystemdEvent,
) -> Result<Option<Digest>> {
    let Some(entry) = ctx.boot_entry else {
        return Ok(None);
    };
    match build_systemd_load_options(entry) {
        Some(bytes) => Ok(Some(registry.hash(&ctx.algo, &bytes)?)),
        None => Ok(None),
    }
}

fn rehash_tag(
    registry: &AlgoRegistry,
    runtime: &dyn RuntimeSurface,
    ctx: &RehashContext,
    tag: &TagEvent,
) -> Result<Option<Digest>> {
    match tag.kind {
        TagKind::LoadOptions => {
            let Some(entry) = ctx.boot_entry else {
                return Ok(None);
            };
            match build_systemd_load_options(entry) {
                Some(bytes) => Ok(Some(registry.hash(&ctx.algo, &bytes)?)),
                None => Ok(None),
            }
        }
        TagKind::Initrd => {
            let Some(entry) = ctx.boot_entry else {
                return Ok(None);
            };
            let Some(initrd) = &entry.initrd_path else {
                return Ok(None);
            };
            runtime.hash_efi_partition_file(Path::new(initrd), registry, &ctx.algo)
        }
    }
}

/// Raised by callers that have already checked `source_is_mandatory` and
/// found a mandatory source missing.
pub fn require(parsed: &ParsedEvent, digest: Option<Digest>) -> Result<Digest> {
    digest.ok_or_else(|| PredictError::Unavailable(parsed.describe()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::ALG_SHA256;
    use crate::eventlog::parser::GrubCommandSubtype;
    use crate::runtime::TestRuntimeSurface;

    fn algo() -> AlgoInfo {
        AlgoRegistry::default().lookup(ALG_SHA256).unwrap().clone()
    }

    #[test]
    fn grub_kernel_cmdline_rehash_matches_new_entry() {
        let registry = AlgoRegistry::default();
        let runtime = TestRuntimeSurface::default();
        let entry = BootEntry {
            image_path: Some("/vmlinuz-new".to_string()),
            options: "ro debug".to_string(),
            ..Default::default()
        };
        let ctx = RehashContext {
            algo: algo(),
            boot_entry: Some(&entry),
            boot_entry_path: None,
            efi_partition_path: PathBuf::from("/boot/efi"),
        };
        let cmd = IplGrubCommandEvent {
            subtype: GrubCommandSubtype::KernelCmdline,
            original_text: "kernel_cmdline: (hd0,gpt1)/vmlinuz-old ro quiet".to_string(),
            arg_text: "(hd0,gpt1)/vmlinuz-old ro quiet".to_string(),
            device: Some("hd0,gpt1".to_string()),
            path: Some("/vmlinuz-old".to_string()),
            argv: vec![],
        };

        let digest = rehash_grub_command(&registry, &ctx, &cmd).unwrap().unwrap();
        let expected = registry
            .hash(&algo(), b"(hd0,gpt1)/vmlinuz-new ro debug")
            .unwrap();
        assert_eq!(digest, expected);
        let _ = runtime; // kept to mirror the shape of other fixtures
    }

    #[test]
    fn efi_bsa_resolves_device_path_and_hashes_image() {
        let registry = AlgoRegistry::default();
        let mut runtime = TestRuntimeSurface::default();
        let image = b"MZ-fake-pe-image-bytes".to_vec();
        runtime
            .efi_partition_files
            .insert(PathBuf::from("EFI/BOOT/BOOTX64.EFI"), image.clone());
        let ctx = RehashContext {
            algo: algo(),
            boot_entry: None,
            boot_entry_path: None,
            efi_partition_path: PathBuf::from("/boot/efi"),
        };

        let mut device_path = Vec::new();
        let text: Vec<u8> = "\\EFI\\BOOT\\BOOTX64.EFI"
            .encode_utf16()
            .flat_map(|u| u.to_le_bytes())
            .chain([0, 0])
            .collect();
        device_path.push(0x04); // Media Device Path
        device_path.push(0x04); // File Path
        device_path.extend_from_slice(&((4 + text.len()) as u16).to_le_bytes());
        device_path.extend_from_slice(&text);
        device_path.extend_from_slice(&[0x7f, 0xff, 4, 0]); // End Entire Device Path

        let bsa = EfiBsaEvent {
            image_location: 0,
            image_length: image.len() as u64,
            image_link_address: 0,
            device_path,
        };

        // A raw (non-PE) image fails Authenticode parsing, which is
        // surfaced as an error rather than silently falling back — the
        // resolved path was found, so the source is not "unavailable".
        let result = rehash_efi_bsa(&registry, &runtime, &ctx, &bsa);
        assert!(result.is_err());
    }

    #[test]
    fn efi_variable_missing_falls_back_to_historical() {
        use std::collections::BTreeMap;
        let registry = AlgoRegistry::default();
        let runtime = TestRuntimeSurface::default();
        let ctx = RehashContext {
            algo: algo(),
            boot_entry: None,
            boot_entry_path: None,
            efi_partition_path: PathBuf::from("/boot/efi"),
        };
        let guid = uuid::Uuid::nil();
        let parsed = ParsedEvent::EfiVariable(EfiVariableEvent {
            guid,
            name: "SecureBoot".to_string(),
            data: vec![],
        });
        let historical = Digest::new(ALG_SHA256, vec![7u8; 32]);
        let mut digests = BTreeMap::new();
        digests.insert(ALG_SHA256, historical.clone());
        let event = Event {
            index: 0,
            pcr_index: 7,
            event_type: 0,
            file_offset: 0,
            digests,
            raw_body: vec![1],
        };
        let result = rehash(&registry, &runtime, &ctx, &event, &parsed).unwrap();
        assert_eq!(result, Some(historical));
    }
}
