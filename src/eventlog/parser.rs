//! Event parser (component E).
//!
//! Decodes event bodies into typed variants. Each variant owns its own
//! strings (no shared scratch buffers, unlike the C original this was
//! modeled on). A parse failure simply leaves the event unparsed — the
//! rehasher then falls back to reusing the historical digest.

use crate::buffer::Reader;
use crate::error::{PredictError, Result};
use crate::eventlog::reader::{
    Event, EVENT_EFI_BOOT_SERVICES_APPLICATION, EVENT_EFI_BOOT_SERVICES_DRIVER,
    EVENT_EFI_GPT_EVENT, EVENT_EFI_VARIABLE_AUTHORITY, EVENT_EFI_VARIABLE_BOOT,
    EVENT_EFI_VARIABLE_DRIVER_CONFIG, EVENT_IPL, EVENT_TAG,
};
use uuid::Uuid;

pub const LOAD_OPTIONS_EVENT_TAG_ID: u32 = 0x8f3b_22ec;
pub const INITRD_EVENT_TAG_ID: u32 = 0xd6fe_5d2f;

const MAX_ARGV: usize = 64;

/// How the rehash engine should treat an event once parsing has run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RehashStrategy {
    /// Recompute the digest from a live/authoritative source.
    Rehash,
    /// Reuse the raw digest captured in the log verbatim.
    Copy,
    /// Parsing failed; reuse the historical digest and warn.
    ParseFail,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrubCommandSubtype {
    Plain,
    Linux,
    Initrd,
    KernelCmdline,
}

#[derive(Debug, Clone)]
pub struct EfiVariableEvent {
    pub guid: Uuid,
    pub name: String,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct EfiBsaEvent {
    pub image_location: u64,
    pub image_length: u64,
    pub image_link_address: u64,
    pub device_path: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct EfiGptEvent {
    pub raw: Vec<u8>,
}

/// `grub_command.string` in the rehash rebuild covers only the text after
/// the `"keyword: "` prefix (the `arg` half); `original_text` keeps the
/// full line for `describe()` and for the log's fallback digest.
#[derive(Debug, Clone)]
pub struct IplGrubCommandEvent {
    pub subtype: GrubCommandSubtype,
    pub original_text: String,
    pub arg_text: String,
    pub device: Option<String>,
    pub path: Option<String>,
    pub argv: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct IplGrubFileEvent {
    pub device: Option<String>,
    pub path: String,
}

/// Splits a grub file reference of the form `(device)path` or `/path`,
/// matching `__grub_file_parse` in the original event-log reader.
fn parse_grub_file_ref(value: &str) -> Result<(Option<String>, String)> {
    if let Some(rest) = value.strip_prefix('(') {
        let (device, path) = rest
            .split_once(')')
            .ok_or_else(|| PredictError::BadFormat(format!("unterminated device spec: {}", value)))?;
        Ok((Some(device.to_string()), path.to_string()))
    } else if value.starts_with('/') {
        Ok((None, value.to_string()))
    } else {
        Err(PredictError::BadFormat(format!(
            "grub file reference neither absolute nor device-qualified: {}",
            value
        )))
    }
}

#[derive(Debug, Clone)]
pub struct IplShimEvent {
    pub measured_name: String,
}

#[derive(Debug, Clone)]
pub struct IplSystemdEvent {
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagKind {
    LoadOptions,
    Initrd,
}

#[derive(Debug, Clone)]
pub struct TagEvent {
    pub kind: TagKind,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone)]
pub enum ParsedEvent {
    EfiVariable(EfiVariableEvent),
    EfiBsa(EfiBsaEvent),
    EfiGpt(EfiGptEvent),
    IplGrubCommand(IplGrubCommandEvent),
    IplGrubFile(IplGrubFileEvent),
    IplShim(IplShimEvent),
    IplSystemd(IplSystemdEvent),
    Tag(TagEvent),
}

impl ParsedEvent {
    pub fn describe(&self) -> String {
        match self {
            ParsedEvent::EfiVariable(e) => format!("EFI variable {}-{}", e.name, e.guid),
            ParsedEvent::EfiBsa(e) => {
                format!("EFI boot services application at {:#x}", e.image_location)
            }
            ParsedEvent::EfiGpt(_) => "EFI GPT partition table".to_string(),
            ParsedEvent::IplGrubCommand(e) => format!("grub command: {}", e.original_text),
            ParsedEvent::IplGrubFile(e) => format!(
                "grub file load: ({}){}",
                e.device.as_deref().unwrap_or(""),
                e.path
            ),
            ParsedEvent::IplShim(e) => format!("shim variable measurement: {}", e.measured_name),
            ParsedEvent::IplSystemd(e) => format!("systemd load options: {}", e.text),
            ParsedEvent::Tag(e) => format!("tagged event ({:?})", e.kind),
        }
    }
}

/// Parse an event body per its `event_type`/`pcr_index`. Returns `Ok(None)`
/// when the event is a separator/action type this crate does not
/// interpret; returns `Err` only when the body claims to be a recognized
/// variant but is malformed (the caller maps that to `RehashStrategy::ParseFail`).
pub fn parse_event(event: &Event) -> Result<Option<ParsedEvent>> {
    match event.event_type {
        EVENT_EFI_VARIABLE_AUTHORITY | EVENT_EFI_VARIABLE_BOOT | EVENT_EFI_VARIABLE_DRIVER_CONFIG => {
            Ok(Some(ParsedEvent::EfiVariable(parse_efi_variable(
                &event.raw_body,
            )?)))
        }
        EVENT_EFI_BOOT_SERVICES_APPLICATION | EVENT_EFI_BOOT_SERVICES_DRIVER => {
            Ok(Some(ParsedEvent::EfiBsa(parse_efi_bsa(&event.raw_body)?)))
        }
        EVENT_EFI_GPT_EVENT => Ok(Some(ParsedEvent::EfiGpt(EfiGptEvent {
            raw: event.raw_body.clone(),
        }))),
        EVENT_TAG => parse_tag(&event.raw_body).map(|o| o.map(ParsedEvent::Tag)),
        EVENT_IPL => parse_ipl(event.pcr_index, &event.raw_body),
        _ => Ok(None),
    }
}

pub fn rehash_strategy_for(event: &Event, parsed: &Option<ParsedEvent>) -> RehashStrategy {
    if event.raw_body.is_empty() || event.raw_body.first() == Some(&0) {
        return RehashStrategy::Copy;
    }
    match parsed {
        Some(_) => RehashStrategy::Rehash,
        None => RehashStrategy::ParseFail,
    }
}

fn parse_efi_variable(body: &[u8]) -> Result<EfiVariableEvent> {
    let mut r = Reader::new(body);
    let guid_bytes = r.read_bytes(16)?;
    let guid = Uuid::from_bytes_le(guid_bytes.try_into().map_err(|_| {
        PredictError::BadFormat("efi variable guid not 16 bytes".to_string())
    })?);
    let name_len = r.read_u64()? as usize;
    let data_len = r.read_u64()? as usize;
    let name_utf16 = r.read_bytes(name_len * 2)?;
    let data = r.read_bytes(data_len)?;
    let name = utf16le_to_string(&name_utf16)?;
    Ok(EfiVariableEvent { guid, name, data })
}

fn parse_efi_bsa(body: &[u8]) -> Result<EfiBsaEvent> {
    let mut r = Reader::new(body);
    let image_location = r.read_u64()?;
    let image_length = r.read_u64()?;
    let image_link_address = r.read_u64()?;
    let device_path_length = r.read_u64()? as usize;
    let device_path = r.read_bytes(device_path_length)?;
    Ok(EfiBsaEvent {
        image_location,
        image_length,
        image_link_address,
        device_path,
    })
}

fn parse_tag(body: &[u8]) -> Result<Option<TagEvent>> {
    let mut r = Reader::new(body);
    let id = r.read_u32()?;
    let len = r.read_u32()? as usize;
    let data = r.read_bytes(len)?;
    let kind = match id {
        LOAD_OPTIONS_EVENT_TAG_ID => TagKind::LoadOptions,
        INITRD_EVENT_TAG_ID => TagKind::Initrd,
        _ => return Ok(None),
    };
    Ok(Some(TagEvent { kind, data }))
}

fn parse_ipl(pcr_index: u8, body: &[u8]) -> Result<Option<ParsedEvent>> {
    match pcr_index {
        8 => parse_grub_command(body).map(|e| Some(ParsedEvent::IplGrubCommand(e))),
        9 => parse_grub_file(body).map(|e| Some(ParsedEvent::IplGrubFile(e))),
        12 => parse_systemd_load_options(body).map(|e| Some(ParsedEvent::IplSystemd(e))),
        14 => parse_shim(body).map(|e| Some(ParsedEvent::IplShim(e))),
        _ => Ok(None),
    }
}

fn body_as_text(body: &[u8]) -> Result<String> {
    let text = std::str::from_utf8(body)
        .map_err(|_| PredictError::BadFormat("ipl body is not valid utf-8".to_string()))?;
    Ok(text.trim_end_matches('\0').to_string())
}

fn parse_grub_command(body: &[u8]) -> Result<IplGrubCommandEvent> {
    let text = body_as_text(body)?;
    let (keyword, arg) = text
        .split_once(": ")
        .ok_or_else(|| PredictError::BadFormat(format!("grub command missing keyword: {}", text)))?;

    let (subtype, file_ref) = match keyword {
        "grub_cmd" if starts_with_word(arg, "linux") => {
            let rest = &arg["linux".len()..].trim_start_matches(' ');
            (GrubCommandSubtype::Linux, Some(parse_grub_file_ref(rest)?))
        }
        "grub_cmd" if starts_with_word(arg, "initrd") => {
            let rest = &arg["initrd".len()..].trim_start_matches(' ');
            (GrubCommandSubtype::Initrd, Some(parse_grub_file_ref(rest)?))
        }
        "grub_cmd" => (GrubCommandSubtype::Plain, None),
        "kernel_cmdline" => (
            GrubCommandSubtype::KernelCmdline,
            Some(parse_grub_file_ref(arg)?),
        ),
        other => {
            return Err(PredictError::BadFormat(format!(
                "unrecognized grub keyword: {}",
                other
            )))
        }
    };

    let argv: Vec<String> = arg
        .split_whitespace()
        .take(MAX_ARGV)
        .map(|s| s.to_string())
        .collect();

    let (device, path) = match file_ref {
        Some((device, path)) => (device, Some(path)),
        None => (None, None),
    };

    Ok(IplGrubCommandEvent {
        subtype,
        original_text: text,
        arg_text: arg.to_string(),
        device,
        path,
        argv,
    })
}

/// Whether `text` begins with `word` followed by a space — the original
/// reader checks `strncmp(arg, "linux", 5)` then requires the next byte
/// be a space before it treats the remainder as a grub file reference.
fn starts_with_word(text: &str, word: &str) -> bool {
    text.strip_prefix(word)
        .map(|rest| rest.starts_with(' '))
        .unwrap_or(false)
}

fn parse_grub_file(body: &[u8]) -> Result<IplGrubFileEvent> {
    let text = body_as_text(body)?;
    let (device, path) = parse_grub_file_ref(&text)?;
    Ok(IplGrubFileEvent { device, path })
}

fn parse_systemd_load_options(body: &[u8]) -> Result<IplSystemdEvent> {
    Ok(IplSystemdEvent {
        text: utf16le_to_string(body)?,
    })
}

fn parse_shim(body: &[u8]) -> Result<IplShimEvent> {
    Ok(IplShimEvent {
        measured_name: body_as_text(body)?,
    })
}

fn utf16le_to_string(bytes: &[u8]) -> Result<String> {
    if bytes.len() % 2 != 0 {
        return Err(PredictError::BadFormat(
            "utf-16le payload has odd length".to_string(),
        ));
    }
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect();
    let s = String::from_utf16(&units)
        .map_err(|_| PredictError::BadFormat("invalid utf-16le payload".to_string()))?;
    Ok(s.trim_end_matches('\0').to_string())
}

/// Static mapping from a shim-measured variable name to its
/// fully-qualified runtime name, modeled as a lookup table rather than a
/// chain of string comparisons.
pub fn resolve_shim_variable(measured_name: &str) -> Option<&'static str> {
    const TABLE: &[(&str, &str)] = &[
        ("MokListRT", "MokListRT-605dab50-e046-4300-abb6-3dd810dd8b23"),
        (
            "MokListXRT",
            "MokListXRT-605dab50-e046-4300-abb6-3dd810dd8b23",
        ),
        (
            "MokListTrustedRT",
            "MokListTrustedRT-605dab50-e046-4300-abb6-3dd810dd8b23",
        ),
        (
            "SbatLevelRT",
            "SbatLevelRT-605dab50-e046-4300-abb6-3dd810dd8b23",
        ),
        ("SbatLevel", "SbatLevel-605dab50-e046-4300-abb6-3dd810dd8b23"),
        ("MokList", "MokList-605dab50-e046-4300-abb6-3dd810dd8b23"),
        ("MokListX", "MokListX-605dab50-e046-4300-abb6-3dd810dd8b23"),
    ];
    TABLE
        .iter()
        .find(|(measured, _)| *measured == measured_name)
        .map(|(_, full)| *full)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn mk_event(pcr_index: u8, event_type: u32, body: &[u8]) -> Event {
        Event {
            index: 0,
            pcr_index,
            event_type,
            file_offset: 0,
            digests: BTreeMap::new(),
            raw_body: body.to_vec(),
        }
    }

    #[test]
    fn parses_grub_kernel_cmdline() {
        let body = b"kernel_cmdline: (hd0,gpt1)/vmlinuz-old ro quiet";
        let event = mk_event(8, EVENT_IPL, body);
        let parsed = parse_event(&event).unwrap().unwrap();
        match parsed {
            ParsedEvent::IplGrubCommand(cmd) => {
                assert_eq!(cmd.subtype, GrubCommandSubtype::KernelCmdline);
                assert_eq!(cmd.device.as_deref(), Some("hd0,gpt1"));
                assert_eq!(cmd.path.as_deref(), Some("/vmlinuz-old"));
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn parses_grub_file_with_device() {
        let body = b"(hd0,gpt2)/grub2/grub.cfg";
        let event = mk_event(9, EVENT_IPL, body);
        let parsed = parse_event(&event).unwrap().unwrap();
        match parsed {
            ParsedEvent::IplGrubFile(f) => {
                assert_eq!(f.device.as_deref(), Some("hd0,gpt2"));
                assert_eq!(f.path, "/grub2/grub.cfg");
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn empty_body_is_copy_strategy() {
        let event = mk_event(8, EVENT_IPL, &[]);
        let parsed = parse_event(&event).unwrap();
        assert!(parsed.is_none());
        assert_eq!(rehash_strategy_for(&event, &parsed), RehashStrategy::Copy);
    }

    #[test]
    fn unknown_tag_id_is_opaque() {
        let mut body = Vec::new();
        body.extend_from_slice(&0xffff_ffffu32.to_le_bytes());
        body.extend_from_slice(&4u32.to_le_bytes());
        body.extend_from_slice(b"data");
        let event = mk_event(1, EVENT_TAG, &body);
        let parsed = parse_event(&event).unwrap();
        assert!(parsed.is_none());
        assert_eq!(rehash_strategy_for(&event, &parsed), RehashStrategy::ParseFail);
    }

    #[test]
    fn shim_variable_resolves_runtime_name() {
        assert_eq!(
            resolve_shim_variable("MokList"),
            Some("MokList-605dab50-e046-4300-abb6-3dd810dd8b23")
        );
        assert_eq!(resolve_shim_variable("NotReal"), None);
    }
}
