//! EFI Device Path decoder.
//!
//! `EfiBsaEvent::device_path` (component E) carries the raw binary Device
//! Path the firmware resolved the loaded image from. This crate only
//! needs enough of it to recover a file path on the ESP: walk the node
//! list and concatenate every Media Device Path / File Path (4/4) node's
//! UTF-16LE text, stopping at the End Entire Device Path node.
//!
//! See UEFI Specification §10 ("Device Path Protocol"); this module
//! decodes the subset the BSA rehasher (component G) consumes and
//! ignores every other node type (ACPI, Hardware, Messaging, Media
//! subtypes other than File Path) by skipping over them using their
//! self-declared length.

use crate::error::{PredictError, Result};

const TYPE_MEDIA: u8 = 0x04;
const SUBTYPE_FILE_PATH: u8 = 0x04;
const TYPE_END: u8 = 0x7f;
const SUBTYPE_END_ENTIRE: u8 = 0xff;

/// Decodes the concatenated File Path text of every Media Device Path
/// node in `data`, joined with `\`, matching the on-disk separator the
/// nodes themselves use. Returns `None` if no File Path node is present.
pub fn resolve_file_path(data: &[u8]) -> Result<Option<String>> {
    let mut offset = 0usize;
    let mut segments = Vec::new();

    while offset + 4 <= data.len() {
        let node_type = data[offset];
        let subtype = data[offset + 1];
        let length = u16::from_le_bytes([data[offset + 2], data[offset + 3]]) as usize;

        if length < 4 {
            return Err(PredictError::BadFormat(format!(
                "device path node at offset {offset} declares length {length} < 4"
            )));
        }
        if offset + length > data.len() {
            return Err(PredictError::Truncated(format!(
                "device path node at offset {offset} claims {length} bytes but only {} remain",
                data.len() - offset
            )));
        }

        if node_type == TYPE_END && subtype == SUBTYPE_END_ENTIRE {
            break;
        }

        if node_type == TYPE_MEDIA && subtype == SUBTYPE_FILE_PATH {
            let text_bytes = &data[offset + 4..offset + length];
            segments.push(utf16le_to_string(text_bytes)?);
        }

        offset += length;
    }

    if segments.is_empty() {
        return Ok(None);
    }

    let joined = segments.join("\\");
    Ok(Some(joined.trim_start_matches('\\').replace('\\', "/")))
}

/// Decodes a NUL-terminated UTF-16LE node text field.
fn utf16le_to_string(bytes: &[u8]) -> Result<String> {
    if bytes.len() % 2 != 0 {
        return Err(PredictError::BadFormat(
            "device path text has odd length".to_string(),
        ));
    }
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect();
    let s = String::from_utf16(&units)
        .map_err(|_| PredictError::BadFormat("device path text not valid UTF-16".to_string()))?;
    Ok(s.trim_end_matches('\0').to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file_path_node(text: &str) -> Vec<u8> {
        let mut utf16: Vec<u8> = text
            .encode_utf16()
            .flat_map(|u| u.to_le_bytes())
            .collect();
        utf16.extend_from_slice(&[0, 0]);
        let length = (4 + utf16.len()) as u16;
        let mut node = vec![TYPE_MEDIA, SUBTYPE_FILE_PATH];
        node.extend_from_slice(&length.to_le_bytes());
        node.extend_from_slice(&utf16);
        node
    }

    fn end_node() -> Vec<u8> {
        vec![TYPE_END, SUBTYPE_END_ENTIRE, 4, 0]
    }

    #[test]
    fn single_file_path_node_resolves() {
        let mut data = file_path_node("\\EFI\\BOOT\\BOOTX64.EFI");
        data.extend(end_node());
        let resolved = resolve_file_path(&data).unwrap().unwrap();
        assert_eq!(resolved, "EFI/BOOT/BOOTX64.EFI");
    }

    #[test]
    fn multiple_segments_join_with_separator() {
        let mut data = file_path_node("\\EFI");
        data.extend(file_path_node("fedora\\shimx64.efi"));
        data.extend(end_node());
        let resolved = resolve_file_path(&data).unwrap().unwrap();
        assert_eq!(resolved, "EFI/fedora/shimx64.efi");
    }

    #[test]
    fn no_file_path_node_is_none() {
        // A single opaque Hardware node (type 1, subtype 1) the decoder
        // skips over without recognizing.
        let data = vec![0x01, 0x01, 6, 0, 0xaa, 0xbb];
        assert_eq!(resolve_file_path(&data).unwrap(), None);
    }

    #[test]
    fn truncated_node_is_an_error() {
        let data = vec![TYPE_MEDIA, SUBTYPE_FILE_PATH, 20, 0, 1, 2];
        assert!(resolve_file_path(&data).is_err());
    }
}
