//! PE/COFF Authenticode hashing collaborator (used by the EFI BSA
//! rehasher, component G).
//!
//! The design calls this an external collaborator whose contract is to
//! "hash the image's signable region per the Authenticode spec" — the
//! byte ranges a firmware loader measures for `EV_EFI_BOOT_SERVICES_*`
//! events are exactly the ranges Microsoft's Authenticode PE hash
//! excludes the embedded certificate table from. `goblin` parses enough
//! of the COFF/optional header to find those ranges; the hash itself is
//! computed directly from the file bytes because neither `goblin` nor
//! any crate in this pack computes an Authenticode digest on its own.

use goblin::pe::PE;

use crate::digest::{AlgoInfo, AlgoRegistry, Digest};
use crate::error::{PredictError, Result};

/// Offset of `CheckSum` within `IMAGE_OPTIONAL_HEADER`, identical for
/// PE32 and PE32+.
const CHECKSUM_OFFSET: usize = 64;

/// `IMAGE_DIRECTORY_ENTRY_SECURITY`, the certificate table's index into
/// the data directory array.
const SECURITY_DIRECTORY_INDEX: usize = 4;

const PE32_MAGIC: u16 = 0x10b;
const PE32_PLUS_MAGIC: u16 = 0x20b;

/// Computes the Authenticode-style digest of `image` under `algo`: every
/// byte of the file except the `CheckSum` field, the certificate-table
/// data-directory entry, and any attached certificate table itself.
pub fn authenticode_digest(
    registry: &AlgoRegistry,
    algo: &AlgoInfo,
    image: &[u8],
) -> Result<Digest> {
    let pe = PE::parse(image)
        .map_err(|e| PredictError::BadFormat(format!("not a valid PE/COFF image: {e}")))?;

    let header_offset = pe_header_offset(image)?;
    let optional_header_offset = header_offset + 4 + 20; // "PE\0\0" + COFF header
    let magic = read_u16(image, optional_header_offset)?;
    let directories_offset = optional_header_offset
        + match magic {
            PE32_MAGIC => 96,
            PE32_PLUS_MAGIC => 112,
            other => {
                return Err(PredictError::BadFormat(format!(
                    "unrecognized optional header magic {other:#06x}"
                )))
            }
        };
    let security_entry_offset = directories_offset + SECURITY_DIRECTORY_INDEX * 8;
    let checksum_offset = optional_header_offset + CHECKSUM_OFFSET;

    let size_of_headers = pe
        .header
        .optional_header
        .map(|oh| oh.windows_fields.size_of_headers as usize)
        .unwrap_or(image.len());

    let (cert_table_offset, cert_table_size) = read_security_directory(image, security_entry_offset)?;

    let mut buf = Vec::with_capacity(image.len());
    buf.extend_from_slice(&image[..checksum_offset]);
    buf.extend_from_slice(&image[checksum_offset + 4..security_entry_offset]);
    buf.extend_from_slice(&image[security_entry_offset + 8..size_of_headers.min(image.len())]);

    if cert_table_size > 0 && cert_table_offset > size_of_headers {
        let end = cert_table_offset.min(image.len());
        buf.extend_from_slice(&image[size_of_headers.min(image.len())..end]);
        let after_cert = cert_table_offset.saturating_add(cert_table_size);
        if after_cert < image.len() {
            buf.extend_from_slice(&image[after_cert..]);
        }
    } else if size_of_headers < image.len() {
        buf.extend_from_slice(&image[size_of_headers..]);
    }

    registry.hash(algo, &buf)
}

fn pe_header_offset(image: &[u8]) -> Result<usize> {
    if image.len() < 0x40 {
        return Err(PredictError::Truncated(
            "image shorter than a DOS header".to_string(),
        ));
    }
    let offset = u32::from_le_bytes([image[0x3c], image[0x3d], image[0x3e], image[0x3f]]) as usize;
    if offset + 24 > image.len() {
        return Err(PredictError::BadFormat(
            "e_lfanew points past end of file".to_string(),
        ));
    }
    Ok(offset)
}

fn read_u16(image: &[u8], offset: usize) -> Result<u16> {
    image
        .get(offset..offset + 2)
        .map(|b| u16::from_le_bytes([b[0], b[1]]))
        .ok_or_else(|| PredictError::Truncated("optional header magic out of bounds".to_string()))
}

/// Reads the `(VirtualAddress, Size)` pair of the security data
/// directory entry; for this entry `VirtualAddress` is a raw file
/// offset rather than an RVA, per the PE spec.
fn read_security_directory(image: &[u8], offset: usize) -> Result<(usize, usize)> {
    let bytes = image
        .get(offset..offset + 8)
        .ok_or_else(|| PredictError::Truncated("security directory entry out of bounds".to_string()))?;
    let file_offset = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
    let size = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize;
    Ok((file_offset, size))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::ALG_SHA256;

    /// Builds the smallest PE32 image `goblin` will parse: DOS stub,
    /// COFF header, and a minimal optional header with no sections.
    fn minimal_pe32() -> Vec<u8> {
        let mut image = vec![0u8; 0x40 + 4 + 20 + 96 + 16 * 8];
        image[0] = b'M';
        image[1] = b'Z';
        let pe_offset = 0x40u32;
        image[0x3c..0x40].copy_from_slice(&pe_offset.to_le_bytes());

        let pe_off = pe_offset as usize;
        image[pe_off..pe_off + 4].copy_from_slice(b"PE\0\0");
        // COFF header: Machine, NumberOfSections, TimeDateStamp,
        // PointerToSymbolTable, NumberOfSymbols, SizeOfOptionalHeader,
        // Characteristics.
        let coff_off = pe_off + 4;
        image[coff_off..coff_off + 2].copy_from_slice(&0x014cu16.to_le_bytes()); // i386
        let size_of_optional_header = (96 + 16 * 8) as u16;
        image[coff_off + 16..coff_off + 18].copy_from_slice(&size_of_optional_header.to_le_bytes());

        let opt_off = coff_off + 20;
        image[opt_off..opt_off + 2].copy_from_slice(&PE32_MAGIC.to_le_bytes());
        // SizeOfHeaders at offset 60 within optional header.
        let size_of_headers = image.len() as u32;
        image[opt_off + 60..opt_off + 64].copy_from_slice(&size_of_headers.to_le_bytes());
        // CheckSum at offset 64: leave as a nonzero sentinel to prove
        // it's excluded from the hash.
        image[opt_off + 64..opt_off + 68].copy_from_slice(&0xdead_beefu32.to_le_bytes());
        // NumberOfRvaAndSizes at offset 92.
        image[opt_off + 92..opt_off + 96].copy_from_slice(&16u32.to_le_bytes());

        image
    }

    #[test]
    fn checksum_field_does_not_affect_digest() {
        let registry = AlgoRegistry::default();
        let algo = registry.lookup(ALG_SHA256).unwrap();

        let mut a = minimal_pe32();
        let mut b = minimal_pe32();
        let pe_off = 0x40usize;
        let opt_off = pe_off + 4 + 20;
        a[opt_off + 64..opt_off + 68].copy_from_slice(&0x1111_1111u32.to_le_bytes());
        b[opt_off + 64..opt_off + 68].copy_from_slice(&0x2222_2222u32.to_le_bytes());

        let da = authenticode_digest(&registry, algo, &a).unwrap();
        let db = authenticode_digest(&registry, algo, &b).unwrap();
        assert_eq!(da, db);
    }

    #[test]
    fn body_change_changes_digest() {
        let registry = AlgoRegistry::default();
        let algo = registry.lookup(ALG_SHA256).unwrap();

        let mut a = minimal_pe32();
        let b = minimal_pe32();
        *a.last_mut().unwrap() ^= 0xff;

        let da = authenticode_digest(&registry, algo, &a).unwrap();
        let db = authenticode_digest(&registry, algo, &b).unwrap();
        assert_ne!(da, db);
    }
}
