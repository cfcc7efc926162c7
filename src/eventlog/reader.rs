//! TCG event-log reader (component D).
//!
//! Streams raw TCG 1.2 / Crypto-Agile events from a firmware event log.
//! Recognizes the "Spec ID Event03" header to switch from the legacy
//! SHA-1-only format to the Crypto-Agile format and to learn non-default
//! algorithm sizes, and captures `StartupLocality` when present. Neither
//! the header nor the locality marker is exposed as a measurement event.

use crate::buffer::Reader;
use crate::digest::{AlgoId, AlgoRegistry, Digest};
use crate::error::{PredictError, Result};
use std::collections::BTreeMap;

pub const EVENT_NO_ACTION: u32 = 0x0000_0003;
pub const EVENT_EFI_VARIABLE_DRIVER_CONFIG: u32 = 0x8000_0001;
pub const EVENT_EFI_VARIABLE_BOOT: u32 = 0x8000_0002;
pub const EVENT_EFI_BOOT_SERVICES_APPLICATION: u32 = 0x8000_0003;
pub const EVENT_EFI_BOOT_SERVICES_DRIVER: u32 = 0x8000_0004;
pub const EVENT_EFI_GPT_EVENT: u32 = 0x8000_0006;
pub const EVENT_EFI_VARIABLE_AUTHORITY: u32 = 0x800_000e0;
pub const EVENT_TAG: u32 = 0x0000_0006;
pub const EVENT_IPL: u32 = 0x0000_000d;

const MAX_EVENT_SIZE: usize = 1024 * 1024;
const SPEC_ID_SIGNATURE: &[u8] = b"Spec ID Event03";
const STARTUP_LOCALITY_SIGNATURE: &[u8] = b"StartupLocality\0";

#[derive(Debug, Clone)]
pub struct Event {
    pub index: usize,
    pub pcr_index: u8,
    pub event_type: u32,
    pub file_offset: u64,
    pub digests: BTreeMap<AlgoId, Digest>,
    pub raw_body: Vec<u8>,
}

impl Event {
    pub fn digest_for(&self, algo_id: AlgoId) -> Option<&Digest> {
        self.digests.get(&algo_id)
    }
}

#[derive(Debug, Default)]
pub struct ReaderInfo {
    pub tpm_version: u8,
    pub pcr0_locality: Option<u8>,
}

pub struct EventLogReader {
    registry: AlgoRegistry,
    tpm_version: u8,
    pcr0_locality: Option<u8>,
}

impl EventLogReader {
    pub fn new() -> Self {
        EventLogReader {
            registry: AlgoRegistry::default(),
            tpm_version: 1,
            pcr0_locality: None,
        }
    }

    pub fn registry(&self) -> &AlgoRegistry {
        &self.registry
    }

    pub fn info(&self) -> ReaderInfo {
        ReaderInfo {
            tpm_version: self.tpm_version,
            pcr0_locality: self.pcr0_locality,
        }
    }

    /// Read every measurement event from a complete in-memory log.
    pub fn read_all(&mut self, data: &[u8]) -> Result<Vec<Event>> {
        let mut reader = Reader::new(data);
        let mut events = Vec::new();
        let mut index = 0usize;
        let mut first = true;

        while !reader.eof() {
            let file_offset = reader.position();
            let pcr_index = reader.read_u32()?;
            let event_type = reader.read_u32()?;

            // The Spec ID Event03 header, if present, is itself read as a
            // v1 (single SHA-1) digest set; only records after it use the
            // Crypto-Agile format the header declares.
            let digests = if self.tpm_version == 1 {
                self.read_v1_digest_set(&mut reader)?
            } else {
                self.read_v2_digest_set(&mut reader)?
            };

            let body_len = reader.read_u32()? as usize;
            if body_len > MAX_EVENT_SIZE {
                return Err(PredictError::BadFormat(format!(
                    "event at offset {} has oversized body ({} bytes)",
                    file_offset, body_len
                )));
            }
            let body = reader.read_bytes(body_len)?;

            if pcr_index == 0 && event_type == EVENT_NO_ACTION {
                if first && self.try_consume_spec_id_header(&body)?.is_some() {
                    first = false;
                    continue;
                }
                if self.try_consume_startup_locality(&body) {
                    first = false;
                    continue;
                }
            }
            first = false;

            if pcr_index > 31 {
                return Err(PredictError::BadFormat(format!(
                    "pcr index {} out of range",
                    pcr_index
                )));
            }

            events.push(Event {
                index,
                pcr_index: pcr_index as u8,
                event_type,
                file_offset,
                digests,
                raw_body: body,
            });
            index += 1;
        }

        Ok(events)
    }

    fn read_v1_digest_set(&self, reader: &mut Reader) -> Result<BTreeMap<AlgoId, Digest>> {
        let bytes = reader.read_bytes(20)?;
        let mut map = BTreeMap::new();
        map.insert(crate::digest::ALG_SHA1, Digest::new(crate::digest::ALG_SHA1, bytes));
        Ok(map)
    }

    fn read_v2_digest_set(&self, reader: &mut Reader) -> Result<BTreeMap<AlgoId, Digest>> {
        let count = reader.read_u32()?;
        let mut map = BTreeMap::new();
        for _ in 0..count {
            let algo_id = reader.read_u16()?;
            let info = self.registry.lookup(algo_id).ok_or_else(|| {
                PredictError::UnsupportedAlgo(format!("unknown algo id {:#06x}", algo_id))
            })?;
            let bytes = reader.read_bytes(info.digest_size)?;
            map.insert(algo_id, Digest::new(algo_id, bytes));
        }
        Ok(map)
    }

    /// Returns `Ok(Some(()))` if `body` was a recognized Spec ID Event03
    /// header and the reader's state was updated; `Ok(None)` if it wasn't
    /// a header at all (caller should treat the record normally).
    fn try_consume_spec_id_header(&mut self, body: &[u8]) -> Result<Option<()>> {
        if body.len() < 16 {
            return Ok(None);
        }
        let sig = &body[..16];
        let mut expected = [0u8; 16];
        expected[..SPEC_ID_SIGNATURE.len()].copy_from_slice(SPEC_ID_SIGNATURE);
        if sig != expected {
            return Ok(None);
        }

        let mut r = Reader::new(&body[16..]);
        let _platform_class = r.read_u32()?;
        let spec_minor = r.read_u8()?;
        let spec_major = r.read_u8()?;
        let _errata = r.read_u8()?;
        let _uintn_size = r.read_u8()?;
        let algo_count = r.read_u32()?;
        let mut table = Vec::with_capacity(algo_count as usize);
        for _ in 0..algo_count {
            let algo_id = r.read_u16()?;
            let digest_size = r.read_u16()? as usize;
            table.push((algo_id, digest_size));
        }
        let _vendor_info_size = r.read_u8().unwrap_or(0);

        for (algo_id, size) in &table {
            if !self.registry.declare(*algo_id, *size) {
                log::warn!(
                    "Spec ID Event03 header declares size {} for algo {:#06x}, but a conflicting built-in size is kept",
                    size, algo_id
                );
            }
        }

        self.tpm_version = spec_major;
        let _ = spec_minor;
        Ok(Some(()))
    }

    fn try_consume_startup_locality(&mut self, body: &[u8]) -> bool {
        if body.len() == STARTUP_LOCALITY_SIGNATURE.len() + 1
            && &body[..STARTUP_LOCALITY_SIGNATURE.len()] == STARTUP_LOCALITY_SIGNATURE
        {
            self.pcr0_locality = Some(body[STARTUP_LOCALITY_SIGNATURE.len()]);
            true
        } else {
            false
        }
    }
}

impl Default for EventLogReader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::Writer;
    use crate::digest::ALG_SHA1;

    fn write_v1_event(w: &mut Writer, pcr: u32, event_type: u32, digest: &[u8; 20], body: &[u8]) {
        w.write_u32(pcr);
        w.write_u32(event_type);
        w.write_bytes(digest);
        w.write_u32(body.len() as u32);
        w.write_bytes(body);
    }

    #[test]
    fn v1_log_round_trip() {
        let mut w = Writer::new();
        write_v1_event(&mut w, 0, 0x0d, &[0u8; 20], b"pcr0-body");
        write_v1_event(&mut w, 7, 0x0d, &[1u8; 20], b"pcr7-body");
        let bytes = w.into_vec();

        let mut reader = EventLogReader::new();
        let events = reader.read_all(&bytes).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].pcr_index, 0);
        assert_eq!(events[0].digest_for(ALG_SHA1).unwrap().bytes, vec![0u8; 20]);
        assert_eq!(events[1].pcr_index, 7);
        assert_eq!(events[1].digest_for(ALG_SHA1).unwrap().bytes, vec![1u8; 20]);
    }

    #[test]
    fn spec_id_header_switches_version_and_is_hidden() {
        let mut header_body = Vec::new();
        header_body.extend_from_slice(b"Spec ID Event03\0");
        header_body.extend_from_slice(&0u32.to_le_bytes()); // platform class
        header_body.push(0); // spec minor
        header_body.push(2); // spec major
        header_body.push(0); // errata
        header_body.push(8); // uintn size
        header_body.extend_from_slice(&1u32.to_le_bytes()); // algo count
        header_body.extend_from_slice(&crate::digest::ALG_SHA256.to_le_bytes());
        header_body.extend_from_slice(&32u16.to_le_bytes());
        header_body.push(0); // vendor info size

        let mut w = Writer::new();
        write_v1_event(&mut w, 0, EVENT_NO_ACTION, &[0u8; 20], &header_body);
        let mut bytes = w.into_vec();

        // Append a v2-format event after the header.
        let mut tail = Writer::new();
        tail.write_u32(7);
        tail.write_u32(0x0d);
        tail.write_u32(1); // digest count
        tail.write_u16(crate::digest::ALG_SHA256);
        tail.write_bytes(&[9u8; 32]);
        tail.write_u32(4);
        tail.write_bytes(b"body");
        bytes.extend_from_slice(&tail.into_vec());

        let mut reader = EventLogReader::new();
        let events = reader.read_all(&bytes).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(reader.info().tpm_version, 2);
        assert_eq!(
            events[0]
                .digest_for(crate::digest::ALG_SHA256)
                .unwrap()
                .bytes,
            vec![9u8; 32]
        );
    }

    #[test]
    fn startup_locality_is_recorded() {
        let mut locality_body = Vec::new();
        locality_body.extend_from_slice(b"StartupLocality\0");
        locality_body.push(3);

        let mut w = Writer::new();
        write_v1_event(&mut w, 0, EVENT_NO_ACTION, &[0u8; 20], &locality_body);
        let bytes = w.into_vec();

        let mut reader = EventLogReader::new();
        let events = reader.read_all(&bytes).unwrap();
        assert!(events.is_empty());
        assert_eq!(reader.info().pcr0_locality, Some(3));
    }

    #[test]
    fn oversized_event_is_fatal() {
        let mut w = Writer::new();
        w.write_u32(0);
        w.write_u32(0x0d);
        w.write_bytes(&[0u8; 20]);
        w.write_u32((1024 * 1024 + 1) as u32);
        let bytes = w.into_vec();

        let mut reader = EventLogReader::new();
        assert!(reader.read_all(&bytes).is_err());
    }
}
