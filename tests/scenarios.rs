//! End-to-end scenarios exercising the full D→E→G→F pipeline and the
//! boot-entry loader against real files on disk, rather than a single
//! module in isolation.

use pcrpredict::bank::PcrBank;
use pcrpredict::bootentry;
use pcrpredict::buffer::Writer;
use pcrpredict::digest::ALG_SHA256;
use pcrpredict::eventlog::rehash::{rehash, RehashContext};
use pcrpredict::eventlog::{parse_event, EventLogReader};
use pcrpredict::runtime::TestRuntimeSurface;

fn write_spec_id_header(w: &mut Writer) {
    let mut header_body = Vec::new();
    header_body.extend_from_slice(b"Spec ID Event03\0");
    header_body.extend_from_slice(&0u32.to_le_bytes()); // platform class
    header_body.push(0); // spec minor
    header_body.push(2); // spec major
    header_body.push(0); // errata
    header_body.push(8); // uintn size
    header_body.extend_from_slice(&1u32.to_le_bytes()); // algo count
    header_body.extend_from_slice(&ALG_SHA256.to_le_bytes());
    header_body.extend_from_slice(&32u16.to_le_bytes());
    header_body.push(0); // vendor info size

    w.write_u32(0); // pcr index
    w.write_u32(0x0000_0003); // NO_ACTION
    w.write_bytes(&[0u8; 20]); // v1-format digest, ignored once the header switches
    w.write_u32(header_body.len() as u32);
    w.write_bytes(&header_body);
}

fn write_v2_event(w: &mut Writer, pcr: u32, event_type: u32, digest: &[u8; 32], body: &[u8]) {
    w.write_u32(pcr);
    w.write_u32(event_type);
    w.write_u32(1); // one digest
    w.write_u16(ALG_SHA256);
    w.write_bytes(digest);
    w.write_u32(body.len() as u32);
    w.write_bytes(body);
}

/// Scenario: a PCR 8 grub `kernel_cmdline` IPL event, rehashed against a
/// pending boot entry with a new kernel and options, folds into the bank
/// exactly as a fresh TPM extend would.
#[test]
fn grub_kernel_cmdline_event_rehashes_and_folds_into_the_bank() {
    const EVENT_IPL: u32 = 0x0000_000d;

    let mut w = Writer::new();
    write_spec_id_header(&mut w);
    write_v2_event(
        &mut w,
        8,
        EVENT_IPL,
        &[0u8; 32],
        b"kernel_cmdline: (hd0,gpt1)/vmlinuz-old ro quiet",
    );
    let raw = w.into_vec();

    let mut reader = EventLogReader::new();
    let events = reader.read_all(&raw).unwrap();
    assert_eq!(events.len(), 1, "the Spec ID header is not itself an event");

    let registry = reader.registry().clone();
    let algo = registry.lookup_by_name("sha256").unwrap().clone();

    let parsed = parse_event(&events[0]).unwrap().expect("grub command parses");

    let entry = pcrpredict::bootentry::BootEntry {
        image_path: Some("/vmlinuz-new".to_string()),
        options: "ro debug".to_string(),
        ..Default::default()
    };
    let ctx = RehashContext {
        algo: algo.clone(),
        boot_entry: Some(&entry),
        boot_entry_path: None,
        efi_partition_path: std::path::PathBuf::from("/boot/efi"),
    };
    let runtime = TestRuntimeSurface::default();

    let digest = rehash(&registry, &runtime, &ctx, &events[0], &parsed)
        .unwrap()
        .expect("a boot entry is available, so the rehash has a result");

    let expected_event_digest = registry
        .hash(&algo, b"(hd0,gpt1)/vmlinuz-new ro debug")
        .unwrap();
    assert_eq!(digest, expected_event_digest);

    let mut bank = PcrBank::initialize(1 << 8, algo.clone(), None);
    bank.extend(&registry, 8, &digest).unwrap();

    let expected_final = registry
        .extend(&algo, &vec![0u8; 32], &expected_event_digest.bytes)
        .unwrap();
    assert_eq!(bank.get(8).bytes, expected_final.bytes);
}

/// Scenario: an EFI variable event rehashed against a live runtime value
/// that differs from what the historical log recorded.
#[test]
fn efi_variable_event_rehashes_against_the_live_value() {
    const EVENT_EFI_VARIABLE_AUTHORITY: u32 = 0x800_000e0;

    let guid = uuid::Uuid::parse_str("605dab50-e046-4300-abb6-3dd810dd8b23").unwrap();
    let name = "MokListRT";
    let name_utf16: Vec<u8> = name.encode_utf16().flat_map(u16::to_le_bytes).collect();
    let old_value = b"stale-cert-list";

    let mut body = Vec::new();
    body.extend_from_slice(&guid.to_bytes_le());
    body.extend_from_slice(&(name.encode_utf16().count() as u64).to_le_bytes());
    body.extend_from_slice(&(old_value.len() as u64).to_le_bytes());
    body.extend_from_slice(&name_utf16);
    body.extend_from_slice(old_value);

    let mut w = Writer::new();
    write_spec_id_header(&mut w);
    write_v2_event(&mut w, 7, EVENT_EFI_VARIABLE_AUTHORITY, &[0u8; 32], &body);
    let raw = w.into_vec();

    let mut reader = EventLogReader::new();
    let events = reader.read_all(&raw).unwrap();
    let registry = reader.registry().clone();
    let algo = registry.lookup_by_name("sha256").unwrap().clone();

    let parsed = parse_event(&events[0]).unwrap().expect("efi variable parses");

    let ctx = RehashContext {
        algo: algo.clone(),
        boot_entry: None,
        boot_entry_path: None,
        efi_partition_path: std::path::PathBuf::from("/boot/efi"),
    };
    let live_value = b"fresh-cert-list-after-update";
    let mut runtime = TestRuntimeSurface::default();
    runtime.efi_variables.insert(
        format!("MokListRT-{}", guid.hyphenated()),
        live_value.to_vec(),
    );

    let digest = rehash(&registry, &runtime, &ctx, &events[0], &parsed)
        .unwrap()
        .expect("the live variable is present");
    let expected = registry.hash(&algo, live_value).unwrap();
    assert_eq!(digest, expected);
}

/// Scenario: boot entries discovered from real `.conf` files on disk sort
/// to the expected "next kernel", exercising the directory walk
/// (`load_entries`) rather than a hand-built `Vec<BootEntry>`.
#[test]
fn next_kernel_is_discovered_from_conf_files_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let entries_dir = dir.path().join("loader").join("entries");
    std::fs::create_dir_all(&entries_dir).unwrap();

    let versions = ["6.1.0", "6.1.0~rc2", "6.1.1", "5.14.21-150500"];
    for version in versions {
        let content = format!(
            "title Linux {version}\nsort-key linux\nmachine-id abc\nversion {version}\nlinux /{version}/vmlinuz\ninitrd /{version}/initrd\noptions ro quiet\n"
        );
        let path = entries_dir.join(format!("abc-{version}.conf"));
        std::fs::write(path, content).unwrap();
    }

    let next = bootentry::next_kernel(&entries_dir, None).unwrap().unwrap();
    assert_eq!(next.version, "6.1.1");
    assert_eq!(next.image_path.as_deref(), Some("/6.1.1/vmlinuz"));
}
