//! Boot-entry loader (component I).
//!
//! Parses `/boot/efi/loader/entries/*.conf`, sorts per the UAPI boot-entry
//! specification, and exposes the "next kernel" entry.

use crate::error::Result;
use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BootEntry {
    pub title: Option<String>,
    pub version: String,
    pub sort_key: String,
    pub machine_id: String,
    pub image_path: Option<String>,
    pub initrd_path: Option<String>,
    pub options: String,
}

/// Enumerates every `.conf` file in `entries_dir`; the token-id discovery
/// in `discover_token_id` is a separate step so tests can drive it with a
/// synthetic root.
pub fn load_entries(entries_dir: &Path) -> Result<Vec<BootEntry>> {
    load_entries_filtered(entries_dir, None)
}

/// Like `load_entries`, but when `token_id` is given, only `.conf` files
/// whose basename starts with it are loaded — the UAPI convention systemd
/// uses to namespace entries installed by a given `bootctl`/`kernel-install`
/// token under a shared entries directory.
pub fn load_entries_filtered(entries_dir: &Path, token_id: Option<&str>) -> Result<Vec<BootEntry>> {
    let mut entries = Vec::new();
    if !entries_dir.is_dir() {
        return Ok(entries);
    }
    for dirent in WalkDir::new(entries_dir).min_depth(1).max_depth(1) {
        let dirent = dirent.map_err(|e| {
            let msg = e.to_string();
            e.into_io_error()
                .unwrap_or_else(|| std::io::Error::new(std::io::ErrorKind::Other, msg))
        })?;
        let path = dirent.path().to_path_buf();
        if path.extension().and_then(|e| e.to_str()) != Some("conf") {
            continue;
        }
        if let Some(token) = token_id {
            let basename = path.file_stem().and_then(|s| s.to_str()).unwrap_or("");
            if !basename.starts_with(token) {
                continue;
            }
        }
        let content = std::fs::read_to_string(&path)?;
        entries.push(parse_entry(&content));
    }
    Ok(entries)
}

/// Loads and parses a single `.conf` file directly, for callers (the CLI's
/// `--next-kernel <path>` override) that already know exactly which entry
/// to rehash against rather than discovering it via [`next_kernel`].
pub fn load_entry(path: &Path) -> Result<BootEntry> {
    let content = std::fs::read_to_string(path)?;
    Ok(parse_entry(&content))
}

fn parse_entry(content: &str) -> BootEntry {
    let mut entry = BootEntry::default();
    for line in content.lines() {
        let Some((key, value)) = line.split_once(' ') else {
            continue;
        };
        let value = value.trim().to_string();
        match key {
            "title" => entry.title = Some(value),
            "sort-key" => entry.sort_key = value,
            "machine-id" => entry.machine_id = value,
            "version" => entry.version = value,
            "options" => entry.options = value,
            "linux" => entry.image_path = Some(value),
            "initrd" => entry.initrd_path = Some(value),
            _ => {}
        }
    }
    entry
}

/// Sort entries newest-first: by `(sort_key, machine_id, version)`
/// ascending, with the comparison reversed so the newest kernel leads.
pub fn sort_entries(entries: &mut [BootEntry]) {
    entries.sort_by(|a, b| {
        a.sort_key
            .cmp(&b.sort_key)
            .then_with(|| a.machine_id.cmp(&b.machine_id))
            .then_with(|| vercmp(&a.version, &b.version))
            .reverse()
    });
}

pub fn next_kernel(entries_dir: &Path, token_id: Option<&str>) -> Result<Option<BootEntry>> {
    let mut entries = load_entries_filtered(entries_dir, token_id)?;
    sort_entries(&mut entries);
    Ok(entries.into_iter().next())
}

/// Discover the `token_id` systemd-boot uses to namespace kernels under
/// `/boot/efi/<token>/`: the first of `/etc/kernel/entry-token`,
/// `/etc/os-release:ID`, `/etc/os-release:IMAGE_ID`, or
/// `/etc/machine-id` whose `/boot/efi/<token>/` directory exists.
pub fn discover_token_id(
    entry_token_file: Option<&Path>,
    os_release_file: Option<&Path>,
    machine_id_file: Option<&Path>,
    efi_root: &Path,
) -> Result<Option<String>> {
    let entry_token = entry_token_file
        .filter(|p| p.exists())
        .map(std::fs::read_to_string)
        .transpose()?
        .map(|s| s.trim().to_string());

    let os_release = os_release_file
        .filter(|p| p.exists())
        .map(std::fs::read_to_string)
        .transpose()?
        .unwrap_or_default();
    let os_id = read_os_release_key(&os_release, "ID");
    let image_id = read_os_release_key(&os_release, "IMAGE_ID");

    let machine_id = machine_id_file
        .filter(|p| p.exists())
        .map(std::fs::read_to_string)
        .transpose()?
        .map(|s| s.trim().to_string());

    for candidate in [entry_token, os_id, image_id, machine_id] {
        if let Some(token) = candidate {
            if efi_root.join(&token).is_dir() {
                return Ok(Some(token));
            }
        }
    }
    Ok(None)
}

fn read_os_release_key(content: &str, key: &str) -> Option<String> {
    for line in content.lines() {
        if let Some(rest) = line.strip_prefix(key) {
            let rest = rest.trim_start();
            if let Some(value) = rest.strip_prefix('=') {
                let value = value.trim().trim_matches('"');
                return Some(value.to_string());
            }
        }
    }
    None
}

/// Path to the shared entries directory once the token id is known.
/// `token_id` namespaces which `.conf` files belong to this installation
/// (see `load_entries_filtered`); the directory itself is shared by every
/// token under the ESP's `loader/entries`.
pub fn entries_dir_for_token(efi_root: &Path, _token_id: &str) -> PathBuf {
    efi_root.join("loader").join("entries")
}

fn is_separator(c: char) -> bool {
    matches!(c, '~' | '-' | '^' | '.')
}

fn is_valid(c: char) -> bool {
    c.is_alphanumeric() || is_separator(c)
}

/// The UAPI "improved strverscmp" used to order boot-entry versions.
/// <https://uapi-group.org/specifications/specs/version_format_specification/>
pub fn vercmp(a: &str, b: &str) -> Ordering {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut ai = 0usize;
    let mut bi = 0usize;

    loop {
        while ai < a.len() && !is_valid(a[ai]) {
            ai += 1;
        }
        while bi < b.len() && !is_valid(b[bi]) {
            bi += 1;
        }

        let a_done = ai >= a.len();
        let b_done = bi >= b.len();
        if a_done || b_done {
            if !a_done && a[ai] == '~' {
                return Ordering::Less;
            }
            if !b_done && b[bi] == '~' {
                return Ordering::Greater;
            }
            return a_done.cmp(&b_done).reverse();
        }

        const SEPARATORS: [char; 4] = ['~', '-', '^', '.'];
        let mut matched_separator = false;
        for sep in SEPARATORS {
            if a[ai] == sep || b[bi] == sep {
                let r = (a[ai] != sep).cmp(&(b[bi] != sep));
                if r != Ordering::Equal {
                    return r;
                }
                ai += 1;
                bi += 1;
                matched_separator = true;
                break;
            }
        }
        if matched_separator {
            continue;
        }

        if a[ai].is_ascii_digit() || b[bi].is_ascii_digit() {
            let a_start = ai;
            while ai < a.len() && a[ai].is_ascii_digit() {
                ai += 1;
            }
            let b_start = bi;
            while bi < b.len() && b[bi].is_ascii_digit() {
                bi += 1;
            }

            let r = (a_start == ai).cmp(&(b_start == bi));
            if r != Ordering::Equal {
                return r;
            }

            let a_num: u64 = a[a_start..ai].iter().collect::<String>().parse().unwrap_or(0);
            let b_num: u64 = b[b_start..bi].iter().collect::<String>().parse().unwrap_or(0);
            let r = a_num.cmp(&b_num);
            if r != Ordering::Equal {
                return r;
            }
        } else {
            let a_start = ai;
            while ai < a.len() && a[ai].is_alphabetic() {
                ai += 1;
            }
            let b_start = bi;
            while bi < b.len() && b[bi].is_alphabetic() {
                bi += 1;
            }

            let shared = (ai - a_start).min(bi - b_start);
            let a_str: String = a[a_start..a_start + shared].iter().collect();
            let b_str: String = b[b_start..b_start + shared].iter().collect();
            let r = a_str.cmp(&b_str);
            if r != Ordering::Equal {
                return r;
            }

            let r = (ai - a_start).cmp(&(bi - b_start));
            if r != Ordering::Equal {
                return r;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vercmp_is_antisymmetric() {
        assert_eq!(vercmp("1.0", "1.0"), Ordering::Equal);
        assert_eq!(vercmp("1.0", "1.0.1").reverse(), vercmp("1.0.1", "1.0"));
    }

    #[test]
    fn vercmp_tilde_sorts_older() {
        assert_eq!(vercmp("1.0", "1.0~rc1"), Ordering::Greater);
    }

    #[test]
    fn vercmp_longer_dotted_is_newer() {
        assert_eq!(vercmp("1.0", "1.0.1"), Ordering::Less);
    }

    #[test]
    fn vercmp_dash_suffix_is_newer() {
        assert_eq!(vercmp("1.0", "1.0-1"), Ordering::Less);
    }

    #[test]
    fn boot_entry_sort_picks_expected_next_kernel() {
        let versions = ["6.1.0", "6.1.0~rc2", "6.1.1", "5.14.21-150500"];
        let mut entries: Vec<BootEntry> = versions
            .iter()
            .map(|v| BootEntry {
                version: v.to_string(),
                sort_key: String::new(),
                machine_id: String::new(),
                ..Default::default()
            })
            .collect();
        sort_entries(&mut entries);
        assert_eq!(entries[0].version, "6.1.1");
    }

    #[test]
    fn parses_conf_fields() {
        let content = "title Foo\nsort-key foo\nmachine-id abc123\nversion 6.1.1\noptions ro quiet\nlinux /6.1.1/vmlinuz\ninitrd /6.1.1/initrd\n";
        let entry = parse_entry(content);
        assert_eq!(entry.title.as_deref(), Some("Foo"));
        assert_eq!(entry.version, "6.1.1");
        assert_eq!(entry.image_path.as_deref(), Some("/6.1.1/vmlinuz"));
        assert_eq!(entry.initrd_path.as_deref(), Some("/6.1.1/initrd"));
    }
}
