//! Validation for entry names and archive paths
//!
//! Directory records hold a fixed 24-byte, NUL-padded name field, so every
//! name written to disk must be 7-bit printable ASCII and at most 23 bytes
//! long. This module also resolves the companion paths used by the V1 pair
//! and by staged/backup files.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Longest name that still leaves room for the terminating NUL.
pub const MAX_NAME_LEN: usize = 23;

/// Substitute used when sanitising leaves nothing behind.
pub const FALLBACK_NAME: &str = "file.dat";

/// Sanitise an entry name for the on-disk name field
///
/// # Rules
/// - NUL, control characters and anything outside 7-bit ASCII are dropped
/// - Path separators (`\`, `/`) and `|` become `_`
/// - Surrounding whitespace is trimmed
/// - The result is cut to [`MAX_NAME_LEN`] bytes
/// - An empty result becomes [`FALLBACK_NAME`]
///
/// # Examples
///
/// ```
/// use img_factory_rs::validation::sanitize_name;
///
/// assert_eq!(sanitize_name("bad\0/name.dff"), "bad_name.dff");
/// assert_eq!(sanitize_name("\0\0"), "file.dat");
/// ```
pub fn sanitize_name(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .filter_map(|c| match c {
            '\\' | '/' | '|' => Some('_'),
            ' '..='~' => Some(c),
            _ => None,
        })
        .collect();

    let mut cleaned = cleaned.trim().to_string();
    // Everything left is ASCII, so byte truncation stays on a char boundary
    cleaned.truncate(MAX_NAME_LEN);
    let cleaned = cleaned.trim_end().to_string();

    if cleaned.is_empty() {
        FALLBACK_NAME.to_string()
    } else {
        cleaned
    }
}

/// True if `name` would survive [`sanitize_name`] unchanged.
pub fn is_clean_name(name: &str) -> bool {
    sanitize_name(name) == name
}

/// Case-insensitive lookup key for a name.
pub fn name_key(name: &str) -> String {
    name.to_ascii_lowercase()
}

/// Derive a variant of `name` that `taken` rejects, by appending `_1`, `_2`, ...
/// before the extension while staying within [`MAX_NAME_LEN`].
pub fn unique_variant<F>(name: &str, taken: F) -> String
where
    F: Fn(&str) -> bool,
{
    if !taken(name) {
        return name.to_string();
    }

    let (stem, ext) = match name.rfind('.') {
        Some(idx) if idx > 0 => (&name[..idx], &name[idx..]),
        _ => (name, ""),
    };

    let mut counter: u32 = 1;
    loop {
        let marker = format!("_{}", counter);
        // Very long extensions are cut as well so the marker always fits
        let ext_keep = MAX_NAME_LEN.saturating_sub(marker.len()).min(ext.len());
        let ext = &ext[..ext_keep];
        let keep = MAX_NAME_LEN
            .saturating_sub(marker.len() + ext.len())
            .min(stem.len());
        let candidate = format!("{}{}{}", &stem[..keep], marker, ext);
        if !taken(&candidate) {
            return candidate;
        }
        counter += 1;
    }
}

/// Lower-cased extension of a name, without the dot.
pub fn extension_of(name: &str) -> Option<String> {
    name.rfind('.')
        .filter(|&idx| idx + 1 < name.len())
        .map(|idx| name[idx + 1..].to_ascii_lowercase())
}

/// Find the sibling of `path` with extension `ext`, matching case-insensitively
///
/// `gta3.img` finds `gta3.dir`, `GTA3.IMG` finds `GTA3.DIR`. If no sibling
/// exists, `None` is returned.
pub fn find_companion(path: &Path, ext: &str) -> Option<PathBuf> {
    let lower = path.with_extension(ext.to_ascii_lowercase());
    if lower.is_file() {
        return Some(lower);
    }
    let upper = path.with_extension(ext.to_ascii_uppercase());
    if upper.is_file() {
        return Some(upper);
    }
    None
}

/// Sibling path with `ext` as its extension, keeping the case style of the
/// existing extension (`GTA3.IMG` -> `GTA3.DIR`).
pub fn companion_path(path: &Path, ext: &str) -> PathBuf {
    let upper = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| !e.is_empty() && e.chars().all(|c| !c.is_ascii_lowercase()))
        .unwrap_or(false);

    if upper {
        path.with_extension(ext.to_ascii_uppercase())
    } else {
        path.with_extension(ext.to_ascii_lowercase())
    }
}

/// `path` with `.suffix` appended to the full file name (`gta3.img.tmp`).
pub fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = path.file_name().map(OsString::from).unwrap_or_default();
    name.push(".");
    name.push(suffix);
    path.with_file_name(name)
}

/// Staging path used while a rebuild writes a new file.
pub fn staging_path(path: &Path) -> PathBuf {
    with_suffix(path, "tmp")
}

/// True if the path carries the given extension, ignoring case.
pub fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case(ext))
        .unwrap_or(false)
}
