//! Filename slugs, unit ids and library name de-duplication.
//!
//! Generated filenames take the form `{slug}_{millis}_{suffix}.{ext}`.
//! Uniqueness comes from the timestamp and random suffix, never from a
//! store lookup, so concurrent saves cannot collide on the same key.

use std::collections::HashSet;

use crate::error::StoreError;

/// Maximum slug length before the id suffix is appended.
pub const MAX_SLUG_LEN: usize = 30;

/// Length of the random base36 suffix in ids.
pub const SUFFIX_LEN: usize = 9;

const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Lowercase `intent`, collapse every run of non-alphanumerics into a single
/// `_`, then truncate to [`MAX_SLUG_LEN`] characters.
///
/// An intent with no alphanumerics yields `"component"`.
pub fn slugify_intent(intent: &str) -> String {
    let mut slug = String::with_capacity(intent.len());
    let mut in_gap = false;
    for c in intent.chars().flat_map(char::to_lowercase) {
        if c.is_ascii_alphanumeric() {
            slug.push(c);
            in_gap = false;
        } else if !in_gap {
            slug.push('_');
            in_gap = true;
        }
    }

    if !slug.chars().any(|c| c.is_ascii_alphanumeric()) {
        return "component".to_string();
    }

    slug.chars().take(MAX_SLUG_LEN).collect()
}

/// A random base36 string of [`SUFFIX_LEN`] characters.
pub fn random_suffix() -> String {
    let mut n = uuid::Uuid::new_v4().as_u128();
    let mut out = String::with_capacity(SUFFIX_LEN);
    for _ in 0..SUFFIX_LEN {
        out.push(BASE36[(n % 36) as usize] as char);
        n /= 36;
    }
    out
}

/// Fresh generated-unit id: `{unix_millis}_{suffix}`.
pub fn new_unit_id() -> String {
    format!("{}_{}", chrono::Utc::now().timestamp_millis(), random_suffix())
}

/// Fresh library record id: `lib_{unix_millis}_{suffix}`.
pub fn new_library_id() -> String {
    format!("lib_{}", new_unit_id())
}

/// Resolve a fresh filename for `intent`. Returns `(id, filename)`.
pub fn resolve_filename(intent: &str, ext: &str) -> (String, String) {
    let id = new_unit_id();
    let filename = resolve_filename_with_id(intent, &id, ext);
    (id, filename)
}

/// Deterministic variant of [`resolve_filename`] for a known id.
pub fn resolve_filename_with_id(intent: &str, id: &str, ext: &str) -> String {
    format!("{}_{}.{}", slugify_intent(intent), id, ext)
}

/// Pick a name not present in `existing` (the names already used in one
/// category). Appends `_1`, `_2`, ... until free.
pub fn resolve_library_name(requested: &str, existing: &HashSet<String>) -> String {
    if !existing.contains(requested) {
        return requested.to_string();
    }
    let mut n = 1u32;
    loop {
        let candidate = format!("{}_{}", requested, n);
        if !existing.contains(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

/// True when `name` is a single, non-hidden path component.
pub fn is_safe_component(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && !name.contains(['/', '\\', '\0'])
        && name != ".."
}

/// Reject filenames that could escape the storage area.
pub fn validate_filename(name: &str) -> Result<(), StoreError> {
    if is_safe_component(name) {
        Ok(())
    } else {
        Err(StoreError::InvalidFilename(name.to_string()))
    }
}

/// Filename without its final extension.
pub fn file_stem(filename: &str) -> &str {
    match filename.rfind('.') {
        Some(i) if i > 0 => &filename[..i],
        _ => filename,
    }
}
