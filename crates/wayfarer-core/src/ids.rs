//! Opaque id generation.
//!
//! Events carry a 12-char id; projects without a registry
//! directory fall back to `proj-YYYYMMDD-NNN` sequential ids.

use rand::Rng;
use std::sync::atomic::{AtomicU32, Ordering};
use time::OffsetDateTime;

const ID_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// A random 12-character lowercase-alphanumeric opaque id.
pub fn short_id() -> String {
    let mut rng = rand::thread_rng();
    (0..12)
        .map(|_| ID_ALPHABET[rng.gen_range(0..ID_ALPHABET.len())] as char)
        .collect()
}

/// Per-process monotonic counter backing legacy `proj-YYYYMMDD-NNN` ids.
static LEGACY_PROJECT_SEQ: AtomicU32 = AtomicU32::new(1);

/// Allocate the next legacy project id for `date` (UTC day of `now`).
pub fn next_legacy_project_id(now: OffsetDateTime) -> String {
    let n = LEGACY_PROJECT_SEQ.fetch_add(1, Ordering::SeqCst);
    format!(
        "proj-{:04}{:02}{:02}-{:03}",
        now.year(),
        u8::from(now.month()),
        now.day(),
        n
    )
}

/// Reset the legacy counter. Test-only: production never needs to rewind it.
#[cfg(test)]
pub fn reset_legacy_project_seq() {
    LEGACY_PROJECT_SEQ.store(1, Ordering::SeqCst);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_id_is_twelve_chars() {
        let id = short_id();
        assert_eq!(id.len(), 12);
        assert!(id.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn legacy_ids_increment() {
        reset_legacy_project_seq();
        let now = OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap();
        let a = next_legacy_project_id(now);
        let b = next_legacy_project_id(now);
        assert_ne!(a, b);
        assert!(a.starts_with("proj-"));
    }
}
