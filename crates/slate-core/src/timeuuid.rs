//! Time-based v1 UUIDs and their sortable textual rewrite.
//!
//! The canonical v1 layout `tl-tm-thv-cs-node` puts the low time bits first,
//! so canonical strings do not sort chronologically. On write the groups are
//! reordered to `thv'-tm-tl-cs-node` (the version nibble `1` is stripped from
//! the third group and re-inserted on read), giving a `3-4-8-4-12` layout
//! whose lexicographic order matches the embedded timestamp.

use std::sync::OnceLock;
use std::time::{SystemTime, UNIX_EPOCH};

use uuid::{Context, Timestamp, Uuid};

/// Errors for timeuuid parsing and rewriting.
#[derive(Debug, thiserror::Error)]
pub enum TimeuuidError {
    #[error("invalid timeuuid: {0}")]
    Invalid(String),

    #[error("not a version 1 uuid: {0}")]
    NotV1(String),
}

type Result<T> = std::result::Result<T, TimeuuidError>;

/// Process-wide clock-sequence context and node id, created lazily.
fn generator() -> &'static (Context, [u8; 6]) {
    static GEN: OnceLock<(Context, [u8; 6])> = OnceLock::new();
    GEN.get_or_init(|| (Context::new(rand::random()), rand::random()))
}

/// Mints a fresh v1 timeuuid in canonical lowercase hyphenated form.
pub fn mint() -> String {
    let (context, node_id) = generator();
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    let ts = Timestamp::from_unix(context, now.as_secs(), now.subsec_nanos());
    Uuid::new_v1(ts, node_id).hyphenated().to_string()
}

/// Parses and canonicalizes a v1 uuid string (lowercase hyphenated).
fn canonicalize(s: &str) -> Result<String> {
    let uuid = Uuid::parse_str(s).map_err(|_| TimeuuidError::Invalid(s.to_owned()))?;
    if uuid.get_version_num() != 1 {
        return Err(TimeuuidError::NotV1(s.to_owned()));
    }
    Ok(uuid.hyphenated().to_string())
}

/// Rewrites a canonical v1 uuid into its sortable form.
///
/// `tl-tm-1hhh-cs-node` becomes `hhh-tm-tl-cs-node`.
pub fn to_sortable(s: &str) -> Result<String> {
    let c = canonicalize(s)?;
    // Canonical form is ASCII: groups at fixed offsets 8-4-4-4-12.
    Ok(format!(
        "{}-{}-{}-{}",
        &c[15..18],
        &c[9..13],
        &c[0..8],
        &c[19..36],
    ))
}

/// Inverse of [`to_sortable`]: restores the canonical v1 form.
pub fn from_sortable(s: &str) -> Result<String> {
    let bytes = s.as_bytes();
    let hyphens_ok = bytes.len() == 35
        && bytes[3] == b'-'
        && bytes[8] == b'-'
        && bytes[17] == b'-'
        && bytes[22] == b'-';
    if !hyphens_ok {
        return Err(TimeuuidError::Invalid(s.to_owned()));
    }
    let canonical = format!(
        "{}-{}-1{}-{}",
        &s[9..17],
        &s[4..8],
        &s[0..3],
        &s[18..35],
    );
    canonicalize(&canonical)
}

/// Extracts the embedded timestamp of a canonical v1 uuid as Unix
/// milliseconds.
pub fn unix_millis(s: &str) -> Result<i64> {
    let uuid = Uuid::parse_str(s).map_err(|_| TimeuuidError::Invalid(s.to_owned()))?;
    let ts = uuid
        .get_timestamp()
        .ok_or_else(|| TimeuuidError::NotV1(s.to_owned()))?;
    let (secs, nanos) = ts.to_unix();
    Ok(secs as i64 * 1000 + i64::from(nanos) / 1_000_000)
}
