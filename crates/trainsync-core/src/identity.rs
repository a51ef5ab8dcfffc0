//! Entity and version parsing for job ids, artifact names and URLs.
//!
//! All string-shape knowledge lives here. Everything else works with the
//! typed [`JobReference`] this module produces.
//!
//! # Conventions
//!
//! - Job ids and lora names: `<kind>_<digits>_...` (e.g. `actor_42_1700000000000`)
//! - Storage filenames: `<digits>_..._v<Token>.<ext>` (kind defaults to style)
//!   or `<kind>_<digits>_v<Token>.<ext>`
//! - Stored ids may carry a retry suffix `-e<digits>`

use crate::models::{EntityKey, EntityKind};
use chrono::{DateTime, Utc};
use regex::Regex;
use std::sync::LazyLock;

static ACTOR_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(?:^|[^a-z])actor_(\d+)(?:[_.]|$)").unwrap());

static STYLE_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(?:^|[^a-z])style_(\d+)(?:[_.]|$)").unwrap());

static LEADING_ID: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(\d+)_").unwrap());

static VERSION_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"_([vV][A-Za-z0-9]+)$").unwrap());

static RETRY_SUFFIX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"-e\d+$").unwrap());

/// A parsed reference to the entity that owns a job or artifact.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobReference {
    pub kind: EntityKind,
    pub entity_id: String,
    /// Whether the kind came from an explicit marker rather than the default.
    pub explicit_kind: bool,
}

impl JobReference {
    pub fn key(&self) -> EntityKey {
        EntityKey::new(self.kind, self.entity_id.clone())
    }
}

/// Reduce a URL or path to its final segment, dropping any query string.
pub fn last_segment(input: &str) -> &str {
    let trimmed = input.trim();
    let without_query = trimmed.split(['?', '#']).next().unwrap_or(trimmed);
    without_query
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(without_query)
}

/// Parse an opaque identifier into the entity it belongs to.
///
/// An `actor_` marker wins over a `style_` marker; without either, a leading
/// `<digits>_` is read as a style id. Returns `None` for anything else,
/// including empty input.
pub fn extract_entity(input: &str) -> Option<JobReference> {
    let segment = last_segment(input);
    if segment.is_empty() {
        return None;
    }

    for (marker, kind) in [
        (&*ACTOR_MARKER, EntityKind::Actor),
        (&*STYLE_MARKER, EntityKind::Style),
    ] {
        if let Some(caps) = marker.captures(segment) {
            return Some(JobReference {
                kind,
                entity_id: caps[1].to_string(),
                explicit_kind: true,
            });
        }
    }

    LEADING_ID.captures(segment).map(|caps| JobReference {
        kind: EntityKind::default(),
        entity_id: caps[1].to_string(),
        explicit_kind: false,
    })
}

/// Filename (last segment) without its extension.
pub fn file_stem(filename: &str) -> &str {
    let segment = last_segment(filename);
    match segment.rfind('.') {
        Some(dot) if dot > 0 => &segment[..dot],
        _ => segment,
    }
}

/// Extract the normalized version token (`V<rest>`) from a filename.
///
/// `actor_42_V3.safetensors` gives `V3`; a doubled prefix such as
/// `42_style_VV4.safetensors` is collapsed to `V4`.
pub fn extract_version_token(filename: &str) -> Option<String> {
    let stem = file_stem(filename);
    let caps = VERSION_TOKEN.captures(stem)?;
    let rest = caps[1].trim_start_matches(['V', 'v']);
    if rest.is_empty() {
        return None;
    }
    Some(format!("V{}", rest))
}

/// Drop a trailing `-e<digits>` retry suffix.
pub fn strip_retry_suffix(id: &str) -> &str {
    match RETRY_SUFFIX.find(id) {
        Some(m) => &id[..m.start()],
        None => id,
    }
}

/// Local job reference handed to the provider, and the fallback version id.
///
/// The shape round-trips through [`extract_entity`].
pub fn generate_local_job_id(entity: &EntityKey, now: DateTime<Utc>) -> String {
    format!(
        "{}_{}_{}",
        entity.kind.as_str(),
        entity.entity_id,
        now.timestamp_millis()
    )
}
