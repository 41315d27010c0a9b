//! Backend identifiers and the namespacing scheme that projects
//! `(BackendId, OriginalIdentifier)` pairs into the gateway's single flat
//! identifier space (spec §3, §6.3).

use std::fmt;

/// A configured backend's stable name, e.g. `"filesystem"`.
///
/// Must match `[A-Za-z][A-Za-z0-9_-]{2,63}` so it can never collide with
/// the `_` namespace separator ambiguously.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct BackendId(String);

impl BackendId {
    pub fn new(raw: impl Into<String>) -> Result<Self, BackendIdError> {
        let raw = raw.into();
        if is_valid_backend_id(&raw) {
            Ok(Self(raw))
        } else {
            Err(BackendIdError(raw))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BackendId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid backend id '{0}': must match [A-Za-z][A-Za-z0-9_-]{{2,63}}")]
pub struct BackendIdError(String);

/// The kind of capability a catalog entry belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityKind {
    Tools,
    Prompts,
    Resources,
    ResourceTemplates,
}

impl CapabilityKind {
    pub const ALL: [CapabilityKind; 4] = [
        CapabilityKind::Tools,
        CapabilityKind::Prompts,
        CapabilityKind::Resources,
        CapabilityKind::ResourceTemplates,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tools => "tools",
            Self::Prompts => "prompts",
            Self::Resources => "resources",
            Self::ResourceTemplates => "resource_templates",
        }
    }
}

impl fmt::Display for CapabilityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const SEPARATOR: char = '_';

/// Namespace a tool or prompt name: `"<backend>_<original>"`.
pub fn namespace_name(backend_id: &BackendId, original: &str) -> String {
    format!("{backend_id}{SEPARATOR}{original}")
}

/// Namespace a resource URI: `"<backend>_<sanitized(uri)>"`, where
/// sanitization replaces every character outside `[A-Za-z0-9]` with `_`
/// and collapses consecutive `_` into one (spec §6.3). Not reversible by
/// string operation — callers must resolve back through the registry.
pub fn namespace_uri(backend_id: &BackendId, uri: &str) -> String {
    format!("{backend_id}{SEPARATOR}{}", sanitize_uri(uri))
}

pub(crate) fn sanitize_uri(uri: &str) -> String {
    let mut out = String::with_capacity(uri.len());
    let mut last_was_sep = false;
    for c in uri.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c);
            last_was_sep = false;
        } else if !last_was_sep {
            out.push('_');
            last_was_sep = true;
        }
    }
    out
}

/// Given a full namespaced identifier and the set of known backend ids,
/// split off the owning backend prefix. Used only where a direct-lookup
/// fast path benefits from knowing the backend before a full index probe
/// (the registry itself indexes by the full namespaced string, so this is
/// a convenience, not the source of truth for resolution).
pub fn split_backend_prefix<'a>(namespaced: &'a str, known: &[BackendId]) -> Option<(&'a BackendId, &'a str)> {
    known
        .iter()
        .filter(|id| {
            namespaced.starts_with(id.as_str())
                && namespaced[id.as_str().len()..].starts_with(SEPARATOR)
        })
        // Prefer the longest matching backend id prefix, since one backend
        // id could be a strict prefix of another (e.g. "db" vs "db2").
        .max_by_key(|id| id.as_str().len())
        .map(|id| (id, &namespaced[id.as_str().len() + 1..]))
}

fn is_valid_backend_id(s: &str) -> bool {
    let mut chars = s.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    if !first.is_ascii_alphabetic() {
        return false;
    }
    let rest: Vec<char> = chars.collect();
    if rest.len() < 2 || rest.len() > 63 {
        return false;
    }
    rest.iter()
        .all(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_backend_ids() {
        assert!(BackendId::new("filesystem").is_ok());
        assert!(BackendId::new("db2").is_ok());
        assert!(BackendId::new("a-b_c").is_ok());
    }

    #[test]
    fn rejects_malformed_backend_ids() {
        assert!(BackendId::new("").is_err());
        assert!(BackendId::new("1fs").is_err());
        assert!(BackendId::new("ab").is_err());
        assert!(BackendId::new("has space").is_err());
    }

    #[test]
    fn namespacing_round_trip_scenario() {
        let fs = BackendId::new("filesystem").unwrap();
        assert_eq!(namespace_name(&fs, "read_file"), "filesystem_read_file");
    }

    #[test]
    fn namespacing_is_injective_across_backends() {
        let fs1 = BackendId::new("fs1").unwrap();
        let fs2 = BackendId::new("fs2").unwrap();
        assert_ne!(namespace_name(&fs1, "echo"), namespace_name(&fs2, "echo"));
    }

    #[test]
    fn uri_sanitization_collapses_runs() {
        assert_eq!(sanitize_uri("file:///log"), "file_log");
        assert_eq!(sanitize_uri("mcp://database/{table}/{id}"), "mcp_database_table_id_");
    }

    #[test]
    fn uri_namespacing_scenario() {
        let fs = BackendId::new("fs").unwrap();
        assert_eq!(namespace_uri(&fs, "file:///log"), "fs_file_log");
    }

    #[test]
    fn split_prefers_longest_backend_match() {
        let db = BackendId::new("db").unwrap();
        let db2 = BackendId::new("db2").unwrap();
        let known = vec![db.clone(), db2.clone()];
        let (id, rest) = split_backend_prefix("db2_users_42", &known).unwrap();
        assert_eq!(id, &db2);
        assert_eq!(rest, "users_42");
    }
}
