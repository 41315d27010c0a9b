//! RFC-6570-flavored URI template matching for resource templates (spec
//! §4.3.2). Only the simple-string expansion form (`{var}`) is needed —
//! MCP resource templates don't use the reserved/fragment/list operators
//! from the full RFC.

use std::collections::HashMap;

use crate::identifier::sanitize_uri;

/// A compiled template, kept in two parallel forms:
///
/// - `match_segments`: literal text run through the same sanitization the
///   registry applies to namespaced resource ids, since that's the space
///   an incoming lookup actually arrives in (the backend prefix has
///   already been stripped by the caller).
/// - `expand_segments`: the template's original (backend-facing) literal
///   text, used to reconstruct the real URI once variables are bound.
#[derive(Debug, Clone)]
pub struct CompiledTemplate {
    match_segments: Vec<Segment>,
    expand_segments: Vec<Segment>,
    /// Count of literal (non-variable) characters in the sanitized form,
    /// used to break ties between multiple matching templates (spec:
    /// "longest literal match wins").
    pub literal_len: usize,
    source: String,
}

#[derive(Debug, Clone)]
enum Segment {
    Literal(String),
    Var(String),
}

/// Parse `pattern` into an ordered sequence of literal/variable segments,
/// e.g. `mcp://database/{table}/{id}` becomes `[Literal("mcp://database/"),
/// Var("table"), Literal("/"), Var("id")]`.
fn parse(pattern: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut rest = pattern;

    while let Some(start) = rest.find('{') {
        if start > 0 {
            segments.push(Segment::Literal(rest[..start].to_string()));
        }
        let Some(end) = rest[start..].find('}') else {
            segments.push(Segment::Literal(rest[start..].to_string()));
            rest = "";
            break;
        };
        let var_name = &rest[start + 1..start + end];
        segments.push(Segment::Var(var_name.to_string()));
        rest = &rest[start + end + 1..];
    }
    if !rest.is_empty() {
        segments.push(Segment::Literal(rest.to_string()));
    }
    segments
}

impl CompiledTemplate {
    pub fn compile(pattern: &str) -> Self {
        let expand_segments = parse(pattern);
        let match_segments = expand_segments
            .iter()
            .map(|s| match s {
                Segment::Literal(lit) => Segment::Literal(sanitize_uri(lit)),
                Segment::Var(name) => Segment::Var(name.clone()),
            })
            .collect::<Vec<_>>();
        let literal_len = match_segments
            .iter()
            .map(|s| match s {
                Segment::Literal(lit) => lit.len(),
                Segment::Var(_) => 0,
            })
            .sum();

        Self {
            match_segments,
            expand_segments,
            literal_len,
            source: pattern.to_string(),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Attempt to match a sanitized, backend-prefix-stripped URI suffix
    /// against this template, binding every variable. Returns the bound
    /// variables on success.
    pub fn matches(&self, sanitized_suffix: &str) -> Option<HashMap<String, String>> {
        bind(&self.match_segments, sanitized_suffix)
    }

    /// Substitute bound variables back into this template's original
    /// (backend-facing) form.
    pub fn expand(&self, bindings: &HashMap<String, String>) -> String {
        let mut out = String::new();
        for segment in &self.expand_segments {
            match segment {
                Segment::Literal(lit) => out.push_str(lit),
                Segment::Var(name) => {
                    if let Some(value) = bindings.get(name) {
                        out.push_str(value);
                    }
                }
            }
        }
        out
    }
}

fn bind(segments: &[Segment], uri: &str) -> Option<HashMap<String, String>> {
    let mut bindings = HashMap::new();
    let mut rest = uri;
    let mut iter = segments.iter().peekable();

    while let Some(segment) = iter.next() {
        match segment {
            Segment::Literal(lit) => {
                rest = rest.strip_prefix(lit.as_str())?;
            }
            Segment::Var(name) => {
                let stop_at = match iter.peek() {
                    Some(Segment::Literal(next_lit)) => rest.find(next_lit.as_str())?,
                    _ => rest.len(),
                };
                if stop_at == 0 {
                    // Variables must bind at least one character.
                    return None;
                }
                bindings.insert(name.clone(), rest[..stop_at].to_string());
                rest = &rest[stop_at..];
            }
        }
    }

    if rest.is_empty() {
        Some(bindings)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compiles_and_matches_sanitized_template() {
        let tmpl = CompiledTemplate::compile("mcp://database/{table}/{id}");
        // The registry strips only the "<backend>_" prefix before calling
        // `matches`, so the suffix here is the sanitized remainder —
        // "mcp://database/" collapses to "mcp_database_".
        let bindings = tmpl.matches("mcp_database_users_42").unwrap();
        assert_eq!(bindings.get("table").unwrap(), "users");
        assert_eq!(bindings.get("id").unwrap(), "42");
    }

    #[test]
    fn expand_reconstructs_the_backend_facing_uri() {
        let tmpl = CompiledTemplate::compile("mcp://database/{table}/{id}");
        let bindings = tmpl.matches("mcp_database_users_42").unwrap();
        assert_eq!(tmpl.expand(&bindings), "mcp://database/users/42");
    }

    #[test]
    fn non_matching_literal_prefix_fails() {
        let tmpl = CompiledTemplate::compile("mcp://database/{table}");
        assert!(tmpl.matches("mcp_files_table").is_none());
    }

    #[test]
    fn empty_variable_binding_is_rejected() {
        let tmpl = CompiledTemplate::compile("mcp://database/{table}/rows");
        assert!(tmpl.matches("mcp_database__rows").is_none());
    }

    #[test]
    fn literal_len_used_for_longest_match_precedence() {
        let broad = CompiledTemplate::compile("mcp://{anything}");
        let narrow = CompiledTemplate::compile("mcp://database/{table}");
        assert!(narrow.literal_len > broad.literal_len);
    }
}
