//! Property-based tests for the namespacing and template-matching
//! invariants spec §8 calls out explicitly: namespace injectivity and
//! template match/expand round-tripping.

use proptest::prelude::*;

use goblin::identifier::{namespace_name, namespace_uri, BackendId};
use goblin::registry::template::CompiledTemplate;

fn backend_id_strategy() -> impl Strategy<Value = BackendId> {
    "[a-z][a-z0-9]{2,10}".prop_map(|s| BackendId::new(s).expect("generated id matches the grammar"))
}

fn original_id_strategy() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9_./:-]{1,24}"
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Property: two distinct backend ids never produce the same
    /// namespaced tool/prompt name for the same original name (spec §8,
    /// "namespace(backend, original) is injective").
    #[test]
    fn prop_namespace_name_injective_across_backends(
        a in backend_id_strategy(),
        b in backend_id_strategy(),
        original in original_id_strategy(),
    ) {
        prop_assume!(a != b);
        prop_assert_ne!(namespace_name(&a, &original), namespace_name(&b, &original));
    }

    /// Property: the same backend and original name always produce the
    /// same namespaced name (namespacing is a pure function).
    #[test]
    fn prop_namespace_name_deterministic(
        backend in backend_id_strategy(),
        original in original_id_strategy(),
    ) {
        prop_assert_eq!(
            namespace_name(&backend, &original),
            namespace_name(&backend, &original)
        );
    }

    /// Property: two distinct original names under the same backend never
    /// collide in the namespaced space.
    #[test]
    fn prop_namespace_name_injective_across_originals(
        backend in backend_id_strategy(),
        a in original_id_strategy(),
        b in original_id_strategy(),
    ) {
        prop_assume!(a != b);
        prop_assert_ne!(namespace_name(&backend, &a), namespace_name(&backend, &b));
    }

    /// Property: resource URI namespacing is likewise deterministic per
    /// (backend, uri) pair.
    #[test]
    fn prop_namespace_uri_deterministic(
        backend in backend_id_strategy(),
        uri in "[a-zA-Z0-9:/._-]{1,32}",
    ) {
        prop_assert_eq!(namespace_uri(&backend, &uri), namespace_uri(&backend, &uri));
    }

    /// Property: a compiled single-variable template round-trips any
    /// alphanumeric binding through match -> expand (spec §4.3.2 /
    /// §9 sanitization-reversibility resolution: matching happens in
    /// sanitized space, the *original* URI is recovered via `expand`).
    #[test]
    fn prop_template_match_expand_round_trips(table in "[a-z]{1,8}", id in "[a-z0-9]{1,8}") {
        let tmpl = CompiledTemplate::compile("mcp://database/{table}/{id}");
        let sanitized_suffix = format!("mcp_database_{table}_{id}");
        let bindings = tmpl.matches(&sanitized_suffix);
        prop_assert!(bindings.is_some());
        let bindings = bindings.unwrap();
        prop_assert_eq!(bindings.get("table").unwrap(), &table);
        prop_assert_eq!(bindings.get("id").unwrap(), &id);
        prop_assert_eq!(tmpl.expand(&bindings), format!("mcp://database/{table}/{id}"));
    }

    /// Property: a template never matches a suffix whose literal prefix
    /// doesn't agree, regardless of what follows.
    #[test]
    fn prop_template_rejects_mismatched_literal_prefix(junk in "[a-z]{1,8}", id in "[a-z0-9]{1,8}") {
        prop_assume!(junk != "database");
        let tmpl = CompiledTemplate::compile("mcp://database/{id}");
        let suffix = format!("mcp_{junk}_{id}");
        prop_assert!(tmpl.matches(&suffix).is_none());
    }
}
