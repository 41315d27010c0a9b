//! The aggregated, namespaced catalog and its shared metadata cache
//! (spec §4.3). Owns full and targeted sync, template matching, and the
//! read snapshots the Router and GatewayFront serve from.

pub mod cache;
pub mod template;

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::{Mutex as SyncMutex, RwLock};
use serde_json::Value;
use tracing::warn;

use crate::backend::BackendRecord;
use crate::error::{GatewayError, GatewayResult};
use crate::identifier::{self, BackendId, CapabilityKind};
use crate::protocol::{CatalogEntry, TemplateEntry};
use crate::transport::BackendTransport;

use cache::{CachedMetadata, MetadataCache};
use template::CompiledTemplate;

/// Result of a `metadata()` read: either a fresh snapshot, or a
/// "no-change" sentinel when the caller already holds the current
/// version (spec §4.3.3).
pub enum MetadataResult {
    Snapshot(Arc<CachedMetadata>),
    Unchanged { version: u64 },
}

pub struct Registry {
    tools: DashMap<String, CatalogEntry>,
    prompts: DashMap<String, CatalogEntry>,
    resources: DashMap<String, CatalogEntry>,
    templates: RwLock<Vec<(TemplateEntry, CompiledTemplate)>>,
    /// Serializes the remove-old/insert-new commit step of a sync so
    /// readers never observe a partially-updated kind (spec §5). Held
    /// only across synchronous map operations, never across an await.
    commit_lock: SyncMutex<()>,
    backends: DashMap<BackendId, BackendRecord>,
    cache: MetadataCache,
}

impl Registry {
    pub fn new(cache_ttl: std::time::Duration) -> Self {
        Self {
            tools: DashMap::new(),
            prompts: DashMap::new(),
            resources: DashMap::new(),
            templates: RwLock::new(Vec::new()),
            commit_lock: SyncMutex::new(()),
            backends: DashMap::new(),
            cache: MetadataCache::new(cache_ttl),
        }
    }

    /// Register a newly-connected backend and run its initial full sync:
    /// all four capability kinds concurrently (spec §4.3 `addBackend`).
    /// A failure syncing one kind does not block the others — it is
    /// logged and leaves that kind's (empty, for a first sync) prior
    /// snapshot untouched.
    pub async fn add_backend(&self, backend_id: &BackendId, transport: &dyn BackendTransport) {
        self.backends
            .entry(backend_id.clone())
            .or_default()
            .mark_connecting();

        let (tools, prompts, resources, templates) = tokio::join!(
            self.sync_kind(backend_id, transport, CapabilityKind::Tools),
            self.sync_kind(backend_id, transport, CapabilityKind::Prompts),
            self.sync_kind(backend_id, transport, CapabilityKind::Resources),
            self.sync_kind(backend_id, transport, CapabilityKind::ResourceTemplates),
        );
        for result in [tools, prompts, resources, templates] {
            if let Err(e) = result {
                warn!(backend_id = %backend_id, error = %e, "initial sync failed for a capability kind");
            }
        }

        if let Some(mut record) = self.backends.get_mut(backend_id) {
            record.mark_connected();
        }
    }

    /// Atomically drop every entry belonging to `backend_id` (spec §4.3
    /// `removeBackend`, invariant 3).
    pub fn remove_backend(&self, backend_id: &BackendId) {
        let _guard = self.commit_lock.lock();
        self.tools.retain(|_, e| &e.backend_id != backend_id);
        self.prompts.retain(|_, e| &e.backend_id != backend_id);
        self.resources.retain(|_, e| &e.backend_id != backend_id);
        self.templates
            .write()
            .retain(|(t, _)| &t.backend_id != backend_id);
        self.backends.remove(backend_id);
        drop(_guard);
        self.cache.invalidate();
    }

    /// Re-run one capability kind's sync, or all four if `kind` is
    /// `None` (spec §4.3 `sync`, used by the `NotificationDispatcher` for
    /// targeted re-sync).
    pub async fn sync(
        &self,
        backend_id: &BackendId,
        transport: &dyn BackendTransport,
        kind: Option<CapabilityKind>,
    ) -> GatewayResult<()> {
        match kind {
            Some(k) => self.sync_kind(backend_id, transport, k).await,
            None => {
                let (t, p, r, rt) = tokio::join!(
                    self.sync_kind(backend_id, transport, CapabilityKind::Tools),
                    self.sync_kind(backend_id, transport, CapabilityKind::Prompts),
                    self.sync_kind(backend_id, transport, CapabilityKind::Resources),
                    self.sync_kind(backend_id, transport, CapabilityKind::ResourceTemplates),
                );
                t.and(p).and(r).and(rt)
            }
        }
    }

    async fn sync_kind(
        &self,
        backend_id: &BackendId,
        transport: &dyn BackendTransport,
        kind: CapabilityKind,
    ) -> GatewayResult<()> {
        let method = list_method(kind);
        let mut items = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let page = transport
                .list_page(method, cursor.as_deref())
                .await
                .map_err(|e| GatewayError::sync_failed(backend_id.as_str(), kind.as_str(), e.to_string()))?;
            items.extend(page.items);
            match page.next_cursor {
                Some(c) if !c.is_empty() => cursor = Some(c),
                _ => break,
            }
        }

        let (entries, templates) = build_entries(backend_id, kind, items);

        {
            let _guard = self.commit_lock.lock();
            match kind {
                CapabilityKind::Tools => commit(&self.tools, backend_id, entries),
                CapabilityKind::Prompts => commit(&self.prompts, backend_id, entries),
                CapabilityKind::Resources => commit(&self.resources, backend_id, entries),
                CapabilityKind::ResourceTemplates => {
                    let mut guard = self.templates.write();
                    guard.retain(|(t, _)| &t.backend_id != backend_id);
                    guard.extend(templates);
                }
            }
            if let Some(mut record) = self.backends.get_mut(backend_id) {
                record.bump_version(kind);
            }
        }

        self.cache.invalidate();
        Ok(())
    }

    /// Resolve a namespaced tool/prompt name to its backend and original
    /// name.
    pub fn resolve(&self, kind: CapabilityKind, namespaced: &str) -> Option<(BackendId, String)> {
        let map = match kind {
            CapabilityKind::Tools => &self.tools,
            CapabilityKind::Prompts => &self.prompts,
            CapabilityKind::Resources => &self.resources,
            CapabilityKind::ResourceTemplates => return None,
        };
        map.get(namespaced)
            .map(|e| (e.backend_id.clone(), e.original_id.clone()))
    }

    /// Resolve a namespaced resource URI: direct hit first, then
    /// template matching with longest-literal-match precedence (spec
    /// §4.3.2, §9 "Open question" resolution).
    pub fn resolve_uri(&self, namespaced_uri: &str) -> Option<(BackendId, String)> {
        if let Some(entry) = self.resources.get(namespaced_uri) {
            return Some((entry.backend_id.clone(), entry.original_id.clone()));
        }

        let templates = self.templates.read();
        let mut best: Option<(&TemplateEntry, &CompiledTemplate, std::collections::HashMap<String, String>)> = None;

        for (entry, compiled) in templates.iter() {
            let prefix = format!("{}{}", entry.backend_id, '_');
            let Some(suffix) = namespaced_uri.strip_prefix(&prefix) else {
                continue;
            };
            // `suffix` is already in sanitized form (the registry never
            // un-sanitizes a namespaced id), so it's matched directly
            // against the template's sanitized segments (spec §9 "Open
            // question" resolution: sanitization is one-way, so matching
            // happens in the sanitized space and the original URI is
            // recovered via `expand`, not by reversing the sanitization).
            if let Some(bindings) = compiled.matches(suffix) {
                let better = match &best {
                    None => true,
                    Some((_, best_compiled, _)) => compiled.literal_len > best_compiled.literal_len,
                };
                if better {
                    best = Some((entry, compiled, bindings));
                }
            }
        }

        best.map(|(entry, compiled, bindings)| (entry.backend_id.clone(), compiled.expand(&bindings)))
    }

    /// A consistent, namespaced-id-sorted snapshot of one capability
    /// kind.
    pub fn snapshot(&self, kind: CapabilityKind) -> Vec<CatalogEntry> {
        let map = match kind {
            CapabilityKind::Tools => &self.tools,
            CapabilityKind::Prompts => &self.prompts,
            CapabilityKind::Resources => &self.resources,
            CapabilityKind::ResourceTemplates => return Vec::new(),
        };
        let mut entries: Vec<CatalogEntry> = map.iter().map(|e| e.value().clone()).collect();
        entries.sort_by(|a, b| a.namespaced_id.cmp(&b.namespaced_id));
        entries
    }

    pub fn snapshot_templates(&self) -> Vec<TemplateEntry> {
        let mut entries: Vec<TemplateEntry> = self.templates.read().iter().map(|(t, _)| t.clone()).collect();
        entries.sort_by(|a, b| a.namespaced_template.cmp(&b.namespaced_template));
        entries
    }

    /// Read (and lazily rebuild) the shared metadata cache (spec
    /// §4.3.3).
    pub fn metadata(&self, client_version: Option<u64>) -> MetadataResult {
        if let Some(snapshot) = self.cache.get_fresh() {
            return respond(snapshot, client_version);
        }

        let tools = self.snapshot(CapabilityKind::Tools);
        let prompts = self.snapshot(CapabilityKind::Prompts);
        let resources = self.snapshot(CapabilityKind::Resources);
        let templates = self.snapshot_templates();
        let snapshot = self.cache.publish(tools, prompts, resources, templates);
        respond(snapshot, client_version)
    }

    pub fn invalidate_cache(&self) {
        self.cache.invalidate();
    }

    pub fn backend_state(&self, backend_id: &BackendId) -> Option<crate::backend::ConnectionState> {
        self.backends.get(backend_id).map(|r| r.state)
    }
}

fn respond(snapshot: Arc<CachedMetadata>, client_version: Option<u64>) -> MetadataResult {
    if client_version == Some(snapshot.version) {
        MetadataResult::Unchanged {
            version: snapshot.version,
        }
    } else {
        MetadataResult::Snapshot(snapshot)
    }
}

fn commit(map: &DashMap<String, CatalogEntry>, backend_id: &BackendId, entries: Vec<CatalogEntry>) {
    map.retain(|_, e| &e.backend_id != backend_id);
    for entry in entries {
        map.insert(entry.namespaced_id.clone(), entry);
    }
}

fn list_method(kind: CapabilityKind) -> &'static str {
    match kind {
        CapabilityKind::Tools => "tools/list",
        CapabilityKind::Prompts => "prompts/list",
        CapabilityKind::Resources => "resources/list",
        CapabilityKind::ResourceTemplates => "resources/templates/list",
    }
}

fn build_entries(
    backend_id: &BackendId,
    kind: CapabilityKind,
    items: Vec<Value>,
) -> (Vec<CatalogEntry>, Vec<(TemplateEntry, CompiledTemplate)>) {
    if matches!(kind, CapabilityKind::ResourceTemplates) {
        let templates = items
            .into_iter()
            .filter_map(|item| {
                let uri_template = item.get("uriTemplate")?.as_str()?.to_string();
                let namespaced_template = identifier::namespace_uri(backend_id, &uri_template);
                let compiled = CompiledTemplate::compile(&uri_template);
                Some((
                    TemplateEntry {
                        backend_id: backend_id.clone(),
                        uri_template,
                        namespaced_template,
                        metadata: item,
                    },
                    compiled,
                ))
            })
            .collect();
        return (Vec::new(), templates);
    }

    let entries = items
        .into_iter()
        .filter_map(|item| {
            let original_id = match kind {
                CapabilityKind::Tools | CapabilityKind::Prompts => {
                    item.get("name")?.as_str()?.to_string()
                }
                CapabilityKind::Resources => item.get("uri")?.as_str()?.to_string(),
                CapabilityKind::ResourceTemplates => unreachable!(),
            };
            let namespaced_id = match kind {
                CapabilityKind::Tools | CapabilityKind::Prompts => {
                    identifier::namespace_name(backend_id, &original_id)
                }
                CapabilityKind::Resources => identifier::namespace_uri(backend_id, &original_id),
                CapabilityKind::ResourceTemplates => unreachable!(),
            };
            Some(CatalogEntry {
                kind,
                backend_id: backend_id.clone(),
                original_id,
                namespaced_id,
                metadata: item,
            })
        })
        .collect();
    (entries, Vec::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{BackendNotification, ListPage};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::mpsc;

    #[derive(Debug)]
    struct FakeTransport {
        tools: Vec<Value>,
        fail_resources: bool,
        list_calls: AtomicUsize,
    }

    #[async_trait]
    impl BackendTransport for FakeTransport {
        async fn connect(&self) -> GatewayResult<Value> {
            Ok(Value::Null)
        }

        async fn list_page(&self, method: &str, _cursor: Option<&str>) -> GatewayResult<ListPage> {
            self.list_calls.fetch_add(1, Ordering::SeqCst);
            match method {
                "tools/list" => Ok(ListPage {
                    items: self.tools.clone(),
                    next_cursor: None,
                }),
                "resources/list" if self.fail_resources => {
                    Err(GatewayError::backend_unavailable("fake", "boom"))
                }
                _ => Ok(ListPage {
                    items: vec![],
                    next_cursor: None,
                }),
            }
        }

        async fn call(&self, _: &str, _: Value, _: Duration) -> GatewayResult<Value> {
            unimplemented!()
        }

        fn notifications(&self) -> mpsc::Receiver<BackendNotification> {
            mpsc::channel(1).1
        }

        async fn is_connected(&self) -> bool {
            true
        }

        async fn disconnect(&self) {}
    }

    fn fs_backend() -> BackendId {
        BackendId::new("filesystem").unwrap()
    }

    #[tokio::test]
    async fn namespacing_round_trip_scenario() {
        let registry = Registry::new(Duration::from_secs(30));
        let backend_id = fs_backend();
        let transport = FakeTransport {
            tools: vec![serde_json::json!({"name": "read_file", "description": "reads a file"})],
            fail_resources: false,
            list_calls: AtomicUsize::new(0),
        };

        registry.add_backend(&backend_id, &transport).await;

        let tools = registry.snapshot(CapabilityKind::Tools);
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].namespaced_id, "filesystem_read_file");

        let (resolved_backend, original) = registry
            .resolve(CapabilityKind::Tools, "filesystem_read_file")
            .unwrap();
        assert_eq!(resolved_backend, backend_id);
        assert_eq!(original, "read_file");
    }

    #[tokio::test]
    async fn collision_across_backends_scenario() {
        let registry = Registry::new(Duration::from_secs(30));
        let fs1 = BackendId::new("fs1").unwrap();
        let fs2 = BackendId::new("fs2").unwrap();
        let t1 = FakeTransport {
            tools: vec![serde_json::json!({"name": "echo"})],
            fail_resources: false,
            list_calls: AtomicUsize::new(0),
        };
        let t2 = FakeTransport {
            tools: vec![serde_json::json!({"name": "echo"})],
            fail_resources: false,
            list_calls: AtomicUsize::new(0),
        };

        registry.add_backend(&fs1, &t1).await;
        registry.add_backend(&fs2, &t2).await;

        let tools = registry.snapshot(CapabilityKind::Tools);
        assert_eq!(tools.len(), 2);
        assert!(registry.resolve(CapabilityKind::Tools, "fs1_echo").is_some());
        assert!(registry.resolve(CapabilityKind::Tools, "fs2_echo").is_some());
        assert_eq!(
            registry.resolve(CapabilityKind::Tools, "fs1_echo").unwrap().0,
            fs1
        );
    }

    #[tokio::test]
    async fn remove_backend_drops_all_its_entries() {
        let registry = Registry::new(Duration::from_secs(30));
        let backend_id = fs_backend();
        let transport = FakeTransport {
            tools: vec![serde_json::json!({"name": "read_file"})],
            fail_resources: false,
            list_calls: AtomicUsize::new(0),
        };
        registry.add_backend(&backend_id, &transport).await;
        assert_eq!(registry.snapshot(CapabilityKind::Tools).len(), 1);

        registry.remove_backend(&backend_id);
        assert!(registry.snapshot(CapabilityKind::Tools).is_empty());
        assert!(registry.resolve(CapabilityKind::Tools, "filesystem_read_file").is_none());
    }

    #[tokio::test]
    async fn sync_failure_on_one_kind_preserves_prior_snapshot_of_others() {
        let registry = Registry::new(Duration::from_secs(30));
        let backend_id = fs_backend();
        let transport = FakeTransport {
            tools: vec![serde_json::json!({"name": "read_file"})],
            fail_resources: true,
            list_calls: AtomicUsize::new(0),
        };
        registry.add_backend(&backend_id, &transport).await;

        // Tools synced fine despite resources failing concurrently.
        assert_eq!(registry.snapshot(CapabilityKind::Tools).len(), 1);
        assert!(registry.snapshot(CapabilityKind::Resources).is_empty());
    }

    #[tokio::test]
    async fn template_routing_scenario() {
        let registry = Registry::new(Duration::from_secs(30));
        let backend_id = BackendId::new("db").unwrap();
        let transport = FakeTransport {
            tools: vec![],
            fail_resources: false,
            list_calls: AtomicUsize::new(0),
        };
        // Synthesize a template sync directly.
        registry
            .sync(&backend_id, &transport, Some(CapabilityKind::ResourceTemplates))
            .await
            .unwrap();
        {
            let mut guard = registry.templates.write();
            let tmpl = "mcp://database/{table}/{id}";
            guard.push((
                TemplateEntry {
                    backend_id: backend_id.clone(),
                    uri_template: tmpl.to_string(),
                    namespaced_template: identifier::namespace_uri(&backend_id, tmpl),
                    metadata: Value::Null,
                },
                CompiledTemplate::compile(tmpl),
            ));
        }

        // "mcp://database/" sanitizes to "mcp_database_"; the incoming
        // namespaced lookup key is built the same way the registry builds
        // one from a real resource read.
        let resolved = registry.resolve_uri("db_mcp_database_users_42");
        assert_eq!(
            resolved,
            Some((backend_id, "mcp://database/users/42".to_string()))
        );
    }

    #[tokio::test]
    async fn metadata_cache_serves_no_change_sentinel() {
        let registry = Registry::new(Duration::from_secs(30));
        let snapshot = match registry.metadata(None) {
            MetadataResult::Snapshot(s) => s,
            _ => panic!("expected a snapshot on cold cache"),
        };
        match registry.metadata(Some(snapshot.version)) {
            MetadataResult::Unchanged { version } => assert_eq!(version, snapshot.version),
            _ => panic!("expected unchanged sentinel"),
        }
    }
}
