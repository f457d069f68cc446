//! In-process store backed by a JSON snapshot.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::store::model::canonical_ip;
use crate::store::{
    AccessStore, BlacklistEntry, DataStoreError, Domain, HttpRoute, Listener, RouteStore, RouteView,
    SshPort, StreamRoute, WhitelistEntry,
};

/// Serialized form of the whole store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Snapshot {
    pub listeners: Vec<Listener>,
    pub domains: Vec<Domain>,
    pub stream_routes: Vec<StreamRoute>,
    pub http_routes: Vec<HttpRoute>,
    pub ssh_ports: Vec<SshPort>,
    pub blacklist: Vec<BlacklistEntry>,
    pub whitelist: Vec<WhitelistEntry>,
}

/// A thread-safe store for routing state and access lists.
///
/// Routing tables change at administrator pace and sit behind one lock so a
/// reader never sees half a replacement. Access lists take per-row updates
/// from concurrent oracle requests, so they live in `DashMap`s where an
/// increment is atomic with respect to other increments on the same row.
#[derive(Debug, Default)]
pub struct MemoryStore {
    routing: RwLock<RouteView>,
    blacklist: DashMap<u32, BlacklistEntry>,
    whitelist: DashMap<u32, WhitelistEntry>,
    persistence_path: Option<PathBuf>,
}

impl MemoryStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from a snapshot, remembering where to persist it.
    pub fn from_snapshot(snapshot: Snapshot, persistence_path: Option<PathBuf>) -> Self {
        let Snapshot {
            listeners,
            domains,
            stream_routes,
            http_routes,
            ssh_ports,
            blacklist,
            whitelist,
        } = snapshot;

        let store = Self {
            routing: RwLock::new(RouteView {
                listeners,
                domains: domains.into_iter().map(|d| (d.id, d)).collect(),
                stream_routes,
                http_routes,
                ssh_ports: ssh_ports.into_iter().map(|p| (p.id, p)).collect(),
            }),
            blacklist: DashMap::new(),
            whitelist: DashMap::new(),
            persistence_path,
        };

        for entry in blacklist {
            store.insert_blacklist(entry);
        }
        for entry in whitelist {
            store.insert_whitelist(entry);
        }
        store
    }

    /// Load from file if it exists, otherwise start empty.
    pub async fn load_from_file(path: &Path) -> Result<Self, DataStoreError> {
        let snapshot = read_snapshot(path).await?;
        let store = Self::from_snapshot(snapshot, Some(path.to_path_buf()));
        tracing::info!(
            path = %path.display(),
            blacklist = store.blacklist.len(),
            whitelist = store.whitelist.len(),
            "Loaded store snapshot"
        );
        Ok(store)
    }

    /// Re-read the snapshot file and merge it into the live store.
    pub async fn reload_from_file(&self) -> Result<(), DataStoreError> {
        let Some(path) = &self.persistence_path else {
            return Ok(());
        };
        let snapshot = read_snapshot(path).await?;
        self.apply_snapshot(snapshot).await;
        tracing::info!(path = %path.display(), "Reloaded store snapshot");
        Ok(())
    }

    /// Save to the persistence path, if one is set.
    pub async fn save_to_file(&self) -> Result<(), DataStoreError> {
        if let Some(path) = &self.persistence_path {
            let snapshot = self.snapshot().await;
            let json = serde_json::to_vec_pretty(&snapshot)?;
            let tmp = path.with_extension("json.tmp");
            tokio::fs::write(&tmp, json).await?;
            tokio::fs::rename(&tmp, path).await?;
            tracing::info!(path = %path.display(), "Saved store snapshot");
        }
        Ok(())
    }

    /// Replace routing tables and list rows with `snapshot`.
    ///
    /// Counters never move backwards: for rows present on both sides the
    /// larger count and the later timestamp survive.
    pub async fn apply_snapshot(&self, snapshot: Snapshot) {
        let Snapshot {
            listeners,
            domains,
            stream_routes,
            http_routes,
            ssh_ports,
            blacklist,
            whitelist,
        } = snapshot;

        *self.routing.write().await = RouteView {
            listeners,
            domains: domains.into_iter().map(|d| (d.id, d)).collect(),
            stream_routes,
            http_routes,
            ssh_ports: ssh_ports.into_iter().map(|p| (p.id, p)).collect(),
        };

        // Each merge runs under the row's shard lock, so a concurrent
        // increment lands either before the max or after the write.
        let keep: HashSet<u32> = blacklist.iter().map(|e| e.id).collect();
        self.blacklist.retain(|id, _| keep.contains(id));
        for mut entry in blacklist {
            canonicalize(&mut entry.ip);
            match self.blacklist.entry(entry.id) {
                Entry::Occupied(mut slot) => {
                    let live = slot.get_mut();
                    entry.count_block = entry.count_block.max(live.count_block);
                    entry.last_block = entry.last_block.max(live.last_block);
                    *live = entry;
                }
                Entry::Vacant(slot) => {
                    slot.insert(entry);
                }
            }
        }

        let keep: HashSet<u32> = whitelist.iter().map(|e| e.id).collect();
        self.whitelist.retain(|id, _| keep.contains(id));
        for mut entry in whitelist {
            canonicalize(&mut entry.ip);
            match self.whitelist.entry(entry.id) {
                Entry::Occupied(mut slot) => {
                    let live = slot.get_mut();
                    entry.count_access = entry.count_access.max(live.count_access);
                    entry.last_access = entry.last_access.max(live.last_access);
                    *live = entry;
                }
                Entry::Vacant(slot) => {
                    slot.insert(entry);
                }
            }
        }
    }

    /// Current contents, ordered by id.
    pub async fn snapshot(&self) -> Snapshot {
        let tables = self.routing.read().await;
        let mut domains: Vec<Domain> = tables.domains.values().cloned().collect();
        domains.sort_by_key(|d| d.id);
        let mut ssh_ports: Vec<SshPort> = tables.ssh_ports.values().cloned().collect();
        ssh_ports.sort_by_key(|p| p.id);
        let mut blacklist: Vec<BlacklistEntry> =
            self.blacklist.iter().map(|r| r.value().clone()).collect();
        blacklist.sort_by_key(|e| e.id);
        let mut whitelist: Vec<WhitelistEntry> =
            self.whitelist.iter().map(|r| r.value().clone()).collect();
        whitelist.sort_by_key(|e| e.id);

        Snapshot {
            listeners: tables.listeners.clone(),
            domains,
            stream_routes: tables.stream_routes.clone(),
            http_routes: tables.http_routes.clone(),
            ssh_ports,
            blacklist,
            whitelist,
        }
    }

    pub async fn upsert_listener(&self, listener: Listener) {
        let mut tables = self.routing.write().await;
        tables.listeners.retain(|l| l.id != listener.id);
        tables.listeners.push(listener);
    }

    pub async fn upsert_domain(&self, domain: Domain) {
        self.routing.write().await.domains.insert(domain.id, domain);
    }

    pub async fn remove_domain(&self, id: u32) {
        self.routing.write().await.domains.remove(&id);
    }

    pub async fn upsert_stream_route(&self, route: StreamRoute) {
        let mut tables = self.routing.write().await;
        tables.stream_routes.retain(|r| r.id != route.id);
        tables.stream_routes.push(route);
    }

    pub async fn upsert_http_route(&self, route: HttpRoute) {
        let mut tables = self.routing.write().await;
        tables.http_routes.retain(|r| r.id != route.id);
        tables.http_routes.push(route);
    }

    pub async fn upsert_ssh_port(&self, port: SshPort) {
        self.routing.write().await.ssh_ports.insert(port.id, port);
    }

    pub fn insert_blacklist(&self, mut entry: BlacklistEntry) {
        canonicalize(&mut entry.ip);
        self.blacklist.insert(entry.id, entry);
    }

    pub fn insert_whitelist(&self, mut entry: WhitelistEntry) {
        canonicalize(&mut entry.ip);
        self.whitelist.insert(entry.id, entry);
    }

    /// Flip a blacklist row's `disabled` flag. Returns false if the row is unknown.
    pub fn set_blacklist_disabled(&self, id: u32, disabled: bool) -> bool {
        match self.blacklist.get_mut(&id) {
            Some(mut entry) => {
                entry.disabled = disabled;
                true
            }
            None => false,
        }
    }

    /// Flip a whitelist row's `disabled` flag. Returns false if the row is unknown.
    pub fn set_whitelist_disabled(&self, id: u32, disabled: bool) -> bool {
        match self.whitelist.get_mut(&id) {
            Some(mut entry) => {
                entry.disabled = disabled;
                true
            }
            None => false,
        }
    }

    pub fn remove_whitelist(&self, id: u32) -> Option<WhitelistEntry> {
        self.whitelist.remove(&id).map(|(_, entry)| entry)
    }

    pub fn blacklist_entry(&self, id: u32) -> Option<BlacklistEntry> {
        self.blacklist.get(&id).map(|r| r.value().clone())
    }

    pub fn whitelist_entry(&self, id: u32) -> Option<WhitelistEntry> {
        self.whitelist.get(&id).map(|r| r.value().clone())
    }
}

fn canonicalize(ip: &mut String) {
    if let Some(canonical) = canonical_ip(ip) {
        *ip = canonical;
    }
}

async fn read_snapshot(path: &Path) -> Result<Snapshot, DataStoreError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::warn!(path = %path.display(), "Snapshot file not found, starting empty");
            Ok(Snapshot::default())
        }
        Err(e) => Err(DataStoreError::Io(e)),
    }
}

#[async_trait]
impl RouteStore for MemoryStore {
    async fn read_view(&self) -> Result<RouteView, DataStoreError> {
        Ok(self.routing.read().await.clone())
    }

    async fn list_listeners(&self) -> Result<Vec<Listener>, DataStoreError> {
        self.routing.read().await.list_listeners().await
    }

    async fn list_stream_routes_by_listener(
        &self,
        listen_id: u32,
    ) -> Result<Vec<StreamRoute>, DataStoreError> {
        self.routing
            .read()
            .await
            .list_stream_routes_by_listener(listen_id)
            .await
    }

    async fn list_http_routes_by_listener(
        &self,
        listen_id: u32,
    ) -> Result<Vec<HttpRoute>, DataStoreError> {
        self.routing
            .read()
            .await
            .list_http_routes_by_listener(listen_id)
            .await
    }

    async fn get_domain(&self, id: u32) -> Result<Option<Domain>, DataStoreError> {
        self.routing.read().await.get_domain(id).await
    }

    async fn get_ssh_port(&self, id: u32) -> Result<Option<SshPort>, DataStoreError> {
        self.routing.read().await.get_ssh_port(id).await
    }
}

#[async_trait]
impl AccessStore for MemoryStore {
    async fn find_listener(&self, id: u32) -> Result<Option<Listener>, DataStoreError> {
        Ok(self
            .routing
            .read()
            .await
            .listeners
            .iter()
            .find(|l| l.id == id)
            .cloned())
    }

    async fn find_enabled_blacklist_entry(
        &self,
        ip: &str,
    ) -> Result<Option<BlacklistEntry>, DataStoreError> {
        Ok(self
            .blacklist
            .iter()
            .find(|r| !r.disabled && r.ip == ip)
            .map(|r| r.value().clone()))
    }

    async fn find_enabled_whitelist_entry(
        &self,
        ip: &str,
    ) -> Result<Option<WhitelistEntry>, DataStoreError> {
        Ok(self
            .whitelist
            .iter()
            .find(|r| !r.disabled && r.ip == ip)
            .map(|r| r.value().clone()))
    }

    async fn increment_block_counter(&self, id: u32, at: u64) -> Result<(), DataStoreError> {
        let mut entry = self.blacklist.get_mut(&id).ok_or(DataStoreError::RowNotFound {
            table: "blacklist",
            id,
        })?;
        entry.count_block += 1;
        entry.last_block = entry.last_block.max(at);
        Ok(())
    }

    async fn increment_access_counter(&self, id: u32, at: u64) -> Result<(), DataStoreError> {
        let mut entry = self.whitelist.get_mut(&id).ok_or(DataStoreError::RowNotFound {
            table: "whitelist",
            id,
        })?;
        entry.count_access += 1;
        entry.last_access = entry.last_access.max(at);
        Ok(())
    }

    async fn list_own_blacklist(&self) -> Result<Vec<BlacklistEntry>, DataStoreError> {
        let mut entries: Vec<BlacklistEntry> = self
            .blacklist
            .iter()
            .filter(|r| !r.is_imported)
            .map(|r| r.value().clone())
            .collect();
        entries.sort_by(|a, b| b.last_block.cmp(&a.last_block).then(a.id.cmp(&b.id)));
        Ok(entries)
    }
}
