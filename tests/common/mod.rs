//! Shared fixtures for integration tests.
#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use gatehouse::config::CounterConfig;
use gatehouse::lifecycle::Shutdown;
use gatehouse::oracle::{server, AdmissionOracle, CounterRecorder};
use gatehouse::store::{
    AccessStore, AddressCheckMode, BlacklistEntry, DataStoreError, Domain, HttpRoute, ListenKind,
    Listener, RouteStore, RouteView, SshPort, StreamRoute, WhitelistEntry,
};
use tokio::task::JoinHandle;

pub fn listener(id: u32, port: i32, kind: ListenKind) -> Listener {
    Listener {
        id,
        listen_port: port,
        kind,
        enable_address_check: false,
        address_check_mode: AddressCheckMode::Blacklist,
        description: String::new(),
    }
}

pub fn checked_listener(id: u32, mode: AddressCheckMode) -> Listener {
    Listener {
        enable_address_check: true,
        address_check_mode: mode,
        ..listener(id, 443, ListenKind::Stream)
    }
}

pub fn domain(id: u32, name: &str) -> Domain {
    Domain {
        id,
        name: name.to_string(),
    }
}

pub fn stream_route(id: u32, domain_id: u32, listen_id: u32, target: (&str, u16)) -> StreamRoute {
    StreamRoute {
        id,
        domain_id,
        listen_id,
        destination_type: Default::default(),
        destination_listen_id: 0,
        destination_address: target.0.to_string(),
        destination_port: target.1,
        index: 0,
        load_balancing_algorithm: Default::default(),
        alias_name: String::new(),
        is_default: false,
        ssh_tunnel: Default::default(),
        ssh_port_id: 0,
    }
}

pub fn http_route(id: u32, domain_id: u32, listen_id: u32) -> HttpRoute {
    HttpRoute {
        id,
        domain_id,
        listen_id,
    }
}

pub fn blacklisted(id: u32, ip: &str, count_block: u64) -> BlacklistEntry {
    BlacklistEntry {
        id,
        ip: ip.to_string(),
        disabled: false,
        last_update: 0,
        last_block: 0,
        count_block,
        ip_location_id: None,
        description: String::new(),
        is_imported: false,
    }
}

pub fn whitelisted(id: u32, ip: &str) -> WhitelistEntry {
    WhitelistEntry {
        id,
        ip: ip.to_string(),
        disabled: false,
        last_access: 0,
        count_access: 0,
        description: String::new(),
    }
}

/// A running oracle HTTP server bound to an ephemeral port.
pub struct OracleServer {
    pub addr: SocketAddr,
    pub shutdown: Shutdown,
    pub task: JoinHandle<Result<(), std::io::Error>>,
}

impl OracleServer {
    pub fn url(&self) -> String {
        format!("http://{}{}", self.addr, server::ACCESS_PATH)
    }

    pub async fn stop(self) {
        self.shutdown.trigger();
        let _ = tokio::time::timeout(Duration::from_secs(5), self.task).await;
    }
}

pub fn oracle(store: Arc<dyn AccessStore>, lookup_timeout: Duration) -> Arc<AdmissionOracle> {
    let (recorder, _writer) = CounterRecorder::spawn(store.clone(), &CounterConfig::default());
    Arc::new(AdmissionOracle::new(store, recorder, lookup_timeout))
}

pub async fn start_oracle(oracle: Arc<AdmissionOracle>) -> OracleServer {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = server::build_router(oracle, Duration::from_secs(5));
    let shutdown = Shutdown::new();
    let task = tokio::spawn(server::serve(listener, router, shutdown.wait()));
    OracleServer {
        addr,
        shutdown,
        task,
    }
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .no_proxy()
        .timeout(Duration::from_secs(10))
        .build()
        .unwrap()
}

/// Ask the oracle about `addr` on `listen_id`; returns the status code.
pub async fn check(client: &reqwest::Client, server: &OracleServer, listen_id: u32, addr: &str) -> u16 {
    client
        .get(server.url())
        .header(server::HEADER_LISTEN_ID, listen_id.to_string())
        .header(server::HEADER_REALIP, addr)
        .header(server::HEADER_REMOTE, addr)
        .header(server::HEADER_TYPE, "stream")
        .send()
        .await
        .expect("oracle unreachable")
        .status()
        .as_u16()
}

/// Poll until `check` holds or two seconds pass.
pub async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

/// A store whose every call fails as unreachable.
#[derive(Debug, Default)]
pub struct FailingStore {
    pub calls: AtomicU32,
}

impl FailingStore {
    fn fail<T>(&self) -> Result<T, DataStoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(DataStoreError::Unavailable("connection refused".into()))
    }
}

#[async_trait]
impl AccessStore for FailingStore {
    async fn find_listener(&self, _id: u32) -> Result<Option<Listener>, DataStoreError> {
        self.fail()
    }

    async fn find_enabled_blacklist_entry(
        &self,
        _ip: &str,
    ) -> Result<Option<BlacklistEntry>, DataStoreError> {
        self.fail()
    }

    async fn find_enabled_whitelist_entry(
        &self,
        _ip: &str,
    ) -> Result<Option<WhitelistEntry>, DataStoreError> {
        self.fail()
    }

    async fn increment_block_counter(&self, _id: u32, _at: u64) -> Result<(), DataStoreError> {
        self.fail()
    }

    async fn increment_access_counter(&self, _id: u32, _at: u64) -> Result<(), DataStoreError> {
        self.fail()
    }

    async fn list_own_blacklist(&self) -> Result<Vec<BlacklistEntry>, DataStoreError> {
        self.fail()
    }
}

#[async_trait]
impl RouteStore for FailingStore {
    async fn read_view(&self) -> Result<RouteView, DataStoreError> {
        self.fail()
    }

    async fn list_listeners(&self) -> Result<Vec<Listener>, DataStoreError> {
        self.fail()
    }

    async fn list_stream_routes_by_listener(
        &self,
        _listen_id: u32,
    ) -> Result<Vec<StreamRoute>, DataStoreError> {
        self.fail()
    }

    async fn list_http_routes_by_listener(
        &self,
        _listen_id: u32,
    ) -> Result<Vec<HttpRoute>, DataStoreError> {
        self.fail()
    }

    async fn get_domain(&self, _id: u32) -> Result<Option<Domain>, DataStoreError> {
        self.fail()
    }

    async fn get_ssh_port(&self, _id: u32) -> Result<Option<SshPort>, DataStoreError> {
        self.fail()
    }
}

/// A store whose lookups hang for `delay` before answering "not found".
#[derive(Debug)]
pub struct SlowStore {
    pub delay: Duration,
}

#[async_trait]
impl AccessStore for SlowStore {
    async fn find_listener(&self, id: u32) -> Result<Option<Listener>, DataStoreError> {
        tokio::time::sleep(self.delay).await;
        Ok(Some(checked_listener(id, AddressCheckMode::Blacklist)))
    }

    async fn find_enabled_blacklist_entry(
        &self,
        _ip: &str,
    ) -> Result<Option<BlacklistEntry>, DataStoreError> {
        tokio::time::sleep(self.delay).await;
        Ok(None)
    }

    async fn find_enabled_whitelist_entry(
        &self,
        _ip: &str,
    ) -> Result<Option<WhitelistEntry>, DataStoreError> {
        tokio::time::sleep(self.delay).await;
        Ok(None)
    }

    async fn increment_block_counter(&self, _id: u32, _at: u64) -> Result<(), DataStoreError> {
        Ok(())
    }

    async fn increment_access_counter(&self, _id: u32, _at: u64) -> Result<(), DataStoreError> {
        Ok(())
    }

    async fn list_own_blacklist(&self) -> Result<Vec<BlacklistEntry>, DataStoreError> {
        Ok(Vec::new())
    }
}
