//! Point-in-time copy of the routing tables.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::store::{DataStoreError, Domain, HttpRoute, Listener, RouteStore, SshPort, StreamRoute};

/// Routing rows as they stood at one instant.
///
/// A compile pass reads only from a view, so a reload that lands mid-pass
/// cannot pair old listeners with new routes.
#[derive(Debug, Clone, Default)]
pub struct RouteView {
    pub listeners: Vec<Listener>,
    pub domains: HashMap<u32, Domain>,
    pub stream_routes: Vec<StreamRoute>,
    pub http_routes: Vec<HttpRoute>,
    pub ssh_ports: HashMap<u32, SshPort>,
}

#[async_trait]
impl RouteStore for RouteView {
    async fn read_view(&self) -> Result<RouteView, DataStoreError> {
        Ok(self.clone())
    }

    async fn list_listeners(&self) -> Result<Vec<Listener>, DataStoreError> {
        let mut listeners = self.listeners.clone();
        listeners.sort_by_key(|l| l.id);
        Ok(listeners)
    }

    async fn list_stream_routes_by_listener(
        &self,
        listen_id: u32,
    ) -> Result<Vec<StreamRoute>, DataStoreError> {
        let mut routes: Vec<StreamRoute> = self
            .stream_routes
            .iter()
            .filter(|r| r.listen_id == listen_id)
            .cloned()
            .collect();
        routes.sort_by_key(|r| (r.index, r.id));
        Ok(routes)
    }

    async fn list_http_routes_by_listener(
        &self,
        listen_id: u32,
    ) -> Result<Vec<HttpRoute>, DataStoreError> {
        let mut routes: Vec<HttpRoute> = self
            .http_routes
            .iter()
            .filter(|r| r.listen_id == listen_id)
            .cloned()
            .collect();
        routes.sort_by_key(|r| r.id);
        Ok(routes)
    }

    async fn get_domain(&self, id: u32) -> Result<Option<Domain>, DataStoreError> {
        Ok(self.domains.get(&id).cloned())
    }

    async fn get_ssh_port(&self, id: u32) -> Result<Option<SshPort>, DataStoreError> {
        Ok(self.ssh_ports.get(&id).cloned())
    }
}
