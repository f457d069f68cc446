//! Stream (SNI) pass: one map, one server per listener port.

use std::collections::HashMap;
use std::net::Ipv6Addr;

use indexmap::IndexMap;

use crate::compiler::{skippable, CompileError};
use crate::conf::{ConfigModel, ContextKind, MapDirective, Upstream, VirtualServer};
use crate::config::ProxySettings;
use crate::store::{
    BalancingAlgorithm, DataStoreError, DestinationType, Domain, Listener, RouteStore, StreamRoute,
};

/// Map input: the server name negotiated in the TLS client hello.
pub const SNI_SOURCE: &str = "$ssl_preread_server_name";

/// A stream route with every reference resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedStreamRoute {
    pub route_id: u32,
    pub domain: Domain,
    pub upstream_name: String,
    pub target: String,
    pub balancing: BalancingAlgorithm,
    pub is_default: bool,
}

#[derive(Debug)]
struct PortGroup {
    listener_id: u32,
    routes: Vec<ResolvedStreamRoute>,
}

/// Resolved routes grouped by listen port, in listener order.
#[derive(Debug, Default)]
pub struct StreamGroups {
    ports: IndexMap<i32, PortGroup>,
}

impl StreamGroups {
    pub fn insert(&mut self, listener: &Listener, routes: Vec<ResolvedStreamRoute>) {
        match self.ports.get_mut(&listener.listen_port) {
            Some(group) => {
                tracing::warn!(
                    port = listener.listen_port,
                    listener_id = listener.id,
                    kept_listener_id = group.listener_id,
                    "Several stream listeners share a port, merging their routes"
                );
                group.routes.extend(routes);
            }
            None => {
                self.ports.insert(
                    listener.listen_port,
                    PortGroup {
                        listener_id: listener.id,
                        routes,
                    },
                );
            }
        }
    }

    fn has_routes(&self) -> bool {
        self.ports.values().any(|g| !g.routes.is_empty())
    }
}

/// Upstream group name for an `(alias, domain)` pair.
pub fn upstream_name(prefix: &str, alias: &str, domain_id: u32) -> String {
    if alias.is_empty() {
        format!("{prefix}{domain_id}")
    } else {
        format!("{prefix}{alias}_{domain_id}")
    }
}

/// Per-port map output variable.
pub fn port_variable(port: i32) -> String {
    format!("$ffstream{port}")
}

/// Load and resolve the routes of one stream listener, ordered by `(index, id)`.
pub async fn resolve_routes(
    store: &dyn RouteStore,
    listener: &Listener,
    listeners: &HashMap<u32, Listener>,
    prefix: &str,
    skipped: &mut usize,
) -> Result<Vec<ResolvedStreamRoute>, CompileError> {
    let mut routes = store.list_stream_routes_by_listener(listener.id).await?;
    routes.sort_by_key(|r| (r.index, r.id));

    let mut resolved = Vec::with_capacity(routes.len());
    for route in routes {
        let Some(domain) = skippable(store.get_domain(route.domain_id).await, "domain", route.domain_id)?
        else {
            tracing::warn!(
                route_id = route.id,
                domain_id = route.domain_id,
                listener_id = listener.id,
                "Stream route references a missing domain, skipping"
            );
            *skipped += 1;
            continue;
        };

        let Some(target) = resolve_target(store, &route, listeners).await? else {
            tracing::warn!(
                route_id = route.id,
                destination_type = ?route.destination_type,
                listener_id = listener.id,
                "Stream route destination cannot be resolved, skipping"
            );
            *skipped += 1;
            continue;
        };

        resolved.push(ResolvedStreamRoute {
            route_id: route.id,
            upstream_name: upstream_name(prefix, &route.alias_name, domain.id),
            domain,
            target,
            balancing: route.load_balancing_algorithm,
            is_default: route.is_default,
        });
    }
    Ok(resolved)
}

async fn resolve_target(
    store: &dyn RouteStore,
    route: &StreamRoute,
    listeners: &HashMap<u32, Listener>,
) -> Result<Option<String>, DataStoreError> {
    match route.destination_type {
        DestinationType::Upstream => {
            let address = route.destination_address.trim();
            if address.is_empty() || route.destination_port == 0 {
                return Ok(None);
            }
            Ok(Some(join_host_port(address, route.destination_port)))
        }
        DestinationType::Listen => Ok(listeners
            .get(&route.destination_listen_id)
            .filter(|l| l.listen_port > 0)
            .map(|l| format!("127.0.0.1:{}", l.listen_port))),
        DestinationType::SshLocal | DestinationType::SshRemote => {
            let port = skippable(
                store.get_ssh_port(route.ssh_port_id).await,
                "ssh_port",
                route.ssh_port_id,
            )?;
            Ok(port
                .filter(|p| p.port != 0)
                .map(|p| format!("127.0.0.1:{}", p.port)))
        }
    }
}

fn join_host_port(address: &str, port: u16) -> String {
    if address.parse::<Ipv6Addr>().is_ok() {
        format!("[{address}]:{port}")
    } else {
        format!("{address}:{port}")
    }
}

/// Populate the stream context from resolved groups.
pub fn emit(
    model: &mut ConfigModel,
    groups: &StreamGroups,
    settings: &ProxySettings,
) -> Result<(), CompileError> {
    if !groups.has_routes() {
        return Ok(());
    }
    model
        .context_mut(ContextKind::Stream)
        .add_variable("js_import", settings.js_import.as_str())?;

    for (&port, group) in &groups.ports {
        if group.routes.is_empty() {
            continue;
        }
        let variable = port_variable(port);
        let mut map = MapDirective::new(SNI_SOURCE, variable.as_str());

        for route in &group.routes {
            let upstream =
                Upstream::new(route.upstream_name.as_str()).with_balancing(route.balancing.directive());
            model.add_upstream(upstream)?;
            if let Some(existing) = model
                .context_mut(ContextKind::Stream)
                .upstream_mut(&route.upstream_name)
            {
                existing.add_server(route.target.as_str());
            }

            if route.is_default {
                map.set_default(route.upstream_name.as_str())?;
            } else {
                map.add_entry(route.domain.name.as_str(), route.upstream_name.as_str())?;
            }
        }
        model.add_map(map)?;

        let server = VirtualServer::new(port)
            .directive(
                "set",
                format!("{} {}", settings.listen_id_variable, group.listener_id),
            )
            .directive("js_access", settings.access_hook.as_str())
            .directive("proxy_pass", variable)
            .directive("ssl_preread", "on");
        model.add_server(ContextKind::Stream, server)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conf::ValidationError;
    use crate::store::{ListenKind, MemoryStore, SshPort};

    fn listener(id: u32, port: i32) -> Listener {
        Listener {
            id,
            listen_port: port,
            kind: ListenKind::Stream,
            enable_address_check: false,
            address_check_mode: Default::default(),
            description: String::new(),
        }
    }

    fn resolved(domain_id: u32, name: &str, upstream: &str, target: &str) -> ResolvedStreamRoute {
        ResolvedStreamRoute {
            route_id: domain_id,
            domain: Domain {
                id: domain_id,
                name: name.to_string(),
            },
            upstream_name: upstream.to_string(),
            target: target.to_string(),
            balancing: BalancingAlgorithm::None,
            is_default: false,
        }
    }

    #[test]
    fn test_upstream_name() {
        assert_eq!(upstream_name("ffus_", "", 7), "ffus_7");
        assert_eq!(upstream_name("ffus_", "web", 7), "ffus_web_7");
    }

    #[test]
    fn test_join_host_port_brackets_ipv6() {
        assert_eq!(join_host_port("10.0.0.1", 443), "10.0.0.1:443");
        assert_eq!(join_host_port("2001:db8::1", 443), "[2001:db8::1]:443");
        assert_eq!(join_host_port("backend.internal", 80), "backend.internal:80");
    }

    #[test]
    fn test_shared_alias_creates_one_group() {
        let mut groups = StreamGroups::default();
        groups.insert(
            &listener(1, 443),
            vec![
                resolved(3, "a.example.com", "ffus_web_3", "10.0.0.1:443"),
                resolved(3, "b.example.com", "ffus_web_3", "10.0.0.2:443"),
                resolved(3, "c.example.com", "ffus_web_3", "10.0.0.1:443"),
            ],
        );

        let mut model = ConfigModel::new();
        emit(&mut model, &groups, &ProxySettings::default()).unwrap();

        let upstreams: Vec<_> = model.stream().upstreams().collect();
        assert_eq!(upstreams.len(), 1);
        assert_eq!(upstreams[0].servers(), ["10.0.0.1:443", "10.0.0.2:443"]);
        assert_eq!(model.stream().map("$ffstream443").unwrap().entries().count(), 3);
    }

    #[test]
    fn test_duplicate_domain_on_port_is_rejected() {
        let mut groups = StreamGroups::default();
        groups.insert(
            &listener(1, 443),
            vec![
                resolved(3, "a.example.com", "ffus_3", "10.0.0.1:443"),
                resolved(4, "a.example.com", "ffus_4", "10.0.0.2:443"),
            ],
        );

        let mut model = ConfigModel::new();
        let err = emit(&mut model, &groups, &ProxySettings::default()).unwrap_err();
        assert!(matches!(
            err,
            CompileError::Invalid(ValidationError::DuplicateMapKey { .. })
        ));
    }

    #[test]
    fn test_listener_without_routes_emits_nothing() {
        let mut groups = StreamGroups::default();
        groups.insert(&listener(1, 443), Vec::new());

        let mut model = ConfigModel::new();
        emit(&mut model, &groups, &ProxySettings::default()).unwrap();
        assert!(model.stream().is_empty());
    }

    #[test]
    fn test_server_wires_hook_and_listener_id() {
        let mut groups = StreamGroups::default();
        groups.insert(
            &listener(9, 8443),
            vec![resolved(1, "a.example.com", "ffus_1", "10.0.0.1:443")],
        );

        let mut model = ConfigModel::new();
        emit(&mut model, &groups, &ProxySettings::default()).unwrap();

        let server = &model.stream().servers()[0];
        let pairs: Vec<(&str, &str)> = server
            .directives()
            .iter()
            .map(|d| (d.name.as_str(), d.value.as_str()))
            .collect();
        assert_eq!(
            pairs,
            [
                ("set", "$ff_listen_id 9"),
                ("js_access", "njs.accessAddressStream"),
                ("proxy_pass", "$ffstream8443"),
                ("ssl_preread", "on"),
            ]
        );
    }

    #[tokio::test]
    async fn test_resolves_listen_and_ssh_destinations() {
        let store = MemoryStore::new();
        store.upsert_domain(Domain { id: 1, name: "a.example.com".into() }).await;
        store.upsert_ssh_port(SshPort { id: 4, port: 2222 }).await;

        let mut to_listener = StreamRoute {
            id: 1,
            domain_id: 1,
            listen_id: 1,
            destination_type: DestinationType::Listen,
            destination_listen_id: 2,
            destination_address: String::new(),
            destination_port: 0,
            index: 1,
            load_balancing_algorithm: BalancingAlgorithm::None,
            alias_name: String::new(),
            is_default: false,
            ssh_tunnel: Default::default(),
            ssh_port_id: 0,
        };
        store.upsert_stream_route(to_listener.clone()).await;

        to_listener.id = 2;
        to_listener.index = 0;
        to_listener.destination_type = DestinationType::SshRemote;
        to_listener.ssh_port_id = 4;
        to_listener.alias_name = "ssh".into();
        store.upsert_stream_route(to_listener.clone()).await;

        to_listener.id = 3;
        to_listener.index = 2;
        to_listener.ssh_port_id = 99;
        store.upsert_stream_route(to_listener).await;

        let mut listeners = HashMap::new();
        listeners.insert(1, listener(1, 443));
        listeners.insert(2, listener(2, 8080));

        let mut skipped = 0;
        let routes = resolve_routes(&store, &listeners[&1], &listeners, "ffus_", &mut skipped)
            .await
            .unwrap();

        assert_eq!(skipped, 1);
        let targets: Vec<_> = routes.iter().map(|r| r.target.as_str()).collect();
        assert_eq!(targets, ["127.0.0.1:2222", "127.0.0.1:8080"]);
        assert_eq!(routes[0].upstream_name, "ffus_ssh_1");
    }
}
