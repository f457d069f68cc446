//! HTTP pass: named virtual hosts plus one catch-all per port.

use indexmap::IndexMap;

use crate::compiler::{skippable, CompileError};
use crate::conf::{ConfigModel, ContextKind, ErrorPage, VirtualServer};
use crate::config::ProxySettings;
use crate::store::{Domain, Listener, RouteStore};

/// Status codes answered by the static error resource on the catch-all.
pub const UPSTREAM_ERROR_CODES: [u16; 4] = [500, 502, 503, 504];

/// Virtual host names grouped by listen port, in listener order.
#[derive(Debug, Default)]
pub struct HttpGroups {
    ports: IndexMap<i32, Vec<Domain>>,
}

impl HttpGroups {
    pub fn insert(&mut self, listener: &Listener, hosts: Vec<Domain>) {
        let port = self.ports.entry(listener.listen_port).or_default();
        for host in hosts {
            if port.iter().any(|d| d.name == host.name) {
                tracing::warn!(
                    port = listener.listen_port,
                    host = %host.name,
                    "Virtual host bound twice on the same port, keeping the first"
                );
                continue;
            }
            port.push(host);
        }
    }
}

/// Load the domains served by one HTTP listener, ordered by route id.
pub async fn resolve_hosts(
    store: &dyn RouteStore,
    listener: &Listener,
    skipped: &mut usize,
) -> Result<Vec<Domain>, CompileError> {
    let mut routes = store.list_http_routes_by_listener(listener.id).await?;
    routes.sort_by_key(|r| r.id);

    let mut hosts = Vec::with_capacity(routes.len());
    for route in routes {
        match skippable(store.get_domain(route.domain_id).await, "domain", route.domain_id)? {
            Some(domain) => hosts.push(domain),
            None => {
                tracing::warn!(
                    route_id = route.id,
                    domain_id = route.domain_id,
                    listener_id = listener.id,
                    "HTTP route references a missing domain, skipping"
                );
                *skipped += 1;
            }
        }
    }
    Ok(hosts)
}

/// Populate the http context from resolved groups.
pub fn emit(
    model: &mut ConfigModel,
    groups: &HttpGroups,
    settings: &ProxySettings,
) -> Result<(), CompileError> {
    for (&port, hosts) in &groups.ports {
        if hosts.is_empty() {
            continue;
        }
        for host in hosts {
            model.add_server(
                ContextKind::Http,
                VirtualServer::new(port).server_name(host.name.as_str()),
            )?;
        }
        let catch_all = VirtualServer::new(port)
            .default_server()
            .error_page(ErrorPage::new(UPSTREAM_ERROR_CODES, settings.error_page_uri.as_str()));
        model.add_server(ContextKind::Http, catch_all)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ListenKind;

    fn listener(id: u32, port: i32) -> Listener {
        Listener {
            id,
            listen_port: port,
            kind: ListenKind::Http,
            enable_address_check: false,
            address_check_mode: Default::default(),
            description: String::new(),
        }
    }

    fn domain(id: u32, name: &str) -> Domain {
        Domain {
            id,
            name: name.to_string(),
        }
    }

    #[test]
    fn test_one_catch_all_per_port() {
        let mut groups = HttpGroups::default();
        groups.insert(&listener(1, 80), vec![domain(1, "a.example.com"), domain(2, "b.example.com")]);
        groups.insert(&listener(2, 8080), vec![domain(1, "a.example.com")]);

        let mut model = ConfigModel::new();
        emit(&mut model, &groups, &ProxySettings::default()).unwrap();

        let servers = model.http().servers();
        assert_eq!(servers.len(), 5);
        for port in [80, 8080] {
            let defaults: Vec<_> = servers
                .iter()
                .filter(|s| s.listen_port() == port && s.is_default_server())
                .collect();
            assert_eq!(defaults.len(), 1);
            assert_eq!(defaults[0].error_pages()[0].codes, UPSTREAM_ERROR_CODES);
            assert_eq!(defaults[0].error_pages()[0].uri, "/bad_gateway.html");
        }
    }

    #[test]
    fn test_duplicate_host_on_port_is_dropped() {
        let mut groups = HttpGroups::default();
        groups.insert(&listener(1, 80), vec![domain(1, "a.example.com")]);
        groups.insert(&listener(2, 80), vec![domain(1, "a.example.com")]);

        let mut model = ConfigModel::new();
        emit(&mut model, &groups, &ProxySettings::default()).unwrap();
        assert_eq!(model.http().servers().len(), 2);
    }

    #[test]
    fn test_port_without_hosts_emits_nothing() {
        let mut groups = HttpGroups::default();
        groups.insert(&listener(1, 80), Vec::new());

        let mut model = ConfigModel::new();
        emit(&mut model, &groups, &ProxySettings::default()).unwrap();
        assert!(model.http().is_empty());
    }
}
