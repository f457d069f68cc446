//! Named upstream groups.

use crate::conf::Directive;

/// A named set of backend `address:port` targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upstream {
    name: String,
    directives: Vec<Directive>,
    servers: Vec<String>,
}

impl Upstream {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            directives: Vec::new(),
            servers: Vec::new(),
        }
    }

    /// Set the balancing directive (e.g. `least_conn`). `None` leaves the
    /// proxy's round robin default in place.
    pub fn with_balancing(mut self, directive: Option<&str>) -> Self {
        if let Some(name) = directive {
            self.directives.push(Directive {
                name: name.to_string(),
                value: String::new(),
            });
        }
        self
    }

    /// Bind a target. Returns `false` if the target was already bound.
    pub fn add_server(&mut self, target: impl Into<String>) -> bool {
        let target = target.into();
        if self.servers.contains(&target) {
            return false;
        }
        self.servers.push(target);
        true
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn directives(&self) -> &[Directive] {
        &self.directives
    }

    pub fn servers(&self) -> &[String] {
        &self.servers
    }
}
