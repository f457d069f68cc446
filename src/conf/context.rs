//! One top-level context (`stream` or `http`) of the proxy configuration.

use indexmap::map::Entry;
use indexmap::IndexMap;

use crate::conf::{ContextKind, MapDirective, Upstream, ValidationError, VirtualServer};

/// A single `name value;` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directive {
    pub name: String,
    pub value: String,
}

impl Directive {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Result<Self, ValidationError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(ValidationError::Empty { what: "directive name" });
        }
        Ok(Self {
            name,
            value: value.into(),
        })
    }
}

/// Arena of upstreams, maps, and servers for one context.
///
/// Upstreams are keyed by group name and maps by output variable; both keep
/// insertion order so rendering is a pure function of the call sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextBlock {
    kind: ContextKind,
    variables: Vec<Directive>,
    upstreams: IndexMap<String, Upstream>,
    maps: IndexMap<String, MapDirective>,
    servers: Vec<VirtualServer>,
}

impl ContextBlock {
    pub fn new(kind: ContextKind) -> Self {
        Self {
            kind,
            variables: Vec::new(),
            upstreams: IndexMap::new(),
            maps: IndexMap::new(),
            servers: Vec::new(),
        }
    }

    pub fn kind(&self) -> ContextKind {
        self.kind
    }

    /// Add a context-level directive such as `js_import`.
    pub fn add_variable(
        &mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<(), ValidationError> {
        self.variables.push(Directive::new(name, value)?);
        Ok(())
    }

    /// Insert an upstream group unless one with the same name exists.
    pub fn add_upstream(&mut self, upstream: Upstream) -> Result<bool, ValidationError> {
        if upstream.name().is_empty() {
            return Err(ValidationError::Empty { what: "upstream name" });
        }
        match self.upstreams.entry(upstream.name().to_string()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(upstream);
                Ok(true)
            }
        }
    }

    pub fn upstream(&self, name: &str) -> Option<&Upstream> {
        self.upstreams.get(name)
    }

    pub fn upstream_mut(&mut self, name: &str) -> Option<&mut Upstream> {
        self.upstreams.get_mut(name)
    }

    pub fn add_map(&mut self, map: MapDirective) -> Result<(), ValidationError> {
        match self.maps.entry(map.variable().to_string()) {
            Entry::Occupied(_) => Err(ValidationError::DuplicateMap {
                variable: map.variable().to_string(),
            }),
            Entry::Vacant(slot) => {
                slot.insert(map);
                Ok(())
            }
        }
    }

    /// Look up a map by its output variable.
    pub fn map(&self, variable: &str) -> Option<&MapDirective> {
        self.maps.get(variable)
    }

    pub fn add_server(&mut self, server: VirtualServer) -> Result<(), ValidationError> {
        server.validate()?;
        self.servers.push(server);
        Ok(())
    }

    pub fn variables(&self) -> &[Directive] {
        &self.variables
    }

    pub fn upstreams(&self) -> impl Iterator<Item = &Upstream> {
        self.upstreams.values()
    }

    pub fn maps(&self) -> impl Iterator<Item = &MapDirective> {
        self.maps.values()
    }

    pub fn servers(&self) -> &[VirtualServer] {
        &self.servers
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
            && self.upstreams.is_empty()
            && self.maps.is_empty()
            && self.servers.is_empty()
    }

    pub fn reset(&mut self) {
        self.variables.clear();
        self.upstreams.clear();
        self.maps.clear();
        self.servers.clear();
    }
}
