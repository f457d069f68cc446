//! `server` blocks.

use crate::conf::{Directive, ValidationError};

/// Binds a set of status codes to a static error resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorPage {
    pub codes: Vec<u16>,
    pub uri: String,
}

impl ErrorPage {
    pub fn new(codes: impl Into<Vec<u16>>, uri: impl Into<String>) -> Self {
        Self {
            codes: codes.into(),
            uri: uri.into(),
        }
    }
}

/// One virtual server block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualServer {
    listen_port: i64,
    default_server: bool,
    server_name: Option<String>,
    directives: Vec<Directive>,
    error_pages: Vec<ErrorPage>,
}

impl VirtualServer {
    /// Start a server listening on `port`. The port is checked when the
    /// server is added to a context.
    pub fn new(port: impl Into<i64>) -> Self {
        Self {
            listen_port: port.into(),
            default_server: false,
            server_name: None,
            directives: Vec::new(),
            error_pages: Vec::new(),
        }
    }

    /// Mark as the catch-all for its port.
    pub fn default_server(mut self) -> Self {
        self.default_server = true;
        self
    }

    pub fn server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = Some(name.into());
        self
    }

    pub fn directive(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.directives.push(Directive {
            name: name.into(),
            value: value.into(),
        });
        self
    }

    pub fn error_page(mut self, page: ErrorPage) -> Self {
        self.error_pages.push(page);
        self
    }

    pub fn listen_port(&self) -> i64 {
        self.listen_port
    }

    pub fn is_default_server(&self) -> bool {
        self.default_server
    }

    pub fn name(&self) -> Option<&str> {
        self.server_name.as_deref()
    }

    pub fn directives(&self) -> &[Directive] {
        &self.directives
    }

    pub fn error_pages(&self) -> &[ErrorPage] {
        &self.error_pages
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if !(1..=i64::from(u16::MAX)).contains(&self.listen_port) {
            return Err(ValidationError::InvalidPort {
                port: self.listen_port,
            });
        }
        if self.directives.iter().any(|d| d.name.trim().is_empty()) {
            return Err(ValidationError::Empty { what: "directive name" });
        }
        if self.error_pages.iter().any(|p| p.codes.is_empty() || p.uri.is_empty()) {
            return Err(ValidationError::Empty { what: "error page binding" });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_range() {
        assert!(VirtualServer::new(1).validate().is_ok());
        assert!(VirtualServer::new(65535).validate().is_ok());
        assert!(VirtualServer::new(65536).validate().is_err());
        assert!(VirtualServer::new(0).validate().is_err());
    }

    #[test]
    fn test_error_page_must_bind_codes() {
        let server = VirtualServer::new(80).error_page(ErrorPage::new(vec![], "/x.html"));
        assert!(matches!(server.validate(), Err(ValidationError::Empty { .. })));
    }
}
