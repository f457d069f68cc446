//! Route compilation subsystem.
//!
//! # Data Flow
//! ```text
//! RouteStore (listeners, routes, domains)
//!     → stream.rs (group by port, SNI map, upstream groups, one server per port)
//!     → http.rs (named virtual hosts + one catch-all per port)
//!     → ConfigModel rendered per context
//!     → writer.rs (temp file, fsync, rename over the live path)
//!     → CompiledConfig (also kept as the last good result)
//! ```
//!
//! # Design Decisions
//! - Every pass rebuilds the whole model; nothing is patched incrementally
//! - Passes are single-flight; concurrent callers queue on one lock
//! - A bad row is skipped, a bad pass is aborted with the live files untouched
//! - Unchanged output is not rewritten, so callers can skip the reload

pub mod http;
pub mod stream;
pub mod writer;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use arc_swap::ArcSwapOption;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::Instrument;
use uuid::Uuid;

use crate::conf::{ConfigModel, ContextKind, ValidationError};
use crate::config::ProxySettings;
use crate::observability::metrics;
use crate::store::{DataStoreError, ListenKind, Listener, RouteStore};

/// Failure of a whole compile pass.
#[derive(Debug, Error)]
pub enum CompileError {
    /// The routing state produced an invalid model.
    #[error("invalid proxy configuration: {0}")]
    Invalid(#[from] ValidationError),

    /// Reading routing state failed.
    #[error("failed to read routing state: {0}")]
    Store(#[from] DataStoreError),

    /// Writing a compiled file failed.
    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Counters describing one pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompileStats {
    pub listeners: usize,
    pub upstreams: usize,
    pub maps: usize,
    pub stream_servers: usize,
    pub http_servers: usize,
    /// Rows dropped because a reference could not be resolved.
    pub skipped_routes: usize,
}

/// Output of a successful pass.
#[derive(Debug, Clone)]
pub struct CompiledConfig {
    pub stream: String,
    pub http: String,
    pub stream_path: PathBuf,
    pub http_path: PathBuf,
    /// False when both files already held this exact content.
    pub changed: bool,
    pub stats: CompileStats,
}

/// Builds the proxy configuration from routing state.
pub struct RouteCompiler {
    store: Arc<dyn RouteStore>,
    settings: ProxySettings,
    in_flight: Mutex<()>,
    last: ArcSwapOption<CompiledConfig>,
}

impl RouteCompiler {
    pub fn new(store: Arc<dyn RouteStore>, settings: ProxySettings) -> Self {
        Self {
            store,
            settings,
            in_flight: Mutex::new(()),
            last: ArcSwapOption::empty(),
        }
    }

    pub fn settings(&self) -> &ProxySettings {
        &self.settings
    }

    /// Last successfully written configuration.
    pub fn last_compiled(&self) -> Option<Arc<CompiledConfig>> {
        self.last.load_full()
    }

    /// Build the model from one consistent view of the store. Reads only;
    /// nothing is written.
    pub async fn build_model(&self) -> Result<(ConfigModel, CompileStats), CompileError> {
        let mut model = ConfigModel::new();
        model.reset_stream();
        model.reset_http();

        let view = self.store.read_view().await?;
        let mut listeners = view.list_listeners().await?;
        listeners.sort_by_key(|l| l.id);
        let by_id: HashMap<u32, Listener> = listeners.iter().map(|l| (l.id, l.clone())).collect();

        let mut stats = CompileStats {
            listeners: listeners.len(),
            ..CompileStats::default()
        };

        let mut stream_groups = stream::StreamGroups::default();
        let mut http_groups = http::HttpGroups::default();

        for listener in &listeners {
            match listener.kind {
                ListenKind::Stream => {
                    let routes = stream::resolve_routes(
                        &view,
                        listener,
                        &by_id,
                        &self.settings.upstream_prefix,
                        &mut stats.skipped_routes,
                    )
                    .await?;
                    stream_groups.insert(listener, routes);
                }
                ListenKind::Http => {
                    let hosts = http::resolve_hosts(
                        &view,
                        listener,
                        &mut stats.skipped_routes,
                    )
                    .await?;
                    http_groups.insert(listener, hosts);
                }
            }
        }

        stream::emit(&mut model, &stream_groups, &self.settings)?;
        http::emit(&mut model, &http_groups, &self.settings)?;

        stats.upstreams = model.stream().upstreams().count();
        stats.maps = model.stream().maps().count();
        stats.stream_servers = model.stream().servers().len();
        stats.http_servers = model.http().servers().len();
        Ok((model, stats))
    }

    /// Render both contexts without touching the filesystem.
    pub async fn preview(&self) -> Result<CompiledConfig, CompileError> {
        let (model, stats) = self.build_model().await?;
        Ok(CompiledConfig {
            stream: model.render(ContextKind::Stream),
            http: model.render(ContextKind::Http),
            stream_path: self.settings.stream_path(),
            http_path: self.settings.http_path(),
            changed: false,
            stats,
        })
    }

    /// Run a full pass and atomically replace the live configuration files.
    ///
    /// On error the previously written files are left as they were.
    pub async fn compile(&self) -> Result<Arc<CompiledConfig>, CompileError> {
        let _guard = self.in_flight.lock().await;
        let started = Instant::now();
        let span = tracing::info_span!("compile", pass_id = %Uuid::new_v4());

        let result = self.compile_locked().instrument(span).await;
        match &result {
            Ok(compiled) => {
                metrics::record_compile("ok", started);
                metrics::record_skipped_routes(compiled.stats.skipped_routes);
                self.last.store(Some(compiled.clone()));
            }
            Err(e) => {
                metrics::record_compile("error", started);
                tracing::error!(error = %e, "Compile pass failed, keeping previous configuration");
            }
        }
        result
    }

    async fn compile_locked(&self) -> Result<Arc<CompiledConfig>, CompileError> {
        let mut compiled = self.preview().await?;

        let stream_current = writer::read_current(&compiled.stream_path).await;
        let http_current = writer::read_current(&compiled.http_path).await;
        let stream_changed = stream_current.as_deref() != Some(compiled.stream.as_str());
        let http_changed = http_current.as_deref() != Some(compiled.http.as_str());

        let mut staged = Vec::new();
        if stream_changed {
            let file = writer::stage(&compiled.stream_path, &compiled.stream).await?;
            staged.push((file, stream_current));
        }
        if http_changed {
            match writer::stage(&compiled.http_path, &compiled.http).await {
                Ok(file) => staged.push((file, http_current)),
                Err(e) => {
                    for (file, _) in staged {
                        file.discard().await;
                    }
                    return Err(e);
                }
            }
        }

        // Both files change together: a failed rename rolls back the ones
        // already in place.
        let mut committed: Vec<(PathBuf, Option<String>)> = Vec::new();
        let mut staged = staged.into_iter();
        while let Some((file, previous)) = staged.next() {
            let target = file.target().to_path_buf();
            if let Err(e) = file.commit().await {
                for (rest, _) in staged {
                    rest.discard().await;
                }
                for (path, previous) in committed.iter().rev() {
                    if let Err(restore) = writer::restore(path, previous.as_deref()).await {
                        tracing::error!(
                            path = %path.display(),
                            error = %restore,
                            "Failed to restore previous configuration file"
                        );
                    }
                }
                return Err(e);
            }
            committed.push((target, previous));
        }

        compiled.changed = stream_changed || http_changed;
        tracing::info!(
            changed = compiled.changed,
            listeners = compiled.stats.listeners,
            upstreams = compiled.stats.upstreams,
            stream_servers = compiled.stats.stream_servers,
            http_servers = compiled.stats.http_servers,
            skipped_routes = compiled.stats.skipped_routes,
            "Compile pass finished"
        );
        Ok(Arc::new(compiled))
    }
}

/// Unwrap a per-row lookup: missing or corrupt rows become `None`, store
/// failures abort the pass.
pub(crate) fn skippable<T>(
    result: Result<Option<T>, DataStoreError>,
    what: &'static str,
    id: u32,
) -> Result<Option<T>, DataStoreError> {
    match result {
        Ok(found) => Ok(found),
        Err(e) if e.is_row_level() => {
            tracing::warn!(what, id, error = %e, "Skipping unreadable row");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}
