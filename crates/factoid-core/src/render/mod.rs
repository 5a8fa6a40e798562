//! Render cache for the browsable factoid listing.
//!
//! The listing is rendered once and then served from memory until either an
//! admin mutation calls [`RenderCache::invalidate`] or the background check
//! notices the template file changed on disk. Regeneration is lazy: it only
//! happens on the next request, inside [`RenderCache::ensure_fresh`].
//!
//! One mutex guards the template registry and the output buffer, so `serve`
//! never sees a half-written buffer and concurrent `ensure_fresh` calls
//! regenerate once. Invalidation only bumps an atomic epoch and never takes
//! that mutex: admin commands invalidate while holding the store write lock,
//! and `ensure_fresh` takes the store read lock while holding the mutex.

mod linkify;

pub use linkify::linkify;

use crate::knowledge::FactoidStore;
use handlebars::Handlebars;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::{Duration, SystemTime};
use thiserror::Error;

/// Default template location, relative to the working directory.
pub const DEFAULT_TEMPLATE_PATH: &str = "factoid.tpl";

/// Default interval of the template freshness check.
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(30);

const TEMPLATE_NAME: &str = "factoids";

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("cannot stat template {}: {source}", .path.display())]
    TemplateIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed parsing template: {0}")]
    Template(#[from] handlebars::TemplateError),
    #[error("failed rendering factoid listing: {0}")]
    Render(#[from] handlebars::RenderError),
}

/// One canonical factoid as handed to the template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderRecord {
    pub name: String,
    pub text: String,
    pub aliases: Vec<String>,
}

/// Snapshot of the store as records sorted by name, each with sorted aliases.
pub fn build_records(store: &FactoidStore) -> Vec<RenderRecord> {
    let mut aliases: HashMap<&str, Vec<String>> = HashMap::new();
    for (alias, target) in store.aliases() {
        aliases.entry(target).or_default().push(alias.to_string());
    }

    let mut records: Vec<RenderRecord> = store
        .factoids()
        .map(|(name, text)| {
            let mut names = aliases.remove(name).unwrap_or_default();
            names.sort();
            RenderRecord {
                name: name.to_string(),
                text: text.to_string(),
                aliases: names,
            }
        })
        .collect();
    records.sort_by(|a, b| a.name.cmp(&b.name));
    records
}

struct CacheState {
    registry: Handlebars<'static>,
    /// Epoch the current output was rendered at.
    rendered_epoch: Option<u64>,
    template_mtime: Option<SystemTime>,
    /// Last good document. `None` until the first successful render.
    output: Option<Arc<[u8]>>,
    scratch: Vec<u8>,
    generation: u64,
}

pub struct RenderCache {
    template_path: PathBuf,
    epoch: AtomicU64,
    state: Mutex<CacheState>,
}

impl RenderCache {
    /// Creates an invalid cache. Nothing is read from disk until the first `ensure_fresh`.
    pub fn new(template_path: impl Into<PathBuf>) -> Self {
        let mut registry = Handlebars::new();
        registry.register_helper("linkify", Box::new(linkify::linkify_helper));
        Self {
            template_path: template_path.into(),
            epoch: AtomicU64::new(0),
            state: Mutex::new(CacheState {
                registry,
                rendered_epoch: None,
                template_mtime: None,
                output: None,
                scratch: Vec::new(),
                generation: 0,
            }),
        }
    }

    pub fn template_path(&self) -> &Path {
        &self.template_path
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn invalidate(&self) {
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::debug!(target: "factoid::render", epoch, "Render cache invalidated");
    }

    pub fn is_valid(&self) -> bool {
        self.valid_in(&self.lock())
    }

    fn valid_in(&self, state: &CacheState) -> bool {
        state.rendered_epoch == Some(self.epoch.load(Ordering::SeqCst))
    }

    /// Number of successful regenerations since startup.
    pub fn generation(&self) -> u64 {
        self.lock().generation
    }

    /// Regenerates the listing if the cache is invalid.
    ///
    /// On error the cache stays invalid and the previous output is kept, so
    /// the next call retries.
    pub fn ensure_fresh(&self, store: &RwLock<FactoidStore>) -> Result<(), RenderError> {
        let mut guard = self.lock();
        // Read before the snapshot: a mutation landing mid-render bumps the
        // epoch again and the next call re-renders.
        let epoch = self.epoch.load(Ordering::SeqCst);
        if guard.rendered_epoch == Some(epoch) {
            return Ok(());
        }
        let state = &mut *guard;

        let mtime = template_mtime(&self.template_path)?;
        state
            .registry
            .register_template_file(TEMPLATE_NAME, &self.template_path)?;

        let records = {
            let store = store.read().unwrap_or_else(PoisonError::into_inner);
            build_records(&store)
        };
        let data = serde_json::json!({
            "factoids": records,
            "count": records.len(),
        });

        state.scratch.clear();
        state
            .registry
            .render_to_write(TEMPLATE_NAME, &data, &mut state.scratch)?;
        let output: Arc<[u8]> = Arc::from(state.scratch.as_slice());
        let bytes = output.len();
        state.output = Some(output);

        state.template_mtime = Some(mtime);
        state.rendered_epoch = Some(epoch);
        state.generation += 1;
        tracing::info!(
            target: "factoid::render",
            factoids = records.len(),
            bytes,
            generation = state.generation,
            "Factoid listing regenerated"
        );
        Ok(())
    }

    /// The cached document, or `None` if nothing has rendered successfully yet.
    /// Call [`Self::ensure_fresh`] first. Callers share one buffer per render.
    pub fn serve(&self) -> Option<Arc<[u8]>> {
        self.lock().output.clone()
    }

    /// Marks the cache invalid when the template's mtime moved since the last
    /// render. Never regenerates. Stat failures leave the state alone.
    pub fn check_template_changed(&self) {
        let state = self.lock();
        if !self.valid_in(&state) {
            return;
        }
        let mtime = match template_mtime(&self.template_path) {
            Ok(t) => t,
            Err(e) => {
                tracing::debug!(target: "factoid::render", error = %e, "Error stating template");
                return;
            }
        };
        if state.template_mtime != Some(mtime) {
            tracing::info!(
                target: "factoid::render",
                path = %self.template_path.display(),
                "Template changed on disk; listing will be regenerated"
            );
            self.invalidate();
        }
    }

    /// Starts the periodic template check. Runs for the life of the runtime.
    pub fn spawn_freshness_check(self: &Arc<Self>, every: Duration) -> tokio::task::JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            tracing::info!(
                target: "factoid::render",
                interval_secs = every.as_secs(),
                "Template freshness check started"
            );
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                cache.check_template_changed();
            }
        })
    }

    #[cfg(test)]
    pub(crate) fn mark_valid_for_tests(&self) {
        let epoch = self.epoch.load(Ordering::SeqCst);
        let mut state = self.lock();
        state.output.get_or_insert_with(|| Arc::from(&b""[..]));
        state.rendered_epoch = Some(epoch);
    }
}

fn template_mtime(path: &Path) -> Result<SystemTime, RenderError> {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .map_err(|source| RenderError::TemplateIo {
            path: path.to_path_buf(),
            source,
        })
}
