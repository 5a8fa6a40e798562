//! Wires the store, rate limiter, admin processor and render cache together.
//!
//! Built once at startup and shared (behind `Arc`) by every transport handler.

use crate::admin::{parse_admin_line, AdminCommandProcessor, AdminOutcome};
use crate::knowledge::{FactoidStore, StateSaver};
use crate::ratelimit::RateLimiter;
use crate::render::{RenderCache, RenderError};
use crate::shared::CoreConfig;
use crate::trigger::parse_trigger;
use std::sync::{Arc, PoisonError, RwLock};

/// Store size and listing cache state at one point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceStats {
    pub factoids: usize,
    pub aliases: usize,
    pub listing_valid: bool,
    pub listing_generation: u64,
}

pub struct FactoidService {
    store: Arc<RwLock<FactoidStore>>,
    limiter: RateLimiter,
    render: Arc<RenderCache>,
    admin: AdminCommandProcessor,
    trigger_marker: String,
}

impl FactoidService {
    pub fn new(store: FactoidStore, config: &CoreConfig, saver: Arc<dyn StateSaver>) -> Self {
        let render = Arc::new(RenderCache::new(&config.template_path));
        Self {
            store: Arc::new(RwLock::new(store)),
            limiter: RateLimiter::new(config.cooldown()),
            admin: AdminCommandProcessor::new(Arc::clone(&render), saver),
            render,
            trigger_marker: config.trigger_marker.clone(),
        }
    }

    pub fn store(&self) -> &Arc<RwLock<FactoidStore>> {
        &self.store
    }

    pub fn render_cache(&self) -> &Arc<RenderCache> {
        &self.render
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Takes the store read lock and the render mutex; call off the async workers.
    pub fn stats(&self) -> ServiceStats {
        let (factoids, aliases) = {
            let store = self.store.read().unwrap_or_else(PoisonError::into_inner);
            (store.factoid_count(), store.alias_count())
        };
        ServiceStats {
            factoids,
            aliases,
            listing_valid: self.render.is_valid(),
            listing_generation: self.render.generation(),
        }
    }

    /// Answers a chat line. `None` when the line is not a trigger, the key is
    /// unknown, or the factoid is cooling down.
    pub fn handle_trigger(&self, line: &str) -> Option<String> {
        let trigger = parse_trigger(&self.trigger_marker, line)?;
        let store = self.store.read().unwrap_or_else(PoisonError::into_inner);
        let (body, canonical) = store.resolve(&trigger.key)?;
        if self.limiter.recently_used(canonical) {
            return None;
        }
        tracing::debug!(target: "factoid::trigger", key = %trigger.key, canonical = %canonical, "factoid triggered");
        Some(trigger.reply(body))
    }

    /// Runs one admin command under the store's write lock.
    pub fn handle_admin(&self, command: &str, args: &[String]) -> AdminOutcome {
        let command = command.to_lowercase();
        let mut store = self.store.write().unwrap_or_else(PoisonError::into_inner);
        self.admin.process(&mut store, &command, args)
    }

    /// [`Self::handle_admin`] on an unsplit line such as `"add foo some text"`.
    pub fn handle_admin_line(&self, line: &str) -> AdminOutcome {
        match parse_admin_line(line) {
            Some((command, args)) => self.handle_admin(&command, &args),
            None => AdminOutcome::Unrecognized,
        }
    }

    /// Returns the rendered listing, regenerating it first if needed.
    ///
    /// If regeneration fails but an earlier render exists, that output is
    /// served and the failure logged.
    pub fn listing(&self) -> Result<Arc<[u8]>, RenderError> {
        if let Err(e) = self.render.ensure_fresh(&self.store) {
            return match self.render.serve() {
                Some(stale) => {
                    tracing::error!(
                        target: "factoid::render",
                        error = %e,
                        "Regenerating factoid listing failed; serving last good copy"
                    );
                    Ok(stale)
                }
                None => Err(e),
            };
        }
        Ok(self.render.serve().unwrap_or_else(|| Arc::from(&b""[..])))
    }

    /// Spawns the periodic template check on the current tokio runtime.
    pub fn start_template_watch(&self, config: &CoreConfig) -> tokio::task::JoinHandle<()> {
        self.render.spawn_freshness_check(config.template_check_interval())
    }
}
