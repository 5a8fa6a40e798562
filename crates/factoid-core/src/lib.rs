//! factoid-core: the knowledge base behind the chat bot's `!factoid` triggers.
//!
//! Stores named text snippets with aliases, rate limits triggers, applies
//! admin commands and keeps a rendered listing of everything fresh.

mod admin;
mod knowledge;
mod ratelimit;
mod render;
mod service;
mod shared;
mod trigger;

pub use shared::CoreConfig;

pub use knowledge::{
    is_valid_key, normalize_key, FactoidStore, NoopSaver, PersistError, SledStateSaver, StateSaver,
    MAX_ALIAS_HOPS,
};

pub use ratelimit::{RateLimiter, DEFAULT_COOLDOWN};

pub use admin::{parse_admin_line, AdminCommandProcessor, AdminOutcome, Notice};

pub use render::{
    build_records, linkify, RenderCache, RenderError, RenderRecord, DEFAULT_CHECK_INTERVAL,
    DEFAULT_TEMPLATE_PATH,
};

pub use trigger::{parse_trigger, Trigger, DEFAULT_TRIGGER_MARKER};

pub use service::{FactoidService, ServiceStats};
