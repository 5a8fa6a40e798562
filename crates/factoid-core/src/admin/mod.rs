//! Admin commands that mutate the factoid store.
//!
//! The caller holds the store's write lock for the whole command and hands the
//! guarded store in; lookup, mutation, persistence and cache invalidation all
//! happen inside that one critical section.

mod notice;

pub use notice::Notice;

use crate::knowledge::{is_valid_key, normalize_key, FactoidStore, StateSaver};
use crate::render::RenderCache;
use std::sync::Arc;

/// Result of feeding one command to [`AdminCommandProcessor::process`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminOutcome {
    /// Not an admin command; the caller may try other handlers.
    Unrecognized,
    Handled {
        notice: Option<Notice>,
        mutated: bool,
    },
}

impl AdminOutcome {
    fn notice(notice: Notice) -> Self {
        Self::Handled {
            notice: Some(notice),
            mutated: false,
        }
    }

    fn mutation(notice: Notice) -> Self {
        Self::Handled {
            notice: Some(notice),
            mutated: true,
        }
    }

    pub fn is_recognized(&self) -> bool {
        !matches!(self, Self::Unrecognized)
    }

    pub fn mutated(&self) -> bool {
        matches!(self, Self::Handled { mutated: true, .. })
    }

    pub fn notice_ref(&self) -> Option<&Notice> {
        match self {
            Self::Handled { notice, .. } => notice.as_ref(),
            Self::Unrecognized => None,
        }
    }
}

/// Splits a raw admin line into command keyword and arguments.
///
/// `"add foo some  body"` becomes `("add", ["foo", "some  body"])`: for
/// add/mod everything after the key is one argument, kept as typed. Other
/// commands only take keys and are split on whitespace. The command is
/// lower-cased; key normalization happens in the processor.
pub fn parse_admin_line(line: &str) -> Option<(String, Vec<String>)> {
    let (command, rest) = split_token(line)?;
    let command = command.to_lowercase();
    let args = match command.as_str() {
        "add" | "mod" => match split_token(rest) {
            Some((key, body)) if !body.trim().is_empty() => vec![key.to_string(), body.to_string()],
            Some((key, _)) => vec![key.to_string()],
            None => Vec::new(),
        },
        _ => rest.split_whitespace().map(str::to_string).collect(),
    };
    Some((command, args))
}

/// Splits the first whitespace-delimited token off `s`. One separator
/// character is consumed; the remainder is returned untouched.
fn split_token(s: &str) -> Option<(&str, &str)> {
    let s = s.trim_start();
    if s.is_empty() {
        return None;
    }
    match s.char_indices().find(|(_, c)| c.is_whitespace()) {
        Some((at, sep)) => Some((&s[..at], &s[at + sep.len_utf8()..])),
        None => Some((s, "")),
    }
}

pub struct AdminCommandProcessor {
    render: Arc<RenderCache>,
    saver: Arc<dyn StateSaver>,
}

impl AdminCommandProcessor {
    pub fn new(render: Arc<RenderCache>, saver: Arc<dyn StateSaver>) -> Self {
        Self { render, saver }
    }

    /// Runs one command against `store`. Saves and invalidates the render cache
    /// when the store changed.
    pub fn process(&self, store: &mut FactoidStore, command: &str, args: &[String]) -> AdminOutcome {
        let outcome = match command {
            "add" | "mod" => set_factoid(store, args),
            "del" => delete_factoid(store, args),
            "rename" => rename_factoid(store, args),
            "addalias" | "modalias" => set_alias(store, args),
            "delalias" => delete_alias(store, args),
            _ => return AdminOutcome::Unrecognized,
        };

        if outcome.mutated() {
            if let Err(e) = self.saver.save(store) {
                tracing::error!(
                    target: "factoid::admin",
                    command = command,
                    error = %e,
                    "Failed to save factoid state; change kept in memory"
                );
            }
            self.render.invalidate();
        }

        tracing::info!(
            target: "factoid::admin",
            command = command,
            mutated = outcome.mutated(),
            notice = %outcome.notice_ref().map(ToString::to_string).unwrap_or_default(),
            "admin command handled"
        );
        outcome
    }
}

fn set_factoid(store: &mut FactoidStore, args: &[String]) -> AdminOutcome {
    if args.len() < 2 {
        return AdminOutcome::notice(Notice::Usage {
            usage: "add <key> <text>",
        });
    }
    let key = normalize_key(&args[0]);
    if !is_valid_key(&key) {
        return AdminOutcome::notice(Notice::InvalidKey { key });
    }
    if store.contains_alias(&key) {
        return AdminOutcome::notice(Notice::WouldOverwriteAlias { key });
    }
    store.set(key.clone(), args[1..].join(" "));
    AdminOutcome::mutation(Notice::Saved { key })
}

fn delete_factoid(store: &mut FactoidStore, args: &[String]) -> AdminOutcome {
    let Some(raw) = args.first() else {
        return AdminOutcome::notice(Notice::Usage { usage: "del <key>" });
    };
    let key = normalize_key(raw);
    // resolve() follows at most MAX_ALIAS_HOPS, so naming an alias deletes
    // the factoid it points at and nothing further.
    let Some(canonical) = store.resolve(&key).map(|(_, name)| name.to_string()) else {
        return AdminOutcome::notice(Notice::NotFound { key });
    };
    let aliases = store.delete_cascade(&canonical).unwrap_or_default();
    let via_alias = (canonical != key).then_some(key);
    AdminOutcome::mutation(Notice::Deleted {
        key: canonical,
        aliases_removed: aliases.len(),
        via_alias,
    })
}

fn rename_factoid(store: &mut FactoidStore, args: &[String]) -> AdminOutcome {
    if args.len() < 2 {
        return AdminOutcome::notice(Notice::Usage {
            usage: "rename <old> <new>",
        });
    }
    let old = normalize_key(&args[0]);
    let new = normalize_key(&args[1]);
    if !is_valid_key(&new) {
        return AdminOutcome::notice(Notice::InvalidKey { key: new });
    }
    if store.contains_factoid(&new) {
        return AdminOutcome::notice(Notice::WouldOverwriteFactoid { key: new });
    }
    if store.contains_alias(&new) {
        return AdminOutcome::notice(Notice::WouldOverwriteAlias { key: new });
    }
    if !store.rename(&old, &new) {
        return AdminOutcome::notice(Notice::NotPresent { key: old });
    }
    AdminOutcome::mutation(Notice::Renamed { from: old, to: new })
}

fn set_alias(store: &mut FactoidStore, args: &[String]) -> AdminOutcome {
    if args.len() < 2 {
        return AdminOutcome::notice(Notice::Usage {
            usage: "addalias <alias> <factoid>",
        });
    }
    let alias = normalize_key(&args[0]);
    let target = normalize_key(&args[1]);
    if !is_valid_key(&alias) {
        return AdminOutcome::notice(Notice::InvalidKey { key: alias });
    }
    if store.contains_factoid(&alias) {
        return AdminOutcome::notice(Notice::WouldOverwriteFactoid { key: alias });
    }
    // Always point at the canonical key, never at another alias.
    let Some(canonical) = store.resolve(&target).map(|(_, name)| name.to_string()) else {
        return AdminOutcome::notice(Notice::NotFound { key: target });
    };
    store.set_alias(alias.clone(), canonical.clone());
    AdminOutcome::mutation(Notice::AliasSaved {
        alias,
        target: canonical,
    })
}

fn delete_alias(store: &mut FactoidStore, args: &[String]) -> AdminOutcome {
    let Some(raw) = args.first() else {
        return AdminOutcome::notice(Notice::Usage {
            usage: "delalias <alias>",
        });
    };
    let alias = normalize_key(raw);
    if store.delete_alias(&alias).is_none() {
        return AdminOutcome::Handled {
            notice: None,
            mutated: false,
        };
    }
    AdminOutcome::mutation(Notice::AliasDeleted { alias })
}
