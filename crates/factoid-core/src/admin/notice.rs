//! Notices sent back to the user who issued an admin command.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// add / mod succeeded.
    Saved { key: String },
    /// del succeeded. `via_alias` is set when the user named an alias.
    Deleted {
        key: String,
        aliases_removed: usize,
        via_alias: Option<String>,
    },
    Renamed { from: String, to: String },
    /// addalias / modalias succeeded; `target` is the canonical key.
    AliasSaved { alias: String, target: String },
    AliasDeleted { alias: String },
    /// Key is not a plain alphabetic token.
    InvalidKey { key: String },
    /// The new key is already a canonical factoid.
    WouldOverwriteFactoid { key: String },
    /// The new key is already an alias.
    WouldOverwriteAlias { key: String },
    /// rename source is not a canonical factoid.
    NotPresent { key: String },
    /// Nothing to delete or alias to.
    NotFound { key: String },
    Usage { usage: &'static str },
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notice::Saved { key } => write!(f, "Added/Modified {} successfully", key),
            Notice::Deleted {
                key,
                aliases_removed,
                via_alias,
            } => {
                if let Some(alias) = via_alias {
                    write!(f, "Found alias {}, deleted the original factoid {}", alias, key)?;
                } else {
                    write!(f, "Deleted {} successfully", key)?;
                }
                if *aliases_removed > 0 {
                    write!(f, " (and {} alias(es))", aliases_removed)?;
                }
                Ok(())
            }
            Notice::Renamed { from, to } => write!(f, "Renamed {} to {} successfully", from, to),
            Notice::AliasSaved { alias, target } => {
                write!(f, "Added/Modified alias {} for {} successfully", alias, target)
            }
            Notice::AliasDeleted { alias } => write!(f, "Deleted alias {} successfully", alias),
            Notice::InvalidKey { key } => {
                write!(f, "Invalid key '{}': only letters a-z are allowed", key)
            }
            Notice::WouldOverwriteFactoid { key } => {
                write!(f, "{} would overwrite a factoid, please delete first", key)
            }
            Notice::WouldOverwriteAlias { key } => {
                write!(f, "{} would overwrite an alias, please delete first", key)
            }
            Notice::NotPresent { key } => write!(f, "{} is not present", key),
            Notice::NotFound { key } => write!(f, "No factoid with name {} found", key),
            Notice::Usage { usage } => write!(f, "Usage: {}", usage),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_notices_name_the_kind() {
        let factoid = Notice::WouldOverwriteFactoid { key: "foo".into() }.to_string();
        let alias = Notice::WouldOverwriteAlias { key: "foo".into() }.to_string();
        assert!(factoid.contains("overwrite a factoid"));
        assert!(alias.contains("overwrite an alias"));
        assert_ne!(factoid, alias);
    }

    #[test]
    fn delete_via_alias_mentions_both_keys() {
        let text = Notice::Deleted {
            key: "foo".into(),
            aliases_removed: 2,
            via_alias: Some("b".into()),
        }
        .to_string();
        assert!(text.contains("alias b"));
        assert!(text.contains("factoid foo"));
        assert!(text.contains("2 alias(es)"));
    }
}
