//! Trigger-line parsing: `!foo` or `!foo nick`.

use crate::knowledge::{is_valid_key, normalize_key};

/// Default prefix that marks a chat line as a factoid trigger.
pub const DEFAULT_TRIGGER_MARKER: &str = "!";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trigger<'a> {
    /// Normalized factoid key.
    pub key: String,
    /// First token after the key, if any. Later tokens are ignored.
    pub addressee: Option<&'a str>,
}

impl Trigger<'_> {
    /// Formats the reply line for `body`.
    pub fn reply(&self, body: &str) -> String {
        match self.addressee {
            Some(nick) => format!("{}: {}", nick, body),
            None => body.to_string(),
        }
    }
}

/// Parses `line` as a trigger. Returns `None` when the line does not start with
/// `marker` or the key is not alphabetic.
pub fn parse_trigger<'a>(marker: &str, line: &'a str) -> Option<Trigger<'a>> {
    let rest = line.strip_prefix(marker)?;
    let (raw_key, tail) = rest.split_once(' ').unwrap_or((rest, ""));
    let key = normalize_key(raw_key);
    if !is_valid_key(&key) {
        return None;
    }
    Some(Trigger {
        key,
        addressee: tail.split_whitespace().next(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_trigger() {
        let t = parse_trigger("!", "!Rust").unwrap();
        assert_eq!(t.key, "rust");
        assert_eq!(t.addressee, None);
        assert_eq!(t.reply("a language"), "a language");
    }

    #[test]
    fn addressee_is_first_extra_token_only() {
        let t = parse_trigger("!", "!rust alice and everyone else").unwrap();
        assert_eq!(t.addressee, Some("alice"));
        assert_eq!(t.reply("a language"), "alice: a language");
    }

    #[test]
    fn trailing_space_has_no_addressee() {
        let t = parse_trigger("!", "!rust ").unwrap();
        assert_eq!(t.addressee, None);
    }

    #[test]
    fn non_triggers_are_ignored() {
        assert!(parse_trigger("!", "rust").is_none());
        assert!(parse_trigger("!", "").is_none());
        assert!(parse_trigger("!", "!").is_none());
        assert!(parse_trigger("!", "!rust2 bob").is_none());
        assert!(parse_trigger("!", "! rust").is_none());
    }

    #[test]
    fn custom_marker() {
        let t = parse_trigger("??", "??tokio bob").unwrap();
        assert_eq!(t.key, "tokio");
        assert!(parse_trigger("??", "!tokio").is_none());
    }
}
