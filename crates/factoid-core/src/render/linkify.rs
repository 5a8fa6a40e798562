//! HTML escaping plus bare-URL auto-linking for factoid bodies.

use handlebars::{Context, Handlebars, Helper, HelperResult, Output, RenderContext};
use regex::Regex;
use std::sync::LazyLock;

static URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"https?://[^ ]+\.[^ ]+").expect("URL pattern compiles"));

/// Escapes `text` for HTML and wraps every bare URL in an anchor.
pub fn linkify(text: &str) -> String {
    let escaped = handlebars::html_escape(text);
    URL_RE
        .replace_all(&escaped, r#"<a target="_blank" href="$0">$0</a>"#)
        .into_owned()
}

/// `{{{linkify text}}}` in templates. Output is already escaped, so use the triple stash.
pub(crate) fn linkify_helper(
    h: &Helper,
    _: &Handlebars,
    _: &Context,
    _: &mut RenderContext,
    out: &mut dyn Output,
) -> HelperResult {
    let text = h.param(0).and_then(|v| v.value().as_str()).unwrap_or("");
    out.write(&linkify(text))?;
    Ok(())
}
