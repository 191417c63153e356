use std::collections::BTreeSet;
use std::sync::LazyLock;

use pagespace_core::{is_local, is_page_relative, resolve_against_page, to_relative};
use pagespace_logging::ps_debug;
use regex::{Captures, Regex};

static CSS_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)url\(\s*(?:"([^"]*)"|'([^']*)'|([^"')\s]*))\s*\)"#)
        .expect("css url pattern is valid")
});

/// Rewrite every `url(...)` in a stylesheet so it works from the page's output
/// file, recording each fetchable reference in `resources`.
///
/// Root-relative references are recorded as written. Page-relative ones are
/// recorded in their resolved root-relative form, since resources are fetched
/// from the host root. `data:`, fragment and absolute references are kept.
pub fn rewrite_css_urls(css: &str, page_url: &str, resources: &mut BTreeSet<String>) -> String {
    CSS_URL
        .replace_all(css, |caps: &Captures| {
            let (quote, reference) = match (caps.get(1), caps.get(2), caps.get(3)) {
                (Some(m), _, _) => ("\"", m.as_str()),
                (_, Some(m), _) => ("'", m.as_str()),
                (_, _, Some(m)) => ("", m.as_str()),
                _ => ("", ""),
            };
            let Some(resource) = css_resource(page_url, reference) else {
                return caps[0].to_string();
            };
            let rewritten = to_relative(page_url, reference);
            ps_debug!("Converting css url({}) to url({})", reference, rewritten);
            resources.insert(resource);
            format!("url({quote}{rewritten}{quote})")
        })
        .into_owned()
}

fn css_resource(page_url: &str, reference: &str) -> Option<String> {
    let reference = reference.trim();
    if is_local(reference) {
        Some(reference.to_string())
    } else if is_page_relative(reference) {
        resolve_against_page(page_url, reference)
    } else {
        None
    }
}
