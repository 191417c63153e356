use url::Url;

/// Host used to resolve root-relative and page-relative references without a
/// real origin. References that resolve to any other host were absolute.
const RESOLUTION_HOST: &str = "pagespace.invalid";

pub(crate) fn resolution_base() -> Option<Url> {
    Url::parse(&format!("http://{RESOLUTION_HOST}/")).ok()
}

/// A reference is local when it is root-relative (`/path`) and not
/// protocol-relative (`//cdn`). Bare relative paths, `mailto:`, fragments and
/// absolute URLs are all non-local.
pub fn is_local(reference: &str) -> bool {
    let reference = reference.trim();
    reference.starts_with('/') && !reference.starts_with("//")
}

/// A page-relative reference has neither a scheme nor a leading `/`, `#` or `?`
/// (e.g. `img/logo.png` or `../fonts/a.woff`).
pub fn is_page_relative(reference: &str) -> bool {
    let reference = reference.trim();
    if reference.is_empty() || reference.starts_with(|c| matches!(c, '/' | '#' | '?')) {
        return false;
    }
    matches!(
        Url::parse(reference),
        Err(url::ParseError::RelativeUrlWithoutBase)
    )
}

/// Number of `../` hops needed to climb from the page's output file back to
/// the output root. `/` and `/about` live at the root; `/a/b` is one level down.
pub fn page_depth(page_url: &str) -> usize {
    page_url
        .trim_end_matches('/')
        .matches('/')
        .count()
        .saturating_sub(1)
}

/// Resolve `reference` against `page_url` the way a browser resolves a link,
/// returning the root-relative path (plus query) it points at. Returns `None`
/// when the reference resolves outside the site.
pub fn resolve_against_page(page_url: &str, reference: &str) -> Option<String> {
    let base = resolution_base()?.join(page_url).ok()?;
    let resolved = base.join(reference.trim()).ok()?;
    if resolved.host_str() != Some(RESOLUTION_HOST) {
        return None;
    }
    let mut out = resolved.path().to_string();
    if let Some(query) = resolved.query() {
        out.push('?');
        out.push_str(query);
    }
    Some(out)
}

/// Rewrite a resource reference so it works from the page's output file.
///
/// Root-relative references lose their leading slash and gain one `../` per
/// level of page depth. Page-relative references are first resolved against the
/// page URL and then given the same treatment. Anything else is returned as is.
pub fn to_relative(page_url: &str, reference: &str) -> String {
    let trimmed = reference.trim();
    if is_local(trimmed) {
        return with_depth_prefix(page_url, trimmed);
    }
    if is_page_relative(trimmed) {
        if let Some(resolved) = resolve_against_page(page_url, trimmed) {
            return with_depth_prefix(page_url, &resolved);
        }
    }
    reference.to_string()
}

/// Rewrite an anchor target: like [`to_relative`], plus the `.html` suffix the
/// target page is persisted with. Query and fragment stay after the suffix.
pub fn anchor_to_relative(page_url: &str, reference: &str) -> String {
    let trimmed = reference.trim();
    if !is_local(trimmed) {
        return reference.to_string();
    }
    let split = trimmed
        .find(|c| c == '?' || c == '#')
        .unwrap_or(trimmed.len());
    let (path, suffix) = trimmed.split_at(split);
    let path = path.trim_end_matches('/');
    let target = if path.is_empty() {
        "/index.html".to_string()
    } else if path.ends_with(".html") {
        path.to_string()
    } else {
        format!("{path}.html")
    };
    format!("{}{}", with_depth_prefix(page_url, &target), suffix)
}

fn with_depth_prefix(page_url: &str, root_relative: &str) -> String {
    let stripped = root_relative.strip_prefix('/').unwrap_or(root_relative);
    format!("{}{}", "../".repeat(page_depth(page_url)), stripped)
}
