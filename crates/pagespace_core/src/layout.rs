use std::path::PathBuf;

use crate::rewrite::resolution_base;

/// Normalise a root-relative reference into its URL path: dot segments are
/// collapsed (never above the root) and the query and fragment are dropped.
pub fn normalized_path(reference: &str) -> Option<String> {
    let base = resolution_base()?;
    let resolved = base.join(reference.trim()).ok()?;
    if resolved.host_str() != base.host_str() {
        return None;
    }
    Some(resolved.path().to_string())
}

/// Output file for a page: `/` becomes `index.html`, `/blog/post-1` becomes
/// `blog/post-1.html`. Paths already ending in `.html` keep a single suffix.
pub fn page_file_path(page_url: &str) -> Option<PathBuf> {
    let path = normalized_path(page_url)?;
    let mut segments = decoded_segments(path.trim_end_matches('/'))?;
    match segments.last_mut() {
        None => segments.push("index.html".to_string()),
        Some(last) if last.ends_with(".html") => {}
        Some(last) => last.push_str(".html"),
    }
    Some(segments.iter().collect())
}

/// Output file for a resource: the reference path mirrored 1:1 under the root.
/// Directory-like references (`/`, `/assets/`) have no file and yield `None`.
pub fn resource_file_path(reference: &str) -> Option<PathBuf> {
    let path = normalized_path(reference)?;
    if path.ends_with('/') {
        return None;
    }
    let segments = decoded_segments(&path)?;
    if segments.is_empty() {
        return None;
    }
    Some(segments.iter().collect())
}

fn decoded_segments(path: &str) -> Option<Vec<String>> {
    path.split('/')
        .filter(|segment| !segment.is_empty())
        .map(|segment| {
            let decoded = urlencoding::decode(segment).ok()?.into_owned();
            if decoded == ".."
                || decoded == "."
                || decoded.contains(|c| matches!(c, '/' | '\\' | '\0'))
            {
                return None;
            }
            Some(decoded)
        })
        .collect()
}
