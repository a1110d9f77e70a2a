//! Upstream path and query composition.
//!
//! Works on the escaped form of both paths: percent-encoded octets (an
//! encoded `/` inside a segment, for example) pass through untouched.

use url::Url;

/// Joins the target's base path with the incoming path and merges the queries.
///
/// Returns `(path, query)`; the query is empty when neither side carries one.
pub fn join(target: &Url, incoming_path: &str, incoming_query: &str) -> (String, String) {
    (
        join_paths(target.path(), incoming_path),
        join_queries(target.query().unwrap_or(""), incoming_query),
    )
}

/// `"/api/"` + `"/test"` → `"/api/test"`; two empty sides give `"/"`.
pub fn join_paths(base: &str, path: &str) -> String {
    let segments: Vec<&str> = [base, path]
        .into_iter()
        .map(trim_one_slash)
        .filter(|segment| !segment.is_empty())
        .collect();

    format!("/{}", segments.join("/"))
}

/// Target query always comes first.
pub fn join_queries(target_query: &str, incoming_query: &str) -> String {
    match (target_query.is_empty(), incoming_query.is_empty()) {
        (false, false) => format!("{}&{}", target_query, incoming_query),
        _ => format!("{}{}", target_query, incoming_query),
    }
}

/// Canonical form of a request path: `.` and `..` segments resolved and
/// empty segments dropped. A trailing `/` survives; `%2e` counts as a dot.
pub fn clean(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match dots(segment) {
            1 => {}
            2 => {
                segments.pop();
            }
            _ if segment.is_empty() => {}
            _ => segments.push(segment),
        }
    }

    let mut cleaned = format!("/{}", segments.join("/"));
    if path.ends_with('/') && cleaned != "/" {
        cleaned.push('/');
    }
    cleaned
}

/// 1 for `.`, 2 for `..` (escaped or not), 0 otherwise.
fn dots(segment: &str) -> usize {
    if !(segment.starts_with('.') || segment.starts_with('%')) {
        return 0;
    }
    match segment.to_ascii_lowercase().replace("%2e", ".").as_str() {
        "." => 1,
        ".." => 2,
        _ => 0,
    }
}

fn trim_one_slash(path: &str) -> &str {
    let path = path.strip_prefix('/').unwrap_or(path);
    path.strip_suffix('/').unwrap_or(path)
}
