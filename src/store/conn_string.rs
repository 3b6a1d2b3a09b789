//! PostgreSQL connection string normalization.
//!
//! Connections must always ask for TLS, and pooled endpoints (hosts whose
//! first label ends in `-pooler`) need the target project named in the
//! `options` startup parameter because the proxy cannot route on SNI alone.

use url::Url;

const POOLER_SUFFIX: &str = "-pooler";
const ROUTING_KEYS: [&str; 2] = ["project=", "endpoint="];

/// Returns `raw` with `sslmode` forced to an encrypted mode and, for pooled
/// hosts, a `project=<id>` routing token in `options`.
///
/// Anything that does not parse as a `postgres://` or `postgresql://` URL is
/// returned unchanged; the driver reports it when connecting. Applying the
/// function to its own output returns the same string.
pub fn normalize(raw: &str, project: Option<&str>) -> String {
    let Ok(mut url) = Url::parse(raw) else {
        return raw.to_string();
    };
    if !matches!(url.scheme(), "postgres" | "postgresql") {
        return raw.to_string();
    }

    let mut pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
    require_tls(&mut pairs);
    if let Some(project) = routing_project(&url, project) {
        add_routing(&mut pairs, &project);
    }

    url.query_pairs_mut().clear().extend_pairs(&pairs);
    url.to_string()
}

fn require_tls(pairs: &mut Vec<(String, String)>) {
    match pairs.iter_mut().find(|(k, _)| k == "sslmode") {
        Some((_, mode)) => {
            if matches!(mode.as_str(), "disable" | "allow" | "prefer" | "") {
                *mode = "require".to_string();
            }
        }
        None => pairs.push(("sslmode".to_string(), "require".to_string())),
    }
}

// Configured project wins; otherwise the endpoint id is the pooled host label.
fn routing_project(url: &Url, configured: Option<&str>) -> Option<String> {
    let host = url.host_str()?;
    let label = host.split('.').next()?;
    let endpoint = label.strip_suffix(POOLER_SUFFIX)?;

    match configured.map(str::trim).filter(|p| !p.is_empty()) {
        Some(project) => Some(project.to_string()),
        None if !endpoint.is_empty() => Some(endpoint.to_string()),
        None => None,
    }
}

fn add_routing(pairs: &mut Vec<(String, String)>, project: &str) {
    let token = format!("project={}", project);
    match pairs.iter_mut().find(|(k, _)| k == "options") {
        Some((_, options)) => {
            let routed = options
                .split_whitespace()
                .any(|opt| ROUTING_KEYS.iter().any(|key| opt.starts_with(key)));
            if !routed {
                *options = match options.trim() {
                    "" => token,
                    existing => format!("{} {}", existing, token),
                };
            }
        }
        None => pairs.push(("options".to_string(), token)),
    }
}
