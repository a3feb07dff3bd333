//! Origin checks for incoming live-update connections.

use prism_config::HubConfig;
use rustc_hash::FxHashSet;

/// Decides whether a browser origin may open a live-update connection.
pub trait OriginValidator: Send + Sync {
    fn is_allowed_origin(&self, origin: &str) -> bool;
}

impl<F> OriginValidator for F
where
    F: Fn(&str) -> bool + Send + Sync,
{
    fn is_allowed_origin(&self, origin: &str) -> bool {
        self(origin)
    }
}

/// Exact-match allow-list, optionally admitting any local development origin
/// (`http(s)://localhost`, `127.0.0.1` or `[::1]`, any port).
#[derive(Debug, Clone, Default)]
pub struct AllowListOriginValidator {
    allowed: FxHashSet<String>,
    allow_localhost: bool,
}

impl AllowListOriginValidator {
    pub fn new<I, S>(allowed: I, allow_localhost: bool) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            allowed: allowed
                .into_iter()
                .map(|origin| normalize(origin.as_ref()))
                .collect(),
            allow_localhost,
        }
    }

    pub fn from_config(config: &HubConfig) -> Self {
        Self::new(&config.allowed_origins, config.allow_localhost)
    }
}

impl OriginValidator for AllowListOriginValidator {
    fn is_allowed_origin(&self, origin: &str) -> bool {
        let origin = normalize(origin);
        if origin.is_empty() || origin == "null" {
            return false;
        }
        self.allowed.contains(&origin) || (self.allow_localhost && is_local_origin(&origin))
    }
}

fn normalize(origin: &str) -> String {
    origin.trim().trim_end_matches('/').to_ascii_lowercase()
}

fn is_local_origin(origin: &str) -> bool {
    let Some(rest) = origin
        .strip_prefix("http://")
        .or_else(|| origin.strip_prefix("https://"))
    else {
        return false;
    };

    let host = if let Some(v6) = rest.strip_prefix('[') {
        match v6.split_once(']') {
            Some((addr, "")) => addr,
            Some((addr, port)) if port.strip_prefix(':').is_some_and(valid_port) => addr,
            _ => return false,
        }
    } else {
        match rest.split_once(':') {
            Some((host, port)) if valid_port(port) => host,
            Some(_) => return false,
            None => rest,
        }
    };

    matches!(host, "localhost" | "127.0.0.1" | "::1")
}

fn valid_port(port: &str) -> bool {
    !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) && port.parse::<u16>().is_ok()
}
