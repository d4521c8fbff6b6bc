use std::time::{SystemTime, UNIX_EPOCH};

/// Returns current unix epoch milliseconds.
pub fn now_ms() -> i64 {
    let dur = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    dur.as_millis() as i64
}

/// Hostname up to the first `.`, e.g. `agent-1.dc.example` -> `agent-1`.
pub fn short_hostname(hostname: &str) -> &str {
    hostname.split('.').next().unwrap_or(hostname)
}

/// Turns a task or framework name into a catalog-safe service name.
///
/// Anything outside `[A-Za-z0-9_-]` becomes `-`, underscores are dropped and
/// the result is lower-cased. Distinct inputs may collide.
pub fn sanitize_name(name: &str) -> String {
    name.chars()
        .filter(|c| *c != '_')
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_hostname_strips_domain() {
        assert_eq!(short_hostname("agent-1.dc1.example.com"), "agent-1");
        assert_eq!(short_hostname("agent-1"), "agent-1");
        assert_eq!(short_hostname(""), "");
    }

    #[test]
    fn sanitize_replaces_and_lowercases() {
        assert_eq!(sanitize_name("My_App.v2"), "myapp-v2");
        assert_eq!(sanitize_name("nginx/proxy"), "nginx-proxy");
        assert_eq!(sanitize_name("web-UI"), "web-ui");
    }

    #[test]
    fn sanitize_allows_collisions() {
        assert_eq!(sanitize_name("a.b"), sanitize_name("a/b"));
    }
}
