use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::{error::AppError, state::AppState};

/// Rejects requests whose `Host` is not in `TRUSTED_HOSTS` (`*` disables the check).
pub async fn enforce_trusted_hosts(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let host = request
        .headers()
        .get(axum::http::header::HOST)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();

    if host_is_trusted(host, &state.config.trusted_hosts) {
        return next.run(request).await;
    }

    tracing::warn!(host, "Rejected request from untrusted host");
    AppError::BadRequest("Invalid host header.".to_string()).into_response()
}

fn host_is_trusted(host: &str, trusted_hosts: &[String]) -> bool {
    if trusted_hosts.iter().any(|entry| entry == "*") {
        return true;
    }
    let hostname = strip_port(host.trim()).to_ascii_lowercase();
    if hostname.is_empty() {
        return false;
    }
    trusted_hosts.iter().any(|entry| {
        let entry = entry.trim().to_ascii_lowercase();
        match entry.strip_prefix("*.") {
            Some(suffix) => hostname.ends_with(&format!(".{suffix}")),
            None => hostname == entry,
        }
    })
}

fn strip_port(host: &str) -> &str {
    if host.starts_with('[') {
        return host
            .split_once(']')
            .map(|(address, _)| address.trim_start_matches('['))
            .unwrap_or(host);
    }
    host.rsplit_once(':')
        .filter(|(_, port)| port.chars().all(|character| character.is_ascii_digit()))
        .map(|(name, _)| name)
        .unwrap_or(host)
}

#[cfg(test)]
mod tests {
    use super::host_is_trusted;

    fn hosts(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    #[test]
    fn matches_exact_wildcard_and_ported_hosts() {
        let trusted = hosts(&["localhost", "*.rentbook.app"]);
        assert!(host_is_trusted("localhost:8000", &trusted));
        assert!(host_is_trusted("api.rentbook.app", &trusted));
        assert!(!host_is_trusted("rentbook.app.evil.com", &trusted));
        assert!(!host_is_trusted("", &trusted));
        assert!(host_is_trusted("anything", &hosts(&["*"])));
    }
}
