use std::net::IpAddr;

use axum::http::HeaderMap;
use sha2::{Digest, Sha256};

pub mod args;
pub mod auth;
pub mod error;
pub mod intent;
pub mod merkle;
pub mod metrics;
pub mod pids;
pub mod postgres;
pub mod shutdown;

/// Well-known label selecting decision maker pods in the cluster.
pub const DECISION_MAKER_LABEL: (&str, &str) = ("app", "decisionmaker");

pub fn init() {
    let disable_colors = ["1", "true"].contains(
        &std::env::var("DISABLE_COLORS")
            .unwrap_or_else(|_| String::new())
            .to_lowercase()
            .as_str(),
    );
    owo_colors::set_override(!disable_colors);

    install_rustls_provider();
}

pub fn install_rustls_provider() {
    rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .expect("install aws-lc-rs provider");
}

/// Lowercase hex SHA-256 of a byte slice.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Lowercase hex SHA-256 of a value's canonical JSON serialization.
pub fn hash_json<T: serde::Serialize>(value: &T) -> String {
    let bytes = serde_json::to_vec(value).unwrap_or_default();
    sha256_hex(&bytes)
}

pub fn get_source_ip(headers: &HeaderMap) -> Option<IpAddr> {
    // Prefer X-Forwarded-For (may contain multiple)
    if let Some(forwarded_for) = headers.get("x-forwarded-for")
        && let Ok(forwarded_for) = forwarded_for.to_str()
        && let Some(ip_str) = forwarded_for.split(',').next()
        && let Ok(ip) = ip_str.trim().parse()
    {
        return Some(ip);
    }

    // Fallback to X-Real-IP
    if let Some(real_ip) = headers.get("x-real-ip")
        && let Ok(ip_str) = real_ip.to_str()
        && let Ok(ip) = ip_str.trim().parse()
    {
        return Some(ip);
    }

    None
}

pub mod access_log {
    use owo_colors::OwoColorize;

    use super::get_source_ip;

    pub async fn manager(
        req: axum::extract::Request,
        next: axum::middleware::Next,
    ) -> axum::response::Response {
        request("MANAGER", req, next).await
    }

    pub async fn decision_maker(
        req: axum::extract::Request,
        next: axum::middleware::Next,
    ) -> axum::response::Response {
        request("DM", req, next).await
    }

    pub async fn request(
        prefix: &str,
        req: axum::extract::Request,
        next: axum::middleware::Next,
    ) -> axum::response::Response {
        let ip = get_source_ip(req.headers())
            .map(|ip| ip.to_string())
            .unwrap_or("unknown".into());
        let method = req.method().clone();
        let path = req.uri().path().to_string();
        let start = std::time::Instant::now();
        let response = next.run(req).await;
        let duration = start.elapsed();
        let is_success = response.status().is_success();
        let (a, b) = if is_success {
            ((20, 163, 73), (25, 163, 118))
        } else {
            ((230, 126, 16), (171, 85, 17))
        };
        println!(
            "🧾 {} {} {} {} {} {}{}{} {}{}",
            format!("[{}]", prefix).truecolor(a.0, a.1, a.2),
            method.truecolor(b.0, b.1, b.2),
            path.truecolor(b.0, b.1, b.2),
            "→".truecolor(a.0, a.1, a.2),
            response.status().truecolor(b.0, b.1, b.2),
            "(".truecolor(a.0, a.1, a.2),
            format!("{:?}", duration).truecolor(b.0, b.1, b.2),
            ")".truecolor(a.0, a.1, a.2),
            "xff=".magenta(),
            ip.magenta().dimmed(),
        );
        response
    }
}
