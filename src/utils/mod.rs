/// Utility functions and helpers
use std::time::Duration;

/// Join a database and collection into a `db.collection` namespace
pub fn namespace(db: &str, collection: &str) -> String {
    format!("{}.{}", db, collection)
}

/// Split a namespace at its first dot. Collection names may contain dots.
pub fn split_namespace(ns: &str) -> Option<(&str, &str)> {
    match ns.split_once('.') {
        Some((db, coll)) if !db.is_empty() && !coll.is_empty() => Some((db, coll)),
        _ => None,
    }
}

/// Stored password digest: hex md5 of `user:mongo:password`
pub fn password_digest(user: &str, password: &str) -> String {
    hex::encode(md5::compute(format!("{}:mongo:{}", user, password)).0)
}

/// Nonce authentication key: hex md5 of nonce, user and password digest
pub fn auth_key(nonce: &str, user: &str, digest: &str) -> String {
    let mut ctx = md5::Context::new();
    ctx.consume(nonce.as_bytes());
    ctx.consume(user.as_bytes());
    ctx.consume(digest.as_bytes());
    hex::encode(ctx.compute().0)
}

/// Format duration for human-readable output
pub fn format_duration(duration: Duration) -> String {
    let millis = duration.as_millis();
    if millis < 1000 {
        format!("{}ms", millis)
    } else {
        format!("{:.2}s", duration.as_secs_f64())
    }
}

/// Format byte size for human-readable output
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    if unit_index == 0 {
        format!("{} {}", bytes, UNITS[unit_index])
    } else {
        format!("{:.2} {}", size, UNITS[unit_index])
    }
}
