//! Integration test common infrastructure.
//!
//! Env files for the bootstrap tests and TLS assets plus a handshake-only
//! listener for the connection tests.

#![allow(dead_code)]

pub mod tls;

use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::NamedTempFile;

static PREFIX_COUNTER: AtomicUsize = AtomicUsize::new(0);

/// An env var prefix no other test in this process uses.
///
/// Env files only add variables, so tests sharing a process keep apart by
/// prefix.
pub fn unique_prefix(name: &str) -> String {
    let n = PREFIX_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{name}_{}_{n}", std::process::id())
}

/// Write `lines` to a temporary env file, one `KEY=VALUE` per line.
pub fn write_env_file(lines: &[String]) -> anyhow::Result<NamedTempFile> {
    let mut file = tempfile::Builder::new()
        .prefix("svc-test-")
        .suffix(".env")
        .tempfile()?;
    for line in lines {
        writeln!(file, "{line}")?;
    }
    file.flush()?;
    Ok(file)
}
