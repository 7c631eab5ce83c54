//! Build script for spool-link
//!
//! Stamps the binary with git revision, build time and toolchain so a
//! `spool-link version` report identifies exactly what is running next
//! to a device.

use std::env;
use std::process::Command;

fn main() {
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/index");

    let revision = git(&["rev-parse", "--short=8", "HEAD"]).unwrap_or_else(|| "unknown".into());
    let dirty = match git(&["status", "--porcelain"]) {
        Some(status) if !status.is_empty() => "true",
        Some(_) => "false",
        None => "unknown",
    };
    let rustc = Command::new(env::var("RUSTC").unwrap_or_else(|_| "rustc".into()))
        .arg("--version")
        .output()
        .ok()
        .filter(|out| out.status.success())
        .and_then(|out| String::from_utf8(out.stdout).ok())
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|| "unknown".into());

    let stamps = [
        ("SPOOL_LINK_BUILD_REVISION", revision),
        ("SPOOL_LINK_BUILD_DIRTY", dirty.to_string()),
        (
            "SPOOL_LINK_BUILD_TIME",
            chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        ),
        ("SPOOL_LINK_BUILD_TARGET", env_or_unknown("TARGET")),
        ("SPOOL_LINK_BUILD_PROFILE", env_or_unknown("PROFILE")),
        ("SPOOL_LINK_BUILD_RUSTC", rustc),
    ];

    for (key, value) in &stamps {
        println!("cargo:rustc-env={}={}", key, value);
    }
}

fn git(args: &[&str]) -> Option<String> {
    Command::new("git")
        .args(args)
        .output()
        .ok()
        .filter(|out| out.status.success())
        .and_then(|out| String::from_utf8(out.stdout).ok())
        .map(|s| s.trim().to_string())
}

fn env_or_unknown(key: &str) -> String {
    env::var(key).unwrap_or_else(|_| "unknown".into())
}
