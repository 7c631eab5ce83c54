//! Build stamp reported by `spool-link version`

use std::fmt;

use crate::protocol::kinds;

/// Values embedded by build.rs
#[derive(Debug, Clone)]
pub struct BuildInfo {
    pub name: &'static str,
    pub version: &'static str,
    pub revision: &'static str,
    dirty: &'static str,
    pub built_at: &'static str,
    pub target: &'static str,
    pub profile: &'static str,
    pub rustc: &'static str,
}

impl BuildInfo {
    pub const fn current() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME"),
            version: env!("CARGO_PKG_VERSION"),
            revision: env!("SPOOL_LINK_BUILD_REVISION"),
            dirty: env!("SPOOL_LINK_BUILD_DIRTY"),
            built_at: env!("SPOOL_LINK_BUILD_TIME"),
            target: env!("SPOOL_LINK_BUILD_TARGET"),
            profile: env!("SPOOL_LINK_BUILD_PROFILE"),
            rustc: env!("SPOOL_LINK_BUILD_RUSTC"),
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty == "true"
    }

    /// `0.1.0 (abc12345)` or `0.1.0 (abc12345, dirty)`
    pub fn short_version(&self) -> String {
        if self.is_dirty() {
            format!("{} ({}, dirty)", self.version, self.revision)
        } else {
            format!("{} ({})", self.version, self.revision)
        }
    }
}

impl fmt::Display for BuildInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} {}", self.name, self.short_version())?;
        writeln!(f)?;
        writeln!(f, "  Built:     {} ({})", self.built_at, self.profile)?;
        writeln!(f, "  Target:    {}", self.target)?;
        writeln!(f, "  Compiler:  {}", self.rustc)?;
        writeln!(f, "  Protocol:  JSON over WebSocket, '{}' liveness", kinds::HEARTBEAT)?;
        Ok(())
    }
}

/// Print the version report, or just the short form
pub fn print_version(short: bool) {
    let info = BuildInfo::current();
    if short {
        println!("{}", info.short_version());
    } else {
        print!("{}", info);
    }
}
