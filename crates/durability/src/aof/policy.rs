//! Fsync discipline for the append-only log.

use serde::{Deserialize, Serialize};

/// When the log file is fsynced relative to writes.
///
/// | Policy | fsync | Data loss window |
/// |--------|-------|------------------|
/// | Always | every flush, synchronously | zero |
/// | EverySec | about once a second, on a background worker | up to ~1s |
/// | Never | left to the OS | OS flush interval |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FsyncPolicy {
    /// Write then fsync before replying. Safest, slowest.
    Always,
    /// Write on the loop, fsync on a background worker once per second.
    /// The default: bounded loss, no fsync stall on the command path.
    #[default]
    EverySec,
    /// Never fsync explicitly.
    Never,
}

impl FsyncPolicy {
    /// Config-file spelling of the policy.
    pub fn name(&self) -> &'static str {
        match self {
            FsyncPolicy::Always => "always",
            FsyncPolicy::EverySec => "everysec",
            FsyncPolicy::Never => "no",
        }
    }

    /// Parse the config-file spelling.
    pub fn parse(name: &str) -> Option<FsyncPolicy> {
        match name {
            "always" => Some(FsyncPolicy::Always),
            "everysec" => Some(FsyncPolicy::EverySec),
            "no" => Some(FsyncPolicy::Never),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_roundtrip() {
        for policy in [FsyncPolicy::Always, FsyncPolicy::EverySec, FsyncPolicy::Never] {
            assert_eq!(FsyncPolicy::parse(policy.name()), Some(policy));
        }
        assert_eq!(FsyncPolicy::parse("sometimes"), None);
    }

    #[test]
    fn test_default_is_everysec() {
        assert_eq!(FsyncPolicy::default(), FsyncPolicy::EverySec);
    }
}
