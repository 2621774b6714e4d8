use sha2::{Digest, Sha256};

/// Stable 12-hex-digit identifier for a launch specification. Derived from the
/// canonical `command + " " + args.join(" ")` string; the same launch string
/// always yields the same id, so ids may be computed independently by the
/// daemon and by the transparent client without round-tripping through a
/// lookup.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct ServerId(String);

impl ServerId {
    /// Derives the id from an already-split command and argument vector.
    pub fn from_command(command: &str, args: &[String]) -> Self {
        let mut canonical = command.to_string();
        for arg in args {
            canonical.push(' ');
            canonical.push_str(arg);
        }
        Self::from_canonical(&canonical)
    }

    /// Derives the id from a pre-joined canonical launch string, e.g. one
    /// produced by splitting a `server_command` field with shell-word rules
    /// and rejoining with single spaces.
    pub fn from_canonical(canonical: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        let digest = hasher.finalize();
        let hex = hex::encode(digest);
        Self(hex[..12].to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ServerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_launch_string_yields_same_id() {
        let a = ServerId::from_command("echo-server", &["--port".to_string(), "9".to_string()]);
        let b = ServerId::from_command("echo-server", &["--port".to_string(), "9".to_string()]);
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 12);
    }

    #[test]
    fn different_args_yield_different_ids() {
        let a = ServerId::from_command("echo-server", &[]);
        let b = ServerId::from_command("echo-server", &["--verbose".to_string()]);
        assert_ne!(a, b);
    }

    #[test]
    fn canonical_and_command_forms_agree() {
        let a = ServerId::from_command("fs-server", &["--root".to_string(), "/tmp".to_string()]);
        let b = ServerId::from_canonical("fs-server --root /tmp");
        assert_eq!(a, b);
    }
}
