use std::collections::BTreeMap;

/// Input to launching a child process. Immutable once accepted; cloned freely
/// since Initializer, Monitor, and the lazy-start path on the Dispatcher each
/// need their own copy to retry/restart from.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ServerSpec {
    pub command: String,
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default = "default_true")]
    pub auto_start: bool,
    #[serde(default)]
    pub optional: bool,
}

fn default_true() -> bool {
    true
}

impl ServerSpec {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
            env: BTreeMap::new(),
            auto_start: true,
            optional: false,
        }
    }

    /// Parses a `server_command` field (whitespace-separated launch spec with
    /// shell-word semantics: quotes and backslash escapes honored, no variable
    /// expansion) into a `ServerSpec` with no environment overlay.
    pub fn from_command_line(server_command: &str) -> Result<Self, shell_words::ParseError> {
        let mut words = shell_words::split(server_command)?.into_iter();
        let command = words.next().unwrap_or_default();
        let args: Vec<String> = words.collect();
        Ok(Self::new(command, args))
    }

    /// The canonical string used to derive this spec's `ServerId`.
    pub fn canonical(&self) -> String {
        let mut canonical = self.command.clone();
        for arg in &self.args {
            canonical.push(' ');
            canonical.push_str(arg);
        }
        canonical
    }
}
