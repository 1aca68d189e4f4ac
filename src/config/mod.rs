//! Session configuration.
//!
//! A [`HarnessConfig`] describes one session: what to run, how big the
//! terminal is, what to feed it at startup and what to capture. It can be
//! built in code or loaded from a TOML file where every key is optional.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{HarnessError, Result};

/// Main configuration struct
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Program to run. Looked up on `$PATH` when not a path.
    pub executable: PathBuf,
    /// Arguments passed to the program.
    pub args: Vec<String>,
    /// Terminal width.
    pub columns: u16,
    /// Terminal height.
    pub lines: u16,
    /// Value of `$TERM` in the child.
    pub term: String,
    /// Bytes delivered to the program right after spawn.
    #[serde(with = "payload")]
    pub stdin: Option<Vec<u8>>,
    /// Where the stdin payload goes.
    pub stdin_source: StdinSource,
    /// Send fd 1 to a dedicated pipe instead of the terminal.
    pub capture_stdout: bool,
    /// Send fd 2 to a dedicated pipe instead of the terminal.
    pub capture_stderr: bool,
    /// Extra environment variables; these win over everything else.
    pub env: BTreeMap<String, String>,
    /// Polling and timeout settings.
    pub timing: TimingConfig,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            executable: PathBuf::new(),
            args: Vec::new(),
            columns: 80,
            lines: 24,
            term: "linux".to_string(),
            stdin: None,
            stdin_source: StdinSource::default(),
            capture_stdout: false,
            capture_stderr: false,
            env: BTreeMap::new(),
            timing: TimingConfig::default(),
        }
    }
}

impl HarnessConfig {
    /// Configuration for running `executable` with defaults for the rest.
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            ..Default::default()
        }
    }

    /// Parse a TOML document. Missing keys take their defaults.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Add a program argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Replace the program arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Set an environment variable in the child.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Set the terminal size.
    #[must_use]
    pub fn size(mut self, columns: u16, lines: u16) -> Self {
        self.columns = columns;
        self.lines = lines;
        self
    }

    /// Set `$TERM` in the child.
    #[must_use]
    pub fn term(mut self, term: impl Into<String>) -> Self {
        self.term = term.into();
        self
    }

    /// Deliver `payload` to the program at startup.
    #[must_use]
    pub fn stdin(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(payload.into());
        self
    }

    #[must_use]
    pub fn stdin_source(mut self, source: StdinSource) -> Self {
        self.stdin_source = source;
        self
    }

    #[must_use]
    pub fn capture_stdout(mut self, enabled: bool) -> Self {
        self.capture_stdout = enabled;
        self
    }

    #[must_use]
    pub fn capture_stderr(mut self, enabled: bool) -> Self {
        self.capture_stderr = enabled;
        self
    }

    #[must_use]
    pub fn timing(mut self, timing: TimingConfig) -> Self {
        self.timing = timing;
        self
    }

    /// Reject configurations that cannot describe a session.
    pub fn validate(&self) -> Result<()> {
        if self.executable.as_os_str().is_empty() {
            return Err(HarnessError::InvalidConfig(
                "no executable configured".to_string(),
            ));
        }
        if self.columns == 0 || self.lines == 0 {
            return Err(HarnessError::InvalidConfig(format!(
                "terminal size {}x{} must be non-zero",
                self.columns, self.lines
            )));
        }
        if self.timing.poll_interval_ms == 0 {
            return Err(HarnessError::InvalidConfig(
                "poll interval must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Environment for the child: terminal description first, caller's
    /// variables last so they override.
    pub fn child_env(&self) -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();
        env.insert("TERM".to_string(), self.term.clone());
        env.insert("COLUMNS".to_string(), self.columns.to_string());
        env.insert("LINES".to_string(), self.lines.to_string());
        for (key, value) in &self.env {
            env.insert(key.clone(), value.clone());
        }
        env
    }
}

/// Where the startup stdin payload is delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StdinSource {
    /// Written to the pty right after spawn, as if typed.
    #[default]
    Terminal,
    /// A pipe on fd 0 holding the payload, closed after it.
    Pipe,
}

/// Polling and timeout settings, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// How long one poll for output may block.
    pub poll_interval_ms: u64,
    /// Silence required before output counts as stable.
    pub quiescence_ms: u64,
    /// Default budget for `wait_for_stable_output`.
    pub stable_timeout_ms: u64,
    /// Default budget for `wait_for_finished`.
    pub finish_timeout_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 10,
            quiescence_ms: 100,
            stable_timeout_ms: 5_000,
            finish_timeout_ms: 5_000,
        }
    }
}

impl TimingConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn quiescence_window(&self) -> Duration {
        Duration::from_millis(self.quiescence_ms)
    }

    pub fn stable_timeout(&self) -> Duration {
        Duration::from_millis(self.stable_timeout_ms)
    }

    pub fn finish_timeout(&self) -> Duration {
        Duration::from_millis(self.finish_timeout_ms)
    }
}

/// Stdin payload as a TOML string.
mod payload {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<Vec<u8>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(bytes) => serializer.serialize_some(&*String::from_utf8_lossy(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Vec<u8>>, D::Error> {
        Ok(Option::<String>::deserialize(deserializer)?.map(String::into_bytes))
    }
}
