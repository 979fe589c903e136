use crate::error::ConfigError;
use std::{collections::HashMap, fs, path::Path, str::FromStr};

/// Environment variables, optionally layered with a `.env` file.
#[derive(Debug, Clone)]
pub struct EnvManager {
    vars: HashMap<String, String>,
    sensitive_patterns: Vec<&'static str>,
}

impl EnvManager {
    /// Snapshot of the process environment.
    pub fn new() -> Self {
        Self::from_vars(std::env::vars())
    }

    pub fn from_vars(vars: impl IntoIterator<Item = (String, String)>) -> Self {
        Self {
            vars: vars.into_iter().collect(),
            sensitive_patterns: vec!["password", "passwd", "secret", "token", "credential"],
        }
    }

    /// Loads a `.env` file. Variables already set in the process environment win.
    pub fn load_from_file<P: AsRef<Path>>(&mut self, path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::EnvFile {
            path: path.to_path_buf(),
            source,
        })?;

        for (key, value) in Self::parse_env_content(&content)? {
            self.vars.entry(key).or_insert(value);
        }
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    pub fn get_or(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or(default).to_string()
    }

    /// Parses `key`, falling back to `default` when unset. Parse failures are pushed
    /// to `problems` so every bad variable is reported at once.
    pub fn parse_or<T: FromStr>(&self, key: &str, default: T, problems: &mut Vec<String>) -> T
    where
        T::Err: std::fmt::Display,
    {
        match self.get(key) {
            None => default,
            Some(raw) => raw.parse().unwrap_or_else(|e| {
                problems.push(format!("{key}: cannot parse '{raw}': {e}"));
                default
            }),
        }
    }

    pub fn flag_or(&self, key: &str, default: bool, problems: &mut Vec<String>) -> bool {
        match self.get(key).map(str::to_ascii_lowercase).as_deref() {
            None => default,
            Some("1" | "true" | "yes" | "on") => true,
            Some("0" | "false" | "no" | "off") => false,
            Some(other) => {
                problems.push(format!("{key}: expected true or false, got '{other}'"));
                default
            }
        }
    }

    /// `KEY=value` lines for the given keys with sensitive values masked.
    pub fn redacted(&self, keys: &[&str]) -> Vec<String> {
        keys.iter()
            .filter_map(|key| {
                let value = self.get(key)?;
                let lower = key.to_ascii_lowercase();
                let shown = if self.sensitive_patterns.iter().any(|p| lower.contains(p)) {
                    "********"
                } else {
                    value
                };
                Some(format!("{key}={shown}"))
            })
            .collect()
    }

    fn parse_env_content(content: &str) -> Result<Vec<(String, String)>, ConfigError> {
        let mut parsed = Vec::new();

        for (line_num, line) in content.lines().enumerate() {
            let line = line.trim();

            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let line = line.strip_prefix("export ").unwrap_or(line);
            let Some((key, value)) = line.split_once('=') else {
                return Err(ConfigError::Malformed {
                    line: line_num + 1,
                    message: "expected KEY=VALUE",
                });
            };

            let key = key.trim();
            if key.is_empty() {
                return Err(ConfigError::Malformed {
                    line: line_num + 1,
                    message: "empty key",
                });
            }

            parsed.push((key.to_string(), Self::unquote_value(value)));
        }

        Ok(parsed)
    }

    fn unquote_value(value: &str) -> String {
        let value = value.trim();

        for quote in ['"', '\''] {
            if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
                return value[1..value.len() - 1].to_string();
            }
        }

        value.to_string()
    }
}

impl Default for EnvManager {
    fn default() -> Self {
        Self::new()
    }
}
