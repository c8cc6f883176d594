use std::collections::BTreeMap;

use super::ConfigError;

/// Variable lookup: dotenv entries first, then the process environment.
#[derive(Clone, Default)]
pub struct Env {
    pub dotenv: BTreeMap<String, String>,
}

impl std::fmt::Debug for Env {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let keys: Vec<&str> = self.dotenv.keys().map(String::as_str).collect();
        f.debug_struct("Env").field("dotenv_keys", &keys).finish()
    }
}

impl Env {
    /// Process environment only.
    pub fn process() -> Self {
        Self::default()
    }

    pub fn from_dotenv(contents: &str) -> Self {
        Self {
            dotenv: parse_dotenv(contents),
        }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        if let Some(value) = self.dotenv.get(key) {
            return Some(value.clone());
        }
        std::env::var(key)
            .ok()
            .filter(|value| !value.trim().is_empty())
    }

    pub fn get_u64(&self, key: &'static str) -> Result<Option<u64>, ConfigError> {
        self.get(key)
            .map(|raw| {
                raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
                    key,
                    value: raw.clone(),
                })
            })
            .transpose()
    }

    pub fn get_bool(&self, key: &'static str) -> Result<Option<bool>, ConfigError> {
        self.get(key)
            .map(|raw| match raw.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Ok(true),
                "0" | "false" | "no" | "off" => Ok(false),
                _ => Err(ConfigError::InvalidValue {
                    key,
                    value: raw.clone(),
                }),
            })
            .transpose()
    }
}

/// `KEY=value` lines; `#` comments, `export ` prefixes and matching quotes
/// are accepted. Blank values are skipped.
pub fn parse_dotenv(contents: &str) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    for raw_line in contents.lines() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line = line.strip_prefix("export ").unwrap_or(line);
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        let value = unquote(value.trim());
        if key.is_empty() || value.trim().is_empty() {
            continue;
        }
        out.insert(key.to_string(), value.to_string());
    }
    out
}

fn unquote(value: &str) -> &str {
    ['"', '\'']
        .into_iter()
        .find_map(|quote| value.strip_prefix(quote)?.strip_suffix(quote))
        .unwrap_or(value)
}
