//! Service configuration.
//!
//! Keys arrive either from a config file section or from "key=value" command
//! tokens; later sources override earlier ones. Unknown keys and malformed
//! values are rejected up front so a misconfigured service never starts.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("unknown configuration key: {0}")]
    UnknownKey(String),

    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("malformed token (expected key=value): {0}")]
    MalformedToken(String),
}

/// Source format of the resource graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadFormat {
    Hwloc,
    Jgf,
    Rv1Exec,
}

impl LoadFormat {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "hwloc" => Some(Self::Hwloc),
            "jgf" => Some(Self::Jgf),
            "rv1exec" => Some(Self::Rv1Exec),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hwloc => "hwloc",
            Self::Jgf => "jgf",
            Self::Rv1Exec => "rv1exec",
        }
    }
}

/// Which traversal engine services match requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TraverserPolicy {
    #[default]
    Simple,
    Flexible,
}

/// All recognized configuration keys with their defaults.
#[derive(Debug, Clone)]
pub struct Config {
    pub load_file: Option<String>,
    pub load_format: LoadFormat,
    pub load_allowlist: Vec<String>,
    pub match_policy: String,
    pub match_format: String,
    pub subsystems: Vec<String>,
    pub reserve_vtx_vec: usize,
    pub prune_filters: String,
    pub update_interval: u64,
    pub traverser_policy: TraverserPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            load_file: None,
            load_format: LoadFormat::Rv1Exec,
            load_allowlist: Vec::new(),
            match_policy: "first".to_owned(),
            match_format: "rv1_nosched".to_owned(),
            subsystems: vec!["containment".to_owned()],
            reserve_vtx_vec: 0,
            prune_filters: "ALL:core".to_owned(),
            update_interval: 0,
            traverser_policy: TraverserPolicy::Simple,
        }
    }
}

impl Config {
    /// Applies one key=value pair, overriding the current value.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let invalid = || ConfigError::InvalidValue {
            key: key.to_owned(),
            value: value.to_owned(),
        };
        match key {
            "load-file" => self.load_file = Some(value.to_owned()),
            "load-format" => {
                self.load_format = LoadFormat::parse(value).ok_or_else(invalid)?;
            }
            "load-allowlist" => {
                self.load_allowlist = split_list(value);
            }
            "match-policy" => self.match_policy = value.to_owned(),
            "match-format" => self.match_format = value.to_owned(),
            "subsystems" => {
                let subsystems = split_list(value);
                if subsystems.is_empty() {
                    return Err(invalid());
                }
                self.subsystems = subsystems;
            }
            "reserve-vtx-vec" => {
                self.reserve_vtx_vec = value.parse().map_err(|_| invalid())?;
            }
            "prune-filters" => self.prune_filters = value.to_owned(),
            "update-interval" => {
                self.update_interval = value.parse().map_err(|_| invalid())?;
            }
            "traverser-policy" => {
                self.traverser_policy = match value {
                    "simple" => TraverserPolicy::Simple,
                    "flexible" => TraverserPolicy::Flexible,
                    _ => return Err(invalid()),
                };
            }
            _ => return Err(ConfigError::UnknownKey(key.to_owned())),
        }
        Ok(())
    }

    /// Applies a sequence of "key=value" tokens in order.
    pub fn apply_tokens<I, S>(&mut self, tokens: I) -> Result<(), ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for token in tokens {
            let token = token.as_ref();
            let (key, value) = token
                .split_once('=')
                .ok_or_else(|| ConfigError::MalformedToken(token.to_owned()))?;
            self.set(key.trim(), value.trim())?;
        }
        Ok(())
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = Config::default();
        assert_eq!(cfg.match_policy, "first");
        assert_eq!(cfg.match_format, "rv1_nosched");
        assert_eq!(cfg.subsystems, vec!["containment"]);
        assert_eq!(cfg.prune_filters, "ALL:core");
        assert_eq!(cfg.traverser_policy, TraverserPolicy::Simple);
    }

    #[test]
    fn later_tokens_override() {
        let mut cfg = Config::default();
        cfg.apply_tokens(["match-policy=low", "match-policy=high"]).unwrap();
        assert_eq!(cfg.match_policy, "high");
    }

    #[test]
    fn unknown_key_rejected() {
        let mut cfg = Config::default();
        assert_eq!(
            cfg.set("no-such-key", "1"),
            Err(ConfigError::UnknownKey("no-such-key".to_owned()))
        );
    }

    #[test]
    fn malformed_token_rejected() {
        let mut cfg = Config::default();
        assert!(matches!(
            cfg.apply_tokens(["match-policy"]),
            Err(ConfigError::MalformedToken(_))
        ));
    }

    #[test]
    fn enums_parse() {
        let mut cfg = Config::default();
        cfg.apply_tokens(["load-format=jgf", "traverser-policy=flexible"]).unwrap();
        assert_eq!(cfg.load_format, LoadFormat::Jgf);
        assert_eq!(cfg.traverser_policy, TraverserPolicy::Flexible);
        assert!(cfg.set("load-format", "xml").is_err());
    }

    #[test]
    fn subsystem_list_splits() {
        let mut cfg = Config::default();
        cfg.set("subsystems", "containment,power").unwrap();
        assert_eq!(cfg.subsystems, vec!["containment", "power"]);
        assert!(cfg.set("subsystems", ",").is_err());
    }
}
