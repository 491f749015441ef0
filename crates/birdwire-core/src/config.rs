use std::{env, fs, path::Path};

use crate::{errors::Error, raw_json::DEFAULT_PRUNE_THRESHOLD, Result};

/// Typed configuration.
///
/// Loaded from the environment, with a `.env` file in the working directory
/// filling in anything not already set.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    /// Record the raw JSON each decoded object was built from.
    pub json_store_enabled: bool,
    /// Max chars of raw JSON echoed by diagnostics (0 = unlimited).
    pub raw_json_preview: usize,
    /// Entry count at which a raw JSON scope sweeps dead entries.
    pub prune_threshold: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            json_store_enabled: false,
            raw_json_preview: 512,
            prune_threshold: DEFAULT_PRUNE_THRESHOLD,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup (env, test fixtures).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();

        let json_store_enabled = match lookup("BIRDWIRE_JSON_STORE_ENABLED") {
            Some(v) => parse_bool("BIRDWIRE_JSON_STORE_ENABLED", &v)?,
            None => defaults.json_store_enabled,
        };
        let raw_json_preview = match lookup("BIRDWIRE_RAW_JSON_PREVIEW") {
            Some(v) => parse_usize("BIRDWIRE_RAW_JSON_PREVIEW", &v)?,
            None => defaults.raw_json_preview,
        };
        let prune_threshold = match lookup("BIRDWIRE_PRUNE_THRESHOLD") {
            Some(v) => parse_usize("BIRDWIRE_PRUNE_THRESHOLD", &v)?,
            None => defaults.prune_threshold,
        };
        if prune_threshold == 0 {
            return Err(Error::Config(
                "BIRDWIRE_PRUNE_THRESHOLD must be greater than zero".to_string(),
            ));
        }

        Ok(Self {
            json_store_enabled,
            raw_json_preview,
            prune_threshold,
        })
    }
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for (key, val) in parse_dotenv(&contents) {
        if env::var_os(&key).is_some() {
            continue; // do not override existing env
        }
        env::set_var(key, val);
    }
}

fn parse_dotenv(contents: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }

        let mut val = v.trim().to_string();
        // Strip optional surrounding quotes.
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        out.push((key.to_string(), val));
    }
    out
}

fn parse_bool(key: &str, s: &str) -> Result<bool> {
    match s.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(Error::Config(format!("{key}: invalid boolean {other:?}"))),
    }
}

fn parse_usize(key: &str, s: &str) -> Result<usize> {
    s.trim()
        .parse::<usize>()
        .map_err(|_| Error::Config(format!("{key}: invalid number {s:?}")))
}
