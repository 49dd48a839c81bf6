//! Named connection profiles.
//!
//! Config root resolution order:
//! 1. Explicit path passed to `ProfileStore::new()`
//! 2. STASH_ROOT environment variable
//! 3. Platform config directory (e.g. ~/.config/stash)
//!
//! Each profile is stored as `<root>/profiles/<name>.toml`; `default.toml`
//! is the profile used when none is named.

use std::path::PathBuf;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::render::DEFAULT_FORMAT;
use crate::{Error, Result};

/// Name of the profile used when none is given.
pub const DEFAULT_PROFILE: &str = "default";

/// Settings remembered between runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    /// Profile name (taken from the file name, not stored).
    #[serde(skip)]
    pub name: String,

    /// Backend URL.
    #[serde(default = "default_url")]
    pub url: String,

    /// Regex that index names must match.
    #[serde(default = "default_index_pattern")]
    pub index_pattern: String,

    /// Output template.
    #[serde(default = "default_format")]
    pub format: String,

    /// Field used for sorting and following.
    #[serde(default = "default_timestamp_field")]
    pub timestamp_field: String,

    /// Saved search terms, combined with terms given on the command line.
    #[serde(default)]
    pub terms: Vec<String>,

    /// User for HTTP basic auth (the password is never stored).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,

    /// SSH tunnel spec: `[localport:][user@]sshhost[:sshport]`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_tunnel: Option<String>,
}

fn default_url() -> String {
    "http://127.0.0.1:9200".to_string()
}

fn default_index_pattern() -> String {
    "logstash-[0-9].*".to_string()
}

fn default_format() -> String {
    DEFAULT_FORMAT.to_string()
}

fn default_timestamp_field() -> String {
    "@timestamp".to_string()
}

impl Profile {
    /// A profile with default settings.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: default_url(),
            index_pattern: default_index_pattern(),
            format: default_format(),
            timestamp_field: default_timestamp_field(),
            terms: Vec::new(),
            user: None,
            ssh_tunnel: None,
        }
    }
}

/// Loads and saves profiles under a config root.
#[derive(Debug, Clone)]
pub struct ProfileStore {
    root: PathBuf,
}

impl ProfileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Store at the default config root.
    pub fn default_location() -> Result<Self> {
        Ok(Self::new(resolve_root()?))
    }

    /// Directory holding profile files.
    pub fn profiles_dir(&self) -> PathBuf {
        self.root.join("profiles")
    }

    /// Path of the file backing profile `name`.
    pub fn profile_path(&self, name: &str) -> PathBuf {
        self.profiles_dir().join(format!("{}.toml", name))
    }

    /// Load profile `name`, or a default profile if it was never saved.
    pub fn load(&self, name: &str) -> Result<Profile> {
        validate_name(name)?;
        let path = self.profile_path(name);
        if !path.exists() {
            debug!(profile = name, "no saved profile, using defaults");
            return Ok(Profile::named(name));
        }

        let contents = std::fs::read_to_string(&path)?;
        let mut profile: Profile = toml::from_str(&contents)
            .map_err(|e| Error::Config(format!("Failed to parse profile {}: {}", path.display(), e)))?;
        profile.name = name.to_string();
        Ok(profile)
    }

    /// Save `profile`. The first profile ever saved also becomes the default.
    pub fn save(&self, profile: &Profile) -> Result<()> {
        validate_name(&profile.name)?;
        let dir = self.profiles_dir();
        let first = !dir.exists() || self.list()?.is_empty();
        std::fs::create_dir_all(&dir)?;

        let contents = toml::to_string_pretty(profile)
            .map_err(|e| Error::Config(format!("Failed to serialize profile: {}", e)))?;
        std::fs::write(self.profile_path(&profile.name), contents)?;

        if first && profile.name != DEFAULT_PROFILE {
            self.set_default(&profile.name)?;
        }
        Ok(())
    }

    /// Make profile `name` the default one.
    pub fn set_default(&self, name: &str) -> Result<()> {
        validate_name(name)?;
        let source = self.profile_path(name);
        if !source.exists() {
            return Err(Error::NotFound(format!("profile '{}'", name)));
        }
        if name != DEFAULT_PROFILE {
            std::fs::copy(&source, self.profile_path(DEFAULT_PROFILE))?;
        }
        info!(profile = name, "default profile updated");
        Ok(())
    }

    /// Names of all saved profiles, sorted.
    pub fn list(&self) -> Result<Vec<String>> {
        let dir = self.profiles_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "toml") {
                if let Some(stem) = path.file_stem() {
                    names.push(stem.to_string_lossy().to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }
}

/// Profile names become file names.
fn validate_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_alphanumeric() || c == '-' || c == '_' || c == '.')
        && !name.starts_with('.');
    if valid {
        Ok(())
    } else {
        Err(Error::Config(format!("Invalid profile name: '{}'", name)))
    }
}

/// Resolve the config root using the standard resolution order.
fn resolve_root() -> Result<PathBuf> {
    // 1. Environment variable
    if let Ok(path) = std::env::var("STASH_ROOT") {
        return Ok(PathBuf::from(path));
    }

    // 2. Platform config directory
    if let Some(proj_dirs) = ProjectDirs::from("", "", "stash") {
        return Ok(proj_dirs.config_dir().to_path_buf());
    }

    // 3. Fallback to ~/.config/stash
    let home = std::env::var("HOME")
        .map_err(|_| Error::Config("Could not determine home directory".to_string()))?;
    Ok(PathBuf::from(home).join(".config/stash"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_profile_uses_defaults() {
        let tmp = TempDir::new().unwrap();
        let store = ProfileStore::new(tmp.path());
        let profile = store.load("staging").unwrap();
        assert_eq!(profile, Profile::named("staging"));
        assert_eq!(profile.url, "http://127.0.0.1:9200");
        assert_eq!(profile.format, "%@timestamp %x_request_id %source %message");
    }

    #[test]
    fn test_save_load_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let store = ProfileStore::new(tmp.path());

        let mut profile = Profile::named("prod");
        profile.url = "http://es.prod:9200".to_string();
        profile.user = Some("ops".to_string());
        profile.terms = vec!["error".to_string()];
        store.save(&profile).unwrap();

        assert_eq!(store.load("prod").unwrap(), profile);
    }

    #[test]
    fn test_first_saved_profile_becomes_default() {
        let tmp = TempDir::new().unwrap();
        let store = ProfileStore::new(tmp.path());

        let mut first = Profile::named("prod");
        first.url = "http://es.prod:9200".to_string();
        store.save(&first).unwrap();
        let mut second = Profile::named("staging");
        second.url = "http://es.staging:9200".to_string();
        store.save(&second).unwrap();

        assert_eq!(store.load(DEFAULT_PROFILE).unwrap().url, "http://es.prod:9200");
        assert_eq!(store.list().unwrap(), vec!["default", "prod", "staging"]);
    }

    #[test]
    fn test_set_default() {
        let tmp = TempDir::new().unwrap();
        let store = ProfileStore::new(tmp.path());
        store.save(&Profile::named("prod")).unwrap();
        let mut staging = Profile::named("staging");
        staging.index_pattern = "app-.*".to_string();
        store.save(&staging).unwrap();

        store.set_default("staging").unwrap();
        assert_eq!(store.load(DEFAULT_PROFILE).unwrap().index_pattern, "app-.*");
    }

    #[test]
    fn test_set_default_unknown_profile() {
        let tmp = TempDir::new().unwrap();
        let store = ProfileStore::new(tmp.path());
        assert!(matches!(store.set_default("nope"), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let tmp = TempDir::new().unwrap();
        let store = ProfileStore::new(tmp.path());
        std::fs::create_dir_all(store.profiles_dir()).unwrap();
        std::fs::write(store.profile_path("min"), "url = \"http://other:9200\"\n").unwrap();

        let profile = store.load("min").unwrap();
        assert_eq!(profile.url, "http://other:9200");
        assert_eq!(profile.timestamp_field, "@timestamp");
        assert!(profile.terms.is_empty());
    }

    #[test]
    fn test_rejects_path_like_names() {
        let tmp = TempDir::new().unwrap();
        let store = ProfileStore::new(tmp.path());
        assert!(store.load("../etc").is_err());
        assert!(store.load("").is_err());
    }
}
