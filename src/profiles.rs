//! Loading candidate profiles from the submissions file.

use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::screening::types::Profile;

pub const DEFAULT_PROFILE_LIMIT: usize = 1000;

static WHITESPACE_RUN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s+").expect("Invalid whitespace regex"));

#[derive(Debug, thiserror::Error)]
pub enum ProfileLoadError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid profile JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("profile document must be a JSON array")]
    NotAnArray,
}

/// Stable id from a profile's name and the local part of its email.
///
/// `"Ada  Lovelace"` + `"ada.l@example.com"` gives `"ada-lovelace-ada.l"`.
pub fn stable_profile_id(name: &str, email: &str) -> String {
    let slug = WHITESPACE_RUN.replace_all(name, "-").to_lowercase();
    let local = email.split('@').next().unwrap_or_default();
    format!("{slug}-{local}")
}

/// Parse a submissions document, keep the first `limit` entries in file
/// order and assign stable ids.
pub fn parse_profiles(json: &str, limit: usize) -> Result<Vec<Profile>, ProfileLoadError> {
    let document: Value = serde_json::from_str(json)?;
    let Value::Array(entries) = document else {
        return Err(ProfileLoadError::NotAnArray);
    };

    entries
        .into_iter()
        .take(limit)
        .map(|entry| {
            let mut profile: Profile = serde_json::from_value(entry)?;
            profile.id = stable_profile_id(&profile.name, &profile.email);
            Ok(profile)
        })
        .collect()
}

/// Load profiles from a submissions file.
pub fn load_profiles(path: impl AsRef<Path>, limit: usize) -> Result<Vec<Profile>, ProfileLoadError> {
    let path = path.as_ref();
    let json = std::fs::read_to_string(path).map_err(|source| ProfileLoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let profiles = parse_profiles(&json, limit)?;
    tracing::info!(path = %path.display(), count = profiles.len(), "loaded profiles");
    Ok(profiles)
}
