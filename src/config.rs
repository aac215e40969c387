//! Config-directory collaborators: API credentials and the search-term
//! list. Plain file I/O, no retries; a missing file is a hard error with
//! enough context to fix it.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

/// Consumer key/secret for the app-auth token exchange.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub key: String,
    pub secret: String,
}

/// Read credentials from the first `*.auth` file in `config_dir`:
/// consumer key on line 1, consumer secret on line 2.
pub fn read_credentials(config_dir: &Path) -> Result<Credentials> {
    let path = find_auth_file(config_dir)?;
    let contents = fs::read_to_string(&path)
        .with_context(|| format!("failed to read {}", path.display()))?;

    let mut lines = contents.lines().map(str::trim).filter(|l| !l.is_empty());
    let key = lines
        .next()
        .with_context(|| format!("{}: expected consumer key on line 1", path.display()))?;
    let secret = lines
        .next()
        .with_context(|| format!("{}: expected consumer secret on line 2", path.display()))?;

    Ok(Credentials {
        key: key.to_string(),
        secret: secret.to_string(),
    })
}

fn find_auth_file(config_dir: &Path) -> Result<PathBuf> {
    let entries = fs::read_dir(config_dir)
        .with_context(|| format!("failed to read config dir {}", config_dir.display()))?;

    let mut candidates: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().map_or(false, |ext| ext == "auth"))
        .collect();
    candidates.sort();

    match candidates.into_iter().next() {
        Some(path) => Ok(path),
        None => bail!("no .auth file found in {}", config_dir.display()),
    }
}

/// Read the search-term list from `hashtags.list`: one term per line,
/// without the leading `#`; blank lines are ignored.
pub fn read_terms(config_dir: &Path) -> Result<Vec<String>> {
    let path = config_dir.join("hashtags.list");
    let contents = fs::read_to_string(&path)
        .with_context(|| format!("failed to read search terms from {}", path.display()))?;

    let terms: Vec<String> = contents
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(|l| l.trim_start_matches('#').to_string())
        .collect();

    if terms.is_empty() {
        bail!("{} contains no search terms", path.display());
    }
    Ok(terms)
}
