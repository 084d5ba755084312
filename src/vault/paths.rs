use anyhow::Result;
use std::env;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct VaultPaths {
    pub vault_home: PathBuf,
    pub data_dir: PathBuf,
    pub db_file: PathBuf,
    pub history_dir: PathBuf,
}

fn required_home_dir() -> Result<PathBuf> {
    if let Some(home) = dirs::home_dir() {
        return Ok(home);
    }
    Err(anyhow::anyhow!("HOME directory could not be resolved"))
}

fn env_or_default_path(var: &str, fallback: PathBuf) -> PathBuf {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => PathBuf::from(v.trim()),
        _ => fallback,
    }
}

pub fn default_vault_home() -> Result<PathBuf> {
    Ok(env_or_default_path(
        "AUDIOVAULT_HOME",
        required_home_dir()?.join("audiovault"),
    ))
}

pub fn resolve_paths() -> Result<VaultPaths> {
    let vault_home = default_vault_home()?;
    let data_dir = env_or_default_path("AUDIOVAULT_DATA_DIR", vault_home.join("data"));
    let db_file = env_or_default_path("AUDIOVAULT_DB", data_dir.join("files_data.sqlite"));
    let history_dir = env_or_default_path("AUDIOVAULT_HISTORY_DIR", vault_home.join("history"));

    Ok(VaultPaths {
        vault_home,
        data_dir,
        db_file,
        history_dir,
    })
}

pub fn owner_dir(data_dir: &Path, owner_id: i64) -> PathBuf {
    data_dir.join(format!("u{owner_id}"))
}

pub fn owner_file_path(data_dir: &Path, owner_id: i64, assigned_filename: &str) -> PathBuf {
    owner_dir(data_dir, owner_id).join(assigned_filename)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owner_files_live_under_prefixed_owner_dir() {
        let got = owner_file_path(Path::new("/srv/vault/data"), 123, "Bob - Song.mp3");
        assert_eq!(got, PathBuf::from("/srv/vault/data/u123/Bob - Song.mp3"));
    }

    #[test]
    fn negative_owner_ids_keep_their_sign() {
        let got = owner_dir(Path::new("/d"), -100);
        assert_eq!(got, PathBuf::from("/d/u-100"));
    }
}
