use std::path::PathBuf;

use directories::BaseDirs;

use crate::error::{Result, VentError};

fn env_home_dir() -> Option<PathBuf> {
    if let Some(home) = std::env::var_os("HOME") {
        if !home.is_empty() {
            return Some(PathBuf::from(home));
        }
    }
    if let Some(profile) = std::env::var_os("USERPROFILE") {
        if !profile.is_empty() {
            return Some(PathBuf::from(profile));
        }
    }
    None
}

pub fn user_home_dir() -> Option<PathBuf> {
    if let Some(base) = BaseDirs::new() {
        return Some(base.home_dir().to_path_buf());
    }
    env_home_dir()
}

/// `$VENT_HOME`, or `~/.vent`. Not created: callers only read from it.
pub fn vent_home_dir() -> Result<PathBuf> {
    if let Some(override_dir) = std::env::var_os("VENT_HOME") {
        let path = PathBuf::from(override_dir);
        if path.is_relative() {
            return Err(VentError::Config(
                "VENT_HOME must be an absolute path".to_string(),
            ));
        }
        return Ok(path);
    }

    let home = user_home_dir().ok_or_else(|| {
        VentError::Config("failed to resolve user home; set VENT_HOME or HOME".to_string())
    })?;
    Ok(home.join(".vent"))
}

pub fn vent_config_path() -> Result<PathBuf> {
    Ok(vent_home_dir()?.join("config.toml"))
}
