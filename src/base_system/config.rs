//! 配置文件读取与默认值合并。

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_yaml::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {}", path.display())]
    Io { path: PathBuf, source: io::Error },
    #[error("invalid yaml at {}", path.display())]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },
    #[error("validation error: {0}")]
    Validation(String),
}

pub trait ConfigSpec: Serialize + DeserializeOwned + Default {
    const FILE_NAME: &'static str;
    fn field_names() -> &'static [&'static str];
}

/// Load a config file if it exists, otherwise return defaults.
///
/// # Path resolution
/// - If `config_path` is Some: uses the exact path provided
/// - Otherwise: `FILE_NAME` in the current directory
///
/// Keys missing from the file keep their default values. The file is never
/// created or rewritten.
pub fn load_or_default<T: ConfigSpec>(config_path: Option<&Path>) -> Result<T, ConfigError> {
    let path = resolve_path::<T>(config_path);
    if !path.exists() {
        return Ok(T::default());
    }

    let raw = fs::read_to_string(&path).map_err(|source| ConfigError::Io {
        path: path.clone(),
        source,
    })?;
    load_from_str::<T>(&raw, &path)
}

fn load_from_str<T: ConfigSpec>(raw: &str, path: &Path) -> Result<T, ConfigError> {
    let user_yaml: Value = serde_yaml::from_str(raw).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;

    // 空文件解析为 null
    if user_yaml.is_null() {
        return Ok(T::default());
    }

    for key in unknown_keys::<T>(&user_yaml) {
        tracing::warn!("unknown config key `{key}` in {} ignored", path.display());
    }

    let mut merged = serde_yaml::to_value(T::default())
        .map_err(|err| ConfigError::Validation(err.to_string()))?;
    merge_values(&mut merged, user_yaml);

    serde_yaml::from_value(merged).map_err(|err| ConfigError::Validation(err.to_string()))
}

fn unknown_keys<T: ConfigSpec>(user_yaml: &Value) -> Vec<String> {
    let Value::Mapping(map) = user_yaml else {
        return Vec::new();
    };
    map.keys()
        .filter_map(|key| key.as_str())
        .filter(|key| !T::field_names().contains(key))
        .map(str::to_string)
        .collect()
}

fn merge_values(default: &mut Value, user: Value) {
    match (default, user) {
        (Value::Mapping(dest), Value::Mapping(src)) => {
            for (key, user_val) in src {
                if let Some(dest_val) = dest.get_mut(&key) {
                    merge_values(dest_val, user_val);
                } else {
                    dest.insert(key, user_val);
                }
            }
        }
        (dest, other) => {
            *dest = other;
        }
    }
}

fn resolve_path<T: ConfigSpec>(path: Option<&Path>) -> PathBuf {
    match path {
        Some(p) => p.to_path_buf(),
        None => PathBuf::from(T::FILE_NAME),
    }
}
