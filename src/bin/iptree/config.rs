use super::SynchronousArg;
use clap::ValueEnum;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Clone, Default)]
pub struct Profile {
    pub name: String,
    pub database: Option<PathBuf>,
    pub page_size: Option<u32>,
    pub cache_pages: Option<usize>,
    pub synchronous: Option<SynchronousArg>,
    pub order: Option<usize>,
    pub autocheckpoint_pages: Option<usize>,
}

#[derive(Debug, Default)]
pub struct CliConfig {
    data: RawConfig,
    profiles: HashMap<String, Profile>,
}

impl CliConfig {
    /// Loads `explicit`, or the per-user default file when it exists.
    pub fn load(explicit: Option<PathBuf>) -> Result<Self, ConfigError> {
        let data = match explicit {
            Some(path) => read_file(&path)?,
            None => match default_config_path() {
                Some(path) if path.exists() => read_file(&path)?,
                _ => RawConfig::default(),
            },
        };
        let profiles = parse_profiles(&data)?;
        Ok(Self { data, profiles })
    }

    pub fn default_db_path(&self) -> Option<&PathBuf> {
        self.data.database.default_path.as_ref()
    }

    /// Resolves `requested`, falling back to the configured default profile.
    pub fn select(&self, requested: Option<&str>) -> Result<Option<&Profile>, ConfigError> {
        let name = match requested.or(self.data.default_profile.as_deref()) {
            Some(name) => name,
            None => return Ok(None),
        };
        self.profiles
            .get(name)
            .map(Some)
            .ok_or_else(|| ConfigError::ProfileNotFound {
                name: name.to_string(),
            })
    }
}

fn read_file(path: &Path) -> Result<RawConfig, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn parse_profiles(data: &RawConfig) -> Result<HashMap<String, Profile>, ConfigError> {
    let mut profiles = HashMap::new();
    for (name, raw) in &data.profiles {
        profiles.insert(name.clone(), convert_profile(name, raw)?);
    }
    if let Some(default_name) = data.default_profile.as_ref() {
        if !profiles.contains_key(default_name) {
            return Err(ConfigError::ProfileNotFound {
                name: default_name.clone(),
            });
        }
    }
    Ok(profiles)
}

fn convert_profile(name: &str, raw: &RawProfile) -> Result<Profile, ConfigError> {
    let synchronous = match raw.synchronous.as_deref() {
        Some(value) => Some(SynchronousArg::from_str(value, true).map_err(|_| {
            ConfigError::InvalidSynchronous {
                profile: name.to_string(),
                value: value.to_string(),
            }
        })?),
        None => None,
    };
    Ok(Profile {
        name: name.to_string(),
        database: raw.database.clone(),
        page_size: raw.page_size,
        cache_pages: raw.cache_pages,
        synchronous,
        order: raw.order,
        autocheckpoint_pages: raw.autocheckpoint_pages,
    })
}

#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    #[serde(default)]
    database: DatabaseSection,
    #[serde(default)]
    profiles: HashMap<String, RawProfile>,
    #[serde(default)]
    default_profile: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabaseSection {
    #[serde(rename = "default")]
    default_path: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawProfile {
    database: Option<PathBuf>,
    page_size: Option<u32>,
    cache_pages: Option<usize>,
    synchronous: Option<String>,
    order: Option<usize>,
    autocheckpoint_pages: Option<usize>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read CLI config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse CLI config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("profile '{name}' not found")]
    ProfileNotFound { name: String },
    #[error("profile '{profile}' synchronous value '{value}' is invalid")]
    InvalidSynchronous { profile: String, value: String },
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|base| base.join("iptree").join("cli.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_profiles_and_default() {
        let data: RawConfig = toml::from_str(
            r#"
            default_profile = "small"

            [database]
            default = "/var/lib/iptree/main.ipt"

            [profiles.small]
            page_size = 512
            order = 4
            synchronous = "OFF"
            "#,
        )
        .unwrap();
        let profiles = parse_profiles(&data).unwrap();
        let small = &profiles["small"];
        assert_eq!(small.page_size, Some(512));
        assert_eq!(small.order, Some(4));
        assert_eq!(small.synchronous, Some(SynchronousArg::Off));
        let config = CliConfig { data, profiles };
        assert_eq!(config.select(None).unwrap().map(|p| p.name.as_str()), Some("small"));
        assert!(config.select(Some("missing")).is_err());
        assert_eq!(
            config.default_db_path(),
            Some(&PathBuf::from("/var/lib/iptree/main.ipt"))
        );
    }

    #[test]
    fn rejects_bad_synchronous_value() {
        let data: RawConfig = toml::from_str(
            r#"
            [profiles.p]
            synchronous = "sometimes"
            "#,
        )
        .unwrap();
        assert!(matches!(
            parse_profiles(&data),
            Err(ConfigError::InvalidSynchronous { .. })
        ));
    }

    #[test]
    fn unknown_default_profile_is_an_error() {
        let data: RawConfig = toml::from_str(r#"default_profile = "ghost""#).unwrap();
        assert!(parse_profiles(&data).is_err());
    }
}
