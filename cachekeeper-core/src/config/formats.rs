//! Config format conversion.
//!
//! Supported formats:
//! - JSON (`serde_json`)
//! - YAML (`serde_yaml`)
//! - TOML (`toml`)
//! - env files (`PREFIX_INSTANCE_FIELD=value`)
//!
//! Env files and environment overrides share one explicit field table
//! ([`ConfigField`]); there is no dotted-path lookup.
//!
//! TOML and env have no null, so a missing default TTL is written as `0`.
//! A zero TTL is never a valid config, which keeps the encoding unambiguous.

use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::cache::InstanceConfig;
use crate::error::{CacheError, Result};

/// Instance name → config
pub type ConfigSet = BTreeMap<String, InstanceConfig>;

/// Default prefix for env files and environment overrides
pub const DEFAULT_ENV_PREFIX: &str = "CACHE";

/// Supported serialization formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigFormat {
    Json,
    Yaml,
    Toml,
    Env,
}

impl ConfigFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigFormat::Json => "json",
            ConfigFormat::Yaml => "yaml",
            ConfigFormat::Toml => "toml",
            ConfigFormat::Env => "env",
        }
    }

    /// Guess the format from a file extension
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "json" => Some(ConfigFormat::Json),
            "yaml" | "yml" => Some(ConfigFormat::Yaml),
            "toml" => Some(ConfigFormat::Toml),
            "env" => Some(ConfigFormat::Env),
            _ => None,
        }
    }

    /// Formatter for this format (env uses [`DEFAULT_ENV_PREFIX`])
    pub fn formatter(&self) -> Box<dyn ConfigFormatter> {
        match self {
            ConfigFormat::Json => Box::new(JsonFormatter),
            ConfigFormat::Yaml => Box::new(YamlFormatter),
            ConfigFormat::Toml => Box::new(TomlFormatter),
            ConfigFormat::Env => Box::new(EnvFormatter::default()),
        }
    }
}

impl FromStr for ConfigFormat {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(ConfigFormat::Json),
            "yaml" | "yml" => Ok(ConfigFormat::Yaml),
            "toml" => Ok(ConfigFormat::Toml),
            "env" => Ok(ConfigFormat::Env),
            other => Err(CacheError::configuration(format!(
                "Unknown config format '{}': expected json, yaml, toml or env",
                other
            ))),
        }
    }
}

impl std::fmt::Display for ConfigFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Export options
#[derive(Debug, Clone)]
pub struct ExportOptions {
    /// Pretty-print (JSON)
    pub pretty: bool,
    /// Prepend a comment header (YAML, TOML, env)
    pub header: bool,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            pretty: true,
            header: true,
        }
    }
}

/// Converts a set of instance configs to and from text
pub trait ConfigFormatter: Send + Sync {
    fn format(&self) -> ConfigFormat;

    fn export(&self, configs: &ConfigSet, options: &ExportOptions) -> Result<String>;

    fn import(&self, text: &str) -> Result<ConfigSet>;
}

/// Serialized document layout shared by JSON and YAML
#[derive(Debug, Serialize, Deserialize)]
struct ConfigDocument {
    #[serde(default)]
    instances: ConfigSet,
}

fn header_comment() -> String {
    format!(
        "# cachekeeper instance configuration\n# exported at {}\n",
        chrono::Utc::now().to_rfc3339()
    )
}

/// Instance names in documents are authoritative over `instance_type` fields
fn normalize(mut set: ConfigSet) -> ConfigSet {
    for (name, config) in set.iter_mut() {
        config.instance_type = name.clone();
    }
    set
}

/// JSON formatter
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonFormatter;

impl ConfigFormatter for JsonFormatter {
    fn format(&self) -> ConfigFormat {
        ConfigFormat::Json
    }

    fn export(&self, configs: &ConfigSet, options: &ExportOptions) -> Result<String> {
        let doc = ConfigDocument {
            instances: configs.clone(),
        };
        let text = if options.pretty {
            serde_json::to_string_pretty(&doc)?
        } else {
            serde_json::to_string(&doc)?
        };
        Ok(text)
    }

    fn import(&self, text: &str) -> Result<ConfigSet> {
        let doc: ConfigDocument = serde_json::from_str(text)?;
        Ok(normalize(doc.instances))
    }
}

/// YAML formatter
#[derive(Debug, Default, Clone, Copy)]
pub struct YamlFormatter;

impl ConfigFormatter for YamlFormatter {
    fn format(&self) -> ConfigFormat {
        ConfigFormat::Yaml
    }

    fn export(&self, configs: &ConfigSet, options: &ExportOptions) -> Result<String> {
        let doc = ConfigDocument {
            instances: configs.clone(),
        };
        let body = serde_yaml::to_string(&doc)?;
        Ok(if options.header {
            format!("{}{}", header_comment(), body)
        } else {
            body
        })
    }

    fn import(&self, text: &str) -> Result<ConfigSet> {
        let doc: ConfigDocument = serde_yaml::from_str(text)?;
        Ok(normalize(doc.instances))
    }
}

/// TOML instance record; every field optional so partial files work
#[derive(Debug, Default, Serialize, Deserialize)]
struct TomlInstance {
    #[serde(skip_serializing_if = "Option::is_none")]
    max_size: Option<usize>,
    /// 0 = no default TTL
    #[serde(skip_serializing_if = "Option::is_none")]
    default_ttl_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    cleanup_interval_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    enabled: Option<bool>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct TomlDocument {
    #[serde(default)]
    instances: BTreeMap<String, TomlInstance>,
}

/// TOML formatter
#[derive(Debug, Default, Clone, Copy)]
pub struct TomlFormatter;

impl ConfigFormatter for TomlFormatter {
    fn format(&self) -> ConfigFormat {
        ConfigFormat::Toml
    }

    fn export(&self, configs: &ConfigSet, options: &ExportOptions) -> Result<String> {
        let doc = TomlDocument {
            instances: configs
                .iter()
                .map(|(name, c)| {
                    (
                        name.clone(),
                        TomlInstance {
                            max_size: Some(c.max_size),
                            default_ttl_ms: Some(c.default_ttl_ms.unwrap_or(0)),
                            cleanup_interval_ms: Some(c.cleanup_interval_ms),
                            enabled: Some(c.enabled),
                        },
                    )
                })
                .collect(),
        };
        let body = toml::to_string_pretty(&doc)?;
        Ok(if options.header {
            format!("{}{}", header_comment(), body)
        } else {
            body
        })
    }

    fn import(&self, text: &str) -> Result<ConfigSet> {
        let doc: TomlDocument = toml::from_str(text)?;
        Ok(doc
            .instances
            .into_iter()
            .map(|(name, t)| {
                let mut config = InstanceConfig::preset(&name);
                if let Some(max_size) = t.max_size {
                    config.max_size = max_size;
                }
                if let Some(ttl) = t.default_ttl_ms {
                    config.default_ttl_ms = (ttl > 0).then_some(ttl);
                }
                if let Some(interval) = t.cleanup_interval_ms {
                    config.cleanup_interval_ms = interval;
                }
                if let Some(enabled) = t.enabled {
                    config.enabled = enabled;
                }
                (name, config)
            })
            .collect())
    }
}

// -------------------------------------------------------------------------
// Env field table
// -------------------------------------------------------------------------

/// Config fields reachable through env files and environment overrides
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigField {
    MaxSize,
    DefaultTtlMs,
    CleanupIntervalMs,
    Enabled,
}

impl ConfigField {
    pub const ALL: [ConfigField; 4] = [
        ConfigField::MaxSize,
        ConfigField::DefaultTtlMs,
        ConfigField::CleanupIntervalMs,
        ConfigField::Enabled,
    ];

    /// Suffix used in variable names
    pub fn env_suffix(&self) -> &'static str {
        match self {
            ConfigField::MaxSize => "MAX_SIZE",
            ConfigField::DefaultTtlMs => "DEFAULT_TTL_MS",
            ConfigField::CleanupIntervalMs => "CLEANUP_INTERVAL_MS",
            ConfigField::Enabled => "ENABLED",
        }
    }

    /// Variable name for `instance` under `prefix`
    pub fn env_key(&self, prefix: &str, instance: &str) -> String {
        format!(
            "{}_{}_{}",
            prefix,
            instance.to_ascii_uppercase().replace('-', "_"),
            self.env_suffix()
        )
    }

    /// Current value rendered for an env file
    pub fn read(&self, config: &InstanceConfig) -> String {
        match self {
            ConfigField::MaxSize => config.max_size.to_string(),
            ConfigField::DefaultTtlMs => config.default_ttl_ms.unwrap_or(0).to_string(),
            ConfigField::CleanupIntervalMs => config.cleanup_interval_ms.to_string(),
            ConfigField::Enabled => config.enabled.to_string(),
        }
    }

    /// Parse `raw` and write it into `config`
    pub fn apply(&self, config: &mut InstanceConfig, raw: &str, key: &str) -> Result<()> {
        let raw = raw.trim();
        match self {
            ConfigField::MaxSize => config.max_size = parse_usize(raw, key)?,
            ConfigField::DefaultTtlMs => {
                let ttl = parse_u64(raw, key)?;
                config.default_ttl_ms = (ttl > 0).then_some(ttl);
            }
            ConfigField::CleanupIntervalMs => config.cleanup_interval_ms = parse_u64(raw, key)?,
            ConfigField::Enabled => config.enabled = parse_bool(raw, key)?,
        }
        Ok(())
    }

    /// Split `INSTANCE_FIELD` into instance name and field
    fn split(rest: &str) -> Option<(String, ConfigField)> {
        ConfigField::ALL.iter().find_map(|field| {
            let instance = rest.strip_suffix(field.env_suffix())?.strip_suffix('_')?;
            if instance.is_empty() {
                return None;
            }
            Some((instance.to_ascii_lowercase(), *field))
        })
    }
}

/// Apply `{PREFIX}_{INSTANCE}_{FIELD}` overrides for one instance
///
/// `lookup` resolves a variable name (normally `std::env::var`).
/// Returns `None` when no variable for this instance is set.
pub fn overrides_for<F>(prefix: &str, base: &InstanceConfig, lookup: F) -> Result<Option<InstanceConfig>>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = base.clone();
    let mut touched = false;

    for field in ConfigField::ALL {
        let key = field.env_key(prefix, &base.instance_type);
        if let Some(raw) = lookup(&key) {
            field.apply(&mut config, &raw, &key)?;
            touched = true;
        }
    }

    Ok(touched.then_some(config))
}

/// Env file formatter
#[derive(Debug, Clone)]
pub struct EnvFormatter {
    prefix: String,
}

impl Default for EnvFormatter {
    fn default() -> Self {
        Self::new(DEFAULT_ENV_PREFIX)
    }
}

impl EnvFormatter {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

impl ConfigFormatter for EnvFormatter {
    fn format(&self) -> ConfigFormat {
        ConfigFormat::Env
    }

    fn export(&self, configs: &ConfigSet, options: &ExportOptions) -> Result<String> {
        let mut out = if options.header {
            header_comment()
        } else {
            String::new()
        };

        for (name, config) in configs {
            for field in ConfigField::ALL {
                out.push_str(&field.env_key(&self.prefix, name));
                out.push('=');
                out.push_str(&field.read(config));
                out.push('\n');
            }
        }
        Ok(out)
    }

    fn import(&self, text: &str) -> Result<ConfigSet> {
        let mut set = ConfigSet::new();
        let prefix = format!("{}_", self.prefix);

        for (lineno, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let line = line.strip_prefix("export ").unwrap_or(line);

            let (key, value) = line.split_once('=').ok_or_else(|| {
                CacheError::configuration(format!("line {}: expected KEY=VALUE", lineno + 1))
            })?;
            let key = key.trim();
            let value = value.trim().trim_matches('"');

            let Some(rest) = key.strip_prefix(&prefix) else {
                continue;
            };
            let (instance, field) = ConfigField::split(rest).ok_or_else(|| {
                CacheError::configuration(format!("line {}: unknown config key '{}'", lineno + 1, key))
            })?;

            let config = set
                .entry(instance.clone())
                .or_insert_with(|| InstanceConfig::preset(&instance));
            field.apply(config, value, key)?;
        }

        Ok(set)
    }
}

/// Parse a u64 from string
fn parse_u64(s: &str, name: &str) -> Result<u64> {
    s.parse::<u64>().map_err(|e| {
        CacheError::configuration(format!(
            "Invalid {} '{}': must be a valid number. Error: {}",
            name, s, e
        ))
    })
}

/// Parse a usize from string
fn parse_usize(s: &str, name: &str) -> Result<usize> {
    s.parse::<usize>().map_err(|e| {
        CacheError::configuration(format!(
            "Invalid {} '{}': must be a valid number. Error: {}",
            name, s, e
        ))
    })
}

/// Parse a boolean from string
fn parse_bool(s: &str, name: &str) -> Result<bool> {
    match s.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(CacheError::configuration(format!(
            "Invalid {} '{}': must be 'true' or 'false'",
            name, s
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn sample() -> ConfigSet {
        let mut set = ConfigSet::new();
        set.insert("user".to_string(), InstanceConfig::user());
        set.insert(
            "blobs".to_string(),
            InstanceConfig::new("blobs").without_default_ttl().with_enabled(false),
        );
        set
    }

    #[test]
    fn test_every_format_preserves_configs() {
        for format in [ConfigFormat::Json, ConfigFormat::Yaml, ConfigFormat::Toml, ConfigFormat::Env] {
            let formatter = format.formatter();
            let text = formatter.export(&sample(), &ExportOptions::default()).unwrap();
            let back = formatter.import(&text).unwrap();
            assert_eq!(back, sample(), "format {}", format);
        }
    }

    #[test]
    fn test_partial_toml_uses_presets() {
        let text = r#"
[instances.session]
max_size = 42
"#;
        let set = TomlFormatter.import(text).unwrap();
        let session = &set["session"];
        assert_eq!(session.max_size, 42);
        assert_eq!(session.default_ttl_ms, InstanceConfig::session().default_ttl_ms);
    }

    #[test]
    fn test_env_import_ignores_foreign_keys() {
        let text = "# comment\nPATH=/usr/bin\nexport CACHE_API_MAX_SIZE=10\nCACHE_API_ENABLED=off\n";
        let set = EnvFormatter::default().import(text).unwrap();
        assert_eq!(set.len(), 1);
        assert_eq!(set["api"].max_size, 10);
        assert!(!set["api"].enabled);
    }

    #[test]
    fn test_env_import_rejects_unknown_field() {
        let err = EnvFormatter::default().import("CACHE_API_COLOR=blue").unwrap_err();
        assert!(err.to_string().contains("CACHE_API_COLOR"));
    }

    #[test]
    fn test_instance_names_with_underscores() {
        let (instance, field) = ConfigField::split("USER_PROFILE_CLEANUP_INTERVAL_MS").unwrap();
        assert_eq!(instance, "user_profile");
        assert_eq!(field, ConfigField::CleanupIntervalMs);
    }

    #[test]
    fn test_overrides_for() {
        let env: HashMap<String, String> = [
            ("APP_USER_MAX_SIZE".to_string(), "5".to_string()),
            ("APP_USER_DEFAULT_TTL_MS".to_string(), "0".to_string()),
        ]
        .into_iter()
        .collect();

        let updated = overrides_for("APP", &InstanceConfig::user(), |k| env.get(k).cloned())
            .unwrap()
            .unwrap();
        assert_eq!(updated.max_size, 5);
        assert_eq!(updated.default_ttl_ms, None);

        let untouched = overrides_for("APP", &InstanceConfig::api(), |k| env.get(k).cloned()).unwrap();
        assert!(untouched.is_none());

        let bad: HashMap<String, String> =
            [("APP_USER_ENABLED".to_string(), "maybe".to_string())].into_iter().collect();
        assert!(overrides_for("APP", &InstanceConfig::user(), |k| bad.get(k).cloned()).is_err());
    }

    #[test]
    fn test_format_from_path() {
        assert_eq!(ConfigFormat::from_path(Path::new("a/cache.yml")), Some(ConfigFormat::Yaml));
        assert_eq!(ConfigFormat::from_path(Path::new("cache.TOML")), Some(ConfigFormat::Toml));
        assert_eq!(ConfigFormat::from_path(Path::new("cache")), None);
        assert!("xml".parse::<ConfigFormat>().is_err());
    }
}
