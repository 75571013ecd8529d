//! # Configuration Module
//!
//! 缓存实例配置的注册、校验、持久化和转换。
//!
//! ## 模块
//!
//! - `registry`: 实例注册表，配置变更与数据迁移
//! - `validation`: 可插拔的校验规则
//! - `source`: 配置持久化边界
//! - `formats`: JSON / YAML / TOML / env 转换与环境变量覆盖
//! - `reload`: 配置文件热加载 (防抖)
//!
//! ## 配置优先级
//!
//! 1. 环境变量 `{PREFIX}_{INSTANCE}_{FIELD}` (最高)
//! 2. 配置文件 / 配置源
//! 3. 实例预设 (`InstanceConfig::preset`)

pub mod formats;
pub mod registry;
pub mod reload;
pub mod source;
pub mod validation;

pub use formats::{
    ConfigField, ConfigFormat, ConfigFormatter, ConfigSet, EnvFormatter, ExportOptions,
    JsonFormatter, TomlFormatter, YamlFormatter, DEFAULT_ENV_PREFIX,
};
pub use registry::{ApplyReport, ConfigBackup, ConfigRegistry, InstanceHandle};
pub use reload::{ConfigFileLoader, ConfigReloader, FormattedFileLoader};
pub use source::{ConfigSource, MemoryConfigSource};
pub use validation::{
    RuleCategory, RuleOutcome, RuleSeverity, ValidationContext, ValidationIssue, ValidationReport,
    ValidationRule, Validator,
};
