//! 配置模块，按 默认值 → 配置文件 → 环境变量 的顺序合并
//!
//! 配置文件路径由 `EXPLORER_CONFIG` 指定，支持 TOML 与 JSON；
//! 环境变量使用 `EXPLORER_` 前缀，`__` 表示嵌套，例如 `EXPLORER_DATABASE__HOST`。

use crate::catalog::{PresetWindow, QueryCatalog};
use figment::{
    providers::{Env, Format, Json, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const ENV_PREFIX: &str = "EXPLORER_";
pub const CONFIG_PATH_ENV: &str = "EXPLORER_CONFIG";

/// 一年的分钟数，预设偏移的上限
const MAX_OFFSET_MINUTES: i64 = 366 * 24 * 60;

/// 配置错误
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("配置文件不存在: {0}")]
    MissingFile(PathBuf),

    #[error("无法加载配置: {0}")]
    Load(String),

    #[error("配置值无效: {0}")]
    InvalidValue(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// 外部进程推送的看板数据写入此文件
    pub dashboard_data_file: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            dashboard_data_file: PathBuf::from("public/production-dashboard-data.json"),
        }
    }
}

/// SQL Server 连接与连接池配置
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    /// 数据库名
    pub name: String,
    pub encrypt: bool,
    pub trust_cert: bool,
    pub pool_max: u32,
    pub pool_min: u32,
    pub idle_timeout_ms: u64,
    pub connect_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 1433,
            user: String::new(),
            password: String::new(),
            name: "TS70_246K".to_string(),
            encrypt: false,
            trust_cert: true,
            pool_max: 10,
            pool_min: 0,
            idle_timeout_ms: 30_000,
            connect_timeout_ms: 15_000,
        }
    }
}

// 密码不进日志
impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"***")
            .field("name", &self.name)
            .field("encrypt", &self.encrypt)
            .field("trust_cert", &self.trust_cert)
            .field("pool_max", &self.pool_max)
            .field("pool_min", &self.pool_min)
            .field("idle_timeout_ms", &self.idle_timeout_ms)
            .field("connect_timeout_ms", &self.connect_timeout_ms)
            .finish()
    }
}

/// 日志配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// "json" 或 "text"
    pub format: String,
    /// 未设置 RUST_LOG 时的默认级别
    pub default_level: String,
    /// 依赖库的日志过滤
    pub dependency_filter: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: "text".to_string(),
            default_level: "info".to_string(),
            dependency_filter: Some("hyper=warn,tower=info,tiberius=warn,mio=warn".to_string()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub query: QueryCatalog,
    pub logging: LoggingConfig,
}

impl Config {
    /// 加载 .env、配置文件和环境变量，并校验结果
    pub fn load() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();

        let mut figment = Figment::new().merge(Serialized::defaults(Config::default()));
        if let Some(path) = std::env::var_os(CONFIG_PATH_ENV) {
            figment = merge_file(figment, Path::new(&path))?;
        }
        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

        Self::from_figment(figment)
    }

    /// 从已经组装好的 figment 中提取并校验配置
    pub fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        let config: Config = figment
            .extract()
            .map_err(|e| ConfigError::Load(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.query.table.trim().is_empty() {
            return Err(ConfigError::InvalidValue("query.table 不能为空".to_string()));
        }
        if self.query.stations.is_empty() {
            return Err(ConfigError::InvalidValue("query.stations 不能为空".to_string()));
        }

        let mut station_keys = HashSet::new();
        for station in &self.query.stations {
            let valid = !station.key.is_empty()
                && station
                    .key
                    .chars()
                    .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_');
            if !valid {
                return Err(ConfigError::InvalidValue(format!(
                    "工站键必须由大写字母、数字或下划线组成: {:?}",
                    station.key
                )));
            }
            if !station_keys.insert(station.key.as_str()) {
                return Err(ConfigError::InvalidValue(format!("工站键重复: {}", station.key)));
            }
        }

        let mut preset_keys = HashSet::new();
        for preset in &self.query.presets {
            if !preset_keys.insert(preset.key.as_str()) {
                return Err(ConfigError::InvalidValue(format!("预设键重复: {}", preset.key)));
            }
            if let PresetWindow::Offset { offset_minutes } = preset.window {
                if !(0..=MAX_OFFSET_MINUTES).contains(&offset_minutes) {
                    return Err(ConfigError::InvalidValue(format!(
                        "预设 {} 的偏移超出范围: {}",
                        preset.key, offset_minutes
                    )));
                }
            }
        }

        if self.database.pool_max == 0 {
            return Err(ConfigError::InvalidValue("database.pool_max 必须大于 0".to_string()));
        }
        if self.database.pool_min > self.database.pool_max {
            return Err(ConfigError::InvalidValue(
                "database.pool_min 不能大于 database.pool_max".to_string(),
            ));
        }

        Ok(())
    }
}

/// 按扩展名合并配置文件，`.json` 用 JSON，其余按 TOML 解析
fn merge_file(figment: Figment, path: &Path) -> Result<Figment, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::MissingFile(path.to_path_buf()));
    }
    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    Ok(if is_json {
        figment.merge(Json::file(path))
    } else {
        figment.merge(Toml::file(path))
    })
}
