//! 查询目录：工站名单、时间预设和默认数据表
//!
//! 目录是部署级的不可变配置，编译器只读取它，从不修改。

use serde::{Deserialize, Serialize};

/// 工站定义，结果列名为 `<KEY>Result`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StationDef {
    pub key: String,
    pub label: String,
}

impl StationDef {
    pub fn new(key: &str, label: &str) -> Self {
        Self {
            key: key.to_string(),
            label: label.to_string(),
        }
    }

    pub fn result_column(&self) -> String {
        format!("{}Result", self.key)
    }
}

/// 快照规则
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Snapshot {
    /// 当天零点到现在
    Today,
}

/// 预设的时间窗口：相对现在的偏移，或者一个快照规则
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PresetWindow {
    Offset { offset_minutes: i64 },
    Snapshot { snapshot: Snapshot },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangePreset {
    pub key: String,
    pub label: String,
    #[serde(flatten)]
    pub window: PresetWindow,
}

impl RangePreset {
    pub fn offset(key: &str, label: &str, offset_minutes: i64) -> Self {
        Self {
            key: key.to_string(),
            label: label.to_string(),
            window: PresetWindow::Offset { offset_minutes },
        }
    }

    pub fn snapshot(key: &str, label: &str, snapshot: Snapshot) -> Self {
        Self {
            key: key.to_string(),
            label: label.to_string(),
            window: PresetWindow::Snapshot { snapshot },
        }
    }
}

/// 编译器依赖的全部静态数据
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryCatalog {
    /// 默认 schema，为空时只用表名
    pub schema: String,
    pub table: String,
    pub stations: Vec<StationDef>,
    pub presets: Vec<RangePreset>,
}

impl Default for QueryCatalog {
    fn default() -> Self {
        Self {
            schema: "dbo".to_string(),
            table: "TS70_246K".to_string(),
            stations: default_stations(),
            presets: default_presets(),
        }
    }
}

impl QueryCatalog {
    /// 按规范化后的键（去空白、大写）查找工站
    pub fn station(&self, key: &str) -> Option<&StationDef> {
        let key = key.trim();
        self.stations
            .iter()
            .find(|station| station.key.eq_ignore_ascii_case(key))
    }

    /// 按键精确查找时间预设
    pub fn preset(&self, key: &str) -> Option<&RangePreset> {
        self.presets.iter().find(|preset| preset.key == key)
    }
}

fn default_stations() -> Vec<StationDef> {
    vec![
        StationDef::new("OP10", "OP10 · 预检"),
        StationDef::new("OP20", "OP20 · 回流"),
        StationDef::new("OP30", "OP30 · 功能"),
        StationDef::new("OP35", "OP35 · 稳定"),
        StationDef::new("OP40", "OP40 · 烧录"),
        StationDef::new("OP50", "OP50 · 老化"),
        StationDef::new("OP60", "OP60 · 终检"),
        StationDef::new("OP65", "OP65 · 包装"),
        StationDef::new("OP70", "OP70 · 跑分"),
    ]
}

fn default_presets() -> Vec<RangePreset> {
    vec![
        RangePreset::offset("LAST_HOUR", "最近 1 小时", 60),
        RangePreset::offset("LAST_6_HOURS", "最近 6 小时", 360),
        RangePreset::offset("LAST_24_HOURS", "最近 24 小时", 1440),
        RangePreset::offset("LAST_3_DAYS", "最近 3 天", 4320),
        // 浏览器端使用的键
        RangePreset::offset("LAST_72_HOURS", "最近 72 小时", 4320),
        RangePreset::snapshot("TODAY", "当天", Snapshot::Today),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_station_lookup_is_normalized() {
        let catalog = QueryCatalog::default();
        assert_eq!(catalog.station(" op35 ").map(|s| s.key.as_str()), Some("OP35"));
        assert!(catalog.station("OP99").is_none());
        assert!(catalog.station("").is_none());
    }

    #[test]
    fn test_preset_lookup_is_exact() {
        let catalog = QueryCatalog::default();
        assert!(catalog.preset("TODAY").is_some());
        assert!(catalog.preset("today").is_none());
    }

    #[test]
    fn test_result_column() {
        assert_eq!(StationDef::new("OP10", "x").result_column(), "OP10Result");
    }

    #[test]
    fn test_preset_window_json_shape() {
        let offset: RangePreset =
            serde_json::from_str(r#"{"key":"K","label":"L","offset_minutes":15}"#).unwrap();
        assert_eq!(offset.window, PresetWindow::Offset { offset_minutes: 15 });

        let today: RangePreset =
            serde_json::from_str(r#"{"key":"T","label":"L","snapshot":"today"}"#).unwrap();
        assert_eq!(today.window, PresetWindow::Snapshot { snapshot: Snapshot::Today });

        let value = serde_json::to_value(&today).unwrap();
        assert_eq!(value["snapshot"], "today");
    }
}
