//! 查询请求的数据结构
//!
//! 浏览器提交的筛选条件以 JSON 形式到达，字段名使用 camelCase：
//!
//! ```json
//! {
//!   "rangeKey": "LAST_HOUR",
//!   "stationFilters": [{ "key": "OP10", "statuses": ["OK", "NG"] }],
//!   "sn": "ABC",
//!   "limit": 100
//! }
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// 一次搜索请求的全部筛选条件，每次请求构造一次后即丢弃
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FilterRequest {
    /// 预设时间范围的键，例如 `LAST_HOUR`
    pub range_key: Option<String>,
    /// 显式开始时间（包含），优先于预设
    pub start_time: Option<DateTime<Utc>>,
    /// 显式结束时间（包含），优先于预设
    pub stop_time: Option<DateTime<Utc>>,
    pub station_filters: Vec<StationFilter>,
    /// 序列号子串
    pub sn: Option<String>,
    /// 工单名子串
    pub order_name: Option<String>,
    /// 请求的最大行数，编译时会被钳制
    #[serde(deserialize_with = "deserialize_limit")]
    pub limit: Option<i64>,
    pub table_schema: Option<String>,
    pub table_name: Option<String>,
}

/// 单个工站的状态筛选, 例如：`{ "key": "OP10", "statuses": ["OK"] }`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StationFilter {
    pub key: Option<String>,
    pub statuses: Vec<String>,
    /// 旧版前端只发送单个状态
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

impl StationFilter {
    pub fn new<K, I, S>(key: K, statuses: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            key: Some(key.into()),
            statuses: statuses.into_iter().map(Into::into).collect(),
            status: None,
        }
    }

    /// 按提交顺序返回所有状态标记，旧版的单个 `status` 排在最后
    pub fn status_tokens(&self) -> impl Iterator<Item = &str> {
        self.statuses
            .iter()
            .map(String::as_str)
            .chain(self.status.as_deref())
    }
}

/// 工站状态，数据库中以整数存储
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StationStatus {
    Ok,
    Ng,
}

impl StationStatus {
    /// 解析状态标记，大小写不敏感；无法识别时返回 None
    pub fn parse(token: &str) -> Option<Self> {
        match token.trim().to_ascii_uppercase().as_str() {
            "OK" => Some(StationStatus::Ok),
            "NG" => Some(StationStatus::Ng),
            _ => None,
        }
    }

    /// `<STATION>Result` 列中的取值
    pub fn code(self) -> i32 {
        match self {
            StationStatus::Ok => 1,
            StationStatus::Ng => 0,
        }
    }
}

fn deserialize_limit<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(limit_from_value))
}

/// 宽松地解析 limit：整数、小数（截断）和数字字符串都接受，其余视为未提供
fn limit_from_value(value: &Value) -> Option<i64> {
    let truncate = |f: f64| f.is_finite().then(|| f as i64);
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().and_then(truncate)),
        Value::String(s) => s.trim().parse::<f64>().ok().and_then(truncate),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_deserialize_full_request() {
        let json = r#"{
            "rangeKey": "LAST_HOUR",
            "startTime": "2024-01-01T11:00:00.000Z",
            "stationFilters": [{ "key": "OP10", "statuses": ["OK", "NG"] }],
            "sn": "ABC",
            "orderName": "WO-1",
            "limit": 50,
            "tableSchema": "prod",
            "tableName": "Results"
        }"#;
        let request: FilterRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.range_key.as_deref(), Some("LAST_HOUR"));
        assert_eq!(
            request.start_time,
            Some(Utc.with_ymd_and_hms(2024, 1, 1, 11, 0, 0).unwrap())
        );
        assert_eq!(request.stop_time, None);
        assert_eq!(request.station_filters, vec![StationFilter::new("OP10", ["OK", "NG"])]);
        assert_eq!(request.order_name.as_deref(), Some("WO-1"));
        assert_eq!(request.limit, Some(50));
        assert_eq!(request.table_schema.as_deref(), Some("prod"));
    }

    #[test]
    fn test_empty_body_is_default() {
        let request: FilterRequest = serde_json::from_str("{}").unwrap();
        assert_eq!(request, FilterRequest::default());
    }

    #[test]
    fn test_lenient_limit() {
        let parse = |raw: &str| {
            serde_json::from_str::<FilterRequest>(&format!(r#"{{"limit": {}}}"#, raw))
                .unwrap()
                .limit
        };
        assert_eq!(parse("-5"), Some(-5));
        assert_eq!(parse("50.9"), Some(50));
        assert_eq!(parse(r#"" 25 ""#), Some(25));
        assert_eq!(parse(r#""many""#), None);
        assert_eq!(parse("null"), None);
        assert_eq!(parse("[1]"), None);
    }

    #[test]
    fn test_legacy_single_status() {
        let filter: StationFilter =
            serde_json::from_str(r#"{"key": "OP20", "status": "ng"}"#).unwrap();
        let tokens: Vec<_> = filter.status_tokens().collect();
        assert_eq!(tokens, vec!["ng"]);
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(StationStatus::parse(" ok "), Some(StationStatus::Ok));
        assert_eq!(StationStatus::parse("NG"), Some(StationStatus::Ng));
        assert_eq!(StationStatus::parse("PASS"), None);
        assert_eq!(StationStatus::Ok.code(), 1);
        assert_eq!(StationStatus::Ng.code(), 0);
    }
}
