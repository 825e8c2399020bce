//! 时间范围规范化：把预设键转换为具体的开始/结束时间

use crate::catalog::{PresetWindow, QueryCatalog, Snapshot};
use chrono::{DateTime, NaiveTime, TimeDelta, TimeZone, Utc};

// 时区跳变都落在 15 分钟的整数倍上，向后最多扫描一天
const MIDNIGHT_SCAN_STEP_MINUTES: i64 = 15;
const MIDNIGHT_SCAN_STEPS: i64 = 24 * 60 / MIDNIGHT_SCAN_STEP_MINUTES;

/// 规范化后的时间边界，两端都可能缺省
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RangeBounds {
    pub start_time: Option<DateTime<Utc>>,
    pub stop_time: Option<DateTime<Utc>>,
}

/// 根据预设键计算时间边界。
///
/// `now` 由调用方注入，函数本身不读取系统时钟。未知的键不是错误，
/// 直接返回两端都缺省的边界。
pub fn normalize_range<Tz: TimeZone>(
    catalog: &QueryCatalog,
    range_key: Option<&str>,
    now: &DateTime<Tz>,
) -> RangeBounds {
    let Some(preset) = range_key.and_then(|key| catalog.preset(key)) else {
        return RangeBounds::default();
    };

    let stop = now.with_timezone(&Utc);
    let start = match preset.window {
        PresetWindow::Offset { offset_minutes } => TimeDelta::try_minutes(offset_minutes)
            .and_then(|offset| stop.checked_sub_signed(offset))
            .unwrap_or(DateTime::<Utc>::MIN_UTC),
        PresetWindow::Snapshot { snapshot: Snapshot::Today } => local_midnight(now),
    };

    RangeBounds {
        start_time: Some(start),
        stop_time: Some(stop),
    }
}

/// `now` 所在时区中当天的零点。
///
/// 零点落在夏令时跳变的空档里时，取当天第一个存在的本地时刻。
fn local_midnight<Tz: TimeZone>(now: &DateTime<Tz>) -> DateTime<Utc> {
    let midnight = now.date_naive().and_time(NaiveTime::MIN);
    let tz = now.timezone();
    (0..=MIDNIGHT_SCAN_STEPS)
        .map(|step| midnight + TimeDelta::minutes(step * MIDNIGHT_SCAN_STEP_MINUTES))
        .find_map(|local| tz.from_local_datetime(&local).earliest())
        .map(|local| local.with_timezone(&Utc))
        .unwrap_or_else(|| now.with_timezone(&Utc))
}
