//! 服务端变量保护
//!
//! 导入前读取一组全局变量的当前值，按策略改成适合批量导入的值，
//! 导入结束后恢复原值。[`SettingsGuard`] 在 drop 时会兜底恢复，
//! 因此无论导入成功、部分失败还是提前返回，恢复都只执行一次。

use crate::client::DatabaseClient;
use crate::config::LoadConfig;
use crate::error::{LoadError, Result};
use lazy_static::lazy_static;
use regex::Regex;
use std::fmt;

lazy_static! {
    static ref FLUSH_LOG_RE: Regex =
        Regex::new(r"(?m)innodb_flush_log_at_trx_commit\t(.*)$").unwrap();
}

/// 导入期间可能被修改的变量
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GuardedSetting {
    ForeignKeyChecks,
    UniqueChecks,
    Autocommit,
    FlushLogAtTrxCommit,
}

impl GuardedSetting {
    pub const ALL: [GuardedSetting; 4] = [
        GuardedSetting::ForeignKeyChecks,
        GuardedSetting::UniqueChecks,
        GuardedSetting::Autocommit,
        GuardedSetting::FlushLogAtTrxCommit,
    ];

    /// 服务端变量名
    pub fn name(self) -> &'static str {
        match self {
            GuardedSetting::ForeignKeyChecks => "foreign_key_checks",
            GuardedSetting::UniqueChecks => "unique_checks",
            GuardedSetting::Autocommit => "autocommit",
            GuardedSetting::FlushLogAtTrxCommit => "innodb_flush_log_at_trx_commit",
        }
    }

    /// 适合批量导入的值
    pub fn optimized(self) -> SettingValue {
        match self {
            GuardedSetting::ForeignKeyChecks | GuardedSetting::UniqueChecks => {
                SettingValue::Switch(false)
            }
            GuardedSetting::Autocommit => SettingValue::Switch(true),
            GuardedSetting::FlushLogAtTrxCommit => SettingValue::Level(0),
        }
    }

    /// 当前值是否需要改成 [`optimized`](Self::optimized)
    ///
    /// innodb_flush_log_at_trx_commit 只在为 1 时调整，2 等其它取值保持不动。
    pub fn needs_change(self, current: SettingValue) -> bool {
        match self {
            GuardedSetting::FlushLogAtTrxCommit => current == SettingValue::Level(1),
            _ => current != self.optimized(),
        }
    }
}

/// 变量值
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingValue {
    Switch(bool),
    Level(i64),
}

impl fmt::Display for SettingValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettingValue::Switch(true) => write!(f, "ON"),
            SettingValue::Switch(false) => write!(f, "OFF"),
            SettingValue::Level(v) => write!(f, "{v}"),
        }
    }
}

/// 哪些变量允许修改
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettingsPolicy {
    /// 关闭 foreign_key_checks
    pub disable_foreign_key_checks: bool,
    /// 打开 autocommit
    pub enable_autocommit: bool,
    /// 关闭 unique_checks，innodb_flush_log_at_trx_commit 设为 0
    pub fast_mode: bool,
}

impl SettingsPolicy {
    pub fn allows(&self, setting: GuardedSetting) -> bool {
        match setting {
            GuardedSetting::ForeignKeyChecks => self.disable_foreign_key_checks,
            GuardedSetting::Autocommit => self.enable_autocommit,
            GuardedSetting::UniqueChecks | GuardedSetting::FlushLogAtTrxCommit => {
                self.fast_mode
            }
        }
    }
}

impl Default for SettingsPolicy {
    fn default() -> Self {
        Self { disable_foreign_key_checks: true, enable_autocommit: true, fast_mode: true }
    }
}

impl From<&LoadConfig> for SettingsPolicy {
    fn from(load: &LoadConfig) -> Self {
        Self {
            disable_foreign_key_checks: load.disable_foreign_key_checks,
            enable_autocommit: load.enable_autocommit,
            fast_mode: load.fast_mode,
        }
    }
}

/// 一次修改：原值与导入期间的值
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettingChange {
    pub setting: GuardedSetting,
    pub original: SettingValue,
    pub applied: SettingValue,
}

/// 读取变量当前值
///
/// 客户端输出不是结构化的，开关类变量按子串判断：
/// autocommit 输出中含有 "OFF" 视为关闭，其它变量含有 "ON" 视为打开。
pub fn read_setting<C: DatabaseClient + ?Sized>(
    client: &C,
    setting: GuardedSetting,
) -> Result<SettingValue> {
    let output = client.query_text(&show_variable_sql(setting.name()))?;
    let value = match setting {
        GuardedSetting::Autocommit => SettingValue::Switch(!output.contains("OFF")),
        GuardedSetting::ForeignKeyChecks | GuardedSetting::UniqueChecks => {
            SettingValue::Switch(output.contains("ON"))
        }
        GuardedSetting::FlushLogAtTrxCommit => {
            SettingValue::Level(parse_flush_log_level(&output)?)
        }
    };
    #[cfg(feature = "logging")]
    tracing::debug!("当前 {} 设置: {}", setting.name(), value);
    Ok(value)
}

fn parse_flush_log_level(output: &str) -> Result<i64> {
    let name = GuardedSetting::FlushLogAtTrxCommit.name();
    let raw = FLUSH_LOG_RE
        .captures(output)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim())
        .ok_or_else(|| {
            LoadError::setting(
                name,
                format!("SHOW VARIABLES 结果中没有该变量:\n{output}"),
            )
        })?;
    raw.parse::<i64>()
        .map_err(|e| LoadError::setting(name, format!("无法解析取值 `{raw}`: {e}")))
}

fn show_variable_sql(name: &str) -> String {
    format!("SHOW VARIABLES LIKE '{name}'")
}

fn set_global<C: DatabaseClient + ?Sized>(
    client: &C,
    setting: GuardedSetting,
    value: SettingValue,
) -> Result<()> {
    client.query_text(&format!("SET GLOBAL {} = {}", setting.name(), value))?;
    Ok(())
}

/// 开关类变量是否为 ON
pub fn is_switch_on<C: DatabaseClient + ?Sized>(client: &C, name: &str) -> Result<bool> {
    Ok(client.query_text(&show_variable_sql(name))?.contains("ON"))
}

/// 导入期间最好关闭的变量
pub const RISKY_SETTINGS: [(&str, &str); 3] = [
    ("polar_log_bin", "binlog"),
    ("log_bin", "binlog"),
    ("polar_enable_imci", "列存索引"),
];

/// 检查 binlog、列存索引等会拖慢导入的变量，打开的逐个告警
///
/// 返回处于打开状态的变量名。
pub fn check_risky_settings<C: DatabaseClient + ?Sized>(client: &C) -> Result<Vec<&'static str>> {
    let mut enabled = Vec::new();
    for (name, what) in RISKY_SETTINGS {
        if is_switch_on(client, name)? {
            #[cfg(feature = "logging")]
            tracing::warn!("{} ({}) 处于 ON 状态，建议导入期间关闭", what, name);
            #[cfg(not(feature = "logging"))]
            let _ = what;
            enabled.push(name);
        }
    }
    Ok(enabled)
}

/// 变量保护
///
/// `apply` 读取并修改变量，`restore` 恢复原值。每个修改只恢复一次，
/// 之后再调用 `restore` 不会再下发任何语句。
pub struct SettingsGuard<'a, C: DatabaseClient + ?Sized> {
    client: &'a C,
    pending: Vec<SettingChange>,
    applied: Vec<SettingChange>,
}

impl<'a, C: DatabaseClient + ?Sized> SettingsGuard<'a, C> {
    /// 读取所有变量后再统一修改
    ///
    /// 任何一个变量读取失败都会直接返回错误，此时服务端没有被修改。
    /// 修改途中失败时，已经修改的变量会先被恢复。
    pub fn apply(client: &'a C, policy: SettingsPolicy) -> Result<Self> {
        let mut snapshot = Vec::with_capacity(GuardedSetting::ALL.len());
        for setting in GuardedSetting::ALL {
            snapshot.push((setting, read_setting(client, setting)?));
        }

        let mut guard = Self { client, pending: Vec::new(), applied: Vec::new() };
        for (setting, original) in snapshot {
            let optimized = setting.optimized();
            if !policy.allows(setting) || !setting.needs_change(original) {
                continue;
            }
            #[cfg(feature = "logging")]
            tracing::info!(
                "{} 当前为 {}，导入期间设置为 {}，结束后恢复",
                setting.name(),
                original,
                optimized
            );
            if let Err(e) = set_global(client, setting, optimized) {
                if let Err(restore_err) = guard.restore() {
                    #[cfg(feature = "logging")]
                    tracing::error!("回滚已修改的变量失败: {}", restore_err);
                    #[cfg(not(feature = "logging"))]
                    let _ = restore_err;
                }
                return Err(e);
            }
            let change = SettingChange { setting, original, applied: optimized };
            guard.pending.push(change);
            guard.applied.push(change);
        }
        Ok(guard)
    }

    /// 导入期间做过的修改
    pub fn changes(&self) -> &[SettingChange] {
        &self.applied
    }

    /// 是否还有没恢复的变量
    pub fn is_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// 按修改的逆序恢复
    ///
    /// 某个变量恢复失败时继续恢复其余变量，返回第一个错误。
    pub fn restore(&mut self) -> Result<()> {
        let mut first_err = None;
        while let Some(change) = self.pending.pop() {
            #[cfg(feature = "logging")]
            tracing::info!(
                "恢复 {} 为 {}",
                change.setting.name(),
                change.original
            );
            if let Err(e) = set_global(self.client, change.setting, change.original) {
                #[cfg(feature = "logging")]
                tracing::error!("恢复 {} 失败: {}", change.setting.name(), e);
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl<C: DatabaseClient + ?Sized> Drop for SettingsGuard<'_, C> {
    fn drop(&mut self) {
        if self.is_pending() {
            if let Err(e) = self.restore() {
                #[cfg(feature = "logging")]
                tracing::error!("恢复服务端变量失败: {}", e);
                #[cfg(not(feature = "logging"))]
                let _ = e;
            }
        }
    }
}
