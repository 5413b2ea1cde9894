//! Condition kinds, notices and decoded values.
//!
//! A [`ConditionNotice`] is what a condition source delivers: a key plus a
//! raw [`NotificationValue`]. The registry decodes it into a
//! [`ConditionEvent`] before handing it to an application callback.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::AgentError;

/// System condition an application can observe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionKind {
    LowMemory,
    LowBattery,
    LanguageChanged,
    RegionChanged,
    SuspendedStateChanged,
}

impl ConditionKind {
    /// Every kind, in registry-table order.
    pub const ALL: [ConditionKind; 5] = [
        ConditionKind::LowMemory,
        ConditionKind::LowBattery,
        ConditionKind::LanguageChanged,
        ConditionKind::RegionChanged,
        ConditionKind::SuspendedStateChanged,
    ];

    /// Position in the registry table.
    pub fn index(self) -> usize {
        match self {
            ConditionKind::LowMemory => 0,
            ConditionKind::LowBattery => 1,
            ConditionKind::LanguageChanged => 2,
            ConditionKind::RegionChanged => 3,
            ConditionKind::SuspendedStateChanged => 4,
        }
    }

    /// Key watched on the condition source. Internally fed kinds have none.
    pub fn external_key(self) -> Option<&'static str> {
        match self {
            ConditionKind::LowMemory => Some("memory/sysman/low_memory"),
            ConditionKind::LowBattery => Some("memory/sysman/battery_status_low"),
            ConditionKind::LanguageChanged => Some("db/menu_widget/language"),
            ConditionKind::RegionChanged => Some("db/menu_widget/regionformat"),
            ConditionKind::SuspendedStateChanged => None,
        }
    }

    /// Stable name used by `set_callback_by_name` and in logs.
    pub fn as_str(self) -> &'static str {
        match self {
            ConditionKind::LowMemory => "low_memory",
            ConditionKind::LowBattery => "low_battery",
            ConditionKind::LanguageChanged => "language_changed",
            ConditionKind::RegionChanged => "region_changed",
            ConditionKind::SuspendedStateChanged => "suspended_state_changed",
        }
    }

    /// Find the kind watching `key`.
    pub fn from_external_key(key: &str) -> Option<ConditionKind> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.external_key() == Some(key))
    }
}

impl fmt::Display for ConditionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<i32> for ConditionKind {
    type Error = AgentError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        usize::try_from(value)
            .ok()
            .and_then(|i| Self::ALL.get(i).copied())
            .ok_or_else(|| AgentError::UnknownEvent(value.to_string()))
    }
}

impl FromStr for ConditionKind {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| AgentError::UnknownEvent(s.to_string()))
    }
}

/// Raw value carried by a condition notice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationValue {
    Int(i32),
    Text(String),
}

impl NotificationValue {
    pub fn as_int(&self) -> Option<i32> {
        match self {
            NotificationValue::Int(v) => Some(*v),
            NotificationValue::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            NotificationValue::Text(v) => Some(v),
            NotificationValue::Int(_) => None,
        }
    }
}

/// Change notification delivered by a condition source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionNotice {
    pub key: String,
    pub value: NotificationValue,
}

impl ConditionNotice {
    pub fn new(key: impl Into<String>, value: NotificationValue) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }
}

/// Memory pressure level reported under the low-memory key.
///
/// Keeps the raw level so levels between or above the named ones reach
/// callbacks unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemoryPressure(i32);

impl MemoryPressure {
    pub const NORMAL: MemoryPressure = MemoryPressure(1);
    pub const SOFT_WARNING: MemoryPressure = MemoryPressure(2);
    pub const HARD_WARNING: MemoryPressure = MemoryPressure(4);

    /// Decode a raw value. Non-positive values are malformed.
    pub fn from_raw(raw: i32) -> Option<Self> {
        (raw > 0).then_some(MemoryPressure(raw))
    }

    pub fn raw(self) -> i32 {
        self.0
    }

    /// Whether applications should hear about this level.
    pub fn should_notify(self) -> bool {
        self >= MemoryPressure::SOFT_WARNING
    }
}

/// Battery levels reported under the low-battery key. Lower is worse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BatteryLevel {
    PowerOff = 1,
    CriticalLow = 2,
    Warning = 3,
    Normal = 4,
    Full = 5,
}

impl BatteryLevel {
    pub fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            1 => Some(BatteryLevel::PowerOff),
            2 => Some(BatteryLevel::CriticalLow),
            3 => Some(BatteryLevel::Warning),
            4 => Some(BatteryLevel::Normal),
            5 => Some(BatteryLevel::Full),
            _ => None,
        }
    }

    /// Whether applications should hear about this level.
    pub fn should_notify(self) -> bool {
        self <= BatteryLevel::CriticalLow
    }
}

/// Suspend transition reported through `SuspendedStateChanged`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuspendedState {
    WillEnterSuspend,
    DidExitFromSuspend,
}

/// Decoded value handed to application callbacks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConditionValue {
    LowMemory(MemoryPressure),
    LowBattery(BatteryLevel),
    Language(String),
    Region(String),
    Suspended(SuspendedState),
}

/// Event handed to a condition callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConditionEvent {
    pub kind: ConditionKind,
    pub value: ConditionValue,
}

impl ConditionEvent {
    /// Decode a raw notice value for `kind`.
    ///
    /// Returns `None` for malformed values, for suspend kinds (which are never
    /// read from a source) and for levels below the forwarding threshold.
    pub fn decode(kind: ConditionKind, value: &NotificationValue) -> Option<Self> {
        let decoded = match kind {
            ConditionKind::LowMemory => {
                let level = MemoryPressure::from_raw(value.as_int()?)?;
                if !level.should_notify() {
                    return None;
                }
                ConditionValue::LowMemory(level)
            }
            ConditionKind::LowBattery => {
                let level = BatteryLevel::from_raw(value.as_int()?)?;
                if !level.should_notify() {
                    return None;
                }
                ConditionValue::LowBattery(level)
            }
            ConditionKind::LanguageChanged => ConditionValue::Language(value.as_text()?.to_string()),
            ConditionKind::RegionChanged => ConditionValue::Region(value.as_text()?.to_string()),
            ConditionKind::SuspendedStateChanged => return None,
        };
        Some(Self {
            kind,
            value: decoded,
        })
    }
}
