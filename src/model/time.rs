use chrono::{DateTime, FixedOffset, NaiveDateTime, Offset, Utc};
use serde::{Deserialize, Serialize};

/// The vault's fixed offset from UTC, in minutes. Due dates are naive and are
/// compared against "now" shifted by this offset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub struct TzOffset(i32);

impl TzOffset {
    /// Real-world offsets stay within ±18 hours
    pub const MAX_MINUTES: i32 = 18 * 60;

    pub fn from_minutes(minutes: i32) -> Option<TzOffset> {
        (minutes.abs() <= Self::MAX_MINUTES).then_some(TzOffset(minutes))
    }

    pub fn minutes(self) -> i32 {
        self.0
    }

    pub fn fixed(self) -> FixedOffset {
        FixedOffset::east_opt(self.0 * 60).unwrap_or_else(|| Utc.fix())
    }

    /// Wall-clock time at this offset
    pub fn local(self, now: DateTime<Utc>) -> NaiveDateTime {
        now.with_timezone(&self.fixed()).naive_local()
    }
}

impl TryFrom<i32> for TzOffset {
    type Error = String;

    fn try_from(minutes: i32) -> Result<Self, Self::Error> {
        TzOffset::from_minutes(minutes)
            .ok_or_else(|| format!("timezone offset out of range: {} minutes", minutes))
    }
}

impl From<TzOffset> for i32 {
    fn from(offset: TzOffset) -> i32 {
        offset.0
    }
}
