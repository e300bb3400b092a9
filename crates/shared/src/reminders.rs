use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::provider::ItemKind;
use crate::timezone;

/// The fixed reminder catalogue. Task reminders key off the due date, event
/// reminders off the start instant; `HourBefore` only exists for timed events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReminderTag {
    WeekBefore,
    ThreeDaysBefore,
    EveningBefore,
    MorningOf,
    HourBefore,
}

impl ReminderTag {
    pub fn label(&self) -> &'static str {
        match self {
            ReminderTag::WeekBefore => "1週間前",
            ReminderTag::ThreeDaysBefore => "3日前",
            ReminderTag::EveningBefore => "前日18時",
            ReminderTag::MorningOf => "当日朝9時",
            ReminderTag::HourBefore => "1時間前",
        }
    }

    /// Stable segment for dedupe-marker keys.
    pub fn marker_tag(&self) -> &'static str {
        match self {
            ReminderTag::WeekBefore => "week_before",
            ReminderTag::ThreeDaysBefore => "three_days_before",
            ReminderTag::EveningBefore => "evening_before",
            ReminderTag::MorningOf => "morning_of",
            ReminderTag::HourBefore => "hour_before",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        [
            ReminderTag::WeekBefore,
            ReminderTag::ThreeDaysBefore,
            ReminderTag::EveningBefore,
            ReminderTag::MorningOf,
            ReminderTag::HourBefore,
        ]
        .into_iter()
        .find(|tag| tag.label() == label)
    }
}

/// Options still worth offering for a task due on `due`, given how far away
/// it is and which tags were already picked. Offering a lead time that has
/// already passed would fire immediately, so those are filtered out.
pub fn task_catalogue(
    now: DateTime<Utc>,
    due: Option<NaiveDate>,
    already_selected: &[ReminderTag],
) -> Vec<ReminderTag> {
    let Some(due) = due else {
        return Vec::new();
    };
    let days = timezone::days_until(now, due);

    [
        (ReminderTag::WeekBefore, 7),
        (ReminderTag::ThreeDaysBefore, 3),
        (ReminderTag::EveningBefore, 1),
        (ReminderTag::MorningOf, 0),
    ]
    .into_iter()
    .filter(|(tag, min_days)| days >= *min_days && !already_selected.contains(tag))
    .map(|(tag, _)| tag)
    .collect()
}

/// Options for an event starting at `start`. Lead times measured against the
/// actual start instant; all-day events have no hour-before option.
pub fn event_catalogue(
    now: DateTime<Utc>,
    date: NaiveDate,
    start_time: Option<NaiveTime>,
    already_selected: &[ReminderTag],
) -> Vec<ReminderTag> {
    let Some(start) = timezone::item_start_utc(date, start_time) else {
        return Vec::new();
    };
    let lead = start - now;

    let mut options = Vec::new();
    if lead >= Duration::hours(24) {
        options.push(ReminderTag::EveningBefore);
    }
    if lead >= Duration::zero() {
        options.push(ReminderTag::MorningOf);
    }
    if start_time.is_some() && lead >= Duration::hours(1) {
        options.push(ReminderTag::HourBefore);
    }
    options.retain(|tag| !already_selected.contains(tag));
    options
}

/// The wall-clock instant (converted to UTC) at which a selected reminder
/// fires for an item anchored on `date`/`start_time`.
pub fn trigger_instant(
    tag: ReminderTag,
    date: NaiveDate,
    start_time: Option<NaiveTime>,
) -> Option<DateTime<Utc>> {
    let morning = NaiveTime::from_hms_opt(9, 0, 0)?;
    let evening = NaiveTime::from_hms_opt(18, 0, 0)?;

    match tag {
        ReminderTag::WeekBefore => {
            timezone::local_instant_utc(date - Duration::days(7), morning)
        }
        ReminderTag::ThreeDaysBefore => {
            timezone::local_instant_utc(date - Duration::days(3), morning)
        }
        ReminderTag::EveningBefore => {
            timezone::local_instant_utc(date - Duration::days(1), evening)
        }
        ReminderTag::MorningOf => timezone::local_instant_utc(date, morning),
        ReminderTag::HourBefore => {
            let start = timezone::item_start_utc(date, start_time)?;
            start_time?;
            Some(start - Duration::hours(1))
        }
    }
}
