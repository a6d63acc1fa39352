use chrono::{DateTime, Datelike, Timelike, Utc, Weekday};
use chrono_tz::Europe::Berlin;

// The ECB publishes reference rates once per business day, shortly after
// 16:00 CET; nothing is published on weekends or TARGET closing days.
const PUBLICATION_CUTOFF_HOUR: u32 = 16;
const PUBLICATION_CUTOFF_MINUTE: u32 = 1;

/// Decides whether the historical store is stale relative to the feed's
/// publication schedule, given the most recent stored date and the
/// current instant. Evaluated in the feed's local time zone so the
/// cutoff comparison is meaningful.
///
/// A naive "is it a new day" check would re-download every weekend and
/// miss the afternoon publication window; this reproduces the schedule
/// instead:
/// - store already holds today (or later) -> fresh;
/// - one day behind -> stale only after the 16:01 cutoff;
/// - 2..=6 days behind -> stale unless the gap is a plain weekend
///   (Friday data, Saturday/Sunday today);
/// - a week or more behind -> always stale.
pub fn data_needs_update(max_date: chrono::NaiveDate, now_utc: DateTime<Utc>) -> bool {
    let now = now_utc.with_timezone(&Berlin);
    let today = now.date_naive();

    if max_date >= today {
        return false;
    }

    let gap_days = (today - max_date).num_days();
    match gap_days {
        1 => {
            now.hour() > PUBLICATION_CUTOFF_HOUR
                || (now.hour() == PUBLICATION_CUTOFF_HOUR
                    && now.minute() > PUBLICATION_CUTOFF_MINUTE)
        }
        2..=6 => {
            !(max_date.weekday() == Weekday::Fri
                && matches!(today.weekday(), Weekday::Sat | Weekday::Sun))
        }
        _ => true,
    }
}
