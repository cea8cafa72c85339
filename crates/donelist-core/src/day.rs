//! "Today" versus "history" bucketing around a non-midnight cutover.
//!
//! A day runs from the cutover (03:00 by default) in the reference timezone
//! to the next day's cutover, so work finished after midnight still counts
//! for the evening it belongs to.

use anyhow::anyhow;
use chrono::{DateTime, Duration, LocalResult, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;

const TIMEZONE_ENV_VAR: &str = "DONELIST_TIMEZONE";
pub const DEFAULT_TIMEZONE: &str = "Europe/Amsterdam";
pub const DEFAULT_CUTOVER_HOUR: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayBoundary {
    timezone: Tz,
    cutover: NaiveTime,
}

impl Default for DayBoundary {
    fn default() -> Self {
        Self {
            timezone: chrono_tz::Europe::Amsterdam,
            cutover: NaiveTime::MIN + Duration::hours(i64::from(DEFAULT_CUTOVER_HOUR)),
        }
    }
}

impl DayBoundary {
    pub fn new(timezone: Tz, cutover_hour: u32) -> anyhow::Result<Self> {
        let cutover = NaiveTime::from_hms_opt(cutover_hour, 0, 0)
            .ok_or_else(|| anyhow!("cutover hour must be 0-23, got {cutover_hour}"))?;
        Ok(Self { timezone, cutover })
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    /// Half-open `[start, end)` interval of the day containing `now`.
    pub fn window(&self, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        let local_now = now.with_timezone(&self.timezone);
        let mut day = local_now.date_naive();
        if local_now.time() < self.cutover {
            day = day.pred_opt().unwrap_or(day);
        }
        let next = day.succ_opt().unwrap_or(day);
        (self.cutover_on(day), self.cutover_on(next))
    }

    pub fn is_today(&self, ts: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        self.classifier(now).is_today(ts)
    }

    /// Freezes `now` so a whole batch is classified against one window.
    pub fn classifier(&self, now: DateTime<Utc>) -> Classifier {
        let (start, end) = self.window(now);
        Classifier { start, end }
    }

    pub fn format_local(&self, ts: DateTime<Utc>, fmt: &str) -> String {
        ts.with_timezone(&self.timezone).format(fmt).to_string()
    }

    fn cutover_on(&self, day: NaiveDate) -> DateTime<Utc> {
        let naive = day.and_time(self.cutover);
        // A cutover inside a DST gap moves to the first valid instant after it.
        for step in 0..=8 {
            let candidate = naive + Duration::minutes(15 * step);
            match self.timezone.from_local_datetime(&candidate) {
                LocalResult::Single(local) => return local.with_timezone(&Utc),
                LocalResult::Ambiguous(first, second) => {
                    tracing::debug!(
                        day = %day,
                        first = %first,
                        second = %second,
                        "ambiguous cutover; using earliest"
                    );
                    return first.min(second).with_timezone(&Utc);
                }
                LocalResult::None => continue,
            }
        }
        tracing::warn!(day = %day, "cutover not representable locally; treating as UTC");
        Utc.from_utc_datetime(&naive)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classifier {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl Classifier {
    pub fn is_today(&self, ts: DateTime<Utc>) -> bool {
        self.start <= ts && ts < self.end
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }
}

/// Picks the reference timezone: the configured value, then the
/// `DONELIST_TIMEZONE` environment variable, then Europe/Amsterdam.
pub fn resolve_timezone(configured: Option<&str>) -> Tz {
    if let Some(raw) = configured
        && let Some(tz) = parse_timezone(raw, "config:day.timezone")
    {
        return tz;
    }

    if let Ok(raw) = std::env::var(TIMEZONE_ENV_VAR)
        && let Some(tz) = parse_timezone(&raw, TIMEZONE_ENV_VAR)
    {
        return tz;
    }

    parse_timezone(DEFAULT_TIMEZONE, "DEFAULT_TIMEZONE").unwrap_or_else(|| {
        tracing::error!("failed to parse fallback timezone; using UTC");
        chrono_tz::UTC
    })
}

fn parse_timezone(raw: &str, source: &str) -> Option<Tz> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        tracing::warn!(source, "timezone source was empty");
        return None;
    }

    match trimmed.parse::<Tz>() {
        Ok(tz) => {
            tracing::info!(source, timezone = %trimmed, "configured reference timezone");
            Some(tz)
        }
        Err(err) => {
            tracing::error!(
                source,
                timezone = %trimmed,
                error = %err,
                "failed to parse timezone id"
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Timelike, Utc};
    use chrono_tz::Europe::Amsterdam;

    use super::*;

    fn amsterdam(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Amsterdam
            .with_ymd_and_hms(y, m, d, h, min, 0)
            .single()
            .expect("valid local time")
            .with_timezone(&Utc)
    }

    fn local_hour(boundary: &DayBoundary, ts: DateTime<Utc>) -> u32 {
        ts.with_timezone(&boundary.timezone()).hour()
    }

    #[test]
    fn cutover_not_midnight_decides_the_bucket() {
        let boundary = DayBoundary::default();
        let completed = amsterdam(2026, 10, 19, 2, 30);

        assert!(boundary.is_today(completed, amsterdam(2026, 10, 19, 2, 59)));
        assert!(!boundary.is_today(completed, amsterdam(2026, 10, 19, 3, 1)));
    }

    #[test]
    fn late_night_completion_counts_for_previous_evening() {
        let boundary = DayBoundary::default();
        let evening = amsterdam(2026, 10, 18, 22, 0);
        let after_midnight = amsterdam(2026, 10, 19, 1, 45);

        assert!(boundary.is_today(evening, after_midnight));
        assert!(!boundary.is_today(amsterdam(2026, 10, 18, 2, 0), after_midnight));
    }

    #[test]
    fn window_is_half_open() {
        let boundary = DayBoundary::default();
        let now = amsterdam(2026, 10, 19, 12, 0);
        let classifier = boundary.classifier(now);

        assert!(classifier.is_today(amsterdam(2026, 10, 19, 3, 0)));
        assert!(!classifier.is_today(amsterdam(2026, 10, 20, 3, 0)));
        assert!(classifier.is_today(amsterdam(2026, 10, 20, 2, 59)));
    }

    #[test]
    fn fall_back_day_spans_twenty_five_hours() {
        let boundary = DayBoundary::default();
        let now = Utc
            .with_ymd_and_hms(2026, 10, 24, 12, 0, 0)
            .single()
            .expect("valid now");
        let (start, end) = boundary.window(now);

        assert_eq!(end - start, Duration::hours(25));
        assert_eq!(local_hour(&boundary, start), 3);
        assert_eq!(local_hour(&boundary, end), 3);
    }

    #[test]
    fn custom_cutover_and_timezone() {
        let boundary = DayBoundary::new(chrono_tz::UTC, 5).expect("valid boundary");
        let now = Utc
            .with_ymd_and_hms(2026, 10, 19, 4, 0, 0)
            .single()
            .expect("valid now");
        let (start, _) = boundary.window(now);

        assert_eq!(
            start,
            Utc.with_ymd_and_hms(2026, 10, 18, 5, 0, 0)
                .single()
                .expect("valid start")
        );
        assert!(DayBoundary::new(chrono_tz::UTC, 24).is_err());
    }

    #[test]
    fn unknown_timezone_falls_back() {
        assert_eq!(resolve_timezone(Some("Europe/Atlantis")), resolve_timezone(None));
        assert_eq!(resolve_timezone(Some("Asia/Tokyo")), chrono_tz::Asia::Tokyo);
    }
}
