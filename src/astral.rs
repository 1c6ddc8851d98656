//! Sunrise/sunset and time window predicates
//!
//! Sun times come from the NOAA sunrise equation for the configured site,
//! unless fixed local times are configured. All inputs and outputs are UTC
//! instants; calendar questions ("today", "yesterday") are answered in the
//! site's timezone.

use crate::config::LocationConfig;
use crate::error::Result;
use chrono::{DateTime, Days, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::Serialize;

const J2000: f64 = 2_451_545.0;
const UNIX_EPOCH_JD: f64 = 2_440_587.5;
const OBLIQUITY_DEG: f64 = 23.4397;
// Apparent sunrise: refraction plus solar disc radius
const SUN_ALTITUDE_DEG: f64 = -0.833;

/// Sun event calculator for one site
#[derive(Debug, Clone)]
pub struct Astral {
    latitude: f64,
    longitude: f64,
    tz: Tz,
    sunrise_override: Option<NaiveTime>,
    sunset_override: Option<NaiveTime>,
}

/// A concrete occurrence of the scheduled night window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct NightWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl NightWindow {
    pub fn contains(&self, now: DateTime<Utc>) -> bool {
        self.start <= now && now < self.end
    }
}

impl Astral {
    pub fn from_config(location: &LocationConfig) -> Result<Self> {
        Ok(Self {
            latitude: location.latitude,
            longitude: location.longitude,
            tz: location.tz()?,
            sunrise_override: location.sunrise_override_time()?,
            sunset_override: location.sunset_override_time()?,
        })
    }

    /// Fixed local sun times, independent of the site
    pub const fn fixed(tz: Tz, sunrise: NaiveTime, sunset: NaiveTime) -> Self {
        Self {
            latitude: 0.0,
            longitude: 0.0,
            tz,
            sunrise_override: Some(sunrise),
            sunset_override: Some(sunset),
        }
    }

    pub const fn timezone(&self) -> Tz {
        self.tz
    }

    /// Calendar date of `now` at the site
    pub fn local_date(&self, now: DateTime<Utc>) -> NaiveDate {
        now.with_timezone(&self.tz).date_naive()
    }

    pub fn sunrise(&self, date: NaiveDate) -> DateTime<Utc> {
        if let Some(t) = self.sunrise_override {
            return self.localize(date, t);
        }
        self.sun_event(date, true)
            .unwrap_or_else(|| self.localize(date, polar_fallback(true)))
    }

    pub fn sunset(&self, date: NaiveDate) -> DateTime<Utc> {
        if let Some(t) = self.sunset_override {
            return self.localize(date, t);
        }
        self.sun_event(date, false)
            .unwrap_or_else(|| self.localize(date, polar_fallback(false)))
    }

    /// Nighttime is before today's sunrise or from today's sunset on
    pub fn is_night(&self, now: DateTime<Utc>) -> bool {
        let today = self.local_date(now);
        now < self.sunrise(today) || now >= self.sunset(today)
    }

    /// First sunrise strictly after `after`
    pub fn next_sunrise(&self, after: DateTime<Utc>) -> DateTime<Utc> {
        let mut date = self.local_date(after);
        // A sunrise later than the local date boundary is at most two days out
        for _ in 0..3 {
            let rise = self.sunrise(date);
            if rise > after {
                return rise;
            }
            date = date + Days::new(1);
        }
        self.sunrise(date)
    }

    /// The most recent occurrence of the window `[start, next sunrise)` that
    /// began at or before `now`
    pub fn night_window(&self, start: NaiveTime, now: DateTime<Utc>) -> NightWindow {
        let today = self.local_date(now);
        let mut begin = self.localize(today, start);
        if begin > now {
            begin = self.localize(today - Days::new(1), start);
        }
        NightWindow {
            start: begin,
            end: self.next_sunrise(begin),
        }
    }

    pub fn in_night_window(&self, start: NaiveTime, now: DateTime<Utc>) -> bool {
        self.night_window(start, now).contains(now)
    }

    /// Local wall time on `date` as a UTC instant. Ambiguous times take the
    /// earlier instant; times skipped by a DST jump move forward an hour.
    pub fn localize(&self, date: NaiveDate, time: NaiveTime) -> DateTime<Utc> {
        let naive = date.and_time(time);
        self.tz
            .from_local_datetime(&naive)
            .earliest()
            .or_else(|| {
                self.tz
                    .from_local_datetime(&(naive + chrono::Duration::hours(1)))
                    .earliest()
            })
            .map_or_else(
                || Utc.from_utc_datetime(&naive),
                |dt| dt.with_timezone(&Utc),
            )
    }

    fn sun_event(&self, date: NaiveDate, rising: bool) -> Option<DateTime<Utc>> {
        let unix_days = (date - NaiveDate::from_ymd_opt(1970, 1, 1)?).num_days();
        #[allow(clippy::cast_precision_loss)]
        let n = unix_days as f64 + UNIX_EPOCH_JD + 0.5 - J2000;
        let mean_solar_noon = n - self.longitude / 360.0;

        let m = (357.5291 + 0.985_600_28 * mean_solar_noon).rem_euclid(360.0);
        let m_rad = m.to_radians();
        let center = 1.9148 * m_rad.sin() + 0.02 * (2.0 * m_rad).sin() + 0.0003 * (3.0 * m_rad).sin();
        let lambda = (m + center + 180.0 + 102.9372).rem_euclid(360.0).to_radians();
        let transit = J2000 + mean_solar_noon + 0.0053 * m_rad.sin() - 0.0069 * (2.0 * lambda).sin();

        let sin_decl = lambda.sin() * OBLIQUITY_DEG.to_radians().sin();
        let cos_decl = sin_decl.asin().cos();
        let phi = self.latitude.to_radians();
        let cos_hour_angle = (SUN_ALTITUDE_DEG.to_radians().sin() - phi.sin() * sin_decl)
            / (phi.cos() * cos_decl);
        if !(-1.0..=1.0).contains(&cos_hour_angle) {
            // Polar day or polar night
            return None;
        }
        let hour_angle = cos_hour_angle.acos().to_degrees();

        let jd = if rising {
            transit - hour_angle / 360.0
        } else {
            transit + hour_angle / 360.0
        };
        #[allow(clippy::cast_possible_truncation)]
        let millis = ((jd - UNIX_EPOCH_JD) * 86_400_000.0).round() as i64;
        DateTime::from_timestamp_millis(millis)
    }
}

fn polar_fallback(rising: bool) -> NaiveTime {
    if rising {
        NaiveTime::from_hms_opt(6, 0, 0).unwrap_or_default()
    } else {
        NaiveTime::from_hms_opt(18, 0, 0).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    fn at(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn amsterdam_equinox_sun_times() {
        let astral = Astral::from_config(&LocationConfig::default()).unwrap();
        let date = NaiveDate::from_ymd_opt(2024, 3, 20).unwrap();
        let rise = astral.sunrise(date).with_timezone(&chrono_tz::Europe::Amsterdam);
        let set = astral.sunset(date).with_timezone(&chrono_tz::Europe::Amsterdam);
        // Published: 06:43 and 18:54 CET
        let rise_min = rise.hour() * 60 + rise.minute();
        let set_min = set.hour() * 60 + set.minute();
        assert!((395..=410).contains(&rise_min), "sunrise {rise}");
        assert!((1126..=1142).contains(&set_min), "sunset {set}");
    }

    #[test]
    fn polar_night_falls_back() {
        let location = LocationConfig {
            latitude: 78.2,
            longitude: 15.6,
            timezone: "UTC".to_string(),
            ..Default::default()
        };
        let astral = Astral::from_config(&location).unwrap();
        let date = NaiveDate::from_ymd_opt(2024, 12, 21).unwrap();
        assert_eq!(astral.sunrise(date).time(), at(6, 0));
        assert_eq!(astral.sunset(date).time(), at(18, 0));
    }

    #[test]
    fn fixed_times_drive_is_night() {
        let astral = Astral::fixed(chrono_tz::UTC, at(7, 30), at(20, 0));
        let day = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        assert!(astral.is_night(day.and_time(at(5, 0)).and_utc()));
        assert!(!astral.is_night(day.and_time(at(12, 0)).and_utc()));
        assert!(astral.is_night(day.and_time(at(20, 0)).and_utc()));
    }

    #[test]
    fn dst_gap_moves_forward() {
        let astral = Astral::fixed(chrono_tz::Europe::Amsterdam, at(7, 0), at(19, 0));
        // 02:30 does not exist on 2024-03-31 in Amsterdam
        let date = NaiveDate::from_ymd_opt(2024, 3, 31).unwrap();
        let t = astral.localize(date, at(2, 30));
        assert_eq!(t.time(), at(1, 30));
    }
}
