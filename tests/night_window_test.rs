use ampwise::astral::Astral;
use chrono::{DateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;

fn hm(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).unwrap()
}

fn utc(d: u32, h: u32, m: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, d, h, m, 0).unwrap()
}

fn site(tz: Tz) -> Astral {
    Astral::fixed(tz, hm(7, 30), hm(21, 0))
}

#[test]
fn window_runs_from_schedule_until_sunrise() {
    let astral = site(Tz::UTC);
    let start = hm(1, 0);

    assert!(!astral.in_night_window(start, utc(3, 0, 30)));
    assert!(astral.in_night_window(start, utc(3, 2, 0)));
    assert!(!astral.in_night_window(start, utc(3, 8, 0)));
    assert!(astral.in_night_window(start, utc(3, 1, 0)));
    assert!(!astral.in_night_window(start, utc(3, 7, 30)));
}

#[test]
fn window_scheduled_before_midnight_spans_the_day_boundary() {
    let astral = site(Tz::UTC);
    let start = hm(23, 0);

    assert!(astral.in_night_window(start, utc(3, 2, 0)));
    assert!(astral.in_night_window(start, utc(3, 23, 30)));
    assert!(!astral.in_night_window(start, utc(3, 22, 59)));

    let window = astral.night_window(start, utc(3, 2, 0));
    assert_eq!(window.start, utc(2, 23, 0));
    assert_eq!(window.end, utc(3, 7, 30));
}

#[test]
fn window_uses_site_local_time() {
    // 01:00 and 07:30 in Amsterdam summer time are 23:00 and 05:30 UTC
    let astral = site(chrono_tz::Europe::Amsterdam);
    let start = hm(1, 0);

    let window = astral.night_window(start, utc(3, 0, 30));
    assert_eq!(window.start, utc(2, 23, 0));
    assert_eq!(window.end, utc(3, 5, 30));
    assert!(astral.in_night_window(start, utc(3, 0, 30)));
    assert!(!astral.in_night_window(start, utc(3, 6, 0)));
}

#[test]
fn nighttime_is_outside_sunrise_to_sunset() {
    let astral = site(Tz::UTC);
    assert!(astral.is_night(utc(3, 6, 0)));
    assert!(!astral.is_night(utc(3, 7, 30)));
    assert!(!astral.is_night(utc(3, 20, 59)));
    assert!(astral.is_night(utc(3, 21, 0)));
}

#[test]
fn next_sunrise_is_strictly_later() {
    let astral = site(Tz::UTC);
    assert_eq!(astral.next_sunrise(utc(3, 7, 29)), utc(3, 7, 30));
    assert_eq!(astral.next_sunrise(utc(3, 7, 30)), utc(4, 7, 30));
}
