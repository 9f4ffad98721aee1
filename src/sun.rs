/*!
 # Sunrise and sunset approximation

 Classic almanac algorithm for the UTC time of sunrise or sunset at a
 coordinate. Accurate to a few minutes, which is plenty for switching a lamp.
*/

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

/// Sun zenith angle at sunrise/sunset, including refraction and the solar radius
pub const DEFAULT_ZENITH: f64 = 90.8;

/// Which crossing of the horizon to calculate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SunEventKind {
    Sunrise,
    Sunset,
}

/// Result of a sunrise or sunset calculation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SunEvent {
    /// The event happens at `hour:minute` UTC on `date`.
    ///
    /// `date` is the requested date unless rounding pushed the event past
    /// midnight, in which case it is the following day at 00:00.
    At {
        date: NaiveDate,
        hour: u32,
        minute: u32,
    },
    /// The sun stays below the horizon all day (polar night)
    NeverRises,
    /// The sun stays above the horizon all day (polar day)
    NeverSets,
}

impl SunEvent {
    /// Seconds after UTC midnight, if the event occurs
    pub fn seconds_of_day(&self) -> Option<u32> {
        match self {
            SunEvent::At { hour, minute, .. } => Some(hour * 3600 + minute * 60),
            SunEvent::NeverRises | SunEvent::NeverSets => None,
        }
    }
}

/// A geographic position in degrees, north and east positive
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Site {
    pub latitude: f64,
    pub longitude: f64,
}

impl Site {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    pub fn sunrise(&self, date: NaiveDate) -> SunEvent {
        self.event(date, SunEventKind::Sunrise, DEFAULT_ZENITH)
    }

    pub fn sunset(&self, date: NaiveDate) -> SunEvent {
        self.event(date, SunEventKind::Sunset, DEFAULT_ZENITH)
    }

    /// Calculates sunrise or sunset for `date` with a custom zenith
    pub fn event(&self, date: NaiveDate, kind: SunEventKind, zenith: f64) -> SunEvent {
        sun_event(self.latitude, self.longitude, date, kind, zenith)
    }
}

/// Maps `value` into `[0, max)`
pub fn force_range(value: f64, max: f64) -> f64 {
    let v = value.rem_euclid(max);
    // rem_euclid may round tiny negative inputs up to exactly `max`
    if v >= max {
        v - max
    } else {
        v
    }
}

/// Approximate day of the year (1-based)
fn day_of_year(date: NaiveDate) -> f64 {
    let year = f64::from(date.year());
    let month = f64::from(date.month());
    let day = f64::from(date.day());

    let n1 = (275.0 * month / 9.0).floor();
    let n2 = ((month + 9.0) / 12.0).floor();
    let n3 = 1.0 + ((year - 4.0 * (year / 4.0).floor() + 2.0) / 3.0).floor();
    n1 - (n2 * n3) + day - 30.0
}

/// Calculates the UTC time of sunrise or sunset.
///
/// Returns [`SunEvent::NeverRises`] or [`SunEvent::NeverSets`] when the sun
/// does not cross the zenith angle on that date.
pub fn sun_event(
    latitude: f64,
    longitude: f64,
    date: NaiveDate,
    kind: SunEventKind,
    zenith: f64,
) -> SunEvent {
    let to_rad = std::f64::consts::PI / 180.0;

    let n = day_of_year(date);
    let lng_hour = longitude / 15.0;

    let base_hour = match kind {
        SunEventKind::Sunrise => 6.0,
        SunEventKind::Sunset => 18.0,
    };
    let t = n + (base_hour - lng_hour) / 24.0;

    // mean anomaly
    let m = 0.9856 * t - 3.289;

    // true longitude
    let l = force_range(
        m + 1.916 * (to_rad * m).sin() + 0.020 * (to_rad * 2.0 * m).sin() + 282.634,
        360.0,
    );

    // right ascension, moved into the quadrant of L, in hours
    let mut ra = force_range((0.91764 * (to_rad * l).tan()).atan() / to_rad, 360.0);
    let l_quadrant = (l / 90.0).floor() * 90.0;
    let ra_quadrant = (ra / 90.0).floor() * 90.0;
    ra += l_quadrant - ra_quadrant;
    ra /= 15.0;

    // declination
    let sin_dec = 0.39782 * (to_rad * l).sin();
    let cos_dec = sin_dec.asin().cos();

    // local hour angle
    let cos_h = ((to_rad * zenith).cos() - sin_dec * (to_rad * latitude).sin())
        / (cos_dec * (to_rad * latitude).cos());

    if cos_h > 1.0 {
        return SunEvent::NeverRises;
    }
    if cos_h < -1.0 {
        return SunEvent::NeverSets;
    }

    let h = match kind {
        SunEventKind::Sunrise => 360.0 - cos_h.acos() / to_rad,
        SunEventKind::Sunset => cos_h.acos() / to_rad,
    } / 15.0;

    let local_mean = h + ra - 0.06571 * t - 6.622;
    let ut = force_range(local_mean - lng_hour, 24.0);

    let mut hour = ut.trunc() as u32;
    let mut minute = ((ut - ut.trunc()) * 60.0).round() as u32;
    if minute == 60 {
        hour += 1;
        minute = 0;
    }

    let mut date = date;
    if hour == 24 {
        hour = 0;
        date = date.succ_opt().unwrap_or(date);
    }

    SunEvent::At { date, hour, minute }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn at(d: NaiveDate, hour: u32, minute: u32) -> SunEvent {
        SunEvent::At {
            date: d,
            hour,
            minute,
        }
    }

    #[test]
    fn berlin_solstices() {
        let berlin = Site::new(52.52, 13.405);
        let june = date(2024, 6, 21);
        let december = date(2024, 12, 21);

        assert_eq!(berlin.sunrise(june), at(june, 2, 43));
        assert_eq!(berlin.sunset(june), at(june, 19, 33));
        assert_eq!(berlin.sunrise(december), at(december, 7, 16));
        assert_eq!(berlin.sunset(december), at(december, 14, 54));
    }

    #[test]
    fn minute_rounding_carries_into_hour() {
        // UT 18.992h rounds to 18:60
        let sydney = Site::new(-33.87, 151.21);
        let d = date(2024, 1, 15);
        assert_eq!(sydney.sunrise(d), at(d, 19, 0));
    }

    #[test]
    fn polar_day_and_night_are_signalled() {
        let svalbard = Site::new(78.22, 15.65);
        assert_eq!(svalbard.sunrise(date(2024, 6, 21)), SunEvent::NeverSets);
        assert_eq!(svalbard.sunset(date(2024, 6, 21)), SunEvent::NeverSets);
        assert_eq!(svalbard.sunrise(date(2024, 12, 21)), SunEvent::NeverRises);
        assert_eq!(svalbard.sunrise(date(2024, 12, 21)).seconds_of_day(), None);
    }

    #[test]
    fn rounding_to_midnight_rolls_date_forward() {
        let equator_west = Site::new(0.0, -86.0);
        assert_eq!(
            equator_west.sunset(date(2024, 2, 28)),
            at(date(2024, 2, 29), 0, 0)
        );
        assert_eq!(
            equator_west.sunset(date(2023, 2, 28)),
            at(date(2023, 3, 1), 0, 0)
        );
        assert_eq!(
            equator_west.sunset(date(2024, 2, 29)),
            at(date(2024, 3, 1), 0, 0)
        );
        assert_eq!(
            Site::new(0.0, -88.2).sunset(date(2024, 12, 31)),
            at(date(2025, 1, 1), 0, 0)
        );
    }

    #[test]
    fn force_range_wraps_both_directions() {
        assert_eq!(force_range(370.0, 360.0), 10.0);
        assert_eq!(force_range(-30.0, 360.0), 330.0);
        assert_eq!(force_range(-750.0, 360.0), 330.0);
        assert_eq!(force_range(24.0, 24.0), 0.0);
        assert_eq!(force_range(12.5, 24.0), 12.5);
        assert!(force_range(-1e-18, 360.0) < 360.0);
    }

    #[test]
    fn seconds_of_day_combines_hour_and_minute() {
        assert_eq!(at(date(2024, 1, 1), 5, 30).seconds_of_day(), Some(19800));
    }
}
