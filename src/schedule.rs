/*!
 # Daily schedule compilation

 This module turns a switch's on/off rules into the concrete set of trigger
 times for one day, expressed as seconds after UTC midnight, and installs them
 into a timer table. Rules anchored to sunrise or sunset are recompiled every
 day by a refresh trigger that the compiler installs next to them.
*/

use std::collections::BTreeSet;
use std::str::FromStr;

use chrono::NaiveDate;
use tracing::{debug, info, instrument, warn};

use crate::sun::{Site, SunEvent, SunEventKind, DEFAULT_ZENITH};
use crate::timer::{TimerSubstrate, PERIOD_DAY};
use crate::{Error, Result};

pub const SECONDS_PER_DAY: u32 = 86_400;

/// Substitute trigger time (23:59:00) for sun events that fall outside the day
pub const END_OF_DAY: u32 = 23 * 3600 + 59 * 60;

/// Command sent to a socket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Action {
    On,
    Off,
}

impl Action {
    pub const ALL: [Action; 2] = [Action::On, Action::Off];

    pub fn as_str(self) -> &'static str {
        match self {
            Action::On => "on",
            Action::Off => "off",
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "on" => Ok(Action::On),
            "off" => Ok(Action::Off),
            other => Err(Error::InvalidRule(format!(
                "unknown action '{other}', expected 'on' or 'off'"
            ))),
        }
    }
}

/// Sun event a relative rule is anchored to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SunAnchor {
    Sunrise,
    Sunset,
}

impl From<SunAnchor> for SunEventKind {
    fn from(anchor: SunAnchor) -> Self {
        match anchor {
            SunAnchor::Sunrise => SunEventKind::Sunrise,
            SunAnchor::Sunset => SunEventKind::Sunset,
        }
    }
}

impl FromStr for SunAnchor {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "sunrise" => Ok(SunAnchor::Sunrise),
            "sunset" => Ok(SunAnchor::Sunset),
            other => Err(Error::InvalidRule(format!(
                "anchor must be 'sunrise' or 'sunset', got '{other}'"
            ))),
        }
    }
}

impl std::fmt::Display for SunAnchor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SunAnchor::Sunrise => f.write_str("sunrise"),
            SunAnchor::Sunset => f.write_str("sunset"),
        }
    }
}

/// One time-of-day rule for a switch action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleRule {
    /// Fixed local time
    Absolute { hour: u32, minute: u32 },
    /// Offset from today's sunrise or sunset; offsets may be negative
    SunRelative {
        anchor: SunAnchor,
        hours: i32,
        minutes: i32,
    },
}

impl ScheduleRule {
    /// Absolute rule with range checks
    pub fn absolute(hour: u32, minute: u32) -> Result<Self> {
        if hour > 23 || minute > 59 {
            return Err(Error::InvalidRule(format!(
                "time {hour:02}:{minute:02} is not a valid time of day"
            )));
        }
        Ok(ScheduleRule::Absolute { hour, minute })
    }

    pub fn sun_relative(anchor: SunAnchor, hours: i32, minutes: i32) -> Self {
        ScheduleRule::SunRelative {
            anchor,
            hours,
            minutes,
        }
    }

    pub fn is_sun_relative(&self) -> bool {
        matches!(self, ScheduleRule::SunRelative { .. })
    }
}

/// On and off rules of one switch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SwitchSchedule {
    pub on: Vec<ScheduleRule>,
    pub off: Vec<ScheduleRule>,
}

impl SwitchSchedule {
    pub fn rules(&self, action: Action) -> &[ScheduleRule] {
        match action {
            Action::On => &self.on,
            Action::Off => &self.off,
        }
    }
}

/// Identifies one entry in the timer table
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TriggerKey {
    /// Switch a socket: `{switch}_{on|off}`
    Action { switch: String, action: Action },
    /// Recompile a sun-relative schedule: `refresh_{switch}_{on|off}`
    Refresh { switch: String, action: Action },
    /// Periodic clock synchronisation
    TimeSync,
    /// Periodic configuration check
    ConfigRefresh,
}

const REFRESH_PREFIX: &str = "refresh_";
const TIME_SYNC_KEY: &str = "time_sync";
const CONFIG_REFRESH_KEY: &str = "fetch_config";

impl TriggerKey {
    pub fn action(switch: impl Into<String>, action: Action) -> Self {
        TriggerKey::Action {
            switch: switch.into(),
            action,
        }
    }

    pub fn refresh(switch: impl Into<String>, action: Action) -> Self {
        TriggerKey::Refresh {
            switch: switch.into(),
            action,
        }
    }
}

impl std::fmt::Display for TriggerKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TriggerKey::Action { switch, action } => write!(f, "{switch}_{action}"),
            TriggerKey::Refresh { switch, action } => {
                write!(f, "{REFRESH_PREFIX}{switch}_{action}")
            }
            TriggerKey::TimeSync => f.write_str(TIME_SYNC_KEY),
            TriggerKey::ConfigRefresh => f.write_str(CONFIG_REFRESH_KEY),
        }
    }
}

impl FromStr for TriggerKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            TIME_SYNC_KEY => return Ok(TriggerKey::TimeSync),
            CONFIG_REFRESH_KEY => return Ok(TriggerKey::ConfigRefresh),
            _ => {}
        }

        let (refresh, rest) = match s.strip_prefix(REFRESH_PREFIX) {
            Some(rest) => (true, rest),
            None => (false, s),
        };

        let (switch, action) = rest
            .rsplit_once('_')
            .filter(|(switch, _)| !switch.is_empty())
            .ok_or_else(|| Error::MalformedKey(s.to_string()))?;
        let action = action
            .parse::<Action>()
            .map_err(|_| Error::MalformedKey(s.to_string()))?;

        Ok(if refresh {
            TriggerKey::refresh(switch, action)
        } else {
            TriggerKey::action(switch, action)
        })
    }
}

/// Inputs shared by all compilations
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduleContext {
    /// Local time minus UTC, in hours
    pub utc_offset_hours: f64,
    /// Required only when sun-relative rules exist
    pub site: Option<Site>,
    pub zenith: f64,
}

impl ScheduleContext {
    pub fn new(utc_offset_hours: f64, site: Option<Site>) -> Self {
        Self {
            utc_offset_hours,
            site,
            zenith: DEFAULT_ZENITH,
        }
    }
}

/// Trigger times for one switch action on one day
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompiledSchedule {
    /// Seconds after UTC midnight
    pub times: BTreeSet<u32>,
    /// Whether the times depend on the date and must be recompiled daily
    pub needs_refresh: bool,
}

/// Converts seconds after local midnight into seconds after UTC midnight
pub fn local_to_utc_seconds(seconds: u32, utc_offset_hours: f64) -> u32 {
    let offset = (utc_offset_hours * 3600.0).round() as i64;
    (i64::from(seconds) - offset).rem_euclid(i64::from(SECONDS_PER_DAY)) as u32
}

/// Trigger time of a sun-relative rule, in seconds after UTC midnight.
///
/// Events that do not happen on `date` (polar day or night, or rounding past
/// midnight) and adjusted times beyond the end of the day become 23:59:00.
/// Adjusted times before the start of the day become 00:00:00.
pub fn sun_relative_seconds(
    site: Site,
    date: NaiveDate,
    anchor: SunAnchor,
    hours: i32,
    minutes: i32,
    zenith: f64,
) -> u32 {
    let event = site.event(date, anchor.into(), zenith);
    let base = match event {
        SunEvent::At { date: day, .. } if day != date => {
            debug!("{} on {} falls on {}, using end of day", anchor, date, day);
            return END_OF_DAY;
        }
        SunEvent::At { hour, minute, .. } => hour * 3600 + minute * 60,
        SunEvent::NeverRises | SunEvent::NeverSets => {
            warn!(
                "No {} at ({:.4}, {:.4}) on {} ({:?}), using end of day",
                anchor, site.latitude, site.longitude, date, event
            );
            return END_OF_DAY;
        }
    };

    let adjusted = i64::from(base) + i64::from(hours) * 3600 + i64::from(minutes) * 60;
    if adjusted >= i64::from(SECONDS_PER_DAY) {
        END_OF_DAY
    } else if adjusted < 0 {
        0
    } else {
        adjusted as u32
    }
}

/// Compiles the rules of one switch action for `date` (a UTC calendar date)
pub fn compile(
    rules: &[ScheduleRule],
    date: NaiveDate,
    context: &ScheduleContext,
) -> Result<CompiledSchedule> {
    let mut compiled = CompiledSchedule::default();

    for rule in rules {
        let seconds = match *rule {
            ScheduleRule::Absolute { hour, minute } => {
                local_to_utc_seconds(hour * 3600 + minute * 60, context.utc_offset_hours)
            }
            ScheduleRule::SunRelative {
                anchor,
                hours,
                minutes,
            } => {
                let site = context.site.ok_or(Error::MissingCoordinates)?;
                compiled.needs_refresh = true;
                sun_relative_seconds(site, date, anchor, hours, minutes, context.zenith)
            }
        };
        compiled.times.insert(seconds);
    }

    Ok(compiled)
}

/// Compiles and installs the triggers of one switch action.
///
/// Previous entries under the same keys are removed first, so a recompilation
/// replaces the old trigger set instead of adding to it.
#[instrument(skip(timer, rules, context))]
pub fn install<T: TimerSubstrate>(
    timer: &mut T,
    switch: &str,
    action: Action,
    rules: &[ScheduleRule],
    date: NaiveDate,
    context: &ScheduleContext,
) -> Result<CompiledSchedule> {
    let action_key = TriggerKey::action(switch, action);
    let refresh_key = TriggerKey::refresh(switch, action);

    timer.remove(&action_key);
    timer.remove(&refresh_key);

    let compiled = compile(rules, date, context)?;

    if compiled.needs_refresh {
        timer.insert(PERIOD_DAY, BTreeSet::from([0]), refresh_key);
    }
    if !compiled.times.is_empty() {
        timer.insert(PERIOD_DAY, compiled.times.clone(), action_key.clone());
    }

    info!(
        "Scheduled {} at {} time(s){}",
        action_key,
        compiled.times.len(),
        if compiled.needs_refresh {
            ", refreshed daily"
        } else {
            ""
        }
    );
    Ok(compiled)
}

/// Formats seconds after midnight as `HH:MM:SS`
pub fn format_seconds(seconds: u32) -> String {
    format!(
        "{:02}:{:02}:{:02}",
        seconds / 3600,
        seconds % 3600 / 60,
        seconds % 60
    )
}
