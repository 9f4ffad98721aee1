/*!
 # Configuration

 TOML configuration describing the transmitter, the sockets and their rules.

 ```toml
 utc_offset_hours = 2
 latitude = 52.52
 longitude = 13.405
 gpio = 17

 [switches.lamp]
 code = "0FF0F0FF"
 protocol = 1
 button = 27
 on = [[7, 0], ["sunset", 0, -30]]
 off = [[23, 30]]
 ```
*/

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::encoder::{PulseEncoder, Symbol, DEFAULT_REPEAT};
use crate::protocol::Protocol;
use crate::schedule::{Action, ScheduleContext, ScheduleRule, SwitchSchedule};
use crate::sun::{Site, DEFAULT_ZENITH};
use crate::{Error, Result};

/// Default location of the configuration file
pub const DEFAULT_CONFIG_PATH: &str = "/etc/rcsock.toml";

/// Default main loop interval in milliseconds
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 500;

fn default_zenith() -> f64 {
    DEFAULT_ZENITH
}

fn default_poll_interval() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

fn default_protocol() -> u8 {
    1
}

fn default_repeat() -> u32 {
    DEFAULT_REPEAT
}

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Local time minus UTC, in hours
    #[serde(default)]
    pub utc_offset_hours: f64,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    /// Sun zenith angle defining sunrise and sunset
    #[serde(default = "default_zenith")]
    pub zenith: f64,
    /// Transmitter pin shared by all switches without their own `gpio`
    pub gpio: Option<u32>,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    /// Minutes between clock synchronisation checks
    pub time_sync_interval: Option<u32>,
    /// Minutes between configuration change checks
    pub config_refresh_interval: Option<u32>,
    #[serde(default)]
    pub switches: BTreeMap<String, SwitchConfig>,
    /// Switches whose table could not be read, with the reason
    #[serde(skip)]
    pub rejected: BTreeMap<String, String>,
}

/// One remote socket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SwitchConfig {
    /// Tri-state code word without the command suffix
    pub code: String,
    /// Protocol variant (1-4)
    #[serde(default = "default_protocol")]
    pub protocol: u8,
    /// Transmitter pin, overriding the top-level `gpio`
    pub gpio: Option<u32>,
    /// Pulse unit in microseconds, overriding the protocol default
    pub pulse_length: Option<u32>,
    /// Code word repetitions per command
    #[serde(default = "default_repeat")]
    pub repeat: u32,
    /// Input pin of a toggle button
    pub button: Option<u32>,
    /// Indicator pin held high while a command is transmitted
    pub debug_gpio: Option<u32>,
    #[serde(default)]
    pub on: Vec<RuleSpec>,
    #[serde(default)]
    pub off: Vec<RuleSpec>,
}

/// A schedule rule as written in the configuration file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RuleSpec {
    /// `[hour, minute]` in local time
    Absolute(i64, i64),
    /// `["sunrise" | "sunset", hour_offset, minute_offset]`
    SunRelative(String, i64, i64),
}

impl RuleSpec {
    /// Validates the rule
    pub fn parse(&self) -> Result<ScheduleRule> {
        match self {
            RuleSpec::Absolute(hour, minute) => {
                let hour = u32::try_from(*hour)
                    .map_err(|_| Error::InvalidRule(format!("negative hour {hour}")))?;
                let minute = u32::try_from(*minute)
                    .map_err(|_| Error::InvalidRule(format!("negative minute {minute}")))?;
                ScheduleRule::absolute(hour, minute)
            }
            RuleSpec::SunRelative(anchor, hours, minutes) => {
                let anchor = anchor.parse()?;
                let hours = i32::try_from(*hours)
                    .map_err(|_| Error::InvalidRule(format!("hour offset {hours} too large")))?;
                let minutes = i32::try_from(*minutes).map_err(|_| {
                    Error::InvalidRule(format!("minute offset {minutes} too large"))
                })?;
                Ok(ScheduleRule::sun_relative(anchor, hours, minutes))
            }
        }
    }
}

impl SwitchConfig {
    pub fn protocol(&self) -> Result<Protocol> {
        Protocol::try_from(self.protocol)
    }

    pub fn encoder(&self) -> Result<PulseEncoder> {
        let protocol = self.protocol()?;
        if let Some(unit) = self.pulse_length {
            let max = PulseEncoder::max_pulse_length_us(protocol);
            if unit == 0 || unit > max {
                return Err(Error::Config(format!(
                    "pulse_length {unit} out of range for {protocol} (1-{max})"
                )));
            }
        }
        Ok(PulseEncoder::new(
            protocol,
            self.code.clone(),
            self.pulse_length,
            self.repeat,
        ))
    }

    pub fn rule_specs(&self, action: Action) -> &[RuleSpec] {
        match action {
            Action::On => &self.on,
            Action::Off => &self.off,
        }
    }

    /// Parses all rules; the first invalid rule fails the whole switch
    pub fn schedule(&self) -> Result<SwitchSchedule> {
        let parse = |specs: &[RuleSpec]| specs.iter().map(RuleSpec::parse).collect::<Result<Vec<_>>>();
        Ok(SwitchSchedule {
            on: parse(&self.on)?,
            off: parse(&self.off)?,
        })
    }

    pub fn has_sun_rules(&self) -> bool {
        self.on
            .iter()
            .chain(&self.off)
            .any(|spec| matches!(spec, RuleSpec::SunRelative(..)))
    }
}

impl Config {
    /// Reads and parses a configuration file
    #[instrument]
    pub fn load(path: &Path) -> Result<Config> {
        let text = std::fs::read_to_string(path).map_err(|source| Error::ConfigIo {
            path: path.display().to_string(),
            source,
        })?;
        let config: Config = text.parse()?;
        debug!(
            "Loaded {} switch(es) from {}",
            config.switches.len(),
            path.display()
        );
        Ok(config)
    }

    /// Coordinates, when both are configured
    pub fn site(&self) -> Option<Site> {
        match (self.latitude, self.longitude) {
            (Some(latitude), Some(longitude)) => Some(Site::new(latitude, longitude)),
            _ => None,
        }
    }

    pub fn schedule_context(&self) -> ScheduleContext {
        ScheduleContext {
            utc_offset_hours: self.utc_offset_hours,
            site: self.site(),
            zenith: self.zenith,
        }
    }

    pub fn switch(&self, name: &str) -> Result<&SwitchConfig> {
        if let Some(reason) = self.rejected.get(name) {
            return Err(Error::Config(reason.clone()));
        }
        self.switches
            .get(name)
            .ok_or_else(|| Error::UnknownSwitch(name.to_string()))
    }

    /// Seconds between clock checks, if enabled
    pub fn time_sync_period(&self) -> Result<Option<u32>> {
        interval_seconds("time_sync_interval", self.time_sync_interval)
    }

    /// Seconds between configuration change checks, if enabled
    pub fn config_refresh_period(&self) -> Result<Option<u32>> {
        interval_seconds("config_refresh_interval", self.config_refresh_interval)
    }

    /// Main loop interval
    pub fn poll_interval(&self) -> Result<Duration> {
        if self.poll_interval_ms == 0 {
            return Err(Error::Config("poll_interval_ms must be positive".to_string()));
        }
        Ok(Duration::from_millis(self.poll_interval_ms))
    }

    /// Errors in settings that are not tied to a switch
    pub fn settings_errors(&self) -> Vec<Error> {
        [
            self.time_sync_period().err(),
            self.config_refresh_period().err(),
            self.poll_interval().err(),
        ]
        .into_iter()
        .flatten()
        .collect()
    }

    /// Transmitter pin of a switch
    pub fn transmitter_gpio(&self, name: &str) -> Result<u32> {
        let switch = self.switch(name)?;
        switch
            .gpio
            .or(self.gpio)
            .ok_or_else(|| Error::Config(format!("switch '{name}' has no transmitter gpio")))
    }

    /// Checks one switch for errors that prevent it from being used
    pub fn check_switch(&self, name: &str) -> Result<()> {
        let switch = self.switch(name)?;
        switch.encoder()?;
        self.transmitter_gpio(name)?;
        switch.schedule()?;
        if switch.has_sun_rules() && self.site().is_none() {
            return Err(Error::MissingCoordinates);
        }
        Ok(())
    }

    /// Per-switch errors. Switches not listed here are usable.
    pub fn validate(&self) -> Vec<(String, Error)> {
        let mut errors: Vec<(String, Error)> = self
            .switches
            .keys()
            .chain(self.rejected.keys())
            .filter_map(|name| self.check_switch(name).err().map(|e| (name.clone(), e)))
            .collect();
        errors.sort_by(|a, b| a.0.cmp(&b.0));
        errors
    }

    /// Suspicious but usable settings
    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        for (name, switch) in &self.switches {
            let invalid = Symbol::invalid_chars(&switch.code);
            if !invalid.is_empty() {
                warnings.push(format!(
                    "switch '{name}': code '{}' contains characters {invalid:?} that will not be transmitted",
                    switch.code
                ));
            }
            if name.is_empty() {
                warnings.push("switch with an empty name cannot be scheduled".to_string());
            }
        }

        let mut buttons: HashMap<u32, Vec<&str>> = HashMap::new();
        for (name, switch) in &self.switches {
            if let Some(pin) = switch.button {
                buttons.entry(pin).or_default().push(name);
            }
        }
        let mut shared: Vec<_> = buttons.into_iter().filter(|(_, names)| names.len() > 1).collect();
        shared.sort();
        for (pin, names) in shared {
            warnings.push(format!(
                "button pin {pin} is shared by {}; only the first will react",
                names.join(", ")
            ));
        }

        for (name, switch) in &self.switches {
            let Ok(gpio) = self.transmitter_gpio(name) else {
                continue;
            };
            if switch.button == Some(gpio) {
                warnings.push(format!(
                    "switch '{name}': button pin {gpio} is also the transmitter pin"
                ));
            }
            if switch.debug_gpio == Some(gpio) {
                warnings.push(format!(
                    "switch '{name}': debug pin {gpio} is also the transmitter pin"
                ));
            }
        }

        warnings
    }
}

/// Converts an interval in minutes to seconds
fn interval_seconds(setting: &str, minutes: Option<u32>) -> Result<Option<u32>> {
    match minutes {
        None => Ok(None),
        Some(0) => Err(Error::Config(format!("{setting} must be positive"))),
        Some(minutes) => minutes
            .checked_mul(60)
            .map(Some)
            .ok_or_else(|| Error::Config(format!("{setting} of {minutes} minutes is too long"))),
    }
}

impl FromStr for Config {
    type Err = Error;

    /// Parses a configuration. Each switch table is read on its own, so a
    /// malformed switch is recorded in `rejected` instead of failing the file.
    fn from_str(s: &str) -> Result<Self> {
        let mut table: toml::Table = toml::from_str(s)?;
        let switches = match table.remove("switches") {
            Some(toml::Value::Table(switches)) => switches,
            Some(other) => {
                return Err(Error::Config(format!(
                    "'switches' must be a table, found {}",
                    other.type_str()
                )))
            }
            None => toml::Table::new(),
        };

        let mut config: Config = toml::Value::Table(table).try_into()?;
        for (name, value) in switches {
            match value.try_into::<SwitchConfig>() {
                Ok(switch) => {
                    config.switches.insert(name, switch);
                }
                Err(e) => {
                    let reason = format!("switch '{name}' is malformed: {}", e.message());
                    warn!("{}", reason);
                    config.rejected.insert(name, reason);
                }
            }
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::SunAnchor;
    use std::fs;
    use tempfile::tempdir;

    const SAMPLE: &str = r#"
utc_offset_hours = 2
latitude = 52.52
longitude = 13.405
gpio = 17
time_sync_interval = 60

[switches.lamp]
code = "0FF0F0FF"
protocol = 1
button = 27
on = [[7, 0], ["sunset", 0, -30]]
off = [[23, 30]]

[switches.fountain]
code = "1F0F"
protocol = 4
gpio = 22
pulse_length = 200
repeat = 10
off = [["sunrise", 1, 0]]
"#;

    #[test]
    fn parses_sample_configuration() {
        let config: Config = SAMPLE.parse().unwrap();
        assert_eq!(config.utc_offset_hours, 2.0);
        assert_eq!(config.zenith, DEFAULT_ZENITH);
        assert_eq!(config.poll_interval_ms, DEFAULT_POLL_INTERVAL_MS);
        assert_eq!(config.time_sync_interval, Some(60));
        assert_eq!(config.config_refresh_interval, None);
        assert_eq!(config.site(), Some(Site::new(52.52, 13.405)));

        let lamp = config.switch("lamp").unwrap();
        assert_eq!(lamp.repeat, DEFAULT_REPEAT);
        assert_eq!(lamp.button, Some(27));
        assert_eq!(
            lamp.schedule().unwrap().on,
            vec![
                ScheduleRule::Absolute { hour: 7, minute: 0 },
                ScheduleRule::sun_relative(SunAnchor::Sunset, 0, -30),
            ]
        );
        assert_eq!(config.transmitter_gpio("lamp").unwrap(), 17);

        let fountain = config.switch("fountain").unwrap();
        let encoder = fountain.encoder().unwrap();
        assert_eq!(encoder.protocol(), Protocol::Four);
        assert_eq!(encoder.pulse_length_us(), 200);
        assert_eq!(encoder.repeat(), 10);
        assert_eq!(config.transmitter_gpio("fountain").unwrap(), 22);
        assert!(fountain.on.is_empty());

        assert!(config.validate().is_empty());
        assert!(config.warnings().is_empty());
    }

    #[test]
    fn invalid_switch_does_not_affect_others() {
        let text = r#"
gpio = 17

[switches.good]
code = "0F0F"
on = [[8, 0]]

[switches.bad_anchor]
code = "0F0F"
on = [["noon", 0, 0]]

[switches.bad_protocol]
code = "0F0F"
protocol = 7

[switches.no_coordinates]
code = "0F0F"
off = [["sunset", 0, 0]]
"#;
        let config: Config = text.parse().unwrap();
        let errors = config.validate();
        let failed: Vec<&str> = errors.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(failed, vec!["bad_anchor", "bad_protocol", "no_coordinates"]);
        assert!(matches!(errors[0].1, Error::InvalidRule(_)));
        assert!(matches!(errors[1].1, Error::InvalidProtocol(7)));
        assert!(matches!(errors[2].1, Error::MissingCoordinates));
        assert!(config.check_switch("good").is_ok());
    }

    #[test]
    fn out_of_range_absolute_rules_are_rejected() {
        assert!(RuleSpec::Absolute(24, 0).parse().is_err());
        assert!(RuleSpec::Absolute(-1, 0).parse().is_err());
        assert!(RuleSpec::Absolute(23, 59).parse().is_ok());
        assert!(RuleSpec::SunRelative("sunrise".into(), -2, 90).parse().is_ok());
    }

    #[test]
    fn missing_transmitter_pin_is_reported() {
        let config: Config = "[switches.lamp]\ncode = \"0F\"\n".parse().unwrap();
        assert!(matches!(config.transmitter_gpio("lamp"), Err(Error::Config(_))));
        assert!(matches!(config.switch("porch"), Err(Error::UnknownSwitch(_))));
    }

    #[test]
    fn warns_about_typos_and_shared_buttons() {
        let text = r#"
gpio = 17

[switches.a]
code = "0F0X"
button = 5

[switches.b]
code = "0F0F"
button = 5

[switches.c]
code = "0F0F"
button = 17
"#;
        let config: Config = text.parse().unwrap();
        let warnings = config.warnings();
        assert_eq!(warnings.len(), 3, "{warnings:?}");
        assert!(warnings[0].contains("'X'"));
        assert!(warnings[1].contains("button pin 5 is shared by a, b"));
        assert!(warnings[2].contains("transmitter pin"));
    }

    #[test]
    fn rejects_unknown_top_level_keys() {
        assert!("gpio = 1\nunknown = true\n".parse::<Config>().is_err());
        assert!("switches = 3\n".parse::<Config>().is_err());
    }

    #[test]
    fn malformed_switch_tables_are_isolated() {
        let text = r#"
gpio = 17

[switches.good]
code = "0F0F"
on = [[7, 0]]

[switches.short_sun_rule]
code = "0F0F"
on = [["sunset", 1]]

[switches.short_time]
code = "0F0F"
off = [[7]]

[switches.fractional]
code = "0F0F"
on = [[7.5, 0]]

[switches.wide_protocol]
code = "0F0F"
protocol = 300

[switches.typo]
code = "0F0F"
of = [[7, 0]]
"#;
        let config: Config = text.parse().unwrap();
        assert_eq!(config.switches.keys().collect::<Vec<_>>(), vec!["good"]);
        assert!(config.check_switch("good").is_ok());

        let errors = config.validate();
        let failed: Vec<&str> = errors.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(
            failed,
            vec!["fractional", "short_sun_rule", "short_time", "typo", "wide_protocol"]
        );
        assert!(errors.iter().all(|(_, e)| matches!(e, Error::Config(_))));
        assert!(matches!(config.switch("typo"), Err(Error::Config(_))));
    }

    #[test]
    fn intervals_must_be_positive_and_fit() {
        let config: Config = "time_sync_interval = 0\nconfig_refresh_interval = 4294967295\n"
            .parse()
            .unwrap();
        assert!(matches!(config.time_sync_period(), Err(Error::Config(_))));
        assert!(matches!(config.config_refresh_period(), Err(Error::Config(_))));
        assert_eq!(config.settings_errors().len(), 2);

        let config: Config = "time_sync_interval = 90\npoll_interval_ms = 0\n".parse().unwrap();
        assert_eq!(config.time_sync_period().unwrap(), Some(5400));
        assert_eq!(config.config_refresh_period().unwrap(), None);
        assert!(config.poll_interval().is_err());
        assert_eq!(config.settings_errors().len(), 1);

        assert!(SAMPLE.parse::<Config>().unwrap().settings_errors().is_empty());
    }

    #[test]
    fn pulse_length_is_bounded_by_protocol() {
        let text = r#"
gpio = 17

[switches.slow]
code = "0F"
protocol = 3
pulse_length = 100000000

[switches.zero]
code = "0F"
pulse_length = 0

[switches.edge]
code = "0F"
protocol = 3
pulse_length = 60492497
"#;
        let config: Config = text.parse().unwrap();
        let errors = config.validate();
        let failed: Vec<&str> = errors.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(failed, vec!["slow", "zero"]);
        assert!(config.switch("slow").unwrap().encoder().is_err());
        assert_eq!(
            config.switch("edge").unwrap().encoder().unwrap().pulse_length_us(),
            u32::MAX / 71
        );
    }

    #[test]
    fn debug_pin_is_optional() {
        let text = r#"
gpio = 17

[switches.lamp]
code = "0F"
debug_gpio = 2

[switches.porch]
code = "0F"
debug_gpio = 17
"#;
        let config: Config = text.parse().unwrap();
        assert_eq!(config.switch("lamp").unwrap().debug_gpio, Some(2));
        let warnings = config.warnings();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("debug pin 17"));
    }

    #[test]
    fn loads_from_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("rcsock.toml");
        fs::write(&path, SAMPLE).unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.switches.len(), 2);

        let missing = Config::load(&dir.path().join("missing.toml"));
        assert!(matches!(missing, Err(Error::ConfigIo { .. })));
    }
}
