/*!
 # 433 MHz Remote Socket Controller Library

 A Rust library for switching cheap 433 MHz remote-controlled power sockets
 from a GPIO line, on a daily schedule that can follow sunrise and sunset.

 ## Features

 * OOK pulse train encoding for the common tri-state socket protocols (1-4)
 * Bit-banged transmission over any `embedded-hal` output pin
 * Sunrise/sunset approximation for any coordinate
 * Daily schedule compilation with absolute and sun-relative rules
 * Self-refreshing trigger table for sun-relative schedules
 * Physical toggle buttons

 ## Example

 ```rust,no_run
 use rc_socket::*;

 fn main() -> Result<()> {
     let pin = SysfsPin::output(17)?;
     let mut socket = RadioSwitch::new(
         "lamp",
         pin,
         SpinDelay::new(),
         PulseEncoder::new(Protocol::One, "0FF0F0FF", None, 8),
     );

     socket.power_on()?;
     socket.power_off()?;

     Ok(())
 }
 ```
*/

use thiserror::Error;

/// Custom error types for the remote socket controller library
#[derive(Error, Debug)]
pub enum Error {
    /// Protocol variant outside the supported range
    #[error("Unsupported protocol variant {0} (expected 1-4)")]
    InvalidProtocol(u8),

    /// Schedule rule that cannot be interpreted
    #[error("Invalid schedule rule: {0}")]
    InvalidRule(String),

    /// Sun-relative rule compiled without coordinates
    #[error("Sun-relative rules require 'latitude' and 'longitude' to be configured")]
    MissingCoordinates,

    /// Switch name not present in the configuration
    #[error("Unknown switch: {0}")]
    UnknownSwitch(String),

    /// Trigger key that does not follow the `{switch}_{on|off}` layout
    #[error("Malformed trigger key: {0}")]
    MalformedKey(String),

    /// GPIO access failure
    #[error("GPIO {pin}: {source}")]
    Gpio {
        pin: u32,
        #[source]
        source: std::io::Error,
    },

    /// Configuration could not be read
    #[error("Could not read configuration {path}: {source}")]
    ConfigIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Configuration is not valid TOML or does not match the schema
    #[error(transparent)]
    ConfigParse(#[from] toml::de::Error),

    /// Configuration is structurally valid but inconsistent
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl From<std::convert::Infallible> for Error {
    fn from(e: std::convert::Infallible) -> Self {
        match e {}
    }
}

pub type Result<T> = std::result::Result<T, Error>;

pub mod config;
pub mod dispatcher;
pub mod encoder;
pub mod flags;
pub mod gpio;
pub mod protocol;
pub mod schedule;
pub mod sun;
pub mod switch;
pub mod timer;

pub use config::{Config, RuleSpec, SwitchConfig};
pub use dispatcher::Dispatcher;
pub use encoder::{Pulse, PulseEncoder, PulseTrain, Symbol};
pub use flags::EventFlags;
pub use gpio::{SpinDelay, SysfsPin};
pub use protocol::{Protocol, ProtocolTiming, Protocols, PROTOCOLS};
pub use schedule::{
    Action, CompiledSchedule, ScheduleContext, ScheduleRule, SunAnchor, SwitchSchedule, TriggerKey,
};
pub use sun::{Site, SunEvent, SunEventKind, DEFAULT_ZENITH};
pub use switch::RadioSwitch;
pub use timer::{CronTable, Fired, TimerSubstrate, PERIOD_DAY};
