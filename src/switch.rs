/*!
 # Remote sockets

 A named socket bound to a transmitter line, with an optional indicator line
 that is held high while a command is on air.
*/

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::OutputPin;
use tracing::{debug, info, instrument, trace};

use crate::config::Config;
use crate::encoder::PulseEncoder;
use crate::gpio::{SpinDelay, SysfsPin};
use crate::schedule::Action;
use crate::{Error, Result};

/// A remote-controlled socket reachable through a 433 MHz transmitter
pub struct RadioSwitch<P, D> {
    /// Name from the configuration
    name: String,
    /// Data line of the transmitter
    pin: P,
    /// Debug indicator, high for the duration of every transmission
    indicator: Option<P>,
    /// Delay provider used for pulse timing
    delay: D,
    /// Protocol, code word and repetitions of this socket
    encoder: PulseEncoder,
    /// Last commanded power state, used for toggling
    pub is_on: bool,
}

impl<P, D> RadioSwitch<P, D>
where
    P: OutputPin,
    D: DelayNs,
    Error: From<P::Error>,
{
    /// Creates a switch. The socket is assumed off until the first command.
    pub fn new(name: impl Into<String>, pin: P, delay: D, encoder: PulseEncoder) -> Self {
        Self {
            name: name.into(),
            pin,
            indicator: None,
            delay,
            encoder,
            is_on: false,
        }
    }

    /// Adds a debug indicator line
    pub fn with_indicator(mut self, indicator: P) -> Self {
        self.indicator = Some(indicator);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn encoder(&self) -> &PulseEncoder {
        &self.encoder
    }

    /// Turns the socket on
    #[instrument(skip(self), fields(switch = %self.name))]
    pub fn power_on(&mut self) -> Result<()> {
        debug!("Turning socket on");
        self.send_command(Action::On)?;
        self.is_on = true;
        info!("Socket {} powered on", self.name);
        Ok(())
    }

    /// Turns the socket off
    #[instrument(skip(self), fields(switch = %self.name))]
    pub fn power_off(&mut self) -> Result<()> {
        debug!("Turning socket off");
        self.send_command(Action::Off)?;
        self.is_on = false;
        info!("Socket {} powered off", self.name);
        Ok(())
    }

    /// Executes an on or off command
    pub fn apply(&mut self, action: Action) -> Result<()> {
        match action {
            Action::On => self.power_on(),
            Action::Off => self.power_off(),
        }
    }

    /// Flips the power state and returns the command that was sent
    pub fn toggle(&mut self) -> Result<Action> {
        let action = if self.is_on { Action::Off } else { Action::On };
        self.apply(action)?;
        Ok(action)
    }

    /// Encodes the command and transmits it, blocking until done
    fn send_command(&mut self, action: Action) -> Result<()> {
        let train = self.encoder.encode_command(action);
        trace!(
            "Sending {} ({} pulses, {}us)",
            self.encoder.word(action),
            train.len(),
            train.duration_us()
        );
        if let Some(indicator) = self.indicator.as_mut() {
            indicator.set_high()?;
        }
        let sent = self
            .encoder
            .transmit(&train, &mut self.pin, &mut self.delay);
        if let Some(indicator) = self.indicator.as_mut() {
            indicator.set_low()?;
        }
        sent?;
        Ok(())
    }

    /// Consumes the switch and returns the pin, mainly for inspection
    pub fn into_pin(self) -> P {
        self.pin
    }
}

impl RadioSwitch<SysfsPin, SpinDelay> {
    /// Opens the transmitter pin of a configured switch
    #[instrument(skip(config))]
    pub fn from_config(config: &Config, name: &str) -> Result<Self> {
        config.check_switch(name)?;
        let switch_config = config.switch(name)?;
        let encoder = switch_config.encoder()?;
        let pin = SysfsPin::output(config.transmitter_gpio(name)?)?;
        debug!("Using {} with pulse unit {}us", encoder.protocol(), encoder.pulse_length_us());

        let switch = RadioSwitch::new(name, pin, SpinDelay::new(), encoder);
        match switch_config.debug_gpio {
            Some(debug_gpio) => Ok(switch.with_indicator(SysfsPin::output(debug_gpio)?)),
            None => Ok(switch),
        }
    }
}

impl<P, D> std::fmt::Debug for RadioSwitch<P, D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RadioSwitch")
            .field("name", &self.name)
            .field("encoder", &self.encoder)
            .field("indicator", &self.indicator.is_some())
            .field("is_on", &self.is_on)
            .finish()
    }
}
