/*!
 # Trigger dispatch

 Routes fired timer entries, button presses and manual commands to the
 configured sockets, and re-installs sun-relative schedules when their daily
 refresh trigger fires.
*/

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate};
use embedded_hal::delay::DelayNs;
use embedded_hal::digital::OutputPin;
use tracing::{debug, error, info, instrument, warn};

use crate::config::Config;
use crate::flags::EventFlags;
use crate::gpio::{SpinDelay, SysfsPin};
use crate::schedule::{self, Action, CompiledSchedule, ScheduleContext, SwitchSchedule, TriggerKey};
use crate::switch::RadioSwitch;
use crate::timer::{Fired, TimerSubstrate};
use crate::{Error, Result};

/// Owns all sockets and their schedules
pub struct Dispatcher<P, D> {
    switches: BTreeMap<String, RadioSwitch<P, D>>,
    schedules: BTreeMap<String, SwitchSchedule>,
    /// Button pin to switch name
    buttons: BTreeMap<u32, String>,
    context: ScheduleContext,
    flags: Arc<EventFlags>,
}

impl<P, D> Dispatcher<P, D>
where
    P: OutputPin,
    D: DelayNs,
    Error: From<P::Error>,
{
    pub fn new(context: ScheduleContext, flags: Arc<EventFlags>) -> Self {
        Self {
            switches: BTreeMap::new(),
            schedules: BTreeMap::new(),
            buttons: BTreeMap::new(),
            context,
            flags,
        }
    }

    /// Registers a socket with its rules and optional toggle button
    pub fn add_switch(
        &mut self,
        switch: RadioSwitch<P, D>,
        schedule: SwitchSchedule,
        button: Option<u32>,
    ) {
        let name = switch.name().to_string();
        if let Some(pin) = button {
            match self.buttons.get(&pin) {
                Some(owner) => warn!(
                    "Button pin {} already bound to {}, ignoring it for {}",
                    pin, owner, name
                ),
                None => {
                    self.buttons.insert(pin, name.clone());
                }
            }
        }
        self.schedules.insert(name.clone(), schedule);
        self.switches.insert(name, switch);
    }

    pub fn switch(&self, name: &str) -> Option<&RadioSwitch<P, D>> {
        self.switches.get(name)
    }

    pub fn switch_names(&self) -> impl Iterator<Item = &str> {
        self.switches.keys().map(String::as_str)
    }

    pub fn button_pins(&self) -> Vec<u32> {
        self.buttons.keys().copied().collect()
    }

    pub fn flags(&self) -> &Arc<EventFlags> {
        &self.flags
    }

    /// Compiles and installs every switch action for `date`.
    ///
    /// Failures are logged and returned; they do not stop the other switches
    /// from being scheduled.
    #[instrument(skip(self, timer))]
    pub fn install_all<T: TimerSubstrate>(
        &self,
        timer: &mut T,
        date: NaiveDate,
    ) -> Vec<(TriggerKey, Error)> {
        let mut failures = Vec::new();
        for name in self.switches.keys() {
            for action in Action::ALL {
                if let Err(e) = self.reschedule(timer, name, action, date) {
                    error!("Could not schedule {}_{}: {}", name, action, e);
                    failures.push((TriggerKey::action(name.as_str(), action), e));
                }
            }
        }
        failures
    }

    /// Recompiles one switch action for `date` and replaces its triggers
    pub fn reschedule<T: TimerSubstrate>(
        &self,
        timer: &mut T,
        switch: &str,
        action: Action,
        date: NaiveDate,
    ) -> Result<CompiledSchedule> {
        let rules = self
            .schedules
            .get(switch)
            .ok_or_else(|| Error::UnknownSwitch(switch.to_string()))?
            .rules(action);
        schedule::install(timer, switch, action, rules, date, &self.context)
    }

    /// Handles a fired timer entry
    #[instrument(skip(self, timer), fields(key = %fired.key))]
    pub fn dispatch<T: TimerSubstrate>(&mut self, fired: &Fired, timer: &mut T) -> Result<()> {
        debug!("Trigger fired at {}", fired.at);
        match &fired.key {
            TriggerKey::Action { switch, action } => self.command(switch, *action),
            TriggerKey::Refresh { switch, action } => {
                let date = DateTime::from_timestamp(fired.at, 0)
                    .ok_or_else(|| Error::Config(format!("timestamp {} out of range", fired.at)))?
                    .date_naive();
                info!("Refreshing schedule of {}_{} for {}", switch, action, date);
                self.reschedule(timer, switch, *action, date).map(|_| ())
            }
            TriggerKey::TimeSync => {
                self.flags.raise_time_sync();
                Ok(())
            }
            TriggerKey::ConfigRefresh => {
                self.flags.raise_config_refresh();
                Ok(())
            }
        }
    }

    /// Sends a command to a named socket
    pub fn command(&mut self, switch: &str, action: Action) -> Result<()> {
        self.switches
            .get_mut(switch)
            .ok_or_else(|| Error::UnknownSwitch(switch.to_string()))?
            .apply(action)
    }

    /// Toggles a named socket
    pub fn toggle(&mut self, switch: &str) -> Result<Action> {
        self.switches
            .get_mut(switch)
            .ok_or_else(|| Error::UnknownSwitch(switch.to_string()))?
            .toggle()
    }

    /// Toggles the socket bound to button `pin`.
    ///
    /// Returns `None` when no switch is bound to the pin.
    #[instrument(skip(self))]
    pub fn press_button(&mut self, pin: u32) -> Result<Option<Action>> {
        let Some(name) = self.buttons.get(&pin).cloned() else {
            warn!("Button press on unbound pin {}", pin);
            return Ok(None);
        };
        let action = self.toggle(&name)?;
        info!("Button {} switched {} {}", pin, name, action);
        Ok(Some(action))
    }

    /// Consumes a pending button press, if any
    pub fn drain_button(&mut self) -> Result<Option<Action>> {
        match self.flags.take_button() {
            Some(pin) => self.press_button(pin),
            None => Ok(None),
        }
    }
}

impl Dispatcher<SysfsPin, SpinDelay> {
    /// Opens every configured switch.
    ///
    /// Switches that fail their checks or whose pin cannot be opened are left
    /// out and returned with the reason; the rest are usable.
    pub fn from_config(config: &Config, flags: Arc<EventFlags>) -> (Self, Vec<(String, Error)>) {
        let mut dispatcher = Dispatcher::new(config.schedule_context(), flags);
        let mut failures = Vec::new();

        for (name, reason) in &config.rejected {
            error!("Switch {} disabled: {}", name, reason);
            failures.push((name.clone(), Error::Config(reason.clone())));
        }

        for (name, switch_config) in &config.switches {
            let opened = RadioSwitch::from_config(config, name)
                .and_then(|switch| Ok((switch, switch_config.schedule()?)));
            match opened {
                Ok((switch, schedule)) => {
                    dispatcher.add_switch(switch, schedule, switch_config.button)
                }
                Err(e) => {
                    error!("Switch {} disabled: {}", name, e);
                    failures.push((name.clone(), e));
                }
            }
        }

        (dispatcher, failures)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::PulseEncoder;
    use crate::protocol::Protocol;
    use crate::schedule::{ScheduleRule, SunAnchor};
    use crate::sun::Site;
    use crate::timer::{CronTable, PERIOD_DAY};
    use std::collections::BTreeSet;
    use std::convert::Infallible;

    const DAY0: i64 = 1_718_928_000; // 2024-06-21T00:00:00Z

    struct Line;

    impl embedded_hal::digital::ErrorType for Line {
        type Error = Infallible;
    }

    impl OutputPin for Line {
        fn set_low(&mut self) -> std::result::Result<(), Infallible> {
            Ok(())
        }

        fn set_high(&mut self) -> std::result::Result<(), Infallible> {
            Ok(())
        }
    }

    struct Instant;

    impl DelayNs for Instant {
        fn delay_ns(&mut self, _ns: u32) {}
    }

    fn june_21() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 21).unwrap()
    }

    fn dispatcher() -> Dispatcher<Line, Instant> {
        let context = ScheduleContext::new(2.0, Some(Site::new(52.52, 13.405)));
        let mut dispatcher = Dispatcher::new(context, Arc::new(EventFlags::new()));

        let lamp = RadioSwitch::new(
            "lamp",
            Line,
            Instant,
            PulseEncoder::new(Protocol::One, "0FF0F", None, 2),
        );
        let lamp_schedule = SwitchSchedule {
            on: vec![ScheduleRule::sun_relative(SunAnchor::Sunset, 0, -30)],
            off: vec![ScheduleRule::absolute(23, 0).unwrap()],
        };
        dispatcher.add_switch(lamp, lamp_schedule, Some(27));

        let pump = RadioSwitch::new(
            "garden_pump",
            Line,
            Instant,
            PulseEncoder::new(Protocol::Four, "1F1F", None, 2),
        );
        let pump_schedule = SwitchSchedule {
            on: vec![ScheduleRule::absolute(7, 30).unwrap()],
            off: Vec::new(),
        };
        dispatcher.add_switch(pump, pump_schedule, Some(27));

        dispatcher
    }

    #[test]
    fn install_all_schedules_every_action() {
        let dispatcher = dispatcher();
        let mut timer = CronTable::new();
        assert!(dispatcher.install_all(&mut timer, june_21()).is_empty());

        let keys: Vec<String> = timer.keys().map(ToString::to_string).collect();
        assert_eq!(
            keys,
            vec!["garden_pump_on", "lamp_on", "lamp_off", "refresh_lamp_on"]
        );
        assert_eq!(
            timer.offsets(&TriggerKey::action("lamp", Action::On)),
            Some(&BTreeSet::from([19 * 3600 + 3 * 60]))
        );
    }

    #[test]
    fn action_trigger_switches_socket() {
        let mut dispatcher = dispatcher();
        let mut timer = CronTable::new();
        let fired = Fired {
            key: TriggerKey::action("garden_pump", Action::On),
            at: DAY0 + 19800,
        };

        dispatcher.dispatch(&fired, &mut timer).unwrap();
        assert!(dispatcher.switch("garden_pump").unwrap().is_on);
        assert!(!dispatcher.switch("lamp").unwrap().is_on);
    }

    #[test]
    fn unknown_switch_is_an_error() {
        let mut dispatcher = dispatcher();
        let mut timer = CronTable::new();
        let fired = Fired {
            key: TriggerKey::action("porch", Action::On),
            at: DAY0,
        };
        assert!(matches!(
            dispatcher.dispatch(&fired, &mut timer),
            Err(Error::UnknownSwitch(name)) if name == "porch"
        ));
    }

    #[test]
    fn refresh_trigger_recompiles_for_fired_date() {
        let mut dispatcher = dispatcher();
        let mut timer = CronTable::new();
        dispatcher.install_all(&mut timer, june_21());

        // 2024-12-21T00:00:00Z, Berlin sunset 14:54 UTC
        let fired = Fired {
            key: TriggerKey::refresh("lamp", Action::On),
            at: DAY0 + 183 * 86_400,
        };
        dispatcher.dispatch(&fired, &mut timer).unwrap();

        assert_eq!(
            timer.offsets(&TriggerKey::action("lamp", Action::On)),
            Some(&BTreeSet::from([14 * 3600 + 24 * 60]))
        );
        assert!(timer.contains(&TriggerKey::refresh("lamp", Action::On)));
        assert_eq!(timer.len(), 4);
    }

    #[test]
    fn refresh_cycle_fires_from_timer_table() {
        let mut dispatcher = dispatcher();
        let mut timer = CronTable::new();
        dispatcher.install_all(&mut timer, june_21());
        timer.poll(DAY0 - 10);

        let fired = timer.poll(DAY0 + 86_400);
        let keys: Vec<String> = fired.iter().map(|f| f.key.to_string()).collect();
        assert_eq!(
            keys,
            vec!["garden_pump_on", "lamp_on", "lamp_off", "refresh_lamp_on"]
        );
        for f in &fired {
            dispatcher.dispatch(f, &mut timer).unwrap();
        }
        assert!(dispatcher.switch("garden_pump").unwrap().is_on);
        assert!(!dispatcher.switch("lamp").unwrap().is_on);
    }

    #[test]
    fn periodic_keys_raise_flags() {
        let mut dispatcher = dispatcher();
        let mut timer = CronTable::new();
        timer.insert(PERIOD_DAY, BTreeSet::from([0]), TriggerKey::TimeSync);

        for key in [TriggerKey::TimeSync, TriggerKey::ConfigRefresh] {
            dispatcher.dispatch(&Fired { key, at: DAY0 }, &mut timer).unwrap();
        }
        assert!(dispatcher.flags().take_time_sync());
        assert!(dispatcher.flags().take_config_refresh());
    }

    #[test]
    fn button_toggles_first_bound_switch() {
        let mut dispatcher = dispatcher();
        assert_eq!(dispatcher.button_pins(), vec![27]);

        dispatcher.flags().raise_button(27);
        assert_eq!(dispatcher.drain_button().unwrap(), Some(Action::On));
        assert!(dispatcher.switch("lamp").unwrap().is_on);
        assert_eq!(dispatcher.drain_button().unwrap(), None);

        dispatcher.flags().raise_button(27);
        assert_eq!(dispatcher.drain_button().unwrap(), Some(Action::Off));
        assert!(!dispatcher.switch("lamp").unwrap().is_on);

        assert_eq!(dispatcher.press_button(4).unwrap(), None);
    }

    #[test]
    fn scheduled_commands_update_toggle_state() {
        let mut dispatcher = dispatcher();
        dispatcher.command("lamp", Action::On).unwrap();
        assert_eq!(dispatcher.press_button(27).unwrap(), Some(Action::Off));
        assert_eq!(dispatcher.toggle("lamp").unwrap(), Action::On);
    }
}
