/*!
 # Event flags

 Pending-event cells shared between producers (button watchers, timer
 callbacks) and the main loop. Producers only ever set a flag; the main loop
 only ever takes it, which reads and clears in one step.
*/

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// Sentinel for "no button press pending"
const NO_BUTTON: u32 = 0;

#[derive(Debug, Default)]
pub struct EventFlags {
    /// Pending button pin plus one; a newer press overwrites an older one
    button: AtomicU32,
    time_sync: AtomicBool,
    config_refresh: AtomicBool,
}

impl EventFlags {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a press on the button wired to `pin`
    pub fn raise_button(&self, pin: u32) {
        self.button.store(pin.saturating_add(1), Ordering::Release);
    }

    /// Takes the pending button press, if any
    pub fn take_button(&self) -> Option<u32> {
        match self.button.swap(NO_BUTTON, Ordering::AcqRel) {
            NO_BUTTON => None,
            encoded => Some(encoded - 1),
        }
    }

    pub fn raise_time_sync(&self) {
        self.time_sync.store(true, Ordering::Release);
    }

    pub fn take_time_sync(&self) -> bool {
        self.time_sync.swap(false, Ordering::AcqRel)
    }

    pub fn raise_config_refresh(&self) {
        self.config_refresh.store(true, Ordering::Release);
    }

    pub fn take_config_refresh(&self) -> bool {
        self.config_refresh.swap(false, Ordering::AcqRel)
    }
}
