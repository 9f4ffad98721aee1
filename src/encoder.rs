/*!
 # OOK pulse train encoding

 Converts tri-state code words (`0`, `1`, `F`) into the high/low pulse
 sequence understood by 433 MHz socket receivers, and plays such a sequence
 on an output pin.
*/

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::OutputPin;
use tracing::{instrument, trace};

use crate::protocol::Protocol;
use crate::schedule::Action;

/// Number of code word repetitions used when the configuration gives none
pub const DEFAULT_REPEAT: u32 = 8;

/// One tri-state code symbol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Symbol {
    Zero,
    One,
    Float,
}

impl Symbol {
    /// Parses a code character. Anything outside `0`, `1`, `F`/`f` yields `None`.
    pub fn from_char(c: char) -> Option<Symbol> {
        match c {
            '0' => Some(Symbol::Zero),
            '1' => Some(Symbol::One),
            'F' | 'f' => Some(Symbol::Float),
            _ => None,
        }
    }

    /// The two (high, low) pulse pairs of this symbol, in pulse units
    pub fn waveform(self) -> [(u32, u32); 2] {
        match self {
            Symbol::Zero => [(1, 3), (1, 3)],
            Symbol::One => [(3, 1), (3, 1)],
            Symbol::Float => [(1, 3), (3, 1)],
        }
    }

    /// Longest phase of any symbol, in pulse units
    pub const LONGEST_PHASE: u32 = 3;

    /// Characters of `code` that are not valid symbols and would be skipped
    pub fn invalid_chars(code: &str) -> Vec<char> {
        code.chars()
            .filter(|c| Symbol::from_char(*c).is_none())
            .collect()
    }
}

/// Whether a pulse frames a repetition or carries code data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PulseKind {
    Sync,
    Data,
}

/// A single high phase followed by a low phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pulse {
    pub kind: PulseKind,
    /// High time in microseconds
    pub high_us: u32,
    /// Low time in microseconds
    pub low_us: u32,
}

impl Pulse {
    pub fn duration_us(&self) -> u64 {
        u64::from(self.high_us) + u64::from(self.low_us)
    }
}

/// Complete pulse sequence for one transmission
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PulseTrain {
    pulses: Vec<Pulse>,
}

impl PulseTrain {
    pub fn pulses(&self) -> &[Pulse] {
        &self.pulses
    }

    pub fn len(&self) -> usize {
        self.pulses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pulses.is_empty()
    }

    /// Number of sync pulses in the train
    pub fn sync_count(&self) -> usize {
        self.pulses
            .iter()
            .filter(|p| p.kind == PulseKind::Sync)
            .count()
    }

    /// Number of data pulse pairs in the train
    pub fn data_count(&self) -> usize {
        self.pulses
            .iter()
            .filter(|p| p.kind == PulseKind::Data)
            .count()
    }

    /// Total time the transmission occupies the pin
    pub fn duration_us(&self) -> u64 {
        self.pulses.iter().map(Pulse::duration_us).sum()
    }

    fn push(&mut self, kind: PulseKind, unit: u32, (high, low): (u32, u32)) {
        self.pulses.push(Pulse {
            kind,
            high_us: unit.saturating_mul(high),
            low_us: unit.saturating_mul(low),
        });
    }
}

/// Encoder for one socket: protocol, code word, pulse unit and repetitions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PulseEncoder {
    protocol: Protocol,
    code: String,
    pulse_length_us: u32,
    repeat: u32,
}

impl PulseEncoder {
    /// Creates an encoder. `pulse_length_us` overrides the protocol's pulse unit.
    pub fn new(
        protocol: Protocol,
        code: impl Into<String>,
        pulse_length_us: Option<u32>,
        repeat: u32,
    ) -> Self {
        Self {
            protocol,
            code: code.into(),
            pulse_length_us: pulse_length_us.unwrap_or(protocol.timing().pulse_length_us),
            repeat,
        }
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn pulse_length_us(&self) -> u32 {
        self.pulse_length_us
    }

    pub fn repeat(&self) -> u32 {
        self.repeat
    }

    /// Largest pulse unit whose longest phase still fits a `u32` of microseconds
    pub fn max_pulse_length_us(protocol: Protocol) -> u32 {
        let longest = protocol.timing().sync.1.max(Symbol::LONGEST_PHASE);
        u32::MAX / longest
    }

    /// Full code word sent for a command: the code followed by the protocol suffix
    pub fn word(&self, action: Action) -> String {
        format!("{}{}", self.code, self.protocol.suffix(action))
    }

    /// Pulse train for a command
    pub fn encode_command(&self, action: Action) -> PulseTrain {
        self.encode(&self.word(action))
    }

    /// Encodes an arbitrary word.
    ///
    /// The train starts with a sync pulse and every repetition of the word is
    /// followed by another one, so a train holds `repeat + 1` sync pulses.
    /// Characters that are not code symbols are skipped.
    pub fn encode(&self, word: &str) -> PulseTrain {
        let unit = self.pulse_length_us;
        let sync = self.protocol.timing().sync;
        let symbols: Vec<Symbol> = word.chars().filter_map(Symbol::from_char).collect();

        let mut train = PulseTrain {
            pulses: Vec::with_capacity(1 + self.repeat as usize * (symbols.len() * 2 + 1)),
        };

        train.push(PulseKind::Sync, unit, sync);
        for _ in 0..self.repeat {
            for symbol in &symbols {
                for pair in symbol.waveform() {
                    train.push(PulseKind::Data, unit, pair);
                }
            }
            train.push(PulseKind::Sync, unit, sync);
        }

        train
    }

    /// Plays a pulse train on the pin. Blocks until the last low phase has elapsed.
    #[instrument(skip_all, fields(pulses = train.len()))]
    pub fn transmit<P, D>(&self, train: &PulseTrain, pin: &mut P, delay: &mut D) -> Result<(), P::Error>
    where
        P: OutputPin,
        D: DelayNs,
    {
        for pulse in train.pulses() {
            pin.set_high()?;
            delay.delay_us(pulse.high_us);
            pin.set_low()?;
            delay.delay_us(pulse.low_us);
        }
        trace!("Transmitted {}us of pulses", train.duration_us());
        Ok(())
    }
}
