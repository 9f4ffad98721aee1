/*!
 # Linux GPIO backend

 Sysfs-backed digital pins and a busy-wait delay provider implementing the
 `embedded-hal` traits the encoder is generic over.
*/

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{ErrorKind, ErrorType, InputPin, OutputPin};
use tracing::{debug, instrument};

/// Default sysfs GPIO root
pub const SYSFS_GPIO_ROOT: &str = "/sys/class/gpio";

/// Pin direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    In,
    Out,
}

impl Direction {
    fn as_str(self) -> &'static str {
        match self {
            Direction::In => "in",
            Direction::Out => "out",
        }
    }
}

/// I/O failure on a sysfs pin
#[derive(Debug)]
pub struct GpioError {
    pub pin: u32,
    pub source: std::io::Error,
}

impl std::fmt::Display for GpioError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "GPIO {}: {}", self.pin, self.source)
    }
}

impl std::error::Error for GpioError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

impl embedded_hal::digital::Error for GpioError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Other
    }
}

impl From<GpioError> for crate::Error {
    fn from(e: GpioError) -> Self {
        crate::Error::Gpio {
            pin: e.pin,
            source: e.source,
        }
    }
}

/// A GPIO line driven through `/sys/class/gpio`
///
/// The value file stays open for the lifetime of the pin so that toggling
/// costs a single write.
#[derive(Debug)]
pub struct SysfsPin {
    pin: u32,
    direction: Direction,
    value: File,
}

impl SysfsPin {
    /// Exports `pin` and configures it as an output, initially low
    pub fn output(pin: u32) -> crate::Result<Self> {
        Self::open_at(Path::new(SYSFS_GPIO_ROOT), pin, Direction::Out)
    }

    /// Exports `pin` and configures it as an input
    pub fn input(pin: u32) -> crate::Result<Self> {
        Self::open_at(Path::new(SYSFS_GPIO_ROOT), pin, Direction::In)
    }

    /// Opens a pin below an arbitrary sysfs root
    #[instrument]
    pub fn open_at(root: &Path, pin: u32, direction: Direction) -> crate::Result<Self> {
        let err = |source| GpioError { pin, source };
        let dir: PathBuf = root.join(format!("gpio{pin}"));

        if !dir.exists() {
            debug!("Exporting GPIO {}", pin);
            fs::write(root.join("export"), pin.to_string()).map_err(err)?;
        }

        fs::write(dir.join("direction"), direction.as_str()).map_err(err)?;

        let value = OpenOptions::new()
            .read(true)
            .write(direction == Direction::Out)
            .open(dir.join("value"))
            .map_err(err)?;

        let mut pin = SysfsPin {
            pin,
            direction,
            value,
        };
        if direction == Direction::Out {
            pin.write_level(false)?;
        }

        debug!("GPIO {} ready as {}", pin.pin, direction.as_str());
        Ok(pin)
    }

    pub fn number(&self) -> u32 {
        self.pin
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    fn write_level(&mut self, high: bool) -> Result<(), GpioError> {
        let level: &[u8] = if high { b"1" } else { b"0" };
        self.value
            .write_all(level)
            .map_err(|source| GpioError {
                pin: self.pin,
                source,
            })
    }

    fn read_level(&mut self) -> Result<bool, GpioError> {
        let err = |source| GpioError {
            pin: self.pin,
            source,
        };
        let mut buf = String::with_capacity(2);
        self.value.seek(SeekFrom::Start(0)).map_err(err)?;
        self.value.read_to_string(&mut buf).map_err(err)?;
        Ok(buf.trim() == "1")
    }
}

impl ErrorType for SysfsPin {
    type Error = GpioError;
}

impl OutputPin for SysfsPin {
    fn set_low(&mut self) -> Result<(), GpioError> {
        self.write_level(false)
    }

    fn set_high(&mut self) -> Result<(), GpioError> {
        self.write_level(true)
    }
}

impl InputPin for SysfsPin {
    fn is_high(&mut self) -> Result<bool, GpioError> {
        self.read_level()
    }

    fn is_low(&mut self) -> Result<bool, GpioError> {
        self.read_level().map(|high| !high)
    }
}

/// Busy-wait delay provider
///
/// Spins on the monotonic clock instead of sleeping; a scheduler sleep is far
/// too coarse for pulse widths of a few hundred microseconds.
#[derive(Debug, Clone, Copy, Default)]
pub struct SpinDelay;

impl SpinDelay {
    pub fn new() -> Self {
        SpinDelay
    }
}

impl DelayNs for SpinDelay {
    fn delay_ns(&mut self, ns: u32) {
        let deadline = Instant::now() + Duration::from_nanos(u64::from(ns));
        while Instant::now() < deadline {
            std::hint::spin_loop();
        }
    }
}
