use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use clap::Parser;
use color_eyre::eyre::{eyre, Result};
use rc_socket::config::{DEFAULT_CONFIG_PATH, DEFAULT_POLL_INTERVAL_MS};
use rc_socket::*;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

/// Exit status asking the supervisor to restart with the changed configuration
const EXIT_CONFIG_CHANGED: i32 = 75;

/// Interval at which button inputs are sampled
const BUTTON_POLL_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Parser)]
#[command(author, version, about = "Scheduling daemon for 433 MHz remote sockets")]
struct Args {
    /// Configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
}

/// Why the main loop stopped
enum Exit {
    Shutdown,
    ConfigChanged,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("RUST_LOG").unwrap_or_else(|_| EnvFilter::new("rc_socket=info")),
        )
        .compact()
        .init();

    color_eyre::install()?;

    let args = Args::parse();
    let config_text = std::fs::read_to_string(&args.config)
        .map_err(|e| eyre!("Could not read {}: {}", args.config.display(), e))?;
    let config: Config = config_text.parse()?;

    for warning in config.warnings() {
        warn!("{}", warning);
    }

    let flags = Arc::new(EventFlags::new());
    let (mut dispatcher, failures) = Dispatcher::from_config(&config, Arc::clone(&flags));
    if dispatcher.switch_names().next().is_none() {
        return Err(eyre!(
            "No usable switches ({} failed to initialize)",
            failures.len()
        ));
    }

    let now = Utc::now();
    let mut timer = CronTable::new();
    let unscheduled = dispatcher.install_all(&mut timer, now.date_naive());
    if !unscheduled.is_empty() {
        warn!("{} switch action(s) left unscheduled", unscheduled.len());
    }
    for (key, period) in [
        (TriggerKey::TimeSync, config.time_sync_period()),
        (TriggerKey::ConfigRefresh, config.config_refresh_period()),
    ] {
        match period {
            Ok(Some(period)) => {
                timer.insert_from_now(period, BTreeSet::from([0]), key, now.timestamp())
            }
            Ok(None) => {}
            Err(e) => error!("{} disabled: {}", key, e),
        }
    }
    timer.poll(now.timestamp());

    for pin in dispatcher.button_pins() {
        tokio::spawn(watch_button(pin, Arc::clone(&flags)));
    }

    // Inform about successful initialization
    println!("OK");

    let period = config.poll_interval().unwrap_or_else(|e| {
        warn!("{}, using {}ms", e, DEFAULT_POLL_INTERVAL_MS);
        Duration::from_millis(DEFAULT_POLL_INTERVAL_MS)
    });
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    let exit = loop {
        tokio::select! {
            _ = ticker.tick() => {
                if run_cycle(&mut dispatcher, &mut timer, &flags, &args.config, &config_text) {
                    break Exit::ConfigChanged;
                }
            }
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) => handle_command(&mut dispatcher, line.trim()),
                Ok(None) => {
                    debug!("stdin closed, commands disabled");
                    stdin_open = false;
                }
                Err(e) => {
                    warn!("Could not read command: {}", e);
                    stdin_open = false;
                }
            },
            _ = &mut shutdown => break Exit::Shutdown,
        }
    };

    match exit {
        Exit::Shutdown => {
            info!("Shutting down");
            Ok(())
        }
        Exit::ConfigChanged => {
            info!("Configuration changed, exiting for restart");
            std::process::exit(EXIT_CONFIG_CHANGED);
        }
    }
}

/// One main loop iteration: drain flags, then fire due triggers.
///
/// Returns true when the configuration file changed.
fn run_cycle(
    dispatcher: &mut Dispatcher<SysfsPin, SpinDelay>,
    timer: &mut CronTable,
    flags: &EventFlags,
    config_path: &Path,
    config_text: &str,
) -> bool {
    if flags.take_config_refresh() {
        match std::fs::read_to_string(config_path) {
            Ok(current) if current != config_text => return true,
            Ok(_) => debug!("Configuration unchanged"),
            Err(e) => warn!("Could not re-read configuration: {}", e),
        }
    }

    if flags.take_time_sync() {
        // the clock itself is disciplined by the system time service
        info!("Clock check: {}", Utc::now().format("%Y-%m-%d %H:%M:%S UTC"));
    }

    if let Err(e) = dispatcher.drain_button() {
        error!("Button action failed: {}", e);
    }

    for fired in timer.poll(Utc::now().timestamp()) {
        if let Err(e) = dispatcher.dispatch(&fired, timer) {
            error!("Trigger {} failed: {}", fired.key, e);
        }
    }

    false
}

/// Handle one stdin command line
fn handle_command(dispatcher: &mut Dispatcher<SysfsPin, SpinDelay>, input: &str) {
    let mut cmd = input.split(':');
    let result = match (cmd.next(), cmd.next()) {
        (Some("on"), Some(switch)) => dispatcher.command(switch.trim(), Action::On),
        (Some("off"), Some(switch)) => dispatcher.command(switch.trim(), Action::Off),
        (Some("toggle"), Some(switch)) => dispatcher.toggle(switch.trim()).map(|_| ()),
        (Some("status"), None) => {
            let states: Vec<String> = dispatcher
                .switch_names()
                .filter_map(|name| dispatcher.switch(name))
                .map(|switch| format!("{}={}", switch.name(), if switch.is_on { "on" } else { "off" }))
                .collect();
            println!("OK {}", states.join(" "));
            return;
        }
        (Some(""), None) => return,
        (Some(other), _) => {
            println!("ERR Unknown command: {other}");
            return;
        }
        (None, _) => {
            println!("ERR No command given");
            return;
        }
    };

    match result {
        Ok(()) => println!("OK"),
        Err(e) => println!("ERR {e}"),
    }
}

/// Sample a button input and raise the button flag on every rising edge
async fn watch_button(pin: u32, flags: Arc<EventFlags>) {
    use embedded_hal::digital::InputPin;

    let mut input = match SysfsPin::input(pin) {
        Ok(input) => input,
        Err(e) => {
            error!("Button on GPIO {} unavailable: {}", pin, e);
            return;
        }
    };

    let mut ticker = interval(BUTTON_POLL_INTERVAL);
    let mut was_high = false;
    loop {
        ticker.tick().await;
        match input.is_high() {
            Ok(high) => {
                if high && !was_high {
                    debug!("Button on GPIO {} pressed", pin);
                    flags.raise_button(pin);
                }
                was_high = high;
            }
            Err(e) => warn!("Could not read button on GPIO {}: {}", pin, e),
        }
    }
}
