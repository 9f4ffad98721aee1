use std::path::PathBuf;

use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use color_eyre::eyre::{eyre, Result};
use rc_socket::config::DEFAULT_CONFIG_PATH;
use rc_socket::schedule::{self, format_seconds, local_to_utc_seconds};
use rc_socket::*;
use tracing::{debug, error, info, instrument, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum, Debug)]
enum CommandType {
    On,
    Off,
}

impl From<CommandType> for Action {
    fn from(command: CommandType) -> Self {
        match command {
            CommandType::On => Action::On,
            CommandType::Off => Action::Off,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Turn a socket on
    On {
        /// Switch name from the configuration
        switch: String,
    },
    /// Turn a socket off
    Off {
        /// Switch name from the configuration
        switch: String,
    },
    /// Print the trigger times compiled for a day
    Schedule {
        /// UTC date (YYYY-MM-DD), today if omitted
        #[arg(short, long)]
        date: Option<NaiveDate>,
    },
    /// Print sunrise and sunset
    Sun {
        /// Latitude in degrees, north positive
        #[arg(long, allow_negative_numbers = true)]
        lat: f64,
        /// Longitude in degrees, east positive
        #[arg(long, allow_negative_numbers = true)]
        lon: f64,
        /// Date (YYYY-MM-DD), today if omitted
        #[arg(short, long)]
        date: Option<NaiveDate>,
        /// Sun zenith angle in degrees
        #[arg(short, long, default_value_t = DEFAULT_ZENITH)]
        zenith: f64,
    },
    /// Print the pulse train of a command without transmitting
    Encode {
        /// Switch name from the configuration
        switch: String,
        /// Command to encode
        #[arg(value_enum)]
        command: CommandType,
    },
    /// Validate the configuration
    Check,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("RUST_LOG").unwrap_or_else(|_| EnvFilter::new("rc_socket=info")),
        )
        .compact()
        .init();

    color_eyre::install()?;

    let cli = Cli::parse();
    debug!("Parsed command line arguments");

    match cli.command {
        Commands::On { switch } => {
            let config = Config::load(&cli.config)?;
            RadioSwitch::from_config(&config, &switch)?.power_on()?;
        }
        Commands::Off { switch } => {
            let config = Config::load(&cli.config)?;
            RadioSwitch::from_config(&config, &switch)?.power_off()?;
        }
        Commands::Schedule { date } => {
            let config = Config::load(&cli.config)?;
            print_schedule(&config, date.unwrap_or_else(|| Utc::now().date_naive()));
        }
        Commands::Sun {
            lat,
            lon,
            date,
            zenith,
        } => {
            let date = date.unwrap_or_else(|| Utc::now().date_naive());
            let site = Site::new(lat, lon);
            for kind in [SunEventKind::Sunrise, SunEventKind::Sunset] {
                println!("{:?}: {}", kind, describe(site.event(date, kind, zenith)));
            }
        }
        Commands::Encode { switch, command } => {
            let config = Config::load(&cli.config)?;
            let encoder = config.switch(&switch)?.encoder()?;
            let action = Action::from(command);
            let train = encoder.encode_command(action);

            println!(
                "{} {} -> {} ({}, {} repetitions)",
                switch,
                action,
                encoder.word(action),
                encoder.protocol(),
                encoder.repeat()
            );
            for pulse in train.pulses() {
                println!("{:?}\t{}\t{}", pulse.kind, pulse.high_us, pulse.low_us);
            }
            println!(
                "{} pulses, {} sync, {}us total",
                train.len(),
                train.sync_count(),
                train.duration_us()
            );
        }
        Commands::Check => {
            let config = Config::load(&cli.config)?;
            for warning in config.warnings() {
                warn!("{}", warning);
            }
            let settings = config.settings_errors();
            for e in &settings {
                error!("{}", e);
            }
            let errors = config.validate();
            for (name, e) in &errors {
                error!("Switch {}: {}", name, e);
            }
            if !errors.is_empty() || !settings.is_empty() {
                return Err(eyre!(
                    "{} switch(es) and {} setting(s) misconfigured",
                    errors.len(),
                    settings.len()
                ));
            }
            info!("Configuration OK ({} switches)", config.switches.len());
        }
    }

    Ok(())
}

/// Human readable sun event
fn describe(event: SunEvent) -> String {
    match event {
        SunEvent::At { date, hour, minute } => format!("{date} {hour:02}:{minute:02} UTC"),
        SunEvent::NeverRises => "the sun does not rise".to_string(),
        SunEvent::NeverSets => "the sun does not set".to_string(),
    }
}

/// Print compiled trigger times of every switch action
#[instrument(skip(config))]
fn print_schedule(config: &Config, date: NaiveDate) {
    let context = config.schedule_context();
    // UTC back to local is the same wrap with the offset negated
    let to_local = |utc: u32| local_to_utc_seconds(utc, -config.utc_offset_hours);

    for reason in config.rejected.values() {
        println!("{reason}");
    }

    for (name, switch) in &config.switches {
        let rules = match switch.schedule() {
            Ok(rules) => rules,
            Err(e) => {
                println!("{name}: {e}");
                continue;
            }
        };

        for action in Action::ALL {
            let key = TriggerKey::action(name.as_str(), action);
            match schedule::compile(rules.rules(action), date, &context) {
                Ok(compiled) if compiled.times.is_empty() => {}
                Ok(compiled) => {
                    let times: Vec<String> = compiled
                        .times
                        .iter()
                        .map(|t| {
                            format!(
                                "{} UTC ({} local)",
                                format_seconds(*t),
                                format_seconds(to_local(*t))
                            )
                        })
                        .collect();
                    println!(
                        "{key}: {}{}",
                        times.join(", "),
                        if compiled.needs_refresh {
                            " [refreshed daily]"
                        } else {
                            ""
                        }
                    );
                }
                Err(e) => println!("{key}: {e}"),
            }
        }
    }
}
