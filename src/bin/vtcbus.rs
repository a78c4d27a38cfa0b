use clap::{App, Arg, ArgMatches};
use colored::*;
use std::time::Duration;
use tracing::{error, info, warn};
use vtcbus::config::{FileConfigStore, Settings};
use vtcbus::device::run_device;
use vtcbus::prompt::{run_boot_prompt, LineReader, PromptOutcome};
use vtcbus::publisher::DeviceExit;
use vtcbus::sampler::{SimulatedChannels, SimulationProfile};

const DEFAULT_CONFIG_PATH: &str = "vtcbus.json";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let matches = cli().get_matches();

    let settings = settings_from(&matches)?;
    settings.validate()?;

    let mut store = FileConfigStore::new(matches.value_of("config").unwrap_or(DEFAULT_CONFIG_PATH));
    info!(path = %store.path().display(), "using configuration store");

    if !matches.is_present("no-prompt") {
        let timeout = settings.prompt_timeout;
        let (returned, outcome) = tokio::task::spawn_blocking(move || {
            // The console reader is dropped with this closure, handing stdin back.
            let outcome = LineReader::stdin().map_err(Into::into).and_then(|reader| {
                run_boot_prompt(&reader, &mut std::io::stdout(), &mut store, timeout)
            });
            (store, outcome)
        })
        .await?;
        store = returned;
        match outcome {
            Ok(PromptOutcome::Committed(keys)) => info!(updated = keys.len(), "console update applied"),
            Ok(other) => info!(outcome = ?other, "continuing with stored configuration"),
            Err(e) => warn!(error = %e, "config prompt failed"),
        }
    }

    let mut profile = SimulationProfile::default();
    if let Some(p) = matches.value_of("spike-probability") {
        profile.spike_probability = p.parse()?;
    }
    let channels = match matches.value_of("seed") {
        Some(seed) => SimulatedChannels::seeded(profile, seed.parse()?),
        None => SimulatedChannels::new(profile),
    };

    match run_device(Box::new(store), channels, &settings).await {
        Ok(DeviceExit::Restart) => {
            println!("{}", "🔄 Restarting device...".yellow());
            let e = restart();
            error!(error = %e, "restart failed");
            Err(e.into())
        }
        Err(e) => {
            error!(error = %e, "device failed to boot");
            Err(e.into())
        }
    }
}

fn cli() -> App<'static, 'static> {
    App::new("vtcbus")
        .version(env!("CARGO_PKG_VERSION"))
        .author("Field Instrumentation Team")
        .about("⚡ Voltage excursion capture device with MQTT delivery")
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .value_name("PATH")
                .help("Persistent device configuration document")
                .takes_value(true)
                .default_value(DEFAULT_CONFIG_PATH),
        )
        .arg(
            Arg::with_name("window")
                .long("window")
                .value_name("RECORDS")
                .help("Rolling window capacity")
                .takes_value(true)
                .validator(is_number),
        )
        .arg(
            Arg::with_name("delivery")
                .long("delivery")
                .value_name("RECORDS")
                .help("Delivery buffer capacity")
                .takes_value(true)
                .validator(is_number),
        )
        .arg(
            Arg::with_name("override-range")
                .long("override-range")
                .value_name("SAMPLES")
                .help("Samples captured after each threshold crossing")
                .takes_value(true)
                .validator(is_number),
        )
        .arg(
            Arg::with_name("reconnect-interval")
                .long("reconnect-interval")
                .value_name("SECONDS")
                .help("Wait between broker connection attempts")
                .takes_value(true)
                .validator(is_number),
        )
        .arg(
            Arg::with_name("reconnect-jitter")
                .long("reconnect-jitter")
                .value_name("MS")
                .help("Random extra wait added to each reconnect")
                .takes_value(true)
                .validator(is_number),
        )
        .arg(
            Arg::with_name("mqtt-port")
                .long("mqtt-port")
                .value_name("PORT")
                .help("Broker port")
                .takes_value(true)
                .validator(is_number),
        )
        .arg(
            Arg::with_name("mqtt-user")
                .long("mqtt-user")
                .value_name("USER")
                .help("Broker username")
                .takes_value(true)
                .requires("mqtt-password"),
        )
        .arg(
            Arg::with_name("mqtt-password")
                .long("mqtt-password")
                .value_name("PASSWORD")
                .help("Broker password")
                .takes_value(true)
                .requires("mqtt-user"),
        )
        .arg(
            Arg::with_name("root-topic")
                .long("root-topic")
                .value_name("TOPIC")
                .help("First level of every topic")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("utc-offset")
                .long("utc-offset")
                .value_name("HOURS")
                .help("Local time offset applied to timestamps")
                .takes_value(true)
                .allow_hyphen_values(true),
        )
        .arg(
            Arg::with_name("no-prompt")
                .long("no-prompt")
                .help("Skip the boot-time configuration prompt"),
        )
        .arg(
            Arg::with_name("spike-probability")
                .long("spike-probability")
                .value_name("P")
                .help("Chance per sample of a simulated excursion")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("seed")
                .long("seed")
                .value_name("SEED")
                .help("Seed for the simulated analog front end")
                .takes_value(true)
                .validator(is_number),
        )
        .arg(
            Arg::with_name("ntp-timeout")
                .long("ntp-timeout")
                .value_name("MS")
                .help("Wait for the time server's reply")
                .takes_value(true)
                .validator(is_number),
        )
        .arg(
            Arg::with_name("poll-timeout")
                .long("poll-timeout")
                .value_name("MS")
                .help("Longest wait for broker traffic per publisher cycle")
                .takes_value(true)
                .validator(is_number),
        )
        .arg(
            Arg::with_name("restart-delay")
                .long("restart-delay")
                .value_name("MS")
                .help("Time given to outgoing messages before a restart")
                .takes_value(true)
                .validator(is_number),
        )
        .arg(
            Arg::with_name("prompt-timeout")
                .long("prompt-timeout")
                .value_name("SECONDS")
                .help("Wait for each answer at the boot prompt")
                .takes_value(true)
                .validator(is_number),
        )
}

fn is_number(v: String) -> Result<(), String> {
    match v.parse::<u64>() {
        Ok(_) => Ok(()),
        Err(_) => Err("Value must be a non-negative number".into()),
    }
}

fn settings_from(matches: &ArgMatches<'_>) -> Result<Settings, Box<dyn std::error::Error>> {
    let mut settings = Settings::default();

    if let Some(v) = matches.value_of("window") {
        settings.window_capacity = v.parse()?;
    }
    if let Some(v) = matches.value_of("delivery") {
        settings.delivery_capacity = v.parse()?;
    }
    if let Some(v) = matches.value_of("override-range") {
        settings.override_range = v.parse()?;
    }
    if let Some(v) = matches.value_of("reconnect-interval") {
        settings.reconnect_interval = Duration::from_secs(v.parse()?);
    }
    if let Some(v) = matches.value_of("reconnect-jitter") {
        settings.reconnect_jitter = Duration::from_millis(v.parse()?);
    }
    if let Some(v) = matches.value_of("mqtt-port") {
        settings.mqtt_port = v.parse()?;
    }
    if let (Some(user), Some(password)) = (matches.value_of("mqtt-user"), matches.value_of("mqtt-password")) {
        settings.mqtt_credentials = Some((user.to_string(), password.to_string()));
    }
    if let Some(v) = matches.value_of("root-topic") {
        settings.root_topic = v.to_string();
    }
    if let Some(v) = matches.value_of("utc-offset") {
        settings.utc_offset_hours = v.parse()?;
    }
    if let Some(v) = matches.value_of("ntp-timeout") {
        settings.ntp_timeout = Duration::from_millis(v.parse()?);
    }
    if let Some(v) = matches.value_of("poll-timeout") {
        settings.poll_timeout = Duration::from_millis(v.parse()?);
    }
    if let Some(v) = matches.value_of("restart-delay") {
        settings.restart_delay = Duration::from_millis(v.parse()?);
    }
    if let Some(v) = matches.value_of("prompt-timeout") {
        settings.prompt_timeout = Duration::from_secs(v.parse()?);
    }

    Ok(settings)
}

/// Replaces the running process with a fresh copy of itself. Only returns
/// on failure.
#[cfg(unix)]
fn restart() -> std::io::Error {
    use std::os::unix::process::CommandExt;

    match std::env::current_exe() {
        Ok(exe) => std::process::Command::new(exe).args(std::env::args_os().skip(1)).exec(),
        Err(e) => e,
    }
}

#[cfg(not(unix))]
fn restart() -> std::io::Error {
    let spawned = std::env::current_exe()
        .and_then(|exe| std::process::Command::new(exe).args(std::env::args_os().skip(1)).spawn());
    match spawned {
        Ok(_) => std::process::exit(0),
        Err(e) => e,
    }
}
