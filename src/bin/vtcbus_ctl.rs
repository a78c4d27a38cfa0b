use clap::{App, AppSettings, Arg, ArgMatches, SubCommand};
use colored::*;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use serde_json::{Map, Value};
use std::time::Duration;
use tokio::time::Instant;
use vtcbus::command::{Command, STATUS_RECONFIGURING, STATUS_RESETTING};
use vtcbus::config::{ConfigKey, DEFAULT_MQTT_PORT, DEFAULT_ROOT_TOPIC, MAX_PACKET_SIZE};
use vtcbus::context::Topics;
use vtcbus::measurement::MeasurementRecord;
use vtcbus::status::StatusReport;

const DEFAULT_HOST: &str = "127.0.0.1";

struct Console {
    host: String,
    port: u16,
    topics: Topics,
    format: String,
    timeout: Duration,
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let matches = App::new("vtcbus-ctl")
        .version(env!("CARGO_PKG_VERSION"))
        .author("Field Instrumentation Team")
        .about("⚡ Operator console for VTC capture devices")
        .setting(AppSettings::SubcommandRequiredElseHelp)
        .arg(
            Arg::with_name("broker")
                .short("b")
                .long("broker")
                .value_name("HOST")
                .help("MQTT broker address")
                .takes_value(true)
                .default_value(DEFAULT_HOST)
                .global(true),
        )
        .arg(
            Arg::with_name("port")
                .short("p")
                .long("port")
                .value_name("PORT")
                .help("MQTT broker port")
                .takes_value(true)
                .global(true),
        )
        .arg(
            Arg::with_name("root")
                .long("root")
                .value_name("TOPIC")
                .help("Root topic")
                .takes_value(true)
                .default_value(DEFAULT_ROOT_TOPIC)
                .global(true),
        )
        .arg(
            Arg::with_name("site")
                .short("s")
                .long("site")
                .value_name("SITE")
                .help("Site of the device")
                .takes_value(true)
                .required(true)
                .global(true),
        )
        .arg(
            Arg::with_name("equipment")
                .short("e")
                .long("equipment")
                .value_name("EQUIPMENTID")
                .help("Equipment the device monitors")
                .takes_value(true)
                .required(true)
                .global(true),
        )
        .arg(
            Arg::with_name("client")
                .short("c")
                .long("client")
                .value_name("CLIENTID")
                .help("Client id of the device (required for commands)")
                .takes_value(true)
                .global(true),
        )
        .arg(
            Arg::with_name("format")
                .short("f")
                .long("format")
                .value_name("FORMAT")
                .help("Output format")
                .takes_value(true)
                .possible_values(&["json", "table"])
                .default_value("table")
                .global(true),
        )
        .arg(
            Arg::with_name("timeout")
                .short("t")
                .long("timeout")
                .value_name("SECONDS")
                .help("How long to wait for the device to answer")
                .takes_value(true)
                .default_value("10")
                .global(true),
        )
        .arg(
            Arg::with_name("verbose")
                .short("v")
                .long("verbose")
                .help("Enable verbose output")
                .global(true),
        )
        .subcommand(
            SubCommand::with_name("ping")
                .about("🏓 Request a status report from the device")
        )
        .subcommand(
            SubCommand::with_name("reset")
                .about("🔄 Restart the device")
                .long_about("Restarts the device. Records waiting for delivery are lost.")
                .arg(
                    Arg::with_name("confirm")
                        .long("confirm")
                        .help("Confirm the reset")
                        .required(true)
                )
        )
        .subcommand(
            SubCommand::with_name("configure")
                .about("🛠️  Change stored configuration fields and restart")
                .arg(
                    Arg::with_name("fields")
                        .help("KEY=VALUE pairs, e.g. VTHRESHOLD=130.0")
                        .required(true)
                        .multiple(true)
                        .validator(validate_field)
                )
        )
        .subcommand(
            SubCommand::with_name("monitor")
                .about("📈 Stream measurements and status messages")
                .arg(
                    Arg::with_name("duration")
                        .short("d")
                        .long("duration")
                        .value_name("SECONDS")
                        .help("Monitor duration in seconds (default: infinite)")
                        .takes_value(true)
                )
        )
        .get_matches();

    let console = console_from(&matches)?;
    if console.verbose {
        println!("{}", "⚡ vtcbus-ctl".bright_blue().bold());
        println!("{} {}:{}", "Connecting to".dimmed(), console.host, console.port);
    }

    match matches.subcommand() {
        ("ping", _) => handle_ping(&console).await?,
        ("reset", _) => handle_reset(&console).await?,
        ("configure", Some(sub_matches)) => handle_configure(&console, sub_matches).await?,
        ("monitor", Some(sub_matches)) => handle_monitor(&console, sub_matches).await?,
        _ => println!("{}", "No command specified. Use --help for usage information.".yellow()),
    }

    Ok(())
}

fn console_from(matches: &ArgMatches<'_>) -> Result<Console, Box<dyn std::error::Error>> {
    let port = match matches.value_of("port") {
        Some(port) => port.parse()?,
        None => DEFAULT_MQTT_PORT,
    };
    let site = matches.value_of("site").unwrap_or_default();
    let equipment = matches.value_of("equipment").unwrap_or_default();
    let client = matches.value_of("client").unwrap_or_default();

    Ok(Console {
        host: matches.value_of("broker").unwrap_or(DEFAULT_HOST).to_string(),
        port,
        topics: Topics::new(matches.value_of("root").unwrap_or(DEFAULT_ROOT_TOPIC), site, equipment, client),
        format: matches.value_of("format").unwrap_or("table").to_string(),
        timeout: Duration::from_secs(matches.value_of("timeout").unwrap_or("10").parse()?),
        verbose: matches.is_present("verbose"),
    })
}

fn validate_field(v: String) -> Result<(), String> {
    match v.split_once('=') {
        Some((key, _)) if ConfigKey::parse(key).is_some() => Ok(()),
        Some((key, _)) => Err(format!("Unknown configuration key {key}")),
        None => Err("Fields must be written KEY=VALUE".into()),
    }
}

fn require_client(console: &Console) -> Result<(), Box<dyn std::error::Error>> {
    if console.topics.command.ends_with('/') {
        eprintln!("{} Commands need the device client id, pass {}", "❌".red(), "--client".bright_cyan());
        return Err("missing client id".into());
    }
    Ok(())
}

async fn connect(console: &Console) -> Result<(AsyncClient, EventLoop), Box<dyn std::error::Error>> {
    let client_id = format!("vtcbus-ctl-{}", std::process::id());
    let mut options = MqttOptions::new(client_id, console.host.clone(), console.port);
    options.set_keep_alive(Duration::from_secs(30));
    options.set_max_packet_size(MAX_PACKET_SIZE, MAX_PACKET_SIZE);

    let (client, mut eventloop) = AsyncClient::new(options, 16);
    match tokio::time::timeout(console.timeout, wait_for_connack(&mut eventloop)).await {
        Ok(Ok(())) => Ok((client, eventloop)),
        Ok(Err(e)) => {
            eprintln!("{} Failed to reach broker at {}:{}", "❌".red(), console.host.bright_white(), console.port);
            eprintln!("{} {}", "🔌".yellow(), e.to_string().bright_red());
            Err(e.into())
        }
        Err(_) => {
            eprintln!("{} Broker did not answer within {:?}", "⏰".yellow(), console.timeout);
            Err("connect timeout".into())
        }
    }
}

async fn wait_for_connack(eventloop: &mut EventLoop) -> Result<(), rumqttc::ConnectionError> {
    loop {
        if let Event::Incoming(Packet::ConnAck(_)) = eventloop.poll().await? {
            return Ok(());
        }
    }
}

/// Polls until a message on `topic` satisfies `accept` or the console
/// timeout runs out.
async fn await_message<T, F>(
    console: &Console,
    eventloop: &mut EventLoop,
    topic: &str,
    mut accept: F,
) -> Result<Option<T>, Box<dyn std::error::Error>>
where
    F: FnMut(&str) -> Option<T>,
{
    let deadline = Instant::now() + console.timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let event = match tokio::time::timeout(remaining, eventloop.poll()).await {
            Ok(event) => event?,
            Err(_) => return Ok(None),
        };
        if let Event::Incoming(Packet::Publish(publish)) = event {
            if publish.topic != topic {
                continue;
            }
            let text = String::from_utf8_lossy(&publish.payload);
            if console.verbose {
                println!("{} {}", "←".dimmed(), text.dimmed());
            }
            if let Some(found) = accept(&text) {
                return Ok(Some(found));
            }
        }
    }
}

async fn send(console: &Console, command: &Command) -> Result<(AsyncClient, EventLoop), Box<dyn std::error::Error>> {
    require_client(console)?;
    let (client, eventloop) = connect(console).await?;
    client.subscribe(console.topics.info.clone(), QoS::AtMostOnce).await?;
    client
        .publish(console.topics.command.clone(), QoS::AtMostOnce, false, command.to_json().to_string())
        .await?;
    Ok((client, eventloop))
}

async fn handle_ping(console: &Console) -> Result<(), Box<dyn std::error::Error>> {
    let (_client, mut eventloop) = send(console, &Command::Ping).await?;
    let report = await_message(console, &mut eventloop, &console.topics.info, |text| {
        serde_json::from_str::<StatusReport>(text).ok()
    })
    .await?;

    match report {
        Some(report) => print_status(&report, &console.format),
        None => {
            println!("{} No status report within {:?}", "⏰".yellow(), console.timeout);
            println!("{} Check the site, equipment and client ids", "💡".yellow());
        }
    }
    Ok(())
}

async fn handle_reset(console: &Console) -> Result<(), Box<dyn std::error::Error>> {
    let (_client, mut eventloop) = send(console, &Command::Reset).await?;
    let acknowledged = await_message(console, &mut eventloop, &console.topics.info, |text| {
        (text == STATUS_RESETTING).then_some(())
    })
    .await?;
    print_acknowledgement("Reset", acknowledged.is_some(), &console.format);
    Ok(())
}

async fn handle_configure(console: &Console, matches: &ArgMatches<'_>) -> Result<(), Box<dyn std::error::Error>> {
    let mut fields = Map::new();
    for pair in matches.values_of("fields").into_iter().flatten() {
        if let Some((key, value)) = pair.split_once('=') {
            fields.insert(key.to_string(), Value::String(value.to_string()));
        }
    }
    if console.verbose {
        println!("{} {}", "→".dimmed(), Value::Object(fields.clone()).to_string().dimmed());
    }

    let (_client, mut eventloop) = send(console, &Command::Reconfigure(fields)).await?;
    let acknowledged = await_message(console, &mut eventloop, &console.topics.info, |text| {
        (text == STATUS_RECONFIGURING).then_some(())
    })
    .await?;
    print_acknowledgement("Reconfiguration", acknowledged.is_some(), &console.format);
    Ok(())
}

async fn handle_monitor(console: &Console, matches: &ArgMatches<'_>) -> Result<(), Box<dyn std::error::Error>> {
    let duration = match matches.value_of("duration") {
        Some(secs) => Some(Duration::from_secs(secs.parse()?)),
        None => None,
    };
    let (client, mut eventloop) = connect(console).await?;
    client.subscribe(console.topics.data.clone(), QoS::AtMostOnce).await?;
    client.subscribe(console.topics.info.clone(), QoS::AtMostOnce).await?;

    if console.format == "table" {
        println!("{}", "┌───────────────────────────┬───────────┬───────────┐".bright_white());
        println!("{}", "│ Time                      │ Voltage   │ Current   │".bright_white());
        println!("{}", "├───────────────────────────┼───────────┼───────────┤".bright_white());
    }

    let deadline = duration.map(|d| Instant::now() + d);
    loop {
        let event = match deadline {
            Some(deadline) => match tokio::time::timeout_at(deadline, eventloop.poll()).await {
                Ok(event) => event?,
                Err(_) => break,
            },
            None => eventloop.poll().await?,
        };
        let Event::Incoming(Packet::Publish(publish)) = event else {
            continue;
        };
        let text = String::from_utf8_lossy(&publish.payload);

        if console.format == "json" {
            println!("{}", text);
            continue;
        }
        if publish.topic == console.topics.data {
            match serde_json::from_str::<MeasurementRecord>(&text) {
                Ok(record) => println!(
                    "│ {} │ {:>8}V │ {:>8}A │",
                    record.timestamp,
                    record.voltage.to_string().bright_cyan(),
                    record.current.to_string().bright_white()
                ),
                Err(_) => println!("│ {} │", text.red()),
            }
        } else if let Ok(report) = serde_json::from_str::<StatusReport>(&text) {
            println!(
                "│ {} │ {} {} │",
                report.time,
                "status".bright_green(),
                format!("{} v{}", report.client_id, report.version).dimmed()
            );
        } else {
            println!("│ {} │", text.yellow());
        }
    }

    Ok(())
}

fn print_acknowledgement(action: &str, acknowledged: bool, format: &str) {
    match (format, acknowledged) {
        ("json", _) => println!("{}", serde_json::json!({ "action": action, "acknowledged": acknowledged })),
        (_, true) => println!("{} {} acknowledged, device is restarting", "✅".green(), action.bright_white()),
        (_, false) => {
            println!("{} {} was not acknowledged", "❓".blue(), action.bright_white());
            println!("{} The device may be offline or the ids may not match", "💡".yellow());
        }
    }
}

fn print_status(report: &StatusReport, format: &str) {
    if format == "json" {
        match serde_json::to_string_pretty(report) {
            Ok(text) => println!("{}", text),
            Err(e) => eprintln!("{} {}", "❌".red(), e),
        }
        return;
    }

    println!("\n{}", "📊 Device Status".bright_blue().bold());
    println!("{}", "═══════════════════════════════".bright_blue());
    let rows = [
        ("Time", &report.time),
        ("Version", &report.version),
        ("IP", &report.ip),
        ("DNS", &report.dns),
        ("Gateway", &report.gateway),
        ("Subnet", &report.subnet),
        ("MQTT", &report.mqtt),
        ("NTP", &report.ntp),
        ("Site", &report.site),
        ("Equipment", &report.equipment_id),
        ("Client", &report.client_id),
        ("Threshold", &report.voltage_threshold),
    ];
    for (label, value) in rows {
        println!("{:<10} {}", label.bright_white(), value.bright_cyan());
    }
}
