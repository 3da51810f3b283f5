use clap::{App, Arg, SubCommand};
use colored::*;
use firefleet::agent::UnitAgent;
use firefleet::protocol::{decode_frame, encode_frame, Ack, AckStatus, Frame, Message};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: &str = "7600";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let matches = App::new("fleetctl")
        .version("0.1.0")
        .author("Field Robotics Team")
        .about("🚁 Fleet control - direct command channel to a unit agent")
        .arg(
            Arg::with_name("host")
                .short("h")
                .long("host")
                .value_name("HOST")
                .help("Unit agent host address")
                .takes_value(true)
                .default_value(DEFAULT_HOST)
                .global(true),
        )
        .arg(
            Arg::with_name("port")
                .short("p")
                .long("port")
                .value_name("PORT")
                .help("Unit agent port")
                .takes_value(true)
                .default_value(DEFAULT_PORT)
                .global(true),
        )
        .arg(
            Arg::with_name("json")
                .long("json")
                .help("Print raw JSON responses")
                .global(true),
        )
        .subcommand(
            SubCommand::with_name("ping")
                .about("🏓 Heartbeat the unit agent")
                .long_about("Sends a heartbeat frame to verify the unit agent is responsive"),
        )
        .subcommand(
            SubCommand::with_name("status")
                .about("📊 Request an immediate status report")
                .long_about("Requests position, battery, phase, and active task from the unit"),
        )
        .subcommand(
            SubCommand::with_name("abort")
                .about("🛑 Abort the active mission and recall the unit"),
        )
        .subcommand(
            SubCommand::with_name("rtl")
                .about("🏠 Return to launch regardless of mission state"),
        )
        .subcommand(
            SubCommand::with_name("land")
                .about("⬇️  Emergency land in place"),
        )
        .subcommand(
            SubCommand::with_name("kill")
                .about("💀 Cut motors immediately (DANGEROUS)")
                .long_about(
                    "Cuts motors mid-air. The unit will fall. Requires the per-unit \
                     confirmation phrase, e.g. --confirm KILL-scout-1 for unit scout-1.",
                )
                .arg(
                    Arg::with_name("unit")
                        .help("Target unit id")
                        .required(true),
                )
                .arg(
                    Arg::with_name("confirm")
                        .long("confirm")
                        .value_name("PHRASE")
                        .help("Typed confirmation phrase (KILL-<unit-id>)")
                        .takes_value(true)
                        .required(true),
                ),
        )
        .get_matches();

    let host = matches.value_of("host").unwrap_or(DEFAULT_HOST);
    let port: u16 = matches.value_of("port").unwrap_or(DEFAULT_PORT).parse()?;
    let json = matches.is_present("json");

    match matches.subcommand() {
        ("ping", _) => {
            let ack = send_request(host, port, Message::Heartbeat).await?;
            if json {
                println!("{}", serde_json::to_string(&ack)?);
            } else if ack.status == AckStatus::Accepted {
                println!("{} {}", "✅".green(), "Unit agent is responsive".bright_green());
            } else {
                print_ack("Ping", &ack);
            }
        }
        ("status", _) => {
            let ack = send_request(host, port, Message::StatusRequest).await?;
            if json {
                println!("{}", serde_json::to_string(&ack)?);
            } else if let Some(report) = &ack.report {
                println!("{}", "📊 Unit Status".bright_blue().bold());
                println!("{} {}", "Unit:".bright_white(), report.unit_id.bright_cyan());
                println!("{} {:?}", "State:".bright_white(), report.state);
                println!(
                    "{} {}",
                    "Task:".bright_white(),
                    report.task_id.as_deref().unwrap_or("none")
                );
                println!(
                    "{} {:.4}, {:.4} @ {:.0} m",
                    "Position:".bright_white(),
                    report.position.lat,
                    report.position.lon,
                    report.position.alt_m
                );
                let battery = format!("{:.0}%", report.battery * 100.0);
                if report.battery > 0.3 {
                    println!("{} {}", "Battery:".bright_white(), battery.bright_green());
                } else {
                    println!("{} {}", "Battery:".bright_white(), battery.bright_red());
                }
            } else {
                print_ack("Status", &ack);
            }
        }
        ("abort", _) => {
            let ack = send_request(host, port, Message::MissionAbort).await?;
            print_ack("Mission abort", &ack);
        }
        ("rtl", _) => {
            let ack = send_request(host, port, Message::Rtl).await?;
            print_ack("Return to launch", &ack);
        }
        ("land", _) => {
            let ack = send_request(host, port, Message::Land).await?;
            print_ack("Emergency land", &ack);
        }
        ("kill", Some(sub_matches)) => {
            let unit = sub_matches.value_of("unit").unwrap_or_default();
            let phrase = sub_matches.value_of("confirm").unwrap_or_default();
            let expected = UnitAgent::kill_token(unit);
            if phrase != expected {
                println!(
                    "{} Confirmation phrase does not match. Nothing was sent.",
                    "❌".red()
                );
                println!(
                    "{} To kill {}, pass: {}",
                    "💡".yellow(),
                    unit.bright_white(),
                    format!("--confirm {}", expected).bright_cyan()
                );
                std::process::exit(1);
            }
            let ack = send_request(
                host,
                port,
                Message::Kill {
                    confirm_token: phrase.to_string(),
                },
            )
            .await?;
            print_ack("Kill", &ack);
        }
        _ => {
            println!(
                "{}",
                "No command specified. Use --help for usage information.".yellow()
            );
            println!("{}", "Quick start:".bright_green());
            println!("  {} Test a unit agent", "fleetctl ping".bright_cyan());
            println!("  {} Request a status report", "fleetctl status".bright_cyan());
            println!("  {} Recall the unit", "fleetctl rtl".bright_cyan());
        }
    }

    Ok(())
}

fn print_ack(action: &str, ack: &Ack) {
    match ack.status {
        AckStatus::Accepted => {
            println!("{} {} acknowledged", "✅".green(), action.bright_white());
        }
        AckStatus::Busy => {
            println!(
                "{} {} refused: unit is busy with an active mission",
                "⏳".yellow(),
                action.bright_white()
            );
        }
        AckStatus::Rejected => {
            println!(
                "{} {} rejected: {}",
                "❌".red(),
                action.bright_white(),
                ack.message.as_deref().unwrap_or("no reason given").bright_red()
            );
        }
    }
}

/// One request/response exchange on a fresh connection. Unsolicited event
/// frames arriving before the response are skipped.
async fn send_request(
    host: &str,
    port: u16,
    message: Message,
) -> Result<Ack, Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", host, port);
    let stream = match TcpStream::connect(&addr).await {
        Ok(stream) => stream,
        Err(e) => {
            eprintln!(
                "{} Failed to connect to unit agent at {}",
                "❌".red(),
                addr.bright_white()
            );
            if e.kind() == std::io::ErrorKind::ConnectionRefused {
                eprintln!("{} Agent is not running. Start it with:", "💡".yellow());
                eprintln!("   {}", "agentd --id scout-1 --port 7600".bright_cyan());
            }
            return Err(e.into());
        }
    };

    let (reader, mut writer) = stream.into_split();
    let seq = 1;
    let line = encode_frame(&Frame::Request { seq, message })?;
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;

    let mut lines = BufReader::new(reader).lines();
    let response = tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(line) = lines.next_line().await? {
            if let Ok(Frame::Response(ack)) = decode_frame(line.trim()) {
                if ack.seq == seq {
                    return Ok(ack);
                }
            }
        }
        Err::<Ack, Box<dyn std::error::Error>>("agent closed the connection".into())
    })
    .await;

    match response {
        Ok(result) => result,
        Err(_) => {
            eprintln!("{} Command timed out after 5 seconds", "⏰".yellow());
            Err("command timeout".into())
        }
    }
}
