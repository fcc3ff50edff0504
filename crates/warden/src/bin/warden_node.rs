//! # WARDEN Node
//!
//! Runs a lockstep session from the command line: host or join, exchange a
//! number of idle turns, optionally record them. Or replay a recorded file.
//!
//! ## Usage
//!
//! ```bash
//! warden_node --host --port 5556 --players 2 --ticks 300 --record game.wtrn
//! warden_node --join 127.0.0.1:5556 --ticks 300
//! warden_node --replay game.wtrn
//! ```

use std::time::{Duration, Instant};

use warden::{Record, Role, Session, SessionConfig, SessionError, SessionOptions};
use warden_transport::{TransportConfig, UdpTransport, DEFAULT_PORT};

enum Mode {
    Host,
    Join(String),
    Replay(String),
}

fn main() {
    println!("╔══════════════════════════════════════════════════════════════════╗");
    println!("║         WARDEN LOCKSTEP NODE                                     ║");
    println!("║         ONE TURN, EVERY PLAYER, EVERY TICK                       ║");
    println!("╚══════════════════════════════════════════════════════════════════╝");
    println!();

    let args: Vec<String> = std::env::args().collect();
    let mut mode = Mode::Host;
    let mut port = DEFAULT_PORT;
    let mut players = 2usize;
    let mut ticks = 100u32;
    let mut record: Option<String> = None;
    let mut config_path: Option<String> = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--host" => mode = Mode::Host,
            "--join" | "-j" => {
                if i + 1 < args.len() {
                    mode = Mode::Join(args[i + 1].clone());
                    i += 1;
                }
            }
            "--replay" | "-r" => {
                if i + 1 < args.len() {
                    mode = Mode::Replay(args[i + 1].clone());
                    i += 1;
                }
            }
            "--port" | "-p" => {
                if i + 1 < args.len() {
                    port = args[i + 1].parse().unwrap_or(DEFAULT_PORT);
                    i += 1;
                }
            }
            "--players" | "-n" => {
                if i + 1 < args.len() {
                    players = args[i + 1].parse().unwrap_or(2);
                    i += 1;
                }
            }
            "--ticks" | "-t" => {
                if i + 1 < args.len() {
                    ticks = args[i + 1].parse().unwrap_or(100);
                    i += 1;
                }
            }
            "--record" => {
                if i + 1 < args.len() {
                    record = Some(args[i + 1].clone());
                    i += 1;
                }
            }
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    config_path = Some(args[i + 1].clone());
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("Usage: warden_node [OPTIONS]");
                println!();
                println!("Options:");
                println!("      --host                 Host a session (default)");
                println!("  -j, --join <HOST[:PORT]>   Join a hosted session");
                println!("  -r, --replay <FILE>        Replay a recorded turn file");
                println!("  -p, --port <PORT>          UDP port to host on (default: {DEFAULT_PORT})");
                println!("  -n, --players <NUM>        Players to wait for when hosting (default: 2)");
                println!("  -t, --ticks <NUM>          Ticks to run (default: 100)");
                println!("      --record <FILE>        Record every turn to FILE");
                println!("  -c, --config <FILE>        Session configuration (TOML)");
                println!("  -h, --help                 Show this help");
                return;
            }
            _ => {}
        }
        i += 1;
    }

    let config = match &config_path {
        Some(path) => match SessionConfig::load(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("✗ {e}");
                std::process::exit(1);
            }
        },
        None => SessionConfig::default(),
    };

    println!("┌─ CONFIGURATION ─────────────────────────────────────────────────┐");
    match &mode {
        Mode::Host => {
            println!("│ Mode:               host on port {}                          ", port);
            println!("│ Players:            {}                                          ", players);
        }
        Mode::Join(spec) => println!("│ Mode:               join {}                          ", spec),
        Mode::Replay(path) => println!("│ Mode:               replay {}                          ", path),
    }
    println!("│ Ticks:              {}                                        ", ticks);
    println!("│ Level:              {}                                          ", config.session_level_id);
    if let Some(path) = &record {
        println!("│ Recording:          {}                          ", path);
    }
    println!("└──────────────────────────────────────────────────────────────────┘");
    println!();

    let result = match mode {
        Mode::Replay(path) => run_replay(config, &path),
        Mode::Host => run_live(config, Role::Host, &port.to_string(), players, ticks, record.as_deref()),
        Mode::Join(spec) => run_live(config, Role::Client, &spec, players, ticks, record.as_deref()),
    };

    if let Err(e) = result {
        eprintln!("✗ Session failed: {e}");
        std::process::exit(1);
    }
}

fn open_session(config: SessionConfig) -> Result<Session<UdpTransport>, SessionError> {
    let transport_config: TransportConfig = config.transport.clone();
    let transport = UdpTransport::init(transport_config)?;
    println!("✓ Transport initialized");
    Ok(Session::new(transport, config))
}

fn run_live(
    config: SessionConfig,
    role: Role,
    spec: &str,
    players: usize,
    ticks: u32,
    record: Option<&str>,
) -> Result<(), SessionError> {
    let mut session = open_session(config)?;
    if let Some(path) = record {
        session.enable_persistence(path, true)?;
    }

    let slot = session.begin_session(role, spec, SessionOptions::default())?;
    println!("✓ Session started as {slot}");

    if role == Role::Host {
        println!("  Waiting for {players} players...");
        let present = session.wait_for_participants(players, Duration::from_secs(60))?;
        println!("✓ {present} players present");
    }

    let start = Instant::now();
    let mut substituted = 0u32;
    for tick in 0..ticks {
        let outcome = session.exchange(tick, Record::noop(tick, 0))?;
        if !outcome.relinquished.is_empty() {
            substituted += 1;
            println!(
                "  Tick {tick}: slots {:#06b} left, computer now runs {:#06b}",
                outcome.relinquished.bits(),
                outcome.computer.bits()
            );
        }
        if tick % 50 == 0 {
            println!(
                "  Tick {tick}: contributors {:#06b}, ping {} ms, loss {}%",
                outcome.contributors.bits(),
                session.ping(slot),
                session.packet_loss(slot)
            );
        }
    }
    let elapsed = start.elapsed();

    // Let the last broadcast reach everyone before the endpoint closes.
    if role == Role::Host {
        std::thread::sleep(Duration::from_millis(200));
    }
    session.end_session()?;

    let detector = session.detector();
    println!();
    println!("┌─ SESSION SUMMARY ───────────────────────────────────────────────┐");
    println!("│ Ticks:              {}                                        ", ticks);
    println!("│ Duration:           {:.2}s                                      ", elapsed.as_secs_f64());
    println!(
        "│ Ticks/sec:          {:.1}                                      ",
        f64::from(ticks) / elapsed.as_secs_f64().max(f64::EPSILON)
    );
    println!("│ Substitutions:      {}                                          ", substituted);
    println!("│ Desync ticks:       {}                                          ", detector.state_divergences());
    println!("└──────────────────────────────────────────────────────────────────┘");
    println!();

    if detector.state_divergences() == 0 {
        println!("✓ All participants agreed on every tick");
    } else {
        println!("⚠ {} desynced ticks", detector.state_divergences());
    }
    Ok(())
}

fn run_replay(config: SessionConfig, path: &str) -> Result<(), SessionError> {
    let mut session = open_session(config)?;
    let header = session.load_turn_file(path)?;
    println!(
        "✓ Loaded {path}: level {}, slots {:#06b}",
        header.session_level_id,
        header.active_slots().bits()
    );

    let mut tick = 0u32;
    let mut with_input = 0u32;
    loop {
        match session.exchange(tick, Record::noop(tick, 0)) {
            Ok(outcome) => {
                if outcome.set.has_input() {
                    with_input += 1;
                }
                tick += 1;
            }
            Err(SessionError::ReplayFinished { .. }) => break,
            Err(e) => return Err(e),
        }
    }
    session.end_session()?;

    println!();
    println!("┌─ REPLAY SUMMARY ────────────────────────────────────────────────┐");
    println!("│ Turns:              {}                                        ", tick);
    println!("│ Turns with input:   {}                                        ", with_input);
    println!("└──────────────────────────────────────────────────────────────────┘");
    println!();
    println!("✓ Replay complete");
    Ok(())
}
