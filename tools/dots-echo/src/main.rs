// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! dots-echo - Echo DOTS records of one type in real-time
//!
//! Connects to a broker as a guest, fetches the type's descriptor from the
//! broker and prints every created, updated and removed instance.

use chrono::Local;
use clap::Parser;
use colored::*;
use dots::io::tcp;
use dots::io::{ConnectionError, Event, EventHandler, GuestTransceiver, UpdateKind};
use dots::protocol::codec::record_to_json;
use dots::protocol::{ConnectionState, DEFAULT_MAX_FRAME_SIZE};
use dots::types::PropertySet;
use std::io::{self, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::Level;

/// Echo DOTS records of one type
#[derive(Parser, Debug)]
#[command(name = "dots-echo")]
#[command(version)]
#[command(about = "Echo DOTS records of one type")]
struct Args {
    /// Type name to subscribe to
    type_name: String,

    /// Broker host
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Broker port
    #[arg(short, long, default_value = "11234")]
    port: u16,

    /// Output format: pretty, json, compact
    #[arg(short, long, default_value = "pretty")]
    format: OutputFormat,

    /// Shortcut for --format json
    #[arg(long)]
    json: bool,

    /// Maximum number of events to print (0 = unlimited)
    #[arg(short = 'n', long, default_value = "0")]
    count: u64,

    /// Show verbose metadata (sender, cache snapshot, changed properties)
    #[arg(short, long)]
    verbose: bool,

    /// Guest name announced to the broker
    #[arg(long, default_value = "dots-echo")]
    name: String,

    /// Shared secret, if the broker requires authentication
    #[arg(long)]
    secret: Option<String>,

    /// Disable colored output
    #[arg(long)]
    no_color: bool,

    /// Quiet mode - only output data, no headers
    #[arg(short = 'q', long)]
    quiet: bool,

    /// Library log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: String,
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum OutputFormat {
    Pretty,
    Json,
    Compact,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" | "p" => Ok(OutputFormat::Pretty),
            "json" | "j" => Ok(OutputFormat::Json),
            "compact" | "c" => Ok(OutputFormat::Compact),
            _ => Err(format!("Unknown format: {}", s)),
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let args = Args::parse();

    if args.no_color || !is_tty() {
        colored::control::set_override(false);
    }

    let level = args.log_level.parse().unwrap_or(Level::WARN);
    let _ = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(io::stderr)
        .try_init();

    let format = if args.json {
        OutputFormat::Json
    } else {
        args.format
    };

    if let Err(e) = run_echo(&args, format).await {
        eprintln!("{}: {}", "Error".red().bold(), e);
        std::process::exit(1);
    }
}

async fn run_echo(args: &Args, format: OutputFormat) -> Result<(), Box<dyn std::error::Error>> {
    let addr = tokio::net::lookup_host((args.host.as_str(), args.port))
        .await?
        .next()
        .ok_or_else(|| format!("cannot resolve {}", args.host))?;
    let stream = tokio::net::TcpStream::connect(addr).await?;
    let (mut reader, channel, _writer) = tcp::split(stream, addr, DEFAULT_MAX_FRAME_SIZE);

    let mut guest = GuestTransceiver::new(args.name.as_str())?;
    guest.open(Box::new(channel), &[], &[], args.secret.as_deref())?;

    let printed = Arc::new(AtomicU64::new(0));
    let printer = Printer {
        format,
        verbose: args.verbose,
        max: args.count,
        printed: printed.clone(),
    };
    let mut printer = Some(printer);
    let mut requested = false;

    loop {
        if args.count > 0 && printed.load(Ordering::SeqCst) >= args.count {
            break;
        }

        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            next = reader.read_frame() => {
                let Some((frame, _)) = next? else {
                    return Err("broker closed the connection".into());
                };
                match guest.handle_receive(frame) {
                    Ok(()) => {}
                    Err(ConnectionError::Dispatch(e)) => eprintln!("{}: {}", "Warning".yellow(), e),
                    Err(e) => return Err(e.into()),
                }
            }
        }

        if guest.state() != ConnectionState::Connected || printer.is_none() {
            continue;
        }
        if guest.registry().find_struct(&args.type_name).is_some() {
            if let Some(printer) = printer.take() {
                guest.subscribe_events(&args.type_name, printer.into_handler())?;
                if !args.quiet {
                    print_header(args, format);
                }
            }
        } else if !requested {
            guest.request_descriptors(&[args.type_name.as_str()])?;
            requested = true;
        }
    }

    guest.close();
    if !args.quiet {
        let total = printed.load(Ordering::SeqCst);
        eprintln!("\n{} Received {} event(s)", "---".dimmed(), total);
    }
    Ok(())
}

fn print_header(args: &Args, format: OutputFormat) {
    eprintln!(
        "{} {} {} (broker={}:{}, format={:?})",
        ">>>".green().bold(),
        "Subscribing to".bold(),
        args.type_name.cyan(),
        args.host,
        args.port,
        format
    );
    eprintln!("{}", "Press Ctrl+C to stop".dimmed());
    eprintln!();
}

struct Printer {
    format: OutputFormat,
    verbose: bool,
    max: u64,
    printed: Arc<AtomicU64>,
}

impl Printer {
    fn into_handler(self) -> EventHandler {
        Box::new(move |event: &Event| {
            let seq = self.printed.fetch_add(1, Ordering::SeqCst) + 1;
            if self.max == 0 || seq <= self.max {
                self.print(event, seq);
                let _ = io::stdout().flush();
            }
            Ok(())
        })
    }

    fn print(&self, event: &Event, seq: u64) {
        match self.format {
            OutputFormat::Pretty => self.print_pretty(event, seq),
            OutputFormat::Json => self.print_json(event, seq),
            OutputFormat::Compact => println!("#{} {} {}", seq, kind_name(event.kind), event.instance),
        }
    }

    fn print_pretty(&self, event: &Event, seq: u64) {
        let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
        let kind = match event.kind {
            UpdateKind::Created => kind_name(event.kind).green(),
            UpdateKind::Updated => kind_name(event.kind).yellow(),
            UpdateKind::Removed => kind_name(event.kind).red(),
        };
        print!(
            "{} {} {} {}",
            format!("[{}]", timestamp).dimmed(),
            format!("#{}", seq).yellow(),
            kind.bold(),
            event.instance.type_name().cyan()
        );
        if self.verbose {
            if let Some(sender) = event.header.sender {
                print!(" sender=#{}", sender);
            }
            if let Some(remaining) = event.header.from_cache {
                print!(" {}", format!("(cache, {} more)", remaining).dimmed());
            }
        }
        println!();

        for (property, value) in event.instance.as_record_ref().values() {
            let marker = if self.verbose && event.updated.contains(property.tag()) {
                "*"
            } else {
                " "
            };
            println!("  {}{}: {}", marker, property.name().cyan(), value);
        }
        println!();
    }

    fn print_json(&self, event: &Event, seq: u64) {
        let mut line = serde_json::json!({
            "seq": seq,
            "kind": kind_name(event.kind),
            "type": event.instance.type_name(),
            "instance": record_to_json(event.instance.as_record_ref(), PropertySet::ALL),
        });
        if self.verbose {
            line["sender"] = serde_json::json!(event.header.sender);
            line["from_cache"] = serde_json::json!(event.header.from_cache);
            line["updated"] = serde_json::json!(event.updated.value());
            line["sent_time"] = serde_json::json!(event.header.sent_time.seconds());
        }
        println!("{}", line);
    }
}

fn kind_name(kind: UpdateKind) -> &'static str {
    match kind {
        UpdateKind::Created => "CREATED",
        UpdateKind::Updated => "UPDATED",
        UpdateKind::Removed => "REMOVED",
    }
}

fn is_tty() -> bool {
    #[cfg(unix)]
    unsafe {
        libc::isatty(libc::STDOUT_FILENO) != 0
    }
    #[cfg(not(unix))]
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_format_parsing() {
        assert_eq!("JSON".parse::<OutputFormat>(), Ok(OutputFormat::Json));
        assert_eq!("c".parse::<OutputFormat>(), Ok(OutputFormat::Compact));
        assert!("raw".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn test_args() {
        let args = Args::parse_from(["dots-echo", "SensorReading", "--json", "-n", "3"]);
        assert_eq!(args.type_name, "SensorReading");
        assert!(args.json);
        assert_eq!(args.count, 3);
        assert_eq!(args.port, 11234);
    }
}
