mod cli;

use std::fs;
use std::io;
use std::process;

use anyhow::{anyhow, Context, Result};
use clap::{CommandFactory, Parser};
use clap_complete::{generate, shells::Bash};
use itertools::Itertools;
use log::{debug, error, info};

use divecomputer::device::{sensuspro, vyper2, FAMILIES};
use divecomputer::{Device, Event, Family};

use cli::{Cli, Commands};

enum OutputFormat {
    Plain,
    Json,
}

fn log_event(event: &Event) {
    match event {
        Event::DevInfo(info) => info!(
            "model {} firmware {:#08x} serial {}",
            info.model, info.firmware, info.serial
        ),
        Event::Clock(clock) => debug!("clock: host {} device {}", clock.systime, clock.devtime),
        Event::Progress(progress) => debug!("progress {}/{}", progress.current, progress.maximum),
    }
}

fn bytes_to_line(data: &[u8]) -> String {
    data.iter().map(|b| format!("{:02x}", b)).join(" ")
}

fn cmd_families(fmt: OutputFormat) -> String {
    match fmt {
        OutputFormat::Plain => FAMILIES
            .iter()
            .map(|f| format!("{:<12}{}", f.name(), f.description()))
            .join("\n"),
        OutputFormat::Json => json::stringify(FAMILIES.iter().map(|f| f.name()).collect::<Vec<_>>()),
    }
}

fn cmd_version(device: &mut Device, fmt: OutputFormat) -> Result<String> {
    let mut data = [0u8; vyper2::VERSION_SIZE];
    device
        .version(&mut data)
        .context("Failed to read the version")?;

    Ok(match fmt {
        OutputFormat::Plain => bytes_to_line(&data),
        OutputFormat::Json => json::stringify(data.to_vec()),
    })
}

fn cmd_read(device: &mut Device, address: u32, count: u32, fmt: OutputFormat) -> Result<String> {
    let mut data = vec![0u8; count as usize];
    device
        .read(address, &mut data)
        .with_context(|| format!("Failed to read {} bytes at {:#06x}", count, address))?;

    Ok(match fmt {
        OutputFormat::Plain => data.chunks(16).map(bytes_to_line).join("\n"),
        OutputFormat::Json => json::stringify(data),
    })
}

fn cmd_write(device: &mut Device, address: u32, values: &[u8]) -> Result<String> {
    device
        .write(address, values)
        .with_context(|| format!("Failed to write {} bytes at {:#06x}", values.len(), address))?;
    Ok(String::new())
}

fn cmd_dump(device: &mut Device, file: &std::path::Path) -> Result<String> {
    let mut buffer = Vec::new();
    device.dump(&mut buffer).context("Failed to dump memory")?;
    fs::write(file, &buffer).with_context(|| format!("Failed to write {}", file.display()))?;
    info!("saved {} bytes to {}", buffer.len(), file.display());
    Ok(String::new())
}

fn cmd_dives(device: &mut Device, fingerprint: Option<&[u8]>, fmt: OutputFormat) -> Result<String> {
    device
        .set_fingerprint(fingerprint.unwrap_or_default())
        .context("Failed to set the fingerprint")?;

    let mut dives = Vec::new();
    device
        .foreach(|data, fp| {
            debug!("dive {} ({} bytes)", hex::encode(fp), data.len());
            dives.push((hex::encode(fp), data.len()));
            true
        })
        .context("Failed to download dives")?;
    info!("{} new dives", dives.len());

    Ok(match fmt {
        OutputFormat::Plain => dives
            .iter()
            .map(|(fp, size)| format!("{} {}", fp, size))
            .join("\n"),
        OutputFormat::Json => {
            let list = dives
                .into_iter()
                .map(|(fp, size)| {
                    let mut obj = json::JsonValue::new_object();
                    obj["fingerprint"] = fp.into();
                    obj["size"] = size.into();
                    obj
                })
                .collect::<Vec<_>>();
            json::stringify(list)
        }
    })
}

fn cmd_handshake(device: &mut Device, fmt: OutputFormat) -> Result<String> {
    // The device only answers to a command, so pull the memory to get one.
    let mut buffer = Vec::new();
    device
        .dump(&mut buffer)
        .context("Failed to talk to the device")?;

    let mut data = [0u8; sensuspro::HANDSHAKE_SIZE];
    sensuspro::handshake(device, &mut data)?;

    Ok(match fmt {
        OutputFormat::Plain => bytes_to_line(&data),
        OutputFormat::Json => json::stringify(data.to_vec()),
    })
}

fn require_family(family: Option<Family>) -> Result<Family> {
    family.ok_or_else(|| anyhow!("No device family given, use --family"))
}

fn do_main() -> Result<String> {
    if std::env::var("GENERATE_COMPLETION").is_ok() {
        generate(
            Bash,
            &mut cli::Cli::command(),
            "divecomputer-tool",
            &mut io::stdout(),
        );

        return Ok(String::default());
    }

    let cli = Cli::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(if cli.debug {
        "debug"
    } else {
        "info"
    }))
    .format_timestamp(None)
    .format_target(false)
    .init();

    let fmt = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Plain
    };

    if let Commands::Families = cli.command {
        return Ok(cmd_families(fmt));
    }

    let family = require_family(cli.family)?;
    let mut device = Device::open(family, &cli.port, cli.force)
        .with_context(|| format!("Can't open port '{}'", cli.port))?;
    device.set_events(log_event);

    let output = match cli.command {
        Commands::Version => cmd_version(&mut device, fmt),
        Commands::Read { address, count } => cmd_read(&mut device, address, count, fmt),
        Commands::Write { address, values } => cmd_write(&mut device, address, &values),
        Commands::Dump { file } => cmd_dump(&mut device, &file),
        Commands::Dives { fingerprint } => {
            cmd_dives(&mut device, fingerprint.as_ref().map(|fp| fp.as_slice()), fmt)
        }
        Commands::Handshake => cmd_handshake(&mut device, fmt),
        Commands::SetInterval { interval } => sensuspro::write_interval(&mut device, interval)
            .map(|_| String::new())
            .context("Failed to set the sample interval"),
        Commands::ResetMaxdepth => vyper2::reset_maxdepth(&mut device)
            .map(|_| String::new())
            .context("Failed to reset the maximum depth"),
        Commands::Families => Err(anyhow!("unexpected command (this is a bug!)")),
    }?;

    device.close().context("Failed to close the device")?;
    Ok(output)
}

fn main() {
    match do_main() {
        Ok(s) if s.is_empty() => {}
        Ok(s) => println!("{}", s),
        Err(e) => {
            error!("{:#}", e);
            process::exit(1);
        }
    }
}
