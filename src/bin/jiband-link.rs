use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use clap::{Parser, Subcommand, ValueEnum};
use futures::StreamExt;
use log::{error, info, LevelFilter};
use tokio::time::sleep;

use jiband_link::config::io::ConfigIO;
use jiband_link::config::types::Config;
use jiband_link::device::btle::BtleTransport;
use jiband_link::error::{AppRunError, StorageError};
use jiband_link::session::file::{default_storage_path, FileStorage};
use jiband_link::session::store::SessionStore;
use jiband_link::{init_logging, Device, DeviceId, DeviceService, DisconnectCause, OutboundCommand};

#[derive(Parser, Debug)]
#[command(version, about = "Connection manager for JI Band wearables")]
struct Cli {
    /// Config file to use instead of the default location
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Session file to use instead of the default location
    #[arg(long, global = true)]
    storage: Option<PathBuf>,

    /// Log debug messages
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    #[command(flatten)]
    Device(DeviceCommand),
    /// Stop reconnecting to a device on startup
    Forget {
        id: String,
    },
}

/// Commands that need the radio.
#[derive(Subcommand, Debug)]
enum DeviceCommand {
    /// List nearby devices
    Scan {
        /// How long to scan, e.g. "5s" (defaults to the configured scan duration)
        #[arg(long, value_parser = humantime::parse_duration)]
        duration: Option<Duration>,
    },
    /// Reconnect to the remembered devices and report what they send until interrupted
    Run,
    /// Connect to a device, remember it and report what it sends until interrupted
    Connect {
        id: String,
        #[arg(long, value_parser = humantime::parse_duration)]
        duration: Option<Duration>,
    },
    /// Connect to a device, send one command and disconnect again
    Send {
        id: String,
        #[arg(value_enum)]
        command: CommandArg,
        #[arg(long, value_parser = humantime::parse_duration)]
        duration: Option<Duration>,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum CommandArg {
    Collection,
    Calibration,
    LowPower,
}

impl From<CommandArg> for OutboundCommand {
    fn from(value: CommandArg) -> Self {
        match value {
            CommandArg::Collection => OutboundCommand::ToggleDataCollection,
            CommandArg::Calibration => OutboundCommand::ToggleCalibration,
            CommandArg::LowPower => OutboundCommand::ToggleLowPowerMode,
        }
    }
}

fn print_new_devices(devices: &[Device], reported: &mut HashSet<DeviceId>) {
    for device in devices {
        if reported.insert(device.id.clone()) {
            println!("{}\t{}", device.id, device.name);
        }
    }
}

async fn scan(service: &DeviceService, duration: Duration) -> Result<(), AppRunError> {
    let mut available = service.manager().subscribe_available();
    let mut reported = HashSet::new();
    service.scanner().start_scan(duration).await?;

    let finished = sleep(duration);
    tokio::pin!(finished);

    loop {
        tokio::select! {
            _ = &mut finished => break,
            changed = available.changed() => {
                if changed.is_err() {
                    break;
                }
                let devices = available.borrow_and_update().clone();
                print_new_devices(&devices, &mut reported);
            },
        }
    }

    service.scanner().stop_scan().await?;
    info!("Found {} device(s)", reported.len());
    Ok(())
}

async fn find_device(service: &DeviceService, id: &DeviceId, duration: Duration) -> Result<Device, AppRunError> {
    let mut available = service.manager().subscribe_available();
    service.scanner().start_scan(duration).await?;

    let finished = sleep(duration);
    tokio::pin!(finished);

    let found = loop {
        let device = available.borrow_and_update().iter().find(|device| &device.id == id).cloned();
        if device.is_some() {
            break device;
        }

        tokio::select! {
            _ = &mut finished => break None,
            changed = available.changed() => {
                if changed.is_err() {
                    break None;
                }
            },
        }
    };

    service.scanner().stop_scan().await?;
    found.ok_or_else(|| AppRunError::DeviceNotFound(id.clone()))
}

async fn report_until_interrupted(service: &DeviceService) -> Result<(), AppRunError> {
    let manager = service.manager();
    let mut events = manager.subscribe_events();
    let mut disconnects = manager.subscribe_disconnects();

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            result = &mut ctrl_c => {
                result.map_err(|source| AppRunError::Signal { source })?;
                info!("Interrupted");
                break;
            },
            Some(event) = events.next() => {
                println!("{}\t{}", event.id, event.event);
            },
            Some(notice) = disconnects.next() => match notice.cause {
                DisconnectCause::UserInitiated => println!("{}\tdisconnected", notice.device.id),
                DisconnectCause::MonitorDetected => println!("{}\t{} has disconnected", notice.device.id, notice.device.name),
            },
        }
    }

    Ok(())
}

async fn run_command(command: DeviceCommand, service: &DeviceService, config: &Config) -> Result<(), AppRunError> {
    match command {
        DeviceCommand::Scan { duration } => {
            scan(service, duration.unwrap_or(config.scan_duration())).await
        },
        DeviceCommand::Run => {
            for (id, result) in service.start().await {
                if result.is_ok() {
                    println!("{}\treconnected", id);
                }
            }
            report_until_interrupted(service).await
        },
        DeviceCommand::Connect { id, duration } => {
            let device = find_device(service, &DeviceId::from(id), duration.unwrap_or(config.scan_duration())).await?;
            service.start_monitor();
            service.manager().connect(&device).await?;
            println!("{}\tconnected", device.id);
            report_until_interrupted(service).await
        },
        DeviceCommand::Send { id, command, duration } => {
            let id = DeviceId::from(id);
            let command = OutboundCommand::from(command);
            let device = find_device(service, &id, duration.unwrap_or(config.scan_duration())).await?;

            service.manager().connect(&device).await?;
            let result = service.manager().send_command(&id, command).await;
            service.manager().disconnect(&id).await?;
            result?;

            println!("Sent {} to {}", command, device);
            Ok(())
        },
    }
}

async fn forget(storage: FileStorage, id: DeviceId) -> Result<(), AppRunError> {
    match SessionStore::new(Arc::new(storage)).forget(&id).await? {
        true => println!("{}\tforgotten", id),
        false => println!("{}\tnot remembered", id),
    }
    Ok(())
}

async fn run(cli: Cli) -> Result<(), AppRunError> {
    let config = ConfigIO::new(cli.config)?.read_or_default().await?;

    let storage_path = match cli.storage {
        Some(path) => path,
        None => default_storage_path()?,
    };
    info!("Using session file {}", storage_path.to_string_lossy());
    let storage = FileStorage::open(storage_path)?;

    // only one instance may drive the radio and rewrite the session file
    let mut locker = storage.locker().await?;
    let _guard = locker.lock()?;

    let command = match cli.command {
        Command::Device(command) => command,
        Command::Forget { id } => return forget(storage, DeviceId::from(id)).await,
    };

    let transport = BtleTransport::new().await?;
    let service = DeviceService::new(Arc::new(transport), Arc::new(storage), config.clone());

    let result = run_command(command, &service, &config).await;
    service.shutdown().await;
    result
}

#[tokio::main]
async fn main() -> Result<(), AppRunError> {
    let cli = Cli::parse();
    init_logging(if cli.verbose { LevelFilter::Debug } else { LevelFilter::Info });
    info!(concat!("JI Band Link ", env!("CARGO_PKG_VERSION")));

    match run(cli).await {
        Err(AppRunError::StorageError { source: StorageError::CanNotLock { .. } }) => {
            error!("This application has already been started");
            Ok(())
        },
        Err(err) => {
            error!("Unexpected error: {}", err);
            Err(err)
        },
        Ok(_) => Ok(()),
    }
}
