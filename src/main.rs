use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use droid_msd::catalog::{CatalogStore, DiskItem};
use droid_msd::drive::DriveController;
use droid_msd::events::EventBus;
use droid_msd::gadget::{ControlSurface, FsSurface, GadgetPaths, ShellSurface};
use droid_msd::root::SuRunner;

/// Log level for the application
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

/// droid-msd command line arguments
#[derive(Parser, Debug)]
#[command(name = "droid-msd")]
#[command(version, about = "Multi-LUN USB mass-storage gadget manager", long_about = None)]
struct CliArgs {
    /// Data directory path (default: /data/adb/droid-msd)
    #[arg(short = 'd', long, value_name = "DIR")]
    data_dir: Option<PathBuf>,

    /// su binary used for privileged execution
    #[arg(long, value_name = "PATH", default_value = "su")]
    su_path: PathBuf,

    /// Perform privileged operations directly (process is already root)
    #[arg(long)]
    direct: bool,

    /// Filesystem root the control surface lives under
    #[arg(long, value_name = "DIR", default_value = "/")]
    fs_root: PathBuf,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short = 'l', long, value_name = "LEVEL", default_value = "info")]
    log_level: LogLevel,

    /// Increase verbosity (-v for debug, -vv for trace)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show control-plane status and the catalog
    Status,
    /// Configure the gadget with the current max-devices setting
    Enable,
    /// Tear the gadget down and restore the default USB profile
    Disable,
    /// Declare an existing ISO image
    AddIso {
        /// Path to the ISO image
        path: PathBuf,
        /// Display name (defaults to the file stem)
        #[arg(short, long)]
        name: Option<String>,
    },
    /// Create a sparse disk image and declare it
    AddDisk {
        /// Display name; the image lands at FOLDER/NAME.img
        name: String,
        /// Folder the image is created in
        #[arg(short, long, value_name = "DIR")]
        folder: PathBuf,
        /// Image size in decimal gigabytes
        #[arg(short, long, value_name = "GB")]
        size_gb: f64,
    },
    /// List catalog items
    List,
    /// Mount an item into the first free LUN slot
    Mount {
        /// Item id (or unambiguous prefix) or display name
        item: String,
    },
    /// Eject a mounted item
    Eject {
        item: String,
    },
    /// Remove an inactive item from the catalog
    Remove {
        item: String,
    },
    /// Set the LUN slot count used at the next enable
    SetMaxDevices {
        count: u32,
    },
    /// Show or toggle charging suspend
    Charging {
        #[command(subcommand)]
        action: Option<ChargingCmd>,
    },
}

#[derive(Subcommand, Debug)]
enum ChargingCmd {
    /// Show the live suspend state
    Status,
    /// Suspend charging input
    On,
    /// Resume charging input
    Off,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    init_logging(args.log_level, args.verbose);

    let data_dir = args.data_dir.clone().unwrap_or_else(get_data_dir);
    tokio::fs::create_dir_all(&data_dir).await?;

    let surface: Arc<dyn ControlSurface> = if args.direct {
        Arc::new(FsSurface::new(&args.fs_root))
    } else {
        Arc::new(ShellSurface::new(SuRunner::new(&args.su_path)))
    };
    let paths = GadgetPaths::new(&args.fs_root);
    let catalog = Arc::new(CatalogStore::new(&data_dir.join("droid-msd.db")).await?);
    let events = Arc::new(EventBus::new());

    let drive = DriveController::new(surface, paths, catalog, events);
    drive.init().await?;

    run_command(&drive, args.command).await
}

async fn run_command(drive: &DriveController, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Status => {
            let status = drive.status().await?;
            println!("rooted:            {}", status.rooted);
            println!("gadget configured: {}", status.configured);
            println!("charging suspend:  {}", status.charging_suspended);
            println!("max devices:       {}", status.max_devices);
            for slot in &status.slots {
                match &slot.backing {
                    Some(backing) => println!("lun.{}: {}", slot.lun, backing.display()),
                    None => println!("lun.{}: (free)", slot.lun),
                }
            }
            print_items(&drive.catalog().list().await?);
        }
        Command::Enable => {
            drive.set_gadget_enabled(true).await?;
            println!("Gadget enabled with {} LUNs", drive.catalog().max_devices());
        }
        Command::Disable => {
            drive.set_gadget_enabled(false).await?;
            println!("Gadget disabled");
        }
        Command::AddIso { path, name } => {
            let item = drive.add_iso(name.as_deref(), path).await?;
            println!("Added {} ({})", item.name, short_id(&item.id));
        }
        Command::AddDisk {
            name,
            folder,
            size_gb,
        } => {
            let item = drive.add_disk(&name, folder, size_gb).await?;
            println!(
                "Created {} ({}, {})",
                item.name,
                short_id(&item.id),
                item.size_display()
            );
        }
        Command::List => {
            print_items(&drive.catalog().list().await?);
        }
        Command::Mount { item } => {
            let item = resolve_item(drive, &item).await?;
            let lun = drive.mount_item(&item.id).await?;
            println!("Mounted {} at lun.{}", item.name, lun);
        }
        Command::Eject { item } => {
            let item = resolve_item(drive, &item).await?;
            drive.eject_item(&item.id).await?;
            println!("Ejected {}", item.name);
        }
        Command::Remove { item } => {
            let item = resolve_item(drive, &item).await?;
            drive.remove_item(&item.id).await?;
            println!("Removed {}", item.name);
        }
        Command::SetMaxDevices { count } => {
            let count = drive.set_max_devices(count).await?;
            println!("max devices set to {} (takes effect at the next enable)", count);
        }
        Command::Charging { action } => match action.unwrap_or(ChargingCmd::Status) {
            ChargingCmd::Status => {
                println!("charging suspend: {}", drive.charging_state().await);
            }
            ChargingCmd::On => {
                drive.set_charging(true).await?;
                println!("Charging suspended");
            }
            ChargingCmd::Off => {
                drive.set_charging(false).await?;
                println!("Charging resumed");
            }
        },
    }
    Ok(())
}

/// Resolve a user-supplied item reference: exact id, exact name, or an
/// unambiguous id prefix
async fn resolve_item(drive: &DriveController, needle: &str) -> anyhow::Result<DiskItem> {
    let items = drive.catalog().list().await?;
    if let Some(item) = items.iter().find(|i| i.id == needle || i.name == needle) {
        return Ok(item.clone());
    }
    let mut matches = items.iter().filter(|i| i.id.starts_with(needle));
    match (matches.next(), matches.next()) {
        (Some(item), None) => Ok(item.clone()),
        (Some(_), Some(_)) => anyhow::bail!("Ambiguous item reference: {}", needle),
        _ => anyhow::bail!("No such item: {}", needle),
    }
}

fn print_items(items: &[DiskItem]) {
    if items.is_empty() {
        println!("(catalog is empty)");
        return;
    }
    for item in items {
        let state = match item.lun_id() {
            Some(lun) => format!("lun.{}", lun),
            None => "-".to_string(),
        };
        println!(
            "{}  {:5}  {:10}  {:6}  {}",
            short_id(&item.id),
            item.mode.as_str(),
            state,
            item.size_display(),
            item.name
        );
    }
}

fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

fn init_logging(level: LogLevel, verbose_count: u8) {
    // Verbose count overrides log level
    let effective_level = match verbose_count {
        0 => level,
        1 => LogLevel::Debug,
        _ => LogLevel::Trace,
    };

    let filter = match effective_level {
        LogLevel::Error => "droid_msd=error",
        LogLevel::Warn => "droid_msd=warn",
        LogLevel::Info => "droid_msd=info",
        LogLevel::Debug => "droid_msd=debug",
        LogLevel::Trace => "droid_msd=trace",
    };

    // Environment variable takes highest priority
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into());

    if let Err(err) = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
    {
        eprintln!("failed to initialize tracing: {}", err);
    }
}

/// Get the application data directory
fn get_data_dir() -> PathBuf {
    // Check environment variable first
    if let Ok(path) = std::env::var("DROID_MSD_DATA_DIR") {
        return PathBuf::from(path);
    }

    // Default under /data/adb, the conventional home for root tooling
    PathBuf::from("/data/adb/droid-msd")
}
