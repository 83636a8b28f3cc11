//! EConBadge firmware core on a host
//!
//! Listens for one peer at a time over TCP, takes menu commands from stdin,
//! and keeps its two firmware slots and state under `$BADGE_HOME`. A
//! committed update "restarts" the core into the newly selected slot.

mod console;
mod flash;
mod link;

use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::sync::mpsc::Receiver;

use badge_core::{Detached, DeviceConfig, DeviceContext, Event, FlashStore, JsonFileStorage, Service};
use log::*;
use sha2::{Digest, Sha256};

use console::ConsoleCommand;
use flash::FileFlash;
use link::TcpLink;

#[derive(clap::Parser)]
#[command(name = "badge-device")]
#[command(about = "EConBadge firmware core running on a host")]
struct Cli {
    /// Home directory (default: $BADGE_HOME or ~/.badge)
    #[arg(long)]
    home: Option<PathBuf>,
    /// Address to listen on, overrides the config file
    #[arg(long)]
    listen: Option<String>,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Run the badge (default)
    Run,
    /// Show the boot slot and running image
    Info,
    /// Trust an Ed25519 public key (hex) for firmware updates
    Trust { key: String },
    /// Install an image into slot A and boot from it
    Flash { image: PathBuf },
}

enum Boot {
    Restart,
    Shutdown,
}

fn badge_home(home: Option<PathBuf>) -> anyhow::Result<PathBuf> {
    let home = match home.or_else(|| std::env::var_os("BADGE_HOME").map(PathBuf::from)) {
        Some(home) => home,
        None => dirs::home_dir()
            .ok_or_else(|| anyhow::anyhow!("could not determine home directory"))?
            .join(".badge"),
    };
    std::fs::create_dir_all(&home)?;
    Ok(home)
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli: Cli = clap::Parser::parse();
    let home = badge_home(cli.home)?;
    let mut config = DeviceConfig::load_or_init(&home)?;
    if let Some(addr) = cli.listen {
        config.listen_addr = addr;
    }

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run(&home, config),
        Commands::Info => show_info(&home, &config),
        Commands::Trust { key } => {
            config.update_public_key = Some(key);
            config.save(&home)?;
            info!("update key saved to {}", home.display());
            Ok(())
        }
        Commands::Flash { image } => {
            let image = std::fs::read(&image)?;
            let mut flash = FileFlash::open(&home.join("flash"), config.slot_capacity)?;
            flash.install(badge_core::Slot::A, &image)?;
            info!("installed {} bytes into slot A", image.len());
            Ok(())
        }
    }
}

fn show_info(home: &Path, config: &DeviceConfig) -> anyhow::Result<()> {
    let flash = FileFlash::open(&home.join("flash"), config.slot_capacity)?;
    let image = flash.running_image()?;
    println!("hardware:      {}", config.hardware_revision);
    println!("running slot:  {:?}", flash.running_slot());
    println!("image length:  {}", image.len());
    println!("image sha256:  {}", data_encoding::HEXLOWER.encode(&Sha256::digest(&image)));
    println!(
        "update key:    {}",
        config.update_public_key.as_deref().unwrap_or("(none, updates refused)")
    );
    Ok(())
}

fn run(home: &Path, config: DeviceConfig) -> anyhow::Result<()> {
    let listener = TcpListener::bind(&config.listen_addr)?;
    listener.set_nonblocking(true)?;
    info!("listening on {}", config.listen_addr);
    let console = console::spawn();

    // Each pass is one boot of the firmware
    loop {
        let flash = FileFlash::open(&home.join("flash"), config.slot_capacity)?;
        let image = flash.running_image()?;
        let device = DeviceContext::new(config.clone())?;
        info!(
            "EConBadge core v{} on {} booting slot {:?} ({} bytes, sha256 {})",
            device.hardware.firmware_version,
            device.hardware.revision,
            flash.running_slot(),
            image.len(),
            data_encoding::HEXLOWER.encode(&Sha256::digest(&image)),
        );

        if device.update_key.is_none() {
            warn!("no update key configured, firmware updates will be refused");
        }
        let storage = JsonFileStorage::new(home.join("state.json"));
        let mut service = Service::new(device, Box::new(flash), Box::new(storage))?;

        match serve(&listener, &mut service, &console)? {
            Boot::Restart => info!("restarting into the selected slot"),
            Boot::Shutdown => return Ok(()),
        }
    }
}

fn serve(
    listener: &TcpListener,
    service: &mut Service,
    console: &Receiver<ConsoleCommand>,
) -> anyhow::Result<Boot> {
    let mut link: Option<TcpLink> = None;
    let idle_sleep = service.device().poll_interval();

    loop {
        if link.is_none() {
            match listener.accept() {
                Ok((stream, _)) => match TcpLink::new(stream) {
                    Ok(new_link) => {
                        service.connected();
                        link = Some(new_link);
                    }
                    Err(e) => warn!("could not set up connection: {}", e),
                },
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
                Err(e) => warn!("accept failed: {}", e),
            }
        }

        while let Ok(cmd) = console.try_recv() {
            match cmd {
                ConsoleCommand::Quit => return Ok(Boot::Shutdown),
                ConsoleCommand::Status => {
                    let progress = service.progress();
                    info!(
                        "update {:?}, {:?} {}%, owner {:?}",
                        service.update_state(),
                        progress.stage,
                        progress.percent,
                        service.state().owner
                    );
                }
                ConsoleCommand::Command { identifier, args } => {
                    if let Err(kind) = service.submit_local(identifier, &args) {
                        warn!("menu command {} not queued: {}", identifier, kind);
                    }
                }
            }
        }

        let event = match link.as_mut() {
            Some(l) => service.poll(l),
            None => service.poll(&mut Detached),
        };

        match event {
            Event::Restart => return Ok(Boot::Restart),
            Event::Disconnected | Event::IdleTimeout => {
                if let Some(l) = link.take() {
                    debug!("closing link to {}", l.peer());
                }
            }
            Event::Handled { identifier, origin, status } => {
                debug!("{:?} command {} -> {}", origin, identifier, status);
            }
            // with a peer attached, poll() already waited on the socket
            Event::Idle => {
                if link.is_none() || service.link_lent() {
                    std::thread::sleep(idle_sleep);
                }
            }
        }
    }
}
