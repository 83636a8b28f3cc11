mod client;
mod package;

use std::path::PathBuf;
use std::time::Duration;

use badge_proto::{CommandId, UpdateState, UpdateStatusReport};
use log::*;

use client::{check, status_name, Client};
use package::Package;

#[derive(clap::Parser)]
#[command(name = "badge-ctl")]
#[command(about = "Talk to an EConBadge and ship firmware updates to it")]
struct Cli {
    /// Badge address
    #[arg(long, default_value = "127.0.0.1:7600")]
    addr: String,
    /// 16-character session token
    #[arg(long, default_value = "0000000000000000")]
    token: String,
    /// Seconds to wait for each answer
    #[arg(long, default_value_t = 5)]
    timeout: u64,
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Create an update signing key, printing its public half
    Keygen { out: PathBuf },
    /// Sign an image into an update package
    Pack {
        image: PathBuf,
        #[arg(long)]
        key: PathBuf,
        /// Hardware revision the image is built for
        #[arg(long, default_value = "ECB_V1")]
        hw: String,
        #[arg(long, short)]
        out: PathBuf,
    },
    /// Check a package against a public key without sending it
    Inspect {
        package: PathBuf,
        /// Public key in hex
        #[arg(long)]
        public_key: Option<String>,
    },
    /// Ping the badge
    Ping,
    /// Send a raw command
    Send {
        id: u32,
        /// Arguments in hex
        #[arg(default_value = "")]
        args: String,
        /// File streamed right after the request frame
        #[arg(long)]
        stream: Option<PathBuf>,
    },
    /// Show the update state
    Status,
    /// Send an update package and follow it to the end
    Update { package: PathBuf },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli: Cli = clap::Parser::parse();
    if let Err(e) = run(cli).await {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

async fn connect(cli: &Cli) -> anyhow::Result<Client> {
    let token = badge_proto::token_from_str(&cli.token)?;
    Client::connect(&cli.addr, token, Duration::from_secs(cli.timeout)).await
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    match &cli.command {
        Commands::Keygen { out } => {
            let key = package::generate_key();
            package::write_signing_key(out, &key)?;
            println!("{}", data_encoding::HEXLOWER.encode(key.verifying_key().as_bytes()));
            info!("secret key written to {}", out.display());
        }
        Commands::Pack { image, key, hw, out } => {
            let key = package::read_signing_key(key)?;
            let package = Package::build(std::fs::read(image)?, hw, &key)?;
            std::fs::write(out, package.to_bytes())?;
            info!(
                "packed {} bytes for {} into {}",
                package.image.len(),
                hw,
                out.display()
            );
        }
        Commands::Inspect { package, public_key } => {
            let package = Package::from_bytes(&std::fs::read(package)?)?;
            println!("image size:  {}", package.header.size);
            println!("hardware:    {}", package.header.compat_hw_str());
            println!("sha256:      {}", data_encoding::HEXLOWER.encode(&package.header.checksum));
            if let Some(hex) = public_key {
                let bytes = data_encoding::HEXLOWER_PERMISSIVE.decode(hex.as_bytes())?;
                let bytes: [u8; 32] = bytes
                    .try_into()
                    .map_err(|_| anyhow::anyhow!("public key must be 32 bytes"))?;
                let key = ed25519_dalek::VerifyingKey::from_bytes(&bytes)?;
                package.verify(&key)?;
                println!("signature:   valid");
            }
        }
        Commands::Ping => {
            let mut client = connect(&cli).await?;
            let started = std::time::Instant::now();
            check(&client.command(CommandId::Ping.id(), &[], &[]).await?)?;
            println!("pong in {:?}", started.elapsed());
        }
        Commands::Send { id, args, stream } => {
            let args = data_encoding::HEXLOWER_PERMISSIVE.decode(args.as_bytes())?;
            let stream = match stream {
                Some(path) => std::fs::read(path)?,
                None => Vec::new(),
            };
            let mut client = connect(&cli).await?;
            let response = client.command(*id, &args, &stream).await?;
            println!("status:  {}", response.status);
            println!("payload: {}", data_encoding::HEXLOWER.encode(&response.payload));

            let wide = match CommandId::try_from(*id) {
                Ok(CommandId::LedBorderGetPatterns) => Some(true),
                Ok(CommandId::LedBorderGetAnimations) => Some(false),
                _ => None,
            };
            if let (Some(wide), true) = (wide, response.status.is_ok()) {
                for (i, record) in client.records(&response, wide).await?.iter().enumerate() {
                    println!("[{i}] {}", data_encoding::HEXLOWER.encode(record));
                }
            }
        }
        Commands::Status => {
            let mut client = connect(&cli).await?;
            print_report(&client.update_status().await?);
        }
        Commands::Update { package } => {
            let package = Package::from_bytes(&std::fs::read(package)?)?;
            let mut client = connect(&cli).await?;
            client.start_update(&package).await?;

            let mut last = None;
            let report = client
                .wait_update(Duration::from_millis(250), |report| {
                    let shown = (report.state, report.overall);
                    if last != Some(shown) {
                        info!("{:?} {}%", report.state, report.overall);
                        last = Some(shown);
                    }
                })
                .await?;
            print_report(&report);
            if report.state != UpdateState::Committed {
                anyhow::bail!("update failed: {}", status_name(report.last_status));
            }
        }
    }
    Ok(())
}

fn print_report(report: &UpdateStatusReport) {
    println!("state:   {:?}", report.state);
    println!("stage:   {:?} {}%", report.stage, report.percent);
    println!("overall: {}%", report.overall);
    println!("last:    {}", status_name(report.last_status));
}
