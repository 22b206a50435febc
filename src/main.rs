use clap::{Parser, Subcommand};
use sbomreport_uploader::{Config, RunOutcome, Uploader, cancellation, server};
use std::error::Error;
use std::fs;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(version, about, arg_required_else_help(true))]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Upload the SBOM of a single Trivy Operator webhook payload
    Upload {
        /// Path to the webhook payload JSON, `-` to read it from stdin
        #[arg(short, long)]
        input: String,

        #[command(flatten)]
        config: Config,
    },

    /// Receive Trivy Operator webhooks and upload the SBOM of every SBOMReport
    Server {
        /// Address to listen on
        #[arg(short, long, env = "LISTEN_ADDR", default_value = "0.0.0.0:8080")]
        listen: SocketAddr,

        #[command(flatten)]
        config: Config,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    match args.command {
        Command::Upload { input, config } => {
            let payload = if input == "-" {
                let mut payload = vec![];
                tokio::io::stdin().read_to_end(&mut payload).await?;
                payload
            } else {
                fs::read(&input)?
            };

            let uploader = Uploader::from_config(&config)?;
            let (handle, cancellation) = cancellation();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    handle.cancel();
                }
            });

            match uploader.run(&payload, cancellation).await? {
                RunOutcome::Uploaded {
                    project,
                    version,
                    is_latest,
                } => println!(
                    "Uploaded BOM for project {}:{} (latest: {})",
                    project, version, is_latest
                ),
                RunOutcome::Skipped { reason } => println!("Skipped: {}", reason),
            }
        }
        Command::Server { listen, config } => {
            let uploader = Arc::new(Uploader::from_config(&config)?);
            server::serve(uploader, listen).await?;
        }
    }
    Ok(())
}
