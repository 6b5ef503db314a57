use anyhow::{bail, Context, Result};
use base64::Engine;
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::Value;
use std::io::BufRead;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "hadir", about = "hadir attendance check-in CLI")]
struct Cli {
    /// Talk to a daemon on the system bus instead of the session bus
    #[arg(long, global = true)]
    system: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Mode {
    Local,
    Cloud,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a session (password is read from stdin when not given)
    Login {
        /// Employee ID or full name
        id: String,
        #[arg(short, long)]
        password: Option<String>,
    },
    /// Check in with a captured photo
    CheckIn {
        /// JPEG or PNG file
        image: PathBuf,
    },
    /// Clear a failed attempt so the session can try again
    Retry,
    /// End the current session
    Reset,
    /// Show daemon, backend and session status
    Status,
    /// Switch the storage backend
    Mode {
        #[arg(value_enum)]
        mode: Mode,
    },
    /// Re-fetch all data from the active backend
    Reload,
}

#[zbus::proxy(
    interface = "org.hadir.CheckIn1",
    default_service = "org.hadir.CheckIn1",
    default_path = "/org/hadir/CheckIn1"
)]
trait CheckIn {
    async fn login(&self, login_id: &str, password: &str) -> zbus::Result<String>;
    async fn check_in(&self, image: &str) -> zbus::Result<String>;
    async fn retry(&self) -> zbus::Result<bool>;
    async fn reset(&self) -> zbus::Result<()>;
    async fn status(&self) -> zbus::Result<String>;
    async fn set_backend_mode(&self, mode: &str) -> zbus::Result<bool>;
    async fn reload(&self) -> zbus::Result<String>;
}

/// Encode an image file as a `data:` URL, the form the daemon stores.
fn data_url(path: &Path, bytes: &[u8]) -> String {
    let mime = match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("png") => "image/png",
        Some("webp") => "image/webp",
        _ => "image/jpeg",
    };
    let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
    format!("data:{mime};base64,{encoded}")
}

fn print_json(raw: &str) -> Result<Value> {
    let v: Value = serde_json::from_str(raw).context("daemon returned malformed JSON")?;
    println!("{}", serde_json::to_string_pretty(&v)?);
    Ok(v)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let conn = if cli.system {
        zbus::Connection::system().await?
    } else {
        zbus::Connection::session().await?
    };
    let proxy = CheckInProxy::new(&conn)
        .await
        .context("hadird is not reachable on D-Bus")?;

    match cli.command {
        Commands::Login { id, password } => {
            let password = match password {
                Some(p) => p,
                None => {
                    eprint!("Password: ");
                    let mut line = String::new();
                    std::io::stdin().lock().read_line(&mut line)?;
                    line.trim_end_matches(['\r', '\n']).to_string()
                }
            };
            let v: Value = serde_json::from_str(&proxy.login(&id, &password).await?)?;
            println!(
                "Logged in as {} ({})",
                v["displayName"].as_str().unwrap_or("?"),
                v["identityId"].as_str().unwrap_or("?")
            );
        }
        Commands::CheckIn { image } => {
            let bytes = tokio::fs::read(&image)
                .await
                .with_context(|| format!("failed to read {}", image.display()))?;
            tracing::debug!(bytes = bytes.len(), "image loaded");
            let v: Value = serde_json::from_str(&proxy.check_in(&data_url(&image, &bytes)).await?)?;
            if v["ignored"].as_bool() == Some(true) {
                println!("Ignored: session is {}", v["state"].as_str().unwrap_or("busy"));
            } else if v["state"] == "SUCCESS" {
                println!(
                    "Checked in ({:.0} m from the office)",
                    v["outcome"]["distance"].as_f64().unwrap_or_default()
                );
            } else {
                bail!(
                    "check-in failed [{}]: {}",
                    v["code"].as_str().unwrap_or("UNKNOWN"),
                    v["reason"].as_str().unwrap_or("no reason given")
                );
            }
        }
        Commands::Retry => {
            if proxy.retry().await? {
                println!("Ready to try again");
            } else {
                println!("Nothing to retry");
            }
        }
        Commands::Reset => {
            proxy.reset().await?;
            println!("Session ended");
        }
        Commands::Status => {
            print_json(&proxy.status().await?)?;
        }
        Commands::Mode { mode } => {
            let name = match mode {
                Mode::Local => "LOCAL",
                Mode::Cloud => "CLOUD",
            };
            if proxy.set_backend_mode(name).await? {
                println!("Backend switched to {name}");
            } else {
                println!("Backend already {name}");
            }
        }
        Commands::Reload => {
            print_json(&proxy.reload().await?)?;
        }
    }

    Ok(())
}
