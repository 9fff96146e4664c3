use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "warden", about = "Warden face monitoring CLI")]
struct Cli {
    /// Bus the daemon is registered on
    #[arg(long, value_enum, default_value_t = Bus::Session, global = true)]
    bus: Bus,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Bus {
    Session,
    System,
}

#[derive(Subcommand)]
enum Commands {
    /// Show daemon status
    Status,
    /// List known identities
    Known {
        /// Only names containing this text (case-insensitive)
        #[arg(short, long, default_value = "")]
        search: String,
    },
    /// List unknown faces, newest first
    Unknown,
    /// Name an unknown face, turning it into a known identity
    Promote {
        /// Unknown face id
        id: i64,
        #[command(flatten)]
        details: DetailArgs,
    },
    /// Add a known identity from an image and its embedding
    Enroll {
        #[command(flatten)]
        details: DetailArgs,
        /// Face image, copied into the known-faces directory
        #[arg(long)]
        image: PathBuf,
        /// JSON file holding the embedding as an array of numbers
        #[arg(long)]
        embedding: PathBuf,
    },
    /// Update the details of a known identity
    Edit {
        /// Identity id
        id: i64,
        #[command(flatten)]
        details: DetailArgs,
    },
    /// Delete a known identity and its image
    RemoveKnown {
        /// Identity id
        id: i64,
    },
    /// Delete an unknown face without naming it
    Discard {
        /// Unknown face id
        id: i64,
    },
}

#[derive(Args)]
struct DetailArgs {
    /// Display name (required)
    #[arg(short, long)]
    name: String,
    #[arg(long)]
    contact: Option<String>,
    #[arg(long)]
    age: Option<String>,
    #[arg(long)]
    gender: Option<String>,
    #[arg(long)]
    address: Option<String>,
    #[arg(long)]
    occupation: Option<String>,
}

impl DetailArgs {
    /// Split into the name and the `a{ss}` detail map expected by the daemon.
    fn into_parts(self) -> (String, HashMap<String, String>) {
        let fields = [
            ("contact", self.contact),
            ("age", self.age),
            ("gender", self.gender),
            ("address", self.address),
            ("occupation", self.occupation),
        ]
        .into_iter()
        .filter_map(|(k, v)| v.map(|v| (k.to_string(), v)))
        .collect();
        (self.name, fields)
    }
}

#[zbus::proxy(
    interface = "org.warden.Monitor1",
    default_service = "org.warden.Monitor1",
    default_path = "/org/warden/Monitor1"
)]
trait Monitor {
    async fn status(&self) -> zbus::Result<String>;
    async fn list_known(&self, query: &str) -> zbus::Result<String>;
    async fn list_unknown(&self) -> zbus::Result<String>;
    async fn promote(
        &self,
        cluster_id: i64,
        name: &str,
        details: HashMap<String, String>,
    ) -> zbus::Result<String>;
    async fn enroll(
        &self,
        name: &str,
        details: HashMap<String, String>,
        image_path: &str,
        embedding: Vec<f64>,
    ) -> zbus::Result<String>;
    async fn edit_known(&self, id: i64, name: &str, details: HashMap<String, String>) -> zbus::Result<bool>;
    async fn remove_known(&self, id: i64) -> zbus::Result<bool>;
    async fn discard_unknown(&self, id: i64) -> zbus::Result<bool>;
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let builder = match cli.bus {
        Bus::Session => zbus::connection::Builder::session()?,
        Bus::System => zbus::connection::Builder::system()?,
    };
    let conn = builder
        .method_timeout(std::time::Duration::from_secs(10))
        .build()
        .await
        .context("connecting to D-Bus")?;
    let proxy = MonitorProxy::new(&conn).await?;
    tracing::debug!(bus = ?cli.bus, "connected to wardend");

    match cli.command {
        Commands::Status => {
            let status = proxy.status().await.context("is wardend running?")?;
            print_json(&status)?;
        }
        Commands::Known { search } => {
            print_json(&proxy.list_known(&search).await?)?;
        }
        Commands::Unknown => {
            print_json(&proxy.list_unknown().await?)?;
        }
        Commands::Promote { id, details } => {
            let (name, fields) = details.into_parts();
            let identity = proxy.promote(id, &name, fields).await?;
            println!("Promoted unknown face {id}:");
            print_json(&identity)?;
        }
        Commands::Enroll {
            details,
            image,
            embedding,
        } => {
            let embedding = read_embedding(&embedding)?;
            let image = std::fs::canonicalize(&image)
                .with_context(|| format!("resolving {}", image.display()))?;
            let (name, fields) = details.into_parts();
            let identity = proxy
                .enroll(&name, fields, &image.to_string_lossy(), embedding)
                .await?;
            println!("Enrolled:");
            print_json(&identity)?;
        }
        Commands::Edit { id, details } => {
            let (name, fields) = details.into_parts();
            proxy.edit_known(id, &name, fields).await?;
            println!("Updated identity {id}");
        }
        Commands::RemoveKnown { id } => {
            proxy.remove_known(id).await?;
            println!("Removed identity {id}");
        }
        Commands::Discard { id } => {
            proxy.discard_unknown(id).await?;
            println!("Discarded unknown face {id}");
        }
    }

    Ok(())
}

fn read_embedding(path: &Path) -> Result<Vec<f64>> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("{} is not a JSON array of numbers", path.display()))
}

/// Pretty-print a JSON reply from the daemon.
fn print_json(raw: &str) -> Result<()> {
    let value: serde_json::Value = serde_json::from_str(raw).context("daemon returned invalid JSON")?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}
