use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::Method;
use serde_json::Value;

#[derive(Parser)]
#[command(name = "config-cli")]
#[command(about = "Admin client for a live-config instance", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8081")]
    url: String,

    #[arg(short, long, env = "LIVE_CONFIG_API_KEY")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Instance status and runtime statistics
    Status,
    /// Print the live configuration
    Config,
    /// Merge a JSON document into the live configuration
    Set {
        /// JSON object, e.g. '{"server": {"port": 8080}}'
        json: String,
    },
    /// List snapshots
    Snapshots,
    /// Roll back to a snapshot
    Rollback { id: String },
    /// Reload every change source now
    Reload,
    /// Query the audit log
    Audit {
        #[arg(long)]
        action: Option<String>,
        #[arg(long)]
        source: Option<String>,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Export the audit log
    Export {
        #[arg(long, default_value = "json")]
        format: String,
    },
    /// Sync status
    Sync,
    /// Known peers
    Peers,
    /// Cache statistics
    Cache,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    let mut headers = HeaderMap::new();
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", cli.key))?,
    );

    let (method, path, body) = match cli.command {
        Commands::Status => (Method::GET, "/admin/status".to_string(), None),
        Commands::Config => (Method::GET, "/admin/config".to_string(), None),
        Commands::Set { json } => (
            Method::PATCH,
            "/admin/config".to_string(),
            Some(serde_json::from_str::<Value>(&json)?),
        ),
        Commands::Snapshots => (Method::GET, "/admin/snapshots".to_string(), None),
        Commands::Rollback { id } => (Method::POST, format!("/admin/snapshots/{id}/rollback"), None),
        Commands::Reload => (Method::POST, "/admin/reload".to_string(), None),
        Commands::Audit { action, source, limit } => {
            let mut query = Vec::new();
            if let Some(action) = action {
                query.push(format!("action={action}"));
            }
            if let Some(source) = source {
                query.push(format!("source={source}"));
            }
            if let Some(limit) = limit {
                query.push(format!("limit={limit}"));
            }
            (Method::GET, format!("/admin/audit?{}", query.join("&")), None)
        }
        Commands::Export { format } => {
            let res = client
                .get(format!("{}/admin/audit/export?format={}", cli.url, format))
                .headers(headers)
                .send()
                .await?;
            if !res.status().is_success() {
                eprintln!("Error: {}", res.status());
            }
            println!("{}", res.text().await?);
            return Ok(());
        }
        Commands::Sync => (Method::GET, "/admin/sync".to_string(), None),
        Commands::Peers => (Method::GET, "/admin/peers".to_string(), None),
        Commands::Cache => (Method::GET, "/admin/cache".to_string(), None),
    };

    let mut request = client
        .request(method, format!("{}{}", cli.url, path))
        .headers(headers);
    if let Some(body) = body {
        request = request.json(&body);
    }
    print_response(request.send().await?).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    if !res.status().is_success() {
        eprintln!("Error: {}", res.status());
    }
    let body: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}
