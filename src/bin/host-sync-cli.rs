use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::Value;

#[derive(Parser)]
#[command(name = "host-sync-cli")]
#[command(about = "Query a running host-sync daemon", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8081")]
    url: String,

    #[arg(short, long, env = "HOST_SYNC_ADMIN_KEY")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Engine summary and pending reloads
    Status,
    /// List hosts with their last outcome
    Hosts,
    /// Show one host's active config, staged candidate and outcome
    Host {
        /// proxy, redirection, dead or stream (or the directory name)
        host_type: String,
        id: u64,
    },
    /// Check whether a domain is already served by another host
    Hostname {
        hostname: String,
        /// Host to leave out, e.g. proxy_host/1
        #[arg(long)]
        ignore: Option<String>,
    },
}

impl Commands {
    fn path(&self) -> String {
        match self {
            Commands::Status => "/admin/status".to_string(),
            Commands::Hosts => "/admin/hosts".to_string(),
            Commands::Host { host_type, id } => format!("/admin/hosts/{}/{}", host_type, id),
            Commands::Hostname { hostname, .. } => format!("/admin/hostnames/{}", hostname),
        }
    }
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

    let mut request = client
        .get(format!("{}{}", cli.url.trim_end_matches('/'), cli.command.path()))
        .headers(headers);
    if let Commands::Hostname { ignore: Some(ignore), .. } = &cli.command {
        request = request.query(&[("ignore", ignore)]);
    }

    let res = request.send().await?;
    print_response(res).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: Admin API returned status {}", status);
        if let Ok(text) = res.text().await {
            if !text.is_empty() {
                eprintln!("Response: {}", text);
            }
        }
        std::process::exit(1);
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
