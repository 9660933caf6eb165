use base64::{engine::general_purpose::STANDARD, Engine as _};
use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::{json, Value};

#[derive(Parser)]
#[command(name = "cascade-cli")]
#[command(about = "Client for the cascading circuit breaker", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:5320")]
    url: String,

    #[arg(short, long, default_value = "CHANGE_ME_IN_PRODUCTION")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check service status
    Status,
    /// List breaker states and counts
    Breakers,
    /// List endpoints whose status topic is consumed
    Subscriptions,
    /// Send a request through the breaker
    Request {
        /// HTTP method of the downstream call
        method: String,
        /// Downstream URL
        target: String,
        /// Endpoint this call is made on behalf of
        #[arg(long)]
        requiring_endpoint: Option<String>,
        #[arg(long, default_value = "GET")]
        requiring_method: String,
        /// Request body
        #[arg(short, long)]
        data: Option<String>,
    },
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

    let admin_path = match &cli.command {
        Commands::Status => Some("status"),
        Commands::Breakers => Some("breakers"),
        Commands::Subscriptions => Some("subscriptions"),
        Commands::Request { .. } => None,
    };

    if let Some(path) = admin_path {
        let res = client
            .get(format!("{}/admin/{}", cli.url, path))
            .headers(headers)
            .send()
            .await?;
        return print_response(res).await;
    }

    if let Commands::Request {
        method,
        target,
        requiring_endpoint,
        requiring_method,
        data,
    } = cli.command
    {
        let requiring_method = requiring_endpoint.as_ref().map(|_| requiring_method);
        let payload = json!({
            "method": method,
            "url": target,
            "body": data.map(|d| STANDARD.encode(d)),
            "requiring_endpoint": requiring_endpoint,
            "requiring_method": requiring_method,
        });
        let res = client
            .post(format!("{}/v1/request", cli.url))
            .json(&payload)
            .send()
            .await?;
        print_response(res).await?;
    }

    Ok(())
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: service returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        return Ok(());
    }

    let mut json: Value = res.json().await?;
    // Show response bodies as text when they decode cleanly.
    if let Some(body) = json.get_mut("body") {
        if let Some(text) = body
            .as_str()
            .and_then(|b| STANDARD.decode(b).ok())
            .and_then(|bytes| String::from_utf8(bytes).ok())
        {
            *body = Value::String(text);
        }
    }
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
