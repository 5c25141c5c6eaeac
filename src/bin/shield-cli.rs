use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::Value;

use api_shield::config::PolicyConfig;
use api_shield::security::redirect::RedirectValidator;
use api_shield::security::sanitizer::validate_named_field;

#[derive(Parser)]
#[command(name = "shield-cli")]
#[command(about = "Management CLI for the API shield", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8081")]
    url: String,

    #[arg(short, long, env = "SHIELD_ADMIN_KEY", default_value = "")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check shield status
    Status,
    /// List clients tracked by the violation budget
    Violations,
    /// List rate limit windows
    RateLimits,
    /// Show the threat assessment and recent alerts
    Threats,
    /// Validate a redirect target against the default policy
    CheckRedirect {
        url: String,
        #[arg(long, default_value = "http://localhost:3000/")]
        current: String,
    },
    /// Validate a value against a named field contract
    CheckInput { field: String, value: String },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let path = match cli.command {
        Commands::Status => "status",
        Commands::Violations => "violations",
        Commands::RateLimits => "rate-limits",
        Commands::Threats => "threats",
        Commands::CheckRedirect { url, current } => {
            let policy = PolicyConfig::default();
            let validation = RedirectValidator::new(&policy).validate(&url, &current);
            println!("{}", serde_json::to_string_pretty(&validation)?);
            return Ok(());
        }
        Commands::CheckInput { field, value } => {
            let report = match validate_named_field(&field, &value) {
                Some(Ok(normalized)) => serde_json::json!({
                    "field": field,
                    "valid": true,
                    "value": normalized,
                }),
                Some(Err(err)) => serde_json::json!({
                    "field": field,
                    "valid": false,
                    "code": err.code,
                    "message": err.message,
                }),
                None => {
                    eprintln!("Error: unknown field '{field}'");
                    std::process::exit(2);
                }
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
            return Ok(());
        }
    };

    let client = reqwest::Client::new();
    let mut headers = HeaderMap::new();
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", cli.key))?,
    );

    let res = client
        .get(format!("{}/admin/{path}", cli.url.trim_end_matches('/')))
        .headers(headers)
        .send()
        .await?;
    print_response(res).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: Admin API returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        return Ok(());
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
