//! Request file command handlers

use anyhow::{Context, Result};
use colored::*;
use serde_json::{Value, json};
use std::fs;
use std::path::Path;

use super::{ComposeCommands, ConnectionArgs, ExecuteCommands, OutputFormat};
use dynamics_webapi::api::{
    ComposedRequest, ReqwestTransport, Request, RequestBody, RequestComposer, StaticTokenProvider,
    WebApiClient, convert_to_batch,
};
use dynamics_webapi::config::WebApiConfig;

/// Parsed request file
enum RequestFile {
    Single(Request),
    Batch(Vec<Request>),
}

/// Print the composed HTTP request(s) without sending anything
pub async fn handle_compose_command(args: ComposeCommands) -> Result<()> {
    if args.no_color {
        colored::control::set_override(false);
    }

    let config = load_config(&args.connection)?;
    let composer = RequestComposer::new(&config);

    match read_request_file(&args.file)? {
        RequestFile::Single(request) => {
            let composed = composer
                .compose(&request)
                .context("Failed to compose request")?;
            print_composed(&composed, &config.data_api_url());
        }
        RequestFile::Batch(requests) => {
            let composed = requests
                .iter()
                .map(|request| composer.compose(request))
                .collect::<Result<Vec<_>, _>>()
                .context("Failed to compose batch request")?;
            let envelope = convert_to_batch(&composed, &config.data_api_url());

            println!(
                "{} {}$batch ({} requests)",
                "POST".bright_yellow().bold(),
                config.data_api_url(),
                requests.len()
            );
            for (name, value) in &envelope.headers {
                println!("{}: {}", name.cyan(), value);
            }
            println!();
            println!("{}", envelope.body_text());
        }
    }

    Ok(())
}

/// Send the request(s) and print the interpreted result
pub async fn handle_execute_command(args: ExecuteCommands) -> Result<()> {
    if args.no_color {
        colored::control::set_override(false);
    }

    let config = load_config(&args.connection)?;
    let token = args
        .token
        .or_else(|| std::env::var("DYNAMICS_TOKEN").ok())
        .ok_or_else(|| anyhow::anyhow!("No token provided. Use --token or set DYNAMICS_TOKEN."))?;

    let transport = ReqwestTransport::new(&config).context("Failed to create HTTP transport")?;
    let client =
        WebApiClient::new(config, transport).with_token_provider(StaticTokenProvider::new(token));

    let output = match read_request_file(&args.file)? {
        RequestFile::Single(request) => {
            let result = client
                .execute(&request)
                .await
                .context("Request failed")?;
            serde_json::to_value(&result).context("Failed to serialize result")?
        }
        RequestFile::Batch(requests) => {
            let mut batch = client.batch();
            for request in requests {
                batch.push(request);
            }
            let results = batch.execute().await.context("Batch request failed")?;

            let mut failures = 0;
            let entries: Vec<Value> = results
                .into_iter()
                .map(|result| match result {
                    Ok(value) => json!({ "result": value }),
                    Err(err) => {
                        failures += 1;
                        json!({ "error": err.to_string(), "status": err.status() })
                    }
                })
                .collect();

            if failures > 0 {
                eprintln!(
                    "{} {} of {} request(s) failed",
                    "warning:".yellow().bold(),
                    failures,
                    entries.len()
                );
            }
            Value::Array(entries)
        }
    };

    let formatted = match args.format {
        OutputFormat::Json => serde_json::to_string_pretty(&output),
        OutputFormat::JsonCompact => serde_json::to_string(&output),
    }
    .context("Failed to format JSON output")?;
    println!("{}", formatted);

    Ok(())
}

fn load_config(connection: &ConnectionArgs) -> Result<WebApiConfig> {
    let mut config = match (&connection.config, &connection.server_url) {
        (Some(path), _) => WebApiConfig::load(path)?,
        (None, Some(url)) => {
            WebApiConfig::from_env().unwrap_or_else(|_| WebApiConfig::new(url.clone()))
        }
        (None, None) => WebApiConfig::from_env().context(
            "No configuration found. Use --config, --server-url or set DYNAMICS_SERVER_URL.",
        )?,
    };

    if let Some(url) = &connection.server_url {
        config.server_url = url.clone();
    }

    Ok(config)
}

fn read_request_file(path: &Path) -> Result<RequestFile> {
    if !path.exists() {
        anyhow::bail!("Request file does not exist: {}", path.display());
    }

    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read request file: {}", path.display()))?;
    let value: Value = serde_json::from_str(&content)
        .with_context(|| format!("Request file is not valid JSON: {}", path.display()))?;

    match value {
        Value::Array(items) => {
            if items.is_empty() {
                anyhow::bail!("Request file contains an empty batch: {}", path.display());
            }
            let requests = items
                .into_iter()
                .enumerate()
                .map(|(index, item)| {
                    Request::from_value(item)
                        .with_context(|| format!("Invalid request at index {}", index))
                })
                .collect::<Result<Vec<_>>>()?;
            Ok(RequestFile::Batch(requests))
        }
        other => Ok(RequestFile::Single(
            Request::from_value(other).context("Invalid request")?,
        )),
    }
}

fn print_composed(request: &ComposedRequest, data_api_url: &str) {
    let url = if request.path.starts_with("http://") || request.path.starts_with("https://") {
        request.path.clone()
    } else {
        format!("{}{}", data_api_url, request.path)
    };

    println!("{} {}", request.method.to_string().bright_yellow().bold(), url);
    for (name, value) in &request.headers {
        println!("{}: {}", name.cyan(), value);
    }
    if let Some(timeout) = request.timeout {
        println!("{}", format!("# timeout: {}ms", timeout.as_millis()).dimmed());
    }

    match &request.body {
        Some(RequestBody::Text(text)) => {
            println!();
            println!("{}", text);
        }
        Some(RequestBody::Binary(bytes)) => {
            println!();
            println!("{}", format!("<{} bytes of binary data>", bytes.len()).dimmed());
        }
        None => {}
    }
}
