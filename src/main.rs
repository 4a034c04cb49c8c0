//! dblink - run one statement through the adapter and print the result as JSON.

use clap::Parser;
use dblink::models::QueryParam;
use dblink::{Config, ConnectionConfig, DbError, Handler};
use futures_util::TryStreamExt;
use std::io::Write;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber for logging.
///
/// Logs go to stderr; stdout carries the query output.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        subscriber
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

/// Parse `--param` values. Anything that is not valid JSON is taken as a string.
fn parse_params(raw: &[String]) -> Vec<QueryParam> {
    raw.iter()
        .map(|value| {
            serde_json::from_str::<QueryParam>(value)
                .unwrap_or_else(|_| QueryParam::String(value.clone()))
        })
        .collect()
}

async fn run(config: &Config) -> Result<(), DbError> {
    let connection = ConnectionConfig::parse(&config.database)?;
    let handler = Handler::init(&connection).await?;
    let args = parse_params(&config.params);

    let outcome = if config.stream {
        stream_rows(&handler, config, args).await
    } else {
        let result = handler.execute(&config.sql, &args, None).await;
        result.and_then(|result| {
            let json = serde_json::to_string_pretty(&result)
                .map_err(|e| DbError::internal(format!("Failed to serialize result: {}", e)))?;
            println!("{json}");
            Ok(())
        })
    };

    handler.shutdown().await;
    outcome
}

async fn stream_rows(handler: &Handler, config: &Config, args: Vec<QueryParam>) -> Result<(), DbError> {
    let mut rows = handler.stream(config.sql.as_str(), args, None).await?;
    let mut stdout = std::io::stdout().lock();
    while let Some(row) = rows.try_next().await? {
        let line = serde_json::to_string(&row)
            .map_err(|e| DbError::internal(format!("Failed to serialize row: {}", e)))?;
        if writeln!(stdout, "{line}").is_err() {
            // Reader went away; stop early and let the stream give its connection back
            rows.close();
            break;
        }
    }
    info!(rows = rows.rows_delivered(), "Stream finished");
    Ok(())
}

#[tokio::main]
async fn main() {
    let config = Config::parse();
    init_tracing(&config);

    if let Err(e) = run(&config).await {
        error!(error = %e, "Statement failed");
        eprintln!("Error: {}", e);
        if let Some(suggestion) = e.suggestion() {
            eprintln!("Hint: {}", suggestion);
        }
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_params() {
        let raw = vec![
            "42".to_string(),
            "\"text\"".to_string(),
            "null".to_string(),
            "plain words".to_string(),
        ];
        let params = parse_params(&raw);
        assert_eq!(params[0], QueryParam::Int(42));
        assert_eq!(params[1], QueryParam::String("text".to_string()));
        assert_eq!(params[2], QueryParam::Null);
        assert_eq!(params[3], QueryParam::String("plain words".to_string()));
    }
}
