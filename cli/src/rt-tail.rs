use anyhow::{Context, Result};
use lib_realtime::loggers::{LogOptions, setup_logging};
use lib_realtime::{RealtimeClient, SendOutcome};
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;

mod tail_logic;
use tail_logic::{config, input};

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let config = config::load_config();

    let log_path = setup_logging(&LogOptions {
        log_dir: config.log_dir.clone().unwrap_or_else(|| PathBuf::from("./logs")),
        level: config.log_level.clone().unwrap_or_else(|| "info".to_string()),
        app_name: "rt-tail".to_string(),
    })?;
    log::info!("Logging to {}", log_path.display());

    let url = config.url.clone().context("no endpoint url configured")?;
    let client = RealtimeClient::websocket(&url, config.realtime_options())?;

    let _status = client.on_status_change(|state| log::info!("Connection state: {}", state));
    let mut diagnostics = client.diagnostics();
    tokio::spawn(async move {
        loop {
            match diagnostics.recv().await {
                Ok(diagnostic) => log::debug!("Diagnostic: {:?}", diagnostic),
                Err(RecvError::Lagged(missed)) => log::warn!("Missed {} diagnostics", missed),
                Err(RecvError::Closed) => break,
            }
        }
    });

    if config.topics.is_empty() {
        log::warn!("No --topic given; inbound frames will not be printed.");
    }
    let _subscriptions: Vec<_> = config
        .topics
        .iter()
        .map(|topic| {
            client.subscribe(topic.clone(), |frame| {
                println!("{}", serde_json::to_string(frame)?);
                Ok(())
            })
        })
        .collect();

    client.connect();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                log::info!("Ctrl-C received, disconnecting.");
                break;
            }
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) => match input::parse_line(&line) {
                    Ok(Some(frame)) => {
                        let topic = frame.topic.clone();
                        match client.send(frame) {
                            SendOutcome::Sent | SendOutcome::Queued => {}
                            outcome => log::warn!("Frame for '{}' not accepted: {:?}", topic, outcome),
                        }
                    }
                    Ok(None) => {}
                    Err(e) => log::warn!("Skipping input line: {:#}", e),
                },
                Ok(None) => {
                    log::info!("stdin closed; still tailing until Ctrl-C.");
                    stdin_open = false;
                }
                Err(e) => {
                    log::error!("Failed to read stdin: {}", e);
                    stdin_open = false;
                }
            },
        }
    }

    client.disconnect();
    // Give the writer task a moment to put the close frame on the wire.
    tokio::time::sleep(Duration::from_millis(200)).await;
    log::info!("Final status: {}", serde_json::to_string(&client.status())?);
    Ok(())
}
