//! Line-oriented control plane on stdin
//!
//! ```text
//! send <address> <payload>   queue a payload, e.g. `send 5C:F8:21:9E:55:84 |ON@`
//! status                     print mode, queue depth and counters
//! help                       list commands
//! quit                       stop the gateway
//! ```
//!
//! Sends never block the prompt: the request is queued and its outcome is logged
//! when the gateway gets to it.

use blegate_core::PeripheralAddress;
use blegate_runtime::GatewayHandle;
use tokio::io::{self, AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{info, warn};

const HELP: &str = "commands: send <address> <payload> | status | help | quit";

/// One parsed input line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InteractiveCommand {
    Send {
        target: PeripheralAddress,
        payload: String,
    },
    Status,
    Help,
    Quit,
}

/// Parse a line; blank lines yield `Ok(None)`
pub fn parse_line(line: &str) -> Result<Option<InteractiveCommand>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    let (verb, rest) = match line.split_once(char::is_whitespace) {
        Some((verb, rest)) => (verb, rest.trim()),
        None => (line, ""),
    };

    match verb.to_ascii_lowercase().as_str() {
        "send" => {
            let (address, payload) = rest
                .split_once(char::is_whitespace)
                .ok_or_else(|| "usage: send <address> <payload>".to_string())?;
            let target = address
                .parse::<PeripheralAddress>()
                .map_err(|e| e.to_string())?;
            let payload = payload.trim();
            if payload.is_empty() {
                return Err("payload must not be empty".to_string());
            }
            Ok(Some(InteractiveCommand::Send {
                target,
                payload: payload.to_string(),
            }))
        }
        "status" => Ok(Some(InteractiveCommand::Status)),
        "help" | "?" => Ok(Some(InteractiveCommand::Help)),
        "quit" | "exit" => Ok(Some(InteractiveCommand::Quit)),
        other => Err(format!("unknown command '{}'", other)),
    }
}

/// Serve commands from `input` until `quit` or end of input
pub async fn run_interactive<R, W>(handle: &GatewayHandle, input: R, mut output: W) -> io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = input.lines();
    output.write_all(format!("{}\n", HELP).as_bytes()).await?;

    while let Some(line) = lines.next_line().await? {
        let reply = match parse_line(&line) {
            Ok(None) => continue,
            Ok(Some(InteractiveCommand::Quit)) => break,
            Ok(Some(InteractiveCommand::Help)) => HELP.to_string(),
            Ok(Some(InteractiveCommand::Status)) => status_line(handle),
            Ok(Some(InteractiveCommand::Send { target, payload })) => {
                queue_send(handle, target, payload)
            }
            Err(e) => format!("error: {}", e),
        };
        output.write_all(format!("{}\n", reply).as_bytes()).await?;
        output.flush().await?;
    }

    Ok(())
}

fn queue_send(handle: &GatewayHandle, target: PeripheralAddress, payload: String) -> String {
    match handle.enqueue(target, payload.clone().into_bytes()) {
        Ok(ticket) => {
            let request_id = ticket.request_id();
            tokio::spawn(async move {
                match ticket.await {
                    Ok(receipt) => info!(
                        "Request #{} delivered {:?} to {} in {} attempt(s)",
                        request_id, payload, receipt.target, receipt.attempts
                    ),
                    Err(e) => warn!("Request #{} failed: {}", request_id, e),
                }
            });
            format!("queued #{} -> {}", request_id, target)
        }
        Err(e) => format!("error: {}", e),
    }
}

fn status_line(handle: &GatewayHandle) -> String {
    let stats = handle.stats();
    format!(
        "mode {} | queued {} | rx {} | sent {} | failed {} | listener connects {}",
        handle.mode(),
        handle.queue_depth(),
        stats.notifications_received,
        stats.sends_succeeded,
        stats.sends_failed,
        stats.listener_connects
    )
}
