//! Line-oriented JSON request handling for the service binary.
//!
//! Each request is one JSON object naming an operation:
//!
//! ```text
//! {"submit": ["R1","CRED","2017-01-01","USD","1000","BANKA","BANKB","a","b","SHA"]}
//! {"institution": "BANKA"}
//! {"view": "BANKA"}
//! {"transactions": "AUDITOR"}
//! {"create": {"owner": "BANKD", "accounts": []}}
//! "metrics"
//! "metrics_prometheus"
//! ```
//!
//! Replies are `{"ok": ...}` or `{"error": {"code": ..., "message": ...}}`.

use std::future::Future;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{info, warn};

use nostrovostro_common::{InstitutionId, InstitutionRecord, Result, SettleError};

use crate::coordinator::Coordinator;

/// A request read from the input stream.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    Submit(Vec<String>),
    Create(InstitutionRecord),
    Institution(InstitutionId),
    View(InstitutionId),
    Transactions(InstitutionId),
    Metrics,
    MetricsPrometheus,
}

/// Reply to one request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Reply {
    Ok(Value),
    Error { code: String, message: String },
}

impl Reply {
    fn from_result(result: Result<Value>) -> Self {
        match result {
            Ok(value) => Reply::Ok(value),
            Err(e) => Reply::from_error(&e),
        }
    }

    pub fn from_error(error: &SettleError) -> Self {
        Reply::Error {
            code: error.error_code().to_string(),
            message: error.to_string(),
        }
    }

    /// Reply for a line that is not a valid request.
    pub fn unparseable(error: &serde_json::Error) -> Self {
        Reply::Error {
            code: "BAD_REQUEST".to_string(),
            message: error.to_string(),
        }
    }
}

/// Parse one input line.
pub fn parse(line: &str) -> std::result::Result<Command, serde_json::Error> {
    serde_json::from_str(line)
}

/// Run a request against the coordinator.
pub async fn execute(coordinator: &Coordinator, command: Command) -> Reply {
    let result = match command {
        Command::Submit(fields) => to_value(coordinator.submit_transaction(&fields).await),
        Command::Create(record) => coordinator
            .create_institution(record)
            .await
            .map(|()| Value::Bool(true)),
        Command::Institution(id) => to_value(coordinator.get_institution(&id).await),
        Command::View(id) => to_value(coordinator.get_bilateral_view(&id).await),
        Command::Transactions(id) => to_value(coordinator.get_transactions(&id).await),
        Command::Metrics => to_value(Ok(coordinator.metrics())),
        Command::MetricsPrometheus => Ok(Value::String(coordinator.metrics_prometheus())),
    };
    Reply::from_result(result)
}

/// Answer requests from `input` until it ends or `shutdown` completes.
/// A shutdown is noticed while waiting for the next line.
pub async fn serve<R, W, F>(
    coordinator: &Coordinator,
    input: R,
    mut output: W,
    shutdown: F,
) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
    F: Future<Output = ()>,
{
    let mut lines = input.lines();
    tokio::pin!(shutdown);

    loop {
        let line = tokio::select! {
            _ = &mut shutdown => {
                info!("Request loop interrupted");
                break;
            }
            line = lines.next_line() => line?,
        };
        let Some(line) = line else { break };
        if line.trim().is_empty() {
            continue;
        }

        let reply = match parse(&line) {
            Ok(request) => execute(coordinator, request).await,
            Err(e) => {
                warn!(error = %e, "Unparseable request");
                Reply::unparseable(&e)
            }
        };

        let mut out = serde_json::to_vec(&reply)?;
        out.push(b'\n');
        output.write_all(&out).await?;
        output.flush().await?;
    }
    Ok(())
}

fn to_value<T: Serialize>(result: Result<T>) -> Result<Value> {
    Ok(serde_json::to_value(result?)?)
}
