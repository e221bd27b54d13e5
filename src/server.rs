use std::time::Instant;

use futures::{SinkExt, StreamExt};
use serde::Serialize;
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};
use tracing::{debug, error};

use crate::engine::{Engine, EngineError, Signal};
use crate::limits::MAX_LINE_LEN;
use crate::observability::{COMMAND_DURATION_SECONDS, COMMANDS_TOTAL, command_label};
use crate::protocol::{self, Command};

/// Serve one client: one JSON response line per request line, until the
/// client hangs up.
pub async fn process_connection(socket: TcpStream, engine: Engine) -> Result<(), LinesCodecError> {
    let mut lines = Framed::new(socket, LinesCodec::new_with_max_length(MAX_LINE_LEN));

    while let Some(line) = lines.next().await {
        let response = match line {
            Ok(line) if line.trim().is_empty() => continue,
            Ok(line) => handle_line(&engine, &line).await,
            // The framed stream ends after a decode error; answer, then hang up.
            Err(LinesCodecError::MaxLineLengthExceeded) => {
                let response = failure("rejected", format!("line longer than {MAX_LINE_LEN} bytes"));
                lines.send(response.to_string()).await?;
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        lines.send(response.to_string()).await?;
    }
    Ok(())
}

async fn handle_line(engine: &Engine, line: &str) -> Value {
    match protocol::parse_command(line) {
        Ok(cmd) => execute(engine, cmd).await,
        Err(e) => {
            debug!("bad request {line:?}: {e}");
            metrics::counter!(COMMANDS_TOTAL, "command" => "unknown", "status" => "rejected")
                .increment(1);
            failure("rejected", e.to_string())
        }
    }
}

/// Run one command and render its response.
pub async fn execute(engine: &Engine, cmd: Command) -> Value {
    let label = command_label(&cmd);
    let started = Instant::now();

    let result = match cmd {
        Command::Ping => Ok(json!("pong")),
        Command::Availability { from, until } => {
            data(engine.get_availability_or_default(from, until).await)
        }
        Command::List => data(engine.list_reservations().await),
        Command::Get { id } => data(engine.get_reservation(&id).await),
        Command::Reserve { start, end, user } => {
            data(engine.create_reservation(user, start, end).await)
        }
        Command::Update {
            id,
            start,
            end,
            user,
        } => data(engine.update_reservation(&id, start, end, user).await),
        Command::Cancel { id } => engine
            .delete_reservation(&id)
            .await
            .map(|()| json!({ "id": id })),
    };

    metrics::histogram!(COMMAND_DURATION_SECONDS, "command" => label)
        .record(started.elapsed().as_secs_f64());

    let (status, response) = match result {
        Ok(data) => ("ok", json!({ "status": "ok", "data": data })),
        Err(e) => {
            let status = status_of(e.signal());
            (status, engine_failure(status, &e))
        }
    };
    metrics::counter!(COMMANDS_TOTAL, "command" => label, "status" => status).increment(1);
    response
}

fn data<T: Serialize>(result: Result<T, EngineError>) -> Result<Value, EngineError> {
    result.map(|value| serde_json::to_value(value).unwrap_or_else(|e| json!(e.to_string())))
}

pub fn status_of(signal: Signal) -> &'static str {
    match signal {
        Signal::Rejected => "rejected",
        Signal::Unavailable => "unavailable",
        Signal::NotFound => "not_found",
        Signal::Internal => "error",
    }
}

fn engine_failure(status: &str, e: &EngineError) -> Value {
    if e.signal() == Signal::Internal {
        error!("command failed: {e}");
    }
    let mut response = failure(status, e.to_string());
    if let EngineError::Conflict(conflict) = e {
        response["dates"] = json!(conflict.dates());
    }
    response
}

fn failure(status: &str, message: String) -> Value {
    json!({ "status": status, "message": message })
}
