//! Mock stdio tool provider for integration tests and local experiments.
//!
//! Reads newline-delimited JSON-RPC on stdin and writes responses on stdout.
//!
//! | Method | Behavior |
//! |--------|----------|
//! | `ping` | result `"pong"` |
//! | `echo` | result = params |
//! | `slow` | result = params after `params.ms` milliseconds, answered out of order |
//! | `notify` | emits `notifications/message` (scoped via `_meta.sessionId` when `params.sessionId` is set), result `"ok"` |
//! | `garbage` | writes a non-JSON line, then result `"ok"` |
//! | `server_request` | sends a `roots/list` request to its client, result `"ok"` |
//! | `last_server_reply` | result = the last response the provider received |
//! | `crash` | exits with status 3 without answering |
//!
//! Anything else is answered with `-32601`. Notifications are ignored.
//!
//! ```bash
//! stdiogate --transport ndjson -- cargo run --bin mock_provider
//! ```

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Stdout};
use tokio::sync::Mutex;

type Out = Arc<Mutex<Stdout>>;

async fn emit(out: &Out, message: &Value) {
    let mut line = message.to_string();
    line.push('\n');
    let mut out = out.lock().await;
    // A closed stdout means the gateway is gone; nothing left to do.
    if out.write_all(line.as_bytes()).await.is_err() || out.flush().await.is_err() {
        std::process::exit(0);
    }
}

async fn emit_raw(out: &Out, raw: &str) {
    let mut out = out.lock().await;
    let _ = out.write_all(raw.as_bytes()).await;
    let _ = out.flush().await;
}

fn result(id: &Value, result: Value) -> Value {
    json!({"jsonrpc": "2.0", "id": id, "result": result})
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let out: Out = Arc::new(Mutex::new(tokio::io::stdout()));
    let last_reply: Arc<Mutex<Option<Value>>> = Arc::new(Mutex::new(None));
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        let Ok(message) = serde_json::from_str::<Value>(&line) else {
            continue;
        };
        let Some(method) = message.get("method").and_then(Value::as_str) else {
            if message.get("id").is_some() {
                *last_reply.lock().await = Some(message);
            }
            continue;
        };
        let Some(id) = message.get("id").cloned() else {
            continue;
        };
        let params = message.get("params").cloned().unwrap_or(Value::Null);

        match method {
            "ping" => emit(&out, &result(&id, json!("pong"))).await,
            "echo" => emit(&out, &result(&id, params)).await,
            "slow" => {
                let ms = params.get("ms").and_then(Value::as_u64).unwrap_or(100);
                let out = out.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(ms)).await;
                    emit(&out, &result(&id, params)).await;
                });
            }
            "notify" => {
                let mut note_params = json!({"data": params.get("data").cloned().unwrap_or(Value::Null)});
                if let Some(session) = params.get("sessionId") {
                    note_params["_meta"] = json!({"sessionId": session});
                }
                emit(
                    &out,
                    &json!({"jsonrpc": "2.0", "method": "notifications/message", "params": note_params}),
                )
                .await;
                emit(&out, &result(&id, json!("ok"))).await;
            }
            "garbage" => {
                emit_raw(&out, "this is not json\n").await;
                emit(&out, &result(&id, json!("ok"))).await;
            }
            "server_request" => {
                emit(
                    &out,
                    &json!({"jsonrpc": "2.0", "id": "srv-1", "method": "roots/list"}),
                )
                .await;
                emit(&out, &result(&id, json!("ok"))).await;
            }
            "last_server_reply" => {
                let reply = last_reply.lock().await.clone().unwrap_or(Value::Null);
                emit(&out, &result(&id, reply)).await;
            }
            "crash" => std::process::exit(3),
            other => {
                emit(
                    &out,
                    &json!({
                        "jsonrpc": "2.0",
                        "id": id,
                        "error": {"code": -32601, "message": format!("Method '{other}' not found")}
                    }),
                )
                .await;
            }
        }
    }
}
