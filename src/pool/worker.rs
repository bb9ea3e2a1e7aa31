//! Persistent parse worker: the subprocess side of the pool.
//!
//! The worker reads one JSON request per line from stdin and writes one
//! JSON response per line to stdout. It loads the parser once, never
//! touches the catalog, and exits when stdin closes, on an explicit
//! shutdown command, or by self-recycling after a bounded parse count.

use crate::parsing::script::parse_source;
use crate::store::decode_text;
use serde::{Deserialize, Serialize};
use std::io::{BufRead, Write};
use std::path::PathBuf;

/// A parse request, by path or by inline content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerRequest {
    pub id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

/// Anything the supervisor may write to a worker.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum WorkerInbound {
    Command { command: String },
    Request(WorkerRequest),
}

/// Anything a worker may write to the supervisor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WorkerOutbound {
    Ready {
        ready: bool,
        pid: u32,
    },
    Recycle {
        recycle: bool,
        parses: u32,
    },
    Ok {
        id: u64,
        ok: bool,
        /// Serialized [`crate::parsing::script::ParseOutcome`]: the partial
        /// or complete AST plus diagnostics and the parse_ok flag.
        ast_json: String,
        node_count: u64,
    },
    Err {
        id: u64,
        ok: bool,
        error_type: String,
        error: String,
    },
}

/// Handle one request. Always returns a response carrying the request id.
pub fn handle_request(request: &WorkerRequest) -> WorkerOutbound {
    let (text, filename) = if let Some(path) = &request.path {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) => {
                return WorkerOutbound::Err {
                    id: request.id,
                    ok: false,
                    error_type: "FileNotFound".into(),
                    error: format!("cannot read '{}': {e}", path.display()),
                };
            }
        };
        match decode_text(&bytes) {
            Some(text) => (text, path.to_string_lossy().into_owned()),
            None => {
                return WorkerOutbound::Err {
                    id: request.id,
                    ok: false,
                    error_type: "EncodingError".into(),
                    error: format!("'{}' is not decodable text", path.display()),
                };
            }
        }
    } else if let Some(content) = &request.content {
        let filename = request.filename.clone().unwrap_or_else(|| "<inline>".into());
        (content.clone(), filename)
    } else {
        return WorkerOutbound::Err {
            id: request.id,
            ok: false,
            error_type: "InvalidRequest".into(),
            error: "request must have 'path' or 'content'".into(),
        };
    };

    let outcome = parse_source(&text, &filename);
    let node_count = outcome.node_count();
    match serde_json::to_string(&outcome) {
        Ok(ast_json) => WorkerOutbound::Ok {
            id: request.id,
            ok: true,
            ast_json,
            node_count,
        },
        Err(e) => WorkerOutbound::Err {
            id: request.id,
            ok: false,
            error_type: "SerializeError".into(),
            error: e.to_string(),
        },
    }
}

/// The worker loop over arbitrary reader/writer pairs (testable without a
/// real process).
pub fn run_worker_io<R: BufRead, W: Write>(
    reader: R,
    mut writer: W,
    max_parses: u32,
) -> std::io::Result<()> {
    let ready = WorkerOutbound::Ready {
        ready: true,
        pid: std::process::id(),
    };
    writeln!(writer, "{}", serde_json::to_string(&ready)?)?;
    writer.flush()?;

    let mut parses: u32 = 0;
    for line in reader.lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let inbound: WorkerInbound = match serde_json::from_str(line) {
            Ok(inbound) => inbound,
            Err(e) => {
                let response = WorkerOutbound::Err {
                    id: 0,
                    ok: false,
                    error_type: "InvalidRequest".into(),
                    error: format!("invalid request JSON: {e}"),
                };
                writeln!(writer, "{}", serde_json::to_string(&response)?)?;
                writer.flush()?;
                continue;
            }
        };

        let request = match inbound {
            WorkerInbound::Command { command } => {
                if command == "shutdown" {
                    break;
                }
                continue;
            }
            WorkerInbound::Request(request) => request,
        };

        let response = handle_request(&request);
        parses += 1;
        writeln!(writer, "{}", serde_json::to_string(&response)?)?;
        writer.flush()?;

        if parses >= max_parses {
            let recycle = WorkerOutbound::Recycle {
                recycle: true,
                parses,
            };
            writeln!(writer, "{}", serde_json::to_string(&recycle)?)?;
            writer.flush()?;
            break;
        }
    }
    Ok(())
}

/// Process entry point used by the hidden CLI subcommand.
pub fn run_worker(max_parses: u32) -> i32 {
    let stdin = std::io::stdin();
    let stdout = std::io::stdout();
    match run_worker_io(stdin.lock(), stdout.lock(), max_parses) {
        Ok(()) => 0,
        Err(_) => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn run_lines(lines: &[String], max_parses: u32) -> Vec<WorkerOutbound> {
        let input = lines.join("\n");
        let mut output = Vec::new();
        run_worker_io(Cursor::new(input), &mut output, max_parses).unwrap();
        String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    fn request_line(id: u64, content: &str) -> String {
        serde_json::to_string(&WorkerRequest {
            id,
            path: None,
            content: Some(content.to_string()),
            filename: Some("inline.txt".into()),
            timeout_ms: Some(30_000),
        })
        .unwrap()
    }

    #[test]
    fn worker_signals_ready_first() {
        let out = run_lines(&[], 100);
        assert!(matches!(out[0], WorkerOutbound::Ready { ready: true, .. }));
    }

    #[test]
    fn content_parse_returns_ast_and_count() {
        let out = run_lines(&[request_line(7, "trait_brave = { category = personality }")], 100);
        match &out[1] {
            WorkerOutbound::Ok {
                id,
                ok,
                ast_json,
                node_count,
            } => {
                assert_eq!(*id, 7);
                assert!(*ok);
                // root + block + assignment + value
                assert_eq!(*node_count, 4);
                let outcome: crate::parsing::script::ParseOutcome =
                    serde_json::from_str(ast_json).unwrap();
                assert!(outcome.parse_ok);
            }
            other => panic!("unexpected response {other:?}"),
        }
    }

    #[test]
    fn diagnostics_still_count_as_protocol_ok() {
        let out = run_lines(&[request_line(1, "a = { unclosed")], 100);
        match &out[1] {
            WorkerOutbound::Ok { ast_json, .. } => {
                let outcome: crate::parsing::script::ParseOutcome =
                    serde_json::from_str(ast_json).unwrap();
                assert!(!outcome.parse_ok);
                assert!(!outcome.diagnostics.is_empty());
            }
            other => panic!("unexpected response {other:?}"),
        }
    }

    #[test]
    fn missing_path_and_content_is_an_error() {
        let line = r#"{"id": 3}"#.to_string();
        let out = run_lines(&[line], 100);
        match &out[1] {
            WorkerOutbound::Err {
                id,
                ok,
                error_type,
                ..
            } => {
                assert_eq!(*id, 3);
                assert!(!ok);
                assert_eq!(error_type, "InvalidRequest");
            }
            other => panic!("unexpected response {other:?}"),
        }
    }

    #[test]
    fn worker_recycles_after_bounded_parses() {
        let out = run_lines(&[request_line(1, "a = 1"), request_line(2, "b = 2")], 2);
        match out.last().unwrap() {
            WorkerOutbound::Recycle { recycle, parses } => {
                assert!(recycle);
                assert_eq!(*parses, 2);
            }
            other => panic!("unexpected response {other:?}"),
        }
    }

    #[test]
    fn shutdown_command_ends_the_loop() {
        let out = run_lines(
            &[
                r#"{"command": "shutdown"}"#.to_string(),
                request_line(9, "never = parsed"),
            ],
            100,
        );
        // Only the ready line; the request after shutdown is never read.
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn invalid_json_is_answered_not_fatal() {
        let out = run_lines(&["not json at all".to_string(), request_line(4, "a = 1")], 100);
        assert!(matches!(out[1], WorkerOutbound::Err { .. }));
        assert!(matches!(out[2], WorkerOutbound::Ok { id: 4, .. }));
    }
}
