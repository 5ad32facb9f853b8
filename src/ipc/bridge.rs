//! IPC bridge: stdin reader and stdout event emitter.
//!
//! A blocking stdin reader thread sends deserialized commands through an
//! mpsc channel; events go out as JSON lines on stdout.

use std::io::{self, BufRead, Write};

use tokio::sync::mpsc;
use tracing::{debug, error};

use super::{SpeechCommand, SpeechEvent};

/// Emit a `SpeechEvent` as a JSON line on stdout and flush.
pub fn emit_event(event: &SpeechEvent) {
    let json = match serde_json::to_string(event) {
        Ok(j) => j,
        Err(e) => {
            error!("Failed to serialize event: {}", e);
            return;
        }
    };
    let stdout = io::stdout();
    let mut handle = stdout.lock();
    // Pipe may be closed; nothing useful to do about it.
    let _ = writeln!(handle, "{}", json);
    let _ = handle.flush();
}

/// Convenience helper for emitting error events.
pub fn emit_error(message: &str) {
    emit_event(&SpeechEvent::Error {
        message: message.to_string(),
    });
}

/// Parse one input line. Blank lines yield `Ok(None)`.
pub fn parse_command(line: &str) -> Result<Option<SpeechCommand>, serde_json::Error> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    serde_json::from_str(trimmed).map(Some)
}

/// Spawn a blocking thread that reads JSON lines from stdin and forwards
/// them through the returned channel.
///
/// The thread exits when stdin is closed (controller gone) or on an
/// unrecoverable read error.
pub fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<SpeechCommand> {
    let (tx, rx) = mpsc::unbounded_channel();

    std::thread::spawn(move || {
        let stdin = io::stdin();
        let reader = stdin.lock();
        for line in reader.lines() {
            match line {
                Ok(text) => match parse_command(&text) {
                    Ok(Some(cmd)) => {
                        debug!(?cmd, "Received command");
                        if tx.send(cmd).is_err() {
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => {
                        error!("Invalid JSON command: {} (input: {})", e, text.trim());
                        emit_error(&format!("Invalid JSON command: {}", e));
                    }
                },
                Err(e) => {
                    error!("stdin read error: {}", e);
                    break;
                }
            }
        }
        debug!("stdin reader thread exiting");
    });

    rx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_blank_line() {
        assert!(parse_command("   ").unwrap().is_none());
    }

    #[test]
    fn test_parse_invalid_line() {
        assert!(parse_command("{\"command\":\"dance\"}").is_err());
        assert!(parse_command("not json").is_err());
    }

    #[test]
    fn test_parse_ping() {
        let cmd = parse_command(" {\"command\":\"ping\"} \n").unwrap().unwrap();
        assert!(matches!(cmd, SpeechCommand::Ping {}));
    }
}
