//! Speech queue daemon.
//!
//! Reads JSON-line commands on stdin, drives a [`SpeechService`], and
//! reports events as JSON lines on stdout. Logs go to stderr and the
//! rolling log directory.

mod ipc;

use anyhow::Context;
use tracing::{info, warn};

use ipc::bridge::{emit_error, emit_event, spawn_stdin_reader};
use ipc::{SpeechCommand, SpeechEvent};
use speech_queue::config::read_speech_config;
use speech_queue::playback::list_output_devices;
use speech_queue::{logging, SpeakRequest, SpeechService};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init()?;

    // Emit starting event immediately so the controller knows we're alive.
    emit_event(&SpeechEvent::Starting {});

    let config = read_speech_config();
    info!(?config, "Configuration loaded");

    let service = SpeechService::from_config(&config).context("building synthesis client")?;
    service.start().context("spawning speech worker")?;

    let mut cmd_rx = spawn_stdin_reader();

    emit_event(&SpeechEvent::Ready {
        synthesis_url: config.synthesis_url.clone(),
    });
    info!("Speech queue ready");

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(command) => {
                        if !handle_command(&service, command).await {
                            break;
                        }
                    }
                    None => {
                        // stdin closed: controller is gone
                        info!("stdin closed, shutting down");
                        break;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, shutting down");
                break;
            }
        }
    }

    emit_event(&SpeechEvent::Stopping {});
    // Joining the worker blocks until the current item returns.
    tokio::task::spawn_blocking(move || service.shutdown())
        .await
        .context("joining speech worker")?;
    info!("Speech queue stopped");
    Ok(())
}

/// Handle a single command from the controller.
/// Returns `false` if the main loop should exit.
async fn handle_command(service: &SpeechService, cmd: SpeechCommand) -> bool {
    match cmd {
        SpeechCommand::Ping {} => emit_event(&SpeechEvent::Pong {}),

        SpeechCommand::Speak {
            text,
            name,
            style_id,
            voice_params,
            interrupt,
            no_dedup,
        } => {
            let request = SpeakRequest {
                text,
                name,
                style_id,
                voice_params,
                no_dedup,
            };
            let accepted = if interrupt {
                service.enqueue_interrupt(request)
            } else {
                service.enqueue(request)
            };
            if accepted {
                emit_event(&SpeechEvent::Accepted {});
            } else {
                emit_event(&SpeechEvent::Rejected {
                    reason: "empty_or_queue_full".to_string(),
                });
            }
        }

        SpeechCommand::Stop {} => {
            service.stop_current();
            emit_status(service);
        }

        SpeechCommand::Clear {} => {
            let dropped = service.clear_queue();
            info!(dropped, "Clear requested");
            emit_status(service);
        }

        SpeechCommand::Status {} => emit_status(service),

        SpeechCommand::ListSpeakers {} => match service.speakers().await {
            Ok(speakers) => emit_event(&SpeechEvent::Speakers { speakers }),
            Err(e) => {
                warn!(error = %e, "Speaker listing failed");
                emit_error(&format!("Speaker listing failed: {}", e));
            }
        },

        SpeechCommand::ListOutputDevices {} => {
            let output = tokio::task::spawn_blocking(list_output_devices)
                .await
                .unwrap_or_default();
            emit_event(&SpeechEvent::OutputDevices { output });
        }

        SpeechCommand::Shutdown {} => return false,
    }

    true
}

fn emit_status(service: &SpeechService) {
    emit_event(&SpeechEvent::Status {
        playing: service.is_playing(),
        queued: service.queue_len(),
    });
}
