// src/ws.rs
use std::sync::{Arc, Mutex};

use crossbeam_channel::Sender;
use futures::{SinkExt, StreamExt};
use log::{debug, info, warn};
use tokio::sync::{broadcast, mpsc};
use warp::Filter;

use crate::ndef;
use crate::types::{
    Availability, IncomingMessage, NdefPayload, NfcCommand, OutgoingMessage, RawRecord,
};

pub async fn start_server(
    nfc_cmd_tx: Sender<NfcCommand>,
    mut nfc_event_rx: broadcast::Receiver<OutgoingMessage>,
    availability: Arc<Mutex<Availability>>,
) {
    // Shared broadcast channel for WS clients
    let (ws_tx, _) = broadcast::channel::<OutgoingMessage>(32);
    let ws_tx = Arc::new(ws_tx);

    // Forward NFC events to all connected clients
    let ws_tx_clone = ws_tx.clone();
    tokio::spawn(async move {
        while let Ok(msg) = nfc_event_rx.recv().await {
            let _ = ws_tx_clone.send(msg);
        }
    });

    let ws_route = warp::path::end()
        .and(warp::ws())
        .map(move |ws: warp::ws::Ws| {
            let nfc_cmd_tx = nfc_cmd_tx.clone();
            let ws_tx = ws_tx.clone();
            let availability = availability.clone();
            ws.on_upgrade(move |socket| handle_connection(socket, nfc_cmd_tx, ws_tx, availability))
        });

    let routes = ws_route.with(warp::cors().allow_any_origin());

    info!("WebSocket server running on ws://127.0.0.1:3500");
    warp::serve(routes).run(([127, 0, 0, 1], 3500)).await;
}

async fn handle_connection(
    ws: warp::ws::WebSocket,
    nfc_cmd_tx: Sender<NfcCommand>,
    ws_tx: Arc<broadcast::Sender<OutgoingMessage>>,
    availability: Arc<Mutex<Availability>>,
) {
    let (mut client_ws_tx, mut client_ws_rx) = ws.split();
    let mut broadcast_rx = ws_tx.subscribe();
    // direct line for replies to this client only
    let (direct_tx, mut direct_rx) = mpsc::unbounded_channel::<OutgoingMessage>();

    // merge broadcast events and direct replies into the socket
    tokio::spawn(async move {
        loop {
            let msg = tokio::select! {
                received = broadcast_rx.recv() => match received {
                    Ok(msg) => msg,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("client lagging, skipped {} events", skipped);
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                received = direct_rx.recv() => match received {
                    Some(msg) => msg,
                    None => break,
                },
            };
            let Ok(json) = serde_json::to_string(&msg) else {
                continue;
            };
            if client_ws_tx
                .send(warp::ws::Message::text(json))
                .await
                .is_err()
            {
                break;
            }
        }
    });

    while let Some(result) = client_ws_rx.next().await {
        let Ok(msg) = result else { break };
        if !msg.is_text() {
            continue;
        }
        let Ok(text) = msg.to_str() else { continue };
        match serde_json::from_str::<IncomingMessage>(text) {
            Ok(request) => handle_request(request, &nfc_cmd_tx, &direct_tx, &availability),
            Err(err) => debug!("ignoring malformed request: {}", err),
        }
    }
}

fn handle_request(
    request: IncomingMessage,
    cmd_tx: &Sender<NfcCommand>,
    direct: &mpsc::UnboundedSender<OutgoingMessage>,
    availability: &Arc<Mutex<Availability>>,
) {
    match request {
        IncomingMessage::GET_READER_STATUS => {
            let status = snapshot(availability);
            let _ = direct.send(OutgoingMessage::READER_STATUS {
                available: status.available,
                message: status.message,
            });
            // refresh the hardware view in the background
            let _ = cmd_tx.send(NfcCommand::CheckReaderStatus);
        }
        IncomingMessage::IS_NFC_SUPPORTED => {
            let status = snapshot(availability);
            let _ = direct.send(OutgoingMessage::NFC_SUPPORTED {
                value: status.available,
            });
        }
        IncomingMessage::START_SCAN => {
            start_session_request(NfcCommand::StartScan, cmd_tx, direct, availability);
        }
        IncomingMessage::START_UID_SCAN => {
            start_session_request(NfcCommand::StartUidScan, cmd_tx, direct, availability);
        }
        IncomingMessage::STOP_SCAN => {
            let _ = cmd_tx.send(NfcCommand::StopScan);
        }
        IncomingMessage::WRITE_NDEF { records } => match prepare_write_records(records) {
            Ok(records) => {
                start_session_request(NfcCommand::Write { records }, cmd_tx, direct, availability);
            }
            Err(reason) => {
                let _ = direct.send(OutgoingMessage::NFC_ERROR {
                    kind: "invalid_request".to_string(),
                    error: reason,
                });
            }
        },
    }
}

// The availability gate: an unavailable reader fails the request right here,
// with no command sent and no session created. The session outcome itself
// arrives later through events.
fn start_session_request(
    cmd: NfcCommand,
    cmd_tx: &Sender<NfcCommand>,
    direct: &mpsc::UnboundedSender<OutgoingMessage>,
    availability: &Arc<Mutex<Availability>>,
) {
    let status = snapshot(availability);
    if !status.available {
        let _ = direct.send(OutgoingMessage::NFC_ERROR {
            kind: "hardware_unavailable".to_string(),
            error: status.message,
        });
        return;
    }
    let _ = cmd_tx.send(cmd);
}

/// Filters incomplete entries out of a write batch. A batch with nothing
/// left is rejected before it ever reaches the controller.
pub fn prepare_write_records(raw: Vec<RawRecord>) -> Result<Vec<NdefPayload>, String> {
    let records = ndef::collect_records(raw);
    if records.is_empty() {
        return Err("no valid records provided for writing".to_string());
    }
    Ok(records)
}

fn snapshot(availability: &Arc<Mutex<Availability>>) -> Availability {
    match availability.lock() {
        Ok(guard) => guard.clone(),
        Err(_) => Availability {
            available: false,
            message: "NFC hardware state is unknown".to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(record_type: Option<&str>, payload: Option<&str>) -> RawRecord {
        RawRecord {
            record_type: record_type.map(str::to_string),
            payload: payload.map(str::to_string),
        }
    }

    #[test]
    fn write_batch_keeps_only_complete_records() {
        let records = prepare_write_records(vec![
            raw(Some("T"), Some("hello")),
            raw(None, Some("dropped")),
            raw(Some("U"), None),
            raw(Some("U"), Some("https://example.com")),
        ])
        .unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].record_type, "T");
        assert_eq!(records[1].record_type, "U");
    }

    #[test]
    fn empty_write_batch_is_rejected() {
        assert!(prepare_write_records(vec![]).is_err());
        assert!(prepare_write_records(vec![raw(None, None), raw(Some("T"), None)]).is_err());
    }
}
