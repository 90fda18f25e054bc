mod apdu;
mod cards;
mod events;
mod ndef;
mod nfc_service;
mod session;
mod types;
mod ws;

use std::sync::{Arc, Mutex};

use crossbeam_channel::unbounded;
use tokio::sync::broadcast;

use crate::events::EventSink;
use crate::types::{Availability, NfcCommand, OutgoingMessage};

#[tokio::main]
async fn main() {
    env_logger::init();
    println!("Starting NDEF tag service...");

    // Channel: WS -> NFC (commands)
    // Crossbeam, because the NFC thread blocks on the PC/SC layer
    let (cmd_tx, cmd_rx) = unbounded::<NfcCommand>();

    // Channel: NFC -> WS (events)
    // Bridged into a tokio broadcast for distribution to WS clients
    let (event_tx, event_rx) = broadcast::channel::<OutgoingMessage>(100);

    // Reader availability snapshot, refreshed by the NFC thread and read
    // synchronously by the facade before it starts a session
    let availability = Arc::new(Mutex::new(Availability {
        available: false,
        message: "NFC reader not initialized".to_string(),
    }));

    let (bridge_tx, bridge_rx) = unbounded::<OutgoingMessage>();

    // Spawn the NFC service (blocking OS thread)
    let sink = EventSink::new(bridge_tx);
    let nfc_availability = availability.clone();
    std::thread::spawn(move || {
        nfc_service::run(sink, cmd_rx, nfc_availability);
    });

    // Bridge loop: NFC thread -> broadcast
    std::thread::spawn(move || {
        while let Ok(msg) = bridge_rx.recv() {
            let _ = event_tx.send(msg);
        }
    });

    // Start the WebSocket server
    ws::start_server(cmd_tx, event_rx, availability).await;
}
