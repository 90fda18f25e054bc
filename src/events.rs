// src/events.rs
use crossbeam_channel::Sender;
use log::debug;

use crate::types::{NdefMessage, OutgoingMessage, SessionError, UidInfo};

/// Typed delivery surface for session events. The controller emits each
/// terminal event at most once per session; cancellation is swallowed here so
/// it can never reach a caller as an error.
#[derive(Clone)]
pub struct EventSink {
    tx: Sender<OutgoingMessage>,
}

impl EventSink {
    pub fn new(tx: Sender<OutgoingMessage>) -> Self {
        Self { tx }
    }

    pub fn reader_status(&self, available: bool, message: &str) {
        self.send(OutgoingMessage::READER_STATUS {
            available,
            message: message.to_string(),
        });
    }

    /// Live narrative of session progress, mirroring the session alert text.
    pub fn session_status(&self, message: &str) {
        self.send(OutgoingMessage::SESSION_STATUS {
            message: message.to_string(),
        });
    }

    pub fn tag_read(&self, messages: Vec<NdefMessage>) {
        self.send(OutgoingMessage::TAG_READ { messages });
    }

    pub fn uid_read(&self, info: UidInfo) {
        self.send(OutgoingMessage::UID_READ(info));
    }

    pub fn write_success(&self) {
        self.send(OutgoingMessage::WRITE_SUCCESS { success: true });
    }

    pub fn error(&self, err: &SessionError) {
        if matches!(err, SessionError::Cancelled) {
            debug!("session cancelled by user, suppressing error event");
            return;
        }
        self.send(OutgoingMessage::NFC_ERROR {
            kind: err.kind().to_string(),
            error: err.to_string(),
        });
    }

    fn send(&self, msg: OutgoingMessage) {
        if self.tx.send(msg).is_err() {
            debug!("event channel closed, dropping event");
        }
    }
}
