// src/types.rs
use serde::{Deserialize, Serialize};

// Messages sent TO the WebSocket client (Frontend)
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum OutgoingMessage {
    READER_STATUS { available: bool, message: String },
    SESSION_STATUS { message: String },
    NFC_SUPPORTED { value: bool },
    TAG_READ { messages: Vec<NdefMessage> },
    UID_READ(UidInfo),
    WRITE_SUCCESS { success: bool },
    NFC_ERROR { kind: String, error: String },
}

// Messages received FROM the WebSocket client
#[derive(Deserialize, Debug)]
#[serde(tag = "type")]
pub enum IncomingMessage {
    GET_READER_STATUS,
    IS_NFC_SUPPORTED,
    START_SCAN,
    START_UID_SCAN,
    STOP_SCAN,
    WRITE_NDEF { records: Vec<RawRecord> },
}

// Internal commands sent from WS Server -> NFC Thread
#[derive(Debug)]
pub enum NfcCommand {
    StartScan,
    StartUidScan,
    StopScan,
    Write { records: Vec<NdefPayload> },
    CheckReaderStatus,
}

/// A record as it arrives in a write request. Either field may be missing;
/// incomplete entries are dropped from the batch rather than failing it.
#[derive(Deserialize, Debug)]
pub struct RawRecord {
    #[serde(rename = "type")]
    pub record_type: Option<String>,
    pub payload: Option<String>,
}

/// The application-facing record shape: a type string ("T", "U", or a custom
/// media type) and a text payload with all framing bytes stripped.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct NdefPayload {
    #[serde(rename = "type")]
    pub record_type: String,
    pub payload: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct NdefMessage {
    pub records: Vec<NdefPayload>,
}

/// A record in NDEF wire form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NdefRecord {
    pub tnf: u8, // Type Name Format (how to interpret the type)
    pub record_type: Vec<u8>,
    pub payload: Vec<u8>,
    pub id: Option<Vec<u8>>,
}

#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UidInfo {
    pub uid: String,
    pub uid_formatted: String,
    pub uid_length: usize,
    pub card_type: String,
    pub timestamp: String,
    pub reader: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionMode {
    Read,
    ReadUid,
    Write,
}

/// NDEF status a tag reports when queried after connecting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NdefCapability {
    NotSupported,
    ReadOnly,
    ReadWrite,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Availability {
    pub available: bool,
    pub message: String,
}

/// Terminal failure of a tag session. Every kind ends the session; none are
/// retried. `Cancelled` is the one kind never surfaced to callers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("NFC hardware is not available: {0}")]
    HardwareUnavailable(String),
    #[error("no NFC tag detected")]
    NoTagDetected,
    #[error("unable to connect to tag: {0}")]
    ConnectFailed(String),
    #[error("unable to query NDEF status of tag: {0}")]
    CapabilityQueryFailed(String),
    #[error("tag is not NDEF compliant")]
    NotNdefCompliant,
    #[error("tag is read-only")]
    ReadOnlyTag,
    #[error("unknown NDEF tag status")]
    UnknownTagStatus,
    #[error("failed to read from tag: {0}")]
    ReadFailed(String),
    #[error("failed to write NDEF message: {0}")]
    WriteFailed(String),
    #[error("session cancelled by user")]
    Cancelled,
}

impl SessionError {
    pub fn kind(&self) -> &'static str {
        match self {
            SessionError::HardwareUnavailable(_) => "hardware_unavailable",
            SessionError::NoTagDetected => "no_tag_detected",
            SessionError::ConnectFailed(_) => "connect_failed",
            SessionError::CapabilityQueryFailed(_) => "capability_query_failed",
            SessionError::NotNdefCompliant => "not_ndef_compliant",
            SessionError::ReadOnlyTag => "read_only_tag",
            SessionError::UnknownTagStatus => "unknown_tag_status",
            SessionError::ReadFailed(_) => "read_failed",
            SessionError::WriteFailed(_) => "write_failed",
            SessionError::Cancelled => "cancelled",
        }
    }
}

pub const CARD_TYPE_MIFARE_1K: &str = "6a"; // MIFARE Classic 1K
pub const CARD_TYPE_NTAG: &str = "68"; // NTAG215/Ultralight
