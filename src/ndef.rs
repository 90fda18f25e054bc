// src/ndef.rs
use std::str;

use crate::types::{NdefMessage, NdefPayload, NdefRecord, RawRecord};

pub const TNF_WELL_KNOWN: u8 = 0x01;
pub const TNF_MIME_MEDIA: u8 = 0x02;

const TEXT_LANGUAGE_CODE: &[u8] = b"en";
const URI_PREFIX_NONE: u8 = 0x00;

// --- application-level codec ---

/// Decodes one wire record into the `{type, payload}` shape callers see.
/// Never fails: malformed bytes degrade to empty strings so one bad record
/// does not abort the rest of the message.
pub fn decode_record(record: &NdefRecord) -> NdefPayload {
    let record_type = str::from_utf8(&record.record_type)
        .unwrap_or("")
        .to_string();

    let payload = match record_type.as_str() {
        "T" => decode_text_payload(&record.payload),
        "U" => decode_uri_payload(&record.payload),
        _ => str::from_utf8(&record.payload).unwrap_or("").to_string(),
    };

    NdefPayload {
        record_type,
        payload,
    }
}

pub fn decode_message(records: &[NdefRecord]) -> NdefMessage {
    NdefMessage {
        records: records.iter().map(decode_record).collect(),
    }
}

// TEXT payload: [status byte][language code][text]. The low 6 bits of the
// status byte are the language code length; the encoding flag and RFU bits
// are ignored.
fn decode_text_payload(payload: &[u8]) -> String {
    if payload.is_empty() {
        return String::new();
    }
    let language_code_length = (payload[0] & 0x3F) as usize;
    if payload.len() > language_code_length + 1 {
        str::from_utf8(&payload[language_code_length + 1..])
            .unwrap_or("")
            .to_string()
    } else {
        String::new()
    }
}

// URI payload: [prefix identifier byte][uri]. The prefix byte is dropped,
// not expanded.
fn decode_uri_payload(payload: &[u8]) -> String {
    if payload.is_empty() {
        return String::new();
    }
    str::from_utf8(&payload[1..]).unwrap_or("").to_string()
}

/// Builds the wire form of one application record. Never fails.
pub fn encode_record(record: &NdefPayload) -> NdefRecord {
    match record.record_type.as_str() {
        "T" => {
            // [status byte][language code][text], fixed "en" language
            let mut payload = Vec::with_capacity(3 + record.payload.len());
            payload.push((TEXT_LANGUAGE_CODE.len() as u8) & 0x3F);
            payload.extend_from_slice(TEXT_LANGUAGE_CODE);
            payload.extend_from_slice(record.payload.as_bytes());
            NdefRecord {
                tnf: TNF_WELL_KNOWN,
                record_type: vec![0x54], // 'T'
                payload,
                id: None,
            }
        }
        "U" => {
            // [prefix identifier byte][uri], 0x00 = no abbreviation applied
            let mut payload = Vec::with_capacity(1 + record.payload.len());
            payload.push(URI_PREFIX_NONE);
            payload.extend_from_slice(record.payload.as_bytes());
            NdefRecord {
                tnf: TNF_WELL_KNOWN,
                record_type: vec![0x55], // 'U'
                payload,
                id: None,
            }
        }
        _ => NdefRecord {
            tnf: TNF_MIME_MEDIA,
            record_type: record.record_type.as_bytes().to_vec(),
            payload: record.payload.as_bytes().to_vec(),
            id: None,
        },
    }
}

/// Drops batch entries with a missing type or payload. Incomplete entries
/// are not an error for the batch.
pub fn collect_records(raw: Vec<RawRecord>) -> Vec<NdefPayload> {
    raw.into_iter()
        .filter_map(|r| match (r.record_type, r.payload) {
            (Some(record_type), Some(payload)) => Some(NdefPayload {
                record_type,
                payload,
            }),
            _ => None,
        })
        .collect()
}

// --- wire framing ---

/// Emits one record with its NDEF header.
/// Bit 7: MB, Bit 6: ME, Bit 5: CF(0), Bit 4: SR, Bit 3: IL, Bits 2-0: TNF
pub fn emit_record(record: &NdefRecord, mb: bool, me: bool) -> Vec<u8> {
    let short_record = record.payload.len() < 256;

    let mut header = record.tnf & 0x07;
    if mb {
        header |= 0x80;
    }
    if me {
        header |= 0x40;
    }
    if short_record {
        header |= 0x10;
    }
    if record.id.is_some() {
        header |= 0x08;
    }

    let mut out = Vec::with_capacity(6 + record.record_type.len() + record.payload.len());
    out.push(header);
    out.push(record.record_type.len() as u8);
    if short_record {
        out.push(record.payload.len() as u8);
    } else {
        out.extend_from_slice(&(record.payload.len() as u32).to_be_bytes());
    }
    if let Some(id) = &record.id {
        out.push(id.len() as u8);
    }
    out.extend_from_slice(&record.record_type);
    if let Some(id) = &record.id {
        out.extend_from_slice(id);
    }
    out.extend_from_slice(&record.payload);
    out
}

pub fn emit_message(records: &[NdefRecord]) -> Vec<u8> {
    let mut message = Vec::new();
    for (i, record) in records.iter().enumerate() {
        let mb = i == 0;
        let me = i == records.len() - 1;
        message.extend(emit_record(record, mb, me));
    }
    message
}

/// Parses the records of one NDEF message. Stops at the ME flag or at the
/// first truncated record, keeping everything parsed so far.
pub fn parse_ndef_records(data: &[u8]) -> Vec<NdefRecord> {
    let mut records = Vec::new();
    let mut cursor = 0usize;

    while cursor < data.len() {
        let header = data[cursor];
        let tnf = header & 0x07;
        let short_record = (header & 0x10) != 0; // SR flag
        let has_id = (header & 0x08) != 0; // IL flag
        let message_end = (header & 0x40) != 0; // ME flag
        cursor += 1;

        let Some(&type_length) = data.get(cursor) else {
            break;
        };
        let type_length = type_length as usize;
        cursor += 1;

        // 1 byte for a short record, 4 bytes otherwise
        let payload_length = if short_record {
            let Some(&len) = data.get(cursor) else { break };
            cursor += 1;
            len as usize
        } else {
            let Some(bytes) = data.get(cursor..cursor + 4) else {
                break;
            };
            cursor += 4;
            u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize
        };

        let id_length = if has_id {
            let Some(&len) = data.get(cursor) else { break };
            cursor += 1;
            len as usize
        } else {
            0
        };

        let Some(record_type) = data.get(cursor..cursor + type_length) else {
            break;
        };
        let record_type = record_type.to_vec();
        cursor += type_length;

        let id = if has_id {
            let Some(id) = data.get(cursor..cursor + id_length) else {
                break;
            };
            cursor += id_length;
            Some(id.to_vec())
        } else {
            None
        };

        let Some(payload) = data.get(cursor..cursor + payload_length) else {
            break;
        };
        let payload = payload.to_vec();
        cursor += payload_length;

        records.push(NdefRecord {
            tnf,
            record_type,
            payload,
            id,
        });

        if message_end {
            break;
        }
    }

    records
}

// --- TLV container ---

/// Wraps an NDEF message in the TLV block cards store it in:
/// T = 0x03, one-byte length below 255 or FF + two-byte length, 0xFE terminator.
pub fn wrap_in_tlv(ndef_bytes: &[u8]) -> Vec<u8> {
    let mut tlv = Vec::with_capacity(ndef_bytes.len() + 5);
    tlv.push(0x03);
    if ndef_bytes.len() < 255 {
        tlv.push(ndef_bytes.len() as u8);
    } else {
        tlv.push(0xFF);
        tlv.extend_from_slice(&(ndef_bytes.len() as u16).to_be_bytes());
    }
    tlv.extend_from_slice(ndef_bytes);
    tlv.push(0xFE);
    tlv
}

/// Locates the NDEF TLV in raw card data and returns the message bytes.
pub fn unwrap_tlv(buffer: &[u8]) -> Result<&[u8], String> {
    let start = buffer
        .iter()
        .position(|&b| b == 0x03)
        .ok_or("no NDEF TLV found")?;

    let (length, data_start) = match buffer.get(start + 1) {
        Some(0xFF) => match buffer.get(start + 2..start + 4) {
            Some(bytes) => (u16::from_be_bytes([bytes[0], bytes[1]]) as usize, start + 4),
            None => return Err("truncated TLV length".to_string()),
        },
        Some(&len) => (len as usize, start + 2),
        None => return Err("truncated TLV length".to_string()),
    };

    buffer
        .get(data_start..data_start + length)
        .ok_or_else(|| "incomplete TLV data".to_string())
}

/// True once `data` holds a complete NDEF TLV. Used to stop card reads early.
pub fn tlv_complete(data: &[u8]) -> bool {
    unwrap_tlv(data).is_ok()
}
