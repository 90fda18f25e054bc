// src/cards.rs
use log::warn;
use pcsc::Card;

use crate::{apdu, ndef};

/// Keys commonly programmed into MIFARE Classic sectors in the field.
pub const COMMON_KEYS: [[u8; 6]; 8] = [
    [0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF],
    [0xA0, 0xA1, 0xA2, 0xA3, 0xA4, 0xA5],
    [0xD3, 0xF7, 0xD3, 0xF7, 0xD3, 0xF7],
    [0x00, 0x00, 0x00, 0x00, 0x00, 0x00],
    [0xB0, 0xB1, 0xB2, 0xB3, 0xB4, 0xB5],
    [0x4D, 0x3A, 0x99, 0xC3, 0x51, 0xDD],
    [0x1A, 0x98, 0x2C, 0x7E, 0x45, 0x9A],
    [0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF],
];

// Sector 0 holds manufacturer data; data lives in blocks 0-2 of each sector,
// block 3 is the trailer.
fn mifare_data_blocks() -> Vec<u8> {
    (1u8..16)
        .flat_map(|sector| (0u8..3).map(move |block| sector * 4 + block))
        .collect()
}

// Tries every common key against both key slots at the start of a sector.
fn authenticate_sector(card: &Card, block: u8) -> bool {
    for key in COMMON_KEYS.iter() {
        if apdu::load_key(card, key).is_ok()
            && (apdu::authenticate(card, block, 0x60).is_ok()
                || apdu::authenticate(card, block, 0x61).is_ok())
        {
            return true;
        }
    }
    false
}

/// Reads the NDEF TLV area of a MIFARE Classic card, stopping once the TLV
/// is complete or a sector refuses authentication.
pub fn read_mifare(card: &Card) -> Result<Vec<u8>, String> {
    let mut full_data = Vec::new();

    for &block in mifare_data_blocks().iter() {
        if block % 4 == 0 && !authenticate_sector(card, block) {
            warn!("could not authenticate sector at block {}, stopping", block);
            break;
        }

        match apdu::read_binary(card, block, 16) {
            Ok(data) => {
                full_data.extend_from_slice(&data);
                if ndef::tlv_complete(&full_data) {
                    break;
                }
            }
            Err(_) => break,
        }
    }

    if full_data.is_empty() {
        return Err("no data could be read from the card".to_string());
    }
    Ok(full_data)
}

/// Writes TLV-wrapped data into the MIFARE Classic data blocks, 16 bytes at
/// a time, skipping sector trailers.
pub fn write_mifare(card: &Card, data: &[u8]) -> Result<(), String> {
    let mut offset = 0;
    let mut current_block = 4u8;

    while offset < data.len() {
        // skip trailers
        if (current_block + 1) % 4 == 0 {
            current_block += 1;
            continue;
        }

        if current_block % 4 == 0 && !authenticate_sector(card, current_block) {
            return Err(format!(
                "could not authenticate sector at block {}",
                current_block
            ));
        }

        let copy_len = std::cmp::min(16, data.len() - offset);
        let mut chunk = [0u8; 16]; // pad the tail with zeros
        chunk[..copy_len].copy_from_slice(&data[offset..offset + copy_len]);

        apdu::update_binary(card, current_block, &chunk)?;

        offset += 16;
        current_block += 1;
    }
    Ok(())
}

/// Reads the NDEF TLV area of an NTAG/Ultralight card. Pages are 4 bytes;
/// the area starts at page 4.
pub fn read_ntag(card: &Card) -> Result<Vec<u8>, String> {
    let mut full_data = apdu::read_binary(card, 4, 16)
        .map_err(|e| format!("failed to read start of NDEF area: {}", e))?;

    // first 16 bytes cover pages 4-7
    let mut block = 8u8;
    while !ndef::tlv_complete(&full_data) && block < 232 {
        match apdu::read_binary(card, block, 4) {
            Ok(data) if !data.is_empty() => {
                full_data.extend(data);
                block += 1;
            }
            _ => break,
        }
    }

    if full_data.is_empty() {
        return Err("no data could be read from the card".to_string());
    }
    Ok(full_data)
}

/// Writes TLV-wrapped data one 4-byte page at a time, starting at page 4.
pub fn write_ntag(card: &Card, data: &[u8]) -> Result<(), String> {
    let mut padded = data.to_vec();
    while padded.len() % 4 != 0 {
        padded.push(0x00);
    }

    let mut current_block = 4u8;
    for chunk in padded.chunks(4) {
        apdu::update_binary(card, current_block, chunk)?;
        current_block += 1;
    }
    Ok(())
}
