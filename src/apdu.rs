// src/apdu.rs
use pcsc::Card;

// Transmits one APDU and checks for the 0x90 0x00 success status word,
// returning the response body without it.
fn transmit(card: &Card, apdu: &[u8]) -> Result<Vec<u8>, String> {
    let mut recv_buffer = [0u8; 256];
    let resp = card
        .transmit(apdu, &mut recv_buffer)
        .map_err(|e| format!("transmit error: {}", e))?;
    if resp.len() >= 2 && resp[resp.len() - 2] == 0x90 && resp[resp.len() - 1] == 0x00 {
        Ok(resp[..resp.len() - 2].to_vec())
    } else {
        Err(format!("command failed: {:02X?}", resp))
    }
}

// Load an authentication key into reader memory.
// ACR122U standard: FF 82 00 00 06 [KEY]
pub fn load_key(card: &Card, key: &[u8; 6]) -> Result<(), String> {
    let mut apdu = vec![0xFF, 0x82, 0x00, 0x00, 0x06];
    apdu.extend_from_slice(key);
    transmit(card, &apdu).map(|_| ())
}

// Authenticate a block with the loaded key.
// CMD: FF 86 00 00 05 01 00 Block KeyType 00, KeyType 0x60 (A) or 0x61 (B)
pub fn authenticate(card: &Card, block: u8, key_type: u8) -> Result<(), String> {
    let apdu = [
        0xFF, 0x86, 0x00, 0x00, 0x05, 0x01, 0x00, block, key_type, 0x00,
    ];
    transmit(card, &apdu).map(|_| ())
}

// Read: FF B0 00 Block Len
pub fn read_binary(card: &Card, block: u8, length: u8) -> Result<Vec<u8>, String> {
    transmit(card, &[0xFF, 0xB0, 0x00, block, length])
}

// Write: FF D6 00 Block Len [Data]
pub fn update_binary(card: &Card, block: u8, data: &[u8]) -> Result<(), String> {
    let mut apdu = vec![0xFF, 0xD6, 0x00, block, data.len() as u8];
    apdu.extend_from_slice(data);
    transmit(card, &apdu).map(|_| ())
}

// GET DATA: FF CA 00 00 00, returns the card UID
pub fn get_uid(card: &Card) -> Result<Vec<u8>, String> {
    transmit(card, &[0xFF, 0xCA, 0x00, 0x00, 0x00])
}
