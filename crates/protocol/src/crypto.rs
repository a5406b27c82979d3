//! The legacy LIMSML header cipher.
//!
//! KNOWN-WEAK, reproduced bit-for-bit for wire compatibility with existing
//! servers: a per-request key is derived from a CRC-32 of the serialized
//! transaction payload (non-standard reflected polynomial), hashed with MD5
//! and truncated to its first 5 bytes — a 40-bit effective RC4 key,
//! zero-padded to the cipher's native 128-bit key size. Do not reuse this
//! scheme in new protocols.

use md5::{Digest, Md5};
use rc4::consts::U16;
use rc4::{Key, KeyInit, Rc4, StreamCipher};

/// Non-standard CRC-32 polynomial used by the LIMSML key derivation
/// (`0x04C11DB7` applied directly in reflected, right-shifting form).
const CRC_POLYNOMIAL: u32 = 79_764_919;

/// Number of MD5 digest bytes kept by the key truncation.
const KEY_BYTES: usize = 5;

/// Derives the 128-bit RC4 key for one request from the serialized
/// transaction payload.
pub fn create_key(payload: &[u8]) -> [u8; 16] {
    let mut crc: u32 = 0xFFFF_FFFF;
    for &byte in payload {
        let mut temp = (crc ^ u32::from(byte)) & 0xFF;
        for _ in 0..8 {
            temp = if temp & 1 == 1 {
                (temp >> 1) ^ CRC_POLYNOMIAL
            } else {
                temp >> 1
            };
        }
        crc = (crc >> 8) ^ temp;
    }
    crc ^= 0xFFFF_FFFF;

    // Four CRC bytes, most significant first, as "A1-02-FF-03".
    let crc_text = crc
        .to_be_bytes()
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join("-");

    let digest = Md5::digest(crc_text.as_bytes());
    let mut key = [0u8; 16];
    key.copy_from_slice(&digest);
    for byte in &mut key[KEY_BYTES..] {
        *byte = 0;
    }
    key
}

/// Encrypts `plaintext` with RC4 under `key` and returns lowercase hex.
///
/// An absent or empty plaintext yields the empty string — not an encryption
/// of empty input — and never an error.
pub fn encrypt(key: &[u8; 16], plaintext: Option<&str>) -> String {
    let Some(text) = plaintext.filter(|t| !t.is_empty()) else {
        return String::new();
    };

    // The server decrypts to UTF-16LE.
    let mut data: Vec<u8> = text.encode_utf16().flat_map(u16::to_le_bytes).collect();
    let mut cipher = Rc4::<U16>::new(Key::<U16>::from_slice(key));
    cipher.apply_keystream(&mut data);
    hex::encode(data)
}
