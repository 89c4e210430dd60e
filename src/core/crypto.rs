//! Cryptographic primitives offered to extension scripts
//!
//! Scripts use these to undo the light obfuscation content sites wrap around
//! their player URLs: MD5 request signatures, AES-CBC encrypted payloads and
//! base64 everywhere.

use crate::core::error::{Result, StreamboxError};
use aes::{Aes128, Aes192, Aes256};
use base64::{engine::general_purpose, Engine as _};
use cbc::cipher::{block_padding::Pkcs7, BlockDecryptMut, KeyIvInit};
use md5::{Digest, Md5};

const BLOCK_SIZE: usize = 16;

/// Lowercase hex MD5 of the UTF-8 bytes of `text`
pub fn md5_hex(text: &str) -> String {
    format!("{:x}", Md5::digest(text.as_bytes()))
}

pub fn base64_encode(text: &str) -> String {
    general_purpose::STANDARD.encode(text.as_bytes())
}

/// Decode standard base64, ignoring embedded whitespace
pub fn base64_decode(encoded: &str) -> Result<String> {
    let bytes = decode_bytes(encoded)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Decrypt base64 AES-CBC/PKCS#7 ciphertext
///
/// # Arguments
/// * `data` - Base64-encoded ciphertext
/// * `key` - UTF-8 key; 16, 24 or 32 bytes selects AES-128/192/256
/// * `iv` - UTF-8 IV of 16 bytes, all zero when absent
pub fn aes_cbc_decrypt(data: &str, key: &str, iv: Option<&str>) -> Result<String> {
    let ciphertext = decode_bytes(data)?;
    let iv = match iv {
        Some(iv) => iv.as_bytes().to_vec(),
        None => vec![0u8; BLOCK_SIZE],
    };
    if iv.len() != BLOCK_SIZE {
        return Err(StreamboxError::ValidationError(format!(
            "IV must be {} bytes, got {}",
            BLOCK_SIZE,
            iv.len()
        )));
    }

    let key = key.as_bytes();
    let plaintext = match key.len() {
        16 => cbc::Decryptor::<Aes128>::new_from_slices(key, &iv)
            .map_err(invalid_key)?
            .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext),
        24 => cbc::Decryptor::<Aes192>::new_from_slices(key, &iv)
            .map_err(invalid_key)?
            .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext),
        32 => cbc::Decryptor::<Aes256>::new_from_slices(key, &iv)
            .map_err(invalid_key)?
            .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext),
        n => {
            return Err(StreamboxError::ValidationError(format!(
                "AES key must be 16, 24 or 32 bytes, got {}",
                n
            )))
        }
    }
    .map_err(|e| StreamboxError::ValidationError(format!("Decryption failed: {}", e)))?;

    String::from_utf8(plaintext)
        .map_err(|e| StreamboxError::ValidationError(format!("Decrypted data is not UTF-8: {}", e)))
}

fn invalid_key(e: cbc::cipher::InvalidLength) -> StreamboxError {
    StreamboxError::ValidationError(format!("Invalid key or IV: {}", e))
}

fn decode_bytes(encoded: &str) -> Result<Vec<u8>> {
    let compact: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
    general_purpose::STANDARD
        .decode(compact)
        .map_err(|e| StreamboxError::ValidationError(format!("Invalid base64: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use cbc::cipher::BlockEncryptMut;

    fn encrypt_128(plain: &str, key: &str, iv: &[u8]) -> String {
        let cipher = cbc::Encryptor::<Aes128>::new_from_slices(key.as_bytes(), iv).unwrap();
        let out = cipher.encrypt_padded_vec_mut::<Pkcs7>(plain.as_bytes());
        general_purpose::STANDARD.encode(out)
    }

    #[test]
    fn test_md5_known_vectors() {
        assert_eq!(md5_hex(""), "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(md5_hex("hello"), "5d41402abc4b2a76b9719d911017c592");
    }

    #[test]
    fn test_base64_round_trip_and_whitespace() {
        let encoded = base64_encode("stream:1080p");
        assert_eq!(encoded, "c3RyZWFtOjEwODBw");
        assert_eq!(base64_decode("c3RyZWFt\nOjEwODBw").unwrap(), "stream:1080p");
        assert!(base64_decode("***").is_err());
    }

    #[test]
    fn test_aes_decrypt_with_iv() {
        let key = "0123456789abcdef";
        let iv = "fedcba9876543210";
        let data = encrypt_128("https://cdn.example/v.m3u8", key, iv.as_bytes());
        assert_eq!(
            aes_cbc_decrypt(&data, key, Some(iv)).unwrap(),
            "https://cdn.example/v.m3u8"
        );
    }

    #[test]
    fn test_aes_decrypt_zero_iv_default() {
        let key = "0123456789abcdef";
        let data = encrypt_128("secret", key, &[0u8; 16]);
        assert_eq!(aes_cbc_decrypt(&data, key, None).unwrap(), "secret");
    }

    #[test]
    fn test_aes_decrypt_failures() {
        let key = "0123456789abcdef";
        let data = encrypt_128("secret", key, &[0u8; 16]);

        assert!(aes_cbc_decrypt(&data, "short", None).is_err());
        assert!(aes_cbc_decrypt(&data, key, Some("bad-iv")).is_err());
        assert!(aes_cbc_decrypt("not base64!", key, None).is_err());
        // Truncated ciphertext is not a whole number of blocks
        assert!(aes_cbc_decrypt(&general_purpose::STANDARD.encode([1u8; 5]), key, None).is_err());
    }
}
