//! LNURL-pay success actions (LUD-09, LUD-10).
//!
//! A payee's server may attach a success action to its pay response. The
//! wallet stores it with the transaction and decodes it only when it is shown.
//! The `aes` variant carries a message encrypted with AES-256-CBC using the
//! payment preimage as the key, so it can only be read once the payment has
//! settled.

use base64::{engine::general_purpose::STANDARD, Engine};
use openssl::symm::{decrypt, Cipher};
use serde::{Deserialize, Serialize};

use crate::constants::{AES_IV_LEN, MAX_AES_CIPHERTEXT_B64_LEN, SUCCESS_ACTION_PLACEHOLDER};
use crate::error::DecodeError;
use crate::transaction::Preimage;

/// Success action as received from the LNURL-pay callback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "tag", rename_all = "lowercase")]
pub enum SuccessAction {
    Message {
        message: String,
    },
    Url {
        description: String,
        url: String,
    },
    Aes {
        description: String,
        /// base64, at most 4096 characters
        ciphertext: String,
        /// base64, 16 bytes
        iv: String,
    },
}

/// A success action ready to be shown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedSuccessAction {
    Message { message: String },
    Url { description: String, url: String },
    Aes { description: String, secret: String },
}

impl DecodedSuccessAction {
    /// Text a caller shows as the main message.
    pub fn text(&self) -> &str {
        match self {
            DecodedSuccessAction::Message { message } => message,
            DecodedSuccessAction::Url { description, .. } => description,
            DecodedSuccessAction::Aes { secret, .. } => secret,
        }
    }
}

/// Decode a success action. `preimage` is only needed for `aes`.
pub fn decode(
    action: &SuccessAction,
    preimage: Option<&Preimage>,
) -> Result<DecodedSuccessAction, DecodeError> {
    match action {
        SuccessAction::Message { message } => Ok(DecodedSuccessAction::Message {
            message: message.clone(),
        }),
        SuccessAction::Url { description, url } => Ok(DecodedSuccessAction::Url {
            description: description.clone(),
            url: url.clone(),
        }),
        SuccessAction::Aes {
            description,
            ciphertext,
            iv,
        } => {
            let preimage = preimage.ok_or(DecodeError::MissingPreimage)?;
            let secret = decrypt_aes(preimage, iv, ciphertext)?;
            Ok(DecodedSuccessAction::Aes {
                description: description.clone(),
                secret,
            })
        }
    }
}

/// AES-256-CBC decrypt a base64 ciphertext with the preimage as key.
/// Fails closed: no partial plaintext is ever returned.
pub fn decrypt_aes(preimage: &Preimage, iv_b64: &str, ciphertext_b64: &str) -> Result<String, DecodeError> {
    if ciphertext_b64.len() > MAX_AES_CIPHERTEXT_B64_LEN {
        return Err(DecodeError::CiphertextTooLong(ciphertext_b64.len()));
    }

    let iv = STANDARD
        .decode(iv_b64)
        .map_err(|_| DecodeError::InvalidBase64("iv"))?;
    if iv.len() != AES_IV_LEN {
        return Err(DecodeError::InvalidIvLength(iv.len()));
    }

    let ciphertext = STANDARD
        .decode(ciphertext_b64)
        .map_err(|_| DecodeError::InvalidBase64("ciphertext"))?;

    let plaintext = decrypt(Cipher::aes_256_cbc(), preimage.as_bytes(), Some(&iv), &ciphertext)
        .map_err(|_| DecodeError::Decryption)?;

    String::from_utf8(plaintext).map_err(|_| DecodeError::InvalidUtf8)
}

/// Decoded text, or the neutral placeholder on any failure.
pub fn render_or_placeholder(result: &Result<DecodedSuccessAction, DecodeError>) -> String {
    match result {
        Ok(decoded) => decoded.text().to_string(),
        Err(_) => SUCCESS_ACTION_PLACEHOLDER.to_string(),
    }
}
