use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use thiserror::Error;

use crate::routes::{SubmissionPayload, SubmissionRecord};

#[derive(Debug, Error)]
pub enum EncodingError {
    #[error("Invalid Base64 data in field '{field}': {reason}")]
    InvalidBase64 { field: String, reason: String },
}

pub fn encode(text: &str) -> String {
    STANDARD.encode(text.as_bytes())
}

pub fn decode(field: &str, encoded: &str) -> Result<String, EncodingError> {
    let bytes = STANDARD
        .decode(encoded)
        .map_err(|e| EncodingError::InvalidBase64 {
            field: field.to_string(),
            reason: e.to_string(),
        })?;
    String::from_utf8(bytes).map_err(|e| EncodingError::InvalidBase64 {
        field: field.to_string(),
        reason: e.to_string(),
    })
}

fn decode_optional(field: &str, encoded: &Option<String>) -> Result<Option<String>, EncodingError> {
    match encoded {
        Some(text) => Ok(Some(decode(field, text)?)),
        None => Ok(None),
    }
}

fn encode_optional(text: &Option<String>) -> Option<String> {
    text.as_ref().map(|t| encode(t))
}

/// Decodes the transport-encoded fields of an inbound payload in place
pub fn decode_payload(payload: &mut SubmissionPayload) -> Result<(), EncodingError> {
    payload.source_code = decode("source_code", &payload.source_code)?;
    payload.stdin = decode_optional("stdin", &payload.stdin)?;
    payload.expected_output = decode_optional("expected_output", &payload.expected_output)?;
    if let Some(files) = payload.additional_files.as_mut() {
        for file in files {
            file.content = decode("additional_files", &file.content)?;
        }
    }
    Ok(())
}

/// Encodes the transport-encoded fields of an outbound record in place
pub fn encode_record(record: &mut SubmissionRecord) {
    record.source_code = encode(&record.source_code);
    record.stdin = encode_optional(&record.stdin);
    record.expected_output = encode_optional(&record.expected_output);
    record.stdout = encode_optional(&record.stdout);
    record.stderr = encode_optional(&record.stderr);
    record.compile_output = encode_optional(&record.compile_output);
    for file in &mut record.additional_files {
        file.content = encode(&file.content);
    }
}
