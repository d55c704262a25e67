use crate::error::LoadError;
use serde_json::Value;
use std::path::Path;

/// Resolve `input` as a JSON file path first, then as inline JSON text.
pub fn load_json(input: &str) -> Result<Value, LoadError> {
    let path = Path::new(input);
    if path.is_file() {
        let text = std::fs::read_to_string(path).map_err(|source| LoadError::Read {
            path: path.display().to_string(),
            source,
        })?;
        return serde_json::from_str(&text).map_err(|source| LoadError::Shape {
            what: "JSON file",
            source,
        });
    }
    // A bare number is almost always a mistyped path or record id.
    if input.trim().chars().all(|ch| ch.is_ascii_digit()) {
        return Err(LoadError::Unparseable {
            input: input.to_string(),
        });
    }
    serde_json::from_str(input).map_err(|_| LoadError::Unparseable {
        input: input.to_string(),
    })
}

pub fn shell_quote(value: &str) -> String {
    shell_words::quote(value).into_owned()
}

/// Decode captured process output: strict UTF-8 first, and on failure keep
/// every invalid byte as a `\xNN` escape instead of dropping it.
pub fn decode_output(bytes: &[u8]) -> String {
    if let Ok(text) = std::str::from_utf8(bytes) {
        return text.to_string();
    }
    let mut out = String::with_capacity(bytes.len());
    let mut rest = bytes;
    while !rest.is_empty() {
        match std::str::from_utf8(rest) {
            Ok(text) => {
                out.push_str(text);
                break;
            }
            Err(err) => {
                let (valid, after) = rest.split_at(err.valid_up_to());
                out.push_str(std::str::from_utf8(valid).unwrap_or_default());
                let bad_len = err.error_len().unwrap_or(after.len());
                for byte in &after[..bad_len] {
                    out.push_str(&format!("\\x{byte:02x}"));
                }
                rest = &after[bad_len..];
            }
        }
    }
    out
}
