//! Durable record codec.
//!
//! A record is a sequence of lines, one per descriptor type:
//!
//! ```text
//! {keepsake_core::node::NodeSnapshot}[{...},{...}]
//! {my_game::DoorData}[{...}]
//! ```
//!
//! The tag sits between the first `{` and the first `}`; the rest of the line
//! is a JSON array. Tags never contain `}`.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Tag of the single line in a modules file.
pub const MODULES_TAG: &str = "modules";

/// Errors raised while packing or unpacking a record.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("line {line}: {reason}")]
    Malformed { line: usize, reason: &'static str },
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("record is not valid UTF-8")]
    Utf8(#[from] std::string::FromUtf8Error),
    #[error("sealed record is too short")]
    Truncated,
    #[error("could not open sealed record: wrong key or corrupted data")]
    Unseal,
    #[error("could not seal record")]
    Seal,
}

/// One line: `{tag}` followed by an already-encoded JSON array.
pub fn pack_line(tag: &str, json_array: &str) -> String {
    format!("{{{tag}}}{json_array}")
}

/// Serialize `items` as one tagged line.
pub fn pack<T: Serialize>(tag: &str, items: &[T]) -> Result<String, CodecError> {
    Ok(pack_line(tag, &serde_json::to_string(items)?))
}

/// Serialize `item` and check that the result reads back as `T`.
///
/// JSON has no NaN or infinity: serde_json stores them as `null`, which a
/// float field then refuses to load.
pub fn to_readable_value<T>(item: &T) -> serde_json::Result<serde_json::Value>
where
    T: Serialize + DeserializeOwned,
{
    let value = serde_json::to_value(item)?;
    T::deserialize(&value)?;
    Ok(value)
}

/// Join lines into a record. Every line, including the last, ends with `\n`.
pub fn encode_record<I, S>(lines: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out = String::new();
    for line in lines {
        out.push_str(line.as_ref());
        out.push('\n');
    }
    out
}

/// Split a record into `(tag, json_array)` pairs. Blank lines are skipped.
pub fn unpack(text: &str) -> Result<Vec<(String, String)>, CodecError> {
    let mut pairs = Vec::new();
    for (index, raw) in text.split('\n').enumerate() {
        let line = raw.trim_end_matches('\r');
        if line.trim().is_empty() {
            continue;
        }
        let line_no = index + 1;
        let rest = line.strip_prefix('{').ok_or(CodecError::Malformed {
            line: line_no,
            reason: "missing '{' before type tag",
        })?;
        let close = rest.find('}').ok_or(CodecError::Malformed {
            line: line_no,
            reason: "unterminated type tag",
        })?;
        let (tag, json) = (&rest[..close], &rest[close + 1..]);
        if tag.is_empty() {
            return Err(CodecError::Malformed {
                line: line_no,
                reason: "empty type tag",
            });
        }
        pairs.push((tag.to_string(), json.to_string()));
    }
    Ok(pairs)
}

/// Encode the list of module identifiers that produced a record.
pub fn encode_modules(modules: &[String]) -> Result<String, CodecError> {
    Ok(encode_record([pack(MODULES_TAG, modules)?]))
}

/// Decode a modules file. Lines with other tags are ignored.
pub fn decode_modules(text: &str) -> Result<Vec<String>, CodecError> {
    let mut modules = Vec::new();
    for (tag, json) in unpack(text)? {
        if tag == MODULES_TAG {
            modules.extend(serde_json::from_str::<Vec<String>>(&json)?);
        }
    }
    Ok(modules)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_prefixes_tag() {
        let line = pack("a::B", &[1, 2, 3]).unwrap();
        assert_eq!(line, "{a::B}[1,2,3]");
    }

    #[test]
    fn record_ends_with_newline() {
        let text = encode_record(["{a}[]", "{b}[1]"]);
        assert_eq!(text, "{a}[]\n{b}[1]\n");
    }

    #[test]
    fn unpack_splits_tag_from_json() {
        let text = "{a::B}[{\"x\":\"}\"}]\n\n{c}[]\n";
        let pairs = unpack(text).unwrap();
        assert_eq!(
            pairs,
            vec![
                ("a::B".to_string(), "[{\"x\":\"}\"}]".to_string()),
                ("c".to_string(), "[]".to_string()),
            ]
        );
    }

    #[test]
    fn unpack_rejects_malformed_lines() {
        assert!(matches!(
            unpack("no tag here"),
            Err(CodecError::Malformed { line: 1, .. })
        ));
        assert!(matches!(
            unpack("{a}[]\n{unterminated"),
            Err(CodecError::Malformed { line: 2, .. })
        ));
        assert!(matches!(unpack("{}[]"), Err(CodecError::Malformed { .. })));
    }

    #[test]
    fn unpack_empty_record() {
        assert!(unpack("").unwrap().is_empty());
        assert!(unpack("\n\n").unwrap().is_empty());
    }

    #[test]
    fn modules_file() {
        let modules = vec!["keepsake_core".to_string(), "game".to_string()];
        let text = encode_modules(&modules).unwrap();
        assert_eq!(text, "{modules}[\"keepsake_core\",\"game\"]\n");
        assert_eq!(decode_modules(&text).unwrap(), modules);
    }

    #[test]
    fn readable_value_rejects_non_finite_floats() {
        assert!(to_readable_value(&vec![1.5f32, -2.0]).is_ok());
        assert!(to_readable_value(&vec![f32::NAN]).is_err());
        assert!(to_readable_value(&(0u8, f64::INFINITY)).is_err());
    }
}
