use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use polyjwt_metrics::EventType;
use serde_json::Value;

/// Pre-parse and in-parser budget limits (spec §4.1). Defaults are
/// calibrated for realistic OIDC tokens while denying base64-inflation
/// amplification attacks (an 8 KiB token yields at most ~11 KiB across
/// two decoded segments).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParserConfig {
    pub max_token_size: usize,
    pub max_payload_size: usize,
    pub max_string_size: usize,
    pub max_array_size: usize,
    pub max_depth: usize,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            max_token_size: 8 * 1024,
            max_payload_size: 2 * 1024,
            max_string_size: 1024,
            max_array_size: 64,
            max_depth: 10,
        }
    }
}

/// The parsed wire form of a JWS compact token (spec §3 `DecodedJwt`).
/// Immutable once constructed.
#[derive(Debug, Clone)]
pub struct DecodedJwt {
    pub header: Value,
    pub payload: Value,
    pub signature_bytes: Vec<u8>,
    pub signing_input: Vec<u8>,
}

/// A decode-stage failure, not yet wrapped into a `ValidationError` (that
/// happens at the call site, which owns the `SecurityEventCounter`).
#[derive(Debug)]
pub struct ParseFailure {
    pub event_type: EventType,
    pub message: String,
}

fn fail(event_type: EventType, message: impl Into<String>) -> ParseFailure {
    ParseFailure {
        event_type,
        message: message.into(),
    }
}

/// Stages 1-4 of the validation pipeline: size check, segment split,
/// base64url decode, and depth/size-bounded JSON parse.
pub fn decode(raw: &str, config: &ParserConfig) -> Result<DecodedJwt, ParseFailure> {
    if raw.is_empty() {
        return Err(fail(EventType::TokenEmpty, "token is empty"));
    }
    if raw.len() > config.max_token_size {
        return Err(fail(
            EventType::TokenTooLarge,
            format!("token length {} exceeds max_token_size", raw.len()),
        ));
    }

    let parts: Vec<&str> = raw.split('.').collect();
    if parts.len() != 3 {
        return Err(fail(
            EventType::Malformed,
            "expected exactly three dot-separated segments",
        ));
    }
    let [header_seg, payload_seg, signature_seg] = [parts[0], parts[1], parts[2]];

    let header_bytes = URL_SAFE_NO_PAD
        .decode(header_seg)
        .map_err(|e| fail(EventType::Malformed, format!("invalid header base64url: {e}")))?;
    let payload_bytes = URL_SAFE_NO_PAD
        .decode(payload_seg)
        .map_err(|e| fail(EventType::Malformed, format!("invalid payload base64url: {e}")))?;
    let signature_bytes = URL_SAFE_NO_PAD
        .decode(signature_seg)
        .map_err(|e| fail(EventType::Malformed, format!("invalid signature base64url: {e}")))?;

    if header_bytes.len() > config.max_payload_size || payload_bytes.len() > config.max_payload_size {
        return Err(fail(
            EventType::SizeLimitExceeded,
            "decoded segment exceeds max_payload_size",
        ));
    }

    let header = parse_bounded(&header_bytes, config)?;
    let payload = parse_bounded(&payload_bytes, config)?;

    if !header.is_object() {
        return Err(fail(EventType::Malformed, "header is not a JSON object"));
    }
    if !payload.is_object() {
        return Err(fail(EventType::Malformed, "payload is not a JSON object"));
    }

    let signing_input = format!("{header_seg}.{payload_seg}").into_bytes();

    Ok(DecodedJwt {
        header,
        payload,
        signature_bytes,
        signing_input,
    })
}

fn parse_bounded(bytes: &[u8], config: &ParserConfig) -> Result<Value, ParseFailure> {
    let value: Value = serde_json::from_slice(bytes)
        .map_err(|e| fail(EventType::MalformedJson, format!("invalid JSON: {e}")))?;
    check_limits(&value, config, 1)?;
    Ok(value)
}

fn check_limits(value: &Value, config: &ParserConfig, depth: usize) -> Result<(), ParseFailure> {
    if depth > config.max_depth {
        return Err(fail(
            EventType::SizeLimitExceeded,
            format!("JSON nesting exceeds max_depth ({})", config.max_depth),
        ));
    }
    match value {
        Value::String(s) if s.len() > config.max_string_size => Err(fail(
            EventType::SizeLimitExceeded,
            format!("JSON string exceeds max_string_size ({})", config.max_string_size),
        )),
        Value::Array(items) => {
            if items.len() > config.max_array_size {
                return Err(fail(
                    EventType::SizeLimitExceeded,
                    format!("JSON array exceeds max_array_size ({})", config.max_array_size),
                ));
            }
            for item in items {
                check_limits(item, config, depth + 1)?;
            }
            Ok(())
        }
        Value::Object(map) => {
            for v in map.values() {
                check_limits(v, config, depth + 1)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seg(bytes: &[u8]) -> String {
        URL_SAFE_NO_PAD.encode(bytes)
    }

    #[test]
    fn rejects_empty_token() {
        let err = decode("", &ParserConfig::default()).unwrap_err();
        assert_eq!(err.event_type, EventType::TokenEmpty);
    }

    #[test]
    fn rejects_oversized_token() {
        let raw = "a".repeat(9000);
        let err = decode(&raw, &ParserConfig::default()).unwrap_err();
        assert_eq!(err.event_type, EventType::TokenTooLarge);
    }

    #[test]
    fn rejects_wrong_segment_count() {
        let err = decode("a.b", &ParserConfig::default()).unwrap_err();
        assert_eq!(err.event_type, EventType::Malformed);
    }

    #[test]
    fn decodes_well_formed_token() {
        let header = seg(br#"{"alg":"RS256","typ":"at+jwt"}"#);
        let payload = seg(br#"{"iss":"https://idp.example","sub":"u1"}"#);
        let raw = format!("{header}.{payload}.sig");
        let decoded = decode(&raw, &ParserConfig::default()).unwrap();
        assert_eq!(decoded.header["alg"], "RS256");
        assert_eq!(decoded.payload["sub"], "u1");
    }

    #[test]
    fn rejects_array_over_max_depth() {
        let mut value = serde_json::json!("leaf");
        for _ in 0..15 {
            value = serde_json::json!([value]);
        }
        let bytes = serde_json::to_vec(&value).unwrap();
        let header = seg(br#"{"alg":"RS256"}"#);
        let payload = seg(&bytes);
        let raw = format!("{header}.{{}}.sig").replace("{{}}", &payload);
        let err = decode(&raw, &ParserConfig::default()).unwrap_err();
        assert_eq!(err.event_type, EventType::SizeLimitExceeded);
    }

    #[test]
    fn rejects_oversized_json_string() {
        let payload = serde_json::json!({"iss": "x".repeat(2000)});
        let bytes = serde_json::to_vec(&payload).unwrap();
        let header = seg(br#"{"alg":"RS256"}"#);
        let payload_seg = seg(&bytes);
        let raw = format!("{header}.{payload_seg}.sig");
        let err = decode(&raw, &ParserConfig::default()).unwrap_err();
        assert_eq!(err.event_type, EventType::SizeLimitExceeded);
    }
}
