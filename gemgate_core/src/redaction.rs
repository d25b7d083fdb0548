use regex::Regex;
use std::sync::OnceLock;

const PLACEHOLDER: &str = "[REDACTED]";

/// Redacts credential-shaped substrings from error messages and log lines
/// while preserving the surrounding text for debugging. Total function:
/// never fails, always returns a string.
pub fn redact_sensitive_text(input: &str) -> String {
    static GOOGLE_KEY_RE: OnceLock<Regex> = OnceLock::new();
    static KEY_LIKE_RE: OnceLock<Regex> = OnceLock::new();
    static AUTH_BEARER_RE: OnceLock<Regex> = OnceLock::new();
    static BEARER_TOKEN_RE: OnceLock<Regex> = OnceLock::new();
    static API_KEY_HEADER_RE: OnceLock<Regex> = OnceLock::new();
    static QUERY_TOKEN_RE: OnceLock<Regex> = OnceLock::new();

    let google_key_re =
        GOOGLE_KEY_RE.get_or_init(|| Regex::new(r"AIza[0-9A-Za-z_-]{35}").unwrap());
    let key_like_re =
        KEY_LIKE_RE.get_or_init(|| Regex::new(r"(?i)\b(?:sk|rk)-[A-Za-z0-9_-]{12,}\b").unwrap());
    let auth_bearer_re = AUTH_BEARER_RE.get_or_init(|| {
        Regex::new(r"(?i)(authorization\s*:\s*bearer\s+)[A-Za-z0-9._~+/=-]+").unwrap()
    });
    let bearer_token_re =
        BEARER_TOKEN_RE.get_or_init(|| Regex::new(r"(?i)\bbearer\s+[A-Za-z0-9._-]{10,}").unwrap());
    let api_key_header_re = API_KEY_HEADER_RE
        .get_or_init(|| Regex::new(r"(?i)(x-(?:goog-)?api-key\s*:\s*)[A-Za-z0-9._~+/=-]+").unwrap());
    let query_token_re = QUERY_TOKEN_RE.get_or_init(|| {
        Regex::new(r#"(?i)([?&](?:token|access_token|api_key|apikey|key)=)[^&\s"']+"#).unwrap()
    });

    let step1 = google_key_re.replace_all(input, PLACEHOLDER).to_string();
    let step2 = key_like_re.replace_all(&step1, PLACEHOLDER).to_string();
    let step3 = auth_bearer_re
        .replace_all(&step2, format!("${{1}}{}", PLACEHOLDER))
        .to_string();
    let step4 = bearer_token_re.replace_all(&step3, PLACEHOLDER).to_string();
    let step5 = api_key_header_re
        .replace_all(&step4, format!("${{1}}{}", PLACEHOLDER))
        .to_string();
    query_token_re
        .replace_all(&step5, format!("${{1}}{}", PLACEHOLDER))
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redact_masks_google_api_keys() {
        let key = format!("AIzaSy{}", "B".repeat(33));
        let raw = format!("API call rejected for {} (quota exceeded)", key);
        let masked = redact_sensitive_text(&raw);
        assert!(!masked.contains(&key));
        assert!(masked.contains("[REDACTED]"));
        assert!(masked.contains("quota exceeded"));
    }

    #[test]
    fn redact_masks_common_secrets() {
        let raw = r#"Authorization: Bearer abc123token456
x-api-key: supersecretvalue
https://a.com/models?key=abcdef&x=1
sk-live-1234567890abcdef"#;

        let masked = redact_sensitive_text(raw);
        assert!(!masked.contains("abc123token456"));
        assert!(!masked.contains("supersecretvalue"));
        assert!(!masked.contains("sk-live-1234567890abcdef"));
        assert!(!masked.contains("key=abcdef"));
        assert!(masked.contains("Authorization: Bearer [REDACTED]"));
        assert!(masked.contains("x-api-key: [REDACTED]"));
        assert!(masked.contains("key=[REDACTED]"));
    }

    #[test]
    fn redact_leaves_plain_text_untouched() {
        let raw = "file not found: src/main.rs";
        assert_eq!(redact_sensitive_text(raw), raw);
    }
}
