//! Text processing utilities.

use regex::Regex;
use std::sync::OnceLock;

static WHITESPACE_RE: OnceLock<Regex> = OnceLock::new();

fn whitespace_re() -> &'static Regex {
    WHITESPACE_RE.get_or_init(|| Regex::new(r"\s+").expect("static regex is valid"))
}

/// Replace consecutive whitespace (spaces, tabs, newlines) with a single space
/// and trim leading/trailing whitespace.
///
/// Returns an empty string for inputs that are entirely whitespace.
pub fn normalize_whitespace(s: &str) -> String {
    if s.is_empty() {
        return String::new();
    }
    whitespace_re().replace_all(s, " ").trim().to_string()
}

/// Fold an entity name into its comparable form: lower-case, `-` and `_`
/// treated as spaces, whitespace collapsed.
///
/// `"3D Gaussian-Splatting"` and `" 3d  gaussian_splatting"` both fold to
/// `"3d gaussian splatting"`.
pub fn fold_name(s: &str) -> String {
    let lowered: String = s
        .chars()
        .map(|c| if c == '-' || c == '_' { ' ' } else { c })
        .collect::<String>()
        .to_lowercase();
    normalize_whitespace(&lowered)
}

/// Remove NUL bytes and turn tabs into spaces. Postgres TEXT columns reject NUL.
pub fn scrub_text(s: &str) -> String {
    s.chars()
        .filter(|c| *c != '\0')
        .map(|c| if c == '\t' { ' ' } else { c })
        .collect::<String>()
        .trim()
        .to_string()
}

/// Extract the first JSON object or array from a potentially markdown-wrapped
/// LLM response.
///
/// Tries a ` ```json ` fence, then a plain ` ``` ` fence, then the span between
/// the first `{` and last `}`, then the span between the first `[` and last `]`.
pub fn extract_json_from_response(s: &str) -> Option<&str> {
    if let Some(inner) = extract_fenced_block(s, "```json") {
        return Some(inner);
    }

    if let Some(inner) = extract_fenced_block(s, "```") {
        return Some(inner);
    }

    for (open, close) in [('{', '}'), ('[', ']')] {
        if let (Some(start), Some(end)) = (s.find(open), s.rfind(close)) {
            if end > start {
                return Some(&s[start..=end]);
            }
        }
    }

    None
}

fn extract_fenced_block<'a>(s: &'a str, fence: &str) -> Option<&'a str> {
    let start = s.find(fence)?;
    let after_fence = start + fence.len();

    let newline = s[after_fence..].find('\n')?;
    let content_start = after_fence + newline + 1;

    let close = s[content_start..].find("```")?;
    let content = s[content_start..content_start + close].trim();

    if content.is_empty() {
        return None;
    }

    Some(content)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_whitespace_basic() {
        assert_eq!(normalize_whitespace("hello   world"), "hello world");
        assert_eq!(normalize_whitespace("hello\t\tworld"), "hello world");
        assert_eq!(normalize_whitespace("  hello\n\nworld  "), "hello world");
        assert_eq!(normalize_whitespace("   \t\n  "), "");
    }

    #[test]
    fn test_normalize_whitespace_unicode() {
        assert_eq!(normalize_whitespace("hello\u{00A0}world"), "hello world");
    }

    #[test]
    fn test_fold_name() {
        assert_eq!(fold_name("3D Gaussian-Splatting"), "3d gaussian splatting");
        assert_eq!(fold_name("  NeRF\t"), "nerf");
        assert_eq!(fold_name("Mip_NeRF  360"), "mip nerf 360");
        assert_eq!(fold_name("- _ -"), "");
    }

    #[test]
    fn test_scrub_text() {
        assert_eq!(scrub_text("a\0b\tc \n"), "ab c");
        assert_eq!(scrub_text("\0\0"), "");
    }

    #[test]
    fn test_extract_json_fenced_json() {
        let s = "Here is the result:\n```json\n{\"entities\": []}\n```\nDone.";
        assert_eq!(extract_json_from_response(s), Some("{\"entities\": []}"));
    }

    #[test]
    fn test_extract_json_fenced_plain() {
        let s = "Result:\n```\n[1, 2, 3]\n```";
        assert_eq!(extract_json_from_response(s), Some("[1, 2, 3]"));
    }

    #[test]
    fn test_extract_json_bare() {
        assert_eq!(
            extract_json_from_response("The answer is {\"foo\": {\"bar\": 1}} as shown."),
            Some("{\"foo\": {\"bar\": 1}}")
        );
        assert_eq!(extract_json_from_response("Items: [1, 2]"), Some("[1, 2]"));
    }

    #[test]
    fn test_extract_json_none() {
        assert_eq!(extract_json_from_response("No JSON here."), None);
        assert_eq!(extract_json_from_response(""), None);
        assert_eq!(extract_json_from_response("```json\n\n```"), None);
    }
}
