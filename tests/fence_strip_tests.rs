use lawcheck_sanitize::{has_fence, strip_fences};

#[test]
fn strips_json_tagged_fence() {
    assert_eq!(strip_fences("```json\n{\"a\":1}\n```"), "{\"a\":1}");
}

#[test]
fn bare_fence_is_treated_like_json_fence() {
    assert_eq!(strip_fences("```\n[1, 2]\n```"), "[1, 2]");
    assert_eq!(strip_fences("```JSON\n{}\n```"), "{}");
}

#[test]
fn unclosed_fence_still_loses_opening_marker() {
    assert_eq!(strip_fences("```json\n{\"a\": 1}"), "{\"a\": 1}");
}

#[test]
fn unfenced_text_is_only_trimmed() {
    assert_eq!(strip_fences("  {\"a\": 1}\n"), "{\"a\": 1}");
    assert!(!has_fence("  {\"a\": 1}"));
}

#[test]
fn other_info_strings_keep_their_tag() {
    assert!(has_fence("```python\nprint(1)\n```"));
    assert_eq!(strip_fences("```python\nprint(1)\n```"), "python\nprint(1)");
}

#[test]
fn inline_backticks_inside_body_survive() {
    let out = strip_fences("\n```json\n{\"code\": \"`x`\"}\n```\n");
    assert_eq!(out, "{\"code\": \"`x`\"}");
}

#[test]
fn prose_after_closing_fence_is_dropped() {
    let raw = "```json\n{\"a\":1}\n```\n위 결과를 참고하세요.";
    assert_eq!(strip_fences(raw), "{\"a\":1}");

    let out = lawcheck_sanitize::sanitize_response(raw, &lawcheck_sanitize::CleanerConfig::default()).expect("parses");
    assert_eq!(out.cleaned, serde_json::json!({"a": 1}));
}

#[test]
fn only_the_first_fenced_block_is_kept() {
    assert_eq!(strip_fences("```\n[1]\n```\n\n```json\n[2]\n```"), "[1]");
}
