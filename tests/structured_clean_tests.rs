use lawcheck_sanitize::{clean_structured, CleanerConfig, StructuredCleaner};
use serde_json::{json, Value};

fn shape(v: &Value) -> Value {
    match v {
        Value::String(_) => Value::String(String::new()),
        Value::Array(items) => Value::Array(items.iter().map(shape).collect()),
        Value::Object(map) => Value::Object(map.iter().map(|(k, v)| (k.clone(), shape(v))).collect()),
        other => other.clone(),
    }
}

#[test]
fn cleans_every_string_leaf_and_keeps_shape() {
    let input = json!({
        "score": 72,
        "passed": false,
        "note": null,
        "law_compliance": {
            "status": "<span class=\"bad\">부적합</span>",
            "violations": ["<b>표시</b> 누락", {"description": "<i>과장</i> 광고", "law": "제8조"}, 3, null]
        },
        "issues": [{"type": "표현", "description": "font-weight: bold; 최고 표현"}]
    });
    let out = clean_structured(&input);
    assert_eq!(shape(&out), shape(&input));
    assert_eq!(out["score"], 72);
    assert_eq!(out["passed"], false);
    assert!(out["note"].is_null());
    assert_eq!(out["law_compliance"]["status"], "부적합");
    assert_eq!(out["law_compliance"]["violations"], json!(["표시 누락", {"description": "과장 광고", "law": "제8조"}, 3, null]));
    assert_eq!(out["issues"][0]["description"], "최고 표현");
}

#[test]
fn key_order_survives_cleaning() {
    let input: Value = serde_json::from_str("{\"z\": \"<p>1</p>\", \"a\": \"2\"}").unwrap();
    let out = clean_structured(&input);
    let keys: Vec<&String> = out.as_object().unwrap().keys().collect();
    assert_eq!(keys, ["z", "a"]);
    assert_eq!(out["z"], "1");
}

#[test]
fn counts_items_of_designated_list_fields() {
    let cfg = CleanerConfig::default();
    let mut cleaner = StructuredCleaner::new(&cfg);
    let input = json!({
        "law_compliance": {"violations": ["a", {"description": "<b>b</b>"}, null]},
        "issues": "<p>없음</p>"
    });
    let out = cleaner.clean(&input);
    assert_eq!(out["issues"], "없음");
    assert_eq!(cleaner.list_items.get("violations"), Some(&3));
    assert_eq!(cleaner.list_items.get("issues"), Some(&1));
    assert_eq!(cleaner.strings_cleaned, 3);
    assert_eq!(cleaner.strings_changed, 2);
}

#[test]
fn scalar_roots_pass_through() {
    assert_eq!(clean_structured(&json!(1.5)), json!(1.5));
    assert_eq!(clean_structured(&json!(null)), json!(null));
    assert_eq!(clean_structured(&json!("<em>x</em>")), json!("x"));
}
