use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use globwalk::GlobWalkerBuilder;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Keyword marking the end of a violation sentence ("violation").
pub const VIOLATION_KEYWORD: &str = "위반";

/// How much of an unparsable response is echoed back in a ParseFailure.
pub const DEFAULT_SNIPPET_CHARS: usize = 2000;

static FENCE_OPEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^```(?i:json)?[ \t]*\r?\n?").unwrap());
static TRAILING_COMMA: Lazy<Regex> = Lazy::new(|| Regex::new(r",\s*([}\]])").unwrap());
static TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^<>]*>").unwrap());
static ENTITY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"&(?:#([0-9]{1,7})|#[xX]([0-9a-fA-F]{1,6})|([A-Za-z][A-Za-z0-9]{1,31}));").unwrap());
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());
static PAREN_GROUP: Lazy<Regex> = Lazy::new(|| Regex::new(r"\([^()（）]*\)|（[^()（）]*）").unwrap());

// Inline style leftovers the model copies out of rendered HTML.
static STYLE_NOISE: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r#"(?i)\bstyle\s*=\s*(?:"[^"]*"|'[^']*'|[^\s>]+)"#,
        r#"(?i)\bclass\s*=\s*(?:"[^"]*"|'[^']*'|[^\s>]+)"#,
        r"(?i)font-weight\s*:\s*[a-z0-9]+\s*;?",
        r"(?i)margin(?:-[a-z]+)?\s*:[^;]*;",
        r"(?i)padding(?:-[a-z]+)?\s*:[^;]*;",
        r"(?i)(?:background-)?color\s*:[^;]*;",
        r"(?i)font-size\s*:[^;]*;",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

/// Apply `step` until it stops changing the text.
/// Bounded by the input length: every step used here either shrinks the text
/// or only normalizes whitespace once, so `len + 2` passes always suffice.
pub fn fixed_point<F>(input: &str, step: F) -> String
where
    F: Fn(&str) -> String,
{
    let mut current = input.to_string();
    for _ in 0..input.len() + 2 {
        let next = step(&current);
        if next == current {
            break;
        }
        current = next;
    }
    current
}

fn collapse_whitespace(text: &str) -> String {
    WHITESPACE.replace_all(text, " ").trim().to_string()
}

/// True when the trimmed text opens with a markdown code fence.
pub fn has_fence(text: &str) -> bool {
    text.trim().starts_with("```")
}

/// Remove a markdown code fence around a model response and return the inner text.
/// A bare ``` and ```json are handled the same way; any other info string
/// only loses its backticks. Text after the closing fence is dropped; a
/// missing closing fence is tolerated.
pub fn strip_fences(text: &str) -> String {
    let trimmed = text.trim();
    if !has_fence(trimmed) {
        return trimmed.to_string();
    }
    let body = match FENCE_OPEN.find(trimmed) {
        Some(m) => &trimmed[m.end()..],
        None => &trimmed[3..],
    };
    // Anything after the first closing fence is commentary, not payload
    let body = match body.find("```") {
        Some(end) => &body[..end],
        None => body,
    };
    body.trim().to_string()
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("ParseFailure: {message}")]
pub struct ParseFailure {
    pub message: String,
    pub snippet: String,
}

impl ParseFailure {
    /// Diagnostic body for the HTTP boundary.
    pub fn to_json(&self) -> Value {
        serde_json::json!({
            "error": "ParseFailure",
            "message": self.message,
            "snippet": self.snippet,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RepairOutcome {
    pub value: Value,
    pub repaired: bool,
}

/// Decode JSON, retrying once after dropping trailing commas before `}` or `]`.
/// No other repair is attempted.
pub fn parse_with_repair(text: &str, snippet_chars: usize) -> Result<RepairOutcome, ParseFailure> {
    let first_err = match serde_json::from_str::<Value>(text) {
        Ok(value) => return Ok(RepairOutcome { value, repaired: false }),
        Err(e) => e,
    };
    let fixed = TRAILING_COMMA.replace_all(text, "$1");
    match serde_json::from_str::<Value>(&fixed) {
        Ok(value) => Ok(RepairOutcome { value, repaired: true }),
        Err(_) => Err(ParseFailure {
            message: first_err.to_string(),
            snippet: text.chars().take(snippet_chars).collect(),
        }),
    }
}

fn named_entity(name: &str) -> Option<char> {
    let c = match name {
        "amp" => '&',
        "lt" => '<',
        "gt" => '>',
        "quot" => '"',
        "apos" => '\'',
        "nbsp" => '\u{a0}',
        "middot" => '·',
        "bull" => '•',
        "hellip" => '…',
        "ndash" => '–',
        "mdash" => '—',
        "lsquo" => '‘',
        "rsquo" => '’',
        "ldquo" => '“',
        "rdquo" => '”',
        "laquo" => '«',
        "raquo" => '»',
        "copy" => '©',
        "reg" => '®',
        "trade" => '™',
        "times" => '×',
        "deg" => '°',
        _ => return None,
    };
    Some(c)
}

/// Decode numeric character references and the common named entities.
/// Unknown names are left as written.
pub fn decode_entities(text: &str) -> String {
    ENTITY
        .replace_all(text, |caps: &Captures| {
            let code = if let Some(dec) = caps.get(1) {
                dec.as_str().parse::<u32>().ok()
            } else if let Some(hex) = caps.get(2) {
                u32::from_str_radix(hex.as_str(), 16).ok()
            } else {
                None
            };
            let decoded = match (code, caps.get(3)) {
                (Some(0), _) => Some('\u{fffd}'),
                (Some(n), _) => char::from_u32(n),
                (None, Some(name)) => named_entity(name.as_str()),
                (None, None) => None,
            };
            match decoded {
                Some(c) => c.to_string(),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// Strip `<...>` tags until none are left, so nested fragments like `<<b>b>` go too.
pub fn strip_tags(text: &str) -> String {
    fixed_point(text, |s| TAG.replace_all(s, "").into_owned())
}

fn noise_pass(text: &str) -> String {
    let mut out = strip_tags(&decode_entities(text));
    for re in STYLE_NOISE.iter() {
        out = re.replace_all(&out, "").into_owned();
    }
    collapse_whitespace(&out)
}

/// Remove HTML tags, entities and inline CSS fragments from a string value.
/// Idempotent: the whole pass is iterated to a fixed point.
pub fn clean_noise(text: &str) -> String {
    fixed_point(text, noise_pass)
}

/// Strip parenthetical notes and cut after the first `keyword`.
/// Empty input is returned unchanged.
pub fn normalize_violation_with(text: &str, keyword: &str) -> String {
    if text.is_empty() {
        return String::new();
    }
    let mut out = fixed_point(text, |s| PAREN_GROUP.replacen(s, 1, "").into_owned());
    if !keyword.is_empty() {
        if let Some(pos) = out.find(keyword) {
            out.truncate(pos + keyword.len());
        }
    }
    collapse_whitespace(&out)
}

pub fn normalize_violation(text: &str) -> String {
    normalize_violation_with(text, VIOLATION_KEYWORD)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CleanerConfig {
    pub list_fields: Vec<String>,
    pub violation_fields: Vec<String>,
    pub violation_text_keys: Vec<String>,
    pub violation_keyword: String,
    pub snippet_chars: usize,
}

impl Default for CleanerConfig {
    fn default() -> Self {
        CleanerConfig {
            list_fields: vec!["violations".into(), "issues".into()],
            violation_fields: vec!["violations".into(), "issues".into()],
            violation_text_keys: vec!["description".into(), "violation".into()],
            violation_keyword: VIOLATION_KEYWORD.to_string(),
            snippet_chars: DEFAULT_SNIPPET_CHARS,
        }
    }
}

/// Walks a parsed response and cleans every string leaf, keeping the shape.
/// Counts the elements seen under each designated list field.
#[derive(Debug)]
pub struct StructuredCleaner<'a> {
    cfg: &'a CleanerConfig,
    pub strings_cleaned: usize,
    pub strings_changed: usize,
    pub list_items: BTreeMap<String, usize>,
}

impl<'a> StructuredCleaner<'a> {
    pub fn new(cfg: &'a CleanerConfig) -> Self {
        StructuredCleaner { cfg, strings_cleaned: 0, strings_changed: 0, list_items: BTreeMap::new() }
    }

    pub fn clean(&mut self, value: &Value) -> Value {
        match value {
            Value::String(s) => {
                let cleaned = clean_noise(s);
                self.strings_cleaned += 1;
                if cleaned != *s {
                    self.strings_changed += 1;
                }
                Value::String(cleaned)
            }
            Value::Array(items) => Value::Array(items.iter().map(|v| self.clean(v)).collect()),
            Value::Object(map) => {
                let mut out = serde_json::Map::with_capacity(map.len());
                for (key, v) in map {
                    if self.cfg.list_fields.iter().any(|f| f == key) {
                        let n = v.as_array().map(|a| a.len()).unwrap_or(1);
                        *self.list_items.entry(key.clone()).or_insert(0) += n;
                    }
                    out.insert(key.clone(), self.clean(v));
                }
                Value::Object(out)
            }
            Value::Null | Value::Bool(_) | Value::Number(_) => value.clone(),
        }
    }
}

/// Clean every string leaf with the default configuration.
pub fn clean_structured(value: &Value) -> Value {
    let cfg = CleanerConfig::default();
    StructuredCleaner::new(&cfg).clean(value)
}

fn normalize_violation_item(item: &mut Value, cfg: &CleanerConfig) -> usize {
    match item {
        Value::String(s) => {
            *s = normalize_violation_with(s, &cfg.violation_keyword);
            1
        }
        Value::Object(map) => {
            let mut n = 0;
            for key in &cfg.violation_text_keys {
                if let Some(Value::String(s)) = map.get_mut(key) {
                    *s = normalize_violation_with(s, &cfg.violation_keyword);
                    n += 1;
                }
            }
            n
        }
        _ => 0,
    }
}

/// Normalize every violation text found under the configured violation fields.
/// Returns the number of strings rewritten.
pub fn normalize_violations(value: &mut Value, cfg: &CleanerConfig) -> usize {
    match value {
        Value::Object(map) => {
            let mut n = 0;
            for (key, v) in map.iter_mut() {
                if cfg.violation_fields.iter().any(|f| f == key) {
                    if let Value::Array(items) = &mut *v {
                        for item in items.iter_mut() {
                            n += normalize_violation_item(item, cfg);
                        }
                        continue;
                    }
                }
                n += normalize_violations(v, cfg);
            }
            n
        }
        Value::Array(items) => items.iter_mut().map(|v| normalize_violations(v, cfg)).sum(),
        _ => 0,
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SanitizeStats {
    pub fence_stripped: bool,
    pub repaired: bool,
    pub strings_cleaned: usize,
    pub strings_changed: usize,
    pub list_items: BTreeMap<String, usize>,
    pub violations_normalized: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SanitizeOutput {
    /// Response text with the fence removed, as handed to the parser.
    pub unfenced: String,
    /// Tree as decoded, before any cleaning.
    pub parsed: Value,
    pub cleaned: Value,
    pub stats: SanitizeStats,
}

/// Full pass over one model response: unfence, parse (with repair), clean, normalize violations.
pub fn sanitize_response(raw: &str, cfg: &CleanerConfig) -> Result<SanitizeOutput, ParseFailure> {
    let fence_stripped = has_fence(raw);
    let body = strip_fences(raw);
    let parsed = parse_with_repair(&body, cfg.snippet_chars)?;

    let mut cleaner = StructuredCleaner::new(cfg);
    let mut cleaned = cleaner.clean(&parsed.value);
    let violations_normalized = normalize_violations(&mut cleaned, cfg);

    Ok(SanitizeOutput {
        unfenced: body,
        parsed: parsed.value,
        cleaned,
        stats: SanitizeStats {
            fence_stripped,
            repaired: parsed.repaired,
            strings_cleaned: cleaner.strings_cleaned,
            strings_changed: cleaner.strings_changed,
            list_items: cleaner.list_items,
            violations_normalized,
        },
    })
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ReportView {
    pub score: Option<f64>,
    pub compliance_status: Option<String>,
    pub violations: Vec<String>,
    pub issue_count: usize,
}

impl ReportView {
    /// Read the fields the report page renders, with the default violation keys.
    pub fn from_value(value: &Value) -> Self {
        ReportView::from_value_with(value, &CleanerConfig::default())
    }

    /// Missing or oddly typed fields are skipped. Object violations are read
    /// through `cfg.violation_text_keys`, first match wins.
    pub fn from_value_with(value: &Value, cfg: &CleanerConfig) -> Self {
        let score = match value.get("score") {
            Some(Value::Number(n)) => n.as_f64(),
            Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
            _ => None,
        };
        let compliance = value.get("law_compliance");
        let compliance_status = compliance
            .and_then(|c| c.get("status"))
            .and_then(|s| s.as_str())
            .map(|s| s.to_string());
        let violations = compliance
            .and_then(|c| c.get("violations"))
            .and_then(|v| v.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| match item {
                        Value::String(s) => Some(s.clone()),
                        Value::Object(map) => cfg
                            .violation_text_keys
                            .iter()
                            .find_map(|k| map.get(k).and_then(|v| v.as_str()))
                            .map(|s| s.to_string()),
                        _ => None,
                    })
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();
        let issue_count = value.get("issues").and_then(|v| v.as_array()).map(|a| a.len()).unwrap_or(0);
        ReportView { score, compliance_status, violations, issue_count }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InputsSection {
    pub path: String,
}

impl Default for InputsSection {
    fn default() -> Self {
        InputsSection { path: "./responses/**/*.txt".to_string() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputsSection {
    pub dir: String,
}

impl Default for OutputsSection {
    fn default() -> Self {
        OutputsSection { dir: "./output".to_string() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SanitizeConfig {
    pub id: String,
    pub inputs: InputsSection,
    pub outputs: OutputsSection,
    pub cleaner: CleanerConfig,
}

impl Default for SanitizeConfig {
    fn default() -> Self {
        SanitizeConfig {
            id: "lawcheck".to_string(),
            inputs: InputsSection::default(),
            outputs: OutputsSection::default(),
            cleaner: CleanerConfig::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Read(String),
    #[error("Failed to parse config: {0}")]
    Parse(String),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Parse and validate a YAML config. Absent sections fall back to defaults.
pub fn parse_config(raw: &str) -> Result<SanitizeConfig, ConfigError> {
    let cfg: SanitizeConfig = serde_yaml::from_str(raw).map_err(|e| ConfigError::Parse(e.to_string()))?;

    if cfg.id.trim().is_empty() {
        return Err(ConfigError::Invalid("missing id".into()));
    }
    if cfg.cleaner.violation_keyword.trim().is_empty() {
        return Err(ConfigError::Invalid("empty cleaner.violation_keyword".into()));
    }
    if cfg.cleaner.snippet_chars == 0 {
        return Err(ConfigError::Invalid("cleaner.snippet_chars must be > 0".into()));
    }
    Ok(cfg)
}

pub fn load_config(path: &Path) -> Result<SanitizeConfig, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Read(e.to_string()))?;
    parse_config(&raw)
}

#[derive(Debug, Error)]
pub enum EnumerateError {
    #[error("NoFilesFound")]
    NoFilesFound { guidance: String },
}

/// Enumerate saved model responses using a glob pattern (e.g. "./responses/**/*.txt").
/// Returns a sorted list of paths.
pub fn enumerate_responses(glob_pattern: &str) -> Result<Vec<PathBuf>, EnumerateError> {
    let (root, pat) = split_glob_base(glob_pattern);
    let mut paths: Vec<PathBuf> = GlobWalkerBuilder::from_patterns(&root, &[pat.as_str()])
        .case_insensitive(false)
        .follow_links(false)
        .build()
        .map_err(|_| EnumerateError::NoFilesFound { guidance: folder_guidance(glob_pattern) })?
        .filter_map(|e| e.ok())
        .map(|e| e.path().to_path_buf())
        .collect();

    paths.retain(|p| p.is_file());
    paths.sort();

    if paths.is_empty() {
        return Err(EnumerateError::NoFilesFound { guidance: folder_guidance(glob_pattern) });
    }
    Ok(paths)
}

// "./responses/2024/**/*.txt" -> ("./responses/2024", "**/*.txt"), so the walk starts
// at the deepest literal directory instead of the filesystem root.
fn split_glob_base(pattern: &str) -> (String, String) {
    fn is_glob(s: &str) -> bool {
        s.contains(&['*', '?', '[', '{'][..])
    }
    let parts: Vec<&str> = pattern.split('/').collect();
    let literal = parts[..parts.len() - 1].iter().take_while(|p| !is_glob(p)).count();
    let base = parts[..literal].join("/");
    let rest = parts[literal..].join("/");
    let base = match base.as_str() {
        "" if pattern.starts_with('/') => "/".to_string(),
        "" => ".".to_string(),
        _ => base,
    };
    (base, rest)
}

fn folder_guidance(pattern: &str) -> String {
    format!(
        "No model responses match {}\nSave one raw response per file, e.g. ./responses/2024/upload-001.txt,\nor pipe a single response with --stdin.",
        pattern
    )
}

#[derive(Debug, Error)]
pub enum EmitError {
    #[error("WriteFailed: {0}")]
    WriteFailed(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmitPaths {
    pub json_path: String,
    pub meta_path: String,
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), EmitError> {
    let tmp = path.with_extension(format!("tmp.{}", std::process::id()));
    std::fs::write(&tmp, bytes).map_err(|e| EmitError::WriteFailed(e.to_string()))?;
    std::fs::rename(&tmp, path).map_err(|e| EmitError::WriteFailed(e.to_string()))
}

/// Atomically write the cleaned response and its meta JSON into outdir with doc_id stem.
pub fn emit_files(cleaned: &Value, meta: &Value, outdir: &str, doc_id: &str) -> Result<EmitPaths, EmitError> {
    std::fs::create_dir_all(outdir).map_err(|e| EmitError::WriteFailed(e.to_string()))?;
    let json_path = Path::new(outdir).join(format!("{}.json", doc_id));
    let meta_path = Path::new(outdir).join(format!("{}.meta.json", doc_id));

    let json_bytes = serde_json::to_vec_pretty(cleaned).map_err(|e| EmitError::WriteFailed(e.to_string()))?;
    let meta_bytes = serde_json::to_vec_pretty(meta).map_err(|e| EmitError::WriteFailed(e.to_string()))?;
    write_atomic(&json_path, &json_bytes)?;
    write_atomic(&meta_path, &meta_bytes)?;

    Ok(EmitPaths {
        json_path: json_path.to_string_lossy().to_string(),
        meta_path: meta_path.to_string_lossy().to_string(),
    })
}

/// Lowercase ASCII slug; anything else becomes a single dash.
pub fn slugify(base: &str) -> String {
    let mut out = String::with_capacity(base.len());
    let mut prev_dash = false;
    for ch in base.to_lowercase().chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch);
            prev_dash = false;
        } else if !prev_dash {
            out.push('-');
            prev_dash = true;
        }
    }
    let trimmed = out.trim_matches('-');
    if trimmed.is_empty() { "doc".to_string() } else { trimmed.to_string() }
}

pub fn unique_slug(slug: String, used: &mut std::collections::HashSet<String>) -> String {
    if used.insert(slug.clone()) {
        return slug;
    }
    let mut i = 1;
    loop {
        let candidate = format!("{}-{}", slug, i);
        if used.insert(candidate.clone()) {
            return candidate;
        }
        i += 1;
    }
}

// Utility to compute sha256 hex
pub fn sha256_hex(bytes: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let out = hasher.finalize();
    out.iter().map(|b| format!("{:02x}", b)).collect()
}
