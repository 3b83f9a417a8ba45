use std::collections::HashSet;
use std::fs;
use std::io::Read;
use std::path::Path;

use lawcheck_sanitize::{
    emit_files, enumerate_responses, has_fence, load_config, sanitize_response, sha256_hex, slugify, unique_slug,
    EnumerateError, ReportView, SanitizeConfig,
};

fn now_ms() -> i128 {
    std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).map(|d| d.as_millis() as i128).unwrap_or(0)
}

fn dump_step(dir: &str, name: &str, contents: &[u8]) {
    if let Err(e) = fs::create_dir_all(dir) {
        eprintln!(
            "{}",
            serde_json::json!({
                "tool":"dump_steps",
                "dir": dir,
                "error": e.to_string()
            })
        );
        return;
    }
    let step_path = format!("{}/{}", dir, name);
    if let Err(e) = fs::write(&step_path, contents) {
        eprintln!(
            "{}",
            serde_json::json!({
                "tool":"dump_steps",
                "file": step_path,
                "error": e.to_string()
            })
        );
    }
}

fn main() {
    // Simple CLI flags parsing
    let args: Vec<String> = std::env::args().collect();
    let dump_steps = args.iter().any(|a| a == "--dump-steps");
    let from_stdin = args.iter().any(|a| a == "--stdin");
    let mut config_path: Option<String> = None;
    if let Some(pos) = args.iter().position(|a| a == "--config") {
        if let Some(val) = args.get(pos + 1) {
            if !val.starts_with("--") {
                config_path = Some(val.clone());
            }
        }
    }
    let mut per_doc_dir_on = true; // default on
    if let Some(val) = args.iter().find(|a| a.starts_with("--per-doc-dir")) {
        if let Some(eqpos) = val.find('=') {
            per_doc_dir_on = &val[eqpos + 1..] != "off";
        }
    }

    // 1) Config: explicit path must load; the default file is optional
    let cfg = match config_path.as_deref() {
        Some(p) => load_config(Path::new(p)),
        None if Path::new("sanitize.yaml").exists() => load_config(Path::new("sanitize.yaml")),
        None => Ok(SanitizeConfig::default()),
    };
    let cfg = match cfg {
        Ok(c) => c,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::json!({
                    "tool": "load_config",
                    "file": config_path.unwrap_or_else(|| "sanitize.yaml".to_string()),
                    "error": e.to_string(),
                    "error_code": 3
                })
            );
            std::process::exit(3);
        }
    };
    eprintln!(
        "{}",
        serde_json::json!({
            "tool":"load_config",
            "status":"ok",
            "id": cfg.id,
            "input_glob": cfg.inputs.path,
            "output_dir": cfg.outputs.dir
        })
    );

    // 2) Single response on stdin -> cleaned JSON on stdout
    if from_stdin {
        let mut raw = String::new();
        if let Err(e) = std::io::stdin().read_to_string(&mut raw) {
            eprintln!("{}", serde_json::json!({"tool":"stdin", "error": e.to_string(), "error_code": 1}));
            std::process::exit(1);
        }
        match sanitize_response(&raw, &cfg.cleaner) {
            Ok(out) => {
                eprintln!("{}", serde_json::json!({"tool":"sanitize", "file":"-", "stats": out.stats}));
                match serde_json::to_string_pretty(&out.cleaned) {
                    Ok(s) => println!("{}", s),
                    Err(e) => {
                        eprintln!("{}", serde_json::json!({"tool":"sanitize", "error": e.to_string(), "error_code": 6}));
                        std::process::exit(6);
                    }
                }
                return;
            }
            Err(failure) => {
                let mut body = failure.to_json();
                body["tool"] = serde_json::json!("sanitize");
                body["error_code"] = serde_json::json!(4);
                eprintln!("{}", body);
                std::process::exit(4);
            }
        }
    }

    // 3) Batch: enumerate saved responses
    let files = match enumerate_responses(&cfg.inputs.path) {
        Ok(files) => files,
        Err(EnumerateError::NoFilesFound { guidance }) => {
            eprintln!(
                "{}",
                serde_json::json!({
                    "tool":"enumerate_responses",
                    "error":"NoFilesFound",
                    "error_code":1
                })
            );
            eprintln!("{}", guidance);
            std::process::exit(1);
        }
    };
    eprintln!("{}", serde_json::json!({"tool":"enumerate_responses", "count": files.len()}));

    let mut used_doc_ids: HashSet<String> = HashSet::new();
    let mut parse_failures = 0usize;

    for file in files {
        let started_ms = now_ms();
        let stem = file.file_stem().and_then(|s| s.to_str()).unwrap_or("doc").to_string();
        let doc_id = unique_slug(slugify(&stem), &mut used_doc_ids);
        let base_output = cfg.outputs.dir.clone();
        let doc_outdir = if per_doc_dir_on { format!("{}/{}", base_output, doc_id) } else { base_output };
        let artifacts_dir = if dump_steps { Some(format!("{}/artifacts", doc_outdir)) } else { None };

        let raw = match fs::read_to_string(&file) {
            Ok(s) => s,
            Err(e) => {
                eprintln!(
                    "{}",
                    serde_json::json!({"tool":"read_response", "file": file, "error": e.to_string(), "error_code": 1})
                );
                std::process::exit(1);
            }
        };

        let out = match sanitize_response(&raw, &cfg.cleaner) {
            Ok(out) => out,
            Err(failure) => {
                // Keep going; the exit code reports the failure at the end
                parse_failures += 1;
                let mut body = failure.to_json();
                body["tool"] = serde_json::json!("sanitize");
                body["file"] = serde_json::json!(file);
                body["fenced"] = serde_json::json!(has_fence(&raw));
                body["error_code"] = serde_json::json!(4);
                eprintln!("{}", body);
                continue;
            }
        };
        eprintln!("{}", serde_json::json!({"tool":"sanitize", "file": file, "stats": out.stats}));

        if let Some(ad) = &artifacts_dir {
            dump_step(ad, "step1_unfenced.txt", out.unfenced.as_bytes());
            dump_step(ad, "step2_parsed.json", &serde_json::to_vec_pretty(&out.parsed).unwrap_or_default());
            dump_step(ad, "step3_cleaned.json", &serde_json::to_vec_pretty(&out.cleaned).unwrap_or_default());
        }

        let report = ReportView::from_value_with(&out.cleaned, &cfg.cleaner);
        eprintln!(
            "{}",
            serde_json::json!({
                "tool":"report_view",
                "file": file,
                "score": report.score,
                "status": report.compliance_status,
                "violations": report.violations.len(),
                "issues": report.issue_count
            })
        );

        let finished_ms = now_ms();
        let meta = serde_json::json!({
            "doc_id": doc_id,
            "source": file,
            "source_sha256": sha256_hex(raw.as_bytes()),
            "stats": out.stats,
            "report": report,
            "timestamps": {"started_ms": started_ms, "finished_ms": finished_ms},
        });
        // Fingerprint over the meta without timestamps
        let mut meta_norm = meta.clone();
        if let Some(obj) = meta_norm.as_object_mut() {
            obj.remove("timestamps");
        }
        let fingerprint = sha256_hex(&serde_json::to_vec(&meta_norm).unwrap_or_default());
        let mut meta_full = meta.as_object().cloned().unwrap_or_default();
        meta_full.insert("meta_fingerprint".to_string(), serde_json::json!(fingerprint));
        let meta = serde_json::Value::Object(meta_full);

        match emit_files(&out.cleaned, &meta, &doc_outdir, &doc_id) {
            Ok(paths) => {
                eprintln!(
                    "{}",
                    serde_json::json!({
                        "tool":"emit_files",
                        "file": file,
                        "json_path": paths.json_path,
                        "meta_path": paths.meta_path
                    })
                );
            }
            Err(e) => {
                eprintln!(
                    "{}",
                    serde_json::json!({
                        "tool":"emit_files",
                        "file": file,
                        "error": e.to_string(),
                        "error_code": 6
                    })
                );
                std::process::exit(6);
            }
        }
    }

    if parse_failures > 0 {
        eprintln!("{}", serde_json::json!({"tool":"summary", "parse_failures": parse_failures, "error_code": 4}));
        std::process::exit(4);
    }
}
