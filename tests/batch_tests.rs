use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;

use lawcheck_sanitize::{emit_files, enumerate_responses, sha256_hex, slugify, unique_slug};
use serde_json::{json, Value};

#[test]
fn enumerate_responses_finds_nested_files() {
    let td = tempfile::tempdir().unwrap();
    let base = td.path();
    let dir = base.join("responses/2024");
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("b.txt"), "{}").unwrap();
    fs::write(dir.join("a.txt"), "{}").unwrap();
    fs::write(dir.join("skip.md"), "x").unwrap();

    let pattern = format!("{}/responses/**/*.txt", base.display());
    let files = enumerate_responses(&pattern).expect("should find files");
    let files: Vec<PathBuf> = files.into_iter().map(|p| p.strip_prefix(base).unwrap().to_path_buf()).collect();
    assert_eq!(files, vec![PathBuf::from("responses/2024/a.txt"), PathBuf::from("responses/2024/b.txt")]);
}

#[test]
fn enumerate_responses_empty_returns_error() {
    let td = tempfile::tempdir().unwrap();
    let pattern = format!("{}/responses/**/*.txt", td.path().display());
    let err = enumerate_responses(&pattern).err().expect("should be error");
    assert_eq!(err.to_string(), "NoFilesFound");
}

#[test]
fn emit_files_writes_cleaned_json_and_meta() {
    let td = tempfile::tempdir().unwrap();
    let outdir = td.path().join("out");
    let cleaned = json!({"score": 85, "law_compliance": {"status": "부적합"}});
    let meta = json!({"doc_id": "upload-001", "stats": {"repaired": true}});

    let paths = emit_files(&cleaned, &meta, outdir.to_str().unwrap(), "upload-001").expect("emit ok");
    let back: Value = serde_json::from_str(&fs::read_to_string(&paths.json_path).unwrap()).unwrap();
    assert_eq!(back, cleaned);
    let back_meta: Value = serde_json::from_str(&fs::read_to_string(&paths.meta_path).unwrap()).unwrap();
    assert_eq!(back_meta["doc_id"], "upload-001");

    // no temp files left behind
    let names: Vec<String> = fs::read_dir(&outdir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
        .collect();
    assert_eq!(names.len(), 2);
}

#[test]
fn slugs_are_ascii_and_unique() {
    assert_eq!(slugify("Upload 001 (final)"), "upload-001-final");
    assert_eq!(slugify("분석결과"), "doc");

    let mut used = HashSet::new();
    assert_eq!(unique_slug("doc".into(), &mut used), "doc");
    assert_eq!(unique_slug("doc".into(), &mut used), "doc-1");
    assert_eq!(unique_slug("doc".into(), &mut used), "doc-2");
}

#[test]
fn sha256_hex_matches_known_digest() {
    assert_eq!(sha256_hex(b"abc"), "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad");
}
