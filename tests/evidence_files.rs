//! Evidence folder loading, PDF extraction, and configuration files.

use std::fs;

use casefile::config::load_config;
use casefile::engine::Engine;
use casefile::EngineError;
use tempfile::TempDir;

/// Minimal valid PDF whose only text is "van seen at dock".
fn minimal_pdf() -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(b"%PDF-1.4\n");
    let o1 = out.len();
    out.extend_from_slice(b"1 0 obj << /Type /Catalog /Pages 2 0 R >> endobj\n");
    let o2 = out.len();
    out.extend_from_slice(b"2 0 obj << /Type /Pages /Kids [3 0 R] /Count 1 >> endobj\n");
    let o3 = out.len();
    out.extend_from_slice(b"3 0 obj << /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents 4 0 R /Resources << /Font << /F1 5 0 R >> >> >> endobj\n");
    let o4 = out.len();
    out.extend_from_slice(b"4 0 obj << /Length 44 >> stream\nBT /F1 12 Tf 100 700 Td (van seen at dock) Tj ET\nendstream endobj\n");
    let o5 = out.len();
    out.extend_from_slice(
        b"5 0 obj << /Type /Font /Subtype /Type1 /BaseFont /Helvetica >> endobj\n",
    );
    let xref_start = out.len();
    out.extend_from_slice(b"xref\n0 6\n");
    out.extend_from_slice(format!("{:010} 65535 f \n", 0).as_bytes());
    for offset in [o1, o2, o3, o4, o5] {
        out.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
    }
    out.extend_from_slice(b"trailer << /Size 6 /Root 1 0 R >>\nstartxref\n");
    out.extend_from_slice(format!("{}\n", xref_start).as_bytes());
    out.extend_from_slice(b"%%EOF\n");
    out
}

fn write_config(dir: &TempDir, evidence: &std::path::Path) -> std::path::PathBuf {
    let path = dir.path().join("casefile.toml");
    let toml = format!(
        r#"
[chunking]
max_chars = 200
overlap_chars = 20

[retrieval]
top_k = 4
min_score = 0.1

[evidence]
dir = "{}"
"#,
        evidence.display().to_string().replace('\\', "\\\\")
    );
    fs::write(&path, toml).unwrap();
    path
}

#[tokio::test]
async fn test_pdf_filed_as_txt() {
    let tmp = TempDir::new().unwrap();
    let cfg = load_config(&tmp.path().join("missing.toml")).unwrap();
    let engine = Engine::from_config(&cfg).unwrap();

    let report = engine.ingest("dock_log.pdf", &minimal_pdf()).await.unwrap();
    assert_eq!(report.filename, "dock_log.txt");
    assert!(engine
        .read_evidence("dock_log.txt")
        .unwrap()
        .contains("van seen at dock"));
    assert!(engine.read_evidence("dock_log.pdf").is_err());
}

#[tokio::test]
async fn test_load_evidence_dir() {
    let tmp = TempDir::new().unwrap();
    let evidence = tmp.path().join("evidence");
    fs::create_dir_all(evidence.join("interviews")).unwrap();
    fs::write(
        evidence.join("suspect_a.txt"),
        "Suspect A was seen at the warehouse at 10pm",
    )
    .unwrap();
    fs::write(
        evidence.join("interviews").join("neighbor.md"),
        "# Neighbor\n\nHeard a car leave around eleven.",
    )
    .unwrap();
    fs::write(evidence.join("photo.jpg"), [0xff, 0xd8, 0xff]).unwrap();
    fs::write(evidence.join("blank.txt"), "   \n").unwrap();

    let config_path = write_config(&tmp, &evidence);
    let cfg = load_config(&config_path).unwrap();
    assert_eq!(cfg.retrieval.top_k, 4);
    assert_eq!(cfg.chunking.max_chars, 200);

    let engine = Engine::from_config(&cfg).unwrap();
    let summary = engine.load_evidence_dir(&cfg.evidence.dir).await.unwrap();

    assert_eq!(summary.indexed.len(), 2);
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.failed.len(), 1);
    assert!(matches!(summary.failed[0].1, EngineError::EmptyDocument(_)));
    assert_eq!(engine.list_indexed(), vec!["neighbor.md", "suspect_a.txt"]);
    assert_eq!(
        summary.source_path("neighbor.md"),
        Some(evidence.join("interviews").join("neighbor.md").as_path())
    );
    assert_eq!(
        summary.source_path("suspect_a.txt"),
        Some(evidence.join("suspect_a.txt").as_path())
    );
    assert!(summary.source_path("blank.txt").is_none());
}

#[tokio::test]
async fn test_pdf_in_folder_traced_to_its_source() {
    let tmp = TempDir::new().unwrap();
    let evidence = tmp.path().join("evidence");
    fs::create_dir_all(evidence.join("scans")).unwrap();
    fs::write(evidence.join("scans").join("dock_log.pdf"), minimal_pdf()).unwrap();

    let cfg = load_config(&tmp.path().join("missing.toml")).unwrap();
    let engine = Engine::from_config(&cfg).unwrap();
    let summary = engine.load_evidence_dir(&evidence).await.unwrap();

    assert_eq!(engine.list_indexed(), vec!["dock_log.txt"]);
    assert_eq!(
        summary.source_path("dock_log.txt"),
        Some(evidence.join("scans").join("dock_log.pdf").as_path())
    );
}

#[tokio::test]
async fn test_missing_evidence_dir_created() {
    let tmp = TempDir::new().unwrap();
    let evidence = tmp.path().join("not-yet");
    let cfg = load_config(&tmp.path().join("missing.toml")).unwrap();
    let engine = Engine::from_config(&cfg).unwrap();

    let summary = engine.load_evidence_dir(&evidence).await.unwrap();
    assert!(summary.indexed.is_empty());
    assert!(evidence.is_dir());
}

#[test]
fn test_invalid_config_rejected() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("bad.toml");
    fs::write(&path, "[embedding]\nprovider = \"carrier-pigeon\"\n").unwrap();
    let err = load_config(&path).unwrap_err().to_string();
    assert!(err.contains("carrier-pigeon"));
}

#[test]
fn test_malformed_toml_rejected() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("broken.toml");
    fs::write(&path, "[retrieval\ntop_k = ").unwrap();
    assert!(load_config(&path).is_err());
}
