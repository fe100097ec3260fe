use std::collections::HashMap;
use std::path::Path;

use policyqa_core::{
    load_chunks, DocumentParser, Element, ParserConfig, Partitioner, PolicyError, Result,
    NOT_AVAILABLE,
};
use tempfile::tempdir;

#[derive(Default)]
struct StubPartitioner {
    documents: HashMap<String, Vec<Element>>,
}

impl StubPartitioner {
    fn with(mut self, name: &str, texts: &[&str]) -> Self {
        self.documents.insert(
            name.to_string(),
            texts.iter().map(|t| Element::new(0, *t)).collect(),
        );
        self
    }
}

impl Partitioner for StubPartitioner {
    fn partition(&self, path: &Path) -> Result<Vec<Element>> {
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        self.documents.get(&name).cloned().ok_or(PolicyError::Pdf {
            path: path.to_path_buf(),
            message: "unreadable".to_string(),
        })
    }
}

fn text_of_len(len: usize) -> String {
    "x".repeat(len)
}

fn touch(dir: &Path, name: &str) {
    std::fs::write(dir.join(name), b"%PDF-1.4").unwrap();
}

#[test]
fn short_elements_are_filtered_and_indices_kept() {
    let dir = tempdir().unwrap();
    touch(dir.path(), "policy.pdf");
    let texts = [text_of_len(5), text_of_len(45), text_of_len(60)];
    let refs: Vec<&str> = texts.iter().map(|s| s.as_str()).collect();
    let parser = DocumentParser::with_partitioner(
        ParserConfig::default(),
        StubPartitioner::default().with("policy.pdf", &refs),
    );
    let out = dir.path().join("chunks/chunked_docs.json");

    let report = parser.run(dir.path(), &out).unwrap();
    assert_eq!(report.chunks, 2);

    let chunks = load_chunks(&out).unwrap();
    assert_eq!(chunks.len(), 2);
    assert_eq!(chunks[0].index, 1);
    assert_eq!(chunks[1].index, 2);
    for chunk in &chunks {
        assert_eq!(chunk.doc_id, "policy.pdf");
        assert_eq!(chunk.section, NOT_AVAILABLE);
        assert_eq!(chunk.clause, NOT_AVAILABLE);
    }
}

#[test]
fn threshold_boundary_is_exclusive() {
    let dir = tempdir().unwrap();
    touch(dir.path(), "boundary.pdf");
    let at = text_of_len(20);
    let above = text_of_len(21);
    let padded = format!("   {}   ", text_of_len(20));
    let parser = DocumentParser::with_partitioner(
        ParserConfig::default(),
        StubPartitioner::default().with("boundary.pdf", &[&at, &above, &padded]),
    );
    let (chunks, _) = parser.parse_dir(dir.path()).unwrap();
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].index, 1);
    assert_eq!(chunks[0].text.chars().count(), 21);
}

#[test]
fn failing_documents_are_skipped() {
    let dir = tempdir().unwrap();
    touch(dir.path(), "a_good.pdf");
    touch(dir.path(), "b_broken.pdf");
    touch(dir.path(), "notes.docx");
    let parser = DocumentParser::with_partitioner(
        ParserConfig::default(),
        StubPartitioner::default().with(
            "a_good.pdf",
            &["Section 1 Scope\nThis policy covers inpatient hospitalisation."],
        ),
    );
    let (chunks, report) = parser.parse_dir(dir.path()).unwrap();
    assert_eq!(report.documents_seen, 2);
    assert_eq!(report.documents_parsed, 1);
    assert_eq!(report.documents_failed, 1);
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].section, "Section 1 Scope");
}

#[test]
fn chunks_follow_file_name_order() {
    let dir = tempdir().unwrap();
    touch(dir.path(), "b.pdf");
    touch(dir.path(), "a.pdf");
    let parser = DocumentParser::with_partitioner(
        ParserConfig::default(),
        StubPartitioner::default()
            .with("a.pdf", &["Alpha policy wording that is long enough."])
            .with("b.pdf", &["Beta policy wording that is long enough."]),
    );
    let (chunks, _) = parser.parse_dir(dir.path()).unwrap();
    let ids: Vec<&str> = chunks.iter().map(|c| c.doc_id.as_str()).collect();
    assert_eq!(ids, ["a.pdf", "b.pdf"]);
}

#[test]
fn empty_result_does_not_write_chunk_file() {
    let dir = tempdir().unwrap();
    touch(dir.path(), "tiny.pdf");
    let parser = DocumentParser::with_partitioner(
        ParserConfig::default(),
        StubPartitioner::default().with("tiny.pdf", &["too short"]),
    );
    let out = dir.path().join("chunks/chunked_docs.json");
    let err = parser.run(dir.path(), &out).unwrap_err();
    assert!(matches!(err, PolicyError::NoChunks(_)));
    assert!(!out.exists());
}

#[test]
fn empty_directory_reports_failure() {
    let dir = tempdir().unwrap();
    let parser = DocumentParser::new(ParserConfig::default());
    let out = dir.path().join("chunked_docs.json");
    assert!(matches!(
        parser.run(dir.path(), &out),
        Err(PolicyError::NoChunks(_))
    ));
}

#[test]
fn missing_directory_reports_failure() {
    let dir = tempdir().unwrap();
    let parser = DocumentParser::new(ParserConfig::default());
    let missing = dir.path().join("data/policies");
    assert!(matches!(
        parser.run(&missing, &dir.path().join("out.json")),
        Err(PolicyError::MissingSourceDir(_))
    ));
}

#[test]
fn plain_text_documents_parse_when_enabled() {
    let dir = tempdir().unwrap();
    std::fs::write(
        dir.path().join("wording.txt"),
        "Clause 7 Claims\nClaims must be intimated within 24 hours.\n\nok",
    )
    .unwrap();
    let parser = DocumentParser::new(ParserConfig {
        extensions: vec!["txt".to_string()],
        ..Default::default()
    });
    let (chunks, _) = parser.parse_dir(dir.path()).unwrap();
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].clause, "Clause 7 Claims");
    assert_eq!(chunks[0].section, NOT_AVAILABLE);
}
