//! Documents handed to the pipeline.
//!
//! PDF text extraction happens upstream; this module only deals with the
//! cleaned text it produces. [`TextDirectory`] loads one document per `.txt`
//! or `.md` file and splits sections on markdown headings.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::errors::{Result, ScigraphError};
use crate::utils::scrub_text;

/// Documents shorter than this (after cleanup) are treated as unreadable.
pub const MIN_DOCUMENT_CHARS: usize = 500;
/// Longest text sent to the extractor.
pub const MAX_EXCERPT_CHARS: usize = 40_000;
const EXCERPT_HEAD_CHARS: usize = 35_000;
const EXCERPT_TAIL_CHARS: usize = 5_000;
const SKIP_MARKER: &str = "\n\n...[SECTION SKIPPED FOR TOKEN LIMIT]...\n\n";

/// One section of a paper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentSection {
    pub heading: Option<String>,
    pub text: String,
}

/// A paper, as cleaned section text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Stable identifier, used in reports and logs (usually the file stem).
    pub id: String,
    /// Human-readable title, recorded as `source_paper` provenance.
    pub title: String,
    pub sections: Vec<DocumentSection>,
}

impl Document {
    pub fn new(id: impl Into<String>, title: impl Into<String>, sections: Vec<DocumentSection>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            sections,
        }
    }

    /// Single-section document.
    pub fn from_text(id: impl Into<String>, title: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(
            id,
            title,
            vec![DocumentSection {
                heading: None,
                text: text.into(),
            }],
        )
    }

    /// All sections joined, headings included.
    pub fn full_text(&self) -> String {
        let mut out = String::new();
        for section in &self.sections {
            if let Some(heading) = &section.heading {
                out.push_str(heading);
                out.push('\n');
            }
            out.push_str(&section.text);
            out.push('\n');
        }
        out
    }
}

/// Reduce raw paper text to what the extractor sees.
///
/// Returns `None` when the cleaned text is too short to be a real paper.
/// Long texts keep their beginning (introduction, related work, method) and
/// their end (conclusion); the middle is replaced by a marker.
pub fn prepare_text(raw: &str) -> Option<String> {
    let text = scrub_text(raw);
    let char_count = text.chars().count();
    if char_count < MIN_DOCUMENT_CHARS {
        return None;
    }
    if char_count <= MAX_EXCERPT_CHARS {
        return Some(text);
    }

    let head: String = text.chars().take(EXCERPT_HEAD_CHARS).collect();
    let tail: String = text.chars().skip(char_count - EXCERPT_TAIL_CHARS).collect();
    Some(format!("{head}{SKIP_MARKER}{tail}"))
}

/// Split text into sections at markdown headings (`#`, `##`, ...).
pub fn split_sections(text: &str) -> Vec<DocumentSection> {
    let mut sections = Vec::new();
    let mut heading: Option<String> = None;
    let mut body = String::new();

    for line in text.lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with('#') {
            let title = trimmed.trim_start_matches('#').trim();
            if !body.trim().is_empty() || heading.is_some() {
                sections.push(DocumentSection {
                    heading: heading.take(),
                    text: body.trim().to_string(),
                });
            }
            body.clear();
            heading = (!title.is_empty()).then(|| title.to_string());
        } else {
            body.push_str(line);
            body.push('\n');
        }
    }

    if !body.trim().is_empty() || heading.is_some() {
        sections.push(DocumentSection {
            heading,
            text: body.trim().to_string(),
        });
    }

    sections
}

/// Anything that can enumerate documents for a run.
#[allow(async_fn_in_trait)]
pub trait DocumentSource: Send + Sync {
    async fn load(&self) -> Result<Vec<Document>>;
}

/// A directory of already-extracted paper text (`.txt` / `.md`).
#[derive(Debug, Clone)]
pub struct TextDirectory {
    root: PathBuf,
}

impl TextDirectory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn is_paper_file(path: &Path) -> bool {
        matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("txt") | Some("md")
        )
    }

    /// `"gaussian_splatting_survey.txt"` → `"gaussian splatting survey"`.
    fn title_from_stem(stem: &str) -> String {
        stem.replace(['_', '-'], " ")
    }
}

impl DocumentSource for TextDirectory {
    async fn load(&self) -> Result<Vec<Document>> {
        let mut entries = tokio::fs::read_dir(&self.root).await.map_err(|e| {
            ScigraphError::Source(format!("cannot read directory {}: {e}", self.root.display()))
        })?;

        let mut paths = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| ScigraphError::Source(e.to_string()))?
        {
            let path = entry.path();
            if Self::is_paper_file(&path) {
                paths.push(path);
            }
        }
        paths.sort();

        let mut documents = Vec::with_capacity(paths.len());
        for path in paths {
            let raw = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| ScigraphError::Source(format!("{}: {e}", path.display())))?;

            let stem = path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or_default()
                .to_string();

            let Some(text) = prepare_text(&raw) else {
                warn!(file = %path.display(), "skipping empty or unreadable document");
                continue;
            };

            debug!(file = %path.display(), chars = text.len(), "loaded document");
            documents.push(Document::new(
                stem.clone(),
                Self::title_from_stem(&stem),
                split_sections(&text),
            ));
        }

        Ok(documents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filler(n: usize) -> String {
        "x".repeat(n)
    }

    #[test]
    fn prepare_text_skips_short_documents() {
        assert_eq!(prepare_text("too short"), None);
        assert_eq!(prepare_text(&format!("\0\0{}", filler(10))), None);
    }

    #[test]
    fn prepare_text_keeps_medium_documents_whole() {
        let raw = format!("{}\t{}\0", filler(300), filler(300));
        let prepared = prepare_text(&raw).unwrap();
        assert_eq!(prepared.chars().count(), 601);
        assert!(!prepared.contains('\0'));
        assert!(!prepared.contains('\t'));
    }

    #[test]
    fn prepare_text_keeps_head_and_tail_of_long_documents() {
        let raw = format!("{}{}{}", "h".repeat(35_000), "m".repeat(20_000), "t".repeat(5_000));
        let prepared = prepare_text(&raw).unwrap();
        assert!(prepared.starts_with(&"h".repeat(35_000)));
        assert!(prepared.ends_with(&"t".repeat(5_000)));
        assert!(prepared.contains("SECTION SKIPPED"));
        assert!(!prepared.contains('m'));
    }

    #[test]
    fn split_sections_on_headings() {
        let text = "Preamble line\n# Introduction\nWe propose X.\n## Method\nX uses Y.\n";
        let sections = split_sections(text);
        assert_eq!(sections.len(), 3);
        assert_eq!(sections[0].heading, None);
        assert_eq!(sections[0].text, "Preamble line");
        assert_eq!(sections[1].heading.as_deref(), Some("Introduction"));
        assert_eq!(sections[2].heading.as_deref(), Some("Method"));
        assert_eq!(sections[2].text, "X uses Y.");
    }

    #[test]
    fn full_text_includes_headings() {
        let doc = Document::new(
            "d",
            "D",
            vec![DocumentSection {
                heading: Some("Abstract".into()),
                text: "Body".into(),
            }],
        );
        assert_eq!(doc.full_text(), "Abstract\nBody\n");
    }

    #[tokio::test]
    async fn text_directory_loads_papers_in_order() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b_paper.md"), format!("# Intro\n{}", filler(600))).unwrap();
        std::fs::write(dir.path().join("a_paper.txt"), filler(600)).unwrap();
        std::fs::write(dir.path().join("empty.txt"), "tiny").unwrap();
        std::fs::write(dir.path().join("paper.pdf"), filler(600)).unwrap();

        let docs = TextDirectory::new(dir.path()).load().await.unwrap();
        let ids: Vec<_> = docs.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["a_paper", "b_paper"]);
        assert_eq!(docs[1].title, "b paper");
        assert_eq!(docs[1].sections[0].heading.as_deref(), Some("Intro"));
    }

    #[tokio::test]
    async fn text_directory_reports_missing_dir() {
        let err = TextDirectory::new("/definitely/not/here").load().await.unwrap_err();
        assert!(matches!(err, ScigraphError::Source(_)));
    }
}
