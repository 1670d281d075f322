//! End-to-end pipeline behaviour over the in-memory store.

mod helpers;

use serde_json::json;
use tokio_util::sync::CancellationToken;

use scigraph_rs::documents::{Document, DocumentSource, TextDirectory};
use scigraph_rs::driver::{GraphStore, MemoryStore};
use scigraph_rs::edges::RelationType;
use scigraph_rs::errors::Result;
use scigraph_rs::extract::{CandidateEntity, CandidateRelation, Extraction, Extractor};
use scigraph_rs::nodes::EntityType;
use scigraph_rs::pipeline::{DocumentStatus, FailureKind, Pipeline, PipelineStage};
use scigraph_rs::query::GraphReader;
use scigraph_rs::utils::RetryPolicy;
use scigraph_rs::validate::RejectionKind;

use helpers::{paper, splatting_validator, Script, ScriptedExtractor};

fn eagles_extraction() -> Extraction {
    Extraction::new(
        vec![
            CandidateEntity::new("EAGLES", "Method").with_ref("e1"),
            CandidateEntity::new("3DGS", "Method").with_ref("e2"),
            CandidateEntity::new("Mip-NeRF 360", "Dataset").with_ref("e3"),
        ],
        vec![
            CandidateRelation::new("e1", "IMPROVES_ON", "e2")
                .with_context("EAGLES reduces the memory footprint of 3DGS by an order of magnitude."),
            CandidateRelation::new("e1", "EVALUATED_ON", "e3"),
        ],
    )
}

#[tokio::test]
async fn synonyms_fold_across_documents() {
    let store = MemoryStore::new();
    let extractor = ScriptedExtractor::new()
        .on(
            "3dgs",
            Script::Returns(Extraction::new(
                vec![
                    CandidateEntity::new("3D Gaussian Splatting for Real-Time Radiance Field Rendering", "Paper")
                        .with_ref("p"),
                    CandidateEntity::new("3D Gaussian Splatting", "Method").with_ref("m"),
                ],
                vec![CandidateRelation::new("p", "INTRODUCES", "m")],
            )),
        )
        .on("eagles", Script::Returns(eagles_extraction()))
        .on(
            "survey",
            Script::Returns(Extraction::new(
                vec![CandidateEntity::new("Mini-Splatting", "Method").with_ref("s")],
                // Endpoint only exists in the graph.
                vec![CandidateRelation::new("s", "EXTENDS", "Gaussian Splatting")],
            )),
        );
    let pipeline = Pipeline::new(extractor, store.clone())
        .with_validator(splatting_validator())
        .with_max_concurrency(1);

    let summary = pipeline
        .run(&[
            paper("3dgs", "3D Gaussian Splatting"),
            paper("eagles", "EAGLES"),
            paper("survey", "Mini-Splatting"),
        ])
        .await;
    assert_eq!(summary.done, 3, "{summary:#?}");
    assert!(summary.rejections.is_empty());

    let methods = store.list_nodes(Some(&[EntityType::Method])).await.unwrap();
    let splats: Vec<_> = methods
        .iter()
        .filter(|n| n.name == "3d gaussian splatting")
        .collect();
    assert_eq!(splats.len(), 1);
    assert_eq!(methods.len(), 3);

    let improves: Vec<_> = store
        .list_edges(Some(&[RelationType::ImprovesOn, RelationType::Extends]))
        .await
        .unwrap();
    assert_eq!(improves.len(), 2);
    assert!(improves.iter().all(|e| e.target_node_uuid == splats[0].uuid));
    let eagles_edge = improves
        .iter()
        .find(|e| e.relation == RelationType::ImprovesOn)
        .unwrap();
    assert!(eagles_edge
        .citation_context
        .as_deref()
        .unwrap()
        .contains("memory footprint"));
}

#[tokio::test]
async fn nodes_keep_their_display_spelling() {
    let store = MemoryStore::new();
    let extractor = ScriptedExtractor::new().on("eagles", Script::Returns(eagles_extraction()));
    let pipeline = Pipeline::new(extractor, store.clone()).with_validator(splatting_validator());
    let report = pipeline.run_document(&paper("eagles", "EAGLES")).await;
    assert_eq!(report.status, DocumentStatus::Done);

    let methods = store.list_nodes(Some(&[EntityType::Method])).await.unwrap();
    let eagles = methods.iter().find(|n| n.name == "eagles").unwrap();
    assert_eq!(eagles.display_name(), "EAGLES");
    // Entered as "3DGS"; the declared canonical spelling is stored.
    let splat = methods.iter().find(|n| n.name == "3d gaussian splatting").unwrap();
    assert_eq!(splat.display_name(), "3D Gaussian Splatting");

    let sample = GraphReader::new(&store).sample_relationships(5).await.unwrap();
    let improves = sample
        .iter()
        .find(|r| r.relation == RelationType::ImprovesOn)
        .unwrap();
    assert_eq!((improves.source.as_str(), improves.target.as_str()), ("EAGLES", "3D Gaussian Splatting"));
}

#[tokio::test]
async fn one_dangling_relation_is_rejected_alone() {
    let mut extraction = eagles_extraction();
    extraction
        .relations
        .push(CandidateRelation::new("e1", "USES", "spherical harmonics"));
    let store = MemoryStore::new();
    let extractor = ScriptedExtractor::new().on("eagles", Script::Returns(extraction));

    let report = Pipeline::new(extractor, store.clone())
        .run_document(&paper("eagles", "EAGLES"))
        .await;

    assert_eq!(report.status, DocumentStatus::Done);
    assert_eq!(report.rejections.len(), 1);
    assert_eq!(report.rejections[0].kind, RejectionKind::DanglingEdge);
    assert_eq!(report.write.unwrap().edges_created, 2);
    assert_eq!(store.counts().await.unwrap().edges, 2);
}

#[tokio::test]
async fn a_failed_document_does_not_affect_the_others() {
    let store = MemoryStore::new();
    let extractor = ScriptedExtractor::new()
        .on("refused", Script::Refuses)
        .on("eagles", Script::Returns(eagles_extraction()));
    let pipeline = Pipeline::new(extractor, store.clone())
        .with_extraction_retry(RetryPolicy::immediate(2))
        .with_max_concurrency(2);

    let summary = pipeline
        .run(&[paper("refused", "Refused"), paper("eagles", "EAGLES")])
        .await;

    assert_eq!((summary.done, summary.failed), (1, 1));
    assert!(matches!(
        summary.report("refused").unwrap().status,
        DocumentStatus::Failed {
            stage: PipelineStage::Extraction,
            error: FailureKind::Extraction,
            ..
        }
    ));
    assert_eq!(summary.report("eagles").unwrap().status, DocumentStatus::Done);
    assert_eq!(store.counts().await.unwrap().nodes, 3);
}

#[tokio::test]
async fn transient_extraction_errors_are_retried() {
    let extractor = ScriptedExtractor::new().on("eagles", Script::FlakyThen(2, eagles_extraction()));
    let pipeline = Pipeline::new(extractor, MemoryStore::new())
        .with_extraction_retry(RetryPolicy::immediate(3));

    let report = pipeline.run_document(&paper("eagles", "EAGLES")).await;
    assert_eq!(report.status, DocumentStatus::Done);
}

#[tokio::test]
async fn rerunning_a_document_creates_no_new_nodes() {
    let store = MemoryStore::new();
    let extractor = ScriptedExtractor::new().on("eagles", Script::Returns(eagles_extraction()));
    let pipeline = Pipeline::new(extractor, store.clone());
    let doc = paper("eagles", "EAGLES");

    let first = pipeline.run_document(&doc).await.write.unwrap();
    let second = pipeline.run_document(&doc).await.write.unwrap();

    assert_eq!((first.nodes_created, first.nodes_merged), (3, 0));
    assert_eq!((second.nodes_created, second.nodes_merged), (0, 3));
    assert_eq!(first.node_ids, second.node_ids);

    let counts = store.counts().await.unwrap();
    assert_eq!(counts.nodes, 3);
    // Edges are an append-only evidence log.
    assert_eq!(counts.edges, 4);
}

/// Cancels the run from inside the extractor, so the document is stopped
/// between extraction and commit.
struct CancellingExtractor {
    token: CancellationToken,
}

impl Extractor for CancellingExtractor {
    async fn extract(&self, _document: &Document) -> Result<Extraction> {
        self.token.cancel();
        Ok(eagles_extraction())
    }
}

#[tokio::test]
async fn cancellation_before_commit_leaves_graph_untouched() {
    let token = CancellationToken::new();
    let store = MemoryStore::new();
    let pipeline = Pipeline::new(CancellingExtractor { token: token.clone() }, store.clone())
        .with_cancellation(token);

    let report = pipeline.run_document(&paper("eagles", "EAGLES")).await;
    match report.status {
        DocumentStatus::Failed { stage, error, .. } => {
            assert_ne!(stage, PipelineStage::Extraction);
            assert_eq!(error, FailureKind::Cancelled);
        }
        other => panic!("expected cancellation, got {other:?}"),
    }
    assert_eq!(store.counts().await.unwrap().nodes, 0);
}

#[tokio::test]
async fn commit_failures_are_reported_per_document() {
    let store = MemoryStore::new();
    store.inject_commit_failures(10);
    let extractor = ScriptedExtractor::new().on("eagles", Script::Returns(eagles_extraction()));
    let pipeline = Pipeline::new(extractor, store.clone()).with_commit_retry(RetryPolicy::immediate(1));

    let report = pipeline.run_document(&paper("eagles", "EAGLES")).await;
    assert!(matches!(
        report.status,
        DocumentStatus::Failed {
            stage: PipelineStage::Commit,
            error: FailureKind::Commit,
            ..
        }
    ));
    assert_eq!(store.counts().await.unwrap().nodes, 0);
}

#[tokio::test]
async fn ingests_a_directory_of_papers() {
    let dir = tempfile::tempdir().unwrap();
    let body = "EAGLES compresses 3D Gaussian Splatting. ".repeat(20);
    std::fs::write(dir.path().join("eagles.txt"), &body).unwrap();
    std::fs::write(dir.path().join("notes.pdf"), "binary").unwrap();
    std::fs::write(dir.path().join("stub.md"), "too short").unwrap();

    let documents = TextDirectory::new(dir.path()).load().await.unwrap();
    assert_eq!(documents.len(), 1);
    assert_eq!(documents[0].id, "eagles");

    let store = MemoryStore::new();
    let extractor = ScriptedExtractor::new().on("eagles", Script::Returns(eagles_extraction()));
    let summary = Pipeline::new(extractor, store.clone()).run(&documents).await;
    assert_eq!(summary.done, 1);

    let reader = GraphReader::new(&store);
    let sample = reader.sample_relationships(5).await.unwrap();
    assert_eq!(sample.len(), 2);
    assert_eq!(sample[0].source, "EAGLES");
    assert_eq!(sample[0].target, "3DGS");

    let snapshot = serde_json::to_value(reader.snapshot().await.unwrap()).unwrap();
    let nodes = snapshot["nodes"].as_array().unwrap();
    assert_eq!(nodes.len(), 3);
    assert!(nodes
        .iter()
        .all(|n| n["properties"]["source_paper"] == json!("eagles")));
}
