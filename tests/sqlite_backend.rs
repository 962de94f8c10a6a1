//! The pipeline over the SQLite registry, SQLite knowledge store and
//! filesystem object storage.

mod common;

use std::sync::Arc;

use tempfile::TempDir;

use case_knowledge::blob_fs::FsBlobStore;
use case_knowledge::lifecycle::{FileOutcome, TaskSummary};
use case_knowledge::services::Services;
use case_knowledge::sqlite_registry::SqliteCaseRegistry;
use case_knowledge::sqlite_store::SqliteKnowledgeStore;
use case_knowledge::{db, migrate};
use case_knowledge_core::embedding::HashingEmbedder;
use case_knowledge_core::models::{
    Case, ChunkMetadata, ContentChunk, DocType, FileRecord, FileType, UploadedFile,
};
use case_knowledge_core::registry::CaseRegistry;
use case_knowledge_core::store::KnowledgeStore;

use common::*;

struct SqliteHarness {
    services: Services,
    store: Arc<SqliteKnowledgeStore>,
    registry: Arc<SqliteCaseRegistry>,
    blobs: Arc<FsBlobStore>,
}

async fn sqlite_harness(dir: &std::path::Path, task_reply: &str) -> SqliteHarness {
    let config = test_config(dir);
    let pool = db::connect(&config).await.unwrap();
    migrate::apply(&pool).await.unwrap();

    let store = Arc::new(SqliteKnowledgeStore::new(pool.clone()));
    store.pin_model(HashingEmbedder::MODEL_NAME, 256).await.unwrap();
    let registry = Arc::new(SqliteCaseRegistry::new(pool));
    let blobs = Arc::new(FsBlobStore::new(
        dir.join("blobs"),
        "construction_files",
        None,
        Some(b"test-signing-key".to_vec()),
    ));
    let services = Services::assemble(
        &config,
        registry.clone(),
        store.clone(),
        blobs.clone(),
        collaborators(Arc::new(ScriptedCompleter::new(task_reply)), 256),
    );
    SqliteHarness {
        services,
        store,
        registry,
        blobs,
    }
}

fn chunk(case_id: &str, id: &str, dims: usize) -> ContentChunk {
    ContentChunk::new(
        id,
        case_id,
        "Guardrail missing on level two.",
        vec![0.5; dims],
        ChunkMetadata::Image {
            doc_id: id.to_string(),
            source_filename: "level2.jpg".to_string(),
            mime_type: "image/jpeg".to_string(),
        },
    )
    .unwrap()
}

#[tokio::test]
async fn create_search_and_delete_round_trip() {
    let tmp = TempDir::new().unwrap();
    let h = sqlite_harness(tmp.path(), TWO_TASKS).await;

    let creation = h
        .services
        .lifecycle
        .create_case(
            vec![UploadedFile::new("site-report.txt", two_chunk_document())],
            vec![UploadedFile::new("memo.m4a", vec![1, 2])],
            vec![UploadedFile::new("facade.png", vec![3])],
        )
        .await
        .unwrap();
    assert_eq!(creation.succeeded(), 3);
    assert!(matches!(creation.tasks, TaskSummary::Generated { count: 2, .. }));
    assert_eq!(h.store.count_by_case(&creation.case_id).await.unwrap(), 6);

    let blob_path = tmp
        .path()
        .join("blobs/construction_files/cases")
        .join(&creation.case_id)
        .join("documents/site-report.txt");
    assert!(blob_path.exists());

    let answer = h.services.retrieval.query(PARAGRAPH_TWO, None).await.unwrap();
    assert_eq!(answer.citations[0].label, "[Source 1: site-report.txt, chunk 2]");

    let report = h.services.lifecycle.delete_case(&creation.case_id).await.unwrap();
    assert!(report.success, "{:?}", report);
    assert_eq!(h.store.count_by_case(&creation.case_id).await.unwrap(), 0);
    assert!(h.registry.get_case(&creation.case_id).await.unwrap().is_none());
    assert!(h.registry.list_files(&creation.case_id).await.unwrap().is_empty());
    assert!(h.registry.list_tasks(Some(&creation.case_id)).await.unwrap().is_empty());
    assert!(!blob_path.exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn parallel_file_pipelines_all_ingest() {
    let tmp = TempDir::new().unwrap();
    let h = sqlite_harness(tmp.path(), "[]").await;

    for round in 0..5 {
        let docs: Vec<UploadedFile> = (0..8)
            .map(|i| UploadedFile::new(format!("log-{}-{}.txt", round, i), two_chunk_document()))
            .collect();
        let creation = h
            .services
            .lifecycle
            .create_case(docs, vec![], vec![])
            .await
            .unwrap();

        let failures: Vec<_> = creation
            .documents
            .iter()
            .filter(|o| !o.is_success())
            .collect();
        assert!(failures.is_empty(), "failed files: {:?}", failures);
        assert_eq!(h.store.count_by_case(&creation.case_id).await.unwrap(), 16);
        assert_eq!(h.registry.list_files(&creation.case_id).await.unwrap().len(), 8);
    }
}

#[tokio::test]
async fn registry_enforces_foreign_keys() {
    let tmp = TempDir::new().unwrap();
    let h = sqlite_harness(tmp.path(), "[]").await;

    let orphan = FileRecord {
        id: "f1".to_string(),
        case_id: "missing".to_string(),
        file_type: FileType::Document,
        original_filename: "plan.pdf".to_string(),
        storage_path: "cases/missing/documents/plan.pdf".to_string(),
        mime_type: "application/pdf".to_string(),
        size: 1,
        url: "file:///plan.pdf".to_string(),
        created_at: chrono::Utc::now(),
    };
    assert!(h.registry.insert_file(&orphan).await.is_err());

    let case = Case::new();
    h.registry.create_case(&case).await.unwrap();
    let file = FileRecord {
        case_id: case.id.clone(),
        ..orphan
    };
    h.registry.insert_file(&file).await.unwrap();

    assert!(h.registry.delete_case(&case.id).await.is_err());
    assert_eq!(h.registry.delete_files_by_case(&case.id).await.unwrap(), 1);
    assert_eq!(h.registry.delete_case(&case.id).await.unwrap(), 1);
}

#[tokio::test]
async fn registry_round_trips_records() {
    let tmp = TempDir::new().unwrap();
    let h = sqlite_harness(tmp.path(), TWO_TASKS).await;

    let creation = h
        .services
        .lifecycle
        .create_case(
            vec![UploadedFile::new("site-report.txt", two_chunk_document())],
            vec![],
            vec![],
        )
        .await
        .unwrap();
    let FileOutcome::Succeeded { file_id, url, .. } = &creation.documents[0] else {
        panic!("document should succeed");
    };

    let record = h.registry.get_file(file_id).await.unwrap().unwrap();
    assert_eq!(record.case_id, creation.case_id);
    assert_eq!(record.file_type, FileType::Document);
    assert_eq!(record.mime_type, "text/plain");
    assert_eq!(record.size, two_chunk_document().len() as i64);
    assert_eq!(&record.url, url);

    let tasks = h.registry.list_tasks(Some(&creation.case_id)).await.unwrap();
    assert_eq!(tasks.len(), 2);
    assert!(tasks.iter().all(|t| t.source_chunk_ids.len() == 2));
    let shore = tasks.iter().find(|t| t.title == "Shore the trench").unwrap();
    assert_eq!(shore.reasoning, "Collapse risk");

    let case = h.registry.get_case(&creation.case_id).await.unwrap().unwrap();
    assert_eq!(case.id, creation.case_id);
}

#[tokio::test]
async fn store_upserts_and_keeps_one_dimension() {
    let tmp = TempDir::new().unwrap();
    let h = sqlite_harness(tmp.path(), "[]").await;

    h.store.add_chunks(&[chunk("c1", "c1_a_0", 256)]).await.unwrap();
    h.store.add_chunks(&[chunk("c1", "c1_a_0", 256)]).await.unwrap();
    assert_eq!(h.store.count_by_case("c1").await.unwrap(), 1);

    let err = h
        .store
        .add_chunks(&[chunk("c1", "c1_b_0", 8)])
        .await
        .unwrap_err();
    assert!(err.to_string().contains("dimension"));
    assert_eq!(h.store.count_by_case("c1").await.unwrap(), 1);

    let fetched = h.store.fetch_by_case("c1").await.unwrap();
    assert_eq!(fetched[0].doc_type(), DocType::Image);
    assert_eq!(fetched[0].embedding, vec![0.5; 256]);
    assert_eq!(fetched[0].metadata.source_filename(), Some("level2.jpg"));
}

#[tokio::test]
async fn model_pin_rejects_a_different_embedder() {
    let tmp = TempDir::new().unwrap();
    let h = sqlite_harness(tmp.path(), "[]").await;

    h.store.pin_model(HashingEmbedder::MODEL_NAME, 256).await.unwrap();
    let err = h.store.pin_model(HashingEmbedder::MODEL_NAME, 512).await.unwrap_err();
    assert!(err.to_string().contains("dimension mismatch"));
    let err = h.store.pin_model("text-embedding-3-small", 256).await.unwrap_err();
    assert!(err.to_string().contains("model mismatch"));
}

#[tokio::test]
async fn signed_urls_verify_and_expire() {
    let tmp = TempDir::new().unwrap();
    let h = sqlite_harness(tmp.path(), "[]").await;

    let creation = h
        .services
        .lifecycle
        .create_case(
            vec![],
            vec![],
            vec![UploadedFile::new("crack.jpg", vec![7, 7, 7])],
        )
        .await
        .unwrap();
    let FileOutcome::Succeeded { file_id, .. } = &creation.images[0] else {
        panic!("image should succeed");
    };

    let access = h.services.lifecycle.file_url(file_id, 120).await.unwrap();
    assert!(access.signed);
    let query = access.url.split_once('?').unwrap().1;
    let mut expires = 0i64;
    let mut signature = "";
    for pair in query.split('&') {
        match pair.split_once('=') {
            Some(("expires", v)) => expires = v.parse().unwrap(),
            Some(("signature", v)) => signature = v,
            _ => {}
        }
    }
    let path = format!("cases/{}/images/crack.jpg", creation.case_id);
    let now = chrono::Utc::now().timestamp();
    assert!(h.blobs.verify_signature(&path, expires, signature, now));
    assert!(!h.blobs.verify_signature(&path, expires, signature, expires + 1));
    assert!(!h.blobs.verify_signature("cases/other/images/crack.jpg", expires, signature, now));

    let (record, bytes) = h.services.lifecycle.download_file(file_id).await.unwrap();
    assert_eq!(record.original_filename, "crack.jpg");
    assert_eq!(bytes, vec![7, 7, 7]);
}

#[tokio::test]
async fn open_requires_initialized_schema() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(tmp.path());
    let err = match Services::open(&config).await {
        Ok(_) => panic!("open should fail before init"),
        Err(e) => e,
    };
    assert!(format!("{:#}", err).contains("casekb init"));

    migrate::run_migrations(&config).await.unwrap();
    migrate::run_migrations(&config).await.unwrap();
    assert!(Services::open(&config).await.is_ok());
}
