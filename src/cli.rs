//! Command implementations for the `casekb` binary.
//!
//! Each `run_*` function opens the services it needs, performs one
//! operation and prints the result to stdout. Diagnostics go through
//! `tracing` to stderr.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use case_knowledge_core::models::UploadedFile;

use crate::config::Config;
use crate::migrate;
use crate::query::{CaseDetails, CaseListing, QueryCapability, QueryResponse, TaskAnalysis};
use crate::retrieval::QueryAnswer;
use crate::services::Services;

pub async fn run_init(config: &Config) -> Result<()> {
    migrate::run_migrations(config).await?;
    println!("Database initialized successfully.");
    Ok(())
}

async fn read_upload(path: &Path) -> Result<UploadedFile> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let filename = path
        .file_name()
        .and_then(|n| n.to_str())
        .with_context(|| format!("Not a file path: {}", path.display()))?;
    Ok(UploadedFile::new(filename, bytes))
}

async fn read_uploads(paths: &[PathBuf]) -> Result<Vec<UploadedFile>> {
    let mut files = Vec::with_capacity(paths.len());
    for path in paths {
        files.push(read_upload(path).await?);
    }
    Ok(files)
}

pub async fn run_case_create(
    config: &Config,
    docs: &[PathBuf],
    audio: &[PathBuf],
    images: &[PathBuf],
) -> Result<()> {
    let documents = read_uploads(docs).await?;
    let audio = read_uploads(audio).await?;
    let images = read_uploads(images).await?;

    let services = Services::open(config).await?;
    let creation = services
        .lifecycle
        .create_case(documents, audio, images)
        .await?;
    println!("{}", serde_json::to_string_pretty(&creation)?);
    Ok(())
}

pub async fn run_case_list(config: &Config, limit: usize, offset: usize) -> Result<()> {
    let services = Services::open(config).await?;
    let response = services
        .queries
        .dispatch(QueryCapability::ListCases { limit, offset })
        .await?;
    if let QueryResponse::ListCases(listing) = response {
        print_listing(&listing);
    }
    Ok(())
}

fn print_listing(listing: &CaseListing) {
    if listing.cases.is_empty() {
        println!("No cases found.");
        return;
    }
    println!("Available cases ({} shown):", listing.cases.len());
    for case in &listing.cases {
        let types: Vec<&str> = case.file_types.iter().map(|t| t.as_str()).collect();
        println!(
            "- {} (created {}) files: {} [{}], tasks: {}",
            case.id,
            case.created_at.format("%Y-%m-%d %H:%M:%S"),
            case.file_count,
            types.join(", "),
            case.task_count
        );
    }
}

pub async fn run_case_show(config: &Config, case_id: &str) -> Result<()> {
    let services = Services::open(config).await?;
    let response = services
        .queries
        .dispatch(QueryCapability::CaseLookup {
            case_id: case_id.to_string(),
        })
        .await?;
    if let QueryResponse::CaseLookup(details) = response {
        print_details(&details);
    }
    Ok(())
}

fn print_details(details: &CaseDetails) {
    let s = &details.summary;
    println!("Case {}", details.case.id);
    println!("Created: {}", details.case.created_at.to_rfc3339());
    println!(
        "Content: {} documents, {} audio, {} images, {} tasks, {} chunks",
        s.documents, s.audio, s.images, s.tasks, s.total_chunks
    );

    for (file_type, files) in &details.files {
        println!("\n== {} ==", file_type);
        for view in files {
            println!(
                "\n[{}] {} ({}, {} bytes)",
                view.record.id, view.record.original_filename, view.record.mime_type, view.record.size
            );
            println!("{}", view.content);
        }
    }

    for (priority, tasks) in &details.tasks {
        println!("\n== {} priority tasks ==", priority);
        for task in tasks {
            println!("- [{}] {}: {}", task.category.as_str(), task.title, task.description);
        }
    }
}

/// Deletes a case. Returns `false` when any cascade step failed.
pub async fn run_case_delete(config: &Config, case_id: &str) -> Result<bool> {
    let services = Services::open(config).await?;
    let report = services.lifecycle.delete_case(case_id).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(report.success)
}

pub async fn run_query(config: &Config, text: &str, case_id: Option<String>) -> Result<()> {
    let services = Services::open(config).await?;
    let response = services
        .queries
        .dispatch(QueryCapability::Search {
            query: text.to_string(),
            case_id,
        })
        .await?;
    if let QueryResponse::Search(answer) = response {
        print_answer(&answer);
    }
    Ok(())
}

fn print_answer(answer: &QueryAnswer) {
    println!("{}", answer.answer);
    if answer.citations.is_empty() {
        return;
    }
    println!("\nSources:");
    for citation in &answer.citations {
        println!(
            "  {} case={} score={:.3}",
            citation.label, citation.case_id, citation.score
        );
    }
}

pub async fn run_tasks(config: &Config, case_id: Option<String>) -> Result<()> {
    let services = Services::open(config).await?;
    let response = services
        .queries
        .dispatch(QueryCapability::TaskAnalysis { case_id })
        .await?;
    if let QueryResponse::TaskAnalysis(analysis) = response {
        print_analysis(&analysis);
    }
    Ok(())
}

fn print_analysis(analysis: &TaskAnalysis) {
    if analysis.total == 0 {
        println!("No tasks found");
        return;
    }
    println!("Total tasks: {}", analysis.total);
    for (priority, count) in &analysis.by_priority {
        println!("  {}: {}", priority, count);
    }
    println!("By category:");
    for (category, count) in analysis.by_category.iter().filter(|(_, n)| **n > 0) {
        println!("  {}: {}", category, count);
    }
    if !analysis.high_priority.is_empty() {
        println!("\nHigh Priority Tasks:");
        for task in &analysis.high_priority {
            println!("- {}: {}", task.title, task.excerpt);
        }
    }
}

pub async fn run_file_url(config: &Config, file_id: &str, ttl_secs: Option<u64>) -> Result<()> {
    let services = Services::open(config).await?;
    let ttl = ttl_secs.unwrap_or(config.storage.signed_url_ttl_secs);
    let access = services.lifecycle.file_url(file_id, ttl).await?;
    if !access.signed {
        eprintln!("warning: signed URL unavailable; printing the stored URL");
    }
    println!("{}", access.url);
    Ok(())
}

pub async fn run_file_download(config: &Config, file_id: &str, out: Option<PathBuf>) -> Result<()> {
    let services = Services::open(config).await?;
    let (record, bytes) = services.lifecycle.download_file(file_id).await?;
    let out = out.unwrap_or_else(|| PathBuf::from(&record.original_filename));
    tokio::fs::write(&out, &bytes)
        .await
        .with_context(|| format!("Failed to write {}", out.display()))?;
    println!("Wrote {} bytes to {}", bytes.len(), out.display());
    Ok(())
}
