//! `recollect ingest`: Score a transcript and show where every turn landed.

use recollect_config::EngineConfig;
use recollect_core::SessionId;
use recollect_engine::MemoryEngine;
use std::path::PathBuf;

pub struct IngestArgs {
    pub path: PathBuf,
    pub session: String,
    pub goal: Option<String>,
    pub cycles: u32,
    pub json: bool,
}

pub async fn run(config: EngineConfig, args: IngestArgs) -> Result<(), Box<dyn std::error::Error>> {
    let engine = MemoryEngine::new(config)?;
    let session = SessionId::from(args.session.as_str());
    if let Some(goal) = &args.goal {
        engine.set_session_goal(&session, goal.as_str()).await;
    }

    let submitted = super::load_transcript(&engine, &args.path, &session).await?;
    tracing::info!(blocks = submitted, session_id = %session, "Transcript ingested");

    let mut reports = Vec::new();
    for _ in 0..args.cycles {
        if let Some(report) = engine.force_correction(&session).await {
            reports.push(report);
        }
    }

    let blocks = engine.list_blocks(None, None, None).await?;
    let stats = engine.get_memory_stats().await?;

    if args.json {
        let out = serde_json::json!({
            "blocks": blocks,
            "corrections": reports,
            "memory": stats,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!("Ingested {submitted} turns into session '{session}'");
    println!();
    println!("  {:>4}  {:<6}  {:<4}  {:<8}  {:>5}", "seq", "source", "tier", "status", "score");
    for block in &blocks {
        println!(
            "  {:>4}  {:<6}  {:<4}  {:<8}  {:>5.2}",
            block.sequence_number,
            block.source.to_string(),
            block.tier.to_string(),
            block.status.to_string(),
            block.relevance_score
        );
    }

    for report in &reports {
        println!();
        println!(
            "  Correction {}: examined {}, retained {}, review {}, removed {}, failed {}",
            report.batch_id, report.examined, report.retained, report.reviewed, report.removed, report.failed
        );
    }

    println!();
    println!("  Live blocks:  {}", stats.total_blocks);
    println!("  Live bytes:   {}", stats.total_size_bytes);
    println!("  Compression:  {:.2}x", stats.compression_ratio);
    println!("  Avg score:    {:.2}", stats.avg_relevance_score);
    Ok(())
}
