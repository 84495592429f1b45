//! `recollect stats`: Run the engine over a transcript and watch the live
//! stats feed.

use recollect_config::EngineConfig;
use recollect_core::SessionId;
use recollect_engine::MemoryEngine;
use std::path::PathBuf;

pub struct StatsArgs {
    pub path: PathBuf,
    pub session: String,
    pub samples: u32,
    pub json: bool,
}

pub async fn run(config: EngineConfig, args: StatsArgs) -> Result<(), Box<dyn std::error::Error>> {
    let engine = MemoryEngine::new(config)?;
    let mut feed = engine.subscribe_stats();
    engine.start().await;

    let session = SessionId::from(args.session.as_str());
    super::load_transcript(&engine, &args.path, &session).await?;

    for _ in 0..args.samples.max(1) {
        let Some(snapshot) = feed.recv().await else {
            break;
        };
        if args.json {
            println!("{}", serde_json::to_string(snapshot.as_ref())?);
            continue;
        }

        println!("📊 {}", snapshot.timestamp.format("%H:%M:%S"));
        println!("  Sessions:     {}", snapshot.active_sessions);
        println!("  Messages:     {} ({:.1}/min)", snapshot.total_messages, snapshot.messages_per_minute);
        println!("  Corrections:  {} ({} removed)", snapshot.total_corrections, snapshot.total_removed);
        println!("  Avg score:    {:.2}", snapshot.avg_relevance_score);
        println!("  Memory:       {:.3} MB", snapshot.memory_usage_mb);
        for (tier, usage) in &snapshot.memory.tier_breakdown {
            println!("    {tier}: {} blocks, {} bytes", usage.blocks, usage.size_bytes);
        }
        if snapshot.degraded_evaluations > 0 {
            println!("  ⚠️  {} degraded evaluations", snapshot.degraded_evaluations);
        }
        println!();
    }

    engine.shutdown().await;
    Ok(())
}
