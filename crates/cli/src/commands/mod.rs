pub mod config_cmd;
pub mod ingest;
pub mod stats;

use recollect_core::SessionId;
use recollect_engine::MemoryEngine;
use std::path::Path;

use crate::transcript;

/// Read a transcript from `path` (`-` for stdin) and submit every turn.
/// Turns without their own session go to `default_session`.
pub(crate) async fn load_transcript(
    engine: &MemoryEngine,
    path: &Path,
    default_session: &SessionId,
) -> Result<usize, Box<dyn std::error::Error>> {
    let input = if path == Path::new("-") {
        std::io::read_to_string(std::io::stdin())?
    } else {
        std::fs::read_to_string(path).map_err(|e| format!("Failed to read {}: {e}", path.display()))?
    };

    let turns = transcript::parse(&input)?;
    for turn in &turns {
        let session = turn
            .session_id
            .as_deref()
            .map(SessionId::from)
            .unwrap_or_else(|| default_session.clone());
        engine.submit_block(session, turn.content.clone(), turn.source).await?;
    }
    Ok(turns.len())
}
