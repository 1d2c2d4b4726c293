use redis::{AsyncCommands, Script};
use tracing::{debug, info};

use crate::errors::{RateLimitError, Result};

/// The four atomic routines, defined once at client startup and invoked by
/// SHA thereafter.
pub struct Scripts {
    pub take: Script,
    pub take_elevated: Script,
    pub put: Script,
    pub status: Script,
}

impl Scripts {
    pub fn new() -> Self {
        Self {
            take: Script::new(include_str!("../../scripts/take.lua")),
            take_elevated: Script::new(include_str!("../../scripts/take_elevated.lua")),
            put: Script::new(include_str!("../../scripts/put.lua")),
            status: Script::new(include_str!("../../scripts/status.lua")),
        }
    }
}

impl Default for Scripts {
    fn default() -> Self {
        Self::new()
    }
}

/// Register every routine with the server so later invocations hit the
/// script cache.
pub async fn load_scripts<C: AsyncCommands>(conn: &mut C, scripts: &Scripts) -> Result<()> {
    debug!("Loading Lua scripts into Redis...");

    for (name, script) in [
        ("take", &scripts.take),
        ("take_elevated", &scripts.take_elevated),
        ("put", &scripts.put),
        ("status", &scripts.status),
    ] {
        let sha = script
            .prepare_invoke()
            .load_async(conn)
            .await
            .map_err(|e| {
                RateLimitError::ScriptExecution(format!("Failed to load '{}' script: {}", name, e))
            })?;

        debug!("Loaded '{}' script (SHA: {})", name, sha);
    }

    info!("Lua scripts loaded successfully");
    Ok(())
}
