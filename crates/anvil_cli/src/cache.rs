//! `anvil cache`: local content cache maintenance.

use anvil_build::setup::open_state_store;
use anvil_cache::{CacheAccess, CacheKey, LocalCache};
use anvil_common::{Fingerprint, Identity};
use anvil_config::load_config;

use crate::{CacheAction, GlobalArgs};

/// Runs an `anvil cache` action.
pub fn run(action: &CacheAction, global: &GlobalArgs) -> Result<i32, Box<dyn std::error::Error>> {
    let config = load_config(&global.project)?;
    let Some(local) = config.cache.local.as_ref().filter(|l| l.enabled) else {
        eprintln!("error: no local cache is enabled in this project");
        return Ok(1);
    };
    let cache = LocalCache::new(global.project.join(&local.path), CacheAccess::READ_WRITE);

    match action {
        CacheAction::Gc { max_version } => {
            let state = open_state_store(&config, &global.project)?;
            let live = live_keys(&state.entries(), *max_version);
            let removed = cache.gc(&live)?;
            tracing::info!(removed, live_records = state.len(), "cache gc finished");
            eprintln!("  Removed {removed} files from {}", cache.root().display());
        }
        CacheAction::Clear => {
            let removed = cache.clear()?;
            eprintln!("  Removed {removed} files from {}", cache.root().display());
        }
        CacheAction::Stats => {
            println!("{} entries in {}", cache.entry_count()?, cache.root().display());
        }
    }
    Ok(0)
}

/// Cache keys of every build-state record, for transform versions up to
/// `max_version`. The state store does not track transform versions.
fn live_keys(entries: &[(Identity, Fingerprint)], max_version: u32) -> Vec<CacheKey> {
    entries
        .iter()
        .flat_map(|(identity, fingerprint)| {
            (0..=max_version).map(move |version| CacheKey::new(*identity, *fingerprint, version))
        })
        .collect()
}
