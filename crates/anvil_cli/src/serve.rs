//! `anvil serve`: shares a local cache directory over TCP.

use std::sync::Arc;

use anvil_cache::{CacheAccess, CacheServer, LocalCache};
use anvil_config::load_config;

use crate::{GlobalArgs, ServeArgs};

/// Runs the cache server until the process is killed.
pub fn run(args: &ServeArgs, global: &GlobalArgs) -> Result<i32, Box<dyn std::error::Error>> {
    let root = match &args.root {
        Some(root) => root.clone(),
        None => {
            let config = load_config(&global.project)?;
            let local = config.cache.local.unwrap_or_default();
            global.project.join(local.path)
        }
    };
    let access = if args.read_only {
        CacheAccess::READ_ONLY
    } else {
        CacheAccess::READ_WRITE
    };

    let backing = Arc::new(LocalCache::new(&root, access));
    let server = CacheServer::bind(args.bind.as_str(), backing)?.with_workers(args.workers);
    eprintln!(
        "  Serving {} on {} with {} workers{}",
        root.display(),
        server.local_addr()?,
        args.workers,
        if args.read_only { " (read-only)" } else { "" }
    );
    server.serve()?;
    Ok(0)
}
