//! `anvil config check`.

use std::path::Path;

use anvil_config::{load_config, EngineConfig, CONFIG_FILE};

use crate::{ConfigAction, GlobalArgs};

/// Runs an `anvil config` action.
pub fn run(action: &ConfigAction, global: &GlobalArgs) -> Result<i32, Box<dyn std::error::Error>> {
    match action {
        ConfigAction::Check => {
            let config = load_config(&global.project)?;
            let path = global.project.join(CONFIG_FILE);
            if path.exists() {
                eprintln!("  {} is valid", path.display());
            } else {
                eprintln!("  No {CONFIG_FILE} in {}, using defaults", global.project.display());
            }
            for line in summary(&config, &global.project) {
                println!("{line}");
            }
            Ok(0)
        }
    }
}

fn summary(config: &EngineConfig, project: &Path) -> Vec<String> {
    let build = &config.build;
    let mut lines = vec![
        format!("parallelism    {}", build.effective_parallelism()),
        format!("collector      {:?}", build.collector).to_lowercase(),
        format!("configuration  {}", build.configuration),
        format!("force_rebuild  {}", build.force_rebuild),
    ];
    for (key, value) in &build.options {
        lines.push(format!("option         {key} = {value}"));
    }
    lines.push(format!("state          {}", project.join(&config.state.path).display()));
    match config.cache.local.as_ref().filter(|l| l.enabled) {
        Some(local) => lines.push(format!(
            "cache.local    {} ({})",
            project.join(&local.path).display(),
            access(local.read, local.write)
        )),
        None => lines.push("cache.local    disabled".to_string()),
    }
    for remote in &config.cache.remote {
        lines.push(format!(
            "cache.remote   {} ({}, {} ms)",
            remote.address,
            access(remote.read, remote.write),
            remote.timeout_ms
        ));
    }
    lines
}

fn access(read: bool, write: bool) -> &'static str {
    match (read, write) {
        (true, true) => "read-write",
        (true, false) => "read-only",
        (false, true) => "write-only",
        (false, false) => "no access",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anvil_config::load_config_from_str;

    #[test]
    fn summary_lists_tiers_in_order() {
        let config = load_config_from_str(
            r#"
            [build]
            parallelism = 2
            collector = "incremental"

            [build.options]
            platform = "pc"

            [[cache.remote]]
            address = "cache.local:7878"
            "#,
        )
        .unwrap();
        let lines = summary(&config, Path::new("proj"));
        assert!(lines.contains(&"parallelism    2".to_string()));
        assert!(lines.contains(&"collector      incremental".to_string()));
        assert!(lines.contains(&"option         platform = pc".to_string()));
        let local = lines.iter().position(|l| l.starts_with("cache.local")).unwrap();
        let remote = lines.iter().position(|l| l.starts_with("cache.remote")).unwrap();
        assert!(local < remote);
        assert!(lines[remote].contains("read-only"));
    }

    #[test]
    fn check_reports_invalid_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "[build]\nparallelism = 5000\n").unwrap();
        let global = GlobalArgs {
            project: dir.path().to_path_buf(),
        };
        assert!(run(&ConfigAction::Check, &global).is_err());
    }
}
