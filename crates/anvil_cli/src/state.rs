//! `anvil state`: build-state inspection and editing.

use anvil_build::setup::open_state_store;
use anvil_cache::BuildStateStore;
use anvil_common::{Fingerprint, Identity};
use anvil_config::load_config;
use serde::Serialize;

use crate::{parse_identity, GlobalArgs, StateAction};

/// One build-state record as printed by `anvil state show --json`.
#[derive(Debug, Serialize)]
struct StateRow {
    identity: String,
    fingerprint: String,
}

/// Runs an `anvil state` action.
pub fn run(action: &StateAction, global: &GlobalArgs) -> Result<i32, Box<dyn std::error::Error>> {
    let config = load_config(&global.project)?;
    let store = open_state_store(&config, &global.project)?;

    match action {
        StateAction::Show { json } => {
            let entries = store.entries();
            if *json {
                println!("{}", render_json(&entries)?);
            } else {
                print!("{}", render_text(&entries));
                eprintln!("  {} records", entries.len());
            }
            Ok(0)
        }
        StateAction::Forget { identities } => {
            let identities: Vec<Identity> = identities.iter().map(|s| parse_identity(s)).collect();
            let forgotten = forget(&store, &identities)?;
            eprintln!("  Forgot {forgotten} of {} records", identities.len());
            Ok(0)
        }
    }
}

fn render_text(entries: &[(Identity, Fingerprint)]) -> String {
    entries
        .iter()
        .map(|(identity, fingerprint)| format!("{identity}  {fingerprint}\n"))
        .collect()
}

fn render_json(entries: &[(Identity, Fingerprint)]) -> Result<String, serde_json::Error> {
    let rows: Vec<StateRow> = entries
        .iter()
        .map(|(identity, fingerprint)| StateRow {
            identity: identity.to_string(),
            fingerprint: fingerprint.to_string(),
        })
        .collect();
    serde_json::to_string_pretty(&rows)
}

/// Removes `identities` in one transaction. Returns how many were present.
fn forget(
    store: &BuildStateStore,
    identities: &[Identity],
) -> Result<usize, anvil_cache::CacheError> {
    store.begin_transaction()?;
    let mut present = 0;
    for identity in identities {
        if store.get(identity).is_some() {
            present += 1;
        }
        if let Err(e) = store.remove(*identity) {
            store.abort_transaction();
            return Err(e);
        }
    }
    store.end_transaction()?;
    Ok(present)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anvil_common::FingerprintBuilder;

    fn fp(n: u64) -> Fingerprint {
        FingerprintBuilder::new("test").push_u64(n).finish()
    }

    #[test]
    fn json_lists_every_record() {
        let entries = vec![(Identity::from_name("a"), fp(1)), (Identity::from_name("b"), fp(2))];
        let json: serde_json::Value =
            serde_json::from_str(&render_json(&entries).unwrap()).unwrap();
        let rows = json.as_array().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["identity"], Identity::from_name("a").to_string());
        assert_eq!(rows[1]["fingerprint"], fp(2).to_string());
    }

    #[test]
    fn text_has_one_line_per_record() {
        let entries = vec![(Identity::from_name("a"), fp(1))];
        let text = render_text(&entries);
        assert_eq!(text.lines().count(), 1);
        assert!(text.starts_with(&Identity::from_name("a").to_string()));
    }

    #[test]
    fn forget_persists_removal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.bin");
        let store = BuildStateStore::open(&path).unwrap();
        store.put(Identity::from_name("a"), fp(1)).unwrap();
        store.put(Identity::from_name("b"), fp(2)).unwrap();

        let removed = forget(
            &store,
            &[Identity::from_name("a"), Identity::from_name("ghost")],
        )
        .unwrap();
        assert_eq!(removed, 1);

        let reopened = BuildStateStore::open(&path).unwrap();
        assert_eq!(reopened.entries(), vec![(Identity::from_name("b"), fp(2))]);
    }
}
