use anyhow::{bail, Context, Result};
use bim_core::{CodeState, DgnCode, DgnLock};
use bim_storage::{Holder, LocalResourceStore, LOCAL_PROFILE_VERSION};
use serde::Serialize;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CachedCode {
    #[serde(flatten)]
    pub code: DgnCode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<CodeState>,
}

/// Opens an existing local file. Never creates one.
pub fn open_local(path: &Path) -> Result<LocalResourceStore> {
    if !path.is_file() {
        bail!("No local resource file at {}", path.display());
    }
    LocalResourceStore::open_read_only(path)
        .with_context(|| format!("Failed to open {}", path.display()))
}

fn holder(unavailable: bool) -> Holder {
    if unavailable {
        Holder::Unavailable
    } else {
        Holder::Owned
    }
}

pub fn locks(store: &LocalResourceStore, unavailable: bool) -> Result<Vec<DgnLock>> {
    store
        .locks(holder(unavailable))
        .context("Failed to read cached locks")
}

pub fn codes(store: &LocalResourceStore, unavailable: bool) -> Result<Vec<CachedCode>> {
    if unavailable {
        let infos = store
            .unavailable_codes()
            .context("Failed to read unavailable codes")?;
        return Ok(infos
            .into_iter()
            .map(|info| CachedCode {
                code: info.code,
                state: Some(info.state),
            })
            .collect());
    }
    let codes = store.codes().context("Failed to read owned codes")?;
    Ok(codes
        .into_iter()
        .map(|code| CachedCode { code, state: None })
        .collect())
}

pub fn lock_lines(locks: &[DgnLock]) -> Vec<String> {
    locks
        .iter()
        .map(|lock| format!("{:<9} {}", lock.level.as_str(), lock.id))
        .collect()
}

pub fn code_lines(codes: &[CachedCode]) -> Vec<String> {
    codes
        .iter()
        .map(|cached| match cached.state {
            Some(CodeState::Reserved(owner)) => format!("{} (reserved by {owner})", cached.code),
            Some(state) => format!("{} ({})", cached.code, state.as_str()),
            None => cached.code.to_string(),
        })
        .collect()
}

pub fn stamp_lines(store: &LocalResourceStore) -> Result<Vec<String>> {
    let mut lines = vec![format!(
        "schema version: {}",
        store.schema_version().context("Failed to read schema version")?
    )];
    match store.read_stamp().context("Failed to read stamp")? {
        Some(stamp) => {
            let current = if stamp.profile_version == LOCAL_PROFILE_VERSION {
                "current"
            } else {
                "stale"
            };
            lines.push(format!(
                "profile version: {} ({current})",
                stamp.profile_version
            ));
            lines.push(format!(
                "db created: {}",
                stamp.db_creation_date.to_rfc3339()
            ));
        }
        None => lines.push("not stamped; the file will be rebuilt on next open".to_string()),
    }
    Ok(lines)
}
