use chrono::{DateTime, Utc};
use tracing::info;

use crate::error::StoreError;
use crate::migrations::EXPECTED_SCHEMA_VERSION;
use crate::store::MetaStore;

/// The fingerprint recorded in `db_metadata.installed_by` by this binary's
/// migration runner.
pub fn installed_by_fingerprint() -> String {
    format!("mnemon/{}", env!("CARGO_PKG_VERSION"))
}

fn fingerprint_is_valid(installed_by: &str) -> bool {
    match installed_by.strip_prefix("mnemon/") {
        Some(version) => !version.is_empty() && version.chars().all(|c| c.is_ascii_graphic()),
        None => false,
    }
}

/// Startup handshake against the metadata singleton.
///
/// The service refuses to start — rather than risk silent corruption — when
/// the recorded schema version differs from what the binary expects, or the
/// installed-by fingerprint was not written by a mnemon migration runner.
/// On success the handshake timestamp is recorded.
pub async fn boot_handshake(
    store: &dyn MetaStore,
    now: DateTime<Utc>,
) -> Result<(), StoreError> {
    let metadata = store.get_metadata().await?.ok_or(StoreError::MetadataMissing)?;

    if metadata.schema_version != EXPECTED_SCHEMA_VERSION {
        return Err(StoreError::SchemaMismatch {
            found: metadata.schema_version,
            expected: EXPECTED_SCHEMA_VERSION,
        });
    }
    if !fingerprint_is_valid(&metadata.installed_by) {
        return Err(StoreError::BadFingerprint { found: metadata.installed_by });
    }

    store.record_handshake(now).await?;
    info!(
        schema_version = metadata.schema_version,
        installed_by = %metadata.installed_by,
        "boot handshake complete"
    );
    Ok(())
}
