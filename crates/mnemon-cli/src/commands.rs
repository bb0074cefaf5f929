use anyhow::{anyhow, bail, Context, Result};
use mnemon_config::Settings;
use mnemon_store::{installed_by_fingerprint, PostgresStore};
use serde_json::Value;
use tracing::info;

use crate::output::print_json;

pub async fn migrate() -> Result<()> {
    let settings = Settings::from_env().context("resolve settings")?;
    let store = PostgresStore::connect(&settings.db_url)
        .await
        .context("connect to store")?;
    let version = store.migrate(&installed_by_fingerprint()).await?;
    info!(version, "migrations applied");
    println!("schema at version {version}");
    Ok(())
}

pub async fn rollback(to: i32) -> Result<()> {
    if to < 0 {
        bail!("target version must be >= 0, got {to}");
    }
    let settings = Settings::from_env().context("resolve settings")?;
    let store = PostgresStore::connect(&settings.db_url)
        .await
        .context("connect to store")?;
    let version = store.rollback_to(to).await?;
    println!("schema at version {version}");
    Ok(())
}

// ── Remote inspection commands ────────────────────────────────────────────────

async fn remote_get(
    remote: Option<String>,
    token: Option<String>,
    path: &str,
) -> Result<Value> {
    let remote = remote.ok_or_else(|| anyhow!("--remote (or MNEMON_REMOTE) is required"))?;
    let token = token.ok_or_else(|| anyhow!("--token (or MNEMON_TOKEN) is required"))?;

    let url = format!("{}{}", remote.trim_end_matches('/'), path);
    let response = reqwest::Client::new()
        .get(&url)
        .bearer_auth(token)
        .send()
        .await
        .with_context(|| format!("GET {url}"))?;
    if !response.status().is_success() {
        bail!("GET {url} returned {}", response.status());
    }
    Ok(response.json().await?)
}

pub async fn status(remote: Option<String>, token: Option<String>) -> Result<()> {
    let value = remote_get(remote, token, "/status").await?;
    print_json(&value);
    Ok(())
}

pub async fn patterns(
    status: Option<String>,
    limit: u32,
    remote: Option<String>,
    token: Option<String>,
) -> Result<()> {
    let mut path = format!("/patterns?limit={limit}");
    if let Some(status) = status {
        path.push_str(&format!("&status={status}"));
    }
    let value = remote_get(remote, token, &path).await?;
    print_json(&value);
    Ok(())
}

pub async fn fsm(
    kind: String,
    entity: String,
    remote: Option<String>,
    token: Option<String>,
) -> Result<()> {
    let value = remote_get(remote, token, &format!("/fsm/{kind}/{entity}")).await?;
    print_json(&value);
    Ok(())
}

pub async fn quarantine(remote: Option<String>, token: Option<String>) -> Result<()> {
    let value = remote_get(remote, token, "/quarantine").await?;
    print_json(&value);
    Ok(())
}
