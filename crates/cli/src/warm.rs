//! Register, construct and tear down every configured entry.

use anyhow::Result;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use kernel_pool::{KernelPool, MemoryHttpClientCache, SlotStatus};
use kernel_pool_common::RegistrationKey;
use kernel_pool_config::{Config, EntryConfig};
use kernel_pool_mistral::{KernelPoolMistralExt, MistralRegistration};

/// Outcome of warming one entry
#[derive(Debug, Clone, Serialize)]
pub struct EntryReport {
    pub key: String,
    pub kind: String,
    pub model_id: String,
    pub status: SlotStatus,
    pub constructions: u64,
    pub elapsed_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Outcome of a whole warm run
#[derive(Debug, Clone, Serialize)]
pub struct WarmReport {
    pub entries: Vec<EntryReport>,
    pub failed: usize,
}

pub fn registration_from_entry(key: &RegistrationKey, entry: &EntryConfig) -> MistralRegistration {
    let mut registration = MistralRegistration::new(
        key.pool().clone(),
        key.key().clone(),
        entry.kind.clone(),
        entry.model_id.clone(),
    )
    .with_limits(entry.limits);
    registration.endpoint = entry.endpoint.clone();
    registration.api_key = entry.credential.credential().cloned();
    registration
}

/// Warm every entry once, then remove them all through the adapter.
///
/// Each construction is cancelled if it runs longer than `timeout`.
pub async fn warm(config: &Config, timeout: Duration) -> Result<WarmReport> {
    let pool: KernelPool = KernelPool::with_config(config.registry.clone());
    let client_cache = Arc::new(MemoryHttpClientCache::new());
    let cancel = CancellationToken::new();

    let mut keys = Vec::new();
    for (key, entry) in config.entries() {
        let registration = registration_from_entry(&key, entry);
        pool.add_mistral(registration, client_cache.clone(), &cancel)
            .await?;
        keys.push(key);
    }
    info!(entries = keys.len(), "Registered configured entries");

    let mut entries = Vec::with_capacity(keys.len());
    for key in &keys {
        let attempt = cancel.child_token();
        let deadline = {
            let attempt = attempt.clone();
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                attempt.cancel();
            })
        };

        let started = Instant::now();
        let result = pool.get(key.pool().clone(), key.key().clone(), &attempt).await;
        deadline.abort();

        let error = match result {
            Ok(_) => {
                debug!(key = %key, "Kernel warmed");
                None
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to warm kernel");
                Some(e.to_string())
            }
        };

        let stats = pool.registry().entry_stats(key);
        entries.push(EntryReport {
            key: key.to_string(),
            kind: stats.as_ref().map(|s| s.kind.clone()).unwrap_or_default(),
            model_id: stats.as_ref().map(|s| s.model_id.clone()).unwrap_or_default(),
            status: stats
                .as_ref()
                .map(|s| s.status)
                .unwrap_or(SlotStatus::Closed),
            constructions: stats.as_ref().map(|s| s.constructions).unwrap_or(0),
            elapsed_ms: started.elapsed().as_millis() as u64,
            error,
        });
    }

    for key in &keys {
        if let Err(e) = pool
            .remove_mistral(
                key.pool().as_str(),
                key.key().as_str(),
                client_cache.as_ref(),
                &cancel,
            )
            .await
        {
            warn!(key = %key, error = %e, "Failed to remove entry");
        }
    }
    pool.registry().shutdown().await;

    let failed = entries.iter().filter(|e| e.error.is_some()).count();
    Ok(WarmReport { entries, failed })
}

/// Render a report as an aligned text table.
pub fn render_table(report: &WarmReport) -> String {
    let width = report
        .entries
        .iter()
        .map(|e| e.key.len())
        .max()
        .unwrap_or(0)
        .max("ENTRY".len());

    let mut out = format!(
        "{:<width$}  {:<10}  {:<13}  {:>8}  MODEL\n",
        "ENTRY",
        "KIND",
        "STATUS",
        "MS",
        width = width
    );
    for entry in &report.entries {
        out.push_str(&format!(
            "{:<width$}  {:<10}  {:<13}  {:>8}  {}",
            entry.key,
            entry.kind,
            entry.status.to_string(),
            entry.elapsed_ms,
            entry.model_id,
            width = width
        ));
        if let Some(error) = &entry.error {
            out.push_str(&format!("  ({})", error));
        }
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"
pool "assistants" {
    mistral "chat" {
        kind "chat"
        model-id "mistral-small-latest"
        api-key "sk-test"
        rate-limit {
            requests-per-minute 10
        }
    }
    mistral "embed" {
        kind "embedding"
        model-id "mistral-embed"
        endpoint "https://eu.api.mistral.ai/v1"
    }
}
"#;

    #[test]
    fn test_registration_from_entry() {
        let config = Config::from_kdl(CONFIG).unwrap();
        let (key, entry) = config.entries().next().unwrap();

        let registration = registration_from_entry(&key, entry);
        assert_eq!(registration.registration_key(), key);
        assert_eq!(registration.model_id, "mistral-small-latest");
        assert_eq!(registration.api_key.unwrap().expose(), "sk-test");
        assert_eq!(registration.limits.per_minute, Some(10));
    }

    #[tokio::test]
    async fn test_warm_constructs_every_entry() {
        let config = Config::from_kdl(CONFIG).unwrap();

        let report = warm(&config, Duration::from_secs(5)).await.unwrap();

        assert_eq!(report.failed, 0);
        assert_eq!(report.entries.len(), 2);
        assert!(report
            .entries
            .iter()
            .all(|e| e.status == SlotStatus::Ready && e.constructions == 1));
        assert_eq!(report.entries[1].kind, "embedding");
    }

    #[test]
    fn test_render_table() {
        let report = WarmReport {
            entries: vec![EntryReport {
                key: "assistants/chat".to_string(),
                kind: "chat".to_string(),
                model_id: "mistral-small-latest".to_string(),
                status: SlotStatus::Failed,
                constructions: 1,
                elapsed_ms: 12,
                error: Some("boom".to_string()),
            }],
            failed: 1,
        };

        let table = render_table(&report);
        assert!(table.starts_with("ENTRY"));
        assert!(table.contains("assistants/chat"));
        assert!(table.contains("failed"));
        assert!(table.contains("(boom)"));
    }
}
