use std::time::Duration;

use anyhow::Context;

use crate::reconciler::ReconcilePolicy;

const DEFAULT_BASE_URL: &str = "https://api.dirview.example";
const DEFAULT_CLIENT_ID: &str = "dirview-cli";
const DEFAULT_PAGE_SIZE: u64 = 30;
const DEFAULT_RECONCILE_BASE_MS: u64 = 1000;
const DEFAULT_RECONCILE_CAP_FACTOR: u64 = 4;
const DEFAULT_RECONCILE_BATCH: u64 = 5;
const DEFAULT_RECONCILE_JITTER: bool = false;
const DEFAULT_LOG_LEVEL: &str = "info";

#[derive(Clone, Debug)]
pub struct ViewConfig {
    pub base_url: String,
    pub auth_url: Option<String>,
    pub client_id: String,
    pub token: String,
    pub refresh_token: Option<String>,
    pub page_size: u32,
    pub reconcile: ReconcilePolicy,
    pub log_level: String,
}

impl ViewConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let read = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());
        let read_u64 = |name: &str, default: u64| {
            read(name)
                .and_then(|value| value.trim().parse::<u64>().ok())
                .filter(|value| *value > 0)
                .unwrap_or(default)
        };
        let read_bool = |name: &str, default: bool| {
            read(name)
                .map(|value| {
                    matches!(
                        value.trim().to_ascii_lowercase().as_str(),
                        "1" | "true" | "yes" | "on"
                    )
                })
                .unwrap_or(default)
        };

        let token = read("DIRVIEW_TOKEN").context("DIRVIEW_TOKEN is not set")?;
        let base_url = read("DIRVIEW_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let page_size = u32::try_from(read_u64("DIRVIEW_PAGE_SIZE", DEFAULT_PAGE_SIZE))
            .context("DIRVIEW_PAGE_SIZE is out of range")?;
        let base_delay = Duration::from_millis(read_u64(
            "DIRVIEW_RECONCILE_BASE_MS",
            DEFAULT_RECONCILE_BASE_MS,
        ));
        let cap_factor = u32::try_from(read_u64(
            "DIRVIEW_RECONCILE_CAP_FACTOR",
            DEFAULT_RECONCILE_CAP_FACTOR,
        ))
        .context("DIRVIEW_RECONCILE_CAP_FACTOR is out of range")?;
        let batch = usize::try_from(read_u64("DIRVIEW_RECONCILE_BATCH", DEFAULT_RECONCILE_BATCH))
            .context("DIRVIEW_RECONCILE_BATCH is out of range")?;

        Ok(Self {
            base_url,
            auth_url: read("DIRVIEW_AUTH_URL"),
            client_id: read("DIRVIEW_CLIENT_ID").unwrap_or_else(|| DEFAULT_CLIENT_ID.to_string()),
            token,
            refresh_token: read("DIRVIEW_REFRESH_TOKEN"),
            page_size,
            reconcile: ReconcilePolicy::with_base(base_delay, cap_factor, batch)
                .with_jitter(read_bool("DIRVIEW_RECONCILE_JITTER", DEFAULT_RECONCILE_JITTER)),
            log_level: read("DIRVIEW_LOG").unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string()),
        })
    }
}
