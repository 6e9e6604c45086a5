//! Image-model catalog: fetch, filter, and the startup fallback policy.

use std::collections::HashSet;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, warn};

use easel_core::config::{CatalogFallback, ModelsConfig};

use crate::error::{truncate_body, ApiError, Result};

/// A single entry in the image-model catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelInfo {
    /// Normalized id, e.g. `gemini-2.5-flash-image`.
    pub id: String,
    /// Fully-qualified resource name, e.g. `models/gemini-2.5-flash-image`.
    pub name: String,
    pub display_name: String,
    pub description: String,
    pub methods: Vec<String>,
}

/// Ordered, de-duplicated catalog of image-capable models.
///
/// Loaded once at startup; selection taps are validated against it for the
/// lifetime of the process.
pub struct ModelCatalog {
    models: Vec<ModelInfo>,
}

impl ModelCatalog {
    /// Build a catalog from an ordered model list. Duplicate ids keep their
    /// first occurrence. An empty list is an error: the selection menu would
    /// have nothing to offer.
    pub fn new(models: Vec<ModelInfo>) -> Result<Self> {
        let mut seen = HashSet::new();
        let models: Vec<ModelInfo> = models
            .into_iter()
            .filter(|m| seen.insert(m.id.clone()))
            .collect();
        if models.is_empty() {
            return Err(ApiError::EmptyCatalog);
        }
        Ok(Self { models })
    }

    pub fn all(&self) -> &[ModelInfo] {
        &self.models
    }

    pub fn get(&self, model_id: &str) -> Option<&ModelInfo> {
        self.models.iter().find(|m| m.id == model_id)
    }

    pub fn ids(&self) -> Vec<&str> {
        self.models.iter().map(|m| m.id.as_str()).collect()
    }
}

/// Strip the `models/` prefix Gemini uses in fully-qualified resource names.
pub fn normalize_model_id(value: &str) -> &str {
    let value = value.trim();
    value.strip_prefix("models/").unwrap_or(value)
}

#[derive(Deserialize)]
struct ListModelsResponse {
    #[serde(default)]
    models: Vec<ListedModel>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListedModel {
    #[serde(default)]
    name: String,
    display_name: Option<String>,
    #[serde(default)]
    description: String,
    #[serde(default)]
    supported_generation_methods: Vec<String>,
}

/// Fetch the raw model list from the API.
pub async fn fetch_models(
    http: &reqwest::Client,
    base_url: &str,
    api_key: &str,
) -> Result<Vec<ModelInfo>> {
    let url = format!("{}/models?key={}", base_url.trim_end_matches('/'), api_key);
    let resp = http.get(&url).send().await?;

    let status = resp.status().as_u16();
    if !resp.status().is_success() {
        let text = resp.text().await.unwrap_or_default();
        return Err(ApiError::Api {
            status,
            message: truncate_body(&text, 200),
        });
    }

    let listed: ListModelsResponse = resp
        .json()
        .await
        .map_err(|e| ApiError::Parse(e.to_string()))?;

    Ok(listed
        .models
        .into_iter()
        .map(|m| {
            let id = normalize_model_id(&m.name).to_string();
            let display_name = m.display_name.unwrap_or_else(|| id.clone());
            ModelInfo {
                id,
                name: m.name,
                display_name,
                description: m.description,
                methods: m.supported_generation_methods,
            }
        })
        .collect())
}

/// Keep models that can `generateContent`, match a keyword, and pass the
/// allowlist (when one is configured). Result is sorted by id.
pub fn filter_image_models(
    models: Vec<ModelInfo>,
    keywords: &[String],
    allowlist: &[String],
) -> Vec<ModelInfo> {
    let allowed: HashSet<String> = allowlist
        .iter()
        .filter(|raw| !raw.trim().is_empty())
        .map(|raw| normalize_model_id(raw).to_string())
        .collect();

    let mut filtered: Vec<ModelInfo> = models
        .into_iter()
        .filter(|m| m.methods.iter().any(|method| method == "generateContent"))
        .filter(|m| matches_keywords(m, keywords))
        .filter(|m| allowed.is_empty() || allowed.contains(&m.id))
        .collect();
    filtered.sort_by(|a, b| a.id.cmp(&b.id));
    filtered
}

fn matches_keywords(model: &ModelInfo, keywords: &[String]) -> bool {
    let haystack = format!(
        "{} {} {}",
        model.name, model.display_name, model.description
    )
    .to_lowercase();
    keywords.iter().any(|k| haystack.contains(&k.to_lowercase()))
}

/// Catalog synthesized from the allowlist when the live fetch is down.
/// Entries are assumed generateContent-capable; a bad entry will surface as
/// a generation failure rather than an empty menu.
fn allowlist_catalog(allowlist: &[String]) -> Vec<ModelInfo> {
    allowlist
        .iter()
        .filter(|raw| !raw.trim().is_empty())
        .map(|raw| {
            let id = normalize_model_id(raw).to_string();
            ModelInfo {
                name: format!("models/{id}"),
                display_name: id.clone(),
                description: String::new(),
                methods: vec!["generateContent".to_string()],
                id,
            }
        })
        .collect()
}

/// Fetch and filter the live catalog, honouring the configured fallback
/// policy when the fetch fails.
pub async fn load_catalog(
    base_url: &str,
    api_key: &str,
    timeout: Duration,
    models_cfg: &ModelsConfig,
) -> Result<ModelCatalog> {
    let http = reqwest::Client::builder().timeout(timeout).build()?;

    match fetch_models(&http, base_url, api_key).await {
        Ok(models) => {
            debug!(fetched = models.len(), "model list fetched");
            ModelCatalog::new(filter_image_models(
                models,
                &models_cfg.keywords,
                &models_cfg.allowlist,
            ))
        }
        Err(e) => match models_cfg.catalog_fallback {
            CatalogFallback::Allowlist if !models_cfg.allowlist.is_empty() => {
                warn!(error = %e, "model catalog fetch failed, serving the allowlist");
                ModelCatalog::new(allowlist_catalog(&models_cfg.allowlist))
            }
            _ => Err(e),
        },
    }
}
