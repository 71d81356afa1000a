//! Batch metadata enrichment for incomplete articles
//!
//! Articles missing an image, location or category are sent to the generator
//! in small concurrent batches with a pause in between. Replies are validated
//! against fixed vocabularies and only non-empty values are written back.

use std::sync::Arc;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::ai::json_parser::parse_json_object;
use crate::ai::prompts::build_enrichment_prompt;
use crate::ai::{GenerationConfig, TextGenerator};
use crate::articles::{Article, ArticleEnrichment, ArticleStore};
use crate::config::EnrichmentConfig;
use crate::error::Result;

pub const VALID_CATEGORIES: &[&str] = &[
    "tecnologia",
    "deportes",
    "politica",
    "economia",
    "salud",
    "entretenimiento",
    "educacion",
    "ciencia",
    "cultura",
    "internacional",
];

pub const VALID_NEWS_TYPES: &[&str] = &[
    "articulo",
    "reportaje",
    "opinion",
    "entrevista",
    "breaking_news",
    "analisis",
];

pub const VALID_LANGUAGES: &[&str] = &["espanol", "ingles", "portugues", "frances", "otro"];

const FALLBACK_CATEGORY: &str = "internacional";
const FALLBACK_NEWS_TYPE: &str = "articulo";
const FALLBACK_LANGUAGE: &str = "espanol";

/// Reply shape requested by the enrichment prompt
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ExtractedMetadata {
    imagen_url: Option<String>,
    pais: Option<String>,
    region: Option<String>,
    ciudad: Option<String>,
    categoria: Option<String>,
    tipo_noticia: Option<String>,
    idioma: Option<String>,
    tags: serde_json::Value,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty() && !v.eq_ignore_ascii_case("null"))
}

fn one_of(value: Option<&str>, allowed: &[&str], fallback: &str) -> String {
    value
        .map(|v| v.trim().to_lowercase())
        .filter(|v| allowed.contains(&v.as_str()))
        .unwrap_or_else(|| fallback.to_string())
}

impl ExtractedMetadata {
    fn validate(self) -> ArticleEnrichment {
        let tags = match self.tags {
            serde_json::Value::Array(items) => items
                .into_iter()
                .filter_map(|t| t.as_str().map(|s| s.trim().to_string()))
                .filter(|t| !t.is_empty())
                .collect(),
            _ => Vec::new(),
        };

        ArticleEnrichment {
            image_url: non_empty(self.imagen_url),
            country: non_empty(self.pais),
            region: non_empty(self.region),
            city: non_empty(self.ciudad),
            category: Some(one_of(
                self.categoria.as_deref(),
                VALID_CATEGORIES,
                FALLBACK_CATEGORY,
            )),
            news_type: Some(one_of(
                self.tipo_noticia.as_deref(),
                VALID_NEWS_TYPES,
                FALLBACK_NEWS_TYPE,
            )),
            language: Some(one_of(self.idioma.as_deref(), VALID_LANGUAGES, FALLBACK_LANGUAGE)),
            tags,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichmentFailure {
    pub article_id: i64,
    pub message: String,
}

/// Totals for one enrichment run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichmentStats {
    pub total: usize,
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub errors: Vec<EnrichmentFailure>,
}

pub struct EnrichmentService {
    articles: Arc<dyn ArticleStore>,
    generator: Arc<dyn TextGenerator>,
    config: EnrichmentConfig,
}

impl EnrichmentService {
    pub fn new(
        articles: Arc<dyn ArticleStore>,
        generator: Arc<dyn TextGenerator>,
        config: EnrichmentConfig,
    ) -> Self {
        Self {
            articles,
            generator,
            config,
        }
    }

    /// Extract and store metadata for one article
    pub async fn enrich_article(&self, article: &Article) -> Result<ArticleEnrichment> {
        let prompt = build_enrichment_prompt(article);
        let reply = self
            .generator
            .generate(&prompt, Some(GenerationConfig::extraction()))
            .await?;

        let enrichment = parse_json_object::<ExtractedMetadata>(&reply)?.validate();
        self.articles.apply_enrichment(article.id, &enrichment)?;
        Ok(enrichment)
    }

    /// Enrich one article by id; `None` when it does not exist
    pub async fn enrich_by_id(&self, article_id: i64) -> Result<Option<ArticleEnrichment>> {
        match self.articles.get(article_id)? {
            Some(article) => Ok(Some(self.enrich_article(&article).await?)),
            None => Ok(None),
        }
    }

    /// Enrich up to `limit` incomplete articles in batches
    pub async fn enrich_incomplete(&self, limit: usize) -> Result<EnrichmentStats> {
        let pending = self.articles.incomplete(limit)?;
        let mut stats = EnrichmentStats {
            total: pending.len(),
            ..Default::default()
        };

        if pending.is_empty() {
            info!("no incomplete articles to enrich");
            return Ok(stats);
        }

        let batch_size = self.config.batch_size.max(1);
        let batches = pending.len().div_ceil(batch_size);
        info!(total = stats.total, batches, batch_size, "starting enrichment");

        for (index, batch) in pending.chunks(batch_size).enumerate() {
            let results = join_all(batch.iter().map(|article| self.enrich_article(article))).await;

            for (article, result) in batch.iter().zip(results) {
                stats.processed += 1;
                match result {
                    Ok(_) => stats.succeeded += 1,
                    Err(e) => {
                        warn!(article_id = article.id, error = %e, "enrichment failed");
                        stats.failed += 1;
                        stats.errors.push(EnrichmentFailure {
                            article_id: article.id,
                            message: e.to_string(),
                        });
                    }
                }
            }

            if index + 1 < batches && !self.config.pause_between_batches.is_zero() {
                tokio::time::sleep(self.config.pause_between_batches).await;
            }
        }

        info!(
            total = stats.total,
            succeeded = stats.succeeded,
            failed = stats.failed,
            "enrichment finished"
        );
        Ok(stats)
    }
}
