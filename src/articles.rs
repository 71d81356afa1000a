//! Articles as held by the backend
//!
//! The portal only needs a narrow slice of the backend: fetch an article,
//! look articles up for the news assistant, list the ones with missing
//! metadata, and write enrichment results back.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Params, Row};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::db::Database;
use crate::error::Result;

/// A news article
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Article {
    pub id: i64,
    pub title: String,
    pub body: String,
    pub category: Option<String>,
    pub country: Option<String>,
    pub region: Option<String>,
    pub city: Option<String>,
    pub news_type: Option<String>,
    pub language: Option<String>,
    pub source_name: String,
    pub source_url: String,
    pub image_url: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub published_at: Option<DateTime<Utc>>,
}

impl Article {
    /// Article with only an id and title set
    pub fn new(id: i64, title: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
            body: String::new(),
            category: None,
            country: None,
            region: None,
            city: None,
            news_type: None,
            language: None,
            source_name: String::new(),
            source_url: String::new(),
            image_url: None,
            tags: Vec::new(),
            published_at: None,
        }
    }

    /// Missing image, location or category
    pub fn is_incomplete(&self) -> bool {
        self.image_url.is_none()
            || self.country.is_none()
            || self.region.is_none()
            || self.city.is_none()
            || self.category.is_none()
    }
}

/// Metadata extracted for an article; `None` and empty tags leave the stored value alone
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArticleEnrichment {
    pub image_url: Option<String>,
    pub country: Option<String>,
    pub region: Option<String>,
    pub city: Option<String>,
    pub category: Option<String>,
    pub news_type: Option<String>,
    pub language: Option<String>,
    pub tags: Vec<String>,
}

impl ArticleEnrichment {
    pub fn is_empty(&self) -> bool {
        self.image_url.is_none()
            && self.country.is_none()
            && self.region.is_none()
            && self.city.is_none()
            && self.category.is_none()
            && self.news_type.is_none()
            && self.language.is_none()
            && self.tags.is_empty()
    }
}

/// Backend article collaborator
pub trait ArticleStore: Send + Sync {
    fn get(&self, id: i64) -> Result<Option<Article>>;

    fn upsert(&self, article: &Article) -> Result<()>;

    /// Newest published first
    fn recent(&self, limit: usize) -> Result<Vec<Article>>;

    /// Exact category match ignoring ASCII case, newest first
    fn by_category(&self, category: &str, limit: usize) -> Result<Vec<Article>>;

    /// Exact country match ignoring ASCII case, newest first
    fn by_country(&self, country: &str, limit: usize) -> Result<Vec<Article>>;

    /// Title or body containing `term` ignoring ASCII case, newest first
    fn search(&self, term: &str, limit: usize) -> Result<Vec<Article>>;

    /// Articles missing image, country, region, city or category, oldest id first
    fn incomplete(&self, limit: usize) -> Result<Vec<Article>>;

    /// Write the non-empty fields of `enrichment`; false when the article does not exist
    fn apply_enrichment(&self, id: i64, enrichment: &ArticleEnrichment) -> Result<bool>;
}

/// Articles table in the portal database
pub struct SqliteArticleStore {
    db: Arc<Database>,
}

impl SqliteArticleStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    fn newest_where<P: Params>(&self, filter: &str, params: P) -> Result<Vec<Article>> {
        let conn = self.db.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM articles WHERE {}
             ORDER BY published_at IS NULL, published_at DESC, id DESC
             LIMIT ?1",
            ARTICLE_COLUMNS, filter
        ))?;
        let rows = stmt.query_map(params, article_from_row)?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }
}

const ARTICLE_COLUMNS: &str = "id, title, body, category, country, region, city, news_type, \
     language, source_name, source_url, image_url, tags, published_at";

fn article_from_row(row: &Row<'_>) -> rusqlite::Result<Article> {
    let tags: String = row.get(12)?;
    let published_at: Option<String> = row.get(13)?;

    Ok(Article {
        id: row.get(0)?,
        title: row.get(1)?,
        body: row.get(2)?,
        category: row.get(3)?,
        country: row.get(4)?,
        region: row.get(5)?,
        city: row.get(6)?,
        news_type: row.get(7)?,
        language: row.get(8)?,
        source_name: row.get(9)?,
        source_url: row.get(10)?,
        image_url: row.get(11)?,
        // Malformed rows degrade to empty values
        tags: serde_json::from_str(&tags).unwrap_or_default(),
        published_at: published_at
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|dt| dt.with_timezone(&Utc)),
    })
}

impl ArticleStore for SqliteArticleStore {
    fn get(&self, id: i64) -> Result<Option<Article>> {
        let conn = self.db.conn();
        let article = conn
            .query_row(
                &format!("SELECT {} FROM articles WHERE id = ?1", ARTICLE_COLUMNS),
                params![id],
                article_from_row,
            )
            .optional()?;
        Ok(article)
    }

    fn upsert(&self, article: &Article) -> Result<()> {
        let tags = serde_json::to_string(&article.tags)?;
        let conn = self.db.conn();
        conn.execute(
            r#"
            INSERT INTO articles (id, title, body, category, country, region, city, news_type,
                                  language, source_name, source_url, image_url, tags,
                                  published_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
            ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                body = excluded.body,
                category = excluded.category,
                country = excluded.country,
                region = excluded.region,
                city = excluded.city,
                news_type = excluded.news_type,
                language = excluded.language,
                source_name = excluded.source_name,
                source_url = excluded.source_url,
                image_url = excluded.image_url,
                tags = excluded.tags,
                published_at = excluded.published_at,
                updated_at = excluded.updated_at
            "#,
            params![
                article.id,
                article.title,
                article.body,
                article.category,
                article.country,
                article.region,
                article.city,
                article.news_type,
                article.language,
                article.source_name,
                article.source_url,
                article.image_url,
                tags,
                article.published_at.map(|dt| dt.to_rfc3339()),
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn recent(&self, limit: usize) -> Result<Vec<Article>> {
        self.newest_where("1 = 1", params![limit as i64])
    }

    fn by_category(&self, category: &str, limit: usize) -> Result<Vec<Article>> {
        self.newest_where("lower(category) = lower(?2)", params![limit as i64, category])
    }

    fn by_country(&self, country: &str, limit: usize) -> Result<Vec<Article>> {
        self.newest_where("lower(country) = lower(?2)", params![limit as i64, country])
    }

    fn search(&self, term: &str, limit: usize) -> Result<Vec<Article>> {
        self.newest_where(
            "instr(lower(title), lower(?2)) > 0 OR instr(lower(body), lower(?2)) > 0",
            params![limit as i64, term],
        )
    }

    fn incomplete(&self, limit: usize) -> Result<Vec<Article>> {
        let conn = self.db.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM articles
             WHERE image_url IS NULL OR country IS NULL OR region IS NULL
                OR city IS NULL OR category IS NULL
             ORDER BY id ASC
             LIMIT ?1",
            ARTICLE_COLUMNS
        ))?;

        let rows = stmt.query_map(params![limit as i64], article_from_row)?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    fn apply_enrichment(&self, id: i64, enrichment: &ArticleEnrichment) -> Result<bool> {
        let tags = if enrichment.tags.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&enrichment.tags)?)
        };

        let conn = self.db.conn();
        let updated = conn.execute(
            r#"
            UPDATE articles SET
                image_url = COALESCE(?2, image_url),
                country = COALESCE(?3, country),
                region = COALESCE(?4, region),
                city = COALESCE(?5, city),
                category = COALESCE(?6, category),
                news_type = COALESCE(?7, news_type),
                language = COALESCE(?8, language),
                tags = COALESCE(?9, tags),
                updated_at = ?10
            WHERE id = ?1
            "#,
            params![
                id,
                enrichment.image_url,
                enrichment.country,
                enrichment.region,
                enrichment.city,
                enrichment.category,
                enrichment.news_type,
                enrichment.language,
                tags,
                Utc::now().to_rfc3339(),
            ],
        )?;

        debug!(article_id = id, updated, "applied enrichment");
        Ok(updated > 0)
    }
}
