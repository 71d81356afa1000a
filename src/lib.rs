pub mod ai;
pub mod articles;
pub mod billing;
pub mod chat;
pub mod config;
pub mod db;
pub mod enrichment;
pub mod error;
pub mod library;
pub mod summary;

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use ai::{GeminiClient, TextGenerator};
use articles::{ArticleStore, SqliteArticleStore};
use billing::{BillingState, DayClock, LocalClock};
use chat::ChatService;
use config::PortalConfig;
use db::Database;
use enrichment::EnrichmentService;
use library::{
    FavoritesService, HistoryService, LocalLibrary, SqliteFavoritesStore, SqliteHistoryStore,
};
use summary::{SqliteSummaryStore, SummaryCache, SummaryService};

pub use error::{PortalError, Result};

/// Install the global tracing subscriber.
///
/// Reads `RUST_LOG`; defaults to warn for dependencies and info for this crate.
/// Use `RUST_LOG=news_portal=debug` for per-operation logs.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn,news_portal=info")),
        )
        .try_init();
}

/// Every portal service, wired over one database
pub struct PortalState {
    pub config: PortalConfig,
    pub db: Arc<Database>,
    pub billing: BillingState,
    pub articles: Arc<dyn ArticleStore>,
    pub summaries: Arc<SummaryService>,
    pub favorites: FavoritesService,
    pub history: HistoryService,
    pub guest_library: LocalLibrary,
    pub enrichment: EnrichmentService,
    generator: Arc<dyn TextGenerator>,
}

impl PortalState {
    /// Open the database in the configured data dir and talk to Gemini
    pub fn open(config: PortalConfig) -> Result<Self> {
        let db = Arc::new(Database::open(config.database_path())?);
        let generator: Arc<dyn TextGenerator> = Arc::new(GeminiClient::new(&config.gemini));
        Self::with_parts(config, db, Arc::new(LocalClock), generator)
    }

    /// Wire the services over explicit collaborators
    pub fn with_parts(
        config: PortalConfig,
        db: Arc<Database>,
        clock: Arc<dyn DayClock>,
        generator: Arc<dyn TextGenerator>,
    ) -> Result<Self> {
        let billing = BillingState::new(db.clone(), clock, config.plan_cache_ttl);
        let evaluator = billing.evaluator.clone();

        let articles: Arc<dyn ArticleStore> = Arc::new(SqliteArticleStore::new(db.clone()));
        let summary_cache = Arc::new(SummaryCache::new(Arc::new(SqliteSummaryStore::new(
            db.clone(),
        ))));
        let summaries = Arc::new(SummaryService::new(
            summary_cache,
            evaluator.clone(),
            generator.clone(),
        ));
        let favorites = FavoritesService::new(
            Arc::new(SqliteFavoritesStore::new(db.clone())),
            evaluator.clone(),
        );
        let history = HistoryService::new(
            Arc::new(SqliteHistoryStore::new(db.clone())),
            evaluator.clone(),
        );
        let guest_library = LocalLibrary::open(config.guest_library_path(), evaluator)?;
        let enrichment =
            EnrichmentService::new(articles.clone(), generator.clone(), config.enrichment);

        info!(data_dir = %config.data_dir.display(), "portal state ready");

        Ok(Self {
            config,
            db,
            billing,
            articles,
            summaries,
            favorites,
            history,
            guest_library,
            enrichment,
            generator,
        })
    }

    /// A fresh news-assistant conversation
    pub fn chat_session(&self) -> ChatService {
        ChatService::new(self.articles.clone(), self.generator.clone())
    }
}
