use std::sync::Arc;

use crate::chat::ConversationOrchestrator;
use crate::context::ContextAssembler;
use crate::core::config::validation::validate_config;
use crate::core::config::{AppPaths, AppSettings, ConfigService, EmbeddingProviderKind};
use crate::core::db;
use crate::documents::{DocumentService, DocumentStore};
use crate::history::HistoryStore;
use crate::llm::{CompletionClient, OpenAiCompatibleProvider, OpenAiEmbedder};
use crate::rag::{ContextStore, Embedder, HashingEmbedder, SqliteContextStore, TextSplitter};
use crate::tools::{ConfiguredSearchClient, WebSearchClient};

pub mod error;

use error::InitializationError;

const DB_MAX_CONNECTIONS: u32 = 5;

/// External collaborators the application talks to over the network.
#[derive(Clone)]
pub struct ExternalServices {
    pub llm: Arc<dyn CompletionClient>,
    pub embedder: Arc<dyn Embedder>,
    pub search: Arc<dyn WebSearchClient>,
}

impl ExternalServices {
    /// Builds the configured providers.
    pub fn from_settings(settings: &AppSettings) -> Result<Self, InitializationError> {
        let llm = OpenAiCompatibleProvider::new(&settings.llm)
            .map_err(|e| InitializationError::Llm(e.into()))?;
        let search = ConfiguredSearchClient::new(settings.search.clone())
            .map_err(|e| InitializationError::Search(e.into()))?;
        let embedder: Arc<dyn Embedder> = match settings.embedding.provider {
            EmbeddingProviderKind::Hashing => {
                Arc::new(HashingEmbedder::new(settings.embedding.dimensions))
            }
            EmbeddingProviderKind::OpenAiCompatible => {
                Arc::new(OpenAiEmbedder::new(&settings.embedding))
            }
        };

        Ok(Self {
            llm: Arc::new(llm),
            embedder,
            search: Arc::new(search),
        })
    }
}

/// Global application state shared across all routes.
///
/// Every service is constructed once here and handed to its dependents.
#[derive(Clone)]
pub struct AppState {
    pub paths: Arc<AppPaths>,
    pub settings: AppSettings,
    pub history: HistoryStore,
    pub documents: DocumentService,
    pub orchestrator: ConversationOrchestrator,
}

impl AppState {
    /// Initializes the application state.
    ///
    /// This process includes:
    /// 1. Loading and validating configuration
    /// 2. Building the LLM, embedding and web search providers
    /// 3. Opening the main and RAG databases
    pub async fn initialize(paths: Arc<AppPaths>) -> Result<Arc<Self>, InitializationError> {
        let config = ConfigService::new(paths.clone());
        let raw = config
            .load_config()
            .map_err(|e| InitializationError::Config(e.into()))?;
        validate_config(&raw).map_err(|e| InitializationError::Config(e.into()))?;
        tracing::debug!(
            "Loaded configuration from {}: {}",
            config.config_path().display(),
            config.redact_sensitive_values(&raw)
        );

        let settings = AppSettings::from_config(&raw);
        tracing::info!(
            "LLM provider {:?} ({}), search provider {:?}",
            settings.llm.provider,
            settings.llm.model,
            settings.search.provider
        );
        if settings.llm.api_key.is_none() {
            tracing::warn!("No LLM API key configured; completions will likely fail");
        }

        let services = ExternalServices::from_settings(&settings)?;
        Self::with_services(paths, settings, services).await
    }

    /// Opens storage under `paths` and wires it to the given providers.
    pub async fn with_services(
        paths: Arc<AppPaths>,
        settings: AppSettings,
        services: ExternalServices,
    ) -> Result<Arc<Self>, InitializationError> {
        let main_pool = db::connect(&paths.db_path, DB_MAX_CONNECTIONS)
            .await
            .map_err(|e| InitializationError::Database(e.into()))?;
        let rag_pool = db::connect(&paths.rag_db_path, DB_MAX_CONNECTIONS)
            .await
            .map_err(|e| InitializationError::Database(e.into()))?;

        let history = HistoryStore::new(main_pool.clone(), settings.chat.default_thread_title.clone())
            .await
            .map_err(|e| InitializationError::History(e.into()))?;
        let document_store = DocumentStore::new(main_pool)
            .await
            .map_err(|e| InitializationError::History(e.into()))?;

        let context_store: Arc<dyn ContextStore> = Arc::new(
            SqliteContextStore::new(rag_pool, services.embedder)
                .await
                .map_err(|e| InitializationError::Rag(e.into()))?,
        );

        let assembler = ContextAssembler::new(
            context_store.clone(),
            services.search,
            settings.rag.top_k,
            settings.search.max_results,
        );
        let orchestrator = ConversationOrchestrator::new(
            history.clone(),
            assembler,
            services.llm,
            settings.chat.clone(),
        );
        let documents = DocumentService::new(
            document_store,
            context_store,
            TextSplitter::new(settings.rag.chunk_size, settings.rag.chunk_overlap),
            paths.upload_dir.clone(),
        );

        Ok(Arc::new(AppState {
            paths,
            settings,
            history,
            documents,
            orchestrator,
        }))
    }
}
