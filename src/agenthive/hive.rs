//! The root engine handle.
//!
//! [`Hive`] assembles every subsystem — store, gateway, tool registry,
//! protection, chat engine, router, agent pool, scheduler, roundtable — out
//! of one [`EngineConfig`] and threads them together explicitly.  There are
//! no hidden globals beyond the read-only model catalogue and the shared
//! HTTP pool, so tests build a fresh `Hive` per test and nothing leaks
//! between them.
//!
//! # Example
//!
//! ```rust,no_run
//! use agenthive::{EngineConfig, Hive};
//! use agenthive::store::NewSession;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     agenthive::init_logger();
//!
//!     let hive = Hive::open(EngineConfig::from_env())?;
//!     hive.scheduler().start()?;
//!
//!     let session = hive.chat().create_session(NewSession::default())?;
//!     let reply = hive
//!         .chat()
//!         .send_message(&session.id, "Hello!", Default::default())
//!         .await?;
//!     println!("{}", reply.content);
//!     Ok(())
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;

use crate::agenthive::client::LlmClient;
use crate::agenthive::clients::openai_compat::OpenAiCompatClient;
use crate::agenthive::config::EngineConfig;
use crate::agenthive::engine::ChatEngine;
use crate::agenthive::error::EngineError;
use crate::agenthive::export::MemoryExporter;
use crate::agenthive::gateway::Gateway;
use crate::agenthive::pool::AgentPool;
use crate::agenthive::protection::{ProtectionConfig, SessionProtection};
use crate::agenthive::roundtable::Roundtable;
use crate::agenthive::router::Router;
use crate::agenthive::scheduler::Scheduler;
use crate::agenthive::store::SessionStore;
use crate::agenthive::tool_protocol::ToolRegistry;
use crate::agenthive::tools::register_builtin_tools;

/// Sweep cadence for the protection janitor and router compactor.
const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(600);

/// Root handle owning every engine subsystem.
pub struct Hive {
    config: EngineConfig,
    store: Arc<SessionStore>,
    gateway: Arc<Gateway>,
    tools: Arc<ToolRegistry>,
    protection: Arc<SessionProtection>,
    chat: Arc<ChatEngine>,
    router: Arc<Router>,
    pool: Arc<AgentPool>,
    scheduler: Arc<Scheduler>,
    roundtable: Roundtable,
    maintenance: Vec<tokio::task::JoinHandle<()>>,
}

impl Hive {
    /// Open a hive against the configured upstream and database.
    pub fn open(config: EngineConfig) -> Result<Self, EngineError> {
        let client: Arc<dyn LlmClient> = Arc::new(OpenAiCompatClient::new(
            &config.llm_base_url,
            &config.llm_api_key,
        ));
        Self::open_with_client(config, client)
    }

    /// Open a hive with a caller-supplied wire client (tests use mocks here).
    pub fn open_with_client(
        config: EngineConfig,
        client: Arc<dyn LlmClient>,
    ) -> Result<Self, EngineError> {
        let store = Arc::new(SessionStore::open(&config.database_url)?);
        let gateway = Arc::new(
            Gateway::new(client, config.default_model.clone())
                .with_request_timeout(config.request_timeout)
                .with_breaker_reset(config.breaker_reset),
        );

        let mut registry = ToolRegistry::new();
        register_builtin_tools(&mut registry);
        let tools = Arc::new(registry);

        let protection = Arc::new(SessionProtection::new(ProtectionConfig::default()));
        let chat = ChatEngine::new(
            Arc::clone(&store),
            Arc::clone(&gateway),
            Arc::clone(&tools),
            Arc::clone(&protection),
        );
        let router = Arc::new(Router::new());
        let pool = Arc::new(AgentPool::new(
            Arc::clone(&chat),
            Arc::clone(&router),
            Arc::clone(&store),
        ));
        pool.load_persisted()?;
        let scheduler = Scheduler::new(
            Arc::clone(&store),
            Arc::clone(&chat),
            Arc::clone(&tools),
        );
        let roundtable = Roundtable::new(
            Arc::clone(&pool),
            Arc::clone(&gateway),
            Arc::clone(&store),
        );

        let maintenance = vec![
            Arc::clone(&protection).spawn_janitor(MAINTENANCE_INTERVAL),
            Arc::clone(&router).spawn_compactor(MAINTENANCE_INTERVAL),
        ];

        Ok(Self {
            config,
            store,
            gateway,
            tools,
            protection,
            chat,
            router,
            pool,
            scheduler,
            roundtable,
            maintenance,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    pub fn gateway(&self) -> &Arc<Gateway> {
        &self.gateway
    }

    pub fn tools(&self) -> &Arc<ToolRegistry> {
        &self.tools
    }

    pub fn protection(&self) -> &Arc<SessionProtection> {
        &self.protection
    }

    pub fn chat(&self) -> &Arc<ChatEngine> {
        &self.chat
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    pub fn pool(&self) -> &Arc<AgentPool> {
        &self.pool
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    pub fn roundtable(&self) -> &Roundtable {
        &self.roundtable
    }

    /// The JSONL exporter, when `memories_path` is configured.
    pub fn exporter(&self) -> Option<MemoryExporter> {
        self.config
            .memories_path
            .as_ref()
            .map(MemoryExporter::new)
    }

    /// Stop the scheduler and the maintenance tasks.
    pub async fn shutdown(&self, grace: Duration) {
        self.scheduler.stop(grace).await;
        for handle in &self.maintenance {
            handle.abort();
        }
    }
}
