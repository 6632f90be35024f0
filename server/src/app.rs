//! Core application
//!
//! Wires config into services (cache backend, file cache, broker), starts
//! the background loops, and runs the HTTP server until shutdown.

use std::sync::Arc;

use anyhow::Result;

use crate::api::ApiServer;
use crate::core::cli::{self, Commands};
use crate::core::config::AppConfig;
use crate::core::constants::{APP_NAME_LOWER, ENV_LOG};
use crate::core::shutdown::ShutdownService;
use crate::data::cache::{MemoryCache, MessageCache, NoopCache, SqliteCache};
use crate::data::files::FileCache;
use crate::domain::broker::Broker;

pub struct CoreApp {
    pub config: AppConfig,
    pub broker: Arc<Broker>,
    pub shutdown: ShutdownService,
}

impl CoreApp {
    /// Run the application with CLI argument parsing
    pub async fn run() -> Result<()> {
        dotenvy::dotenv().ok();
        Self::init_logging();

        let cli = cli::parse();
        match cli.command {
            Some(Commands::Serve) | None => {}
        }

        let config = AppConfig::load(&cli)?;
        let app = Self::init(config).await?;
        Self::start_server(app).await
    }

    async fn init(config: AppConfig) -> Result<Self> {
        let cache: Arc<dyn MessageCache> = if config.cache.duration.is_zero() {
            tracing::info!("Message cache disabled");
            Arc::new(NoopCache)
        } else if let Some(path) = &config.cache.file {
            Arc::new(SqliteCache::new(path).await?)
        } else {
            tracing::debug!("Using in-memory message cache");
            Arc::new(MemoryCache::new())
        };

        let file_cache = match &config.attachments.cache_dir {
            Some(dir) => Some(Arc::new(
                FileCache::new(
                    dir,
                    config.attachments.total_size_limit,
                    config.attachments.file_size_limit,
                )
                .await?,
            )),
            None => None,
        };

        // The push and mail collaborators live outside this crate; a
        // deployment wires its implementations in here.
        let broker = Arc::new(Broker::new(config.clone(), cache, file_cache, None, None));
        broker.restore_topics().await?;

        Ok(Self {
            config,
            broker,
            shutdown: ShutdownService::new(),
        })
    }

    fn init_logging() {
        let default_filter = format!("info,{}=info", APP_NAME_LOWER);
        let filter = std::env::var(ENV_LOG)
            .or_else(|_| std::env::var("RUST_LOG"))
            .unwrap_or(default_filter);

        tracing_subscriber::fmt()
            .with_target(false)
            .with_level(true)
            .compact()
            .with_env_filter(filter)
            .init();
    }

    async fn start_server(app: Self) -> Result<()> {
        app.shutdown.install_signal_handlers();
        app.start_background_tasks().await;

        let server = ApiServer::new(Arc::clone(&app.broker), app.shutdown.clone());
        server.start().await?;

        app.shutdown.shutdown().await;
        Ok(())
    }

    pub async fn start_background_tasks(&self) {
        self.shutdown
            .register(self.broker.start_manager_task(self.shutdown.subscribe()))
            .await;
        self.shutdown
            .register(self.broker.start_at_sender_task(self.shutdown.subscribe()))
            .await;
        if self.broker.pusher().is_some() {
            self.shutdown
                .register(self.broker.start_push_keepalive_task(self.shutdown.subscribe()))
                .await;
        }
        tracing::debug!("Background tasks started");
    }
}
