//! Common test utilities for E2E tests

use rustmention::{config, resolver, AppState};
use tempfile::TempDir;
use tokio::net::TcpListener;

/// Test server instance
pub struct TestServer {
    pub addr: String,
    pub state: AppState,
    pub _temp_dir: TempDir,
    pub client: reqwest::Client,
}

/// Test configuration: inline scheduling (no worker), domain "us.org".
pub fn test_config(db_path: std::path::PathBuf) -> config::AppConfig {
    config::AppConfig {
        server: config::ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0, // Let OS assign port
            domain: "us.org".to_string(),
            protocol: "https".to_string(),
        },
        database: config::DatabaseConfig { path: db_path },
        webmention: config::WebmentionConfig {
            timeout_seconds: 5,
            max_retries: 5,
            retry_interval_seconds: 600,
            use_background_worker: false,
            auto_approve: false,
            allow_self_mentions: true,
            incoming_target_model_required: false,
            domains_incoming_allow: vec![],
            domains_incoming_deny: vec![],
            domains_outgoing_allow: vec![],
            domains_outgoing_deny: vec![],
            default_url_parameter_mapping: "id".to_string(),
            user_agent: "rustmention/test".to_string(),
            dashboard_public: false,
        },
        logging: config::LoggingConfig {
            level: "info".to_string(),
            format: "pretty".to_string(),
        },
    }
}

impl TestServer {
    /// Create a new test server instance with the default test config.
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Create a test server after letting the caller adjust the config.
    pub async fn with_config(adjust: impl FnOnce(&mut config::AppConfig)) -> Self {
        rustmention::metrics::init_metrics();

        // Create temporary directory for test database
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");

        let mut config = test_config(db_path);
        adjust(&mut config);

        // Initialize app state (URL-addressed resolution only)
        let resolver = resolver::UrlResolver::new(
            config.webmention.default_url_parameter_mapping.clone(),
        );
        let state = AppState::new(config, resolver).await.unwrap();

        // Create HTTP client
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .unwrap();

        // Bind to random port
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let addr_str = format!("http://{}", addr);

        // Build router
        let app = rustmention::build_router(state.clone());

        // Spawn server in background
        tokio::spawn(async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
            )
            .await
            .unwrap();
        });

        // Wait a bit for server to start
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;

        Self {
            addr: addr_str,
            state,
            _temp_dir: temp_dir,
            client,
        }
    }

    /// Get base URL for API requests
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.addr, path)
    }

    /// POST a webmention notification the way a peer would.
    pub async fn post_webmention(&self, source: &str, target: &str) -> reqwest::Response {
        self.client
            .post(self.url("/webmention/"))
            .form(&[("source", source), ("target", target)])
            .send()
            .await
            .unwrap()
    }

    /// Store a mention row directly, bypassing verification.
    pub async fn seed_mention(
        &self,
        source_url: &str,
        target_url: &str,
        validated: bool,
        approved: bool,
    ) -> rustmention::data::Mention {
        use chrono::Utc;
        use rustmention::data::{EntityId, Mention};

        let now = Utc::now();
        let mention = Mention {
            id: EntityId::new().0,
            source_url: source_url.to_string(),
            target_url: target_url.to_string(),
            sent_by: "test".to_string(),
            target_object: None,
            hcard_id: None,
            post_type: None,
            quote: None,
            validated,
            approved,
            has_been_read: false,
            notes: String::new(),
            published: now,
            created_at: now,
        };
        self.state.db.upsert_mention(&mention).await.unwrap()
    }
}
