//! Test helper utilities for integration tests

use crate::mock_providers::{ControlledSecretStore, RecordingSpeech, ScriptedCompletion};
use gateway_config::GatewayConfig;
use gateway_facade::{ConversationService, Gateway, GatewayBuilder};
use gateway_providers::InMemoryConversationStore;
use gateway_telemetry::GatewayMetrics;
use std::sync::{Arc, Once};
use tracing_subscriber::EnvFilter;

static TRACING: Once = Once::new();

/// Initialize tracing for tests (only once, and only with `TEST_LOG` set)
pub fn init_tracing() {
    TRACING.call_once(|| {
        if std::env::var("TEST_LOG").is_ok() {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(EnvFilter::from_default_env())
                .with_test_writer()
                .try_init();
        }
    });
}

/// A gateway wired to controllable collaborators
pub struct TestGateway {
    /// The gateway under test
    pub gateway: Arc<Gateway>,
    /// Secret store behind the credential cache
    pub secrets: Arc<ControlledSecretStore>,
    /// Completion service
    pub completion: Arc<ScriptedCompletion>,
    /// Speech service
    pub speech: Arc<RecordingSpeech>,
    /// Metrics registry the gateway records into
    pub metrics: GatewayMetrics,
}

impl TestGateway {
    /// Build from the shared-secret fixture configuration
    pub fn new() -> Self {
        Self::with_config(crate::shared_secret_config())
    }

    /// Build from `config`
    pub fn with_config(config: GatewayConfig) -> Self {
        init_tracing();
        let secrets = ControlledSecretStore::with_defaults();
        let completion = ScriptedCompletion::new();
        let speech = RecordingSpeech::new();
        let metrics = GatewayMetrics::new().expect("metrics registry");

        let gateway = GatewayBuilder::new(config)
            .secret_source(secrets.clone())
            .completion(completion.clone())
            .speech(speech.clone())
            .metrics(metrics.clone())
            .build()
            .expect("gateway builds");

        Self {
            gateway: Arc::new(gateway),
            secrets,
            completion,
            speech,
            metrics,
        }
    }

    /// Chat service over a fresh conversation store
    pub fn conversations(&self) -> ConversationService {
        ConversationService::new(
            self.gateway.clone(),
            Arc::new(InMemoryConversationStore::new()),
        )
    }

    /// Rendered metrics
    pub fn rendered_metrics(&self) -> String {
        self.metrics.render().expect("metrics render")
    }
}

impl Default for TestGateway {
    fn default() -> Self {
        Self::new()
    }
}
