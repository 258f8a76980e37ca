//! Bot lifecycle tests.
//!
//! Drive the full deploy / update / teardown cycle through `BotManager`
//! against the in-memory control plane, with scripted fetcher and builder
//! doubles standing in for git and docker.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use async_trait::async_trait;
use secrecy::SecretString;

use botgrid_build::{
    BuildError, BuildRequest, BuildResult, FetchError, FetchResult, ImageBuilder, SourceFetcher,
};
use botgrid_cluster::resources::SECRET_NAME;
use botgrid_cluster::{ClusterError, InMemoryControlPlane, Operation, Provisioner};
use botgrid_core::{BotConfiguration, ImageReference, ResourceProfile, SecretSource};
use botgrid_orchestrator::{BotManager, BuildDeployPipeline, OrchestratorError};

static TRACING_INIT: Once = Once::new();

fn init_tracing() {
    TRACING_INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init()
            .ok();
    });
}

// ── Doubles ───────────────────────────────────────────────────────

#[derive(Clone, Copy)]
enum FetchScript {
    Checkout,
    Empty,
    Fail,
}

struct ScriptedFetcher {
    script: FetchScript,
    calls: AtomicUsize,
}

#[async_trait]
impl SourceFetcher for ScriptedFetcher {
    async fn fetch(
        &self,
        repository_url: &str,
        _token: Option<&SecretString>,
    ) -> FetchResult<Option<PathBuf>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.script {
            FetchScript::Checkout => Ok(Some(PathBuf::from("/repos/strategy"))),
            FetchScript::Empty => Ok(None),
            FetchScript::Fail => Err(FetchError::Git {
                operation: "clone",
                url: repository_url.to_string(),
                message: "repository not found".to_string(),
            }),
        }
    }
}

#[derive(Default)]
struct ScriptedBuilder {
    failures: Mutex<VecDeque<BuildError>>,
    requests: Mutex<Vec<BuildRequest>>,
}

impl ScriptedBuilder {
    fn fail_next(&self, error: BuildError) {
        self.failures.lock().unwrap().push_back(error);
    }

    fn requests(&self) -> Vec<BuildRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ImageBuilder for ScriptedBuilder {
    async fn build(&self, request: &BuildRequest) -> BuildResult<ImageReference> {
        self.requests.lock().unwrap().push(request.clone());
        match self.failures.lock().unwrap().pop_front() {
            Some(error) => Err(error),
            None => Ok(ImageReference::new(&request.tag)),
        }
    }
}

// ── Harness ───────────────────────────────────────────────────────

struct Harness {
    cluster: InMemoryControlPlane,
    fetcher: Arc<ScriptedFetcher>,
    builder: Arc<ScriptedBuilder>,
    manager: BotManager,
}

impl Harness {
    fn new() -> Self {
        Self::with_fetch(FetchScript::Checkout)
    }

    fn with_fetch(script: FetchScript) -> Self {
        init_tracing();
        let cluster = InMemoryControlPlane::new();
        let fetcher = Arc::new(ScriptedFetcher {
            script,
            calls: AtomicUsize::new(0),
        });
        let builder = Arc::new(ScriptedBuilder::default());
        let provisioner = Provisioner::new(Arc::new(cluster.clone()), "registry-credentials")
            .with_termination_wait(5, Duration::from_millis(1));
        let pipeline = BuildDeployPipeline::new(fetcher.clone(), builder.clone(), provisioner, "bot");

        let secrets: HashMap<String, String> = [
            ("ALPACA_API_KEY", "AKTEST"),
            ("ALPACA_API_SECRET", "alpaca-secret"),
            ("IB_USERNAME", "trader"),
            ("IB_PASSWORD", "hunter2"),
            ("KRAKEN_API_KEY", "kraken-key"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        let secrets: Arc<dyn SecretSource> = Arc::new(secrets);

        let manager = BotManager::new(
            pipeline,
            botgrid_registry::BotRegistry::new(),
            secrets,
            ResourceProfile::default(),
        );
        Self {
            cluster,
            fetcher,
            builder,
            manager,
        }
    }

    fn config(&self, user: &str, bot: &str, broker: &str) -> BotConfiguration {
        self.manager
            .bot_configuration(user, bot, "https://github.com/acme/strategy.git", broker)
            .unwrap()
    }

    fn operations(&self) -> Vec<Operation> {
        self.cluster.journal().iter().map(|c| c.operation).collect()
    }
}

fn forbidden() -> ClusterError {
    ClusterError::Api {
        status: 403,
        message: "secrets is forbidden".to_string(),
    }
}

// ── Deploy and teardown ───────────────────────────────────────────

#[tokio::test]
async fn alpaca_bot_deploys_and_tears_down() {
    let h = Harness::new();

    let record = h.manager.add_bot(h.config("u1", "b1", "alpaca")).await.unwrap();
    assert_eq!(record.namespace, "bot-u1-b1");
    assert_eq!(record.pod_name(), "bot-b1");
    assert!(record.image.as_str().starts_with("bot:"));

    assert_eq!(
        h.operations(),
        vec![
            Operation::CreateNamespace,
            Operation::CreateServiceAccount,
            Operation::CreateRole,
            Operation::CreateRoleBinding,
            Operation::CreateSecret,
            Operation::CreatePod,
        ]
    );
    assert_eq!(
        h.cluster.pods(),
        vec![("bot-u1-b1".to_string(), "bot-b1".to_string())]
    );

    let secret = h.cluster.secret("bot-u1-b1", SECRET_NAME).unwrap();
    let keys: Vec<&str> = secret.string_data.keys().map(String::as_str).collect();
    assert_eq!(keys, vec!["API_KEY", "API_SECRET", "PAPER"]);
    assert_eq!(secret.string_data["API_KEY"], "AKTEST");

    let pod = h.cluster.pod("bot-u1-b1", "bot-b1").unwrap();
    assert_eq!(pod.spec.containers[0].image, record.image.as_str());

    let stored = h.manager.get_bot("b1").await.unwrap();
    assert_eq!(stored.namespace, "bot-u1-b1");

    h.manager.remove_bot("b1").await.unwrap();
    assert!(h.cluster.pods().is_empty());
    assert!(h.manager.get_bot("b1").await.is_none());

    let err = h.manager.remove_bot("b1").await.unwrap_err();
    assert!(matches!(err, OrchestratorError::NotFound(ref id) if id == "b1"));
}

#[tokio::test]
async fn interactive_brokers_gets_build_args_and_larger_profile() {
    let h = Harness::new();

    h.manager
        .add_bot(h.config("u1", "ib1", "interactive_brokers"))
        .await
        .unwrap();

    let requests = h.builder.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].build_args["IB_USERNAME"], "True");
    assert_eq!(requests[0].context, PathBuf::from("/repos/strategy"));

    let pod = h.cluster.pod("bot-u1-ib1", "bot-ib1").unwrap();
    let limits = &pod.spec.containers[0].resources.limits;
    assert_eq!(limits["cpu"], "1");
    assert_eq!(limits["memory"], "1Gi");

    let env: Vec<&str> = pod.spec.containers[0]
        .env
        .iter()
        .map(|e| e.name.as_str())
        .collect();
    assert!(!env.contains(&"API_URL"));
    assert!(env.contains(&"RUNNING_ON_SERVER"));
}

#[tokio::test]
async fn every_build_gets_a_fresh_tag() {
    let h = Harness::new();

    let first = h.manager.add_bot(h.config("u1", "b1", "alpaca")).await.unwrap();
    h.manager.remove_bot("b1").await.unwrap();
    let second = h.manager.add_bot(h.config("u1", "b1", "alpaca")).await.unwrap();

    assert_ne!(first.image, second.image);
    // The tenant boundary from the first deploy is reused.
    assert_eq!(h.cluster.namespaces(), vec!["bot-u1-b1"]);
    assert_eq!(h.cluster.calls(Operation::CreateNamespace), 2);
}

#[tokio::test]
async fn remove_tolerates_pod_already_gone() {
    use botgrid_cluster::ControlPlane;

    let h = Harness::new();
    h.manager.add_bot(h.config("u1", "b1", "alpaca")).await.unwrap();
    h.cluster.delete_pod("bot-u1-b1", "bot-b1").await.unwrap();

    let removed = h.manager.remove_bot("b1").await.unwrap();
    assert_eq!(removed.namespace, "bot-u1-b1");
    assert!(h.manager.list_bots().await.is_empty());
}

#[tokio::test]
async fn remove_unknown_bot_leaves_registry_unchanged() {
    let h = Harness::new();
    h.manager.add_bot(h.config("u1", "b1", "alpaca")).await.unwrap();
    let before = h.cluster.journal().len();

    let err = h.manager.remove_bot("b9").await.unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(h.manager.list_bots().await.len(), 1);
    assert_eq!(h.cluster.journal().len(), before);
}

// ── Failure paths ─────────────────────────────────────────────────

#[tokio::test]
async fn unsupported_broker_makes_no_calls() {
    let h = Harness::new();

    let err = h
        .manager
        .bot_configuration("u1", "b1", "https://github.com/acme/strategy.git", "robinhood")
        .unwrap_err();

    assert!(matches!(err, OrchestratorError::Configuration(_)));
    assert!(h.cluster.journal().is_empty());
    assert_eq!(h.fetcher.calls.load(Ordering::SeqCst), 0);
    assert!(h.builder.requests().is_empty());
}

#[tokio::test]
async fn build_failure_never_creates_pod() {
    let h = Harness::new();
    h.builder.fail_next(BuildError::Process {
        tag: "bot:00000000".to_string(),
        message: "exit code 1: pip install failed".to_string(),
    });

    let err = h.manager.add_bot(h.config("u1", "b1", "alpaca")).await.unwrap_err();

    assert!(matches!(
        err,
        OrchestratorError::Build {
            source: BuildError::Process { .. },
            ..
        }
    ));
    assert_eq!(h.cluster.calls(Operation::CreatePod), 0);
    assert!(h.cluster.journal().is_empty());
    assert!(h.manager.list_bots().await.is_empty());
}

#[tokio::test]
async fn unreachable_builder_is_communication_failure() {
    let h = Harness::new();
    h.builder.fail_next(BuildError::Communication(
        "Cannot connect to the Docker daemon".to_string(),
    ));

    let err = h.manager.add_bot(h.config("u1", "b1", "alpaca")).await.unwrap_err();

    match err {
        OrchestratorError::Build { bot_id, source } => {
            assert_eq!(bot_id, "b1");
            assert!(source.is_communication());
        }
        other => panic!("expected build failure, got {other:?}"),
    }
    assert_eq!(h.cluster.calls(Operation::CreatePod), 0);
}

#[tokio::test]
async fn empty_fetch_is_source_unavailable() {
    let h = Harness::with_fetch(FetchScript::Empty);

    let err = h.manager.add_bot(h.config("u1", "b1", "alpaca")).await.unwrap_err();

    assert!(matches!(err, OrchestratorError::SourceUnavailable { .. }));
    assert!(h.builder.requests().is_empty());
    assert!(h.cluster.journal().is_empty());
}

#[tokio::test]
async fn failed_fetch_is_source_unavailable() {
    let h = Harness::with_fetch(FetchScript::Fail);

    let err = h.manager.add_bot(h.config("u1", "b1", "alpaca")).await.unwrap_err();

    match err {
        OrchestratorError::SourceUnavailable { url, reason } => {
            assert_eq!(url, "https://github.com/acme/strategy.git");
            assert!(reason.contains("repository not found"));
        }
        other => panic!("expected source unavailable, got {other:?}"),
    }
    assert!(h.builder.requests().is_empty());
}

#[tokio::test]
async fn provisioning_failure_leaves_no_record() {
    let h = Harness::new();
    h.cluster.fail_next(Operation::CreateSecret, forbidden());

    let err = h.manager.add_bot(h.config("u1", "b1", "alpaca")).await.unwrap_err();

    assert!(matches!(err, OrchestratorError::Provisioning { .. }));
    assert!(err.to_string().contains("bot-u1-b1"));
    assert_eq!(h.cluster.calls(Operation::CreatePod), 0);
    assert!(h.manager.get_bot("b1").await.is_none());
    // Earlier steps are not rolled back.
    assert_eq!(h.cluster.namespaces(), vec!["bot-u1-b1"]);
}

// ── Update ────────────────────────────────────────────────────────

#[tokio::test]
async fn update_replaces_pod_and_namespace() {
    let h = Harness::new();
    let original = h.manager.add_bot(h.config("u1", "b1", "alpaca")).await.unwrap();

    let updated = h
        .manager
        .update_bot_config("b1", h.config("u2", "b1", "alpaca"))
        .await
        .unwrap();

    let deletes: Vec<_> = h
        .cluster
        .journal()
        .into_iter()
        .filter(|c| c.operation == Operation::DeletePod)
        .collect();
    assert_eq!(deletes.len(), 1);
    assert_eq!(deletes[0].namespace, "bot-u1-b1");
    assert_eq!(deletes[0].name, "bot-b1");

    assert_eq!(updated.namespace, "bot-u2-b1");
    assert_eq!(updated.config.user_id(), "u2");
    assert_ne!(updated.image, original.image);
    assert_eq!(
        h.cluster.pods(),
        vec![("bot-u2-b1".to_string(), "bot-b1".to_string())]
    );
    assert_eq!(h.manager.get_bot("b1").await.unwrap().namespace, "bot-u2-b1");
}

#[tokio::test]
async fn update_in_same_namespace_rewrites_credentials() {
    let h = Harness::new();
    h.manager.add_bot(h.config("u1", "b1", "alpaca")).await.unwrap();

    let updated = h
        .manager
        .update_bot_config("b1", h.config("u1", "b1", "kraken"))
        .await
        .unwrap();
    assert_eq!(updated.namespace, "bot-u1-b1");

    let secret = h.cluster.secret("bot-u1-b1", SECRET_NAME).unwrap();
    let keys: Vec<&str> = secret.string_data.keys().map(String::as_str).collect();
    assert_eq!(keys, vec!["apiKey", "exchange_id", "margin", "sandbox"]);
    assert_eq!(secret.string_data["apiKey"], "kraken-key");

    let pod = h.cluster.pod("bot-u1-b1", "bot-b1").unwrap();
    let mut env: Vec<&str> = pod.spec.containers[0]
        .env
        .iter()
        .map(|e| e.value_from.secret_key_ref.key.as_str())
        .collect();
    env.sort_unstable();
    assert_eq!(env, keys);
    assert_eq!(h.cluster.calls(Operation::ReplaceSecret), 1);
}

#[tokio::test]
async fn update_waits_for_old_pod_to_terminate() {
    let h = Harness::new();
    h.manager.add_bot(h.config("u1", "b1", "alpaca")).await.unwrap();
    h.cluster.set_termination_reads(2);

    let updated = h
        .manager
        .update_bot_config("b1", h.config("u1", "b1", "alpaca"))
        .await
        .unwrap();

    let ops = h.operations();
    let delete = ops.iter().position(|o| *o == Operation::DeletePod).unwrap();
    let create = ops.iter().rposition(|o| *o == Operation::CreatePod).unwrap();
    let checks = ops[delete..create]
        .iter()
        .filter(|o| **o == Operation::ReadPod)
        .count();
    assert_eq!(checks, 3);
    assert_eq!(
        h.cluster.pod("bot-u1-b1", "bot-b1").unwrap().spec.containers[0].image,
        updated.image.as_str()
    );
}

#[tokio::test]
async fn pod_stuck_terminating_fails_update_and_keeps_record() {
    let h = Harness::new();
    let original = h.manager.add_bot(h.config("u1", "b1", "alpaca")).await.unwrap();
    h.cluster.set_termination_reads(50);

    let err = h
        .manager
        .update_bot_config("b1", h.config("u1", "b1", "alpaca"))
        .await
        .unwrap_err();

    assert!(matches!(err, OrchestratorError::Provisioning { .. }));
    assert_eq!(h.builder.requests().len(), 1);
    assert_eq!(h.manager.get_bot("b1").await.unwrap().image, original.image);
}

#[tokio::test]
async fn failed_update_keeps_previous_record() {
    let h = Harness::new();
    let original = h.manager.add_bot(h.config("u1", "b1", "alpaca")).await.unwrap();
    h.cluster.fail_next(Operation::CreatePod, forbidden());

    let err = h
        .manager
        .update_bot_config("b1", h.config("u2", "b1", "alpaca"))
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::Provisioning { .. }));

    let stored = h.manager.get_bot("b1").await.unwrap();
    assert_eq!(stored.namespace, "bot-u1-b1");
    assert_eq!(stored.image, original.image);
    assert_eq!(stored.config.user_id(), "u1");
    assert_eq!(h.cluster.calls(Operation::DeletePod), 1);
}

#[tokio::test]
async fn update_unknown_bot_is_not_found() {
    let h = Harness::new();

    let err = h
        .manager
        .update_bot_config("b1", h.config("u1", "b1", "alpaca"))
        .await
        .unwrap_err();

    assert!(matches!(err, OrchestratorError::NotFound(_)));
    assert!(h.cluster.journal().is_empty());
    assert!(h.builder.requests().is_empty());
}

// ── Logs ──────────────────────────────────────────────────────────

#[tokio::test]
async fn logs_are_fetched_and_stored() {
    use botgrid_cluster::ControlPlane;

    let h = Harness::new();
    h.manager.add_bot(h.config("u1", "b1", "alpaca")).await.unwrap();
    h.cluster.set_pod_log("bot-u1-b1", "bot-b1", "connected to alpaca\n");

    let logs = h.manager.get_bot_logs("b1").await.unwrap();
    assert_eq!(logs, "connected to alpaca\n");
    assert_eq!(h.manager.get_bot("b1").await.unwrap().logs, logs);

    h.cluster.delete_pod("bot-u1-b1", "bot-b1").await.unwrap();
    let err = h.manager.get_bot_logs("b1").await.unwrap_err();
    assert!(matches!(
        err,
        OrchestratorError::PodNotFound { ref pod, ref namespace, .. }
            if pod == "bot-b1" && namespace == "bot-u1-b1"
    ));
    assert_eq!(h.manager.get_bot("b1").await.unwrap().logs, logs);
}
