//! End-to-end tests for the management link controller.
//!
//! The provisioning service and the store are replaced with in-process
//! doubles that record every call, so the tests can assert on what the
//! controller did and did not touch.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch, Notify};
use zlayer_link::{
    Cmdline, Connector, EndpointDescriptor, FileStore, LinkConfig, LinkController, LinkError,
    LinkOutcome, LinkState, MemoryStore, NetworkStatusSpec, ProvisionRequest, ProvisionResponse,
    Provisioner, Resource, ResourceKey, ResourceKind, ResourceSpec, ResourceStore, StaticNodeId,
    StoreError, UpsertRequest, NETWORK_CONFIG_NAMESPACE,
};

const NODE_UUID: &str = "4c4c4544-0042-3510-8052-b4c04f4e3232";
const CMDLINE: &str = "console=ttyS0 zlayer.link.api=grpc://10.5.0.1:4000?jointoken=ABC quiet";

// ---------------------------------------------------------------------------
// Test doubles
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MockProvisioner {
    calls: AtomicUsize,
    requests: Mutex<Vec<ProvisionRequest>>,
    fail: bool,
    hang: bool,
    entered: Notify,
}

impl MockProvisioner {
    fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// A provisioner whose calls never complete
    fn hanging() -> Self {
        Self {
            hang: true,
            ..Self::default()
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Provisioner for MockProvisioner {
    async fn provision(&self, request: ProvisionRequest) -> zlayer_link::Result<ProvisionResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request);
        self.entered.notify_one();

        if self.hang {
            std::future::pending::<()>().await;
        }

        if self.fail {
            return Err(tonic::Status::unavailable("provisioning service down").into());
        }

        Ok(ProvisionResponse {
            server_endpoint: "203.0.113.10:51820".to_string(),
            server_public_key: "c2VydmVyLXB1YmxpYy1rZXktMzItYnl0ZXMtbG9uZyE=".to_string(),
            node_address_prefix: "fd00::2/128".to_string(),
            server_address: "fd00::1".to_string(),
        })
    }
}

struct MockConnector {
    provisioner: Arc<MockProvisioner>,
    dialed: Mutex<Vec<EndpointDescriptor>>,
}

impl MockConnector {
    fn new(provisioner: Arc<MockProvisioner>) -> Self {
        Self {
            provisioner,
            dialed: Mutex::new(Vec::new()),
        }
    }

    fn dialed(&self) -> Vec<EndpointDescriptor> {
        self.dialed.lock().unwrap().clone()
    }
}

impl Connector for MockConnector {
    fn connect(&self, endpoint: &EndpointDescriptor) -> zlayer_link::Result<Arc<dyn Provisioner>> {
        self.dialed.lock().unwrap().push(endpoint.clone());
        Ok(self.provisioner.clone())
    }
}

/// Store wrapper recording reads and writes
struct RecordingStore {
    inner: MemoryStore,
    gets: AtomicUsize,
    writes: Mutex<Vec<Resource>>,
    hang_writes: bool,
    write_started: Notify,
}

impl RecordingStore {
    fn new(inner: MemoryStore) -> Self {
        Self {
            inner,
            gets: AtomicUsize::new(0),
            writes: Mutex::new(Vec::new()),
            hang_writes: false,
            write_started: Notify::new(),
        }
    }

    /// A store whose writes never complete
    fn hanging(inner: MemoryStore) -> Self {
        Self {
            hang_writes: true,
            ..Self::new(inner)
        }
    }

    fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    fn writes(&self) -> Vec<Resource> {
        self.writes.lock().unwrap().clone()
    }
}

#[async_trait]
impl ResourceStore for RecordingStore {
    async fn get(&self, key: &ResourceKey) -> Result<Option<Resource>, StoreError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.inner.get(key).await
    }

    async fn upsert(&self, request: UpsertRequest) -> Result<Resource, StoreError> {
        self.write_started.notify_one();
        if self.hang_writes {
            std::future::pending::<()>().await;
        }

        let resource = self.inner.upsert(request).await?;
        self.writes.lock().unwrap().push(resource.clone());
        Ok(resource)
    }
}

struct Harness {
    memory: MemoryStore,
    store: Arc<RecordingStore>,
    provisioner: Arc<MockProvisioner>,
    connector: Arc<MockConnector>,
    controller: LinkController,
}

impl Harness {
    fn new(cmdline: &str, provisioner: MockProvisioner) -> Self {
        Self::with_store(cmdline, provisioner, RecordingStore::new)
    }

    fn with_store(
        cmdline: &str,
        provisioner: MockProvisioner,
        store: impl FnOnce(MemoryStore) -> RecordingStore,
    ) -> Self {
        let memory = MemoryStore::new();
        let store = Arc::new(store(memory.clone()));
        let provisioner = Arc::new(provisioner);
        let connector = Arc::new(MockConnector::new(provisioner.clone()));

        let controller = LinkController::new(
            LinkConfig::default(),
            Cmdline::parse(cmdline),
            store.clone(),
            connector.clone(),
            Arc::new(StaticNodeId::new(NODE_UUID).unwrap()),
        );

        Self {
            memory,
            store,
            provisioner,
            connector,
            controller,
        }
    }

    async fn set_address_ready(&self, ready: bool) {
        self.memory
            .put(
                ResourceKey::network_status(),
                ResourceSpec::NetworkStatus(NetworkStatusSpec {
                    address_ready: ready,
                    ..NetworkStatusSpec::default()
                }),
            )
            .await
            .unwrap();
    }

    async fn run_once(&mut self) -> zlayer_link::Result<LinkOutcome> {
        let events = self.memory.watch(ResourceKey::network_status()).await;
        let (_stop, shutdown) = watch::channel(false);
        self.controller.run(events, shutdown).await
    }
}

// ---------------------------------------------------------------------------
// 1. Disabled link
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_absent_param_makes_no_external_calls() {
    let mut harness = Harness::new("console=ttyS0 quiet", MockProvisioner::default());
    harness.set_address_ready(true).await;

    let outcome = harness.run_once().await.unwrap();

    assert_eq!(outcome, LinkOutcome::Disabled);
    assert_eq!(harness.controller.state(), LinkState::Done);
    assert!(harness.connector.dialed().is_empty());
    assert_eq!(harness.provisioner.calls(), 0);
    assert_eq!(harness.store.gets(), 0);
    assert!(harness.store.writes().is_empty());
    assert!(!harness.controller.identity().is_initialized());
}

// ---------------------------------------------------------------------------
// 2. Readiness gating
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_no_rpc_while_address_not_ready() {
    let mut harness = Harness::new(CMDLINE, MockProvisioner::default());
    harness.set_address_ready(false).await;

    let (tx, events) = mpsc::channel(32);
    for _ in 0..20 {
        tx.send(ResourceKey::network_status()).await.unwrap();
    }
    drop(tx);

    let (_stop, shutdown) = watch::channel(false);
    let outcome = harness.controller.run(events, shutdown).await.unwrap();

    assert_eq!(outcome, LinkOutcome::Cancelled);
    assert_eq!(harness.store.gets(), 20);
    assert_eq!(harness.provisioner.calls(), 0);
    assert!(harness.store.writes().is_empty());
}

#[tokio::test]
async fn test_provisions_once_address_becomes_ready() {
    let mut harness = Harness::new(CMDLINE, MockProvisioner::default());
    harness.set_address_ready(false).await;

    let events = harness.memory.watch(ResourceKey::network_status()).await;
    let (_stop, shutdown) = watch::channel(false);

    let memory = harness.memory.clone();
    let producer = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        memory
            .put(
                ResourceKey::network_status(),
                ResourceSpec::NetworkStatus(NetworkStatusSpec {
                    address_ready: true,
                    connectivity_ready: true,
                    ..NetworkStatusSpec::default()
                }),
            )
            .await
            .unwrap();
    });

    let outcome = tokio::time::timeout(
        Duration::from_secs(5),
        harness.controller.run(events, shutdown),
    )
    .await
    .expect("controller should finish once the address is ready")
    .unwrap();
    producer.await.unwrap();

    assert!(matches!(outcome, LinkOutcome::Published(_)));
    assert_eq!(harness.provisioner.calls(), 1);
}

// ---------------------------------------------------------------------------
// 3. Provisioning failures
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_rpc_error_publishes_nothing() {
    let mut harness = Harness::new(CMDLINE, MockProvisioner::failing());
    harness.set_address_ready(true).await;

    let result = harness.run_once().await;

    match result {
        Err(LinkError::Rpc(status)) => assert_eq!(status.code(), tonic::Code::Unavailable),
        other => panic!("expected RPC error, got {other:?}"),
    }
    assert_eq!(harness.controller.state(), LinkState::Failed);
    assert_eq!(harness.provisioner.calls(), 1);
    assert!(harness.store.writes().is_empty());
}

#[tokio::test]
async fn test_malformed_param_dials_default_descriptor() {
    let mut harness = Harness::new("zlayer.link.api=grpc://", MockProvisioner::default());
    harness.set_address_ready(true).await;

    // The mock connector accepts any descriptor; the run itself proceeds.
    let outcome = harness.run_once().await.unwrap();

    assert!(matches!(outcome, LinkOutcome::Published(_)));
    assert_eq!(harness.connector.dialed(), vec![EndpointDescriptor::default()]);
    let requests = harness.provisioner.requests.lock().unwrap().clone();
    assert_eq!(requests[0].join_token, None);
}

// ---------------------------------------------------------------------------
// 4. Publishing
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_publishes_link_then_address() {
    let mut harness = Harness::new(CMDLINE, MockProvisioner::default());
    harness.set_address_ready(true).await;

    let outcome = harness.run_once().await.unwrap();
    let LinkOutcome::Published(specs) = outcome else {
        panic!("expected published outcome");
    };

    assert_eq!(harness.controller.state(), LinkState::Done);
    assert_eq!(
        harness.connector.dialed(),
        vec![EndpointDescriptor {
            host: "10.5.0.1:4000".to_string(),
            insecure: true,
            join_token: Some("ABC".to_string()),
        }]
    );

    let requests = harness.provisioner.requests.lock().unwrap().clone();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].node_uuid, NODE_UUID);
    assert_eq!(requests[0].join_token.as_deref(), Some("ABC"));
    let identity = harness.controller.identity().key().unwrap();
    assert_eq!(requests[0].node_public_key, identity.public_key());

    let writes = harness.store.writes();
    assert_eq!(writes.len(), 2);
    assert_eq!(writes[0].key.kind, ResourceKind::LinkSpec);
    assert_eq!(writes[1].key.kind, ResourceKind::AddressSpec);

    let link_key = ResourceKey::new(
        NETWORK_CONFIG_NAMESPACE,
        ResourceKind::LinkSpec,
        "operator/zl-link0",
    );
    let stored = harness.memory.get(&link_key).await.unwrap().unwrap();
    let link = stored.spec.as_link().unwrap();
    assert_eq!(link, &specs.link);
    assert_eq!(link.wireguard.private_key, identity.private_key());
    assert_eq!(
        link.wireguard.peers[0].allowed_ips[0].to_string(),
        "fd00::1/128"
    );

    let address_key = ResourceKey::new(
        NETWORK_CONFIG_NAMESPACE,
        ResourceKind::AddressSpec,
        "operator/zl-link0/fd00::2/128",
    );
    let stored = harness.memory.get(&address_key).await.unwrap().unwrap();
    assert_eq!(stored.spec.as_address().unwrap().address.to_string(), "fd00::2/128");
}

#[tokio::test]
async fn test_repeated_runs_write_identical_payloads() {
    let mut harness = Harness::new(CMDLINE, MockProvisioner::default());
    harness.set_address_ready(true).await;

    harness.run_once().await.unwrap();
    let first_key = harness.controller.identity().key().unwrap().public_key();
    harness.run_once().await.unwrap();
    let second_key = harness.controller.identity().key().unwrap().public_key();

    assert_eq!(first_key, second_key);

    let writes = harness.store.writes();
    assert_eq!(writes.len(), 4);
    assert_eq!(writes[0].spec, writes[2].spec);
    assert_eq!(writes[1].spec, writes[3].spec);
    assert_eq!(
        serde_json::to_vec(&writes[0].spec).unwrap(),
        serde_json::to_vec(&writes[2].spec).unwrap()
    );

    // Unchanged specs keep their version
    assert_eq!(writes[0].version, writes[2].version);
    assert_eq!(writes[1].version, writes[3].version);
}

#[tokio::test]
async fn test_published_specs_persist_in_file_store() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileStore::open(dir.path()).await.unwrap();
    store
        .memory()
        .put(
            ResourceKey::network_status(),
            ResourceSpec::NetworkStatus(NetworkStatusSpec {
                address_ready: true,
                ..NetworkStatusSpec::default()
            }),
        )
        .await
        .unwrap();

    let events = store.memory().watch(ResourceKey::network_status()).await;
    let provisioner = Arc::new(MockProvisioner::default());
    let mut controller = LinkController::new(
        LinkConfig::default(),
        Cmdline::parse(CMDLINE),
        Arc::new(store),
        Arc::new(MockConnector::new(provisioner)),
        Arc::new(StaticNodeId::new(NODE_UUID).unwrap()),
    );

    let (_stop, shutdown) = watch::channel(false);
    let outcome = controller.run(events, shutdown).await.unwrap();
    assert!(matches!(outcome, LinkOutcome::Published(_)));

    let reopened = FileStore::open(dir.path()).await.unwrap();
    let kinds: Vec<ResourceKind> = reopened
        .memory()
        .list()
        .await
        .into_iter()
        .map(|resource| resource.key.kind)
        .collect();
    assert!(kinds.contains(&ResourceKind::LinkSpec));
    assert!(kinds.contains(&ResourceKind::AddressSpec));
}

// ---------------------------------------------------------------------------
// 5. Shutdown
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_shutdown_while_waiting_is_clean() {
    let mut harness = Harness::new(CMDLINE, MockProvisioner::default());
    harness.set_address_ready(false).await;

    let events = harness.memory.watch(ResourceKey::network_status()).await;
    let (stop, shutdown) = watch::channel(false);

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        let _ = stop.send(true);
    });

    let outcome = tokio::time::timeout(
        Duration::from_secs(5),
        harness.controller.run(events, shutdown),
    )
    .await
    .expect("controller should stop on shutdown")
    .unwrap();

    assert_eq!(outcome, LinkOutcome::Cancelled);
    assert_eq!(harness.controller.state(), LinkState::Done);
    assert_eq!(harness.provisioner.calls(), 0);
    assert!(harness.store.writes().is_empty());
}

#[tokio::test]
async fn test_shutdown_during_provisioning_is_clean() {
    let mut harness = Harness::new(CMDLINE, MockProvisioner::hanging());
    harness.set_address_ready(true).await;

    let events = harness.memory.watch(ResourceKey::network_status()).await;
    let (stop, shutdown) = watch::channel(false);

    let provisioner = harness.provisioner.clone();
    tokio::spawn(async move {
        provisioner.entered.notified().await;
        let _ = stop.send(true);
    });

    let outcome = tokio::time::timeout(
        Duration::from_secs(5),
        harness.controller.run(events, shutdown),
    )
    .await
    .expect("controller should stop while the RPC is in flight")
    .unwrap();

    assert_eq!(outcome, LinkOutcome::Cancelled);
    assert_eq!(harness.controller.state(), LinkState::Done);
    assert_eq!(harness.provisioner.calls(), 1);
    assert!(harness.store.writes().is_empty());
}

#[tokio::test]
async fn test_shutdown_during_publish_is_clean() {
    let mut harness =
        Harness::with_store(CMDLINE, MockProvisioner::default(), RecordingStore::hanging);
    harness.set_address_ready(true).await;

    let events = harness.memory.watch(ResourceKey::network_status()).await;
    let (stop, shutdown) = watch::channel(false);

    let store = harness.store.clone();
    tokio::spawn(async move {
        store.write_started.notified().await;
        let _ = stop.send(true);
    });

    let outcome = tokio::time::timeout(
        Duration::from_secs(5),
        harness.controller.run(events, shutdown),
    )
    .await
    .expect("controller should stop while publishing")
    .unwrap();

    assert_eq!(outcome, LinkOutcome::Cancelled);
    assert_eq!(harness.provisioner.calls(), 1);
    assert!(harness.store.writes().is_empty());
    assert_eq!(harness.memory.list().await.len(), 1);
}
