//! Exporter Integration Tests
//!
//! Runs the real HTTP client against a stub cluster API served by hyper on
//! localhost, then scrapes the real exposition server.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use parking_lot::Mutex;
use tokio::net::TcpListener;

use vmmig_exporter::collector::{Collector, CollectorConfig};
use vmmig_exporter::domain::ports::VirtualizationApi;
use vmmig_exporter::metrics::{find_sample, MIGRATION_TIME, VM_COUNT, VM_STATUS};
use vmmig_exporter::{server, Error, ExporterConfig, ExporterMetrics, KubevirtApiClient};

const TOKEN: &str = "sha256~integration-token";

const MIGRATIONLAB_VMS: &str = r#"{
    "apiVersion": "kubevirt.io/v1",
    "kind": "VirtualMachineList",
    "items": [
        {"metadata": {"name": "rocky9-esxi", "namespace": "migrationlab"},
         "status": {"printableStatus": "Running"}}
    ]
}"#;

const SPARSE_VMS: &str = r#"{
    "items": [
        {"metadata": {"name": "provisioning"}, "status": null},
        {"metadata": {"name": "win2k22"}, "status": {"printableStatus": "Stopped"}}
    ]
}"#;

const MIGRATIONS: &str = r#"{
    "items": [{
        "metadata": {"name": "rocky-plan-x7k2p"},
        "status": {
            "namespace": "migrationlab",
            "vms": [
                {"name": "centos-stream10-apricot-slug-73",
                 "started": "2025-03-01T10:00:00Z",
                 "completed": "2025-03-01T10:17:23Z"},
                {"name": "garbled", "started": "10 o'clock", "completed": "2025-03-01T10:17:23Z"}
            ]
        }
    }]
}"#;

// =============================================================================
// Stub cluster API
// =============================================================================

#[derive(Default)]
struct StubState {
    authorization: Mutex<Vec<String>>,
}

fn stub_response(path: &str) -> (StatusCode, &'static str) {
    match path {
        "/apis/kubevirt.io/v1/namespaces/default/virtualmachines" => {
            (StatusCode::OK, r#"{"kind": "VirtualMachineList", "items": []}"#)
        }
        "/apis/kubevirt.io/v1/namespaces/migrationlab/virtualmachines" => {
            (StatusCode::OK, MIGRATIONLAB_VMS)
        }
        "/apis/kubevirt.io/v1/namespaces/forbidden/virtualmachines" => {
            (StatusCode::FORBIDDEN, r#"{"kind": "Status", "code": 403}"#)
        }
        "/apis/kubevirt.io/v1/namespaces/sparse/virtualmachines" => (StatusCode::OK, SPARSE_VMS),
        "/apis/kubevirt.io/v1/namespaces/garbage/virtualmachines" => {
            (StatusCode::OK, "<html>not json</html>")
        }
        "/apis/forklift.konveyor.io/v1beta1/migrations" => (StatusCode::OK, MIGRATIONS),
        _ => (StatusCode::NOT_FOUND, r#"{"kind": "Status", "code": 404}"#),
    }
}

async fn start_stub_api() -> (SocketAddr, Arc<StubState>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let state = Arc::new(StubState::default());

    let shared = state.clone();
    tokio::spawn(async move {
        loop {
            let (stream, _) = listener.accept().await.unwrap();
            let io = TokioIo::new(stream);
            let state = shared.clone();

            tokio::spawn(async move {
                let service = service_fn(move |req: Request<Incoming>| {
                    let state = state.clone();
                    async move {
                        if let Some(auth) = req.headers().get("authorization") {
                            state
                                .authorization
                                .lock()
                                .push(auth.to_str().unwrap_or_default().to_string());
                        }
                        let (status, body) = stub_response(req.uri().path());
                        let mut response = Response::new(Full::new(Bytes::from(body)));
                        *response.status_mut() = status;
                        Ok::<_, Infallible>(response)
                    }
                });
                let _ = http1::Builder::new().serve_connection(io, service).await;
            });
        }
    });

    (addr, state)
}

fn config_for(addr: SocketAddr, namespaces: &[&str]) -> ExporterConfig {
    ExporterConfig::new(TOKEN, format!("http://{}", addr), namespaces.iter()).unwrap()
}

fn collector_for(config: &ExporterConfig) -> Collector {
    let api = Arc::new(KubevirtApiClient::new(config).unwrap());
    let metrics = Arc::new(ExporterMetrics::new().unwrap());
    Collector::new(api, metrics, CollectorConfig::from(config))
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn test_client_sends_bearer_token() {
    let (addr, state) = start_stub_api().await;
    let client = KubevirtApiClient::new(&config_for(addr, &["default"])).unwrap();

    let vms = client.list_virtual_machines("default").await.unwrap();
    assert!(vms.is_empty());

    let seen = state.authorization.lock().clone();
    assert_eq!(seen, vec![format!("Bearer {}", TOKEN)]);
}

#[tokio::test]
async fn test_client_error_mapping() {
    let (addr, _) = start_stub_api().await;
    let client = KubevirtApiClient::new(&config_for(addr, &["default"])).unwrap();

    match client.list_virtual_machines("forbidden").await {
        Err(Error::UnexpectedStatus { status, .. }) => assert_eq!(status, 403),
        other => panic!("expected UnexpectedStatus, got {:?}", other),
    }

    match client.list_virtual_machines("garbage").await {
        Err(Error::Decode { .. }) => {}
        other => panic!("expected Decode, got {:?}", other),
    }
}

#[tokio::test]
async fn test_null_status_still_counted() {
    let (addr, _) = start_stub_api().await;
    let config = config_for(addr, &["sparse"]);
    let collector = collector_for(&config);

    assert_eq!(collector.collect_vm_count("sparse").await.unwrap(), 2);
    let statuses = collector.collect_vm_statuses("sparse").await.unwrap();
    assert_eq!(statuses.get("win2k22").map(String::as_str), Some("Stopped"));
    assert_eq!(statuses.get("provisioning").map(String::as_str), Some(""));
}

#[tokio::test]
async fn test_cycle_against_stub_api() {
    let (addr, _) = start_stub_api().await;
    let config = config_for(addr, &["default", "forbidden", "migrationlab"]);
    let collector = collector_for(&config);

    let report = collector.run_cycle().await;
    assert_eq!(report.failed, 2);
    assert_eq!(report.succeeded, 5);

    let migrations = report.migrations.unwrap();
    assert_eq!(migrations.recorded, 1);
    assert_eq!(migrations.skipped, 1);

    let metrics = collector.metrics();
    assert_eq!(metrics.sample(VM_COUNT, &[("namespace", "default")]), Some(0.0));
    assert_eq!(
        metrics.sample(VM_COUNT, &[("namespace", "migrationlab")]),
        Some(1.0)
    );
    assert_eq!(metrics.sample(VM_COUNT, &[("namespace", "forbidden")]), None);
    assert_eq!(
        metrics.sample(
            VM_STATUS,
            &[
                ("namespace", "migrationlab"),
                ("vm_name", "rocky9-esxi"),
                ("status", "Running"),
            ]
        ),
        Some(1.0)
    );
    assert_eq!(
        metrics.sample(
            MIGRATION_TIME,
            &[
                ("namespace", "migrationlab"),
                ("vm_name", "centos-stream10-apricot-slug-73"),
            ]
        ),
        Some(1043.0)
    );
    assert_eq!(
        metrics.sample(
            MIGRATION_TIME,
            &[("namespace", "migrationlab"), ("vm_name", "garbled")]
        ),
        None
    );
}

#[tokio::test]
async fn test_scrape_exposes_collected_metrics() {
    let (addr, _) = start_stub_api().await;
    let config = config_for(addr, &["default", "migrationlab"]);
    let collector = collector_for(&config);
    collector.run_cycle().await;

    let listener = server::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
    let metrics_addr = listener.local_addr().unwrap();
    tokio::spawn(server::serve(listener, collector.metrics().clone()));

    let response = reqwest::get(format!("http://{}/metrics", metrics_addr))
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
    let body = response.text().await.unwrap();

    assert!(body.contains(r#"virtual_machine_count_total{namespace="default"} 0"#));
    assert!(body.contains(r#"virtual_machine_count_total{namespace="migrationlab"} 1"#));
    assert_eq!(
        find_sample(
            &body,
            VM_STATUS,
            &[
                ("namespace", "migrationlab"),
                ("vm_name", "rocky9-esxi"),
                ("status", "Running"),
            ]
        ),
        Some(1.0)
    );
    assert_eq!(
        find_sample(
            &body,
            MIGRATION_TIME,
            &[
                ("namespace", "migrationlab"),
                ("vm_name", "centos-stream10-apricot-slug-73"),
            ]
        ),
        Some(1043.0)
    );

    // Scrapes never poll the cluster: values stay put between cycles
    let again = reqwest::get(format!("http://{}/metrics", metrics_addr))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(body, again);

    let health = reqwest::get(format!("http://{}/healthz", metrics_addr))
        .await
        .unwrap();
    assert_eq!(health.status().as_u16(), 200);
}
