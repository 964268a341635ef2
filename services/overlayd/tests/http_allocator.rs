//! Registration against an HTTP allocator.
//!
//! Uses wiremock to stand in for the allocator and the in-memory kernel for
//! link state.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use vlanet_overlayd::netlink::MockNetlink;
use vlanet_overlayd::{
    BackendDeps, BackendError, Context, ExternalInterface, HttpSubnetManager, LinkRegistry,
    Network, VlanBackend,
};
use vlanet_subnet::NetworkConfig;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn setup(server: &MockServer) -> (Arc<MockNetlink>, VlanBackend) {
    let (mock, _) = MockNetlink::with_uplink("eth0", "10.0.0.5/24".parse().unwrap());
    let ext_iface =
        ExternalInterface::lookup(&mock, "eth0", Some("203.0.113.9".parse().unwrap())).unwrap();
    let mock = Arc::new(mock);

    let allocator = HttpSubnetManager::new(&server.uri(), Duration::from_secs(5)).unwrap();
    let backend = VlanBackend::new(BackendDeps {
        subnet_mgr: Arc::new(allocator),
        ext_iface: Arc::new(ext_iface),
        ops: mock.clone(),
        registry: LinkRegistry::new(),
    });

    (mock, backend)
}

fn net_conf() -> NetworkConfig {
    NetworkConfig::from_json(
        r#"{"Network": "10.1.0.0/16", "Backend": {"Type": "vlan", "VlanId": 42}}"#,
    )
    .unwrap()
}

#[tokio::test]
async fn test_register_with_http_allocator() {
    let server = MockServer::start().await;
    let (mock, backend) = setup(&server);
    Mock::given(method("POST"))
        .and(path("/v1/networks/default/leases"))
        .and(body_partial_json(json!({
            "PublicIP": "203.0.113.9",
            "BackendType": "vlan"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "Subnet": "10.1.7.0/24",
            "Attrs": {"PublicIP": "203.0.113.9", "BackendType": "vlan"},
            "Expiration": "2030-01-01T00:00:00Z"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let network = backend
        .register(&Context::background(), "default", &net_conf())
        .await
        .unwrap();
    assert_eq!(network.lease().subnet.to_string(), "10.1.7.0/24");
    let mac = network.device().mac_addr();

    assert_eq!(mock.addrs("vlanet.42")[0].to_string(), "10.1.7.0/32");

    let requests = server.received_requests().await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(body["BackendData"]["VtepMAC"], mac.to_string());
}

#[tokio::test]
async fn test_allocator_error_status() {
    let server = MockServer::start().await;
    let (mock, backend) = setup(&server);

    Mock::given(method("POST"))
        .and(path("/v1/networks/default/leases"))
        .respond_with(ResponseTemplate::new(500).set_body_string("store unavailable"))
        .mount(&server)
        .await;

    let err = backend
        .register(&Context::background(), "default", &net_conf())
        .await
        .unwrap_err();

    assert!(matches!(err, BackendError::Allocation(_)));
    assert!(err.to_string().starts_with("failed to acquire lease:"));
    assert!(err.to_string().contains("store unavailable"));
    assert!(mock.routes().is_empty());
}

#[tokio::test]
async fn test_slow_allocator_hits_deadline() {
    let server = MockServer::start().await;
    let (_mock, backend) = setup(&server);

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(30)))
        .mount(&server)
        .await;

    let ctx = Context::background().with_timeout(Duration::from_millis(100));
    let err = backend
        .register(&ctx, "default", &net_conf())
        .await
        .unwrap_err();

    assert!(matches!(err, BackendError::DeadlineExceeded));
}

#[tokio::test]
async fn test_already_expired_lease_is_rejected() {
    let server = MockServer::start().await;
    let (mock, backend) = setup(&server);

    Mock::given(method("POST"))
        .and(path("/v1/networks/default/leases"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "Subnet": "10.1.7.0/24",
            "Attrs": {"PublicIP": "203.0.113.9", "BackendType": "vlan"},
            "Expiration": "2000-01-01T00:00:00Z"
        })))
        .mount(&server)
        .await;

    let err = backend
        .register(&Context::background(), "default", &net_conf())
        .await
        .unwrap_err();

    assert!(matches!(err, BackendError::Allocation(_)));
    assert!(err.to_string().contains("expired"));
    assert!(mock.addrs("vlanet.42").is_empty());
    assert!(mock.routes().is_empty());
}
