//! Integration tests against a real Docker/Podman daemon.
//!
//! Tests are skipped if Docker/Podman is not available or SKIP_CONTAINER_TESTS=1.

use dockdash::container::{
    ContainerClient, ContainerError, ContainerOrchestrator, ContainerRuntime, ContainerState,
    LaunchSpec, LogSink, NetworkProvisioner, NetworkSpec, OrchestratorConfig, RuntimeType,
};
use dockdash::env::test::{SKIP_CONTAINER_TESTS_ENV_VAR, TEST_IMAGE};
use serial_test::serial;
use std::time::Duration;
use test_tag::tag;
use tokio::io::AsyncReadExt;

/// Check if container tests should run.
fn should_run_container_tests() -> bool {
    if let Ok(value) = std::env::var(SKIP_CONTAINER_TESTS_ENV_VAR)
        && (value == "1" || value.eq_ignore_ascii_case("true"))
    {
        return false;
    }

    std::process::Command::new("docker")
        .arg("info")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
        || std::process::Command::new("podman")
            .arg("info")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
}

fn unique_name(prefix: &str) -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("dockdash-{}-{}", prefix, &id[..8])
}

async fn orchestrator() -> ContainerOrchestrator {
    ContainerOrchestrator::connect_with(
        Default::default(),
        OrchestratorConfig {
            settle_delay: Duration::from_secs(1),
            ..Default::default()
        },
    )
    .await
    .expect("Failed to connect")
}

/// Cleanup helper - removes container if exists.
async fn cleanup_container(orchestrator: &ContainerOrchestrator, name: &str) {
    let _ = orchestrator.delete(name).await;
}

/// Cleanup helper - removes network if exists.
async fn cleanup_network(name: &str) {
    if let Ok(client) = ContainerClient::new().await {
        let _ = client.docker().remove_network(name).await;
    }
}

#[tokio::test]
#[serial]
#[tag(integration, container)]
async fn test_client_connection() {
    if !should_run_container_tests() {
        eprintln!("Skipping container tests (Docker/Podman not available or SKIP_CONTAINER_TESTS=1)");
        return;
    }

    let client = ContainerClient::new().await.expect("Failed to connect to Docker/Podman");
    client.ping().await.expect("Ping failed");
    assert!(matches!(
        client.runtime_type(),
        RuntimeType::Docker | RuntimeType::Podman
    ));
    println!("✓ Connected to {}", client.runtime_type());
}

#[tokio::test]
#[serial]
#[tag(integration, container)]
async fn test_alpine_run_follow_delete() {
    if !should_run_container_tests() {
        eprintln!("Skipping container tests");
        return;
    }

    let orchestrator = orchestrator().await;
    let name = unique_name("alpine");
    let spec = LaunchSpec::builder()
        .with_image(TEST_IMAGE)
        .with_container_name(name.as_str())
        .with_command(["sh", "-c", "echo hi; sleep 30"])
        .build()
        .unwrap();

    assert!(!orchestrator.exists(&name).await.unwrap());

    let (out_w, mut out_r) = tokio::io::duplex(1024);
    let mut handle = orchestrator
        .run_with_sink(&spec, LogSink::new(out_w, tokio::io::sink()))
        .await
        .expect("run failed");
    assert_eq!(handle.container().state, ContainerState::Started);
    assert!(orchestrator.exists(&name).await.unwrap());

    let mut line = [0u8; 3];
    tokio::time::timeout(Duration::from_secs(10), out_r.read_exact(&mut line))
        .await
        .expect("no output in time")
        .unwrap();
    assert_eq!(&line, b"hi\n");

    handle.stop(&orchestrator).await.unwrap();
    handle.delete(&orchestrator).await.unwrap();
    assert!(!orchestrator.exists(&name).await.unwrap());

    println!("✓ Ran, followed and removed {}", name);
}

#[tokio::test]
#[serial]
#[tag(integration, container)]
async fn test_network_and_static_ip() {
    if !should_run_container_tests() {
        eprintln!("Skipping container tests");
        return;
    }

    let orchestrator = orchestrator().await;
    let network = unique_name("net");
    let name = unique_name("pinned");
    let spec = LaunchSpec::builder()
        .with_image(TEST_IMAGE)
        .with_container_name(name.as_str())
        .with_command(["sleep", "30"])
        .with_network(network.as_str())
        .with_subnet("172.29.0.0/16")
        .with_gateway("172.29.0.1")
        .with_static_ip("172.29.0.5")
        .with_port_mapping("8080/tcp", "38080")
        .build()
        .unwrap();

    let result = orchestrator.run_with_sink(&spec, LogSink::discard()).await;
    let (assigned_ip, reprovisioned) = match result {
        Ok(mut handle) => {
            let assigned_ip = handle.container().assigned_ip.clone();

            let provisioner = NetworkProvisioner::new(orchestrator.runtime().clone());
            let reprovisioned = provisioner
                .ensure_network(&NetworkSpec::new(network.as_str()))
                .await;

            handle.delete(&orchestrator).await.unwrap();
            (assigned_ip, reprovisioned)
        }
        Err(e) => {
            cleanup_container(&orchestrator, &name).await;
            cleanup_network(&network).await;
            panic!("run failed: {}", e);
        }
    };
    cleanup_network(&network).await;

    assert_eq!(assigned_ip.as_deref(), Some("172.29.0.5"));
    assert!(!reprovisioned.unwrap());
}

#[tokio::test]
#[serial]
#[tag(integration, container)]
async fn test_duplicate_name_conflict() {
    if !should_run_container_tests() {
        eprintln!("Skipping container tests");
        return;
    }

    let orchestrator = orchestrator().await;
    let name = unique_name("dup");
    let spec = LaunchSpec::builder()
        .with_image(TEST_IMAGE)
        .with_container_name(name.as_str())
        .with_command(["sleep", "30"])
        .build()
        .unwrap();

    let mut first = orchestrator
        .run_with_sink(&spec, LogSink::discard())
        .await
        .unwrap();
    let second = orchestrator.run_with_sink(&spec, LogSink::discard()).await;
    assert!(matches!(second, Err(ContainerError::Conflict(_))));

    first.delete(&orchestrator).await.unwrap();
}

#[tokio::test]
#[serial]
#[tag(integration, container)]
async fn test_missing_container_not_found() {
    if !should_run_container_tests() {
        eprintln!("Skipping container tests");
        return;
    }

    let client = ContainerClient::new().await.expect("Failed to connect");
    let err = client
        .inspect_container(&unique_name("ghost"))
        .await
        .unwrap_err();
    assert!(matches!(err, ContainerError::NotFound(_)));
}
