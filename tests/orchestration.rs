//! Orchestration scenarios against the in-memory runtime.
//!
//! These exercise the full run/stop/delete flow without a daemon; the same
//! scenarios run against Docker in `docker_integration.rs`.

use bytes::Bytes;
use dockdash::container::{
    ContainerError, ContainerOrchestrator, ContainerState, HostPortBinding, LaunchSpec, LogChunk,
    LogSink, MemoryRuntime, NetworkProvisioner, NetworkSpec, OrchestratorConfig,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;

fn quick() -> OrchestratorConfig {
    OrchestratorConfig {
        settle_delay: Duration::ZERO,
        ..Default::default()
    }
}

fn setup() -> (Arc<MemoryRuntime>, ContainerOrchestrator) {
    let runtime = Arc::new(MemoryRuntime::new());
    let orchestrator = ContainerOrchestrator::with_runtime(runtime.clone(), quick());
    (runtime, orchestrator)
}

fn mysql_spec() -> LaunchSpec {
    LaunchSpec::builder()
        .with_image("mysql:latest")
        .with_container_name("api-mysql")
        .with_env_var("MYSQL_ROOT_PASSWORD", "root")
        .with_port_mapping("3306/tcp", "3700")
        .with_volume("/host/path", "/data", true)
        .with_network("MicroService")
        .with_subnet("172.18.0.0/16")
        .with_gateway("172.18.0.1")
        .with_static_ip("172.18.0.5")
        .build()
        .expect("valid mysql spec")
}

fn alpine_spec(name: &str) -> LaunchSpec {
    LaunchSpec::builder()
        .with_image("alpine:latest")
        .with_container_name(name)
        .with_command(["sh", "-c", "echo hi"])
        .build()
        .expect("valid alpine spec")
}

#[test]
fn test_build_is_deterministic() {
    let builder = LaunchSpec::builder()
        .with_image("mysql:latest")
        .with_container_name("api-mysql")
        .with_port_mapping("3306/tcp", "3700");

    assert_eq!(builder.build().unwrap(), builder.build().unwrap());
}

#[tokio::test]
async fn test_ensure_network_twice_creates_once() {
    let runtime = Arc::new(MemoryRuntime::new());
    let provisioner = NetworkProvisioner::new(runtime.clone());
    let spec = NetworkSpec::new("MicroService")
        .with_subnet("172.18.0.0/16")
        .with_gateway("172.18.0.1");

    assert!(provisioner.ensure_network(&spec).await.unwrap());
    assert!(!provisioner.ensure_network(&spec).await.unwrap());
    assert_eq!(runtime.network_count(), 1);
}

#[tokio::test]
async fn test_exists_tracks_run_and_delete() {
    let (_runtime, orchestrator) = setup();
    let spec = alpine_spec("test-1");

    assert!(!orchestrator.exists("test-1").await.unwrap());

    let mut handle = orchestrator
        .run_with_sink(&spec, LogSink::discard())
        .await
        .unwrap();
    assert!(orchestrator.exists("test-1").await.unwrap());

    handle.delete(&orchestrator).await.unwrap();
    assert!(!orchestrator.exists("test-1").await.unwrap());
}

#[tokio::test]
async fn test_exists_sees_stopped_containers() {
    let (_runtime, orchestrator) = setup();
    let mut handle = orchestrator
        .run_with_sink(&alpine_spec("stopped"), LogSink::discard())
        .await
        .unwrap();

    handle.stop(&orchestrator).await.unwrap();
    assert_eq!(handle.container().state, ContainerState::Stopped);
    assert!(orchestrator.exists("stopped").await.unwrap());
    assert!(!orchestrator.exists("stop").await.unwrap());
}

#[tokio::test]
async fn test_mysql_request_shape() {
    let (runtime, orchestrator) = setup();
    let mut handle = orchestrator
        .run_with_sink(&mysql_spec(), LogSink::discard())
        .await
        .unwrap();

    let request = runtime.create_request("api-mysql").unwrap();
    assert_eq!(
        request.port_bindings.get("3306/tcp").unwrap(),
        &vec![HostPortBinding {
            host_ip: "0.0.0.0".to_string(),
            host_port: "3700".to_string(),
        }]
    );
    assert_eq!(request.binds, ["/host/path:/data:ro"]);
    assert_eq!(request.env, ["MYSQL_ROOT_PASSWORD=root"]);
    assert_eq!(request.network_mode.as_deref(), Some("MicroService"));

    assert_eq!(handle.container().assigned_ip.as_deref(), Some("172.18.0.5"));
    handle.delete(&orchestrator).await.unwrap();
}

#[tokio::test]
async fn test_alpine_scenario_streams_output() {
    let (runtime, orchestrator) = setup();
    runtime.script_logs(
        "test-1",
        vec![LogChunk::StdOut(Bytes::from_static(b"hi\n"))],
        None,
    );

    let (out_w, mut out_r) = tokio::io::duplex(64);
    let mut handle = orchestrator
        .run_with_sink(&alpine_spec("test-1"), LogSink::new(out_w, tokio::io::sink()))
        .await
        .unwrap();

    let container = handle.container().clone();
    assert_eq!(container.state, ContainerState::Started);
    assert!(!container.id.is_empty());
    assert!(container.assigned_ip.is_some());

    let mut line = [0u8; 3];
    out_r.read_exact(&mut line).await.unwrap();
    assert_eq!(&line, b"hi\n");

    handle.stop(&orchestrator).await.unwrap();
    handle.delete(&orchestrator).await.unwrap();
    assert_eq!(handle.container().state, ContainerState::Deleted);
    assert!(!orchestrator.exists("test-1").await.unwrap());
}

#[tokio::test]
async fn test_concurrent_same_name_runs_conflict() {
    let (runtime, orchestrator) = setup();
    let orchestrator = Arc::new(orchestrator);
    let spec = alpine_spec("dup");

    let first = tokio::spawn({
        let orchestrator = orchestrator.clone();
        let spec = spec.clone();
        async move { orchestrator.run_with_sink(&spec, LogSink::discard()).await }
    });
    let second = tokio::spawn({
        let orchestrator = orchestrator.clone();
        let spec = spec.clone();
        async move { orchestrator.run_with_sink(&spec, LogSink::discard()).await }
    });

    let results = [first.await.unwrap(), second.await.unwrap()];
    let successes = results.iter().filter(|r| r.is_ok()).count();
    let conflicts: Vec<&ContainerError> = results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .collect();

    assert_eq!(successes, 1);
    assert_eq!(conflicts.len(), 1);
    assert!(matches!(conflicts[0], ContainerError::Conflict(_)));
    assert!(conflicts[0].is_runtime_error());
    assert!(conflicts[0].to_string().contains("dup"));
    assert_eq!(runtime.container_count(), 1);
}

#[test]
fn test_static_ip_without_network_fails_before_runtime() {
    let runtime = Arc::new(MemoryRuntime::new());

    let result = LaunchSpec::builder()
        .with_image("alpine:latest")
        .with_container_name("pinned")
        .with_static_ip("172.18.0.5")
        .build();

    assert!(matches!(result, Err(ContainerError::ConfigError(_))));
    assert_eq!(runtime.container_count(), 0);
    assert!(runtime.pulls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_settle_delay_does_not_serialize_runs() {
    let runtime = Arc::new(MemoryRuntime::new());
    let orchestrator = ContainerOrchestrator::with_runtime(
        runtime,
        OrchestratorConfig {
            settle_delay: Duration::from_secs(10),
            ..Default::default()
        },
    );

    let (one, two) = (alpine_spec("one"), alpine_spec("two"));
    let start = tokio::time::Instant::now();
    let (a, b) = tokio::join!(
        orchestrator.run_with_sink(&one, LogSink::discard()),
        orchestrator.run_with_sink(&two, LogSink::discard()),
    );
    let elapsed = start.elapsed();

    assert!(elapsed >= Duration::from_secs(10));
    assert!(elapsed < Duration::from_secs(20));
    a.unwrap().delete(&orchestrator).await.unwrap();
    b.unwrap().delete(&orchestrator).await.unwrap();
}

#[tokio::test]
async fn test_delete_unknown_container_is_not_found() {
    let (_runtime, orchestrator) = setup();
    assert!(matches!(
        orchestrator.delete("ghost").await,
        Err(ContainerError::NotFound(_))
    ));
    assert!(matches!(
        orchestrator.stop("ghost").await,
        Err(ContainerError::NotFound(_))
    ));
}
