mod common;

use berth::docker::ContainerStatus;
use berth::error::DeployError;
use berth::provision::{ContainerState, Provisioner};

use common::{CONTAINER, FakeRuntime, config, config_with};

#[test]
fn writes_files_and_starts_container() {
    let runtime = FakeRuntime::default();
    let cfg = config();

    let container = Provisioner::new(&cfg, &runtime).apply().unwrap();

    assert_eq!(container.name, CONTAINER);
    assert_eq!(container.network, "proxy");
    assert_eq!(container.host_port, 8080);
    assert_eq!(container.state, ContainerState::Running);
    assert!(!container.replaced_previous);
    assert_eq!(container.labels["traefik.enable"], "true");

    let state = runtime.state();
    let index = &state.files[&format!("/opt/static-web/{CONTAINER}/content/index.html")];
    assert!(index.contains("Welcome to example.test"));
    assert!(state.files[&cfg.caddyfile_path()].contains("file_server"));
    assert!(state.files.contains_key(&cfg.compose_path()));

    let running = &state.containers[CONTAINER];
    assert_eq!(running.status, ContainerStatus::Running);
    assert_eq!(running.restart, "unless-stopped");
    assert_eq!(running.networks, vec!["proxy".to_string()]);
    assert_eq!(running.image, "caddy:2-alpine");
}

#[test]
fn running_twice_leaves_exactly_one_container() {
    let runtime = FakeRuntime::default();
    let cfg = config();

    Provisioner::new(&cfg, &runtime).apply().unwrap();
    let second = Provisioner::new(&cfg, &runtime).apply().unwrap();

    assert!(second.replaced_previous);
    let state = runtime.state();
    assert_eq!(state.containers.len(), 1);
    assert_eq!(state.created, 2);
    assert_eq!(state.containers[CONTAINER].status, ContainerStatus::Running);
}

#[test]
fn stale_container_is_removed_before_start() {
    let runtime = FakeRuntime::default();
    let cfg = config();
    Provisioner::new(&cfg, &runtime).apply().unwrap();
    runtime.state_mut().calls.clear();

    Provisioner::new(&cfg, &runtime).apply().unwrap();

    let calls = runtime.calls();
    let rm = calls.iter().position(|c| c == &format!("rm {CONTAINER}"));
    let up = calls.iter().position(|c| c.starts_with("up "));
    assert!(rm.is_some() && up.is_some() && rm < up, "calls: {calls:?}");
}

#[test]
fn port_conflict_without_alternate_is_fatal() {
    let runtime = FakeRuntime::default();
    runtime.state_mut().busy_ports.push(8080);
    let cfg = config();

    let err = Provisioner::new(&cfg, &runtime).apply().unwrap_err();

    assert!(matches!(err, DeployError::ContainerCreateError(_)));
    assert!(err.is_port_conflict());
}

#[test]
fn port_conflict_retries_once_on_alternate_port() {
    let runtime = FakeRuntime::default();
    runtime.state_mut().busy_ports.push(8080);
    let cfg = config_with(&[("alternate_port", "8081")]);

    let container = Provisioner::new(&cfg, &runtime).apply().unwrap();

    assert_eq!(container.host_port, 8081);
    let state = runtime.state();
    assert_eq!(state.containers.len(), 1);
    assert_eq!(state.containers[CONTAINER].host_port, 8081);
    assert_eq!(state.containers[CONTAINER].status, ContainerStatus::Running);
    assert!(state.files[&cfg.compose_path()].contains("8081:80"));
}

#[test]
fn alternate_port_is_tried_only_once() {
    let runtime = FakeRuntime::default();
    runtime.state_mut().busy_ports.extend([8080, 8081]);
    let cfg = config_with(&[("alternate_port", "8081")]);

    let err = Provisioner::new(&cfg, &runtime).apply().unwrap_err();

    assert!(err.is_port_conflict());
    let ups = runtime.calls().iter().filter(|c| c.starts_with("up ")).count();
    assert_eq!(ups, 2);
}

#[test]
fn container_that_exits_is_a_create_error() {
    let runtime = FakeRuntime::default();
    runtime.state_mut().start_status = ContainerStatus::Exited;
    let cfg = config_with(&[("alternate_port", "8081")]);

    let err = Provisioner::new(&cfg, &runtime).apply().unwrap_err();

    assert!(matches!(err, DeployError::ContainerCreateError(ref m) if m.contains("exited")));
    assert!(!err.is_port_conflict());
    let ups = runtime.calls().iter().filter(|c| c.starts_with("up ")).count();
    assert_eq!(ups, 1);
}
