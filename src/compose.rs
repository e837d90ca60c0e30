use docker_compose_types::{
    Compose, ComposeNetwork, ComposeNetworks, Labels, MapOrEmpty, NetworkSettings, Networks,
    Ports, Service, Services, Volumes,
};
use indexmap::IndexMap;

use crate::caddyfile::CONTENT_ROOT;
use crate::config::DeploymentConfig;
use crate::error::DeployResult;

/// Compose service key of the static web container.
pub const SERVICE_NAME: &str = "web";

/// Render the `docker-compose.yml` for the static web container,
/// publishing it on `host_port`.
pub fn render(config: &DeploymentConfig, host_port: u16) -> DeployResult<String> {
    let mut services = IndexMap::new();
    services.insert(
        SERVICE_NAME.to_string(),
        Some(web_service(config, host_port)),
    );

    let compose = Compose {
        services: Services(services),
        networks: shared_network(config),
        ..Default::default()
    };

    Ok(serde_yaml::to_string(&compose)?)
}

fn web_service(config: &DeploymentConfig, host_port: u16) -> Service {
    let labels = config.edge.labels(
        &config.container_name,
        &config.domain,
        &config.network,
        config.container_port,
    );

    Service {
        image: Some(config.image.clone()),
        container_name: Some(config.container_name.clone()),
        restart: Some("unless-stopped".to_string()),
        ports: Ports::Short(vec![format!("{host_port}:{}", config.container_port)]),
        volumes: vec![
            Volumes::Simple(format!("{}:{CONTENT_ROOT}:ro", config.content_dir())),
            Volumes::Simple(format!(
                "{}:/etc/caddy/Caddyfile:ro",
                config.caddyfile_path()
            )),
        ],
        networks: Networks::Simple(vec![config.network.clone()]),
        labels: Labels::Map(labels),
        mem_limit: config.memory_limit.clone(),
        ..Default::default()
    }
}

/// The shared network is consumed, never created.
fn shared_network(config: &DeploymentConfig) -> ComposeNetworks {
    let mut nets = IndexMap::new();
    nets.insert(
        config.network.clone(),
        MapOrEmpty::Map(NetworkSettings {
            external: Some(ComposeNetwork::Bool(true)),
            ..Default::default()
        }),
    );
    ComposeNetworks(nets)
}
