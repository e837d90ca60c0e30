use indexmap::IndexMap;

/// How the external edge proxy should route to the container.
///
/// The proxy discovers these settings from container labels on the
/// shared network; this tool never talks to it directly.
///
/// # Example
///
/// ```
/// use berth::edge::EdgeRoute;
///
/// let route = EdgeRoute::new()
///     .entrypoint("https")
///     .cert_resolver("le");
///
/// let labels = route.labels("static-web-example.com", "example.com", "proxy", 80);
/// assert_eq!(
///     labels["traefik.http.routers.static-web-example-com.rule"],
///     "Host(`example.com`)"
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdgeRoute {
    pub entrypoint: String,
    pub cert_resolver: String,
}

impl EdgeRoute {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entrypoint: "websecure".to_string(),
            cert_resolver: "letsencrypt".to_string(),
        }
    }

    #[must_use]
    pub fn entrypoint(mut self, name: &str) -> Self {
        self.entrypoint = name.to_string();
        self
    }

    #[must_use]
    pub fn cert_resolver(mut self, name: &str) -> Self {
        self.cert_resolver = name.to_string();
        self
    }

    /// Routing labels for a container serving `domain` on
    /// `service_port`.
    #[must_use]
    pub fn labels(
        &self,
        container_name: &str,
        domain: &str,
        network: &str,
        service_port: u16,
    ) -> IndexMap<String, String> {
        let router = router_name(container_name);
        let mut labels = IndexMap::new();

        labels.insert("traefik.enable".to_string(), "true".to_string());
        labels.insert("traefik.docker.network".to_string(), network.to_string());
        labels.insert(
            format!("traefik.http.routers.{router}.rule"),
            format!("Host(`{domain}`)"),
        );
        labels.insert(
            format!("traefik.http.routers.{router}.entrypoints"),
            self.entrypoint.clone(),
        );
        labels.insert(
            format!("traefik.http.routers.{router}.tls.certresolver"),
            self.cert_resolver.clone(),
        );
        labels.insert(
            format!("traefik.http.routers.{router}.service"),
            router.clone(),
        );
        labels.insert(
            format!("traefik.http.services.{router}.loadbalancer.server.port"),
            service_port.to_string(),
        );

        labels
    }
}

impl Default for EdgeRoute {
    fn default() -> Self {
        Self::new()
    }
}

/// Label keys are dot-separated, so dots in the name become dashes.
#[must_use]
pub fn router_name(container_name: &str) -> String {
    container_name.to_ascii_lowercase().replace('.', "-")
}
