use caddyfile_rs::{Caddyfile, Directive, SiteBlock, format};

use crate::config::DeploymentConfig;

/// Mount point of the rendered content inside the container.
pub const CONTENT_ROOT: &str = "/srv";

/// Render the content server's Caddyfile.
///
/// TLS is terminated by the edge proxy, so the site listens on plain
/// HTTP at the container port and only serves files.
#[must_use]
pub fn render(config: &DeploymentConfig) -> String {
    let site = SiteBlock::new(&format!(":{}", config.container_port))
        .directive(Directive::new(&format!("root * {CONTENT_ROOT}")))
        .encode_gzip()
        .security_headers()
        .directive(Directive::new("file_server"))
        .log();

    format(&Caddyfile::new().site(site))
}
