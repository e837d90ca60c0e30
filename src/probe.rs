use crate::cmd::shell_quote;
use crate::error::{DeployError, DeployResult};
use crate::host::Host;

/// Marker separating the response body from curl's write-out line.
const META_MARKER: &str = "\n__berth_meta__ ";

/// What one HTTP request observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
    /// `Location` of a redirect, when the server sent one.
    pub redirect: Option<String>,
}

impl HttpResponse {
    #[must_use]
    pub const fn is_redirect(&self) -> bool {
        matches!(self.status, 301 | 302 | 303 | 307 | 308)
    }
}

/// Issues HTTP requests from some vantage point.
pub trait Probe {
    /// Fetch `url` without following redirects. HTTPS certificates
    /// are verified; an invalid certificate is an error.
    fn fetch(&self, url: &str) -> DeployResult<HttpResponse>;
}

/// [`Probe`] that runs `curl` on a [`Host`].
#[derive(Debug, Clone)]
pub struct CurlProbe<H: Host> {
    host: H,
    max_time_secs: u32,
}

impl<H: Host> CurlProbe<H> {
    #[must_use]
    pub const fn new(host: H) -> Self {
        Self {
            host,
            max_time_secs: 5,
        }
    }

    #[must_use]
    pub const fn max_time(mut self, secs: u32) -> Self {
        self.max_time_secs = secs;
        self
    }

    /// The shell command issued for `url`.
    #[must_use]
    pub fn command(&self, url: &str) -> String {
        format!(
            "curl -sS --max-time {} -o - -w {} {}",
            self.max_time_secs,
            shell_quote(&format!(
                "{}%{{http_code}} %{{redirect_url}}",
                META_MARKER.replace('\n', "\\n")
            )),
            shell_quote(url)
        )
    }
}

impl<H: Host> Probe for CurlProbe<H> {
    fn fetch(&self, url: &str) -> DeployResult<HttpResponse> {
        let out = self.host.exec(&self.command(url))?;
        parse_curl_output(&out)
    }
}

/// Split curl output into body and the trailing
/// `__berth_meta__ <status> <redirect>` line.
pub fn parse_curl_output(out: &str) -> DeployResult<HttpResponse> {
    let marker = META_MARKER.trim_start_matches('\n');
    let (body, meta) = match out.rfind(marker) {
        Some(i) => (out[..i].trim_end_matches('\n'), &out[i + marker.len()..]),
        None => {
            return Err(DeployError::Other(format!(
                "unexpected curl output: {}",
                out.lines().last().unwrap_or_default()
            )));
        }
    };

    let mut parts = meta.split_whitespace();
    let status = parts
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| DeployError::Other(format!("unexpected curl status line: {meta}")))?;
    let redirect = parts.next().map(ToString::to_string);

    Ok(HttpResponse {
        status,
        body: body.to_string(),
        redirect,
    })
}
