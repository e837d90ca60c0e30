use indexmap::IndexMap;

use crate::error::{DeployError, DeployResult};

/// The bundled landing page.
pub const INDEX_HTML: &str = include_str!("../templates/index.html");

/// Substitute `{{ name }}` placeholders.
///
/// Rendering is strict: an unknown name, an empty placeholder or an
/// unterminated `{{` fails with `TemplateRenderError` instead of
/// producing a half-rendered page.
///
/// Values are inserted verbatim, without HTML escaping. They come from
/// the operator's own inventory and vault and must be trusted; the
/// readiness marker in particular has to appear in the page exactly as
/// configured.
pub fn render(template: &str, vars: &IndexMap<&str, String>) -> DeployResult<String> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];

        let end = after.find("}}").ok_or_else(|| {
            let line = line_of(template, template.len() - rest.len() + start);
            DeployError::TemplateRenderError(format!("unterminated placeholder on line {line}"))
        })?;

        let name = after[..end].trim();
        if name.is_empty() {
            let line = line_of(template, template.len() - rest.len() + start);
            return Err(DeployError::TemplateRenderError(format!(
                "empty placeholder on line {line}"
            )));
        }

        let value = vars.get(name).ok_or_else(|| {
            DeployError::TemplateRenderError(format!("undefined variable '{name}'"))
        })?;
        out.push_str(value);

        rest = &after[end + 2..];
    }

    out.push_str(rest);
    Ok(out)
}

fn line_of(text: &str, offset: usize) -> usize {
    text[..offset].matches('\n').count() + 1
}
