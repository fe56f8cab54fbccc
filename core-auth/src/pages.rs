//! HTML pages served by the local callback server.
//!
//! Templates may contain `{app}`, `{message}` and `{authorize_url}`
//! placeholders. The success and error pages carry a script that re-requests
//! the current URL with `accepted=true` / `accepted=false`, which is what
//! finally releases the waiting authorization.

use crate::types::AuthConfig;

const DEFAULT_LOGIN_PAGE: &str = r#"<!DOCTYPE html>
<html><head><meta charset="utf-8"><title>{app}</title></head>
<body><h1>{app}</h1>
<p><a href="{authorize_url}">Sign in to continue</a></p>
</body></html>"#;

const DEFAULT_SUCCESS_PAGE: &str = r#"<!DOCTYPE html>
<html><head><meta charset="utf-8"><title>{app}</title></head>
<body><h1>{app}</h1><p>Access granted. You may close this window.</p></body></html>"#;

const DEFAULT_ERROR_PAGE: &str = r#"<!DOCTYPE html>
<html><head><meta charset="utf-8"><title>{app}</title></head>
<body><h1>{app}</h1><p>{message}</p></body></html>"#;

fn acknowledge_script(accepted: bool) -> String {
    format!(
        r#"<script>
if (!/[?&]accepted=/.test(window.location.search)) {{
  var separator = window.location.search ? "&" : "?";
  window.location.replace(window.location.href + separator + "accepted={}");
}}
</script>"#,
        accepted
    )
}

/// Renders the callback pages of one provider instance.
#[derive(Debug, Clone)]
pub struct AuthPages {
    app_name: String,
    authorize_url: String,
    login: Option<String>,
    success: Option<String>,
    error: Option<String>,
}

impl AuthPages {
    pub fn new(config: &AuthConfig, authorize_url: impl Into<String>) -> Self {
        Self {
            app_name: config.requesting_app_name.clone(),
            authorize_url: authorize_url.into(),
            login: config.login_page.clone(),
            success: config.success_page.clone(),
            error: config.error_page.clone(),
        }
    }

    fn render(&self, template: &str, message: &str) -> String {
        template
            .replace("{app}", &escape_html(&self.app_name))
            .replace("{authorize_url}", &escape_html(&self.authorize_url))
            .replace("{message}", &escape_html(message))
    }

    pub fn login_page(&self) -> String {
        self.render(self.login.as_deref().unwrap_or(DEFAULT_LOGIN_PAGE), "")
    }

    /// Success page; its script confirms with `accepted=true`.
    pub fn success_page(&self) -> String {
        let page = self.render(self.success.as_deref().unwrap_or(DEFAULT_SUCCESS_PAGE), "");
        format!("{}{}", page, acknowledge_script(true))
    }

    /// Error page; its script confirms with `accepted=false`.
    pub fn error_page(&self, message: &str) -> String {
        let page = self.render(self.error.as_deref().unwrap_or(DEFAULT_ERROR_PAGE), message);
        format!("{}{}", page, acknowledge_script(false))
    }

    /// Error page without the acknowledgement script.
    pub fn message_page(&self, message: &str) -> String {
        self.render(self.error.as_deref().unwrap_or(DEFAULT_ERROR_PAGE), message)
    }
}

fn escape_html(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
