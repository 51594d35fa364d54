//! Secret handling utilities.
//!
//! Re-exports secrecy types and provides helpers for working with
//! secrets in the hookify-worker context.

pub use secrecy::{ExposeSecret, SecretBox, SecretString};

/// Render a connection URL for logs with any password replaced by `***`.
pub fn redact_url(url: &SecretString) -> String {
    let raw = url.expose_secret();
    let Some((scheme, rest)) = raw.split_once("://") else {
        return "***".to_string();
    };
    match rest.rsplit_once('@') {
        Some((userinfo, host)) => {
            let user = userinfo.split(':').next().unwrap_or_default();
            format!("{scheme}://{user}:***@{host}")
        }
        None => format!("{scheme}://{rest}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacts_password() {
        let url = SecretString::from("postgres://hook:s3cret@db:5432/hookify");
        assert_eq!(redact_url(&url), "postgres://hook:***@db:5432/hookify");
    }

    #[test]
    fn leaves_passwordless_urls_alone() {
        let url = SecretString::from("postgres://localhost/hookify");
        assert_eq!(redact_url(&url), "postgres://localhost/hookify");
    }
}
