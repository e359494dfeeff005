pub mod gemini;
pub mod ollama;
pub mod openai;

pub use gemini::GeminiClient;
pub use ollama::OllamaClient;
pub use openai::OpenAiEmbedder;

use crate::error::GatewayError;
use reqwest::Response;
use url::Url;

/// Joins `path` onto `base` without dropping a path prefix on the base URL.
pub(crate) fn join_endpoint(base: &Url, path: &str) -> Result<Url, GatewayError> {
    let mut base = base.clone();
    if !base.path().ends_with('/') {
        let with_slash = format!("{}/", base.path());
        base.set_path(&with_slash);
    }
    Ok(base.join(path.trim_start_matches('/'))?)
}

/// Turns a non-success response into a backend error carrying its body.
pub(crate) async fn ensure_success(backend: &str, response: Response) -> Result<Response, GatewayError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let body: String = body.chars().take(300).collect();
    Err(GatewayError::BackendResponse {
        backend: backend.to_string(),
        details: format!("{status}: {body}"),
    })
}

#[cfg(test)]
mod tests {
    use super::join_endpoint;
    use url::Url;

    #[test]
    fn endpoints_keep_base_path_prefix() {
        let base = Url::parse("http://proxy.local/ollama").expect("valid url");
        let joined = join_endpoint(&base, "/api/generate").expect("joins");
        assert_eq!(joined.as_str(), "http://proxy.local/ollama/api/generate");

        let root = Url::parse("https://generativelanguage.googleapis.com").expect("valid url");
        let joined = join_endpoint(&root, "v1beta/models/gemini-1.5-flash:generateContent")
            .expect("joins");
        assert_eq!(
            joined.as_str(),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-1.5-flash:generateContent"
        );
    }
}
