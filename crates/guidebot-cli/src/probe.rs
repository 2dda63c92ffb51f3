//! Model-server discovery.
//!
//! Asks an OpenAI-compatible server for `/v1/models` before the runtime
//! starts.  Ollama, vLLM and hosted endpoints all answer this route.

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct ModelEntry {
    pub id: String,
}

#[derive(Debug, Deserialize)]
struct ModelList {
    #[serde(default)]
    data: Vec<ModelEntry>,
}

/// List the models served at `base_url`.
///
/// Uses the blocking client, so call it before building the Tokio runtime.
pub fn fetch_models(base_url: &str, api_key: &str) -> Result<Vec<ModelEntry>, String> {
    let url = models_url(base_url);
    let client = reqwest::blocking::Client::new();
    let mut request = client.get(&url);
    if !api_key.is_empty() {
        request = request.bearer_auth(api_key);
    }
    let response = request
        .send()
        .map_err(|e| format!("Model server unreachable at {}: {}", url, e))?;

    if !response.status().is_success() {
        return Err(format!("Model server returned HTTP {}", response.status()));
    }

    let list: ModelList = response
        .json()
        .map_err(|e| format!("Failed to parse model list: {}", e))?;
    Ok(list.data)
}

fn models_url(base_url: &str) -> String {
    let base = base_url.trim_end_matches('/');
    let base = base.strip_suffix("/v1").unwrap_or(base);
    format!("{base}/v1/models")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn models_url_normalises_base() {
        assert_eq!(models_url("http://localhost:11434"), "http://localhost:11434/v1/models");
        assert_eq!(models_url("http://localhost:11434/"), "http://localhost:11434/v1/models");
        assert_eq!(models_url("https://api.example.com/v1"), "https://api.example.com/v1/models");
    }

    #[test]
    fn unreachable_server_is_an_error() {
        let err = fetch_models("http://127.0.0.1:9", "").unwrap_err();
        assert!(err.contains("unreachable"));
    }
}
