pub mod anthropic;
pub mod ollama;
pub mod remote;

/// Treats any HTTP response, even an error status, as proof the endpoint is reachable.
pub(crate) async fn check_reachable(client: &reqwest::Client, url: &str) -> Result<(), crate::llm::LlmError> {
    client
        .get(url)
        .send()
        .await
        .map(|_| ())
        .map_err(|e| crate::llm::LlmError::ConnectionError(e.to_string()))
}
