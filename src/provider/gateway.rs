//! Calls a provider through the transport and normalizes its responses.

use log::debug;
use reqwest::Method;
use serde_json::Value;

use super::Provider;
use crate::error::{Error, Result};
use crate::extract::{check_errors, extract_binary, extract_content, first_delta, parse_body};
use crate::http::{HttpClient, Target};
use crate::multipart::Attachment;
use crate::sse::Event;

/// Data payload that ends an OpenAI-style event stream.
pub const DONE_MARKER: &str = "[DONE]";

/// A provider paired with the shared HTTP client.
pub struct Gateway<P: Provider> {
    client: HttpClient,
    provider: P,
}

impl<P: Provider> Gateway<P> {
    pub fn new(client: HttpClient, provider: P) -> Self {
        Self { client, provider }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    fn target(&self, path: &str) -> Target {
        Target::new(self.provider.base_url(), path)
    }

    /// Parses a response body, raising provider errors before extracting.
    fn checked(&self, text: &str) -> Result<Value> {
        let root = parse_body(text)?;
        check_errors(&root, self.provider.error_paths())?;
        Ok(root)
    }

    /// POSTs `body` and extracts the text content.
    #[tracing::instrument(skip(self, body), fields(provider = self.provider.name()))]
    pub async fn complete(&self, path: &str, body: &Value) -> Result<String> {
        let text = self
            .client
            .send_json(&self.target(path), self.provider.headers(), body)
            .await?;
        let root = self.checked(&text)?;
        extract_content(&root, self.provider.content_paths())
    }

    /// POSTs `body` and decodes a base64 payload found at the content paths.
    #[tracing::instrument(skip(self, body), fields(provider = self.provider.name()))]
    pub async fn complete_binary(&self, path: &str, body: &Value) -> Result<Vec<u8>> {
        let text = self
            .client
            .send_json(&self.target(path), self.provider.headers(), body)
            .await?;
        let root = self.checked(&text)?;
        extract_binary(&root, self.provider.content_paths())
    }

    /// GETs `path` and returns the parsed, error-checked JSON.
    #[tracing::instrument(skip(self), fields(provider = self.provider.name()))]
    pub async fn fetch(&self, path: &str) -> Result<Value> {
        let text = self
            .client
            .send(Method::GET, &self.target(path), self.provider.headers())
            .await?;
        self.checked(&text)
    }

    /// Uploads `attachment` and extracts the text content of the reply.
    #[tracing::instrument(skip(self, attachment), fields(provider = self.provider.name()))]
    pub async fn upload(&self, path: &str, attachment: &Attachment) -> Result<String> {
        let text = self
            .client
            .send_upload(&self.target(path), self.provider.headers(), attachment)
            .await?;
        let root = self.checked(&text)?;
        extract_content(&root, self.provider.content_paths())
    }

    /// Streams `body` and hands each text delta to `on_delta` until it
    /// returns `false`, the provider sends [`DONE_MARKER`], or the stream ends.
    ///
    /// An error found in a streamed event ends the call with that error.
    #[tracing::instrument(skip(self, body, on_delta), fields(provider = self.provider.name()))]
    pub async fn stream_text<F>(&self, path: &str, body: &Value, mut on_delta: F) -> Result<()>
    where
        F: FnMut(&str) -> bool,
    {
        let provider = &self.provider;
        let result = self
            .client
            .stream(&self.target(path), provider.headers(), body, |event| {
                let Event::Data(data) = event else {
                    return Ok(true);
                };
                if data == DONE_MARKER {
                    debug!("{}: end of stream marker", provider.name());
                    return Ok(false);
                }
                let root = parse_body(&data)?;
                check_errors(&root, provider.error_paths())?;
                match first_delta(&root, provider.stream_content_paths())? {
                    Some(delta) => Ok(on_delta(&delta)),
                    None => Ok(true),
                }
            })
            .await;

        // Surface typed failures raised inside the callback as themselves.
        match result {
            Err(Error::Callback(err)) => match err.downcast::<Error>() {
                Ok(inner) => Err(inner),
                Err(err) => Err(Error::Callback(err)),
            },
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::ClientConfig;
    use crate::provider::ProviderProfile;
    use mockito::Matcher;
    use serde_json::json;

    fn gateway(url: String) -> Gateway<ProviderProfile> {
        let client = HttpClient::from_config(&ClientConfig::default()).unwrap();
        let provider = ProviderProfile::openai_compatible("test", url)
            .header("Authorization", "Bearer sk-test")
            .unwrap();
        Gateway::new(client, provider)
    }

    #[tokio::test]
    async fn test_complete_extracts_content() {
        // --- Setup Mock Server ---
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .match_header("authorization", "Bearer sk-test")
            .with_status(200)
            .with_body(r#"{"choices": [{"message": {"content": "  Hello there \n"}}]}"#)
            .create_async()
            .await;

        // --- Execute ---
        let content = gateway(server.url())
            .complete("chat/completions", &json!({"model": "m"}))
            .await
            .unwrap();

        // --- Verify ---
        mock.assert_async().await;
        assert_eq!(content, "Hello there");
    }

    #[tokio::test]
    async fn test_complete_raises_domain_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_body(r#"{"error": {"message": "model overloaded"}}"#)
            .create_async()
            .await;

        let result = gateway(server.url())
            .complete("chat/completions", &json!({}))
            .await;

        assert!(matches!(result, Err(Error::Api(ref m)) if m == "model overloaded"));
    }

    #[tokio::test]
    async fn test_complete_reports_shape_drift() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_body(r#"{"result": {"text": "moved"}}"#)
            .create_async()
            .await;

        let result = gateway(server.url())
            .complete("chat/completions", &json!({}))
            .await;

        match result {
            Err(Error::ContentNotFound { paths }) => {
                assert!(paths.contains(&"choices[0].message.content".to_string()));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_complete_malformed_body() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_body("<html>gateway timeout</html>")
            .create_async()
            .await;

        let result = gateway(server.url())
            .complete("chat/completions", &json!({}))
            .await;

        assert!(
            matches!(result, Err(Error::MalformedResponse { ref excerpt, .. }) if excerpt.contains("gateway timeout"))
        );
    }

    #[tokio::test]
    async fn test_complete_binary() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/images")
            .with_status(200)
            .with_body(r#"{"data": [{"b64_json": "iVBORw=="}]}"#)
            .create_async()
            .await;

        let provider = ProviderProfile::new("img", server.url()).with_content_paths(["data[0].b64_json"]);
        let client = HttpClient::from_config(&ClientConfig::default()).unwrap();
        let bytes = Gateway::new(client, provider)
            .complete_binary("images", &json!({"prompt": "cat"}))
            .await
            .unwrap();

        assert_eq!(bytes, vec![0x89, b'P', b'N', b'G']);
    }

    #[tokio::test]
    async fn test_fetch() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/models")
            .with_status(200)
            .with_body(r#"{"data": [{"id": "m1"}]}"#)
            .create_async()
            .await;

        let value = gateway(server.url()).fetch("models").await.unwrap();
        assert_eq!(value["data"][0]["id"], "m1");
    }

    #[tokio::test]
    async fn test_upload() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/audio/transcriptions")
            .match_body(Matcher::Regex("filename=\"speech.wav\"".to_string()))
            .with_status(200)
            .with_body(r#"{"text": "hi there"}"#)
            .create_async()
            .await;

        let provider = ProviderProfile::new("stt", server.url())
            .with_content_paths(["text"])
            .with_error_paths(["error.message"]);
        let client = HttpClient::from_config(&ClientConfig::default()).unwrap();
        let attachment = Attachment::new(b"RIFF".to_vec(), "audio/wav", "speech.wav");

        let text = Gateway::new(client, provider)
            .upload("audio/transcriptions", &attachment)
            .await
            .unwrap();

        assert_eq!(text, "hi there");
    }

    #[tokio::test]
    async fn test_upload_keeps_multipart_content_type() {
        // --- Setup Mock Server ---
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/audio/transcriptions")
            .match_header(
                "content-type",
                Matcher::Regex("^multipart/form-data; boundary=.+$".to_string()),
            )
            .with_status(200)
            .with_body(r#"{"text": "still multipart"}"#)
            .expect(1)
            .create_async()
            .await;

        let provider = ProviderProfile::new("stt", server.url())
            .header("Content-Type", "application/json")
            .unwrap()
            .with_content_paths(["text"]);
        let client = HttpClient::from_config(&ClientConfig::default()).unwrap();
        let attachment = Attachment::new(b"RIFF".to_vec(), "audio/wav", "speech.wav");

        // --- Execute ---
        let text = Gateway::new(client, provider)
            .upload("audio/transcriptions", &attachment)
            .await
            .unwrap();

        // --- Verify ---
        mock.assert_async().await;
        assert_eq!(text, "still multipart");
    }

    #[tokio::test]
    async fn test_stream_text_until_done() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_header("content-type", "text/event-stream")
            .with_body(concat!(
                "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n",
                "data: {\"choices\":[{\"delta\":{\"content\":\"Hello\"}}]}\n\n",
                "data: {\"choices\":[{\"delta\":{\"content\":\" world\"}}]}\n\n",
                "data: [DONE]\n\n",
                "data: {\"choices\":[{\"delta\":{\"content\":\"ignored\"}}]}\n\n",
            ))
            .create_async()
            .await;

        let mut text = String::new();
        gateway(server.url())
            .stream_text("chat/completions", &json!({"stream": true}), |delta| {
                text.push_str(delta);
                true
            })
            .await
            .unwrap();

        assert_eq!(text, "Hello world");
    }

    #[tokio::test]
    async fn test_stream_text_error_event() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_body(concat!(
                "data: {\"choices\":[{\"delta\":{\"content\":\"partial\"}}]}\n\n",
                "data: {\"error\":{\"message\":\"context length exceeded\"}}\n\n",
            ))
            .create_async()
            .await;

        let mut text = String::new();
        let result = gateway(server.url())
            .stream_text("chat/completions", &json!({}), |delta| {
                text.push_str(delta);
                true
            })
            .await;

        assert!(matches!(result, Err(Error::Api(ref m)) if m == "context length exceeded"));
        assert_eq!(text, "partial");
    }
}
