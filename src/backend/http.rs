//! `HttpBackend`: the [`Backend`] implementation over the assistant's HTTP
//! API.
//!
//! All connection details come from [`AppConfig`]; nothing is hardcoded
//! beyond the endpoint paths themselves.  Every response goes through the
//! decoders in [`super::types`] so a shape mismatch surfaces as
//! [`BackendError::Malformed`] instead of a silently wrong value.

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Url;

use super::types::{
    decode_prediction, decode_report, decode_roster, decode_text_field, decode_thread,
    decode_transcription, error_message, ContextBody,
};
use super::{Backend, BackendError, Prediction, Report, ResetRequest, Transcription};
use crate::audio::AudioClip;
use crate::capture::SelectedFile;
use crate::config::AppConfig;
use crate::session::{Context, Thread, ThreadId, UserId};

/// Calls the backend's REST endpoints with a shared `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: Url,
    language: String,
}

impl HttpBackend {
    /// Build an `HttpBackend` from application config.
    ///
    /// The HTTP client is pre-configured with the per-request timeout from
    /// `backend.timeout_secs`.
    pub fn from_config(config: &AppConfig) -> Result<Self, BackendError> {
        let base_url = Url::parse(config.backend.base_url.trim())
            .map_err(|e| BackendError::InvalidUrl(format!("{}: {e}", config.backend.base_url)))?;
        if base_url.cannot_be_a_base() {
            return Err(BackendError::InvalidUrl(config.backend.base_url.clone()));
        }

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.backend.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url,
            language: config.transcription.language.clone(),
        })
    }

    /// Base URL joined with percent-encoded path segments.
    ///
    /// `.` and `..` are dot segments even when percent-encoded, so the URL
    /// parser would silently drop them; they are rejected instead.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, BackendError> {
        if let Some(dots) = segments.iter().find(|s| matches!(**s, "." | "..")) {
            return Err(BackendError::UnaddressableSegment(dots.to_string()));
        }
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| BackendError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Check the status and parse the body as JSON.
    async fn read_json(response: reqwest::Response) -> Result<serde_json::Value, BackendError> {
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(BackendError::Status {
                status: status.as_u16(),
                message: error_message(&body),
            });
        }

        serde_json::from_str(&body).map_err(|e| BackendError::Parse(e.to_string()))
    }

    async fn get_json(&self, url: Url) -> Result<serde_json::Value, BackendError> {
        log::debug!("backend: GET {url}");
        let response = self.client.get(url).send().await?;
        Self::read_json(response).await
    }

    async fn post_form(&self, url: Url, form: Form) -> Result<serde_json::Value, BackendError> {
        log::debug!("backend: POST {url} (multipart)");
        let response = self.client.post(url).multipart(form).send().await?;
        Self::read_json(response).await
    }
}

fn file_part(bytes: Vec<u8>, name: &str, content_type: &str) -> Result<Part, BackendError> {
    Part::bytes(bytes)
        .file_name(name.to_string())
        .mime_str(content_type)
        .map_err(BackendError::from)
}

#[async_trait]
impl Backend for HttpBackend {
    async fn list_threads(&self, user: &UserId) -> Result<Vec<Thread>, BackendError> {
        let url = self.endpoint(&["allChats", user.as_str()])?;
        decode_roster(self.get_json(url).await?)
    }

    async fn fetch_thread(&self, id: &ThreadId) -> Result<Thread, BackendError> {
        let url = self.endpoint(&["chatById", id.as_str()])?;
        decode_thread(self.get_json(url).await?)
    }

    async fn push_context(&self, context: &Context) -> Result<(), BackendError> {
        let url = self.endpoint(&["setContext"])?;
        log::debug!("backend: POST {url} (context len={})", context.len());
        let response = self
            .client
            .post(url)
            .json(&ContextBody { context })
            .send()
            .await?;
        Self::read_json(response).await.map(|_| ())
    }

    async fn latest_report(&self, user: &UserId) -> Result<Option<Report>, BackendError> {
        let url = self.endpoint(&["latestReport", user.as_str()])?;
        decode_report(self.get_json(url).await?)
    }

    async fn reset_memory(&self, request: &ResetRequest) -> Result<String, BackendError> {
        let url = self.endpoint(&["reset"])?;
        log::debug!(
            "backend: POST {url} (user={}, {} messages)",
            request.user_id,
            request.messages.len()
        );
        let response = self.client.post(url).json(request).send().await?;
        let json = Self::read_json(response).await?;
        decode_text_field(&json, "message")
    }

    async fn classify_image(&self, file: &SelectedFile) -> Result<Prediction, BackendError> {
        let url = self.endpoint(&["predict"])?;
        let form = Form::new().part(
            "file",
            file_part(file.bytes.clone(), &file.name, &file.content_type)?,
        );
        decode_prediction(self.post_form(url, form).await?)
    }

    async fn transcribe(&self, clip: &AudioClip) -> Result<Transcription, BackendError> {
        // The route is registered with a trailing slash.
        let mut url = self.endpoint(&["transcribe", ""])?;
        url.query_pairs_mut().append_pair("language", &self.language);

        let form = Form::new().part(
            "file",
            file_part(clip.wav.clone(), AudioClip::FILE_NAME, AudioClip::MIME_TYPE)?,
        );
        let transcription = decode_transcription(self.post_form(url, form).await?)?;
        log::debug!(
            "backend: transcribed {:.1}s clip, detected language {:?}",
            clip.duration_secs,
            transcription.detected_language
        );
        Ok(transcription)
    }

    async fn chat(&self, prompt: &str) -> Result<String, BackendError> {
        let url = self.endpoint(&["chat", prompt])?;
        log::debug!("backend: POST /chat (prompt len={})", prompt.len());
        let response = self.client.post(url).send().await?;
        let json = Self::read_json(response).await?;
        decode_text_field(&json, "response")
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(base_url: &str) -> HttpBackend {
        let mut config = AppConfig::default();
        config.backend.base_url = base_url.into();
        HttpBackend::from_config(&config).expect("valid config")
    }

    #[test]
    fn endpoints_join_onto_base() {
        let b = backend("http://localhost:8000");
        assert_eq!(
            b.endpoint(&["allChats", "u1"]).unwrap().as_str(),
            "http://localhost:8000/allChats/u1"
        );
    }

    #[test]
    fn endpoints_respect_base_path() {
        let b = backend("http://example.com/api/");
        assert_eq!(
            b.endpoint(&["setContext"]).unwrap().as_str(),
            "http://example.com/api/setContext"
        );
    }

    #[test]
    fn chat_prompt_is_percent_encoded_as_one_segment() {
        let b = backend("http://localhost:8000");
        assert_eq!(
            b.endpoint(&["chat", "rust on wheat?"]).unwrap().as_str(),
            "http://localhost:8000/chat/rust%20on%20wheat%3F"
        );
        assert_eq!(
            b.endpoint(&["chat", "a/b"]).unwrap().as_str(),
            "http://localhost:8000/chat/a%2Fb"
        );
    }

    #[test]
    fn dot_segments_are_rejected() {
        let b = backend("http://localhost:8000");
        assert_eq!(
            b.endpoint(&["chat", "."]).unwrap_err(),
            BackendError::UnaddressableSegment(".".into())
        );
        assert_eq!(
            b.endpoint(&["chat", ".."]).unwrap_err(),
            BackendError::UnaddressableSegment("..".into())
        );
        assert_eq!(
            b.endpoint(&["chat", "..."]).unwrap().as_str(),
            "http://localhost:8000/chat/..."
        );
    }

    #[test]
    fn transcribe_route_keeps_trailing_slash() {
        let b = backend("http://localhost:8000");
        assert_eq!(
            b.endpoint(&["transcribe", ""]).unwrap().as_str(),
            "http://localhost:8000/transcribe/"
        );
    }

    #[test]
    fn invalid_base_url_is_rejected() {
        let mut config = AppConfig::default();
        config.backend.base_url = "not a url".into();
        assert!(matches!(
            HttpBackend::from_config(&config),
            Err(BackendError::InvalidUrl(_))
        ));

        config.backend.base_url = "mailto:someone@example.com".into();
        assert!(matches!(
            HttpBackend::from_config(&config),
            Err(BackendError::InvalidUrl(_))
        ));
    }

    /// `HttpBackend` is usable as `dyn Backend`.
    #[test]
    fn backend_is_object_safe() {
        let b: Box<dyn Backend> = Box::new(backend("http://localhost:8000"));
        drop(b);
    }

    // -- against a local HTTP server ------------------------------------------

    #[tokio::test]
    async fn error_body_becomes_status_message() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/predict")
            .with_status(400)
            .with_header("content-type", "application/json")
            .with_body(r#"{"error": "Invalid image"}"#)
            .create_async()
            .await;

        let b = backend(&server.url());
        let file = SelectedFile::from_bytes("leaf.png", "image/png", vec![1, 2, 3]);
        assert_eq!(
            b.classify_image(&file).await.unwrap_err(),
            BackendError::Status {
                status: 400,
                message: "Invalid image".into(),
            }
        );
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn missing_thread_reports_detail() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/chatById/665f1c")
            .with_status(404)
            .with_body(r#"{"detail": "Chat not found"}"#)
            .create_async()
            .await;

        let b = backend(&server.url());
        assert_eq!(
            b.fetch_thread(&ThreadId::from("665f1c")).await.unwrap_err(),
            BackendError::Status {
                status: 404,
                message: "Chat not found".into(),
            }
        );
    }

    #[tokio::test]
    async fn roster_is_decoded_from_response() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/allChats/u1")
            .with_body(
                r#"[{"_id": {"$oid": "b"}, "name": "Wheat", "context": "C2",
                     "messages": [{"type": "user", "text": "hi"}]}]"#,
            )
            .create_async()
            .await;

        let threads = backend(&server.url())
            .list_threads(&UserId::from("u1"))
            .await
            .unwrap();
        assert_eq!(threads.len(), 1);
        assert_eq!(threads[0].id.as_str(), "b");
        assert_eq!(threads[0].context, Context::from("C2"));
    }

    #[tokio::test]
    async fn non_json_success_is_a_parse_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/latestReport/u1")
            .with_body("<html>gateway</html>")
            .create_async()
            .await;

        let err = backend(&server.url())
            .latest_report(&UserId::from("u1"))
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::Parse(_)));
    }

    #[tokio::test]
    async fn transcribe_uploads_wav_with_language() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/transcribe/")
            .match_query(mockito::Matcher::UrlEncoded(
                "language".into(),
                "hi".into(),
            ))
            .match_header(
                "content-type",
                mockito::Matcher::Regex("^multipart/form-data".into()),
            )
            .match_body(mockito::Matcher::Regex(
                r#"name="file"; filename="recording.wav""#.into(),
            ))
            .with_body(r#"{"transcription": " gehun mein rust ", "detected_language": "hi"}"#)
            .create_async()
            .await;

        let mut config = AppConfig::default();
        config.backend.base_url = server.url();
        config.transcription.language = "hi".into();
        let b = HttpBackend::from_config(&config).unwrap();
        let clip = AudioClip {
            wav: vec![0; 64],
            sample_rate: 16_000,
            duration_secs: 1.0,
        };

        let t = b.transcribe(&clip).await.unwrap();
        assert_eq!(t.text, "gehun mein rust");
        assert_eq!(t.detected_language.as_deref(), Some("hi"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn reset_posts_archived_conversation() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/reset")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({
                "user_id": "u1",
                "context": "C2",
            })))
            .with_body(r#"{"message": "Conversation reset successfully"}"#)
            .create_async()
            .await;

        let request = ResetRequest {
            user_id: UserId::from("u1"),
            messages: Vec::new(),
            context: Context::from("C2"),
        };
        let message = backend(&server.url()).reset_memory(&request).await.unwrap();
        assert_eq!(message, "Conversation reset successfully");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn chat_sends_prompt_in_path() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/rust%20on%20wheat%3F")
            .with_body(r#"{"response": "Use a fungicide."}"#)
            .create_async()
            .await;

        let reply = backend(&server.url()).chat("rust on wheat?").await.unwrap();
        assert_eq!(reply, "Use a fungicide.");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn dot_prompt_is_not_sent() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", mockito::Matcher::Any)
            .expect(0)
            .create_async()
            .await;

        let b = backend(&server.url());
        assert_eq!(
            b.chat(".").await.unwrap_err(),
            BackendError::UnaddressableSegment(".".into())
        );
        assert!(b.chat("..").await.is_err());
        mock.assert_async().await;
    }
}
