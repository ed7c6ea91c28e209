//! WebDriver-protocol interaction surface
//!
//! Drives a browser through a W3C WebDriver endpoint (chromedriver,
//! geckodriver, or a remote grid). Only the handful of commands the
//! verification state machine needs are implemented.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::{Client, Method};
use serde_json::{json, Value};

use crate::surface::{
    ElementHandle, InteractionSurface, LocateBy, Locator, SurfaceError, TableGrid,
};

/// Key W3C uses to wrap element ids in responses
const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";

/// Script backing `read_tables`: data-cell text of every table, per row
const TABLE_SCRIPT: &str = "return Array.from(document.querySelectorAll('table')).map(t => \
     Array.from(t.rows).map(r => \
     Array.from(r.querySelectorAll('td')).map(c => c.innerText.trim())));";

/// Interaction surface speaking the W3C WebDriver REST protocol
pub struct WebDriverSurface {
    client: Client,
    base: String,
    session_id: String,
}

impl WebDriverSurface {
    /// Open a fresh browser session against a WebDriver server.
    pub async fn connect(server_url: &str) -> Result<Self, SurfaceError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| SurfaceError::Protocol(format!("Failed to create HTTP client: {e}")))?;

        let base = server_url.trim_end_matches('/').to_string();
        let body = json!({ "capabilities": { "alwaysMatch": {} } });
        let value = request(&client, Method::POST, &format!("{base}/session"), Some(body)).await?;

        let session_id = value
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| SurfaceError::Protocol("Session response missing sessionId".into()))?
            .to_string();

        tracing::info!(session = %session_id, server = %base, "WebDriver session opened");
        Ok(Self {
            client,
            base,
            session_id,
        })
    }

    /// End the browser session. Call on every exit path; the surface holds
    /// a real browser on the other end.
    pub async fn close(&mut self) -> Result<(), SurfaceError> {
        self.command(Method::DELETE, "", None).await?;
        tracing::info!(session = %self.session_id, "WebDriver session closed");
        Ok(())
    }

    async fn command(
        &self,
        method: Method,
        tail: &str,
        body: Option<Value>,
    ) -> Result<Value, SurfaceError> {
        let url = format!("{}/session/{}{}", self.base, self.session_id, tail);
        request(&self.client, method, &url, body).await
    }

}

fn element_from(value: &Value, locator: &Locator) -> Result<ElementHandle, SurfaceError> {
    value
        .get(ELEMENT_KEY)
        .and_then(Value::as_str)
        .map(|id| ElementHandle(id.to_string()))
        .ok_or_else(|| SurfaceError::NotFound(locator.to_string()))
}

/// Translate a locator to the W3C `using`/`value` pair. `name` lookups are
/// expressed as CSS attribute selectors; W3C dropped the name strategy.
fn using_value(locator: &Locator) -> (&'static str, String) {
    match locator.by {
        LocateBy::Name => ("css selector", format!("[name='{}']", locator.value)),
        LocateBy::Css => ("css selector", locator.value.clone()),
        LocateBy::Xpath => ("xpath", locator.value.clone()),
    }
}

async fn request(
    client: &Client,
    method: Method,
    url: &str,
    body: Option<Value>,
) -> Result<Value, SurfaceError> {
    let is_post = method == Method::POST;
    let mut req = client.request(method, url);
    if let Some(body) = body {
        req = req.json(&body);
    } else if is_post {
        // WebDriver requires a JSON body on every POST
        req = req.json(&json!({}));
    }

    let response = req
        .send()
        .await
        .map_err(|e| SurfaceError::Protocol(format!("WebDriver request failed: {e}")))?;

    let status = response.status();
    let payload: Value = response
        .json()
        .await
        .map_err(|e| SurfaceError::Protocol(format!("Invalid WebDriver response: {e}")))?;
    let value = payload.get("value").cloned().unwrap_or(Value::Null);

    if !status.is_success() {
        let error = value.get("error").and_then(Value::as_str).unwrap_or("");
        let message = value
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown WebDriver error")
            .to_string();
        return Err(match error {
            "no such element" | "no such alert" => SurfaceError::NotFound(message),
            "unexpected alert open" => SurfaceError::Interruption(message),
            _ => SurfaceError::Protocol(format!("{error}: {message}")),
        });
    }

    Ok(value)
}

#[async_trait]
impl InteractionSurface for WebDriverSurface {
    async fn navigate(&mut self, url: &str) -> Result<(), SurfaceError> {
        self.command(Method::POST, "/url", Some(json!({ "url": url })))
            .await
            .map_err(|e| match e {
                SurfaceError::Protocol(m) => SurfaceError::Navigation(m),
                other => other,
            })?;
        Ok(())
    }

    async fn locate(&mut self, locator: &Locator) -> Result<ElementHandle, SurfaceError> {
        let (using, value) = using_value(locator);
        let result = self
            .command(
                Method::POST,
                "/element",
                Some(json!({ "using": using, "value": value })),
            )
            .await
            .map_err(|e| match e {
                SurfaceError::NotFound(_) => SurfaceError::NotFound(locator.to_string()),
                other => other,
            })?;
        element_from(&result, locator)
    }

    async fn clear(&mut self, element: &ElementHandle) -> Result<(), SurfaceError> {
        self.command(Method::POST, &format!("/element/{}/clear", element.0), None)
            .await?;
        Ok(())
    }

    async fn type_text(
        &mut self,
        element: &ElementHandle,
        text: &str,
    ) -> Result<(), SurfaceError> {
        self.command(
            Method::POST,
            &format!("/element/{}/value", element.0),
            Some(json!({ "text": text })),
        )
        .await?;
        Ok(())
    }

    async fn click(&mut self, element: &ElementHandle) -> Result<(), SurfaceError> {
        self.command(Method::POST, &format!("/element/{}/click", element.0), None)
            .await?;
        Ok(())
    }

    async fn select_option(
        &mut self,
        element: &ElementHandle,
        option: &str,
    ) -> Result<(), SurfaceError> {
        let xpath = format!(".//option[normalize-space(text())='{option}']");
        let result = self
            .command(
                Method::POST,
                &format!("/element/{}/element", element.0),
                Some(json!({ "using": "xpath", "value": xpath })),
            )
            .await?;
        let locator = Locator::xpath(xpath);
        let option_el = element_from(&result, &locator)?;
        self.click(&option_el).await
    }

    async fn read_text(&mut self, element: &ElementHandle) -> Result<String, SurfaceError> {
        let value = self
            .command(Method::GET, &format!("/element/{}/text", element.0), None)
            .await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn read_text_all(&mut self, locator: &Locator) -> Result<Vec<String>, SurfaceError> {
        let (using, value) = using_value(locator);
        let result = self
            .command(
                Method::POST,
                "/elements",
                Some(json!({ "using": using, "value": value })),
            )
            .await?;

        let handles: Vec<ElementHandle> = result
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| item.get(ELEMENT_KEY))
                    .filter_map(Value::as_str)
                    .map(|id| ElementHandle(id.to_string()))
                    .collect()
            })
            .unwrap_or_default();

        let mut texts = Vec::with_capacity(handles.len());
        for handle in &handles {
            texts.push(self.read_text(handle).await?);
        }
        Ok(texts)
    }

    async fn read_tables(&mut self) -> Result<Vec<TableGrid>, SurfaceError> {
        let value = self
            .command(
                Method::POST,
                "/execute/sync",
                Some(json!({ "script": TABLE_SCRIPT, "args": [] })),
            )
            .await?;
        serde_json::from_value(value)
            .map_err(|e| SurfaceError::Protocol(format!("Unexpected table script result: {e}")))
    }

    async fn current_markup(&mut self) -> Result<String, SurfaceError> {
        let value = self.command(Method::GET, "/source", None).await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn dismiss_interruption(&mut self) -> Result<Option<String>, SurfaceError> {
        match self.command(Method::GET, "/alert/text", None).await {
            Ok(value) => {
                let text = value.as_str().unwrap_or_default().to_string();
                self.command(Method::POST, "/alert/accept", None).await?;
                Ok(Some(text))
            }
            Err(SurfaceError::NotFound(_)) => Ok(None),
            Err(other) => Err(other),
        }
    }

    async fn capture_snapshot(&mut self, path: &Path) -> Result<(), SurfaceError> {
        let value = self.command(Method::GET, "/screenshot", None).await?;
        let encoded = value.as_str().unwrap_or_default();
        let bytes = STANDARD
            .decode(encoded)
            .map_err(|e| SurfaceError::Protocol(format!("Invalid screenshot payload: {e}")))?;
        tokio::fs::write(path, bytes).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn surface_for(server: &MockServer) -> WebDriverSurface {
        Mock::given(method("POST"))
            .and(path("/session"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "value": { "sessionId": "s1", "capabilities": {} }
            })))
            .mount(server)
            .await;
        WebDriverSurface::connect(&server.uri()).await.unwrap()
    }

    #[tokio::test]
    async fn connect_extracts_the_session_id() {
        let server = MockServer::start().await;
        let surface = surface_for(&server).await;
        assert_eq!(surface.session_id, "s1");
    }

    #[tokio::test]
    async fn missing_element_maps_to_not_found() {
        let server = MockServer::start().await;
        let mut surface = surface_for(&server).await;

        Mock::given(method("POST"))
            .and(path("/session/s1/element"))
            .respond_with(ResponseTemplate::new(404).set_body_json(serde_json::json!({
                "value": { "error": "no such element", "message": "nope" }
            })))
            .mount(&server)
            .await;

        let err = surface.locate(&Locator::name("url")).await.unwrap_err();
        match err {
            SurfaceError::NotFound(desc) => assert_eq!(desc, "name=url"),
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn pending_alert_maps_to_interruption() {
        let server = MockServer::start().await;
        let mut surface = surface_for(&server).await;

        Mock::given(method("POST"))
            .and(path("/session/s1/url"))
            .respond_with(ResponseTemplate::new(500).set_body_json(serde_json::json!({
                "value": { "error": "unexpected alert open", "message": "alert in the way" }
            })))
            .mount(&server)
            .await;

        let err = surface.navigate("https://example.com").await.unwrap_err();
        assert!(err.is_interruption(), "expected interruption, got {err:?}");
    }

    #[tokio::test]
    async fn dismiss_interruption_accepts_a_pending_alert() {
        let server = MockServer::start().await;
        let mut surface = surface_for(&server).await;

        Mock::given(method("GET"))
            .and(path("/session/s1/alert/text"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "value": "are you sure?"
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/session/s1/alert/accept"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "value": null
            })))
            .mount(&server)
            .await;

        let text = surface.dismiss_interruption().await.unwrap();
        assert_eq!(text.as_deref(), Some("are you sure?"));
    }

    #[tokio::test]
    async fn dismiss_interruption_is_none_without_an_alert() {
        let server = MockServer::start().await;
        let mut surface = surface_for(&server).await;

        Mock::given(method("GET"))
            .and(path("/session/s1/alert/text"))
            .respond_with(ResponseTemplate::new(404).set_body_json(serde_json::json!({
                "value": { "error": "no such alert", "message": "no alert open" }
            })))
            .mount(&server)
            .await;

        assert_eq!(surface.dismiss_interruption().await.unwrap(), None);
    }

    #[tokio::test]
    async fn read_tables_parses_the_script_result() {
        let server = MockServer::start().await;
        let mut surface = surface_for(&server).await;

        Mock::given(method("POST"))
            .and(path("/session/s1/execute/sync"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "value": [[[], ["x", "Malicious"]]]
            })))
            .mount(&server)
            .await;

        let tables = surface.read_tables().await.unwrap();
        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0][1], vec!["x", "Malicious"]);
    }
}
