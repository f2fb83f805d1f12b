//! HTTP forwarder built on a shared reqwest client.

use std::time::Duration;

use async_trait::async_trait;
use axum::body::Bytes;
use reqwest::header::CONTENT_TYPE;
use reqwest::{redirect, Client};
use tracing::{error, info};

use super::{ForwardError, ForwardReceipt, Forwarder, EVENT_ID_HEADER, EVENT_TYPE_HEADER};
use crate::event::{RelayTarget, WebhookEvent};
use crate::web::signature::SIGNATURE_HEADER;

#[derive(Debug, Clone)]
pub struct HttpForwarder {
    client: Client,
    timeout: Duration,
}

impl HttpForwarder {
    pub fn new(timeout: Duration) -> Result<Self, ForwardError> {
        // Never follow redirects: a 3xx is a failed delivery
        let client = Client::builder()
            .pool_max_idle_per_host(16)
            .redirect(redirect::Policy::none())
            .build()
            .map_err(|e| ForwardError::Transport(e.to_string()))?;

        Ok(Self { client, timeout })
    }
}

#[async_trait]
impl Forwarder for HttpForwarder {
    async fn forward(
        &self,
        target: &RelayTarget,
        raw_payload: &Bytes,
        signature_header: &str,
        event: Option<&WebhookEvent>,
    ) -> Result<ForwardReceipt, ForwardError> {
        info!(
            url = %target.url,
            body_length = raw_payload.len(),
            timeout_seconds = self.timeout.as_secs_f64(),
            "relay_forward_starting"
        );

        let mut request = self
            .client
            .post(&target.url)
            .timeout(self.timeout)
            .header(CONTENT_TYPE, "application/json")
            .header(SIGNATURE_HEADER, signature_header)
            .body(raw_payload.clone());

        if let Some(event) = event {
            request = request
                .header(EVENT_ID_HEADER, event.id.as_str())
                .header(EVENT_TYPE_HEADER, event.event_type.as_str());
        }

        match request.send().await {
            Ok(resp) => {
                let status = resp.status().as_u16();
                let is_success = resp.status().is_success();

                info!(
                    url = %target.url,
                    status_code = status,
                    is_success = is_success,
                    "relay_forward_complete"
                );

                if is_success {
                    Ok(ForwardReceipt { status })
                } else {
                    Err(ForwardError::Status(status))
                }
            }
            Err(e) => {
                if e.is_timeout() {
                    error!(
                        url = %target.url,
                        timeout_seconds = self.timeout.as_secs_f64(),
                        error = %e,
                        "relay_forward_timeout"
                    );
                    Err(ForwardError::Timeout(self.timeout))
                } else {
                    error!(url = %target.url, error = %e, "relay_forward_error");
                    Err(ForwardError::Transport(e.to_string()))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{body_bytes, header, method, path};
    use wiremock::Request;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::event::Environment;

    const BODY: &[u8] = br#"{"id":"evt_1","type":"invoice.paid","livemode":false}"#;
    const SIGNATURE: &str = "t=1700000000,v1=deadbeef";

    fn event() -> WebhookEvent {
        WebhookEvent {
            id: "evt_1".to_string(),
            event_type: "invoice.paid".to_string(),
            livemode: false,
            raw_payload: Bytes::from_static(BODY),
            signature_header: SIGNATURE.to_string(),
        }
    }

    fn header_value<'a>(request: &'a Request, name: &str) -> Option<&'a str> {
        request.headers.get(name).and_then(|v| v.to_str().ok())
    }

    fn target(server: &MockServer) -> RelayTarget {
        RelayTarget::new(format!("{}/hook", server.uri()), Environment::Test)
    }

    #[tokio::test]
    async fn test_forward_preserves_body_and_headers() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(header(EVENT_ID_HEADER, "evt_1"))
            .and(header(EVENT_TYPE_HEADER, "invoice.paid"))
            .and(header("content-type", "application/json"))
            .and(body_bytes(BODY))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&server)
            .await;

        let forwarder = HttpForwarder::new(Duration::from_secs(5)).unwrap();
        let event = event();
        let receipt = forwarder
            .forward(&target(&server), &event.raw_payload, SIGNATURE, Some(&event))
            .await
            .unwrap();

        assert_eq!(receipt.status, 202);

        // The signature contains a comma, so check it on the recorded request
        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(header_value(&requests[0], SIGNATURE_HEADER), Some(SIGNATURE));
        assert_eq!(requests[0].body, BODY);
    }

    #[tokio::test]
    async fn test_forward_without_event_metadata() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let forwarder = HttpForwarder::new(Duration::from_secs(5)).unwrap();
        let result = forwarder
            .forward(&target(&server), &Bytes::from_static(BODY), SIGNATURE, None)
            .await;

        assert!(result.is_ok());
        let requests = server.received_requests().await.unwrap();
        assert_eq!(header_value(&requests[0], SIGNATURE_HEADER), Some(SIGNATURE));
        assert!(requests[0].headers.get(EVENT_ID_HEADER).is_none());
        assert!(requests[0].headers.get(EVENT_TYPE_HEADER).is_none());
    }

    #[tokio::test]
    async fn test_forward_non_2xx_is_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .expect(1)
            .mount(&server)
            .await;

        let forwarder = HttpForwarder::new(Duration::from_secs(5)).unwrap();
        let err = forwarder
            .forward(&target(&server), &Bytes::from_static(BODY), SIGNATURE, None)
            .await
            .unwrap_err();

        assert!(matches!(err, ForwardError::Status(503)));
    }

    #[tokio::test]
    async fn test_forward_does_not_follow_redirects() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .respond_with(
                ResponseTemplate::new(302)
                    .insert_header("location", format!("{}/elsewhere", server.uri()).as_str()),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(path("/elsewhere"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let forwarder = HttpForwarder::new(Duration::from_secs(5)).unwrap();
        let err = forwarder
            .forward(&target(&server), &Bytes::from_static(BODY), SIGNATURE, None)
            .await
            .unwrap_err();

        assert!(matches!(err, ForwardError::Status(302)));
        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].url.path(), "/hook");
    }

    #[tokio::test]
    async fn test_forward_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
            .mount(&server)
            .await;

        let forwarder = HttpForwarder::new(Duration::from_millis(200)).unwrap();
        let err = forwarder
            .forward(&target(&server), &Bytes::from_static(BODY), SIGNATURE, None)
            .await
            .unwrap_err();

        assert!(matches!(err, ForwardError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_forward_connection_refused() {
        let forwarder = HttpForwarder::new(Duration::from_secs(2)).unwrap();
        let target = RelayTarget::new("http://127.0.0.1:1/hook", Environment::Test);

        let err = forwarder
            .forward(&target, &Bytes::from_static(BODY), SIGNATURE, None)
            .await
            .unwrap_err();

        assert!(matches!(err, ForwardError::Transport(_)));
    }
}
