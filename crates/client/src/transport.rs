//! LIMSML transport layer.
//!
//! The session client only needs "send raw XML, get raw XML back"; this
//! module defines that contract and the SOAP/HTTP binding the LIMSML web
//! service speaks.

use async_trait::async_trait;
use quick_xml::escape::{escape, unescape};
use regex::Regex;

/// SOAPAction header value for the LIMSML `Process` operation.
const SOAP_ACTION: &str = "http://www.thermo.com/informatics/xmlns/limswebservice/Process";

/// Namespace of the `Process` wrapper element.
const PROCESS_XMLNS: &str = "http://www.thermo.com/informatics/xmlns/limswebservice";

/// Trait for LIMSML transports.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends a serialized LIMSML request document and returns the raw LIMSML
    /// response XML.
    async fn send(&self, request_xml: &str) -> Result<String, TransportError>;
}

/// Errors that can occur during transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("HTTP: {0}")]
    Http(#[from] reqwest::Error),

    #[error("SOAP request failed: response code = {0}")]
    Status(u16),

    #[error("SOAP response did not contain a ProcessResult element")]
    MissingResult,

    #[error("malformed SOAP payload: {0}")]
    Malformed(String),
}

/// SOAP transport: POSTs the LIMSML document to the web service's `Process`
/// operation and unwraps the entity-encoded `ProcessResult` payload from the
/// reply.
pub struct SoapTransport {
    url: String,
    http: reqwest::Client,
    result_pattern: Regex,
}

impl SoapTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            http: reqwest::Client::new(),
            result_pattern: Regex::new(r"(?is)<ProcessResult>(.*)</ProcessResult>")
                .expect("ProcessResult pattern is valid"),
        }
    }

    /// Wraps the LIMSML document in the SOAP envelope. The inner XML rides
    /// entity-encoded inside the `request` element.
    fn envelope(&self, request_xml: &str) -> String {
        format!(
            concat!(
                r#"<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/">"#,
                r#"<s:Body><Process xmlns="{xmlns}"><request>{request}</request>"#,
                r#"</Process></s:Body></s:Envelope>"#,
            ),
            xmlns = PROCESS_XMLNS,
            request = escape(request_xml),
        )
    }

    /// Pulls the LIMSML payload back out of the SOAP reply.
    fn extract(&self, body: &str) -> Result<String, TransportError> {
        let captures = self
            .result_pattern
            .captures(body)
            .ok_or(TransportError::MissingResult)?;
        let encoded = captures.get(1).map(|m| m.as_str()).unwrap_or_default();
        unescape(encoded)
            .map(|cow| cow.into_owned())
            .map_err(|e| TransportError::Malformed(e.to_string()))
    }
}

#[async_trait]
impl Transport for SoapTransport {
    async fn send(&self, request_xml: &str) -> Result<String, TransportError> {
        tracing::debug!(url = %self.url, bytes = request_xml.len(), "sending SOAP request");
        let response = self
            .http
            .post(&self.url)
            .header("Content-Type", "text/xml; charset=utf-8")
            .header("SOAPAction", SOAP_ACTION)
            .body(self.envelope(request_xml))
            .send()
            .await?;

        // A non-success status is a hard failure; nothing is decoded.
        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status(status.as_u16()));
        }

        let body = response.text().await?;
        self.extract(&body)
    }
}
