use super::{InboundMessage, TranslatedEvent, SPEC_VERSION};
use chrono::{SecondsFormat, Utc};
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use reqwest::StatusCode;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Successful delivery: the sink answered with a 2xx status.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Delivered {
    pub status: StatusCode,
}

/// A translated event the sink did not accept.
///
/// Reported per message. Never tears down the connection that produced it.
#[derive(Debug, Error)]
pub enum UndeliveredEvent {
    #[error("sink url '{url}' is not valid")]
    InvalidSink { url: String },

    #[error("sink {url} unreachable: {source}")]
    Unreachable {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("sink {url} timed out")]
    TimedOut { url: String },

    #[error("sink {url} rejected event with status {status}")]
    Rejected { url: String, status: StatusCode },
}

pub type DeliveryResult = Result<Delivered, UndeliveredEvent>;

/// Delivers translated events over HTTP.
///
/// Cheap to clone; all clones share one connection pool.
#[derive(Clone, Debug)]
pub struct EventTranslator {
    http_client: reqwest::Client,
}

impl EventTranslator {
    /// Creates a translator whose requests time out after `timeout`.
    pub fn new(timeout: Duration) -> reqwest::Result<Self> {
        let http_client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http_client })
    }

    /// Translates `message` and delivers it to `sink_url`.
    ///
    /// No retries: a failed delivery is returned to the caller as
    /// [`UndeliveredEvent`].
    pub async fn translate(&self, message: &InboundMessage, sink_url: &str) -> DeliveryResult {
        let event = TranslatedEvent::from_message(message);
        self.deliver(&event, sink_url).await
    }

    /// Sends one event in CloudEvents HTTP binary content mode.
    pub async fn deliver(&self, event: &TranslatedEvent, sink_url: &str) -> DeliveryResult {
        let url = reqwest::Url::parse(sink_url).map_err(|_| UndeliveredEvent::InvalidSink {
            url: sink_url.to_string(),
        })?;

        let time = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);

        let response = self
            .http_client
            .post(url)
            .header("ce-specversion", SPEC_VERSION)
            .header("ce-id", encode_header_value(&event.id))
            .header("ce-source", encode_header_value(&event.source))
            .header("ce-type", encode_header_value(&event.event_type))
            .header("ce-time", time)
            .header("content-type", event.content_type)
            .body(event.body.clone())
            .send()
            .await
            .map_err(|e| classify_send_error(sink_url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(UndeliveredEvent::Rejected {
                url: sink_url.to_string(),
                status,
            });
        }

        debug!(
            sink = %sink_url,
            event_id = %event.id,
            status = status.as_u16(),
            "Event delivered"
        );

        Ok(Delivered { status })
    }
}

fn classify_send_error(url: &str, e: reqwest::Error) -> UndeliveredEvent {
    if e.is_timeout() {
        UndeliveredEvent::TimedOut {
            url: url.to_string(),
        }
    } else {
        UndeliveredEvent::Unreachable {
            url: url.to_string(),
            source: e,
        }
    }
}

/// Characters percent-encoded in `ce-*` header values, on top of controls
/// and non-ASCII.
const CE_HEADER: &AsciiSet = &CONTROLS.add(b' ').add(b'"').add(b'%');

/// Percent-encodes a CloudEvents attribute for use as an HTTP header value.
pub(crate) fn encode_header_value(value: &str) -> String {
    utf8_percent_encode(value, CE_HEADER).to_string()
}

#[cfg(test)]
mod encoding_tests {
    use super::*;

    #[test]
    fn test_plain_ascii_is_unchanged() {
        assert_eq!(encode_header_value("com.example.sensor"), "com.example.sensor");
        assert_eq!(encode_header_value(""), "");
    }

    #[test]
    fn test_reserved_and_non_ascii_are_encoded() {
        assert_eq!(encode_header_value("a b"), "a%20b");
        assert_eq!(encode_header_value("100%"), "100%25");
        assert_eq!(encode_header_value("\"q\""), "%22q%22");
        assert_eq!(encode_header_value("é"), "%C3%A9");
        assert_eq!(encode_header_value("tab\there"), "tab%09here");
    }
}
