//! The seam between the reconnection engine and the wire.

use eventsource_client::{self as es, Client};
use futures_util::stream::{BoxStream, StreamExt};
use log::*;
use reqwest::header::HeaderMap;

use crate::error::{transport_error, Error};

/// What an open connection yields, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The host accepted the request and the stream is live.
    Open,
    /// A dispatched event. `data` is the raw `data:` payload.
    Message { event_type: String, data: String },
    /// A comment line, sent by the host to keep the connection warm.
    KeepAlive,
}

/// An open connection. The stream ending means the connection closed.
pub type EventStream = BoxStream<'static, Result<TransportEvent, Error>>;

/// Opens one underlying connection per call and never retries on its own.
pub trait Transport: Send + Sync {
    fn open(&self, url: &str, headers: &HeaderMap) -> Result<EventStream, Error>;
}

/// Production transport over `eventsource-client`.
#[derive(Debug, Default, Clone)]
pub struct EventSourceTransport;

impl EventSourceTransport {
    pub fn new() -> Self {
        Self
    }
}

impl Transport for EventSourceTransport {
    fn open(&self, url: &str, headers: &HeaderMap) -> Result<EventStream, Error> {
        let mut builder = es::ClientBuilder::for_url(url)
            .map_err(|err| transport_error(&format!("invalid stream url {url}: {err:?}")))?;

        for (name, value) in headers.iter() {
            let value = value
                .to_str()
                .map_err(|_| transport_error(&format!("header {} is not visible ASCII", name)))?;
            builder = builder
                .header(name.as_str(), value)
                .map_err(|err| transport_error(&format!("rejected header {}: {err:?}", name)))?;
        }

        // The engine owns reconnection
        let client = builder
            .reconnect(es::ReconnectOptions::reconnect(false).build())
            .build();
        trace!("Opening event source to {url}");

        let stream = client.stream().map(|item| match item {
            Ok(es::SSE::Connected(_)) => Ok(TransportEvent::Open),
            Ok(es::SSE::Event(event)) => Ok(TransportEvent::Message {
                event_type: event.event_type,
                data: event.data,
            }),
            Ok(es::SSE::Comment(_)) => Ok(TransportEvent::KeepAlive),
            Err(err) => Err(transport_error(&format!("{err:?}"))),
        });

        Ok(stream.boxed())
    }
}
