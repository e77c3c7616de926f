//! Uploading any number of events as a series of requests that stay within
//! the limits of the V2 HTTP API or the Batch API.

use std::future::Future;

use futures::{StreamExt, TryStreamExt, stream};

use crate::client::Client;
use crate::error::Error;
use crate::models::event::Event;
use crate::models::response::UploadResponse;

/// Bytes reserved for everything in a request body that is not an event.
const ENVELOPE_BYTES: usize = 512;

/// The API an uploader sends its requests to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UploadApi {
    HttpV2,
    Batch,
}

impl UploadApi {
    pub fn limits(self) -> BatchLimits {
        match self {
            UploadApi::HttpV2 => BatchLimits {
                max_events: 2000,
                max_bytes: 1024 * 1024,
            },
            UploadApi::Batch => BatchLimits {
                max_events: 2000,
                max_bytes: 20 * 1024 * 1024,
            },
        }
    }
}

/// Per-request limits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BatchLimits {
    pub max_events: usize,
    pub max_bytes: usize,
}

/// Something that accepts one chunk of events per call.
pub trait EventSink {
    fn send(&self, events: &[Event]) -> impl Future<Output = Result<UploadResponse, Error>>;
}

/// Sends chunks to one of the upload APIs of a [Client].
pub struct ApiSink<'a> {
    client: &'a Client,
    api: UploadApi,
}

impl<'a> ApiSink<'a> {
    pub fn new(client: &'a Client, api: UploadApi) -> Self {
        Self { client, api }
    }
}

impl EventSink for ApiSink<'_> {
    async fn send(&self, events: &[Event]) -> Result<UploadResponse, Error> {
        match self.api {
            UploadApi::HttpV2 => self.client.track(events).await,
            UploadApi::Batch => self.client.upload_batch(events).await,
        }
    }
}

/// Totals over all requests of an upload.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BatchSummary {
    /// Requests sent, including ones rejected as too large.
    pub requests: usize,
    pub events_ingested: u64,
    pub payload_size_bytes: u64,
}

impl BatchSummary {
    fn record(&mut self, response: &UploadResponse) {
        self.events_ingested += response.events_ingested;
        self.payload_size_bytes += response.payload_size_bytes;
    }

    fn merge(&mut self, other: BatchSummary) {
        self.requests += other.requests;
        self.events_ingested += other.events_ingested;
        self.payload_size_bytes += other.payload_size_bytes;
    }
}

/// Splits `events` into consecutive, non-empty chunks of at most
/// `max_events` events whose serialized size fits `max_bytes`. An event
/// that is too large on its own still gets a chunk, and the API decides.
pub fn chunk_events(events: &[Event], limits: BatchLimits) -> Result<Vec<&[Event]>, Error> {
    let budget = limits.max_bytes.saturating_sub(ENVELOPE_BYTES);
    let max_events = limits.max_events.max(1);

    let mut chunks = Vec::new();
    let mut start = 0;
    let mut bytes = 0;

    for (index, event) in events.iter().enumerate() {
        // +1 for the separating comma.
        let size = serde_json::to_vec(event)?.len() + 1;
        let count = index - start;
        if count > 0 && (count >= max_events || bytes + size > budget) {
            chunks.push(&events[start..index]);
            start = index;
            bytes = 0;
        }
        bytes += size;
    }

    if start < events.len() {
        chunks.push(&events[start..]);
    }

    Ok(chunks)
}

pub struct BatchUploader<S> {
    sink: S,
    limits: BatchLimits,
    min_id_length: u32,
    concurrency: usize,
}

impl<S: EventSink> BatchUploader<S> {
    pub fn new(sink: S, limits: BatchLimits, min_id_length: u32) -> Self {
        Self {
            sink,
            limits,
            min_id_length,
            concurrency: 1,
        }
    }

    /// Number of requests in flight at once. Defaults to one.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Uploads all events. Every event is validated before the first
    /// request goes out; the first failing request aborts the upload.
    pub async fn upload(&self, events: &[Event]) -> Result<BatchSummary, Error> {
        if events.is_empty() {
            return Ok(BatchSummary::default());
        }

        for (index, event) in events.iter().enumerate() {
            event
                .validate(Some(self.min_id_length))
                .map_err(|err| err.at(index))?;
        }

        let chunks = chunk_events(events, self.limits)?;
        tracing::debug!(
            events = events.len(),
            chunks = chunks.len(),
            concurrency = self.concurrency,
            "uploading events"
        );

        let summary = stream::iter(chunks)
            .map(|chunk| self.upload_chunk(chunk))
            .buffered(self.concurrency)
            .try_fold(BatchSummary::default(), |mut summary, chunk_summary| async move {
                summary.merge(chunk_summary);
                Ok::<_, Error>(summary)
            })
            .await?;

        tracing::info!(
            requests = summary.requests,
            events_ingested = summary.events_ingested,
            payload_size_bytes = summary.payload_size_bytes,
            "upload finished"
        );
        Ok(summary)
    }

    /// Sends one chunk, halving it for as long as the API rejects it as too
    /// large. Halves are sent in order.
    async fn upload_chunk(&self, chunk: &[Event]) -> Result<BatchSummary, Error> {
        let mut summary = BatchSummary::default();
        let mut pending = vec![chunk];

        while let Some(events) = pending.pop() {
            summary.requests += 1;
            match self.sink.send(events).await {
                Ok(response) => summary.record(&response),
                Err(Error::PayloadTooLarge(message)) if events.len() > 1 => {
                    tracing::debug!(events = events.len(), %message, "payload too large, splitting");
                    let (first, second) = events.split_at(events.len() / 2);
                    pending.push(second);
                    pending.push(first);
                }
                Err(err) => return Err(err),
            }
        }

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use httpmock::prelude::*;
    use serde_json::json;

    use super::*;
    use crate::client::ClientOptions;
    use crate::error::ValidationError;
    use crate::retry::RetryPolicy;

    /// Accepts chunks of at most `max_accepted` events and records the
    /// user ids of every chunk it sees.
    struct FakeSink {
        max_accepted: usize,
        fail_on: Option<&'static str>,
        seen: Mutex<Vec<Vec<String>>>,
    }

    impl FakeSink {
        fn new(max_accepted: usize) -> Self {
            Self {
                max_accepted,
                fail_on: None,
                seen: Mutex::new(Vec::new()),
            }
        }

        fn seen(&self) -> Vec<Vec<String>> {
            self.seen.lock().unwrap().clone()
        }
    }

    impl EventSink for &FakeSink {
        async fn send(&self, events: &[Event]) -> Result<UploadResponse, Error> {
            let ids: Vec<String> = events
                .iter()
                .filter_map(|event| event.user_id.clone())
                .collect();
            self.seen.lock().unwrap().push(ids);

            if let Some(fail_on) = self.fail_on {
                if events.iter().any(|event| event.event_type == fail_on) {
                    return Err(Error::Server {
                        status: 500,
                        body: String::new(),
                    });
                }
            }
            if events.len() > self.max_accepted {
                return Err(Error::PayloadTooLarge("Payload too large".to_string()));
            }
            Ok(UploadResponse {
                code: 200,
                events_ingested: u64::try_from(events.len()).unwrap(),
                payload_size_bytes: 100,
                server_upload_time: 0,
            })
        }
    }

    fn events(count: usize) -> Vec<Event> {
        (0..count)
            .map(|i| Event::new("click").with_user_id(format!("user-{i:04}")))
            .collect()
    }

    fn lens(chunks: &[&[Event]]) -> Vec<usize> {
        chunks.iter().map(|chunk| chunk.len()).collect()
    }

    #[test]
    fn test_chunk_by_event_count() {
        let events = events(7);
        let limits = BatchLimits {
            max_events: 3,
            max_bytes: usize::MAX,
        };
        let chunks = chunk_events(&events, limits).unwrap();
        assert_eq!(lens(&chunks), vec![3, 3, 1]);
        assert_eq!(chunks[2][0].user_id.as_deref(), Some("user-0006"));
    }

    #[test]
    fn test_chunk_by_size() {
        let events = events(5);
        let event_size = serde_json::to_vec(&events[0]).unwrap().len() + 1;
        let limits = BatchLimits {
            max_events: 100,
            max_bytes: ENVELOPE_BYTES + 2 * event_size,
        };
        let chunks = chunk_events(&events, limits).unwrap();
        assert_eq!(lens(&chunks), vec![2, 2, 1]);
    }

    #[test]
    fn test_oversized_events_get_their_own_chunk() {
        let events = events(3);
        let limits = BatchLimits {
            max_events: 100,
            max_bytes: 1,
        };
        let chunks = chunk_events(&events, limits).unwrap();
        assert_eq!(lens(&chunks), vec![1, 1, 1]);
        assert!(chunk_events(&[], limits).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_upload_splits_too_large_chunks() {
        let sink = FakeSink::new(2);
        let limits = BatchLimits {
            max_events: 8,
            max_bytes: usize::MAX,
        };
        let uploader = BatchUploader::new(&sink, limits, 5);

        let summary = uploader.upload(&events(8)).await.unwrap();

        assert_eq!(summary.events_ingested, 8);
        // 8 -> 4 + 4 -> 2 + 2 + 2 + 2
        assert_eq!(summary.requests, 7);
        let accepted: Vec<String> = sink
            .seen()
            .into_iter()
            .filter(|ids| ids.len() <= 2)
            .flatten()
            .collect();
        let expected: Vec<String> = (0..8).map(|i| format!("user-{i:04}")).collect();
        assert_eq!(accepted, expected);
    }

    #[tokio::test]
    async fn test_single_event_too_large_fails() {
        let sink = FakeSink::new(0);
        let uploader = BatchUploader::new(&sink, UploadApi::HttpV2.limits(), 5);

        let result = uploader.upload(&events(2)).await;

        assert!(matches!(result, Err(Error::PayloadTooLarge(_))));
        // 2 -> 1 (rejected, cannot split further)
        assert_eq!(sink.seen().len(), 2);
    }

    #[tokio::test]
    async fn test_upload_validates_everything_first() {
        let sink = FakeSink::new(10);
        let uploader = BatchUploader::new(&sink, UploadApi::Batch.limits(), 5);

        let mut events = events(3);
        events[2].user_id = None;

        let result = uploader.upload(&events).await;
        assert!(matches!(
            result,
            Err(Error::Validation(ValidationError::MissingIdentity { index: 2 }))
        ));
        assert!(sink.seen().is_empty());

        assert_eq!(uploader.upload(&[]).await.unwrap(), BatchSummary::default());
    }

    #[tokio::test]
    async fn test_upload_stops_at_first_error() {
        let mut sink = FakeSink::new(10);
        sink.fail_on = Some("purchase");
        let limits = BatchLimits {
            max_events: 2,
            max_bytes: usize::MAX,
        };
        let uploader = BatchUploader::new(&sink, limits, 5);

        let mut events = events(6);
        events[3].event_type = "purchase".to_string();

        let result = uploader.upload(&events).await;

        assert!(matches!(result, Err(Error::Server { status: 500, .. })));
        assert_eq!(sink.seen().len(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_upload() {
        let sink = FakeSink::new(10);
        let limits = BatchLimits {
            max_events: 3,
            max_bytes: usize::MAX,
        };
        let uploader = BatchUploader::new(&sink, limits, 5).with_concurrency(4);

        let summary = uploader.upload(&events(10)).await.unwrap();

        assert_eq!(summary.requests, 4);
        assert_eq!(summary.events_ingested, 10);
        assert_eq!(summary.payload_size_bytes, 400);
    }

    #[tokio::test]
    async fn test_client_uploader() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/batch");
                then.status(200).json_body(json!({
                    "code": 200,
                    "events_ingested": 5,
                    "payload_size_bytes": 320,
                    "server_upload_time": 1_396_381_378_123_i64,
                }));
            })
            .await;

        let client = Client::with_options(
            "test-api-key",
            ClientOptions {
                server_url: Some(server.base_url()),
                retry: RetryPolicy::none(),
                ..Default::default()
            },
        )
        .unwrap();

        let summary = client
            .uploader(UploadApi::Batch)
            .upload(&events(5))
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(
            summary,
            BatchSummary {
                requests: 1,
                events_ingested: 5,
                payload_size_bytes: 320,
            }
        );
    }

    #[tokio::test]
    async fn test_client_sink_targets_api() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/2/httpapi");
                then.status(200).json_body(json!({"code": 200, "events_ingested": 2}));
            })
            .await;

        let client = Client::with_options(
            "test-api-key",
            ClientOptions {
                server_url: Some(server.base_url()),
                retry: RetryPolicy::none(),
                ..Default::default()
            },
        )
        .unwrap();

        let response = client
            .sink(UploadApi::HttpV2)
            .send(&events(2))
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(response.events_ingested, 2);
    }
}
