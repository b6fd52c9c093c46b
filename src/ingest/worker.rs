//! Single consumer of the inbound message channel
//!
//! Messages are handled one at a time in arrival order, which preserves
//! per-topic delivery order. A failed message is logged and counted; it never
//! stops the loop.

use super::{IngestOutcome, IngestPipeline};
use crate::error::{IngestError, IngestResult};
use crate::observability::IngestMetrics;
use crate::transport::InboundMessage;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};

const PAYLOAD_PREVIEW_LEN: usize = 256;

fn payload_preview(payload: &[u8]) -> String {
    let text = String::from_utf8_lossy(payload);
    match text.char_indices().nth(PAYLOAD_PREVIEW_LEN) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.into_owned(),
    }
}

pub struct IngestWorker {
    pipeline: Arc<IngestPipeline>,
    metrics: Arc<IngestMetrics>,
}

impl IngestWorker {
    pub fn new(pipeline: Arc<IngestPipeline>, metrics: Arc<IngestMetrics>) -> Self {
        Self { pipeline, metrics }
    }

    /// Handle one message and record its result
    pub async fn handle(&self, message: InboundMessage) -> IngestResult<IngestOutcome> {
        self.metrics.message_received();
        let started = Instant::now();

        let span = crate::ingest_span!(topic = %message.topic, retained = message.retain);
        let result = self.pipeline.process(&message).instrument(span).await;
        self.metrics.record_handling_time(started.elapsed());

        match &result {
            Ok(outcome) => debug!(topic = %message.topic, ?outcome, "Message ingested"),
            Err(err) => self.report_failure(&message, err),
        }
        result
    }

    fn report_failure(&self, message: &InboundMessage, err: &IngestError) {
        let payload = payload_preview(&message.payload);
        match err {
            IngestError::Unroutable { reason, .. } => {
                self.metrics.unroutable_dropped();
                warn!(
                    topic = %message.topic,
                    stage = "classify",
                    reason = %reason,
                    payload = %payload,
                    "Dropping unroutable message"
                );
            }
            IngestError::MalformedPayload { source, .. } => {
                self.metrics.malformed_dropped();
                warn!(
                    topic = %message.topic,
                    stage = "decode",
                    reason = %source,
                    payload = %payload,
                    "Dropping malformed payload"
                );
            }
            IngestError::Persistence { stage, source } => {
                self.metrics.persistence_failed();
                error!(
                    topic = %message.topic,
                    stage = %stage,
                    error = %source,
                    payload = %payload,
                    "Ingestion failed"
                );
            }
            other => {
                error!(
                    topic = %message.topic,
                    error = %other,
                    payload = %payload,
                    "Ingestion failed"
                );
            }
        }
    }

    /// Consume the channel until it closes or shutdown is signalled
    pub fn spawn(
        self,
        mut receiver: mpsc::Receiver<InboundMessage>,
        mut shutdown: oneshot::Receiver<()>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("Ingestion worker started");
            loop {
                tokio::select! {
                    _ = &mut shutdown => {
                        info!("Ingestion worker received shutdown signal");
                        break;
                    }
                    message = receiver.recv() => {
                        match message {
                            Some(message) => {
                                let _ = self.handle(message).await;
                            }
                            None => {
                                info!("Inbound channel closed");
                                break;
                            }
                        }
                    }
                }
            }
            info!("Ingestion worker stopped");
        })
    }
}
