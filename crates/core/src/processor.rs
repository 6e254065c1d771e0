//! Stream Processor (§4.3): turns a raw [`StreamReader`] pull interface into an
//! ordered [`StreamEvent`] push stream with timeout enforcement and an at-most-one
//! terminal-frame guarantee (either exactly one `Done` or exactly one error, never
//! both, never neither).

use crate::bedrock::{ReadOutcome, StreamReader};
use crate::error::GatewayError;
use crate::types::StreamEvent;
use async_stream::stream;
use std::time::Duration;
use tokio_stream::Stream;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy)]
pub struct ProcessorConfig {
    /// Max silence between two chunks before the stream is considered stalled.
    pub chunk_timeout: Duration,
    /// Hard ceiling on the whole turn, regardless of chunk cadence.
    pub stream_timeout: Duration,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            chunk_timeout: Duration::from_secs(30),
            stream_timeout: Duration::from_secs(120),
        }
    }
}

/// One item yielded to the duplex handler: content, a citation attached to content
/// already emitted, or a terminal outcome.
pub enum ProcessedEvent {
    Content(String),
    Citation(crate::types::Citation),
    Done,
    Error(GatewayError),
}

/// Consumes `reader` and yields [`ProcessedEvent`]s honoring both timeouts. Whatever
/// content was already emitted before a failure is left standing — the caller sees a
/// partial transcript followed by exactly one terminal frame, never a rollback.
///
/// `cancel` roots the turn's scoped lifetime (§5): when it fires, the loop stops
/// pulling from `reader` and closes it without yielding a terminal frame — the
/// connection is already gone, so there is nothing left to write a frame to.
pub fn process_stream(
    mut reader: Box<dyn StreamReader>,
    config: ProcessorConfig,
    cancel: CancellationToken,
) -> impl Stream<Item = ProcessedEvent> {
    stream! {
        let deadline = tokio::time::sleep(config.stream_timeout);
        tokio::pin!(deadline);
        let mut terminated = false;

        loop {
            if terminated {
                break;
            }
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    terminated = true;
                }

                _ = &mut deadline => {
                    yield ProcessedEvent::Error(GatewayError::new(
                        crate::error::ErrorKind::Timeout,
                        "stream exceeded overall time budget",
                    ));
                    terminated = true;
                }

                outcome = tokio::time::timeout(config.chunk_timeout, reader.read()) => {
                    match outcome {
                        Err(_elapsed) => {
                            yield ProcessedEvent::Error(GatewayError::new(
                                crate::error::ErrorKind::Timeout,
                                "no chunk received within chunk timeout",
                            ));
                            terminated = true;
                        }
                        Ok(Err(err)) => {
                            yield ProcessedEvent::Error(err);
                            terminated = true;
                        }
                        Ok(Ok(ReadOutcome::Done)) => {
                            while let Some(citation) = reader.read_citation().await {
                                yield ProcessedEvent::Citation(citation);
                            }
                            yield ProcessedEvent::Done;
                            terminated = true;
                        }
                        Ok(Ok(ReadOutcome::Chunk(text))) => {
                            yield ProcessedEvent::Content(text);
                            while let Some(citation) = reader.read_citation().await {
                                yield ProcessedEvent::Citation(citation);
                            }
                        }
                    }
                }
            }
        }

        let _ = reader.close().await;
    }
}

/// Converts [`ProcessedEvent`]s into the [`StreamEvent`] vocabulary used for
/// persistence and non-streaming reconstruction (e.g. the session history record).
pub fn to_stream_event(event: &ProcessedEvent) -> Option<StreamEvent> {
    match event {
        ProcessedEvent::Content(text) => Some(StreamEvent::Content(text.clone())),
        ProcessedEvent::Citation(c) => Some(StreamEvent::Citation(c.clone())),
        ProcessedEvent::Done => Some(StreamEvent::Done),
        ProcessedEvent::Error(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::types::Citation;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tokio_stream::StreamExt;

    struct ScriptedReader {
        chunks: Mutex<VecDeque<ReadOutcome>>,
        citations: Mutex<VecDeque<Citation>>,
        delay_before_index: Option<(usize, Duration)>,
        calls: Mutex<usize>,
    }

    impl ScriptedReader {
        fn new(chunks: Vec<ReadOutcome>) -> Self {
            Self {
                chunks: Mutex::new(chunks.into()),
                citations: Mutex::new(VecDeque::new()),
                delay_before_index: None,
                calls: Mutex::new(0),
            }
        }

        fn with_citation_after_first(mut self, citation: Citation) -> Self {
            self.citations.get_mut().unwrap().push_back(citation);
            self
        }

        fn stalling_at(mut self, index: usize, delay: Duration) -> Self {
            self.delay_before_index = Some((index, delay));
            self
        }
    }

    #[async_trait]
    impl StreamReader for ScriptedReader {
        async fn read(&mut self) -> Result<ReadOutcome, GatewayError> {
            let mut calls = self.calls.lock().unwrap();
            let idx = *calls;
            *calls += 1;
            drop(calls);

            if let Some((stall_idx, delay)) = self.delay_before_index {
                if idx == stall_idx {
                    tokio::time::sleep(delay).await;
                }
            }

            Ok(self
                .chunks
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(ReadOutcome::Done))
        }

        async fn read_citation(&mut self) -> Option<Citation> {
            self.citations.lock().unwrap().pop_front()
        }

        async fn close(&mut self) -> Result<(), GatewayError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn emits_content_then_citation_then_done() {
        let reader = ScriptedReader::new(vec![
            ReadOutcome::Chunk("hello".to_string()),
            ReadOutcome::Done,
        ])
        .with_citation_after_first(Citation {
            source_id: "s1".into(),
            source_name: "doc".into(),
            excerpt: "...".into(),
            confidence: None,
            url: None,
            metadata: None,
        });

        let events: Vec<_> = process_stream(
            Box::new(reader),
            ProcessorConfig::default(),
            CancellationToken::new(),
        )
        .collect()
        .await;

        assert!(matches!(events[0], ProcessedEvent::Content(ref s) if s == "hello"));
        assert!(matches!(events[1], ProcessedEvent::Citation(_)));
        assert!(matches!(events[2], ProcessedEvent::Done));
        assert_eq!(events.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn chunk_timeout_yields_exactly_one_terminal_error() {
        let reader = ScriptedReader::new(vec![
            ReadOutcome::Chunk("partial".to_string()),
            ReadOutcome::Chunk("never arrives".to_string()),
        ])
        .stalling_at(1, Duration::from_secs(60));

        let config = ProcessorConfig {
            chunk_timeout: Duration::from_secs(5),
            stream_timeout: Duration::from_secs(600),
        };

        let events: Vec<_> = process_stream(Box::new(reader), config, CancellationToken::new())
            .collect()
            .await;

        assert!(matches!(events[0], ProcessedEvent::Content(ref s) if s == "partial"));
        assert_eq!(events.len(), 2);
        assert!(matches!(
            events[1],
            ProcessedEvent::Error(ref e) if e.kind() == ErrorKind::Timeout
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_the_stream_without_a_terminal_frame() {
        let reader = ScriptedReader::new(vec![
            ReadOutcome::Chunk("partial".to_string()),
            ReadOutcome::Chunk("never arrives".to_string()),
        ])
        .stalling_at(1, Duration::from_secs(600));

        let cancel = CancellationToken::new();
        let config = ProcessorConfig {
            chunk_timeout: Duration::from_secs(300),
            stream_timeout: Duration::from_secs(600),
        };

        let mut events = Box::pin(process_stream(Box::new(reader), config, cancel.clone()));
        assert!(matches!(
            events.next().await,
            Some(ProcessedEvent::Content(ref s)) if s == "partial"
        ));

        cancel.cancel();
        assert!(events.next().await.is_none());
    }

    #[tokio::test]
    async fn error_terminates_stream_without_a_done_frame() {
        struct FailingReader;
        #[async_trait]
        impl StreamReader for FailingReader {
            async fn read(&mut self) -> Result<ReadOutcome, GatewayError> {
                Err(GatewayError::new(ErrorKind::StreamInterrupted, "connection reset"))
            }
            async fn read_citation(&mut self) -> Option<Citation> {
                None
            }
            async fn close(&mut self) -> Result<(), GatewayError> {
                Ok(())
            }
        }

        let events: Vec<_> = process_stream(
            Box::new(FailingReader),
            ProcessorConfig::default(),
            CancellationToken::new(),
        )
        .collect()
        .await;

        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], ProcessedEvent::Error(_)));
    }
}
