// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::pin::Pin;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::{
    error::{ProviderError, ProviderResult},
    stream::StreamCollector,
    CompletionParams, CompletionResult, ResponseEvent,
};

pub type ResponseStream = Pin<Box<dyn Stream<Item = ProviderResult<ResponseEvent>> + Send>>;

/// Channel the adapter forwards raw deltas to while streaming.  The
/// orchestrator renders text deltas in real time; everything else it reads
/// from the reassembled [`CompletionResult`].
pub type DeltaSink = mpsc::Sender<ResponseEvent>;

/// One model provider adapter.
///
/// Adapters translate the canonical [`CompletionParams`] into a vendor wire
/// dialect and back.  Both entry points return an already-reassembled
/// [`CompletionResult`]; fragmented tool-call deltas never leak to callers.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Stable provider id (e.g. `"openrouter"`).
    fn name(&self) -> &str;

    /// Model identifier forwarded to the API.
    fn model_name(&self) -> &str;

    /// Blocking completion: one request, one JSON response.
    async fn generate(
        &self,
        params: CompletionParams,
        cancel: &CancellationToken,
    ) -> ProviderResult<CompletionResult>;

    /// Streaming completion.  Deltas are forwarded to `sink` as they arrive
    /// (in provider order); the returned result carries the final text,
    /// reassembled tool calls, usage and finish reason.
    async fn stream(
        &self,
        params: CompletionParams,
        sink: DeltaSink,
        cancel: &CancellationToken,
    ) -> ProviderResult<CompletionResult>;
}

impl std::fmt::Debug for dyn Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provider")
            .field("name", &self.name())
            .field("model_name", &self.model_name())
            .finish()
    }
}

/// Drive a delta stream to completion, forwarding events to an optional sink
/// and folding them through the [`StreamCollector`].
///
/// Cancellation is observed before every event is forwarded, so once cancel
/// fires no further delta reaches the sink.  Dropping the stream closes the
/// underlying HTTP response.
pub async fn collect_stream(
    provider: &str,
    model: &str,
    mut events: ResponseStream,
    sink: Option<&DeltaSink>,
    cancel: &CancellationToken,
) -> ProviderResult<CompletionResult> {
    let mut collector = StreamCollector::new();
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
            ev = events.next() => ev,
        };
        let Some(event) = next else { break };
        let event = event?;
        if let Some(s) = sink {
            // A dropped receiver means the caller stopped listening; the
            // completion still finishes so the turn result stays coherent.
            let _ = s.send(event.clone()).await;
        }
        if collector.apply(&event) {
            break;
        }
    }
    Ok(collector.finish(provider, model))
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
