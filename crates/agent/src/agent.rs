//! The serve loop: gateway in, pipeline, gateway out.
//!
//! Each inbound prompt runs on its own task. A semaphore bounds how many
//! run at once; with the default of one permit requests are handled in
//! arrival order, one at a time.

use std::sync::Arc;

use ragline_config::AppConfig;
use ragline_core::{Error, InboundPrompt, MessagingGateway, ResponsePayload};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::pipeline::Pipeline;
use crate::splitter::SplitFragment;

/// Buffered fragments between the stream and the gateway.
const FRAGMENT_BUFFER: usize = 64;

pub struct Agent {
    name: String,
    pipeline: Arc<Pipeline>,
    max_concurrent: usize,
}

impl Agent {
    pub fn new(name: impl Into<String>, pipeline: Pipeline, max_concurrent: usize) -> Self {
        Self {
            name: name.into(),
            pipeline: Arc::new(pipeline),
            max_concurrent: max_concurrent.max(1),
        }
    }

    pub fn from_config(config: &AppConfig, pipeline: Pipeline) -> Self {
        Self::new(
            &config.agent.name,
            pipeline,
            config.agent.max_concurrent_requests,
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    /// Consume prompts from `gateway` until it closes or `cancel` fires.
    /// In-flight requests finish (or observe the same cancellation) before
    /// this returns.
    pub async fn serve(
        &self,
        gateway: Arc<dyn MessagingGateway>,
        cancel: CancellationToken,
    ) -> Result<(), Error> {
        let mut inbound = gateway.start().await?;
        let permits = Arc::new(Semaphore::new(self.max_concurrent));
        let mut tasks = JoinSet::new();

        info!(
            agent = %self.name,
            gateway = gateway.name(),
            model = self.pipeline.model(),
            max_concurrent = self.max_concurrent,
            "Agent serving"
        );

        loop {
            let prompt = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                prompt = inbound.recv() => match prompt {
                    Some(prompt) => prompt,
                    None => break,
                },
            };

            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    self.refuse(gateway.as_ref(), prompt).await;
                    break;
                }
                permit = permits.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => {
                        self.refuse(gateway.as_ref(), prompt).await;
                        break;
                    }
                },
            };

            let pipeline = self.pipeline.clone();
            let gateway = gateway.clone();
            let cancel = cancel.child_token();
            tasks.spawn(async move {
                respond(&pipeline, gateway.as_ref(), prompt, &cancel).await;
                drop(permit);
            });

            while let Some(joined) = tasks.try_join_next() {
                if let Err(e) = joined {
                    error!(error = %e, "Request task panicked");
                }
            }
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Request task panicked");
            }
        }

        inbound.close();
        while let Ok(prompt) = inbound.try_recv() {
            self.refuse(gateway.as_ref(), prompt).await;
        }

        if let Err(e) = gateway.stop().await {
            warn!(error = %e, "Gateway did not stop cleanly");
        }
        info!(agent = %self.name, "Agent stopped");
        Ok(())
    }

    /// Answer a prompt that will never run with a cancellation failure.
    async fn refuse(&self, gateway: &dyn MessagingGateway, prompt: InboundPrompt) {
        debug!(request_id = %prompt.request_id, "Refusing prompt at shutdown");
        let payload = ResponsePayload::failure(
            self.pipeline.model(),
            prompt.request.prompt_length(),
            Error::Cancelled.to_string(),
        );
        if let Err(e) = gateway.send_response(&prompt.request_id, payload).await {
            error!(error = %e, "Failed to deliver failure payload");
        }
    }

    /// Handle a single prompt outside the serve loop.
    pub async fn respond(
        &self,
        gateway: &dyn MessagingGateway,
        prompt: InboundPrompt,
        cancel: &CancellationToken,
    ) {
        respond(&self.pipeline, gateway, prompt, cancel).await;
    }
}

/// Run one request end to end. Always delivers exactly one terminal payload.
async fn respond(
    pipeline: &Pipeline,
    gateway: &dyn MessagingGateway,
    prompt: InboundPrompt,
    cancel: &CancellationToken,
) {
    let InboundPrompt {
        request_id,
        request,
    } = prompt;
    let span = info_span!("request", request_id = %request_id);

    async {
        if let Some(selector) = &request.options.model_selector {
            if selector != pipeline.model() {
                warn!(
                    requested = %selector,
                    serving = pipeline.model(),
                    "Requested model differs from the served model, continuing"
                );
            }
        }
        debug!(prompt = %request.prompt, "Prompt received");

        let result = if pipeline.config().stream_tokens {
            let (tx, rx) = mpsc::channel(FRAGMENT_BUFFER);
            let forward = forward_fragments(rx, gateway, &request_id, pipeline);
            let handle = async {
                let result = pipeline.handle(&request, Some(&tx), cancel).await;
                drop(tx);
                result
            };
            let (result, ()) = tokio::join!(handle, forward);
            result
        } else {
            pipeline.handle(&request, None, cancel).await
        };

        match result {
            Ok(outcome) => {
                info!(
                    model = %outcome.payload.model,
                    tokens = outcome.output.token_count,
                    elapsed_secs = outcome.payload.elapsed_time,
                    tokens_per_second = outcome.payload.speed,
                    "Request completed"
                );
                if let Err(e) = gateway
                    .send_response(&request_id, outcome.payload.clone())
                    .await
                {
                    error!(error = %e, "Failed to deliver response");
                }
                if let Err(e) = pipeline
                    .persist(&request.prompt, outcome.answer(), cancel)
                    .await
                {
                    warn!(error = %e, "Exchange not persisted");
                }
            }
            Err(e) => {
                if e.is_cancelled() {
                    info!("Request cancelled");
                } else {
                    error!(error = %e, "Request failed");
                }
                let payload =
                    ResponsePayload::failure(pipeline.model(), request.prompt_length(), e.to_string());
                if let Err(e) = gateway.send_response(&request_id, payload).await {
                    error!(error = %e, "Failed to deliver failure payload");
                }
            }
        }
    }
    .instrument(span)
    .await
}

/// Relay decoded fragments as intermediate payloads until the stream ends.
/// Reasoning and answer travel in their own fields; the marker never does.
async fn forward_fragments(
    mut rx: mpsc::Receiver<String>,
    gateway: &dyn MessagingGateway,
    request_id: &str,
    pipeline: &Pipeline,
) {
    let model = pipeline.model();
    let mut split = pipeline.splitter().stream();
    while let Some(text) = rx.recv().await {
        for fragment in split.push(&text) {
            send_fragment(gateway, request_id, model, fragment).await;
        }
    }
    if let Some(fragment) = split.finish() {
        send_fragment(gateway, request_id, model, fragment).await;
    }
}

async fn send_fragment(
    gateway: &dyn MessagingGateway,
    request_id: &str,
    model: &str,
    fragment: SplitFragment,
) {
    let payload = match fragment {
        SplitFragment::Answer(text) => ResponsePayload::fragment(model, text),
        SplitFragment::Reasoning(text) => ResponsePayload::reasoning_fragment(model, text),
    };
    if let Err(e) = gateway.send_response(request_id, payload).await {
        debug!(error = %e, "Dropping fragment");
    }
}
