//! Processor invocation boundary.
//!
//! Every dispatch reserves gate capacity before the processor runs and gives
//! it back on every exit path. Whatever the processor or the collaborator
//! calls made on its behalf fail with ends up as an `error` event, after the
//! affected bundles are handed back to the store.

use super::events::EventBus;
use super::gate::{BoundedGate, GatePermit};
use crate::api::{ApiOperation, DataItemWrite, MeteredApi, PipelineApi};
use crate::prepare::{InputReceipt, PreparedInput};
use crate::runtime::error::{DataIntegrityError, StreamError};
use crate::runtime::processor::{ProcessFuture, Processor, ProcessorOutput};
use crate::runtime::telemetry::Telemetry;
use anyhow::anyhow;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;

/// Pause/resume hooks invoked by the dispatcher while the gate lock is held.
pub(crate) trait FlowControl: Send + Sync {
    /// An admission left no spare capacity.
    fn saturated(&self);
    /// A release made capacity available again.
    fn drained(&self);
}

/// Stream state a dispatch runs against.
pub(crate) struct DispatchContext<'a> {
    pub api: &'a MeteredApi,
    pub gate: &'a BoundedGate,
    pub events: &'a EventBus<Dispatcher>,
    pub telemetry: &'a Telemetry,
    pub flow: &'a dyn FlowControl,
    /// Set when the caller already holds a gate slot covering every dispatch
    /// made with this context.
    pub reserved: bool,
}

/// Outcome counts of one dispatch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub processed: usize,
    pub failed: usize,
    pub emitted: usize,
}

/// The data handler bound to a stream: a processor plus its dispatch policy.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    processor: Processor,
}

impl Dispatcher {
    pub fn new(processor: Processor) -> Self {
        Self { processor }
    }

    pub fn max_batch_size(&self) -> usize {
        self.processor.max_batch_size()
    }

    /// Runs the processor over `inputs` as one admission and emits or fails
    /// every input according to the result.
    pub(crate) async fn dispatch(
        &self,
        ctx: &DispatchContext<'_>,
        inputs: Vec<PreparedInput>,
    ) -> DispatchReport {
        let mut report = DispatchReport::default();
        if inputs.is_empty() {
            return report;
        }

        let receipts: Vec<InputReceipt> = inputs.iter().map(PreparedInput::receipt).collect();
        ctx.telemetry.record_dispatch();

        let _permit = (!ctx.reserved).then(|| admit(ctx.gate, ctx.flow));

        tracing::trace!(inputs = receipts.len(), "invoking processor");
        match self.invoke(inputs).await {
            Ok(outputs) => {
                for (receipt, output) in receipts.iter().zip(outputs) {
                    match ctx.emit(receipt, output).await {
                        Ok(emitted) => {
                            report.processed += 1;
                            report.emitted += emitted;
                        }
                        Err(err) => {
                            ctx.fail(receipt, &err).await;
                            report.failed += 1;
                        }
                    }
                }
            }
            Err(err) => {
                for receipt in &receipts {
                    ctx.fail(receipt, &err).await;
                }
                report.failed += receipts.len();
            }
        }

        ctx.telemetry
            .record_processed(report.processed, report.emitted);
        report
    }

    /// Calls the processor and pairs its result with the inputs, one entry per input.
    async fn invoke(
        &self,
        inputs: Vec<PreparedInput>,
    ) -> Result<Vec<Option<ProcessorOutput>>, StreamError> {
        let count = inputs.len();
        match &self.processor {
            Processor::Single(processor) => {
                let mut outputs = Vec::with_capacity(count);
                for input in inputs {
                    outputs.push(guarded(|| processor.process(input)).await?);
                }
                Ok(outputs)
            }
            Processor::Batch(processor) => {
                match guarded(|| processor.process_batch(inputs)).await? {
                    None => Ok(vec![None; count]),
                    Some(outputs) if outputs.len() == count => {
                        Ok(outputs.into_iter().map(Some).collect())
                    }
                    Some(outputs) => Err(DataIntegrityError::BatchLengthMismatch {
                        outputs: outputs.len(),
                        inputs: count,
                    }
                    .into()),
                }
            }
        }
    }
}

impl DispatchContext<'_> {
    /// Writes one item per output channel. Returns the number of items written.
    async fn emit(
        &self,
        receipt: &InputReceipt,
        output: Option<ProcessorOutput>,
    ) -> Result<usize, StreamError> {
        let Some(output) = output.filter(|output| !output.is_empty()) else {
            return Ok(0);
        };
        let Some(consumption_id) = receipt.consumption_id.as_deref() else {
            return Err(DataIntegrityError::MissingConsumption {
                bundle_id: receipt.bundle_id.clone(),
            }
            .into());
        };

        let query = receipt.item_query();
        let mut emitted = 0;
        for (channel, channel_output) in output {
            tracing::trace!(
                bundle_id = %receipt.bundle_id,
                channel = %channel,
                items = channel_output.data.len(),
                "emitting output"
            );
            let write = DataItemWrite {
                done: channel_output.is_done(),
                output_channel: channel,
                consumption_id: Some(consumption_id.to_owned()),
                data: channel_output.data,
            };
            self.api
                .emit_item(&query, write)
                .await
                .map_err(|source| StreamError::collaborator(ApiOperation::EmitItem, source))?;
            emitted += 1;
        }

        Ok(emitted)
    }

    /// Hands a claimed bundle back to the store and reports `err`.
    pub(crate) async fn fail(&self, receipt: &InputReceipt, err: &StreamError) {
        self.telemetry.record_failed();
        tracing::warn!(
            bundle_id = %receipt.bundle_id,
            task_id = %receipt.task_id,
            error = %err,
            "bundle processing failed"
        );

        if let Some(consumption_id) = receipt.consumption_id.as_deref() {
            match self
                .api
                .unconsume(&receipt.task_id, &receipt.bundle_id, consumption_id)
                .await
            {
                Ok(()) => {
                    self.telemetry.record_unconsumed();
                    tracing::debug!(bundle_id = %receipt.bundle_id, "bundle unconsumed");
                }
                Err(source) => {
                    let unconsume_err = StreamError::collaborator(ApiOperation::Unconsume, source);
                    tracing::error!(
                        bundle_id = %receipt.bundle_id,
                        error = %unconsume_err,
                        "failed to unconsume bundle"
                    );
                    self.events.emit_error(&unconsume_err);
                }
            }
        }

        self.events.emit_error(err);
    }
}

/// Takes a gate slot, pausing polling when it was the last one. Dropping the
/// permit gives the slot back and resumes polling once capacity returns.
pub(crate) fn admit<'a>(
    gate: &'a BoundedGate,
    flow: &'a dyn FlowControl,
) -> GatePermit<'a, impl FnOnce(bool) + 'a> {
    gate.admit(on_acquired(flow), on_released(flow))
}

/// Like [`admit`], but returns `None` instead of overfilling a full gate.
pub(crate) fn try_admit<'a>(
    gate: &'a BoundedGate,
    flow: &'a dyn FlowControl,
) -> Option<GatePermit<'a, impl FnOnce(bool) + 'a>> {
    gate.try_admit(on_acquired(flow), on_released(flow))
}

fn on_acquired(flow: &dyn FlowControl) -> impl FnOnce(bool) + '_ {
    move |has_capacity| {
        if !has_capacity {
            flow.saturated();
        }
    }
}

fn on_released(flow: &dyn FlowControl) -> impl FnOnce(bool) + '_ {
    move |has_capacity| {
        if has_capacity {
            flow.drained();
        }
    }
}

/// Runs a processor call, turning its errors and panics into processor errors.
async fn guarded<T>(call: impl FnOnce() -> ProcessFuture<T>) -> Result<T, StreamError> {
    let future = std::panic::catch_unwind(AssertUnwindSafe(call)).map_err(panicked)?;
    match AssertUnwindSafe(future).catch_unwind().await {
        Ok(result) => result.map_err(StreamError::Processor),
        Err(panic) => Err(panicked(panic)),
    }
}

fn panicked(panic: Box<dyn Any + Send>) -> StreamError {
    let message = panic_message(panic.as_ref());
    tracing::error!(panic = %message, "processor panicked");
    StreamError::Processor(anyhow!("processor panicked: {message}"))
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
