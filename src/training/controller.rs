//! Phase sequencing for train, validation and test passes
//!
//! The controller owns one active phase at a time. Every batch goes through
//! the [`StepExecutor`] and into the phase buffer; the buffer is reduced when
//! the phase ends and the result is reported. Only validation epochs reach
//! the best-metric tracker, and the validation sanity check run before
//! training is never reduced, reported or tracked.

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use candle_nn::Module;

use super::metrics::{ClassNames, EpochAggregator, MetricsBundle, PhaseBuffer};
use super::optimizers::ConfiguredOptimizer;
use super::reporter::DiagnosticReporter;
use super::step::{StepExecutor, StepOutput};
use super::tracker::BestMetricTracker;
use super::Phase;
use crate::config::{Config, MonitorName};
use crate::data::{Batch, DataSource};
use crate::error::{Error, Result};
use crate::telemetry::{NullTelemetry, Telemetry};

/// Progress notifications sent to an optional listener
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
#[allow(missing_docs)]
pub enum TrainingEvent {
    PhaseStarted { split: Phase, epoch: usize, sanity: bool },
    StepCompleted { split: Phase, epoch: usize, step: usize, loss: f64 },
    PhaseCompleted {
        split: Phase,
        epoch: usize,
        precision: f64,
        recall: f64,
        f1_score: f64,
        loss: f64,
    },
    BestUpdated { epoch: usize, monitor: MonitorName, value: f64 },
    SanityCheckCompleted { batches: usize },
    FitCompleted { epochs: usize, global_step: usize, best_metric: f64 },
}

/// Outcome of [`TrainingController::fit`]
#[derive(Debug, Clone, Serialize)]
pub struct FitSummary {
    /// Train/validate epochs run
    pub epochs: usize,
    /// Optimizer steps taken
    pub global_step: usize,
    /// Best monitored validation value, if this rank tracks it
    pub best_metric: Option<f64>,
    /// Epoch that produced `best_metric`
    pub best_epoch: Option<usize>,
    /// Metrics of the last validation epoch
    pub last_validation: Option<MetricsBundle>,
}

struct ActivePhase {
    split: Phase,
    sanity: bool,
    buffer: PhaseBuffer,
}

/// Sequences phases and wires step, aggregation, reporting and tracking
pub struct TrainingController {
    executor: StepExecutor,
    aggregator: EpochAggregator,
    reporter: DiagnosticReporter,
    tracker: Option<BestMetricTracker>,
    telemetry: Box<dyn Telemetry>,
    optimizer: Option<ConfiguredOptimizer>,
    class_names: ClassNames,
    active: Option<ActivePhase>,
    epoch: usize,
    global_step: usize,
    val_step: usize,
    best_epoch: Option<usize>,
    max_epochs: usize,
    num_sanity_val_steps: usize,
    event_tx: Option<mpsc::UnboundedSender<TrainingEvent>>,
}

impl TrainingController {
    /// Fails with `Config` before touching any data when the monitor or
    /// evaluation settings are invalid. Emits the placeholder best snapshot.
    pub fn new(
        config: &Config,
        class_names: ClassNames,
        model: Box<dyn Module>,
        telemetry: Box<dyn Telemetry>,
    ) -> Result<Self> {
        config.monitor.validate()?;
        if !(0.0..1.0).contains(&config.evaluation.threshold) {
            return Err(Error::config("evaluation.threshold must be in [0, 1)"));
        }
        if class_names.is_empty() {
            return Err(Error::config("At least one class name is required"));
        }

        let is_reporting = config.trainer.rank == 0;
        let (tracker, mut telemetry) = if is_reporting {
            let tracker = BestMetricTracker::new(config.monitor, config.hparams())?;
            (Some(tracker), telemetry)
        } else {
            debug!(rank = config.trainer.rank, "non-zero rank, telemetry disabled");
            (None, Box::new(NullTelemetry) as Box<dyn Telemetry>)
        };

        if let Some(tracker) = &tracker {
            tracker.emit_initial(telemetry.as_mut())?;
        }

        Ok(Self {
            executor: StepExecutor::new(model),
            aggregator: EpochAggregator::new(class_names.clone())
                .with_threshold(config.evaluation.threshold),
            reporter: DiagnosticReporter::from_config(&config.evaluation),
            tracker,
            telemetry,
            optimizer: None,
            class_names,
            active: None,
            epoch: 0,
            global_step: 0,
            val_step: 0,
            best_epoch: None,
            max_epochs: config.trainer.max_epochs,
            num_sanity_val_steps: config.trainer.num_sanity_val_steps,
            event_tx: None,
        })
    }

    /// Apply `optimizer` after every training step
    pub fn with_optimizer(mut self, optimizer: ConfiguredOptimizer) -> Self {
        self.optimizer = Some(optimizer);
        self
    }

    /// Send progress events to `tx`
    pub fn with_event_monitoring(mut self, tx: mpsc::UnboundedSender<TrainingEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    /// Label names reports are built against
    pub fn class_names(&self) -> &ClassNames {
        &self.class_names
    }

    /// Current epoch, starting at 0
    pub fn epoch(&self) -> usize {
        self.epoch
    }

    /// Training steps taken
    pub fn global_step(&self) -> usize {
        self.global_step
    }

    /// Best monitored value so far; `None` on ranks that do not track
    pub fn best_metric(&self) -> Option<f64> {
        self.tracker.as_ref().map(BestMetricTracker::best_metric)
    }

    /// Split of the phase in progress
    pub fn active_phase(&self) -> Option<Phase> {
        self.active.as_ref().map(|a| a.split)
    }

    /// Whether the phase in progress is the validation sanity check
    pub fn is_sanity_checking(&self) -> bool {
        self.active.as_ref().is_some_and(|a| a.sanity)
    }

    /// Open a phase for `split` at the current epoch
    pub fn begin_phase(&mut self, split: Phase) -> Result<()> {
        self.open(split, false)
    }

    /// Open a validation phase whose results are discarded
    pub fn begin_sanity_check(&mut self) -> Result<()> {
        self.open(Phase::Validate, true)
    }

    fn open(&mut self, split: Phase, sanity: bool) -> Result<()> {
        if let Some(active) = &self.active {
            return Err(Error::invalid_state(format!(
                "cannot start {split} while {} is active",
                active.split
            )));
        }
        debug!(%split, epoch = self.epoch, sanity, "phase started");
        self.active = Some(ActivePhase {
            split,
            sanity,
            buffer: PhaseBuffer::new(),
        });
        self.send_event(TrainingEvent::PhaseStarted {
            split,
            epoch: self.epoch,
            sanity,
        });
        Ok(())
    }

    /// Run one batch in the active phase; returns the batch loss
    pub fn step(&mut self, batch: &Batch) -> Result<f64> {
        let (split, sanity) = match &self.active {
            Some(active) => (active.split, active.sanity),
            None => return Err(Error::invalid_state("step called with no active phase")),
        };
        let epoch = self.epoch;
        self.step_inner(batch, split, sanity)
            .map_err(|e| e.in_phase(split, epoch))
    }

    fn step_inner(&mut self, batch: &Batch, split: Phase, sanity: bool) -> Result<f64> {
        let output = self.executor.run(&batch.inputs, &batch.targets)?;
        let loss = output.loss_value()?;

        if split == Phase::Train {
            if let Some(optimizer) = self.optimizer.as_mut() {
                optimizer.backward_step(&output.loss)?;
            }
        }

        // validation batches get their own counter; global_step only moves in train
        let step = match split {
            Phase::Validate => self.val_step,
            _ => self.global_step,
        };
        if split.logs_step_loss() && !sanity {
            self.telemetry
                .log_scalar(&format!("loss/{split}"), loss, step)?;
        }
        if !sanity {
            self.send_event(TrainingEvent::StepCompleted {
                split,
                epoch: self.epoch,
                step,
                loss,
            });
        }
        match split {
            Phase::Train => self.global_step += 1,
            Phase::Validate if !sanity => self.val_step += 1,
            _ => {}
        }

        if let Some(active) = self.active.as_mut() {
            active.buffer.push(StepOutput {
                loss: output.loss.detach(),
                targets: output.targets,
                logits: output.logits.detach(),
            });
        }
        Ok(loss)
    }

    /// Close the active phase
    ///
    /// Returns the reduced metrics, or `None` for a sanity check, which is
    /// discarded without aggregation.
    #[instrument(level = "debug", skip(self), fields(epoch = self.epoch))]
    pub fn end_phase(&mut self) -> Result<Option<MetricsBundle>> {
        let active = self
            .active
            .take()
            .ok_or_else(|| Error::invalid_state("end_phase called with no active phase"))?;

        if active.sanity {
            let batches = active.buffer.len();
            info!("Validation sanity check passed ({} batches)", batches);
            self.send_event(TrainingEvent::SanityCheckCompleted { batches });
            return Ok(None);
        }

        let (split, epoch) = (active.split, self.epoch);
        self.finish(active)
            .map(Some)
            .map_err(|e| e.in_phase(split, epoch))
    }

    fn finish(&mut self, active: ActivePhase) -> Result<MetricsBundle> {
        let split = active.split;
        let metrics = self.aggregator.reduce(active.buffer)?;

        self.send_event(TrainingEvent::PhaseCompleted {
            split,
            epoch: self.epoch,
            precision: metrics.precision,
            recall: metrics.recall,
            f1_score: metrics.f1_score,
            loss: metrics.loss,
        });

        // only the reporting rank has a tracker
        let Some(tracker) = self.tracker.as_mut() else {
            return Ok(metrics);
        };

        self.reporter.emit(
            &metrics,
            &self.class_names,
            split,
            self.global_step,
            self.epoch,
            self.telemetry.as_mut(),
        )?;

        if split == Phase::Validate && tracker.update(&metrics, self.telemetry.as_mut())? {
            self.best_epoch = Some(self.epoch);
            let (monitor, value) = (tracker.monitor().name, tracker.best_metric());
            self.send_event(TrainingEvent::BestUpdated {
                epoch: self.epoch,
                monitor,
                value,
            });
        }
        Ok(metrics)
    }

    /// Run a full phase over `batches`
    pub fn run_phase(&mut self, split: Phase, batches: &[Batch]) -> Result<MetricsBundle> {
        self.begin_phase(split)?;
        self.drive(batches)?;
        self.end_phase()?
            .ok_or_else(|| Error::invalid_state("phase produced no metrics"))
    }

    /// Run up to `num_sanity_val_steps` validation batches and discard them
    pub fn run_sanity_check(&mut self, batches: &[Batch]) -> Result<()> {
        let limit = self.num_sanity_val_steps.min(batches.len());
        self.begin_sanity_check()?;
        self.drive(&batches[..limit])?;
        self.end_phase()?;
        Ok(())
    }

    fn drive(&mut self, batches: &[Batch]) -> Result<()> {
        for batch in batches {
            if let Err(e) = self.step(batch) {
                self.active = None;
                return Err(e);
            }
        }
        Ok(())
    }

    /// Sanity check, then `max_epochs` of training and validation
    #[instrument(skip_all, fields(max_epochs = self.max_epochs))]
    pub fn fit(&mut self, source: &mut dyn DataSource) -> Result<FitSummary> {
        if source.class_names() != self.class_names {
            warn!("Data source class names differ from the controller's");
        }

        if self.num_sanity_val_steps > 0 {
            let batches = source.batches(Phase::Validate)?;
            self.run_sanity_check(&batches)?;
        }

        let mut last_validation = None;
        for epoch in 0..self.max_epochs {
            self.epoch = epoch;
            let train = source.batches(Phase::Train)?;
            self.run_phase(Phase::Train, &train)?;
            let val = source.batches(Phase::Validate)?;
            last_validation = Some(self.run_phase(Phase::Validate, &val)?);
        }

        let summary = FitSummary {
            epochs: self.max_epochs,
            global_step: self.global_step,
            best_metric: self.best_metric(),
            best_epoch: self.best_epoch,
            last_validation,
        };
        info!(
            "Training finished after {} epochs ({} steps)",
            summary.epochs, summary.global_step
        );
        self.send_event(TrainingEvent::FitCompleted {
            epochs: summary.epochs,
            global_step: summary.global_step,
            best_metric: summary.best_metric.unwrap_or(f64::NAN),
        });
        Ok(summary)
    }

    /// One pass over the test split
    pub fn test(&mut self, source: &mut dyn DataSource) -> Result<MetricsBundle> {
        let batches = source.batches(Phase::Test)?;
        self.run_phase(Phase::Test, &batches)
    }

    fn send_event(&self, event: TrainingEvent) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(event);
        }
    }
}
