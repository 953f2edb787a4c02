//! End-to-end behaviour of the training controller

use approx::assert_relative_eq;
use bigearth_select::config::{Config, DataConfig, ModelConfig, MonitorConfig, MonitorMode, MonitorName};
use bigearth_select::training::Phase;
use bigearth_select::{
    Batch, ClassNames, Classifier, ConfiguredOptimizer, DataSource, Error, InMemoryDataSource,
    RecordingTelemetry, SyntheticDataSource, TrainingController,
};
use candle_core::{DType, Device, Tensor};
use candle_nn::{Module, VarBuilder, VarMap};

fn identity() -> Box<dyn Module> {
    Box::new(candle_nn::func(|xs: &Tensor| Ok(xs.clone())))
}

/// Identity-model batch: the inputs are the logits
fn batch(logits: &[[f32; 2]], targets: &[[f32; 2]]) -> Batch {
    let rows = logits.len();
    Batch::new(
        Tensor::from_vec(logits.concat(), (rows, 2), &Device::Cpu).unwrap(),
        Tensor::from_vec(targets.concat(), (rows, 2), &Device::Cpu).unwrap(),
    )
}

fn names() -> ClassNames {
    ClassNames::from(&["Coniferous forest", "Sea and ocean"][..])
}

fn config(mode: MonitorMode, name: MonitorName, epochs: usize, sanity: usize) -> Config {
    let mut config = Config::default();
    config.monitor = MonitorConfig { mode, name };
    config.trainer.max_epochs = epochs;
    config.trainer.num_sanity_val_steps = sanity;
    config
}

#[test]
fn sanity_validation_emits_nothing() {
    let sink = RecordingTelemetry::new();
    let mut controller = TrainingController::new(
        &config(MonitorMode::Min, MonitorName::Loss, 1, 2),
        names(),
        identity(),
        Box::new(sink.clone()),
    )
    .unwrap();
    sink.clear();

    let b = batch(&[[1.0, -1.0]], &[[1.0, 0.0]]);
    controller.begin_sanity_check().unwrap();
    assert!(controller.is_sanity_checking());
    controller.step(&b).unwrap();
    controller.step(&b).unwrap();
    assert!(controller.end_phase().unwrap().is_none());

    assert_eq!(sink.scalar_count(), 0);
    assert_eq!(sink.figure_count(), 0);
    assert!(sink.hparam_metrics().is_empty());
    assert_eq!(controller.best_metric(), Some(f64::INFINITY));
    assert_eq!(controller.global_step(), 0);
}

#[test]
fn invalid_monitor_fails_before_any_batch() {
    let config = Config::from_yaml_str("monitor:\n  mode: avg\n  name: loss\n");
    assert!(matches!(config, Err(Error::Config(_))));

    let mismatched = config_with_pairing(MonitorMode::Max, MonitorName::Loss);
    let sink = RecordingTelemetry::new();
    let result = TrainingController::new(&mismatched, names(), identity(), Box::new(sink.clone()));
    assert!(matches!(result, Err(Error::Config(_))));
    assert!(sink.records().is_empty());
}

fn config_with_pairing(mode: MonitorMode, name: MonitorName) -> Config {
    config(mode, name, 1, 0)
}

#[test]
fn fit_tracks_best_validation_f1() {
    let sink = RecordingTelemetry::new();
    let mut controller = TrainingController::new(
        &config(MonitorMode::Max, MonitorName::F1Score, 3, 1),
        names(),
        identity(),
        Box::new(sink.clone()),
    )
    .unwrap();

    // validation: P = 1, R = 2/3, F1 = 0.8 every epoch
    let val = batch(&[[3.0, -3.0], [-3.0, 3.0]], &[[1.0, 0.0], [1.0, 1.0]]);
    let train = batch(&[[1.0, 1.0]], &[[1.0, 1.0]]);
    let mut source = InMemoryDataSource::new(names())
        .with_split(Phase::Train, vec![train.clone(), train])
        .with_split(Phase::Validate, vec![val]);

    let summary = controller.fit(&mut source).unwrap();
    assert_eq!(summary.epochs, 3);
    assert_eq!(summary.global_step, 6);
    assert_relative_eq!(summary.best_metric.unwrap(), 0.8, epsilon = 1e-9);
    // the first epoch sets the best; equal values later do not replace it
    assert_eq!(summary.best_epoch, Some(0));

    let snapshots = sink.hparam_metrics();
    assert_eq!(snapshots.len(), 2);
    assert_relative_eq!(snapshots[1]["best_metrics/f1_score"], 0.8, epsilon = 1e-9);
    assert_relative_eq!(snapshots[1]["best_metrics/precision"], 1.0);

    // sanity batch produced no val records; three real epochs did
    assert_eq!(sink.scalars("f1_score/val").len(), 3);
    assert_eq!(sink.scalars("loss/val").len(), 3);
    assert_eq!(sink.scalars("loss/train").len(), 6);
    assert_eq!(sink.figure_count(), 6);
}

#[test]
fn shape_mismatch_reports_split_and_epoch() {
    let three = ClassNames::from(&["a", "b", "c"][..]);
    let mut controller = TrainingController::new(
        &config(MonitorMode::Min, MonitorName::Loss, 1, 0),
        three,
        identity(),
        Box::new(RecordingTelemetry::new()),
    )
    .unwrap();

    let err = controller
        .run_phase(Phase::Validate, &[batch(&[[1.0, 0.0]], &[[1.0, 0.0]])])
        .unwrap_err();
    assert!(err.is_shape_mismatch());
    match err {
        Error::Phase { split, epoch, .. } => {
            assert_eq!(split, Phase::Validate);
            assert_eq!(epoch, 0);
        }
        other => panic!("expected phase context, got {other}"),
    }
    // the controller can start again after a failed phase
    assert_eq!(controller.active_phase(), None);
}

#[test]
fn empty_validation_split_is_an_error() {
    let mut controller = TrainingController::new(
        &config(MonitorMode::Min, MonitorName::Loss, 1, 0),
        names(),
        identity(),
        Box::new(RecordingTelemetry::new()),
    )
    .unwrap();
    let mut source = InMemoryDataSource::new(names())
        .with_split(Phase::Train, vec![batch(&[[1.0, 1.0]], &[[1.0, 1.0]])]);
    let err = controller.fit(&mut source).unwrap_err();
    assert!(matches!(err.root(), Error::EmptyPhase));
}

#[test]
fn synthetic_run_learns_and_reports() {
    let mut config = config(MonitorMode::Min, MonitorName::Loss, 4, 2);
    config.data = DataConfig {
        num_classes: 4,
        input_dim: 8,
        train_samples: 256,
        val_samples: 64,
        test_samples: 64,
        batch_size: 32,
        label_noise: 0.0,
        ..Default::default()
    };
    config.model = ModelConfig::Linear { input_dim: 8 };
    config.optimizer = bigearth_select::OptimizerConfig::Adam { lr: 0.05 };
    config.validate().unwrap();

    let mut source = SyntheticDataSource::new(&config.data, 3, Device::Cpu).unwrap();
    let var_map = VarMap::new();
    let vb = VarBuilder::from_varmap(&var_map, DType::F32, &Device::Cpu);
    let model = Classifier::new(&config.model, 4, vb).unwrap();
    let optimizer = ConfiguredOptimizer::from_config(&config.optimizer, &var_map).unwrap();

    let sink = RecordingTelemetry::new();
    let mut controller =
        TrainingController::new(&config, source.class_names(), Box::new(model), Box::new(sink.clone()))
            .unwrap()
            .with_optimizer(optimizer);

    let summary = controller.fit(&mut source).unwrap();
    let test = controller.test(&mut source).unwrap();

    assert_eq!(summary.global_step, 4 * 8);
    let val_losses: Vec<f64> = sink.scalars("loss/val_epoch").iter().map(|(_, v)| *v).collect();
    assert_eq!(val_losses.len(), 4);
    assert!(val_losses[3] < val_losses[0]);
    assert!(summary.best_metric.unwrap() <= val_losses[0]);

    assert_eq!(test.confusion_matrices.len(), 4);
    assert_eq!(test.num_samples, 64);
    assert!(test.confusion_matrices.iter().all(|cm| cm.total() == 64));
    assert_eq!(sink.scalars("precision/test").len(), 1);
}
