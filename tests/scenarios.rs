//! End-to-end tests driving the public `Engine` facade through the reference
//! backend. Scheduler-policy-level scenarios (shortest-expected-latency
//! urgency ordering, HEFT worker reservations, least-slack-time-first
//! deadline ordering) are covered by the colocated tests in each policy's own
//! module under `scheduler/src/policies/`; this file covers the scenarios
//! that only show up once a whole engine is wired together: model
//! registration, round-robin dispatch across real worker threads, and
//! request-time validation.

use std::io::Write;

use backend::reference::ReferenceBackendUtil;
use backend::reference::{ReferenceModel, ReferenceOpKind, ReferenceOpSpec};
use backend::BackendFactory;
use common::{BackendType, CpuMaskFlag, DataType, PlannerConfig, RuntimeConfigBuilder, SchedulerType, WorkerConfig, WorkerId};
use dnn_engine::{Engine, RequestOptions};
use tensor::Tensor;

/// A model with two float32 inputs that are summed by a single `Add` op --
/// small enough that every `SubgraphPreparationType` produces one subgraph
/// per worker and profiling has nothing interesting to measure.
fn add_model() -> ReferenceModel {
    ReferenceModel {
        tensor_shapes: vec![vec![2], vec![2], vec![2]],
        input_tensors: vec![0, 1],
        output_tensors: vec![2],
        ops: vec![ReferenceOpSpec {
            kind: ReferenceOpKind::Add,
            inputs: vec![0, 1],
            outputs: vec![2],
        }],
    }
}

fn write_model(model: &ReferenceModel) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().expect("failed to create temp model file");
    let json = serde_json::to_string(model).expect("reference model failed to serialize");
    file.write_all(json.as_bytes()).expect("failed to write temp model file");
    file.flush().expect("failed to flush temp model file");
    file
}

fn reference_factory() -> BackendFactory {
    let mut factory = BackendFactory::new();
    factory.register(Box::new(ReferenceBackendUtil::new()));
    factory
}

fn single_cpu_worker_config(scheduler: SchedulerType) -> common::RuntimeConfig {
    RuntimeConfigBuilder::new()
        .worker_config(WorkerConfig {
            workers: vec![common::DeviceFlag::Cpu],
            cpu_masks: vec![CpuMaskFlag::All],
            num_threads: vec![1],
            allow_worksteal: false,
            availability_check_interval_ms: 30_000,
        })
        .planner_config(PlannerConfig {
            schedule_window_size: usize::MAX,
            schedulers: vec![scheduler],
            cpu_mask: CpuMaskFlag::All,
            log_path: String::new(),
        })
        .profile_config(common::ProfileConfig {
            online: false,
            ..common::ProfileConfig::default()
        })
        .build()
        .expect("single cpu worker config should be valid")
}

/// Single CPU worker, `add` model: two float32 input tensors `[1.0, 3.0]` and
/// `[2.0, 6.0]` produce `[3.0, 9.0]` after `RequestSync`.
#[test]
fn single_worker_add_model_produces_expected_output() {
    let engine = Engine::create(single_cpu_worker_config(SchedulerType::FixedWorker), reference_factory())
        .expect("engine should start with one cpu worker");

    let model_file = write_model(&add_model());
    let model_id = engine
        .register_model(model_file.path(), BackendType::Reference)
        .expect("add model should register on a cpu worker");

    let a = Tensor::from_contiguous(DataType::Float32, &[1.0f32, 3.0], &[2]).unwrap();
    let b = Tensor::from_contiguous(DataType::Float32, &[2.0f32, 6.0], &[2]).unwrap();

    let outputs = engine
        .request_sync(&[model_id], &RequestOptions::default(), vec![vec![a, b]])
        .expect("request_sync should succeed");

    assert_eq!(outputs.len(), 1);
    assert_eq!(outputs[0].len(), 1);
    let values: &[f32] = outputs[0][0].as_slice(DataType::Float32).unwrap();
    assert_eq!(values, &[3.0, 9.0]);
}

/// Two CPU workers under round-robin: two independently-enqueued jobs for
/// the same model both complete successfully. Which physical worker each
/// job lands on is exercised directly (with an injectable fake context) by
/// `scheduler::policies::round_robin`'s own test; here we only have the
/// public `Engine` surface to observe, so the externally-visible half of the
/// scenario -- both jobs dispatch and finish ok, nothing is left queued -- is
/// what this test checks.
#[test]
fn two_cpu_workers_round_robin_both_jobs_complete() {
    let config = RuntimeConfigBuilder::new()
        .worker_config(WorkerConfig {
            workers: vec![common::DeviceFlag::Cpu, common::DeviceFlag::Cpu],
            cpu_masks: vec![CpuMaskFlag::All, CpuMaskFlag::All],
            num_threads: vec![1, 1],
            allow_worksteal: false,
            availability_check_interval_ms: 30_000,
        })
        .planner_config(PlannerConfig {
            schedule_window_size: usize::MAX,
            schedulers: vec![SchedulerType::RoundRobin],
            cpu_mask: CpuMaskFlag::All,
            log_path: String::new(),
        })
        .profile_config(common::ProfileConfig {
            online: false,
            ..common::ProfileConfig::default()
        })
        .build()
        .expect("two cpu worker config should be valid");

    let engine = Engine::create(config, reference_factory()).expect("engine should start with two cpu workers");

    let model_file = write_model(&add_model());
    let model_id = engine
        .register_model(model_file.path(), BackendType::Reference)
        .expect("add model should register on both cpu workers");

    let job_a = vec![
        Tensor::from_contiguous(DataType::Float32, &[1.0f32, 1.0], &[2]).unwrap(),
        Tensor::from_contiguous(DataType::Float32, &[1.0f32, 1.0], &[2]).unwrap(),
    ];
    let job_b = vec![
        Tensor::from_contiguous(DataType::Float32, &[2.0f32, 2.0], &[2]).unwrap(),
        Tensor::from_contiguous(DataType::Float32, &[3.0f32, 3.0], &[2]).unwrap(),
    ];

    let outputs = engine
        .request_sync(&[model_id, model_id], &RequestOptions::default(), vec![job_a, job_b])
        .expect("both round-robin jobs should complete");

    assert_eq!(outputs.len(), 2);
    let a_values: &[f32] = outputs[0][0].as_slice(DataType::Float32).unwrap();
    let b_values: &[f32] = outputs[1][0].as_slice(DataType::Float32).unwrap();
    assert_eq!(a_values, &[2.0, 2.0]);
    assert_eq!(b_values, &[5.0, 5.0]);
}

/// A `request_async` naming a worker id the engine never configured is
/// rejected before a job is ever built, rather than queued and left to fail
/// later at dispatch time.
#[test]
fn request_with_invalid_target_worker_is_rejected_up_front() {
    let engine = Engine::create(single_cpu_worker_config(SchedulerType::FixedWorker), reference_factory())
        .expect("engine should start with one cpu worker");

    let model_file = write_model(&add_model());
    let model_id = engine
        .register_model(model_file.path(), BackendType::Reference)
        .expect("add model should register on a cpu worker");

    let a = Tensor::from_contiguous(DataType::Float32, &[1.0f32, 3.0], &[2]).unwrap();
    let b = Tensor::from_contiguous(DataType::Float32, &[2.0f32, 6.0], &[2]).unwrap();

    let options = RequestOptions {
        target_worker_id: Some(WorkerId::new(99)),
        ..RequestOptions::default()
    };
    let result = engine.request_async(&[model_id], &options, vec![vec![a, b]]);
    assert!(matches!(result, Err(common::EngineError::NoSuchWorker(_))));

    // The engine should still be usable afterward: nothing was left queued
    // or wedged by the rejected request.
    let a = Tensor::from_contiguous(DataType::Float32, &[1.0f32, 3.0], &[2]).unwrap();
    let b = Tensor::from_contiguous(DataType::Float32, &[2.0f32, 6.0], &[2]).unwrap();
    let outputs = engine
        .request_sync(&[model_id], &RequestOptions::default(), vec![vec![a, b]])
        .expect("a well-formed request after the rejected one should still succeed");
    let values: &[f32] = outputs[0][0].as_slice(DataType::Float32).unwrap();
    assert_eq!(values, &[3.0, 9.0]);
}
