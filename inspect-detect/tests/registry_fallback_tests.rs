//! Registry Fallback Integration Tests
//!
//! Selection policy across scripted local/cloud/mock variants

mod helpers;

use std::sync::Arc;
use std::time::Duration;

use helpers::{crack_payload, sample_image, Script, ScriptedDetector};
use inspect_detect::detectors::MockDetector;
use inspect_detect::error::{AnalysisFailure, DetectionError};
use inspect_detect::types::{AnalyzeOptions, DefectType, DetectionSource, Severity};
use inspect_detect::{DetectorRegistry, RegistryConfig};

fn failing_local() -> Arc<ScriptedDetector> {
    ScriptedDetector::new(DetectionSource::Local, Script::FailLoad("model file missing".to_string()))
}

fn failing_cloud() -> Arc<ScriptedDetector> {
    ScriptedDetector::new(
        DetectionSource::Cloud,
        Script::FailAnalyze(AnalysisFailure::Network, "connection refused".to_string()),
    )
}

#[tokio::test]
async fn test_auto_mode_falls_through_to_mock() {
    let local = failing_local();
    let cloud = failing_cloud();
    let registry = DetectorRegistry::new(RegistryConfig::default())
        .with_detector(local.clone())
        .with_detector(cloud.clone())
        .with_detector(Arc::new(MockDetector::new()));

    let result = registry
        .analyze(&sample_image(), AnalyzeOptions::default())
        .await
        .expect("mock is the terminal fallback");

    assert_eq!(result.source, DetectionSource::Mock);
    assert!((0.0..=1.0).contains(&result.confidence));
    assert_eq!(local.loads(), 1);
    assert_eq!(local.analyses(), 0, "failed load must not be followed by analyze");
    assert_eq!(cloud.loads(), 1);
    assert_eq!(cloud.analyses(), 1);
}

#[tokio::test]
async fn test_explicit_source_without_fallback_surfaces_its_error() {
    let local = failing_local();
    let cloud = failing_cloud();
    let mock = ScriptedDetector::new(DetectionSource::Mock, Script::Succeed(crack_payload(0.6)));
    let registry = DetectorRegistry::new(RegistryConfig::default())
        .with_detector(local.clone())
        .with_detector(cloud.clone())
        .with_detector(mock.clone());

    let err = registry
        .analyze(&sample_image(), AnalyzeOptions::only(DetectionSource::Local))
        .await
        .unwrap_err();

    match err {
        DetectionError::ModelLoad { detector, cause } => {
            assert_eq!(detector, "local");
            assert_eq!(cause, "model file missing");
        }
        other => panic!("expected local's ModelLoad error, got {:?}", other),
    }
    assert!(!cloud.was_invoked());
    assert!(!mock.was_invoked());
}

#[tokio::test]
async fn test_first_success_wins() {
    let local = ScriptedDetector::new(DetectionSource::Local, Script::Succeed(crack_payload(0.92)));
    let cloud = ScriptedDetector::new(DetectionSource::Cloud, Script::Succeed(crack_payload(0.5)));
    let registry = DetectorRegistry::new(RegistryConfig::default())
        .with_detector(local.clone())
        .with_detector(cloud.clone());

    let result = registry
        .analyze(&sample_image(), AnalyzeOptions::default())
        .await
        .unwrap();

    assert_eq!(result.source, DetectionSource::Local);
    assert_eq!(result.defect_type, DefectType::Crack);
    assert_eq!(result.severity, Severity::Minor);
    assert_eq!(result.confidence, 0.92);
    assert!(!cloud.was_invoked());
}

#[tokio::test]
async fn test_preferred_source_tried_first_then_configured_order() {
    let local = ScriptedDetector::new(DetectionSource::Local, Script::Succeed(crack_payload(0.7)));
    let cloud = failing_cloud();
    let registry = DetectorRegistry::new(RegistryConfig::default())
        .with_detector(local.clone())
        .with_detector(cloud.clone());

    let result = registry
        .analyze(&sample_image(), AnalyzeOptions::prefer(DetectionSource::Cloud))
        .await
        .unwrap();

    assert_eq!(result.source, DetectionSource::Local);
    assert_eq!(cloud.analyses(), 1);
    assert_eq!(local.analyses(), 1);
}

#[tokio::test]
async fn test_source_reflects_invoking_variant_not_payload() {
    let spoofing = ScriptedDetector::new(
        DetectionSource::Cloud,
        Script::Succeed(crack_payload(0.8).with("source", "local")),
    );
    let registry = DetectorRegistry::new(RegistryConfig::default()).with_detector(spoofing);

    let result = registry
        .analyze(&sample_image(), AnalyzeOptions::default())
        .await
        .unwrap();
    assert_eq!(result.source, DetectionSource::Cloud);
}

#[tokio::test]
async fn test_out_of_range_confidence_is_clamped() {
    let local = ScriptedDetector::new(DetectionSource::Local, Script::Succeed(crack_payload(7.5)));
    let cloud = ScriptedDetector::new(
        DetectionSource::Cloud,
        Script::Succeed(crack_payload(0.0).with("confidence", "not a number")),
    );
    let registry = DetectorRegistry::new(RegistryConfig::default())
        .with_detector(local)
        .with_detector(cloud);

    let high = registry
        .analyze(&sample_image(), AnalyzeOptions::only(DetectionSource::Local))
        .await
        .unwrap();
    assert_eq!(high.confidence, 1.0);

    let garbage = registry
        .analyze(&sample_image(), AnalyzeOptions::only(DetectionSource::Cloud))
        .await
        .unwrap();
    assert_eq!(garbage.confidence, 0.0);
}

#[tokio::test]
async fn test_all_failures_reported_in_attempt_order() {
    let registry = DetectorRegistry::new(RegistryConfig::default())
        .with_detector(failing_local())
        .with_detector(failing_cloud());

    let err = registry
        .analyze(&sample_image(), AnalyzeOptions::default())
        .await
        .unwrap_err();

    let DetectionError::AllDetectorsFailed { failures } = err else {
        panic!("expected aggregate error");
    };
    let names: Vec<&str> = failures.iter().map(|f| f.detector.as_str()).collect();
    assert_eq!(names, vec!["local", "cloud"]);
    assert!(matches!(failures[0].error, DetectionError::ModelLoad { .. }));
    assert!(matches!(
        failures[1].error,
        DetectionError::Analysis { kind: AnalysisFailure::Network, .. }
    ));
}

#[tokio::test]
async fn test_failed_load_is_retried_on_next_request() {
    let local = failing_local();
    let registry = DetectorRegistry::new(RegistryConfig::default())
        .with_detector(local.clone())
        .with_detector(Arc::new(MockDetector::new()));

    for _ in 0..3 {
        let result = registry
            .analyze(&sample_image(), AnalyzeOptions::default())
            .await
            .unwrap();
        assert_eq!(result.source, DetectionSource::Mock);
    }
    assert_eq!(local.loads(), 3);
}

#[tokio::test]
async fn test_concurrent_requests_share_one_load() {
    let local = ScriptedDetector::slow_loading(
        DetectionSource::Local,
        Script::Succeed(crack_payload(0.9)),
        Duration::from_millis(100),
    );
    let registry = Arc::new(DetectorRegistry::new(RegistryConfig::default()).with_detector(local.clone()));

    let tasks: Vec<_> = (0..4)
        .map(|_| {
            let registry = registry.clone();
            tokio::spawn(async move {
                registry
                    .analyze(&sample_image(), AnalyzeOptions::default())
                    .await
            })
        })
        .collect();

    for task in tasks {
        let result = task.await.unwrap().unwrap();
        assert_eq!(result.source, DetectionSource::Local);
    }
    assert_eq!(local.loads(), 1);
    assert_eq!(local.analyses(), 4);
}

#[tokio::test]
async fn test_slow_load_times_out_and_falls_back() {
    let config = RegistryConfig {
        load_timeout: Duration::from_millis(50),
        analyze_timeout: Duration::from_secs(5),
    };
    let local = ScriptedDetector::slow_loading(
        DetectionSource::Local,
        Script::Succeed(crack_payload(0.9)),
        Duration::from_millis(500),
    );
    let registry = DetectorRegistry::new(config)
        .with_detector(local)
        .with_detector(Arc::new(MockDetector::new()));

    let result = registry
        .analyze(&sample_image(), AnalyzeOptions::default())
        .await
        .unwrap();
    assert_eq!(result.source, DetectionSource::Mock);
    assert!(!registry.entries()[0].is_loaded());
}

#[tokio::test]
async fn test_unload_all_then_reload_on_demand() {
    let local = ScriptedDetector::new(DetectionSource::Local, Script::Succeed(crack_payload(0.9)));
    let registry = DetectorRegistry::new(RegistryConfig::default()).with_detector(local.clone());

    // Unloading before anything is loaded is a no-op
    registry.unload_all().await;
    assert_eq!(local.unloads(), 0);

    registry.analyze(&sample_image(), AnalyzeOptions::default()).await.unwrap();
    assert!(registry.status()[0].loaded);

    registry.unload_all().await;
    assert!(!registry.status()[0].loaded);
    assert_eq!(local.unloads(), 1);

    registry.analyze(&sample_image(), AnalyzeOptions::default()).await.unwrap();
    assert_eq!(local.loads(), 2);
}
