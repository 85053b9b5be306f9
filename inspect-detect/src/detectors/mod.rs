//! Detector Variants
//!
//! Every backend implements [`Detector`]: `load_model`, `analyze`, `unload`.
//! The registry only sees `Arc<dyn Detector>` and never the concrete kind.
//!
//! # Variants
//! 1. **local** - on-device linear model loaded from a JSON file
//! 2. **cloud** - remote inference service over HTTP
//! 3. **mock** - deterministic, dependency-free terminal fallback
//!
//! # Load state
//! Load state lives in [`DetectorEntry`], owned by the registry, not in the
//! variants. Concurrent `load_model` calls on one entry share a single
//! in-flight load future, so the variant's own `load_model` runs once.

pub mod cloud;
pub mod local;
pub mod mock;

pub use cloud::CloudDetector;
pub use local::LocalModelDetector;
pub use mock::MockDetector;

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{AnalysisFailure, DetectionError};
use crate::types::{DetectionSource, DetectorStatus, ImageInput, RawDetection};

/// Detector variant contract
#[async_trait]
pub trait Detector: Send + Sync {
    /// Stable identifier used in logs and aggregated errors
    fn name(&self) -> &str;

    /// Source stamped on results produced by this variant
    fn source(&self) -> DetectionSource;

    /// Acquire model resources
    ///
    /// # Errors
    /// `DetectionError::ModelLoad` on failure; the variant must stay retryable
    async fn load_model(&self) -> Result<(), DetectionError>;

    /// Analyze one image
    ///
    /// # Errors
    /// * `DetectionError::NotLoaded` - called before a successful load
    /// * `DetectionError::Analysis` - bad input, inference, network, timeout
    async fn analyze(&self, image: &ImageInput) -> Result<RawDetection, DetectionError>;

    /// Release model resources; no-op when already unloaded
    async fn unload(&self);
}

type LoadFuture = Shared<BoxFuture<'static, Result<(), DetectionError>>>;

enum LoadState {
    Unloaded,
    Loading { generation: u64, future: LoadFuture },
    Loaded,
}

struct EntryState {
    load: LoadState,
    generation: u64,
}

/// Registry-owned wrapper around one variant
///
/// State machine: unloaded → loading → loaded, loading → unloaded on
/// failure, loaded → unloaded on `unload`.
pub struct DetectorEntry {
    detector: Arc<dyn Detector>,
    name: String,
    source: DetectionSource,
    state: Mutex<EntryState>,
    /// Serializes the variant's own load/unload calls
    transition: Arc<tokio::sync::Mutex<()>>,
    load_timeout: Duration,
    analyze_timeout: Duration,
}

impl DetectorEntry {
    pub fn new(detector: Arc<dyn Detector>, load_timeout: Duration, analyze_timeout: Duration) -> Self {
        let name = detector.name().to_string();
        let source = detector.source();
        Self {
            detector,
            name,
            source,
            state: Mutex::new(EntryState {
                load: LoadState::Unloaded,
                generation: 0,
            }),
            transition: Arc::new(tokio::sync::Mutex::new(())),
            load_timeout,
            analyze_timeout,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> DetectionSource {
        self.source
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self.lock_state().load, LoadState::Loaded)
    }

    pub fn is_loading(&self) -> bool {
        matches!(self.lock_state().load, LoadState::Loading { .. })
    }

    pub fn status(&self) -> DetectorStatus {
        let state = self.lock_state();
        DetectorStatus {
            name: self.name.clone(),
            source: self.source,
            loaded: matches!(state.load, LoadState::Loaded),
            loading: matches!(state.load, LoadState::Loading { .. }),
        }
    }

    /// Ensure the variant is loaded
    ///
    /// Returns immediately when loaded. When a load is in flight the caller
    /// awaits that same load instead of starting another.
    pub async fn load_model(&self) -> Result<(), DetectionError> {
        let (future, generation) = {
            let mut state = self.lock_state();
            match &state.load {
                LoadState::Loaded => return Ok(()),
                LoadState::Loading { generation, future } => (future.clone(), *generation),
                LoadState::Unloaded => {
                    state.generation += 1;
                    let generation = state.generation;
                    let future = self.start_load();
                    state.load = LoadState::Loading {
                        generation,
                        future: future.clone(),
                    };
                    (future, generation)
                }
            }
        };

        let outcome = future.await;
        self.finish_load(generation, &outcome);
        outcome
    }

    /// Analyze with the loaded variant
    ///
    /// Fails fast with `NotLoaded` instead of loading on demand. Returns the
    /// raw output and the measured duration of the variant's analyze call.
    pub async fn analyze(&self, image: &ImageInput) -> Result<(RawDetection, Duration), DetectionError> {
        if !self.is_loaded() {
            return Err(DetectionError::not_loaded(&self.name));
        }

        let started = Instant::now();
        let outcome = tokio::time::timeout(self.analyze_timeout, self.detector.analyze(image)).await;
        let elapsed = started.elapsed();

        match outcome {
            Ok(Ok(raw)) => {
                debug!(detector = %self.name, elapsed_ms = elapsed.as_millis() as u64, "Analysis complete");
                Ok((raw, elapsed))
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(DetectionError::analysis(
                &self.name,
                AnalysisFailure::Timeout,
                format!("no result within {} ms", self.analyze_timeout.as_millis()),
            )),
        }
    }

    /// Release the variant's resources; no-op when unloaded
    ///
    /// An in-flight load is awaited first, then unloaded.
    pub async fn unload(&self) {
        loop {
            let pending = {
                let state = self.lock_state();
                match &state.load {
                    LoadState::Unloaded => return,
                    LoadState::Loaded => None,
                    LoadState::Loading { generation, future } => Some((future.clone(), *generation)),
                }
            };

            if let Some((future, generation)) = pending {
                let outcome = future.await;
                self.finish_load(generation, &outcome);
                continue;
            }

            let _transition = self.transition.lock().await;
            {
                let mut state = self.lock_state();
                if !matches!(state.load, LoadState::Loaded) {
                    continue;
                }
                state.load = LoadState::Unloaded;
            }
            self.detector.unload().await;
            info!(detector = %self.name, "Detector unloaded");
            return;
        }
    }

    fn start_load(&self) -> LoadFuture {
        let detector = Arc::clone(&self.detector);
        let transition = Arc::clone(&self.transition);
        let name = self.name.clone();
        let timeout = self.load_timeout;

        async move {
            let _transition = transition.lock().await;
            debug!(detector = %name, "Loading detector model");
            let started = Instant::now();

            match tokio::time::timeout(timeout, detector.load_model()).await {
                Ok(Ok(())) => {
                    info!(
                        detector = %name,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Detector model loaded"
                    );
                    Ok(())
                }
                Ok(Err(e)) => {
                    warn!(detector = %name, error = %e, "Detector model load failed");
                    Err(e)
                }
                Err(_) => {
                    detector.unload().await;
                    let e = DetectionError::model_load(
                        &name,
                        format!("timed out after {} ms", timeout.as_millis()),
                    );
                    warn!(detector = %name, error = %e, "Detector model load timed out");
                    Err(e)
                }
            }
        }
        .boxed()
        .shared()
    }

    fn finish_load(&self, generation: u64, outcome: &Result<(), DetectionError>) {
        let mut state = self.lock_state();
        let current = matches!(
            state.load,
            LoadState::Loading { generation: g, .. } if g == generation
        );
        if current {
            state.load = match outcome {
                Ok(()) => LoadState::Loaded,
                Err(_) => LoadState::Unloaded,
            };
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, EntryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ============================================================================
// Tests
// ============================================================================
