//! The periodic telemetry cycle.
//!
//! Each cycle samples the host, lists containers on both backends, records
//! one history entry, and broadcasts a [`TelemetryFrame`]. A failed host
//! sample costs that cycle its history entry and nothing else.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use vigil_common::config::VigilConfig;
use vigil_common::types::BackendKind;
use vigil_runtime::dispatch::{Dispatcher, ListResponse};

use crate::history::{History, HistoryBuffer, HistorySample};
use crate::host::{HostSampler, HostStats};

/// Frames buffered per subscriber before slow receivers start lagging.
const CHANNEL_CAPACITY: usize = 16;

/// Everything observed in one cycle.
#[derive(Debug, Clone, Serialize)]
pub struct TelemetryFrame {
    /// Host sample, absent if sampling failed this cycle.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<HostStats>,
    /// Engine-backed containers.
    pub docker: ListResponse,
    /// Mini runtime containers.
    pub mini: ListResponse,
}

/// Drives the telemetry cycle and owns the history buffer.
pub struct TelemetryAggregator {
    sampler: Arc<dyn HostSampler>,
    dispatcher: Dispatcher,
    history: Mutex<HistoryBuffer>,
    current: Mutex<Option<HostStats>>,
    sender: broadcast::Sender<TelemetryFrame>,
    period: Duration,
}

impl TelemetryAggregator {
    /// Creates an aggregator with the configured period and history size.
    #[must_use]
    pub fn new(
        config: &VigilConfig,
        sampler: Arc<dyn HostSampler>,
        dispatcher: Dispatcher,
    ) -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            sampler,
            dispatcher,
            history: Mutex::new(HistoryBuffer::new(config.history_capacity)),
            current: Mutex::new(None),
            sender,
            period: config.poll_interval(),
        }
    }

    /// Subscribes to frames published from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<TelemetryFrame> {
        self.sender.subscribe()
    }

    fn history_buffer(&self) -> MutexGuard<'_, HistoryBuffer> {
        self.history.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn current_slot(&self) -> MutexGuard<'_, Option<HostStats>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Column view of the retained history.
    #[must_use]
    pub fn history(&self) -> History {
        self.history_buffer().snapshot()
    }

    /// Most recent successful host sample.
    #[must_use]
    pub fn current_stats(&self) -> Option<HostStats> {
        self.current_slot().clone()
    }

    /// Runs one cycle and returns the frame it published.
    pub async fn tick(&self) -> TelemetryFrame {
        let engine = BackendKind::Engine.to_string();
        let local = BackendKind::Local.to_string();
        let (host, docker, mini) = tokio::join!(
            self.sampler.sample(),
            self.dispatcher.list(Some(engine.as_str())),
            self.dispatcher.list(Some(local.as_str())),
        );

        let host = match host {
            Ok(stats) => {
                self.history_buffer()
                    .push(HistorySample::now(stats.cpu, stats.memory.percent, stats.gpu));
                *self.current_slot() = Some(stats.clone());
                Some(stats)
            }
            Err(e) => {
                tracing::warn!(error = %e, "host sample failed, skipping history entry");
                None
            }
        };

        let frame = TelemetryFrame { host, docker, mini };
        if self.sender.send(frame.clone()).is_err() {
            tracing::trace!("no telemetry subscribers");
        }
        frame
    }

    /// Runs the cycle every period, forever or for `cycles` cycles.
    pub async fn run(&self, cycles: Option<u64>) {
        let mut interval = tokio::time::interval(self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(period_ms = self.period.as_millis(), "telemetry cycle started");

        let mut done = 0_u64;
        while cycles.is_none_or(|limit| done < limit) {
            let _ = interval.tick().await;
            let _ = self.tick().await;
            done += 1;
        }
        tracing::info!(cycles = done, "telemetry cycle finished");
    }

    /// Spawns the unbounded cycle on the current Tokio runtime.
    #[must_use]
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(None).await })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use vigil_common::error::{Result, VigilError};
    use vigil_common::types::{ContainerId, ContainerRecord, LogEntry};
    use vigil_runtime::backend::{ContainerBackend, CreateRequest};

    use super::*;
    use crate::host::UsageStats;

    /// Sampler that fails on every `fail_every`-th call.
    struct ScriptedSampler {
        calls: AtomicUsize,
        fail_every: usize,
        gpu: Option<f64>,
    }

    #[async_trait]
    impl HostSampler for ScriptedSampler {
        #[allow(clippy::cast_precision_loss)]
        async fn sample(&self) -> Result<HostStats> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail_every > 0 && n % self.fail_every == 0 {
                return Err(VigilError::TransientStatsFailure {
                    message: "sensor offline".into(),
                });
            }
            Ok(HostStats {
                cpu: n as f64,
                memory: UsageStats {
                    total: 1000,
                    used: 400,
                    percent: 40.0,
                },
                disk: UsageStats::default(),
                gpu: self.gpu,
            })
        }
    }

    struct EmptyBackend(BackendKind);

    #[async_trait]
    impl ContainerBackend for EmptyBackend {
        fn is_available(&self) -> bool {
            self.0 == BackendKind::Engine
        }

        async fn list(&self) -> Result<Vec<ContainerRecord>> {
            Ok(Vec::new())
        }

        async fn create(&self, request: &CreateRequest) -> Result<ContainerRecord> {
            Err(VigilError::ImageNotFound {
                image: request.image.clone(),
            })
        }

        async fn start(&self, id: &ContainerId) -> Result<Option<ContainerRecord>> {
            Err(VigilError::container_not_found(id.as_str()))
        }

        async fn stop(&self, id: &ContainerId) -> Result<Option<ContainerRecord>> {
            Err(VigilError::container_not_found(id.as_str()))
        }

        async fn delete(&self, id: &ContainerId) -> Result<()> {
            Err(VigilError::container_not_found(id.as_str()))
        }

        async fn logs(&self, id: &ContainerId, _tail: usize) -> Result<Vec<LogEntry>> {
            Err(VigilError::container_not_found(id.as_str()))
        }
    }

    fn aggregator(fail_every: usize, gpu: Option<f64>) -> TelemetryAggregator {
        let dir = std::env::temp_dir();
        let mut config = VigilConfig::with_data_dir(dir);
        config.poll_interval_ms = 5;
        let sampler = Arc::new(ScriptedSampler {
            calls: AtomicUsize::new(0),
            fail_every,
            gpu,
        });
        let dispatcher = Dispatcher::new(
            Arc::new(EmptyBackend(BackendKind::Engine)),
            Arc::new(EmptyBackend(BackendKind::Local)),
        );
        TelemetryAggregator::new(&config, sampler, dispatcher)
    }

    #[tokio::test]
    async fn tick_records_history_and_current_stats() {
        let agg = aggregator(0, Some(55.0));
        assert!(agg.current_stats().is_none());

        let frame = agg.tick().await;
        assert!(frame.host.is_some());
        assert!(frame.docker.error.is_none());
        assert!(frame.mini.error.is_some());

        let history = agg.history();
        assert_eq!(history.cpu, vec![1.0]);
        assert_eq!(history.memory, vec![40.0]);
        assert_eq!(history.gpu, vec![55.0]);
        assert_eq!(history.timestamps.len(), 1);
        assert_eq!(agg.current_stats().unwrap().cpu, 1.0);
    }

    #[tokio::test]
    async fn failed_sample_skips_history() {
        let agg = aggregator(2, None);
        let _ = agg.tick().await;
        let frame = agg.tick().await;
        let _ = agg.tick().await;

        assert!(frame.host.is_none());
        let history = agg.history();
        assert_eq!(history.cpu, vec![1.0, 3.0]);
        assert_eq!(history.gpu, vec![0.0, 0.0]);
        assert_eq!(agg.current_stats().unwrap().cpu, 3.0);
    }

    #[tokio::test]
    async fn history_is_capped() {
        let agg = aggregator(0, None);
        for _ in 0..65 {
            let _ = agg.tick().await;
        }
        let history = agg.history();
        assert_eq!(history.cpu.len(), 60);
        assert_eq!(history.timestamps.len(), 60);
        assert_eq!(history.cpu[0], 6.0);
    }

    #[tokio::test]
    async fn bounded_run_broadcasts_each_frame() {
        let agg = aggregator(0, None);
        let mut rx = agg.subscribe();
        agg.run(Some(3)).await;

        for expected in 1..=3 {
            let frame = rx.recv().await.unwrap();
            assert_eq!(frame.host.unwrap().cpu, f64::from(expected));
        }
        assert_eq!(agg.history().cpu.len(), 3);
    }

    #[test]
    fn frame_json_shape() {
        let frame = TelemetryFrame {
            host: None,
            docker: ListResponse::default(),
            mini: ListResponse::default(),
        };
        let json = serde_json::to_value(frame).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"docker": {"containers": []}, "mini": {"containers": []}})
        );
    }
}
