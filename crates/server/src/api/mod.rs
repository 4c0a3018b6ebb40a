//! # HTTP API
//!
//! Thin axum surface over one shared [`Controller`].

pub mod pipeline;

use concord_core::models::CoordinatorConfig;
use concord_core::swarm::{
    ChannelSink, CompositeSink, Controller, MetricsSink, PipelineEvent, TracingSink,
};
use concord_core::workers::WorkerRegistry;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Application state
pub struct AppState {
    pub controller: Controller,
    /// Event feed for the SSE stream
    pub events: ChannelSink,
    pub metrics: Arc<MetricsSink>,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    pub fn new(config: CoordinatorConfig, registry: WorkerRegistry) -> Self {
        let (event_tx, _) = broadcast::channel::<PipelineEvent>(256);
        let events = ChannelSink::new(event_tx);
        let metrics = Arc::new(MetricsSink::new());

        let sink = CompositeSink::new()
            .with(Arc::new(TracingSink))
            .with(Arc::new(events.clone()))
            .with(metrics.clone());

        Self {
            controller: Controller::new(config, registry).with_sink(Arc::new(sink)),
            events,
            metrics,
        }
    }
}
