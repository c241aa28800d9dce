//! preload-pager: drive the preloading pagination cache against a synthetic
//! data source and report how it performed.
//!
//! The source serves `--total-items` records with simulated latency and
//! random network failures. A reader walks through the list (mostly forward,
//! sometimes back, the odd jump or refresh) while the memory governor watches
//! the cache and the analytics aggregator records everything.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use clap::Parser;
use rand::Rng;
use serde::Serialize;
use tracing::{info, warn};

use preload_pager::analytics::{AnalyticsAggregator, MetricsExporter};
use preload_pager::cache::Page;
use preload_pager::config::{Cli, Config};
use preload_pager::error::FetchError;
use preload_pager::memory::MemoryGovernor;
use preload_pager::pagination::{DataSource, PageResult, PaginationController};
use preload_pager::retry::{ErrorEngine, TypedClassifier};

/// One row of the synthetic list.
#[derive(Debug, Clone, Serialize)]
struct Guest {
    id: u64,
    name: String,
    checked_in: bool,
}

/// In-memory list behind a slow, flaky "network".
struct SyntheticSource {
    total_items: u64,
    latency: Duration,
    failure_rate: f64,
}

#[async_trait]
impl DataSource<Guest> for SyntheticSource {
    async fn fetch_page(
        &self,
        page: Page,
        items_per_page: u32,
    ) -> anyhow::Result<PageResult<Guest>> {
        let jitter = rand::thread_rng().gen_range(0.5..1.5);
        tokio::time::sleep(self.latency.mul_f64(jitter)).await;

        if rand::thread_rng().gen_bool(self.failure_rate.clamp(0.0, 1.0)) {
            let message = format!("connection reset while fetching page {page}");
            return Err(FetchError::Network(message).into());
        }

        let start = u64::from(page.saturating_sub(1)) * u64::from(items_per_page);
        let end = (start + u64::from(items_per_page)).min(self.total_items);
        let items = (start..end)
            .map(|id| Guest {
                id,
                name: format!("guest-{id:05}"),
                checked_in: id % 3 == 0,
            })
            .collect();

        Ok(PageResult {
            items,
            total_items: self.total_items,
            total_pages: 0,
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments.
    let cli = Cli::parse();

    // Initialize tracing/logging.
    let filter = if cli.verbose {
        "preload_pager=debug"
    } else {
        "preload_pager=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with_target(true)
        .init();

    info!("preload-pager v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration.
    let mut config = Config::load(&cli.config)?;
    if let Some(items_per_page) = cli.items_per_page {
        config.pagination.items_per_page = items_per_page;
    }

    info!(
        items_per_page = config.pagination.items_per_page,
        preload_pages = config.pagination.preload_pages,
        cache_size = config.pagination.cache_size,
        "Configuration loaded"
    );

    // Wire the subsystems.
    let engine = ErrorEngine::with_classifier(config.retry.clone(), TypedClassifier::new());
    let analytics = AnalyticsAggregator::new(config.analytics.clone());
    let governor = MemoryGovernor::new(config.memory.clone());

    let source = Arc::new(SyntheticSource {
        total_items: cli.total_items as u64,
        latency: Duration::from_millis(cli.latency_ms),
        failure_rate: cli.failure_rate,
    });

    let controller = PaginationController::<Guest>::builder(source)
        .config(config.pagination.clone())
        .errors(engine.clone())
        .analytics(analytics.clone())
        .build();

    governor
        .register_cache_manager("guests", controller.managed_cache())
        .await;
    governor.start_default_monitoring().await;

    if let Err(failure) = controller.init().await {
        warn!(%failure, "Initial load failed, continuing");
    }

    simulate(&controller, cli.steps, cli.latency_ms).await;

    let pressure = governor.check_pressure().await;
    if let Some(cleanup) = &pressure.cleanup {
        info!(strategy = %cleanup.strategy, evicted = cleanup.pages_evicted, "Cleanup ran");
    }

    // Report.
    let summary = analytics.summary().await;
    let errors = engine.stats().await;
    let prefetch = controller.prefetch_stats();
    let info = controller.info();

    info!(
        rating = %summary.rating,
        hit_rate = summary.metrics.cache.hit_rate,
        avg_load_ms = summary.metrics.load_times.average_ms,
        errors = errors.total,
        unresolved = errors.unresolved,
        prefetched = prefetch.completed,
        page = info.current_page,
        total_pages = info.total_pages,
        "Run complete"
    );
    for recommendation in &summary.recommendations {
        info!("Recommendation: {recommendation}");
    }

    if cli.json {
        let json = analytics.export_json().await.context("serializing analytics export")?;
        println!("{json}");
    }

    if cli.metrics {
        let exporter = MetricsExporter::new("preload_pager")?;
        exporter.observe_metrics(&summary.metrics, summary.rating);
        exporter.observe_memory(&pressure.snapshot);
        print!("{}", exporter.render()?);
    }

    governor.destroy().await;
    controller.destroy().await;
    engine.destroy().await;

    Ok(())
}

/// Random walk through the list.
async fn simulate(controller: &PaginationController<Guest>, steps: usize, latency_ms: u64) {
    let think_time = Duration::from_millis(latency_ms.saturating_mul(3));

    for step in 0..steps {
        // Pick the move first: ThreadRng must not live across an await.
        let roll: f64 = rand::thread_rng().gen();
        let jump_target = {
            let total = controller.info().total_pages.max(1);
            rand::thread_rng().gen_range(1..=total)
        };

        let result = if roll < 0.70 {
            if controller.has_next_page() {
                controller.next_page().await
            } else {
                controller.go_to_first_page().await
            }
        } else if roll < 0.85 {
            controller.prev_page().await
        } else if roll < 0.95 {
            controller.go_to_page(jump_target).await
        } else {
            controller.refresh_current().await
        };

        match result {
            Ok(()) => {
                let page = controller.current_page();
                let items = controller.current_items().await;
                info!(step, page, items = items.len(), "Viewing page");
            }
            Err(failure) => warn!(step, %failure, "Navigation failed"),
        }

        tokio::time::sleep(think_time).await;
    }
}
