use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwap;
use prometheus::core::{Collector, Desc};
use prometheus::proto::MetricFamily;
use prometheus::{Encoder, Gauge, GaugeVec, Opts, Registry, TextEncoder};
use strum::IntoEnumIterator;
use tracing::warn;

use super::{MetricKind, Snapshot, NAMESPACE};
use crate::{BUILD_DATE, BUILT_BY, COMMIT, VERSION};

/// Namespace of metrics describing the exporter binary.
pub const EXPORTER_NAMESPACE: &str = "elb_trust_store_exporter";

/// Shared owner of the current snapshot.
///
/// `publish` replaces the snapshot in one atomic store; `current` never blocks
/// and returns either the old or the new snapshot, never a mixture.
#[derive(Clone)]
pub struct SnapshotHandle {
    current: Arc<ArcSwap<Snapshot>>,
}

impl SnapshotHandle {
    pub fn new() -> Self {
        SnapshotHandle {
            current: Arc::new(ArcSwap::from_pointee(Snapshot::empty())),
        }
    }

    pub fn publish(&self, snapshot: Snapshot) {
        self.current.store(Arc::new(snapshot));
    }

    pub fn current(&self) -> Arc<Snapshot> {
        self.current.load_full()
    }
}

impl Default for SnapshotHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SnapshotHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SnapshotHandle")
            .field("current", &"<ArcSwap<Snapshot>>")
            .field("samples", &self.current.load().len())
            .finish()
    }
}

fn opts_for(kind: MetricKind) -> Opts {
    Opts::new(kind.name(), kind.help())
        .namespace(NAMESPACE)
        .subsystem(kind.subsystem())
}

/// Prometheus collector exposing whatever snapshot is current at gather time.
pub struct SnapshotCollector {
    handle: SnapshotHandle,
    descs: Vec<Desc>,
}

impl SnapshotCollector {
    pub fn new(handle: SnapshotHandle) -> prometheus::Result<Self> {
        let descs = MetricKind::iter()
            .map(|kind| {
                Desc::new(
                    kind.fq_name(),
                    kind.help().to_string(),
                    kind.label_names().iter().map(ToString::to_string).collect(),
                    HashMap::new(),
                )
            })
            .collect::<prometheus::Result<Vec<_>>>()?;
        Ok(SnapshotCollector { handle, descs })
    }
}

impl Collector for SnapshotCollector {
    fn desc(&self) -> Vec<&Desc> {
        self.descs.iter().collect()
    }

    fn collect(&self) -> Vec<MetricFamily> {
        let snapshot = self.handle.current();
        let mut families = Vec::new();

        for kind in MetricKind::iter() {
            let gauges = match GaugeVec::new(opts_for(kind), kind.label_names()) {
                Ok(gauges) => gauges,
                Err(err) => {
                    warn!(metric = %kind.fq_name(), error = %err, "cannot render metric family");
                    continue;
                }
            };
            for sample in snapshot.of_kind(kind) {
                let values: Vec<&str> = sample.label_values().iter().map(String::as_str).collect();
                gauges.with_label_values(&values).set(sample.value());
            }
            families.extend(gauges.collect());
        }
        families
    }
}

fn build_info() -> prometheus::Result<Gauge> {
    let opts = Opts::new(
        "build_info",
        "A metric with a constant '1' value labeled with version, commit, date and builtBy from which the exporter was built.",
    )
    .namespace(EXPORTER_NAMESPACE)
    .const_label("version", VERSION)
    .const_label("commit", COMMIT)
    .const_label("date", BUILD_DATE)
    .const_label("builtBy", BUILT_BY);
    let gauge = Gauge::with_opts(opts)?;
    gauge.set(1.0);
    Ok(gauge)
}

/// Registry served on the metrics endpoint.
#[derive(Clone)]
pub struct ExporterRegistry {
    registry: Registry,
}

impl ExporterRegistry {
    /// Registers the snapshot collector, build info and process metrics.
    pub fn new(handle: SnapshotHandle) -> prometheus::Result<Self> {
        let registry = Registry::new();
        registry.register(Box::new(SnapshotCollector::new(handle)?))?;
        registry.register(Box::new(build_info()?))?;
        #[cfg(target_os = "linux")]
        registry.register(Box::new(
            prometheus::process_collector::ProcessCollector::for_self(),
        ))?;
        Ok(ExporterRegistry { registry })
    }

    /// Text exposition of every registered metric.
    pub fn render(&self) -> prometheus::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|err| prometheus::Error::Msg(err.to_string()))
    }

    pub fn content_type() -> &'static str {
        prometheus::TEXT_FORMAT
    }
}

impl fmt::Debug for ExporterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExporterRegistry")
            .field("registry", &"<Registry>")
            .finish()
    }
}
