use std::net::{IpAddr, Ipv6Addr, SocketAddr};

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Installs the Prometheus recorder and serves `/metrics` on `[::]:port`.
///
/// Every series carries an `app` label set to `app_name` and a `run` label identifying the
/// harness run, so concurrent runs scraped by the same Prometheus stay apart.
pub fn init_metrics(app_name: &str, run_id: &str, port: u16) -> Result<(), BuildError> {
    PrometheusBuilder::new()
        .with_http_listener(SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), port))
        .add_global_label("app", app_name)
        .add_global_label("run", run_id)
        .install()
}
