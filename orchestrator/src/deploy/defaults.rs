//! Monitoring objects created when a request does not list its own

use crate::models::{AlertRule, DashboardSpec, DeploymentRequest, PanelSpec};

fn panel(title: &str, query: String, kind: &str) -> PanelSpec {
    PanelSpec {
        title: title.to_string(),
        query,
        kind: kind.to_string(),
    }
}

/// Manufacturing overview plus the service's golden signals
pub fn default_dashboard(request: &DeploymentRequest) -> DashboardSpec {
    let selector = format!(
        "service=\"{}\",namespace=\"{}\"",
        request.name, request.config.namespace
    );
    DashboardSpec {
        title: format!("Manufacturing Overview - {}", request.name),
        panels: vec![
            panel(
                "Production Volume",
                format!("sum(increase(parts_produced_total{{{}}}[1h]))", selector),
                "timeseries",
            ),
            panel(
                "Current OEE",
                format!("avg(oee_score{{{}}})", selector),
                "stat",
            ),
            panel(
                "Error Rate",
                format!(
                    "100 * sum(rate(http_requests_total{{{},code=~\"5..\"}}[5m])) / sum(rate(http_requests_total{{{}}}[5m]))",
                    selector, selector
                ),
                "timeseries",
            ),
            panel(
                "Latency p95",
                format!(
                    "histogram_quantile(0.95, sum(rate(http_request_duration_seconds_bucket{{{}}}[5m])) by (le))",
                    selector
                ),
                "timeseries",
            ),
        ],
        tags: vec![
            "fabrollout".to_string(),
            request.config.environment.clone(),
            request.name.clone(),
        ],
    }
}

/// Alert rules derived from the request's SLA targets
pub fn default_alert_rules(request: &DeploymentRequest) -> Vec<AlertRule> {
    let sla = &request.config.monitoring.sla;
    let selector = format!(
        "service=\"{}\",namespace=\"{}\"",
        request.name, request.config.namespace
    );
    vec![
        AlertRule {
            name: format!("{}-high-error-rate", request.name),
            expression: format!(
                "100 * sum(rate(http_requests_total{{{},code=~\"5..\"}}[5m])) / sum(rate(http_requests_total{{{}}}[5m])) > {}",
                selector, selector, sla.error_rate
            ),
            severity: "critical".to_string(),
            for_secs: 300,
        },
        AlertRule {
            name: format!("{}-high-latency", request.name),
            expression: format!(
                "histogram_quantile(0.95, sum(rate(http_request_duration_seconds_bucket{{{}}}[5m])) by (le)) * 1000 > {}",
                selector, sla.latency_p95_ms
            ),
            severity: "warning".to_string(),
            for_secs: 600,
        },
        AlertRule {
            name: format!("{}-availability", request.name),
            expression: format!(
                "100 * avg_over_time(up{{{}}}[1h]) < {}",
                selector, sla.availability
            ),
            severity: "critical".to_string(),
            for_secs: 300,
        },
    ]
}
