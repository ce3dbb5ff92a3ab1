use std::cmp::Ordering;
use std::time::Instant;

use pg_core::{
    Disposition, DispositionPipeline, FilterListRegistry, RequestType, ResourceRequest, TabSession,
};

const BENCH_PAGE: &str = "https://www.example.com/article/1";
const MAX_LISTED_HOSTS: usize = 200;

const BENIGN_REQUESTS: &[(&str, RequestType)] = &[
    ("https://www.example.com/static/app.js", RequestType::SCRIPT),
    ("https://www.example.com/static/site.css", RequestType::STYLESHEET),
    ("https://cdn.example-static.net/img/hero.jpg", RequestType::IMAGE),
    ("https://fonts.example-fonts.com/inter.woff2", RequestType::FONT),
    ("https://api.example.com/v1/comments?id=1", RequestType::XMLHTTPREQUEST),
    ("https://video.example-media.org/embed/42", RequestType::SUBDOCUMENT),
];

pub struct BenchResult {
    pub requests: usize,
    pub op_count: usize,
    pub total_ms: f64,
    pub avg_us: f64,
    pub p50_us: f64,
    pub p95_us: f64,
    pub p99_us: f64,
    pub ops_per_sec: u64,
    pub blocked_pct: f64,
}

/// Request mix: hosts named by the loaded block rules, plus ordinary
/// first- and third-party page resources.
fn request_mix(registry: &FilterListRegistry) -> Vec<(String, RequestType)> {
    let lists = registry.lists();
    let mut requests: Vec<(String, RequestType)> = lists
        .iter()
        .flat_map(|(_, list)| list.block_rules().iter())
        .filter_map(|rule| rule.host.as_deref())
        .take(MAX_LISTED_HOSTS)
        .map(|host| (format!("https://{host}/ads/banner.js?slot=top"), RequestType::SCRIPT))
        .collect();

    requests.extend(BENIGN_REQUESTS.iter().map(|&(url, ty)| (url.to_string(), ty)));
    requests
}

pub fn run(registry: &FilterListRegistry, iterations: usize) -> BenchResult {
    let requests = request_mix(registry);
    let mut session = TabSession::new();
    session.begin_navigation(BENCH_PAGE, registry);
    let pipeline = DispositionPipeline::new(registry);

    for (url, ty) in &requests {
        pipeline.classify(&session, &ResourceRequest::new(url, *ty));
    }
    session.ledger().clear();

    let mut latencies = Vec::with_capacity(requests.len() * iterations);
    let mut blocked = 0usize;
    let start = Instant::now();

    for _ in 0..iterations {
        for (url, ty) in &requests {
            let op_start = Instant::now();
            let record = pipeline.classify(&session, &ResourceRequest::new(url, *ty));
            latencies.push(op_start.elapsed().as_secs_f64() * 1_000_000.0);
            if matches!(record.disposition, Disposition::Blocked | Disposition::ThirdPartyBlocked) {
                blocked += 1;
            }
        }
        session.ledger().clear();
    }

    let total_ms = start.elapsed().as_secs_f64() * 1000.0;
    latencies.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));

    let op_count = latencies.len();
    let avg_us = if op_count == 0 {
        0.0
    } else {
        latencies.iter().sum::<f64>() / op_count as f64
    };
    let ops_per_sec = if total_ms > 0.0 {
        (op_count as f64 / (total_ms / 1000.0)) as u64
    } else {
        0
    };
    let blocked_pct = if op_count == 0 {
        0.0
    } else {
        blocked as f64 * 100.0 / op_count as f64
    };

    BenchResult {
        requests: requests.len(),
        op_count,
        total_ms,
        avg_us,
        p50_us: percentile(&latencies, 0.50),
        p95_us: percentile(&latencies, 0.95),
        p99_us: percentile(&latencies, 0.99),
        ops_per_sec,
        blocked_pct,
    }
}

pub fn format_result(result: &BenchResult) -> String {
    format!(
        "classify:\n  Requests: {}\n  Ops: {}\n  Total: {:.2} ms\n  Avg: {:.2} us\n  P50: {:.2} us\n  P95: {:.2} us\n  P99: {:.2} us\n  Throughput: {} ops/sec\n  Blocked: {:.1}%",
        result.requests,
        result.op_count,
        result.total_ms,
        result.avg_us,
        result.p50_us,
        result.p95_us,
        result.p99_us,
        result.ops_per_sec,
        result.blocked_pct,
    )
}

fn percentile(values: &[f64], p: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let idx = ((values.len() as f64) * p).ceil() as usize;
    let idx = idx.saturating_sub(1).min(values.len() - 1);
    values[idx]
}
