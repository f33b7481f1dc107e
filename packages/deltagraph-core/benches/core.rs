use std::env;
use std::fs;
use std::path::PathBuf;
use std::time::Instant;

use deltagraph_core::{Delta, Event, ObjectChange, Schema, Strategies, VersionManager, ROOT_TAG};

const CI_CONFIG: &[(u64, u64)] = &[(100, 5), (1_000, 1), (10_000, 1)];

const LOCAL_CONFIG: &[(u64, u64)] = &[(1, 1), (10, 1), (100, 1), (1_000, 1), (10_000, 1)];

#[derive(serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct Output {
    implementation: &'static str,
    storage: &'static str,
    workload: String,
    timestamp: String,
    name: String,
    total_ops: u64,
    duration_ms: f64,
    ops_per_sec: f64,
    extra: Extra,
    source_file: Option<String>,
}

#[derive(serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct Extra {
    count: u64,
    mode: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    iterations: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    avg_duration_ms: Option<f64>,
}

#[derive(Clone, Copy)]
enum Mode {
    /// One app, every push starts at the head.
    Linear,
    /// Two apps that never pull, so every push after the first is merged.
    Divergent,
}

impl Mode {
    fn name(self) -> &'static str {
        match self {
            Mode::Linear => "linear",
            Mode::Divergent => "divergent",
        }
    }
}

fn is_ci() -> bool {
    env::var("CI").map(|v| v == "true").unwrap_or(false)
}

fn manager() -> VersionManager {
    let schema = Schema::new().with_type("Car", ["oid", "xvel", "yvel", "xpos", "ypos"], ["Car"]);
    VersionManager::new("bench", schema, Strategies::new())
}

fn change(app: usize, i: u64, first: bool) -> Delta {
    let event = if first { Event::New } else { Event::Modification };
    Delta::new().with_object(
        "Car",
        format!("car{app}"),
        ObjectChange::new("Car", event)
            .with_dim("oid", app as u64)
            .with_dim("xvel", i),
    )
}

fn run_benchmark(mode: Mode, count: u64) -> f64 {
    let manager = manager();
    let apps = match mode {
        Mode::Linear => 1,
        Mode::Divergent => 2,
    };
    let mut versions = vec![ROOT_TAG.to_string(); apps];

    let start = Instant::now();
    for i in 0..count {
        let app = (i % apps as u64) as usize;
        let name = format!("app{app}");
        let end = format!("v{i}");
        manager
            .receive_data(&name, &versions[app], &end, change(app, i, i < apps as u64), true)
            .expect("push");
        versions[app] = end;
    }
    let read = manager
        .retrieve_data("reader", ROOT_TAG, None)
        .expect("pull");
    assert!(!read.delta.is_empty());
    start.elapsed().as_secs_f64() * 1000.0
}

fn main() {
    let is_ci_env = is_ci();
    let config: &[(u64, u64)] = if is_ci_env { CI_CONFIG } else { LOCAL_CONFIG };

    let mut out_dir: Option<PathBuf> = None;
    let mut custom_config: Option<Vec<(u64, u64)>> = None;
    for arg in env::args().skip(1) {
        if let Some(val) = arg.strip_prefix("--count=") {
            let count = val.parse().unwrap_or(500);
            custom_config = Some(vec![(count, 1)]);
        } else if let Some(val) = arg.strip_prefix("--counts=") {
            let parsed: Vec<(u64, u64)> = val
                .split(',')
                .filter_map(|s| s.trim().parse::<u64>().ok())
                .map(|c| (c, 1))
                .collect();
            if !parsed.is_empty() {
                custom_config = Some(parsed);
            }
        } else if let Some(val) = arg.strip_prefix("--out-dir=") {
            out_dir = Some(PathBuf::from(val));
        }
    }

    let config = custom_config.as_deref().unwrap_or(config);
    let out_dir = out_dir.unwrap_or_else(|| PathBuf::from("benchmarks/core"));
    fs::create_dir_all(&out_dir).expect("mkdirs");

    for mode in [Mode::Linear, Mode::Divergent] {
        for &(count, iterations) in config {
            let (duration_ms, iterations_opt, avg_duration_ms) = if iterations > 1 {
                let mut durations = Vec::new();
                for _ in 0..iterations {
                    durations.push(run_benchmark(mode, count));
                }
                let avg = durations.iter().sum::<f64>() / durations.len() as f64;
                (avg, Some(iterations), Some(avg))
            } else {
                (run_benchmark(mode, count), None, None)
            };

            let workload_name = format!("push-{}-{}", mode.name(), count);
            let out_path = out_dir.join(format!("memory-{}.json", workload_name));

            let output = Output {
                implementation: "core-version-graph",
                storage: "memory",
                workload: workload_name.clone(),
                timestamp: chrono::Utc::now().to_rfc3339(),
                name: workload_name.clone(),
                total_ops: count + 1,
                duration_ms,
                ops_per_sec: if duration_ms > 0.0 {
                    (count as f64 + 1.0) / duration_ms * 1000.0
                } else {
                    f64::INFINITY
                },
                extra: Extra {
                    count,
                    mode: mode.name(),
                    iterations: iterations_opt,
                    avg_duration_ms,
                },
                source_file: Some(out_path.display().to_string()),
            };

            let json = serde_json::to_string_pretty(&output).expect("serialize");
            fs::write(&out_path, &json).expect("write output");
            println!("{}", json);
        }
    }
}
