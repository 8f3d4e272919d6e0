//! Runs one shop for a day and compares what it measured with the M/M/n/m
//! formulas.
//!
//! Usage:
//!   cargo run --release -p checkout_queue -- [experiment.toml] [--json]
//!
//! Without a config file the built-in baseline is used. `RUST_LOG=debug`
//! shows the shop's lifecycle.

use std::env;
use std::process;

use checkout_queue::analysis::{self, Metrics};
use checkout_queue::{ArrivalProcess, ArrivalSummary, ExperimentConfig, Shop, Stats};
use serde::Serialize;

#[derive(Serialize)]
struct Report<'a> {
    config: &'a ExperimentConfig,
    stats: &'a Stats,
    theory: Metrics,
    actual: Option<Metrics>,
}

fn main() {
    env_logger::init();

    let args: Vec<String> = env::args().skip(1).collect();
    let json = args.iter().any(|arg| arg == "--json");
    let config = match args.iter().find(|arg| !arg.starts_with("--")) {
        Some(path) => ExperimentConfig::load(path).unwrap_or_else(|e| {
            eprintln!("Error: {}", e);
            process::exit(1);
        }),
        None => ExperimentConfig::default(),
    };

    let shop = Shop::from_config(&config.shop).unwrap_or_else(|e| {
        eprintln!("Error opening shop: {}", e);
        process::exit(1);
    });
    let mut arrivals = ArrivalProcess::from_config(&config.arrivals).unwrap_or_else(|e| {
        eprintln!("Error configuring arrivals: {}", e);
        process::exit(1);
    });
    if !json {
        println!("=== Checkout Queue ===\n");
        println!(
            "Shop created: {} checkouts, {} items/s, {} waiting places",
            config.shop.checkouts, config.shop.service_rate, config.shop.max_queue_length
        );
    }

    let summary = arrivals.run(&shop, config.arrivals.customers);
    shop.close();
    let stats = shop.stats();

    let theory = analysis::theoretical(
        config.arrivals.arrival_rate,
        config.customer_service_rate(),
        config.shop.checkouts,
        config.shop.max_queue_length,
    );
    let actual = analysis::observed(&stats);

    if json {
        let report = Report {
            config: &config,
            stats: &stats,
            theory,
            actual,
        };
        match serde_json::to_string_pretty(&report) {
            Ok(text) => println!("{}", text),
            Err(e) => {
                eprintln!("Error serializing report: {}", e);
                process::exit(1);
            }
        }
        return;
    }

    print_run(&summary, &stats);
    println!("\nTheory\n");
    print_metrics(&theory);
    println!("\nActual\n");
    match actual {
        Some(metrics) => print_metrics(&metrics),
        None => println!("Nobody was served, nothing to compare"),
    }
}

fn print_run(summary: &ArrivalSummary, stats: &Stats) {
    println!("Customers offered: {}", summary.offered);
    if let Some(avg) = summary.avg_items() {
        println!("Avg items: {:.2}", avg);
    }
    println!("Accepted: {}", stats.accepted_count);
    println!("Declined: {}", stats.declined_count);

    let open = stats.total_open_time.as_secs_f64();
    println!("Total work time: {:.3}s", open);
    for (id, busy) in stats.checkout_busy_times.iter().enumerate() {
        println!("Checkout #{}: {:.3}s", id + 1, busy.as_secs_f64());
    }
    let avg_busy = stats.total_busy_time().as_secs_f64() / stats.checkout_busy_times.len() as f64;
    println!("Average work time: {:.3}s", avg_busy);
    println!("Average downtime: {:.3}s", open - avg_busy);
}

fn print_metrics(m: &Metrics) {
    println!("Arrival rate: {:.4}", m.lambda);
    println!("Service rate: {:.4}", m.mu);
    println!("Load: {:.4}", m.rho);
    println!("Free proba: {:.4}", m.free_probability);
    println!("Queue proba: {:.4}", m.queue_probability);
    println!("Decline proba: {:.4}", m.decline_probability);
    println!("Relative: {:.4}", m.relative_capacity);
    println!("Absolute: {:.4}", m.absolute_capacity);
    println!("Avg queue length: {:.4}", m.avg_queue_length);
    println!("Avg busy checkouts: {:.4}", m.avg_busy_checkouts);
    println!("Avg wait time: {:.4}", m.avg_wait_time);
    println!("Avg alive time: {:.4}", m.avg_alive_time);
}
