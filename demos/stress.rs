//! Integrity run: many producers and consumers share one queue, then the
//! popped values are checked against the pushed ones.
//!
//! ```text
//! RUST_LOG=debug cargo run --release --example stress -- --producers 5 --consumers 5 --items 1000000
//! ```

use std::sync::Arc;
use std::thread;
use std::time::Instant;

use clap::Parser;
use thiserror::Error;
use tracing::{debug, info};
use turn_mpmc::Queue;

const CAPACITY: usize = 1024;

#[derive(Parser, Debug, Clone)]
#[command(name = "stress")]
#[command(about = "Push a known range through a bounded queue and verify each value arrives once")]
struct Config {
    /// Number of producer threads
    #[arg(short, long, default_value_t = 5)]
    producers: usize,

    /// Number of consumer threads
    #[arg(short, long, default_value_t = 5)]
    consumers: usize,

    /// Total number of values pushed across all producers
    #[arg(short, long, default_value_t = 1_000_000)]
    items: usize,
}

#[derive(Debug, Error)]
enum IntegrityError {
    #[error("expected {expected} items, got {actual}")]
    Count { expected: usize, actual: usize },

    #[error("mismatch at index {index}: expected {index}, got {actual}")]
    Mismatch { index: usize, actual: usize },

    #[error("at least one producer and one consumer are required")]
    NoWorkers,

    #[error("{role} thread {id} panicked")]
    WorkerPanicked { role: &'static str, id: usize },
}

/// Splits `0..items` into `producers` contiguous ranges; the last one takes
/// the remainder.
fn ranges(items: usize, producers: usize) -> Vec<std::ops::Range<usize>> {
    let per_producer = items / producers;
    (0..producers)
        .map(|p| {
            let start = p * per_producer;
            let end = if p + 1 == producers { items } else { start + per_producer };
            start..end
        })
        .collect()
}

fn run(config: &Config) -> Result<Vec<usize>, IntegrityError> {
    if config.producers == 0 || config.consumers == 0 {
        return Err(IntegrityError::NoWorkers);
    }

    // `None` is the stop marker; a consumer only leaves after popping one.
    let queue = Arc::new(Queue::<Option<usize>, CAPACITY>::new());

    let consumers: Vec<_> = (0..config.consumers)
        .map(|id| {
            let q = queue.clone();
            thread::spawn(move || {
                let mut local = Vec::new();
                while let Some(value) = q.pop() {
                    local.push(value);
                }
                debug!(consumer = id, popped = local.len(), "consumer finished");
                local
            })
        })
        .collect();

    let producers: Vec<_> = ranges(config.items, config.producers)
        .into_iter()
        .enumerate()
        .map(|(id, range)| {
            let q = queue.clone();
            thread::spawn(move || {
                let pushed = range.len();
                range.for_each(|value| q.push(Some(value)));
                debug!(producer = id, pushed, "producer finished");
            })
        })
        .collect();

    // Consumers stay blocked after a producer panic; they are not joined.
    for (id, h) in producers.into_iter().enumerate() {
        h.join()
            .map_err(|_| IntegrityError::WorkerPanicked { role: "producer", id })?;
    }
    for _ in 0..config.consumers {
        queue.push(None);
    }

    let mut results = Vec::with_capacity(config.items);
    for (id, h) in consumers.into_iter().enumerate() {
        let local = h
            .join()
            .map_err(|_| IntegrityError::WorkerPanicked { role: "consumer", id })?;
        results.extend(local);
    }
    Ok(results)
}

fn validate(mut results: Vec<usize>, expected: usize) -> Result<(), IntegrityError> {
    if results.len() != expected {
        return Err(IntegrityError::Count { expected, actual: results.len() });
    }
    results.sort_unstable();
    match results.iter().enumerate().find(|&(i, &v)| i != v) {
        Some((index, &actual)) => Err(IntegrityError::Mismatch { index, actual }),
        None => Ok(()),
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Config::parse();
    info!(
        capacity = CAPACITY,
        producers = config.producers,
        consumers = config.consumers,
        items = config.items,
        "starting integrity run"
    );

    let start = Instant::now();
    let results = run(&config)?;
    let elapsed = start.elapsed();
    info!(elapsed_us = elapsed.as_micros() as u64, "all threads joined");

    validate(results, config.items)?;
    info!(items = config.items, "all items pushed and popped exactly once");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ranges_cover_all_items_once() {
        let ranges = ranges(10, 3);
        assert_eq!(ranges, vec![0..3, 3..6, 6..10]);
    }

    #[test]
    fn validate_reports_duplicates_and_gaps() {
        assert!(validate(vec![2, 0, 1], 3).is_ok());
        assert!(matches!(
            validate(vec![0, 1, 1], 3),
            Err(IntegrityError::Mismatch { index: 2, actual: 1 })
        ));
        assert!(matches!(
            validate(vec![0, 1], 3),
            Err(IntegrityError::Count { expected: 3, actual: 2 })
        ));
    }

    #[test]
    fn run_rejects_empty_worker_pools() {
        let config = Config { producers: 0, consumers: 2, items: 10 };
        assert!(matches!(run(&config), Err(IntegrityError::NoWorkers)));
    }

    #[test]
    fn run_returns_every_value() {
        let config = Config { producers: 3, consumers: 3, items: 5_000 };
        let results = run(&config).unwrap();
        assert!(validate(results, config.items).is_ok());
    }

    #[test]
    fn worker_panic_names_the_thread() {
        let err = IntegrityError::WorkerPanicked { role: "producer", id: 2 };
        assert_eq!(err.to_string(), "producer thread 2 panicked");
    }
}
