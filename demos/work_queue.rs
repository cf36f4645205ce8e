//! Job/result pipeline: one producer feeds a pool of workers through one
//! queue, workers report back through a second queue.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::info;
use turn_mpmc::Queue;

const NUM_WORKERS: usize = 4;
const NUM_JOBS: usize = 20;

enum Job {
    Run(String),
    Shutdown,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let jobs = Arc::new(Queue::<Job, 16>::new());
    let results = Arc::new(Queue::<String, 16>::new());

    let mut workers = vec![];
    for worker_id in 0..NUM_WORKERS {
        let jobs = jobs.clone();
        let results = results.clone();

        workers.push(thread::spawn(move || {
            let mut processed = 0;
            while let Job::Run(job) = jobs.pop() {
                info!(worker = worker_id, %job, "processing");
                thread::sleep(Duration::from_millis(20));
                results.push(format!("{job} -> completed by worker {worker_id}"));
                processed += 1;
            }
            info!(worker = worker_id, processed, "worker finished");
        }));
    }

    let collector = {
        let results = results.clone();
        thread::spawn(move || {
            for _ in 0..NUM_JOBS {
                info!(result = %results.pop(), "collected");
            }
        })
    };

    for i in 0..NUM_JOBS {
        jobs.push(Job::Run(format!("Job-{i:02}")));
    }
    // One shutdown marker per worker, queued behind every real job.
    for _ in 0..NUM_WORKERS {
        jobs.push(Job::Shutdown);
    }
    info!(jobs = NUM_JOBS, "all jobs enqueued");

    for worker in workers {
        worker.join().unwrap();
    }
    collector.join().unwrap();
    info!("work queue drained");
}
