use num_format::{Locale, ToFormattedString};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const SLIDING_WINDOW_SIZE: u64 = 2; // In seconds

static STOP: AtomicBool = AtomicBool::new(false);

#[repr(C)]
#[derive(Default)]
struct WorkerStats {
    count: AtomicU64,
    // Keeps each counter on its own cache line.
    padding: [u64; 15],
}

/// Returns true once Ctrl-C was pressed.
#[allow(dead_code)]
pub fn stopped() -> bool {
    STOP.load(Ordering::SeqCst)
}

/// Calls `func` in a loop on every physical core but one and prints the
/// combined calls per second until Ctrl-C is pressed.
pub fn test_throughput<F>(func: F)
where
    F: Fn() + Sync + Send + 'static,
{
    ctrlc::set_handler(move || {
        STOP.store(true, Ordering::SeqCst);
    })
    .expect("Error setting Ctrl-C handler");

    let num_threads = num_cpus::get_physical().max(2);
    println!("Number of threads: {}", num_threads - 1);
    let mut handles = Vec::with_capacity(num_threads);
    let func_arc = Arc::new(func);
    let worker_stats_shared: Arc<Vec<WorkerStats>> =
        Arc::new((0..num_threads).map(|_| WorkerStats::default()).collect());
    let worker_stats_shared_monitor = Arc::clone(&worker_stats_shared);

    let monitor = thread::spawn(move || {
        let mut start_time = Instant::now();
        let mut total_count_old: u64 = 0;
        loop {
            thread::sleep(Duration::from_millis(500));
            if stopped() {
                break;
            }

            let elapsed = start_time.elapsed();
            if elapsed.as_secs() >= SLIDING_WINDOW_SIZE {
                let total_count: u64 = worker_stats_shared_monitor
                    .iter()
                    .map(|worker_stat| worker_stat.count.load(Ordering::Relaxed))
                    .sum();
                let current_count = total_count - total_count_old;
                total_count_old = total_count;
                let throughput = (current_count as f64 / elapsed.as_secs_f64()) as u64;
                println!(
                    "Throughput: {} iterations/sec",
                    throughput.to_formatted_string(&Locale::en)
                );
                start_time = Instant::now();
            }
        }
    });
    handles.push(monitor);

    for thread_index in 0..num_threads - 1 {
        let worker_stats_shared = Arc::clone(&worker_stats_shared);
        let func_arc_clone = Arc::clone(&func_arc);
        let handle = thread::spawn(move || loop {
            for _ in 0..1000 {
                func_arc_clone();
            }
            worker_stats_shared[thread_index]
                .count
                .fetch_add(1000, Ordering::Relaxed);
            if stopped() {
                break;
            }
        });
        handles.push(handle)
    }

    for handle in handles {
        handle.join().expect("stress thread panicked");
    }
}
