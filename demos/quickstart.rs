use env_logger;
use log;

use ext_pq::ExternalPriorityQueueBuilder;

fn main() {
    env_logger::Builder::new().filter_level(log::LevelFilter::Debug).init();

    let mut queue = ExternalPriorityQueueBuilder::<u64>::new()
        .with_memory_limit(4 * 1024 * 1024)
        .build_min()
        .unwrap();

    // push a few million descending values; most of them spill to disk
    for value in (0..2_000_000u64).rev() {
        queue.push(value).unwrap();
    }

    println!(
        "{} elements queued across {} merge levels ({} runs on disk)",
        queue.len(),
        queue.levels(),
        queue.spilled_runs()
    );

    for expected in 0..2_000_000u64 {
        assert_eq!(queue.pop().unwrap(), expected);
    }
    assert!(queue.is_empty());

    println!("drained in ascending order");
}
