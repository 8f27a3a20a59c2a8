use env_logger;
use log;
use serde;

use ext_pq::ExternalPriorityQueueBuilder;

#[derive(Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
struct Task {
    name: String,
    priority: u8,
}

fn main() {
    env_logger::Builder::new().filter_level(log::LevelFilter::Debug).init();

    // highest priority first, name as the tie-break
    let mut queue = ExternalPriorityQueueBuilder::<Task>::new()
        .with_buffer_capacity(2)
        .with_fan_in(2)
        .build_by(|a: &Task, b: &Task| b.priority.cmp(&a.priority).then_with(|| a.name.cmp(&b.name)))
        .unwrap();

    for (name, priority) in [
        ("compact segments", 3),
        ("serve reads", 9),
        ("rotate logs", 1),
        ("flush memtable", 9),
        ("gc tombstones", 5),
    ] {
        queue
            .push(Task {
                name: name.to_string(),
                priority,
            })
            .unwrap();
    }

    while !queue.is_empty() {
        let task = queue.pop().unwrap();
        println!("{:>3}  {}", task.priority, task.name);
    }
}
