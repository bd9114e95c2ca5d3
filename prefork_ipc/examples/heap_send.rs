//! Priority heap demo, producer side.
//!
//! Creates the demo heap and enqueues a few messages at mixed priorities,
//! then waits so a consumer (`heap_recv`) can drain them from another
//! terminal:
//!
//! ```text
//! cargo run --example heap_send
//! cargo run --example heap_recv   # in a second terminal
//! ```

use prefork_ipc::{IpcResult, Priority, PriorityHeap};

const DEMO_HEAP: &str = "/prefork_demo_heap";

fn main() -> IpcResult<()> {
    let heap = PriorityHeap::<[u8; 32]>::create(DEMO_HEAP, 16)?;

    let messages: [(&str, Priority); 5] = [
        ("routine report", Priority::Low),
        ("user request", Priority::Normal),
        ("disk almost full", Priority::High),
        ("power failure", Priority::Urgent),
        ("second user request", Priority::Normal),
    ];

    for (text, priority) in messages {
        let mut payload = [0u8; 32];
        payload[..text.len()].copy_from_slice(text.as_bytes());
        heap.enqueue(payload, priority)?;
        println!("enqueued {priority:?}: {text}");
    }

    println!("waiting 30s for a consumer to drain the heap...");
    std::thread::sleep(std::time::Duration::from_secs(30));

    heap.unlink()?;
    Ok(())
}
