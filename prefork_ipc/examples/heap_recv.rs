//! Priority heap demo, consumer side.
//!
//! Attaches to the heap created by `heap_send` and drains it, printing
//! messages in priority order.

use std::time::Duration;

use prefork_ipc::{IpcError, IpcResult, PriorityHeap};

const DEMO_HEAP: &str = "/prefork_demo_heap";

fn main() -> IpcResult<()> {
    let heap = PriorityHeap::<[u8; 32]>::attach(DEMO_HEAP)?;

    loop {
        match heap.try_dequeue(Duration::from_secs(2)) {
            Ok(msg) => {
                let end = msg
                    .payload
                    .iter()
                    .position(|&b| b == 0)
                    .unwrap_or(msg.payload.len());
                let text = String::from_utf8_lossy(&msg.payload[..end]);
                println!("[{:?} seq={}] {text}", msg.priority, msg.seq);
            }
            Err(IpcError::QueueEmpty { .. }) => {
                println!("heap drained");
                return Ok(());
            }
            Err(e) => return Err(e),
        }
    }
}
