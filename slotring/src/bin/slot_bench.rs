//! Slot queue throughput and latency benchmark.
//!
//! Usage:
//!     cargo run --release --bin slot_bench [ITERATIONS]
//!
//! Environment variables:
//!     PRODUCER_CPU=0  Pin producer to CPU 0 (default: 0)
//!     CONSUMER_CPU=2  Pin consumer to CPU 2 (default: 2)

use std::env;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Instant;

use slotring::{Consumer, Producer, channel};

const QUEUE_SIZE: usize = 1 << 10;
const DEFAULT_ITERATIONS: u64 = 1 << 24;
const RING_THREADS: usize = 4;

type Payload = u64;

const PAYLOAD_SIZE: usize = size_of::<Payload>();

fn get_cpu_affinity() -> (Option<usize>, Option<usize>) {
    let producer_cpu = env::var("PRODUCER_CPU")
        .ok()
        .and_then(|s| s.parse().ok())
        .or(Some(0));
    let consumer_cpu = env::var("CONSUMER_CPU")
        .ok()
        .and_then(|s| s.parse().ok())
        .or(Some(2));
    (producer_cpu, consumer_cpu)
}

fn pin_to_cpu(cpu: Option<usize>) {
    if let Some(id) = cpu {
        core_affinity::set_for_current(core_affinity::CoreId { id });
    }
}

fn push(producer: &mut Producer, value: Payload) {
    producer.push_with(|slot| slot[..PAYLOAD_SIZE].copy_from_slice(&value.to_le_bytes()));
}

fn pop(consumer: &mut Consumer) -> Payload {
    consumer.pop_with(|slot| {
        let mut bytes = [0u8; PAYLOAD_SIZE];
        bytes.copy_from_slice(&slot[..PAYLOAD_SIZE]);
        Payload::from_le_bytes(bytes)
    })
}

fn bench_throughput(iterations: u64, producer_cpu: Option<usize>, consumer_cpu: Option<usize>) {
    let (mut producer, mut consumer) = channel(QUEUE_SIZE, PAYLOAD_SIZE).unwrap();

    let ready = Arc::new(AtomicBool::new(false));
    let ready_clone = ready.clone();

    let consumer_thread = thread::spawn(move || {
        pin_to_cpu(consumer_cpu);
        ready_clone.store(true, Ordering::Release);

        for expected in 1..=iterations {
            let value = pop(&mut consumer);
            if value != expected {
                panic!("Data corruption: expected {}, got {}", expected, value);
            }
        }
    });

    while !ready.load(Ordering::Acquire) {
        std::hint::spin_loop();
    }

    pin_to_cpu(producer_cpu);

    let start = Instant::now();

    for value in 1..=iterations {
        push(&mut producer, value);
    }

    consumer_thread.join().unwrap();
    let elapsed = start.elapsed();

    let ops_per_ms = iterations as u128 * 1_000_000 / elapsed.as_nanos().max(1);
    println!("{} ops/ms", ops_per_ms);
}

fn bench_rtt(iterations: u64, producer_cpu: Option<usize>, consumer_cpu: Option<usize>) {
    let (mut q1_producer, mut q1_consumer) = channel(QUEUE_SIZE, PAYLOAD_SIZE).unwrap();
    let (mut q2_producer, mut q2_consumer) = channel(QUEUE_SIZE, PAYLOAD_SIZE).unwrap();

    let ready = Arc::new(AtomicBool::new(false));
    let ready_clone = ready.clone();

    let responder = thread::spawn(move || {
        pin_to_cpu(consumer_cpu);
        ready_clone.store(true, Ordering::Release);

        for _ in 0..iterations {
            let value = pop(&mut q1_consumer);
            push(&mut q2_producer, value);
        }
    });

    while !ready.load(Ordering::Acquire) {
        std::hint::spin_loop();
    }

    pin_to_cpu(producer_cpu);

    let start = Instant::now();

    for value in 0..iterations {
        push(&mut q1_producer, value);
        pop(&mut q2_consumer);
    }

    let elapsed = start.elapsed();
    responder.join().unwrap();

    let rtt_ns = elapsed.as_nanos() / u128::from(iterations.max(1));
    println!("{} ns RTT", rtt_ns);
}

/// Arguments for one thread of the token ring, moved into that thread.
struct Passer {
    input: Consumer,
    output: Producer,
}

impl Passer {
    fn run(mut self) -> u64 {
        let mut passes = 0;
        loop {
            let token = pop(&mut self.input);
            push(&mut self.output, token.saturating_sub(1));
            if token == 0 {
                return passes;
            }
            passes += 1;
        }
    }
}

fn bench_token_ring(iterations: u64) {
    let (mut producers, consumers): (Vec<Producer>, Vec<Consumer>) = (0..RING_THREADS)
        .map(|_| channel(10, PAYLOAD_SIZE).unwrap())
        .unzip();

    push(&mut producers[0], iterations);
    producers.rotate_left(1);

    let start = Instant::now();

    let handles: Vec<_> = consumers
        .into_iter()
        .zip(producers)
        .map(|(input, output)| {
            let passer = Passer { input, output };
            thread::spawn(move || passer.run())
        })
        .collect();

    let passes: Vec<u64> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let elapsed = start.elapsed();

    let hop_ns = elapsed.as_nanos() / u128::from(iterations.max(1));
    println!("{} ns/hop over {} threads, passes {:?}", hop_ns, RING_THREADS, passes);
}

fn main() {
    slotring::init_tracing();

    let iterations = env::args()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .unwrap_or(DEFAULT_ITERATIONS);
    let (producer_cpu, consumer_cpu) = get_cpu_affinity();

    println!(
        "slotring SPSC (size={}, iters={}):",
        QUEUE_SIZE, iterations
    );
    bench_throughput(iterations, producer_cpu, consumer_cpu);
    bench_rtt(iterations, producer_cpu, consumer_cpu);
    bench_token_ring(iterations / 16);
}
