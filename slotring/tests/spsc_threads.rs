//! Cross-thread tests for the slot queue.
//!
//! These run a real producer and consumer on separate OS threads, so they
//! exercise the acquire/release pairing on the slot flags rather than a
//! single-threaded interleaving.
//!
//! # Running with tracing
//!
//! ```bash
//! RUST_LOG=slotring=trace cargo test --features tracing --test spsc_threads -- --nocapture
//! ```

use std::sync::Once;
use std::thread;
use std::time::Duration;

use slotring::{Consumer, Producer, QueueConfig, WaitStrategy, channel, channel_with_config};

static INIT_TRACING: Once = Once::new();

/// Initialize tracing for tests (only once).
fn init_test_tracing() {
    INIT_TRACING.call_once(|| {
        slotring::init_tracing();
    });
}

const SEQUENCE_LEN: u64 = 200_000;

fn write_u64(slot: &mut [u8], value: u64) {
    slot[..8].copy_from_slice(&value.to_le_bytes());
}

fn read_u64(slot: &[u8]) -> u64 {
    u64::from_le_bytes(slot[..8].try_into().unwrap())
}

/// Pushes `1..=count` with the in-place acquire/finish calls.
fn produce_sequence(mut producer: Producer, count: u64) {
    for value in 1..=count {
        write_u64(producer.acquire_push_blocking(), value);
        producer.finish_push();
    }
}

/// Pops `count` values and checks they arrive as a gap-free increasing run.
fn consume_sequence(mut consumer: Consumer, count: u64) -> u64 {
    let mut expected = 1;
    while expected <= count {
        let value = read_u64(consumer.acquire_pop_blocking());
        consumer.finish_pop();
        assert_eq!(value, expected, "out of order or torn read");
        expected += 1;
    }
    expected - 1
}

fn run_sequence(config: &QueueConfig, count: u64) {
    let (producer, consumer) = channel_with_config(config).unwrap();

    let producer_handle = thread::spawn(move || produce_sequence(producer, count));
    let consumer_handle = thread::spawn(move || consume_sequence(consumer, count));

    producer_handle.join().unwrap();
    assert_eq!(consumer_handle.join().unwrap(), count);
}

#[test]
fn sequence_arrives_in_order_with_spin() {
    init_test_tracing();
    run_sequence(
        &QueueConfig {
            capacity: 1024,
            element_size: size_of::<u64>(),
            wait: WaitStrategy::Spin,
        },
        SEQUENCE_LEN,
    );
}

#[test]
fn sequence_arrives_in_order_with_yield() {
    init_test_tracing();
    run_sequence(
        &QueueConfig {
            capacity: 1024,
            element_size: size_of::<u64>(),
            wait: WaitStrategy::Yield,
        },
        SEQUENCE_LEN,
    );
}

#[test]
fn sequence_arrives_in_order_with_spin_then_yield() {
    init_test_tracing();
    run_sequence(
        &QueueConfig {
            capacity: 16,
            element_size: size_of::<u64>(),
            wait: WaitStrategy::SpinThenYield { spins: 64 },
        },
        SEQUENCE_LEN,
    );
}

#[test]
fn sequence_arrives_in_order_with_sleep() {
    init_test_tracing();
    run_sequence(
        &QueueConfig {
            capacity: 64,
            element_size: size_of::<u64>(),
            wait: WaitStrategy::Sleep(Duration::from_micros(10)),
        },
        10_000,
    );
}

#[test]
fn capacity_one_ping_pong_across_threads() {
    init_test_tracing();
    // Every item is a handoff, so yield to stay fast on a single core.
    run_sequence(
        &QueueConfig {
            capacity: 1,
            element_size: size_of::<u64>(),
            wait: WaitStrategy::SpinThenYield { spins: 64 },
        },
        50_000,
    );
}

#[test]
fn multi_line_payloads_are_never_torn() {
    init_test_tracing();
    const ELEMENT_SIZE: usize = 3 * slotring::CACHE_LINE_SIZE;
    const COUNT: u64 = 50_000;

    let (mut producer, mut consumer) = channel(32, ELEMENT_SIZE).unwrap();

    let producer_handle = thread::spawn(move || {
        for value in 0..COUNT {
            producer.push_with(|slot| slot.fill(value as u8));
        }
    });

    let consumer_handle = thread::spawn(move || {
        for value in 0..COUNT {
            let byte = value as u8;
            let intact = consumer.pop_with(|slot| slot.iter().all(|&b| b == byte));
            assert!(intact, "payload {value} observed partially written");
        }
    });

    producer_handle.join().unwrap();
    consumer_handle.join().unwrap();
}

#[test]
fn try_variants_deliver_exactly_once() {
    init_test_tracing();
    const COUNT: u64 = 100_000;

    let (mut producer, mut consumer) = channel(64, size_of::<u64>()).unwrap();

    let producer_handle = thread::spawn(move || {
        for value in 0..COUNT {
            while producer.try_push_with(|slot| write_u64(slot, value)).is_none() {
                std::hint::spin_loop();
            }
        }
    });

    let consumer_handle = thread::spawn(move || {
        let mut received = Vec::with_capacity(COUNT as usize);
        while received.len() < COUNT as usize {
            match consumer.try_pop_with(read_u64) {
                Some(value) => received.push(value),
                None => std::hint::spin_loop(),
            }
        }
        assert_eq!(consumer.occupancy(), 0);
        received
    });

    producer_handle.join().unwrap();
    let received = consumer_handle.join().unwrap();

    for (i, &value) in received.iter().enumerate() {
        assert_eq!(value, i as u64);
    }
}

/// Per-thread state for the token ring, owned by the thread that runs it.
struct Passer {
    input: Consumer,
    output: Producer,
}

const RING_THREADS: usize = 4;

impl Passer {
    /// Forwards the token, decremented, until it reaches zero.
    ///
    /// Returns how many times this thread forwarded a non-zero token.
    fn run(mut self) -> u64 {
        let mut passes = 0;
        let mut previous: Option<u64> = None;
        loop {
            let token = self.input.pop_with(read_u64);
            if let Some(previous) = previous {
                assert_eq!(token, previous.saturating_sub(RING_THREADS as u64));
            }
            previous = Some(token);

            // Zero goes round once more so every thread can stop.
            let next = token.saturating_sub(1);
            self.output.push_with(|slot| write_u64(slot, next));
            if token == 0 {
                return passes;
            }
            passes += 1;
        }
    }
}

#[test]
fn token_ring_counts_down_to_zero() {
    init_test_tracing();
    const START: u64 = 10_000;

    let config = QueueConfig {
        capacity: 10,
        element_size: size_of::<u64>(),
        wait: WaitStrategy::SpinThenYield { spins: 64 },
    };
    let (mut producers, consumers): (Vec<Producer>, Vec<Consumer>) = (0..RING_THREADS)
        .map(|_| channel_with_config(&config).unwrap())
        .unzip();

    // Seed queue 0 before its producer moves to the last thread.
    producers[0].push_with(|slot| write_u64(slot, START));

    // Thread i reads queue i and writes queue (i + 1) % RING_THREADS.
    producers.rotate_left(1);

    let handles: Vec<_> = consumers
        .into_iter()
        .zip(producers)
        .map(|(input, output)| {
            let passer = Passer { input, output };
            thread::spawn(move || passer.run())
        })
        .collect();

    let total: u64 = handles.into_iter().map(|h| h.join().unwrap()).sum();
    assert_eq!(total, START);
}
