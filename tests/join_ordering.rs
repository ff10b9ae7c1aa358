//! Join ordering and exactly-once resolution, including property tests over
//! arbitrary completion orders.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use proptest::prelude::*;
use tributary::prelude::*;

fn deferred_many(
    queue: &DeliveryQueue,
    n: usize,
) -> (Vec<Promise<i32, String>>, Vec<Resolver<i32, String>>) {
    (0..n)
        .map(|_| {
            let mut slot = None;
            let promise = Promise::new(queue, |resolver| slot = Some(resolver.clone()));
            (promise, slot.expect("starter runs synchronously"))
        })
        .unzip()
}

fn count_deliveries(promise: &Promise<Vec<i32>, String>) -> Arc<AtomicUsize> {
    let deliveries = Arc::new(AtomicUsize::new(0));
    let d = Arc::clone(&deliveries);
    promise.observe(move |_| {
        d.fetch_add(1, Ordering::SeqCst);
    });
    deliveries
}

#[test]
fn arrival_order_does_not_change_output_order() {
    let queue = DeliveryQueue::new();
    let (promises, resolvers) = deferred_many(&queue, 3);
    let joined = join_all(&queue, promises);

    resolvers[2].resolve(Outcome::success(3));
    queue.run_until_idle().unwrap();
    resolvers[0].resolve(Outcome::success(1));
    queue.run_until_idle().unwrap();
    assert!(!joined.is_resolved());
    resolvers[1].resolve(Outcome::success(2));

    assert_eq!(
        queue.run_until_settled(&joined).unwrap(),
        Outcome::Success(vec![1, 2, 3])
    );
}

#[test]
fn failure_before_other_inputs_resolves_once() {
    let queue = DeliveryQueue::new();
    let (promises, resolvers) = deferred_many(&queue, 3);
    let joined = join_all(&queue, promises);
    let deliveries = count_deliveries(&joined);

    resolvers[1].resolve(Outcome::failure("bad".to_string()));
    queue.run_until_idle().unwrap();
    assert!(joined.is_resolved());

    resolvers[0].resolve(Outcome::success(1));
    resolvers[2].resolve(Outcome::success(3));
    queue.run_until_idle().unwrap();

    assert_eq!(
        queue.run_until_settled(&joined).unwrap(),
        Outcome::Failure("bad".to_string())
    );
    assert_eq!(deliveries.load(Ordering::SeqCst), 1);
}

#[test]
fn failure_after_other_inputs_resolves_once() {
    let queue = DeliveryQueue::new();
    let (promises, resolvers) = deferred_many(&queue, 3);
    let joined = join_all(&queue, promises);
    let deliveries = count_deliveries(&joined);

    resolvers[0].resolve(Outcome::success(1));
    resolvers[2].resolve(Outcome::success(3));
    queue.run_until_idle().unwrap();
    assert!(!joined.is_resolved());

    resolvers[1].resolve(Outcome::failure("bad".to_string()));
    queue.run_until_idle().unwrap();

    assert_eq!(
        queue.run_until_settled(&joined).unwrap(),
        Outcome::Failure("bad".to_string())
    );
    assert_eq!(deliveries.load(Ordering::SeqCst), 1);
}

#[test]
fn simultaneous_failures_surface_the_first_delivered() {
    let queue = DeliveryQueue::new();
    let (promises, resolvers) = deferred_many(&queue, 2);
    let joined = join_all(&queue, promises);

    resolvers[1].resolve(Outcome::failure("second input".to_string()));
    resolvers[0].resolve(Outcome::failure("first input".to_string()));

    assert_eq!(
        queue.run_until_settled(&joined).unwrap(),
        Outcome::Failure("second input".to_string())
    );
}

#[test]
fn hundred_concurrent_producers_keep_positions() {
    let queue = DeliveryQueue::new();
    let pool = ProducerPool::new(&queue, PoolConfig::default()).unwrap();

    let promises: Vec<_> = (0..100_usize)
        .map(|i| {
            pool.submit(move || {
                std::thread::sleep(std::time::Duration::from_micros(((100 - i) * 37 % 500) as u64));
                Ok::<_, String>(i * 10)
            })
        })
        .collect();

    let joined = join_all(&queue, promises);
    let values = queue
        .run_until_settled(&joined)
        .unwrap()
        .into_result()
        .unwrap();

    assert_eq!(values.len(), 100);
    for (i, value) in values.into_iter().enumerate() {
        assert_eq!(value, i * 10);
    }
}

proptest! {
    #[test]
    fn prop_join_preserves_input_order(
        order in Just((0..20_usize).collect::<Vec<_>>()).prop_shuffle()
    ) {
        let queue = DeliveryQueue::new();
        let (promises, resolvers) = deferred_many(&queue, order.len());
        let joined = join_all(&queue, promises);

        for &i in &order {
            resolvers[i].resolve(Outcome::success(i as i32));
            queue.run_until_idle().unwrap();
        }

        prop_assert_eq!(
            queue.run_until_settled(&joined).unwrap(),
            Outcome::Success((0..20).collect::<Vec<i32>>())
        );
    }

    #[test]
    fn prop_single_failure_wins_regardless_of_timing(
        order in Just((0..8_usize).collect::<Vec<_>>()).prop_shuffle(),
        failing in 0..8_usize,
    ) {
        let queue = DeliveryQueue::new();
        let (promises, resolvers) = deferred_many(&queue, order.len());
        let joined = join_all(&queue, promises);
        let deliveries = count_deliveries(&joined);

        for &i in &order {
            let outcome = if i == failing {
                Outcome::failure(format!("input {} failed", i))
            } else {
                Outcome::success(i as i32)
            };
            resolvers[i].resolve(outcome);
            queue.run_until_idle().unwrap();
        }

        prop_assert_eq!(
            queue.run_until_settled(&joined).unwrap(),
            Outcome::Failure(format!("input {} failed", failing))
        );
        prop_assert_eq!(deliveries.load(Ordering::SeqCst), 1);
    }
}
