#![cfg(not(loom))]

mod support;

use std::sync::Arc;
use support::{ms, TokioContext};
use turnbuf::{Bounded, ErrorKind, Queue, StopSource, TimedSchedulerContext};

#[tokio::test(flavor = "multi_thread")]
async fn push_waits_for_capacity() {
    let queue = Arc::new(Bounded::new(1));
    queue.try_push(42).unwrap();
    assert!(queue.try_push(99).unwrap_err().is_full());

    let pusher = tokio::spawn({
        let queue = queue.clone();
        async move { queue.push(99).await }
    });

    tokio::time::sleep(ms(50)).await;
    assert!(!pusher.is_finished(), "push should be parked while full");

    assert_eq!(queue.try_pop().unwrap(), 42);
    pusher.await.unwrap().unwrap();
    assert_eq!(queue.pop().await.unwrap(), 99);
}

#[tokio::test(flavor = "multi_thread")]
async fn pop_waits_for_value() {
    let queue = Arc::new(Bounded::new(4));

    let popper = tokio::spawn({
        let queue = queue.clone();
        async move { queue.pop().await }
    });

    tokio::time::sleep(ms(50)).await;
    assert!(!popper.is_finished(), "pop should be parked while empty");

    queue.try_push(7usize).unwrap();
    assert_eq!(popper.await.unwrap().unwrap(), 7);
}

#[tokio::test(flavor = "multi_thread")]
async fn pop_until_times_out_and_consumes_nothing() {
    let queue = Bounded::<usize>::new(4);
    let context = TokioContext::current();

    let started = tokio::time::Instant::now();
    let deadline = started + ms(20);
    let status = queue.pop_until(&context, deadline).await;
    assert_eq!(status.unwrap_err(), ErrorKind::Timeout);
    assert!(started.elapsed() >= ms(20));
    assert!(started.elapsed() < ms(2_000), "timeout should fire promptly");

    // Nothing was consumed by the timed-out pop.
    queue.try_push(5).unwrap();
    assert_eq!(queue.try_pop().unwrap(), 5);
}

#[tokio::test(flavor = "multi_thread")]
async fn push_until_times_out_without_enqueueing() {
    let queue = Bounded::new(1);
    let context = TokioContext::current();

    queue.try_push(1).unwrap();
    let deadline = context.now() + ms(20);
    let status = queue.push_until(&context, deadline, 2).await;
    assert_eq!(status.unwrap_err(), ErrorKind::Timeout);

    assert_eq!(queue.try_pop().unwrap(), 1);
    // The timed-out push is guaranteed not to have enqueued its value.
    assert_eq!(queue.try_pop().unwrap_err(), ErrorKind::QueueEmpty);
}

#[tokio::test(flavor = "multi_thread")]
async fn push_until_completes_when_space_frees() {
    let queue = Arc::new(Bounded::new(1));
    let context = TokioContext::current();

    queue.try_push(1).unwrap();

    tokio::spawn({
        let queue = queue.clone();
        async move {
            tokio::time::sleep(ms(20)).await;
            assert_eq!(queue.try_pop().unwrap(), 1);
        }
    });

    let deadline = context.now() + ms(2_000);
    queue.push_until(&context, deadline, 2).await.unwrap();
    assert_eq!(queue.pop().await.unwrap(), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn stop_token_cancels_parked_push() {
    let queue = Arc::new(Bounded::new(1));
    let source = StopSource::new();
    let token = source.token();

    queue.try_push(1).unwrap();

    let pusher = tokio::spawn({
        let queue = queue.clone();
        async move { queue.push(2).with_stop_token(token).await }
    });

    tokio::time::sleep(ms(50)).await;
    assert!(!pusher.is_finished());
    assert!(source.request_stop());

    assert_eq!(pusher.await.unwrap().unwrap_err(), ErrorKind::Canceled);
    // The canceled push left the queue untouched.
    assert_eq!(queue.approximate_depth(), 1);
    assert_eq!(queue.try_pop().unwrap(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn cancellation_is_delivered_once() {
    let queue = Arc::new(Bounded::<usize>::new(1));
    let source = StopSource::new();

    // Request the stop before the operation ever starts.
    source.request_stop();
    let status = queue.pop().with_stop_token(source.token()).await;
    assert_eq!(status.unwrap_err(), ErrorKind::Canceled);

    // The second stop request reports that the stop already happened.
    assert!(!source.request_stop());
}

#[tokio::test(flavor = "multi_thread")]
async fn detached_callbacks_report_outcomes() {
    let queue = Arc::new(Bounded::new(8));
    let context = TokioContext::current();

    let (push_tx, push_rx) = tokio::sync::oneshot::channel();
    turnbuf::push_detached(
        &queue,
        &context,
        101,
        move |status| {
            push_tx.send(status).unwrap();
        },
        turnbuf::StopToken::never(),
    );
    push_rx.await.unwrap().unwrap();

    let (pop_tx, pop_rx) = tokio::sync::oneshot::channel();
    turnbuf::pop_detached(
        &queue,
        &context,
        move |status| {
            pop_tx.send(status).unwrap();
        },
        turnbuf::StopToken::never(),
    );
    assert_eq!(pop_rx.await.unwrap().unwrap(), 101);
}

#[tokio::test(flavor = "multi_thread")]
async fn detached_callback_honors_pre_stopped_token() {
    let queue = Arc::new(Bounded::new(8));
    let context = TokioContext::current();
    let source = StopSource::new();
    source.request_stop();

    let (tx, rx) = std::sync::mpsc::channel();
    turnbuf::push_detached(
        &queue,
        &context,
        1,
        move |status| {
            tx.send(status).unwrap();
        },
        source.token(),
    );

    // The handler runs inline when the token is already stopped.
    assert_eq!(rx.try_recv().unwrap().unwrap_err(), ErrorKind::Canceled);
    assert!(queue.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn contended_async_multisets_agree() {
    use std::collections::HashSet;

    const PRODUCERS: usize = 4;
    const CONSUMERS: usize = 3;
    const PER_PRODUCER: usize = 64;
    const TOTAL: usize = PRODUCERS * PER_PRODUCER;

    // A small buffer forces both sides through the parking slow path.
    let queue = Arc::new(Bounded::new(8));

    let mut producers = Vec::new();
    for producer in 0..PRODUCERS {
        let queue = queue.clone();
        producers.push(tokio::spawn(async move {
            for sequence in 0..PER_PRODUCER {
                queue.push(producer * PER_PRODUCER + sequence).await.unwrap();
            }
        }));
    }

    let mut consumers = Vec::new();
    for consumer in 0..CONSUMERS {
        let queue = queue.clone();
        let quota = if consumer == 0 {
            TOTAL - (CONSUMERS - 1) * (TOTAL / CONSUMERS)
        } else {
            TOTAL / CONSUMERS
        };
        consumers.push(tokio::spawn(async move {
            let mut seen = Vec::with_capacity(quota);
            for _ in 0..quota {
                seen.push(queue.pop().await.unwrap());
            }
            seen
        }));
    }

    for producer in producers {
        producer.await.unwrap();
    }

    let mut all = HashSet::new();
    for consumer in consumers {
        for value in consumer.await.unwrap() {
            assert!(all.insert(value), "value {} delivered twice", value);
        }
    }
    assert_eq!(all.len(), TOTAL);
    assert_eq!(queue.push_count(), TOTAL as u64);
    assert_eq!(queue.pop_count(), TOTAL as u64);
    assert_eq!(queue.approximate_depth(), 0);
}
