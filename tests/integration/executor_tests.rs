use std::sync::Arc;
use std::thread;

use anyhow::Result;
use chunked_exec::{
    partition, CancellationToken, ChunkedExecutor, Monoid, ParallelError, TaskError, WorkerPool,
};
use proptest::prelude::*;
use proptest::test_runner::TestRunner;

fn runner(cases: u32) -> TestRunner {
    let mut config = ProptestConfig::with_cases(cases);
    config.failure_persistence = None;
    TestRunner::new(config)
}

fn input_strategy() -> impl Strategy<Value = (Vec<i32>, usize)> {
    (proptest::collection::vec(-1000i32..1000, 0..200), 1usize..12)
}

fn executors() -> Result<Vec<ChunkedExecutor>> {
    Ok(vec![
        ChunkedExecutor::new(),
        ChunkedExecutor::with_pool(Arc::new(WorkerPool::new(4)?)),
    ])
}

/// Позиция первого экстремума при последовательном обходе
fn first_extreme(values: &[i32], better: impl Fn(i32, i32) -> bool) -> Option<(usize, i32)> {
    values.iter().copied().enumerate().fold(None, |best, (i, v)| match best {
        Some((_, current)) if !better(v, current) => best,
        _ => Some((i, v)),
    })
}

#[test]
fn partition_covers_input_with_balanced_chunks() {
    runner(200)
        .run(&(0usize..500, 1usize..40), |(len, threads)| {
            let ranges = partition::split(threads, len).expect("positive thread count");

            prop_assert_eq!(ranges.len(), threads.min(len));

            let mut expected_start = 0;
            for range in &ranges {
                prop_assert_eq!(range.start, expected_start, "chunks must be contiguous");
                prop_assert!(!range.is_empty());
                expected_start = range.end;
            }
            prop_assert_eq!(expected_start, len);

            if let (Some(max), Some(min)) = (
                ranges.iter().map(|r| r.len()).max(),
                ranges.iter().map(|r| r.len()).min(),
            ) {
                prop_assert!(max - min <= 1, "chunk sizes differ by more than one");
            }

            // Остаток распределяется по первым чанкам
            let sizes: Vec<usize> = ranges.iter().map(|r| r.len()).collect();
            prop_assert!(sizes.windows(2).all(|w| w[0] >= w[1]));
            Ok(())
        })
        .expect("proptest execution");
}

#[test]
fn map_and_filter_preserve_sequential_order() -> Result<()> {
    let executors = executors()?;

    runner(40)
        .run(&input_strategy(), |(values, threads)| {
            for executor in &executors {
                let mapped = executor
                    .map(threads, values.clone(), |x| i64::from(*x) * 3 - 1)
                    .expect("map");
                let expected: Vec<i64> = values.iter().map(|x| i64::from(*x) * 3 - 1).collect();
                prop_assert_eq!(mapped, expected);

                let filtered = executor
                    .filter(threads, values.clone(), |x| x % 3 == 0)
                    .expect("filter");
                let expected: Vec<i32> = values.iter().copied().filter(|x| x % 3 == 0).collect();
                prop_assert_eq!(filtered, expected);

                let joined = executor.join(threads, values.clone()).expect("join");
                let expected: String = values.iter().map(|x| x.to_string()).collect();
                prop_assert_eq!(joined, expected);
            }
            Ok(())
        })
        .expect("proptest execution");
    Ok(())
}

#[test]
fn reduce_does_not_depend_on_thread_count() -> Result<()> {
    let executors = executors()?;
    let sum = Monoid::new(0i64, |a: i64, b: i64| a + b);

    runner(40)
        .run(&input_strategy(), |(values, threads)| {
            let values: Vec<i64> = values.into_iter().map(i64::from).collect();
            let expected: i64 = values.iter().sum();

            for executor in &executors {
                let reduced = executor.reduce(threads, values.clone(), sum.clone()).expect("reduce");
                prop_assert_eq!(reduced, expected);

                let single = executor.reduce(1, values.clone(), sum.clone()).expect("reduce");
                prop_assert_eq!(single, reduced);

                let squares = executor
                    .map_reduce(threads, values.clone(), |x| x * x, sum.clone())
                    .expect("map_reduce");
                prop_assert_eq!(squares, values.iter().map(|x| x * x).sum::<i64>());
            }
            Ok(())
        })
        .expect("proptest execution");
    Ok(())
}

#[test]
fn any_is_negated_all_of_negation() -> Result<()> {
    let executors = executors()?;

    runner(40)
        .run(&(input_strategy(), -1000i32..1000), |((values, threads), pivot)| {
            for executor in &executors {
                let any = executor.any(threads, values.clone(), move |x| *x > pivot).expect("any");
                let all_not = executor
                    .all(threads, values.clone(), move |x| !(*x > pivot))
                    .expect("all");
                prop_assert_eq!(any, !all_not);
                prop_assert_eq!(any, values.iter().any(|x| *x > pivot));

                let count = executor.count(threads, values.clone(), move |x| *x > pivot).expect("count");
                prop_assert_eq!(count, values.iter().filter(|x| **x > pivot).count());
            }
            Ok(())
        })
        .expect("proptest execution");
    Ok(())
}

#[test]
fn extremes_match_sequential_scan_and_prefer_earliest() -> Result<()> {
    let executors = executors()?;

    runner(40)
        .run(&input_strategy(), |(values, threads)| {
            // Ключ с большим числом совпадений, чтобы проверить выбор первого
            let keyed: Vec<(i32, usize)> = values.iter().enumerate().map(|(i, v)| (v / 100, i)).collect();
            let keys: Vec<i32> = keyed.iter().map(|(k, _)| *k).collect();

            for executor in &executors {
                let max = executor.maximum(threads, keyed.clone(), |a: &(i32, usize), b: &(i32, usize)| a.0.cmp(&b.0));
                let min = executor.minimum(threads, keyed.clone(), |a: &(i32, usize), b: &(i32, usize)| a.0.cmp(&b.0));

                match first_extreme(&keys, |a, b| a > b) {
                    Some((index, key)) => prop_assert_eq!(max.expect("maximum"), (key, index)),
                    None => prop_assert!(matches!(max, Err(ParallelError::EmptyInput))),
                }
                match first_extreme(&keys, |a, b| a < b) {
                    Some((index, key)) => prop_assert_eq!(min.expect("minimum"), (key, index)),
                    None => prop_assert!(matches!(min, Err(ParallelError::EmptyInput))),
                }
            }
            Ok(())
        })
        .expect("proptest execution");
    Ok(())
}

#[test]
fn concurrent_batches_on_shared_pool_stay_separate() -> Result<()> {
    let pool = Arc::new(WorkerPool::new(4)?);

    let handles: Vec<_> = [100usize, 1]
        .into_iter()
        .map(|size| {
            let executor = ChunkedExecutor::with_pool(Arc::clone(&pool));
            thread::spawn(move || -> Result<(), ParallelError> {
                for round in 0..20 {
                    let values: Vec<usize> = (0..size).map(|i| i + round).collect();
                    let mapped = executor.map(size, values.clone(), |x| x * 2)?;
                    assert_eq!(mapped, values.iter().map(|x| x * 2).collect::<Vec<_>>());
                }
                Ok(())
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("caller thread")?;
    }

    pool.close()?;
    Ok(())
}

#[test]
fn one_failing_task_is_reported_after_siblings_finish() -> Result<()> {
    let pool = Arc::new(WorkerPool::new(2)?);
    let executor = ChunkedExecutor::with_pool(Arc::clone(&pool));
    let executed = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let counter = Arc::clone(&executed);

    let result = executor.try_map(5, vec![0, 1, 2, 3, 4], move |x: &i32| {
        counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        if *x == 2 {
            Err("index two")
        } else {
            Ok(*x)
        }
    });

    match result {
        Err(ParallelError::TaskFailures(aggregate)) => {
            assert_eq!(aggregate.total(), 5);
            assert_eq!(aggregate.len(), 1);
            assert_eq!(aggregate.failures()[0].index, 2);
            assert_eq!(aggregate.failures()[0].error, TaskError::Failed("index two".into()));
        }
        other => panic!("expected aggregate failure, got {:?}", other),
    }
    assert_eq!(executed.load(std::sync::atomic::Ordering::SeqCst), 5);

    // Пул остаётся пригодным после сбоя
    assert_eq!(executor.map(3, vec![1, 2, 3], |x| x + 1)?, vec![2, 3, 4]);
    Ok(())
}

#[test]
fn pool_map_runs_one_task_per_argument() -> Result<()> {
    let pool = WorkerPool::with_capacity(3, 4)?;
    let args: Vec<u64> = (0..50).collect();

    let squares = pool.map(|x: u64| x * x, args.clone(), &CancellationToken::new())?;
    assert_eq!(squares, args.iter().map(|x| x * x).collect::<Vec<_>>());

    pool.close()?;
    assert!(matches!(
        pool.map(|x: u64| x, vec![1], &CancellationToken::new()),
        Err(ParallelError::PoolClosed)
    ));
    Ok(())
}
