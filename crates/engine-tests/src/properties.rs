#[cfg(test)]
mod tests {
    use crate::{
        fixtures::{
            Harness, INTERNAL_SCHEMA, base_time, full_job, ids, order_row, orders_schema,
            settings, source_table,
        },
        memory::{Fault, MemoryStore, Op},
    };
    use connectors::sql::base::{adapter::SqlAdapter, error::DbError};
    use engine_core::retry::{AttemptOutcome, RetryPolicy};
    use engine_processing::{extractor::BatchExtractor, splitter::Splitter};
    use engine_runtime::report::JobStatus;
    use model::{core::identifiers::TableRef, partition::Partition};
    use std::time::Duration;

    fn quick_retry() -> RetryPolicy {
        RetryPolicy::new(2, Duration::from_millis(1), Duration::from_millis(1))
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn every_batch_is_full_except_the_last() {
        let harness = Harness::with_orders(3, 2_000);

        let report = harness.run(full_job(Some(4)), settings(3, 130)).await;
        assert_eq!(report.status, JobStatus::Done);

        for ordinal in 1..=4 {
            let sizes: Vec<usize> = harness
                .source
                .calls_to(Op::Fetch, &format!("orders_{ordinal}"), None)
                .into_iter()
                .map(|c| c.rows)
                .filter(|&rows| rows > 0)
                .collect();
            let (last, full) = sizes.split_last().unwrap();
            assert!(full.iter().all(|&rows| rows == 130), "{sizes:?}");
            assert!((1..=130).contains(last));
            assert_eq!(sizes.iter().sum::<usize>(), 500);
        }
    }

    #[tokio::test]
    async fn splitting_twice_yields_the_same_partitions() {
        let harness = Harness::with_orders(2, 1_003);
        let splitter = Splitter::new(quick_retry(), INTERNAL_SCHEMA);
        let schema = orders_schema(source_table());
        harness.source.create(
            orders_schema(TableRef::new(INTERNAL_SCHEMA, "orders_2")),
            vec![],
        );

        let session = harness.source.session().await.unwrap();
        let first = splitter
            .split(session.as_ref(), &source_table(), &schema, None, 4)
            .await
            .unwrap();
        let first_rows = harness
            .source
            .rows(&TableRef::new(INTERNAL_SCHEMA, "orders_2"))
            .unwrap();
        let second = splitter
            .split(session.as_ref(), &source_table(), &schema, None, 4)
            .await
            .unwrap();

        assert!(first.creation_errors.is_empty());
        assert!(second.is_split());
        assert_eq!(first.partitions, second.partitions);
        assert_eq!(
            first.partitions.iter().map(|p| p.estimated_row_count).sum::<u64>(),
            1_003
        );

        let mut covered = Vec::new();
        for partition in &second.partitions {
            let table = partition.artifact().unwrap();
            covered.extend(ids(&harness.source.rows(table).unwrap()));
        }
        covered.sort_unstable();
        assert_eq!(covered, (1..=1_003).collect::<Vec<_>>());
        assert_eq!(
            ids(&first_rows),
            ids(&harness.source.rows(&TableRef::new(INTERNAL_SCHEMA, "orders_2")).unwrap())
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn workers_never_hold_more_connections_than_the_pool() {
        let harness = Harness::with_orders(3, 3_000);

        let report = harness.run(full_job(Some(12)), settings(3, 100)).await;

        assert_eq!(report.status, JobStatus::Done);
        assert!(harness.source.peak_sessions() <= 3);
        assert!(harness.target.peak_sessions() <= 3);
    }

    #[tokio::test]
    async fn failed_stream_cannot_be_resumed() {
        let store = MemoryStore::new("source", 1);
        crate::fixtures::seed_orders(&store, 50);
        store.inject(
            Fault::fail(Op::Fetch, || DbError::server("42501", "permission denied"))
                .on_table("orders")
                .at_offset(20),
        );

        let schema = orders_schema(source_table());
        let order_by = schema.order_key();
        let session = store.session().await.unwrap();
        let extractor = BatchExtractor::new(session.as_ref(), &schema, &order_by, 20);
        let partition = Partition::whole_table(source_table(), None, 50);
        let mut stream = extractor.open(&partition);
        let retry = quick_retry();

        let first = stream.next_batch(&retry).await.into_result().unwrap();
        assert_eq!(first.map(|b| (b.sequence, b.len())), Some((1, 20)));

        let failed = stream.next_batch(&retry).await;
        assert!(matches!(failed, AttemptOutcome::FatalFailure { attempts: 1, .. }));

        let after = stream.next_batch(&retry).await;
        assert!(matches!(after, AttemptOutcome::FatalFailure { attempts: 0, .. }));
        assert_eq!(store.calls_to(Op::Fetch, "orders", None).len(), 2);
    }

    #[tokio::test]
    async fn stream_ends_without_an_empty_batch() {
        let store = MemoryStore::new("source", 1);
        crate::fixtures::seed_orders(&store, 40);

        let schema = orders_schema(source_table());
        let order_by = schema.order_key();
        let session = store.session().await.unwrap();
        let extractor = BatchExtractor::new(session.as_ref(), &schema, &order_by, 20);
        let partition = Partition::whole_table(source_table(), None, 40);
        let mut stream = extractor.open(&partition);
        let retry = quick_retry();

        let mut batches = Vec::new();
        while let Some(batch) = stream.next_batch(&retry).await.into_result().unwrap() {
            batches.push(batch);
        }

        assert_eq!(batches.len(), 2);
        assert_eq!(batches[1].offset, 20);
        assert_eq!(ids(&batches[0].rows), (1..=20).collect::<Vec<_>>());
        assert_eq!(stream.rows_read(), 40);
    }

    // A row inserted before the current position must not shift later pages.
    #[tokio::test]
    async fn pages_continue_after_the_last_key_read() {
        let store = MemoryStore::new("source", 1);
        let table = source_table();
        store.create(
            orders_schema(table.clone()),
            (10..=59).map(|id| order_row(id, base_time())).collect(),
        );

        let schema = orders_schema(table.clone());
        let order_by = schema.order_key();
        let session = store.session().await.unwrap();
        let extractor = BatchExtractor::new(session.as_ref(), &schema, &order_by, 20);
        let partition = Partition::whole_table(table.clone(), None, 50);
        let mut stream = extractor.open(&partition);
        let retry = quick_retry();

        let mut read = Vec::new();
        let first = stream.next_batch(&retry).await.into_result().unwrap().unwrap();
        read.extend(first.rows);
        store.insert(&table, vec![order_row(1, base_time()), order_row(2, base_time())]);
        while let Some(batch) = stream.next_batch(&retry).await.into_result().unwrap() {
            read.extend(batch.rows);
        }

        assert_eq!(ids(&read), (10..=59).collect::<Vec<_>>());
        assert_eq!(stream.rows_read(), 50);
        let offsets: Vec<Option<u64>> = store
            .calls_to(Op::Fetch, "orders", None)
            .iter()
            .map(|c| c.offset)
            .collect();
        assert_eq!(offsets, vec![Some(0), Some(20), Some(40)]);
    }
}
