#[cfg(test)]
mod tests {
    use crate::{
        fixtures::{
            Harness, INTERNAL_SCHEMA, base_time, full_job, incremental_job, order_row,
            orders_schema, settings, source_table, target_table,
        },
        memory::{Call, Fault, Op},
    };
    use chrono::{NaiveDate, TimeDelta};
    use connectors::sql::base::error::DbError;
    use engine_runtime::report::{JobStatus, TransferState};
    use model::{
        core::{data_type::DataType, identifiers::TableRef, value::Value},
        errors::ErrorKind,
        filter::RowFilter,
        records::row::Row,
        schema::{ColumnDefinition, TableSchema},
    };
    use tracing_test::traced_test;

    // Scenario A: 10 000 rows in 10 partitions of 1000.
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn even_split_transfers_every_row() {
        let harness = Harness::with_orders(4, 10_000);

        let report = harness.run(full_job(Some(10)), settings(4, 300)).await;

        assert_eq!(report.status, JobStatus::Done, "{report:?}");
        assert_eq!(report.partitions_total, 10);
        assert_eq!(report.partitions_succeeded, 10);
        assert_eq!(report.rows_transferred, 10_000);
        assert_eq!(report.target_row_count, Some(10_000));
        assert_eq!(harness.target_ids(), (1..=10_000).collect::<Vec<_>>());

        for ordinal in 1..=10 {
            let created = harness.source.calls_to(Op::Materialize, &format!("orders_{ordinal}"), None);
            assert_eq!(created.len(), 1);
            assert_eq!(created[0].rows, 1000);
        }
        assert!(harness.leftover_partitions().is_empty());
    }

    // Scenario B: 10 005 rows, the last partition absorbs the remainder.
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn remainder_goes_to_the_last_partition() {
        let harness = Harness::with_orders(3, 10_005);

        let report = harness.run(full_job(Some(10)), settings(3, 400)).await;

        assert_eq!(report.status, JobStatus::Done, "{report:?}");
        assert_eq!(report.rows_transferred, 10_005);
        for ordinal in 1..=9 {
            let created = harness.source.calls_to(Op::Materialize, &format!("orders_{ordinal}"), None);
            assert_eq!(created[0].rows, 1000);
        }
        let last = harness.source.calls_to(Op::Materialize, "orders_10", None);
        assert_eq!(last[0].rows, 1005);
        assert_eq!(harness.target_ids(), (1..=10_005).collect::<Vec<_>>());
    }

    // Scenario C: splitting disabled or n = 1 reads the source table directly.
    #[tokio::test]
    async fn single_partition_matches_split_output() {
        let disabled = Harness::with_orders(2, 2_500);
        let report = disabled.run(full_job(None), settings(2, 1000)).await;
        assert_eq!(report.status, JobStatus::Done);
        assert_eq!(report.partitions_total, 1);
        assert!(!report.transitions.contains(&TransferState::Split));
        assert!(disabled.source.calls_to(Op::Materialize, "orders_1", None).is_empty());

        let one = Harness::with_orders(2, 2_500);
        let report = one.run(full_job(Some(1)), settings(2, 1000)).await;
        assert_eq!(report.partitions_total, 1);
        assert!(!report.transitions.contains(&TransferState::Split));

        let split = Harness::with_orders(2, 2_500);
        let report = split.run(full_job(Some(5)), settings(2, 1000)).await;
        assert!(report.transitions.contains(&TransferState::Split));

        assert_eq!(disabled.target_ids(), one.target_ids());
        assert_eq!(disabled.target_ids(), split.target_ids());
        assert_eq!(
            disabled.target.rows(&target_table()).map(|r| r.len()),
            Some(2_500)
        );
    }

    // Scenario D: a dropped connection on batch 5 of 50 is retried and recovers.
    #[tokio::test]
    async fn transient_fault_mid_partition_is_retried() {
        let harness = Harness::with_orders(1, 5_000);
        harness.source.inject(
            Fault::fail(Op::Fetch, || DbError::ConnectionClosed)
                .on_table("orders")
                .at_offset(400),
        );

        let report = harness.run(full_job(None), settings(1, 100)).await;

        assert_eq!(report.status, JobStatus::Done, "{report:?}");
        assert_eq!(report.rows_transferred, 5_000);
        assert_eq!(report.batches_loaded, 50);
        assert_eq!(report.retries, 1);
        assert_eq!(harness.target_ids(), (1..=5_000).collect::<Vec<_>>());

        let attempts = harness.source.calls_to(Op::Fetch, "orders", Some(400));
        assert_eq!(attempts.len(), 2);
        assert!(attempts[0].failed);
        assert!(!attempts[1].failed);
    }

    // Scenario E: only rows strictly after the watermark reach the target.
    #[tokio::test]
    async fn incremental_run_reads_rows_after_the_watermark() {
        let harness = Harness::with_orders(2, 1_000);
        let watermark = base_time() + TimeDelta::minutes(600);
        let job = incremental_job(
            "updated_at",
            Some(&watermark.format("%Y-%m-%d %H:%M:%S").to_string()),
            Some(4),
        );

        let report = harness.run(job, settings(2, 64)).await;

        assert_eq!(report.status, JobStatus::Done, "{report:?}");
        assert_eq!(report.rows_transferred, 400);
        assert_eq!(harness.target_ids(), (601..=1_000).collect::<Vec<_>>());
        assert_eq!(
            report.high_watermark,
            Some(Value::Timestamp(base_time() + TimeDelta::minutes(1_000)).to_string())
        );
    }

    #[tokio::test]
    async fn incremental_without_value_reads_the_last_day() {
        let harness = Harness::new(2);
        let today = NaiveDate::from_ymd_opt(2024, 3, 10).unwrap();
        let yesterday = NaiveDate::from_ymd_opt(2024, 3, 9)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .unwrap();
        harness.source.create(
            orders_schema(source_table()),
            vec![
                order_row(1, yesterday - TimeDelta::days(3)),
                order_row(2, yesterday - TimeDelta::seconds(1)),
                order_row(3, yesterday),
                order_row(4, yesterday + TimeDelta::hours(20)),
                order_row(5, yesterday + TimeDelta::hours(25)),
            ],
        );

        let report = harness
            .orchestrator(incremental_job("updated_at", None, None), settings(2, 1))
            .on_day(today)
            .run()
            .await;

        assert_eq!(report.status, JobStatus::Done, "{report:?}");
        assert_eq!(harness.target_ids(), vec![3, 4, 5]);
    }

    // The last-day bound is fixed when the run starts: every statement that reads the
    // source carries the same literal, however long the run takes.
    #[tokio::test]
    async fn last_day_bound_is_the_same_for_every_statement() {
        let harness = Harness::new(2);
        let today = NaiveDate::from_ymd_opt(2024, 3, 10).unwrap();
        let start = NaiveDate::from_ymd_opt(2024, 3, 9)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .unwrap();
        let rows = (1..=40)
            .map(|id| order_row(id, start + TimeDelta::minutes(id * 30)))
            .collect();
        harness.source.create(orders_schema(source_table()), rows);

        let report = harness
            .orchestrator(incremental_job("updated_at", None, Some(3)), settings(2, 4))
            .on_day(today)
            .run()
            .await;
        assert_eq!(report.status, JobStatus::Done, "{report:?}");
        assert_eq!(harness.target_ids(), (1..=40).collect::<Vec<_>>());

        let expected = RowFilter::since("updated_at", DataType::Timestamp, "2024-03-09");
        let filtered: Vec<Call> = harness
            .source
            .calls()
            .into_iter()
            .filter(|c| matches!(c.op, Op::CountRows | Op::Materialize))
            .collect();
        assert_eq!(filtered.len(), 4);
        assert!(filtered.iter().all(|c| c.filter.as_ref() == Some(&expected)));
    }

    #[tokio::test]
    async fn interval_watermark_is_rejected() {
        let harness = Harness::new(2);
        let mut schema = orders_schema(source_table());
        schema.columns.push(ColumnDefinition::new("age", "interval", true));
        harness.source.create(schema, Vec::new());

        let report = harness
            .run(incremental_job("age", Some("2 days"), None), settings(2, 10))
            .await;

        assert_eq!(report.status, JobStatus::Failed);
        assert_eq!(report.error_kind, Some(ErrorKind::Schema));
    }

    // numeric(12,2) watermark: amounts of different widths compare by value.
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn numeric_watermark_filters_and_tracks_by_value() {
        let harness = Harness::with_orders(4, 1_000);

        let report = harness
            .run(incremental_job("amount", Some("1500"), Some(4)), settings(4, 64))
            .await;

        assert_eq!(report.status, JobStatus::Done, "{report:?}");
        assert_eq!(harness.target_ids(), (501..=1_000).collect::<Vec<_>>());
        assert_eq!(report.high_watermark.as_deref(), Some("3000.00"));

        let everything = Harness::with_orders(4, 1_000);
        let report = everything
            .run(incremental_job("amount", Some("1.00"), Some(4)), settings(4, 64))
            .await;

        assert_eq!(report.rows_transferred, 1_000);
        assert_eq!(report.high_watermark.as_deref(), Some("3000.00"));
    }

    #[tokio::test]
    async fn incremental_runs_append_without_truncating() {
        let harness = Harness::with_orders(2, 100);
        let job = || incremental_job("updated_at", Some("2024-01-01 01:00:00"), None);

        harness.run(job(), settings(2, 25)).await;
        let report = harness.run(job(), settings(2, 25)).await;

        assert_eq!(report.status, JobStatus::Done);
        assert_eq!(report.target_row_count, Some(80));
        assert!(harness.target.calls_to(Op::TruncateTable, "orders", None).is_empty());
    }

    #[tokio::test]
    async fn full_rerun_truncates_instead_of_duplicating() {
        let harness = Harness::with_orders(2, 300);

        harness.run(full_job(Some(3)), settings(2, 50)).await;
        let report = harness.run(full_job(Some(3)), settings(2, 50)).await;

        assert_eq!(report.status, JobStatus::Done);
        assert_eq!(report.target_row_count, Some(300));
        assert_eq!(harness.target_ids(), (1..=300).collect::<Vec<_>>());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn failed_partitions_do_not_stop_the_others() {
        let harness = Harness::with_orders(4, 1_000);
        harness.source.inject(
            Fault::fail(Op::Fetch, || DbError::server("22P02", "invalid input syntax"))
                .on_table("orders_2")
                .skip(1),
        );
        harness.source.inject(
            Fault::fail(Op::Fetch, || DbError::ConnectionClosed)
                .on_table("orders_3")
                .always(),
        );

        let report = harness.run(full_job(Some(4)), settings(4, 100)).await;

        assert_eq!(report.status, JobStatus::Failed);
        assert_eq!(report.partitions_succeeded, 2);
        assert_eq!(report.rows_transferred, 500);
        assert_eq!(report.rows_in_failed_partitions, 100);

        let failed: Vec<(&str, ErrorKind)> = report
            .failed_partitions
            .iter()
            .map(|p| (p.id.as_str(), p.kind))
            .collect();
        assert_eq!(
            failed,
            vec![("orders_2", ErrorKind::Data), ("orders_3", ErrorKind::Connectivity)]
        );
        assert_eq!(
            harness.source.calls_to(Op::Fetch, "orders_3", None).len(),
            3,
            "exhausted every attempt"
        );

        let expected: Vec<i64> = (1..=350).chain(751..=1_000).collect();
        assert_eq!(harness.target_ids(), expected);
        assert!(harness.leftover_partitions().is_empty());
    }

    // Rows without a primary key that are equal on every orderable column.
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn keyless_table_with_duplicate_rows_splits_without_loss() {
        let harness = Harness::new(2);
        let schema = TableSchema {
            table: source_table(),
            columns: vec![
                ColumnDefinition::new("region", "text", false),
                ColumnDefinition::new("qty", "integer", false),
                ColumnDefinition::new("payload", "json", true),
            ],
            primary_key: Vec::new(),
            approx_row_count: 0,
        };
        let rows = (0..40)
            .map(|n| {
                Row::new(vec![
                    Value::Text(if n % 2 == 0 { "eu" } else { "us" }.to_string()),
                    Value::Int(7),
                    Value::Json(serde_json::json!({ "n": n })),
                ])
            })
            .collect();
        harness.source.create(schema, rows);

        let report = harness.run(full_job(Some(4)), settings(2, 3)).await;

        assert_eq!(report.status, JobStatus::Done, "{report:?}");
        assert_eq!(report.partitions_total, 4);
        let mut seen: Vec<i64> = harness
            .target
            .rows(&target_table())
            .unwrap_or_default()
            .iter()
            .filter_map(|row| match row.get(2) {
                Value::Json(payload) => payload["n"].as_i64(),
                _ => None,
            })
            .collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..40).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn panicking_partition_fails_alone() {
        let harness = Harness::with_orders(2, 400);
        harness
            .source
            .inject(Fault::panic(Op::Fetch).on_table("orders_2"));

        let report = harness.run(full_job(Some(4)), settings(2, 50)).await;

        assert_eq!(report.status, JobStatus::Failed);
        assert_eq!(report.partitions_succeeded, 3);
        assert_eq!(report.rows_transferred, 300);
        assert_eq!(report.failed_partitions.len(), 1);
        assert_eq!(report.failed_partitions[0].id, "orders_2");
        assert_eq!(report.failed_partitions[0].kind, ErrorKind::Other);
        assert!(report.failed_partitions[0].message.contains("scripted panic"));

        let expected: Vec<i64> = (1..=100).chain(201..=400).collect();
        assert_eq!(harness.target_ids(), expected);
        assert!(harness.leftover_partitions().is_empty());
    }

    #[tokio::test]
    async fn partition_creation_failure_is_isolated() {
        let harness = Harness::with_orders(2, 900);
        harness.source.inject(
            Fault::fail(Op::Materialize, || DbError::server("53100", "disk full"))
                .on_table("orders_2"),
        );

        let report = harness.run(full_job(Some(3)), settings(2, 100)).await;

        assert_eq!(report.status, JobStatus::Failed);
        assert_eq!(report.partitions_total, 3);
        assert_eq!(report.partitions_succeeded, 2);
        assert_eq!(report.rows_transferred, 600);
        assert_eq!(report.failed_partitions.len(), 1);
        assert_eq!(report.failed_partitions[0].kind, ErrorKind::PartitionCreation);
        assert!(harness.leftover_partitions().is_empty());
    }

    #[tokio::test]
    async fn constraint_violation_fails_the_partition_without_retry() {
        let harness = Harness::with_orders(1, 200);
        harness.target.inject(
            Fault::fail(Op::Write, || DbError::server("23505", "duplicate key value"))
                .on_table("orders"),
        );

        let report = harness.run(full_job(None), settings(1, 50)).await;

        assert_eq!(report.status, JobStatus::Failed);
        assert_eq!(report.failed_partitions[0].kind, ErrorKind::ConstraintViolation);
        assert_eq!(report.retries, 0);
        assert_eq!(harness.target.calls_to(Op::Write, "orders", None).len(), 1);
    }

    #[tokio::test]
    async fn schema_mismatch_fails_before_any_data_moves() {
        let harness = Harness::with_orders(2, 100);
        let mut existing = orders_schema(target_table());
        existing.columns[0] = ColumnDefinition::new("id", "integer", false);
        harness.target.create(existing, vec![]);

        let report = harness.run(full_job(Some(4)), settings(2, 10)).await;

        assert_eq!(report.status, JobStatus::Failed);
        assert_eq!(report.error_kind, Some(ErrorKind::SchemaMismatch));
        assert_eq!(
            report.transitions,
            vec![TransferState::Init, TransferState::SchemaSync, TransferState::Failed]
        );
        assert_eq!(report.partitions_total, 0);
        assert!(harness.source.calls_to(Op::Materialize, "orders_1", None).is_empty());
        assert!(harness.target.calls_to(Op::TruncateTable, "orders", None).is_empty());
    }

    #[tokio::test]
    async fn drop_target_recreates_an_incompatible_table() {
        let harness = Harness::with_orders(2, 100);
        let mut existing = orders_schema(target_table());
        existing.columns.truncate(2);
        harness.target.create(existing, vec![]);

        let mut job = full_job(None);
        job.drop_target = true;
        let report = harness.run(job, settings(2, 30)).await;

        assert_eq!(report.status, JobStatus::Done, "{report:?}");
        assert_eq!(
            harness.target.schema_of(&target_table()).map(|s| s.columns.len()),
            Some(4)
        );
        assert!(harness.target.has_schema("ETL"));
    }

    #[tokio::test]
    async fn unreachable_source_fails_at_init() {
        let harness = Harness::with_orders(2, 10);
        harness.source.set_reachable(false);

        let report = harness.run(full_job(None), settings(2, 10)).await;

        assert_eq!(report.status, JobStatus::Failed);
        assert_eq!(report.error_kind, Some(ErrorKind::Connectivity));
        assert_eq!(
            report.transitions,
            vec![TransferState::Init, TransferState::Failed]
        );
    }

    #[tokio::test]
    async fn pool_smaller_than_workers_is_rejected() {
        let harness = Harness::with_orders(2, 10);

        let report = harness.run(full_job(None), settings(4, 10)).await;

        assert_eq!(report.status, JobStatus::Failed);
        assert!(report.error.as_deref().is_some_and(|e| e.contains("4 workers")));
    }

    #[tokio::test]
    async fn empty_source_succeeds_with_zero_rows() {
        let harness = Harness::with_orders(2, 0);

        let report = harness.run(full_job(Some(10)), settings(2, 100)).await;

        assert_eq!(report.status, JobStatus::Done, "{report:?}");
        assert_eq!(report.partitions_total, 1);
        assert_eq!(report.rows_transferred, 0);
        assert_eq!(report.target_row_count, Some(0));
    }

    #[tokio::test]
    async fn stop_signal_finishes_the_batch_and_skips_the_rest() {
        let harness = Harness::with_orders(1, 400);
        harness.target.inject(
            Fault::cancel(Op::Write, harness.cancel.clone())
                .on_table("orders")
                .skip(1),
        );

        let report = harness.run(full_job(Some(4)), settings(1, 50)).await;

        assert_eq!(report.status, JobStatus::Failed);
        assert!(report.cancelled);
        assert_eq!(report.partitions_skipped, 3);
        assert_eq!(report.failed_partitions.len(), 1);
        assert_eq!(report.failed_partitions[0].kind, ErrorKind::Cancelled);
        assert_eq!(report.rows_in_failed_partitions, 100);
        assert_eq!(harness.target_ids(), (1..=100).collect::<Vec<_>>());
        assert!(report.transitions.contains(&TransferState::Cleanup));
        assert!(harness.leftover_partitions().is_empty());
    }

    #[traced_test]
    #[tokio::test]
    async fn cleanup_failure_is_logged_but_not_fatal() {
        let harness = Harness::with_orders(2, 600);
        harness.source.inject(
            Fault::fail(Op::DropTable, || {
                DbError::server("42501", "must be owner of table orders_2")
            })
            .on_table("orders_2")
            .skip(1)
            .always(),
        );

        let report = harness.run(full_job(Some(3)), settings(2, 100)).await;

        assert_eq!(report.status, JobStatus::Done);
        assert_eq!(report.cleanup_failures.len(), 1);
        assert_eq!(harness.leftover_partitions(), vec!["orders_2".to_string()]);
        assert!(logs_contain("Failed to drop partition table"));
    }

    #[tokio::test]
    async fn stale_partitions_from_a_crashed_run_are_swept() {
        let harness = Harness::with_orders(2, 50);
        let stale = |name: &str| orders_schema(TableRef::new(INTERNAL_SCHEMA, name));
        harness.source.create(stale("orders_7"), vec![]);
        harness.source.create(stale("orders_archive"), vec![]);

        let report = harness.run(full_job(None), settings(2, 10)).await;

        assert_eq!(report.status, JobStatus::Done);
        assert_eq!(harness.leftover_partitions(), vec!["orders_archive".to_string()]);
    }

    #[tokio::test]
    async fn report_serializes_to_json() {
        let harness = Harness::with_orders(1, 10);
        let report = harness.run(full_job(None), settings(1, 10)).await;

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["status"], "DONE");
        assert_eq!(json["mode"], "full");
        assert_eq!(json["transitions"][0], "INIT");
        assert_eq!(json["rows_transferred"], 10);
    }
}
