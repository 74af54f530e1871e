use hermes_client::ProductExtractor;
use hermes_client::extract::fields;
use hermes_core::error::FetchErrorKind;
use hermes_core::job::{BatchJob, ExistingOutputPolicy};
use hermes_core::models::Record;
use hermes_core::report::{analyze, load_records};
use hermes_core::sink::{JsonDirSink, load_failed_addresses};
use hermes_core::testutil::{MockFetcher, MockReporter};
use hermes_core::{BatchOrchestrator, run_batch};
use tokio_util::sync::CancellationToken;

use crate::integration::common::{address, product_page, test_config};

#[tokio::test]
async fn blocked_address_fails_once_and_others_persist() {
    let dir = tempfile::tempdir().unwrap();
    let addresses = vec![address(1), address(2), address(3)];

    let fetcher = MockFetcher::by_address(vec![
        (addresses[0].as_str(), vec![Ok(product_page(1, "Desk Lamp", 12.5))]),
        (addresses[1].as_str(), vec![Err(FetchErrorKind::Blocked)]),
        (addresses[2].as_str(), vec![Ok(product_page(3, "Floor Lamp", 48.0))]),
    ]);

    let config = test_config(dir.path(), ExistingOutputPolicy::Overwrite);
    let orchestrator = BatchOrchestrator::new(fetcher.clone(), ProductExtractor::new(), &config);
    let job = BatchJob::new(addresses.clone(), config).unwrap();
    let sink = JsonDirSink::create(dir.path()).await.unwrap();
    let reporter = MockReporter::new();

    let report = run_batch(&orchestrator, &job, &sink, &reporter, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.summary.total, 3);
    assert_eq!(report.summary.succeeded, 2);
    assert_eq!(report.summary.failed, 1);
    assert_eq!(report.summary.retried, 0);
    assert_eq!(report.summary.failures_by_kind.get("blocked"), Some(&1));
    // the blocked address was not retried
    assert_eq!(fetcher.call_count(), 3);

    let records = load_records(&sink.records_dir()).await.unwrap();
    assert_eq!(records.len(), 2);
    let mut titles: Vec<_> = records
        .iter()
        .filter_map(|r| r.basic_info.title.clone())
        .collect();
    titles.sort();
    assert_eq!(titles, vec!["Desk Lamp", "Floor Lamp"]);

    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].address, addresses[1]);
    assert_eq!(
        load_failed_addresses(dir.path()).await.unwrap(),
        vec![addresses[1].clone()]
    );

    assert_eq!(reporter.count("Completed"), 2);
    assert_eq!(reporter.count("Failed"), 1);
    assert_eq!(reporter.count("Finished"), 1);
}

#[tokio::test]
async fn records_carry_embedded_price_and_no_price_warning() {
    let dir = tempfile::tempdir().unwrap();
    let addr = address(7);
    let fetcher = MockFetcher::new(&product_page(7, "Desk Lamp", 9.99));

    let config = test_config(dir.path(), ExistingOutputPolicy::Overwrite);
    let orchestrator = BatchOrchestrator::new(fetcher, ProductExtractor::new(), &config);
    let job = BatchJob::new(vec![addr.clone()], config).unwrap();
    let sink = JsonDirSink::create(dir.path()).await.unwrap();

    let report = run_batch(
        &orchestrator,
        &job,
        &sink,
        &MockReporter::new(),
        CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(report.summary.succeeded, 1);
    assert!(
        !report
            .summary
            .field_warnings
            .contains_key(fields::CURRENT_PRICE)
    );

    let content = tokio::fs::read_to_string(sink.record_path(&addr)).await.unwrap();
    let record: Record = serde_json::from_str(&content).unwrap();
    let price = record.pricing.current_price.unwrap();
    assert_eq!(price.value, 9.99);
    assert_eq!(price.currency, "USD");
    assert_eq!(record.basic_info.product_id.as_deref(), Some("7"));
    assert_eq!(record.basic_info.category.as_deref(), Some("Lighting"));
}

#[tokio::test]
async fn rerun_with_skip_policy_fetches_nothing_new() {
    let dir = tempfile::tempdir().unwrap();
    let addresses = vec![address(1), address(2)];

    let config = test_config(dir.path(), ExistingOutputPolicy::Skip);
    let first = MockFetcher::new(&product_page(1, "Desk Lamp", 12.5));
    let orchestrator = BatchOrchestrator::new(first, ProductExtractor::new(), &config);
    let job = BatchJob::new(addresses.clone(), config.clone()).unwrap();
    let sink = JsonDirSink::create(dir.path()).await.unwrap();
    run_batch(&orchestrator, &job, &sink, &MockReporter::new(), CancellationToken::new())
        .await
        .unwrap();

    let second = MockFetcher::new(&product_page(1, "Desk Lamp", 12.5));
    let orchestrator = BatchOrchestrator::new(second.clone(), ProductExtractor::new(), &config);
    let job = BatchJob::new(addresses, config).unwrap();
    let report = run_batch(&orchestrator, &job, &sink, &MockReporter::new(), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(second.call_count(), 0);
    assert_eq!(report.summary.skipped, 2);
    assert_eq!(report.summary.total, 0);
}

#[tokio::test]
async fn statistics_rebuild_from_persisted_records() {
    let dir = tempfile::tempdir().unwrap();
    let addresses = vec![address(1), address(2), address(3)];
    let fetcher = MockFetcher::by_address(vec![
        (addresses[0].as_str(), vec![Ok(product_page(1, "Desk Lamp", 8.0))]),
        (addresses[1].as_str(), vec![Ok(product_page(2, "Wall Lamp", 20.0))]),
        (addresses[2].as_str(), vec![Ok(product_page(3, "Floor Lamp", 60.0))]),
    ]);

    let config = test_config(dir.path(), ExistingOutputPolicy::Overwrite);
    let orchestrator = BatchOrchestrator::new(fetcher, ProductExtractor::new(), &config);
    let job = BatchJob::new(addresses, config).unwrap();
    let sink = JsonDirSink::create(dir.path()).await.unwrap();
    run_batch(&orchestrator, &job, &sink, &MockReporter::new(), CancellationToken::new())
        .await
        .unwrap();

    let records = load_records(&sink.records_dir()).await.unwrap();
    let first = analyze(&records);
    let second = analyze(&load_records(&sink.records_dir()).await.unwrap());
    assert_eq!(first, second);

    assert_eq!(first.total_records, 3);
    assert_eq!(first.pricing.prices_by_currency.len(), 1);
    let price = &first.pricing.prices_by_currency[0].price;
    assert_eq!(price.count, 3);
    assert_eq!(price.min, 8.0);
    assert_eq!(price.max, 60.0);
    assert_eq!(price.median, 20.0);
}
