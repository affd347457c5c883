// tests/pipeline_e2e.rs
// End-to-end runs over MemoryStore + MockTransport (no network).

mod common;

use std::time::Duration;

use common::*;
use devport_ingest::dedup::DedupConfig;
use devport_ingest::error::ProviderError;
use devport_ingest::ingest::types::Source;
use devport_ingest::store::MemoryStore;
use devport_ingest::summarize::providers::{valid_answer, MockTransport};
use devport_ingest::Stage;

#[tokio::test]
async fn same_url_keeps_the_more_engaged_copy() {
    let h = harness(MockTransport::valid(), MemoryStore::new());
    let url = "https://dev.to/alice/rust-tips-1a2b";
    let report = h
        .pipeline
        .run(Source::Devto, vec![raw(url, "Rust tips", 3), raw(url, "Rust tips!", 10)])
        .await;

    assert_eq!(report.received, 2);
    assert_eq!(report.duplicates, 1);
    assert_eq!(report.persisted, 1);
    let records = h.store.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].engagement_count, 10);

    let dedup: Vec<_> = report.failures.iter().filter(|f| f.stage == Stage::Dedup).collect();
    assert_eq!(dedup.len(), report.duplicates);
    assert_eq!(dedup[0].reason, "duplicate in batch");
}

#[tokio::test]
async fn one_valid_one_missing_summary() {
    // Answer only the first url of the batch.
    let llm = MockTransport::from_fn(|p| Ok(valid_answer(&p.urls[..1])));
    let h = harness(llm, MemoryStore::new());
    let report = h
        .pipeline
        .run(
            Source::Devto,
            vec![
                raw("https://dev.to/a/first-1", "First post", 5),
                raw("https://dev.to/b/second-2", "Second post", 5),
            ],
        )
        .await;

    assert_eq!(h.llm.calls(), 1);
    assert_eq!(report.summarized, 1);
    assert_eq!(report.summary_failed, 1);
    assert_eq!(report.persisted, 1);
    assert_eq!(h.store.records()[0].url, "https://dev.to/a/first-1");
    let failure = report
        .failures
        .iter()
        .find(|f| f.stage == Stage::Summarize)
        .expect("summarize failure recorded");
    assert_eq!(failure.url.as_deref(), Some("https://dev.to/b/second-2"));
}

#[tokio::test(start_paused = true)]
async fn lookup_timeout_excludes_items_fail_closed() {
    let dedup = DedupConfig {
        lookup_timeout: Duration::from_millis(50),
        ..Default::default()
    };
    let h = harness_with(
        MockTransport::valid(),
        MemoryStore::new().with_lookup_delay(Duration::from_secs(2)),
        settings(2, 2),
        dedup,
        Duration::from_secs(30),
    );
    let report = h
        .pipeline
        .run(
            Source::Medium,
            vec![
                raw("https://medium.com/@a/one-111", "One", 1),
                raw("https://medium.com/@b/two-222", "Two", 1),
            ],
        )
        .await;

    assert_eq!(report.dedup_unverified, 2);
    assert_eq!(report.deduplicated, 0);
    assert_eq!(report.persisted, 0);
    assert_eq!(h.llm.calls(), 0, "unverified items never reach the LLM");
    assert!(h.store.is_empty());
    assert!(report.failures.iter().all(|f| f.stage == Stage::Dedup));
}

#[tokio::test]
async fn failing_lookup_is_also_fail_closed() {
    let h = harness(MockTransport::valid(), MemoryStore::new().with_failing_lookups());
    let report = h
        .pipeline
        .run(Source::Devto, vec![raw("https://dev.to/a/x-1", "X", 1)])
        .await;
    assert_eq!(report.dedup_unverified, 1);
    assert_eq!(report.persisted, 0);
}

#[tokio::test]
async fn malformed_records_are_counted_not_fatal() {
    let h = harness(MockTransport::valid(), MemoryStore::new());
    let mut no_title = raw("https://dev.to/a/t-1", "", 1);
    no_title.title = None;
    let mut no_date = raw("https://dev.to/a/t-2", "Dated?", 1);
    no_date.published_at = None;
    let report = h
        .pipeline
        .run(
            Source::Devto,
            vec![no_title, no_date, raw("https://dev.to/a/t-3", "Fine", 1)],
        )
        .await;
    assert_eq!(report.malformed, 2);
    assert_eq!(report.persisted, 1);
    assert_eq!(
        report.failures.iter().filter(|f| f.stage == Stage::Normalize).count(),
        2
    );
}

#[tokio::test]
async fn non_technical_items_are_dropped_separately() {
    let llm = MockTransport::from_fn(|p| {
        let mut v: serde_json::Value = serde_json::from_str(&valid_answer(&p.urls)).unwrap();
        v[0]["is_technical"] = serde_json::json!(false);
        Ok(v.to_string())
    });
    let h = harness(llm, MemoryStore::new());
    let report = h
        .pipeline
        .run(
            Source::Hackernews,
            vec![
                raw("https://news.example.com/gossip", "Celebrity gossip", 100),
                raw("https://news.example.com/rustc", "rustc internals", 100),
            ],
        )
        .await;
    assert_eq!(report.summarized, 2);
    assert_eq!(report.non_technical, 1);
    assert_eq!(report.summary_failed, 0);
    assert_eq!(report.persisted, 1);
    assert_eq!(h.store.records()[0].url, "https://news.example.com/rustc");
}

#[tokio::test]
async fn persist_failure_does_not_stop_other_writes() {
    let store = MemoryStore::new().with_failing_write("https://dev.to/a/bad-1");
    let h = harness(MockTransport::valid(), store);
    let report = h
        .pipeline
        .run(
            Source::Devto,
            vec![
                raw("https://dev.to/a/bad-1", "Bad", 50),
                raw("https://dev.to/a/good-2", "Good", 1),
            ],
        )
        .await;
    assert_eq!(report.persist_failed, 1);
    assert_eq!(report.persisted, 1);
    assert_eq!(h.store.upsert_calls(), 2);
}

#[tokio::test]
async fn rerun_is_idempotent() {
    let h = harness(MockTransport::valid(), MemoryStore::new());
    let batch = || {
        vec![
            raw("https://dev.to/a/p-1", "P1", 1),
            raw("https://dev.to/a/p-2", "P2", 2),
        ]
    };
    let first = h.pipeline.run(Source::Devto, batch()).await;
    let second = h.pipeline.run(Source::Devto, batch()).await;
    assert_eq!(first.persisted, 2);
    assert_eq!(second.persisted, 0);
    assert_eq!(second.duplicates, 2);
    assert_eq!(h.store.len(), 2);
    assert_eq!(h.llm.calls(), 1, "second run never reaches the LLM");
    assert_eq!(second.failures.len(), 2);
    assert!(second
        .failures
        .iter()
        .all(|f| f.stage == Stage::Dedup && f.reason == "already persisted"));
}

#[tokio::test(start_paused = true)]
async fn concurrent_runs_never_double_insert() {
    // Both runs pass the lookup before either one writes.
    let h = harness(
        MockTransport::valid().with_delay(Duration::from_millis(100)),
        MemoryStore::new(),
    );
    let batch = || vec![raw("https://dev.to/a/race-1", "Race", 4)];
    let (a, b) = tokio::join!(
        h.pipeline.run(Source::Devto, batch()),
        h.pipeline.run(Source::Devto, batch())
    );

    assert_eq!(h.store.len(), 1);
    assert_eq!(a.persisted + b.persisted, 1);
    assert_eq!(a.already_existed + b.already_existed, 1);
    let lost = if a.persisted == 1 { &b } else { &a };
    assert_eq!(lost.failures.len(), 1);
    assert_eq!(lost.failures[0].stage, Stage::Persist);
}

#[tokio::test]
async fn selector_runs_can_be_spawned() {
    use devport_ingest::ingest::providers::{DevtoProvider, SourceRegistry};
    use devport_ingest::ingest::selector::SourceSelector;
    use std::sync::Arc;

    let h = harness(MockTransport::valid(), MemoryStore::new());
    let pipeline = Arc::new(h.pipeline);
    let registry = Arc::new(SourceRegistry::new().with(Arc::new(DevtoProvider::from_fixture(
        include_str!("fixtures/devto_articles.json"),
    ))));

    let reports = tokio::spawn(async move {
        pipeline
            .run_selector(SourceSelector::Single(Source::Devto), &registry)
            .await
    })
    .await
    .expect("run task");
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].persisted, 2);
}

#[tokio::test]
async fn quota_exhaustion_skips_remaining_batches() {
    let llm = MockTransport::from_fn(|_| Err(ProviderError::QuotaExceeded("daily limit".into())));
    let h = harness_with(
        llm,
        MemoryStore::new(),
        settings(1, 1),
        DedupConfig::default(),
        Duration::from_secs(30),
    );
    let records = (0..4)
        .map(|i| raw(&format!("https://dev.to/a/q-{i}"), &format!("Q{i}"), 1))
        .collect();
    let report = h.pipeline.run(Source::Devto, records).await;
    assert_eq!(h.llm.calls(), 1);
    assert_eq!(report.summary_failed, 4);
    assert_eq!(report.persisted, 0);
}

#[tokio::test(start_paused = true)]
async fn run_timeout_discards_in_flight_batches() {
    let llm = MockTransport::valid().with_delay(Duration::from_secs(60));
    let h = harness_with(
        llm,
        MemoryStore::new(),
        settings(2, 2),
        DedupConfig::default(),
        Duration::from_secs(1),
    );
    let report = h
        .pipeline
        .run(Source::Devto, vec![raw("https://dev.to/a/slow-1", "Slow", 1)])
        .await;
    assert!(report.timed_out);
    assert_eq!(report.deduplicated, 1);
    assert_eq!(report.summarized, 0);
    assert_eq!(report.persisted, 0);
    assert!(h.store.is_empty());
    assert!(report.failures.iter().any(|f| f.stage == Stage::Run));
    assert!(report.finished_at.is_some());
}

#[tokio::test]
async fn empty_input_is_a_clean_run() {
    let h = harness(MockTransport::valid(), MemoryStore::new());
    let report = h.pipeline.run(Source::Reddit, Vec::new()).await;
    assert_eq!(report.received, 0);
    assert!(report.failures.is_empty());
    assert_eq!(h.llm.calls(), 0);
    assert_eq!(h.store.lookup_calls(), 0);
}

#[tokio::test]
async fn unsupported_provider_fails_before_any_call() {
    use devport_ingest::{ConfigError, Pipeline, PipelineConfig};
    use std::sync::Arc;

    let mut cfg = PipelineConfig::default();
    cfg.llm.provider = "llama".into();
    cfg.llm.api_key = "sk-unused".into();
    let store = Arc::new(MemoryStore::new());
    let err = Pipeline::from_config(&cfg, store.clone())
        .err()
        .expect("config must be rejected");
    assert!(matches!(err, ConfigError::UnsupportedProvider(ref p) if p == "llama"));
    assert_eq!(store.lookup_calls(), 0);
}
