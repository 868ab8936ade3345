//! Rank-vs-DOM flow against the in-memory browser

mod support;

use std::time::Duration;

use personalizer_e2e::runner::SUMMARY_FILE;
use personalizer_e2e::{InputWorkbook, ItemState, SuiteRunner};
use support::{fast_config, item, rank_event, FakeDriver, PageScript};

#[tokio::test]
async fn matching_order_passes_first_time() {
    let dir = tempfile::tempdir().unwrap();
    let driver = FakeDriver::new();
    let p1 = item("p1");
    driver.script(&p1.url, PageScript::ranked("p1", &["a", "b", "c"], &["a", "b"], "a"));

    let runner = SuiteRunner::new(driver.clone(), fast_config(dir.path()));
    let context = runner.run(&[p1]).await;

    assert_eq!(context.results().len(), 1);
    let result = &context.results()[0];
    assert!(result.passed(), "{:?}", result.error);
    assert!(result.order_matches);
    assert!(result.rank_api_observed);
    assert!(result.reward_api_observed);
    assert!(!result.recommendation_not_loaded);
    assert_eq!(result.first_ranked_id.as_deref(), Some("a"));
    assert_eq!(result.first_dom_id.as_deref(), Some("a"));
    assert_eq!(result.rank_order, vec!["a", "b"]);
    assert_eq!(result.rank_event_id.as_deref(), Some("rank-p1"));
    assert_eq!(result.reward_event_id.as_deref(), Some("evt-1"));
    assert_eq!(result.reward_weight, Some(1.0));
    assert_eq!(result.batch_number, 1);
    assert_eq!(result.retry_attempt, 0);

    assert_eq!(context.state("p1"), Some(ItemState::Passed));
    assert_eq!((driver.opened(), driver.closed()), (1, 1));
    assert!(driver.screenshots().is_empty());
}

#[tokio::test]
async fn mismatch_is_retried_to_exhaustion() {
    let dir = tempfile::tempdir().unwrap();
    let driver = FakeDriver::new();
    let p1 = item("p1");
    driver.script(&p1.url, PageScript::ranked("p1", &["b", "a", "c"], &["a", "b"], "a"));

    let runner = SuiteRunner::new(driver.clone(), fast_config(dir.path()));
    let context = runner.run(&[p1]).await;

    let attempts: Vec<u32> = context.results().iter().map(|r| r.retry_attempt).collect();
    assert_eq!(attempts, vec![0, 1, 2]);
    assert_eq!(context.results().len() as u32, runner.policy().max_attempts());
    for result in context.results() {
        let error = result.error.as_deref().unwrap_or_default();
        assert!(error.starts_with("Rank mismatch"), "{}", error);
        assert!(!result.order_matches);
        assert!(result.screenshot_path.is_some());
    }

    assert_eq!(context.failures().failures("p1"), 3);
    assert_eq!(context.state("p1"), Some(ItemState::Failed { count: 3 }));
    assert_eq!(driver.screenshots().len(), 3);
    assert_eq!((driver.opened(), driver.closed()), (3, 3));

    let shot = driver.screenshots()[1].file_name().unwrap().to_string_lossy().into_owned();
    assert!(shot.starts_with("p1_retry1_"), "{}", shot);
    assert!(shot.ends_with(".png"));
}

#[tokio::test]
async fn retries_stop_once_item_passes() {
    let dir = tempfile::tempdir().unwrap();
    let driver = FakeDriver::new();
    let p1 = item("p1");
    driver
        .script(&p1.url, PageScript::ranked("p1", &["b", "a"], &["a", "b"], "a"))
        .script(&p1.url, PageScript::ranked("p1", &["a", "b"], &["a", "b"], "a"));

    let runner = SuiteRunner::new(driver.clone(), fast_config(dir.path()));
    let context = runner.run(&[p1]).await;

    assert_eq!(context.results().len(), 2);
    assert!(!context.results()[0].passed());
    assert!(context.results()[1].passed());
    assert_eq!(context.state("p1"), Some(ItemState::Passed));
    assert_eq!(driver.visits().len(), 2);

    let summary = context.summary(std::time::Duration::ZERO);
    assert!(summary.all_passed());
    assert_eq!(summary.retried, 1);
}

#[tokio::test]
async fn missing_rank_response_flags_recommendation_not_loaded() {
    let dir = tempfile::tempdir().unwrap();
    let driver = FakeDriver::new();
    let p1 = item("p1");
    driver.script(&p1.url, PageScript::without_rank(&["a", "b"]));

    let mut config = fast_config(dir.path());
    config.retry.max_retries = 1;
    let runner = SuiteRunner::new(driver.clone(), config);
    let context = runner.run(&[p1]).await;

    assert_eq!(context.results().len(), 2);
    let first = &context.results()[0];
    assert!(first.recommendation_not_loaded);
    assert!(!first.rank_api_observed);
    assert_eq!(first.dom_order, vec!["a", "b"]);
    assert!(first
        .error
        .as_deref()
        .unwrap_or_default()
        .starts_with("Recommendation not loaded"));
    assert_eq!(context.failures().failures("p1"), 2);
}

#[tokio::test]
async fn rank_response_for_another_item_is_ignored() {
    let dir = tempfile::tempdir().unwrap();
    let driver = FakeDriver::new();
    let p1 = item("p1");
    driver.script(
        &p1.url,
        PageScript::without_rank(&["a"]).with_events(vec![rank_event("p2", &["a"], "a")]),
    );

    let mut config = fast_config(dir.path());
    config.retry.max_retries = 0;
    let context = SuiteRunner::new(driver, config).run(&[p1]).await;

    assert_eq!(context.results().len(), 1);
    assert!(context.results()[0].recommendation_not_loaded);
}

#[tokio::test]
async fn retries_keep_original_batch_number() {
    let dir = tempfile::tempdir().unwrap();
    let driver = FakeDriver::new();
    let items = [item("p1"), item("p2"), item("p3")];
    driver.script(&items[0].url, PageScript::ranked("p1", &["a"], &["a"], "a"));
    driver.script(&items[1].url, PageScript::ranked("p2", &["a"], &["a"], "a"));
    driver
        .script(&items[2].url, PageScript::ranked("p3", &["x"], &["a"], "a"))
        .script(&items[2].url, PageScript::ranked("p3", &["a"], &["a"], "a"));

    let mut config = fast_config(dir.path());
    config.retry.batch_size = 2;
    let context = SuiteRunner::new(driver, config).run(&items).await;

    let rows: Vec<(&str, usize, u32)> = context
        .results()
        .iter()
        .map(|r| (r.identifier.as_str(), r.batch_number, r.retry_attempt))
        .collect();
    assert_eq!(rows, vec![("p1", 1, 0), ("p2", 1, 0), ("p3", 2, 0), ("p3", 2, 1)]);
}

#[tokio::test]
async fn concurrent_attempts_are_recorded_in_submission_order() {
    let dir = tempfile::tempdir().unwrap();
    let driver = FakeDriver::new();
    let items: Vec<_> = ["p1", "p2", "p3", "p4", "p5", "p6"].into_iter().map(item).collect();
    for it in &items {
        let script = PageScript::ranked(&it.identifier, &["a"], &["a"], "a");
        match it.identifier.as_str() {
            // first in each batch finishes last
            "p1" | "p5" => {
                driver.script(&it.url, script.with_load_delay(Duration::from_millis(80)));
            }
            "p2" => {
                driver
                    .script(&it.url, PageScript::ranked("p2", &["x"], &["a"], "a"))
                    .script(&it.url, script);
            }
            "p6" => {
                driver
                    .script(&it.url, PageScript::ranked("p6", &["x"], &["a"], "a"))
                    .script(&it.url, script.with_load_delay(Duration::from_millis(40)));
            }
            _ => {
                driver.script(&it.url, script);
            }
        }
    }

    let mut config = fast_config(dir.path());
    config.retry.batch_size = 4;
    config.retry.concurrency = 3;
    let runner = SuiteRunner::new(driver.clone(), config);
    assert_eq!(runner.policy().concurrency, 3);
    let context = runner.run(&items).await;

    let rows: Vec<(&str, usize, u32, bool)> = context
        .results()
        .iter()
        .map(|r| (r.identifier.as_str(), r.batch_number, r.retry_attempt, r.passed()))
        .collect();
    assert_eq!(
        rows,
        vec![
            ("p1", 1, 0, true),
            ("p2", 1, 0, false),
            ("p3", 1, 0, true),
            ("p4", 1, 0, true),
            ("p5", 2, 0, true),
            ("p6", 2, 0, false),
            ("p2", 1, 1, true),
            ("p6", 2, 1, true),
        ]
    );

    for id in ["p1", "p2", "p3", "p4", "p5", "p6"] {
        assert_eq!(context.state(id), Some(ItemState::Passed), "{}", id);
    }
    assert!(driver.peak_open() > 1);
    assert!(driver.peak_open() <= 3);
    assert_eq!((driver.opened(), driver.closed()), (8, 8));
}

#[tokio::test]
async fn per_item_failures_close_the_page() {
    let dir = tempfile::tempdir().unwrap();
    let driver = FakeDriver::new();
    let slow = item("slow");
    let bare = item("bare");
    let empty = item("empty");
    driver.script(
        &slow.url,
        PageScript {
            navigate_timeout: true,
            ..Default::default()
        },
    );
    driver.script(
        &bare.url,
        PageScript {
            clickable: false,
            ..PageScript::ranked("bare", &["a"], &["a"], "a")
        },
    );
    driver.script(&empty.url, PageScript::ranked("empty", &[], &["a"], "a"));

    let mut config = fast_config(dir.path());
    config.retry.max_retries = 0;
    let context = SuiteRunner::new(driver.clone(), config).run(&[slow, bare, empty]).await;

    let errors: Vec<&str> = context
        .results()
        .iter()
        .map(|r| r.error.as_deref().unwrap_or_default())
        .collect();
    assert!(errors[0].starts_with("Navigation to"), "{}", errors[0]);
    assert!(errors[1].starts_with("No clickable elements"), "{}", errors[1]);
    assert!(errors[2].starts_with("No elements matched"), "{}", errors[2]);
    assert_eq!((driver.opened(), driver.closed()), (3, 3));
}

#[tokio::test]
async fn rank_order_is_truncated_to_prefix() {
    let dir = tempfile::tempdir().unwrap();
    let driver = FakeDriver::new();
    let p1 = item("p1");
    driver.script(
        &p1.url,
        PageScript::ranked("p1", &["a", "b", "c", "d", "e"], &["a", "b", "c", "d", "z", "y"], "a"),
    );

    let context = SuiteRunner::new(driver, fast_config(dir.path())).run(&[p1]).await;

    let result = &context.results()[0];
    assert!(result.passed(), "{:?}", result.error);
    assert_eq!(result.rank_order, vec!["a", "b", "c", "d"]);
}

#[tokio::test]
async fn empty_item_list_produces_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let driver = FakeDriver::new();
    let runner = SuiteRunner::new(driver.clone(), fast_config(dir.path()));

    let context = runner.run(&[]).await;

    assert!(context.results().is_empty());
    assert_eq!(driver.opened(), 0);
    assert_eq!(runner.persist_report(&context), None);
    assert!(!dir.path().join("report").exists());
}

#[tokio::test]
async fn report_and_summary_cover_every_attempt() {
    let dir = tempfile::tempdir().unwrap();
    let driver = FakeDriver::new();
    let p1 = item("p1");
    let p2 = item("p2");
    driver.script(&p1.url, PageScript::ranked("p1", &["a", "b"], &["a", "b"], "a"));
    driver.script(&p2.url, PageScript::ranked("p2", &["b", "a"], &["a", "b"], "a"));

    let runner = SuiteRunner::new(driver, fast_config(dir.path()));
    let context = runner.run(&[p1, p2]).await;

    let report = runner.persist_report(&context).expect("report written");
    let name = report.file_name().unwrap().to_string_lossy().into_owned();
    assert!(name.starts_with("report_personalizer_report_"), "{}", name);

    let book = InputWorkbook::open(&report).unwrap();
    let rows = book.section("Test Result").unwrap();
    assert_eq!(rows.len(), 4);
    assert_eq!(rows[0].text(&["PersonalizerId"]).as_deref(), Some("p1"));
    assert_eq!(rows[3].text(&["RetryAttempt"]).as_deref(), Some("2"));

    let summary = context.summary(std::time::Duration::from_millis(10));
    let path = runner.write_summary(&summary).unwrap();
    assert_eq!(path, dir.path().join("test-results").join(SUMMARY_FILE));
    assert_eq!((summary.passed, summary.failed, summary.attempts), (1, 1, 4));
}
