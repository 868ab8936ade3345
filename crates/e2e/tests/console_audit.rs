//! Console-error audit against the in-memory browser

mod support;

use personalizer_common::{ConsoleMessageKind, ConsoleTarget};
use personalizer_e2e::{ConsoleAuditor, PageEvent};
use support::{console_event, fast_config, ids, request_failed_event, FakeDriver, PageScript};

fn target(url: &str, types: &[&str]) -> ConsoleTarget {
    ConsoleTarget {
        url: url.to_string(),
        experiment_id: "exp-42".to_string(),
        error_types: ids(types),
    }
}

fn page(events: Vec<PageEvent>) -> PageScript {
    PageScript::default().with_events(events)
}

#[tokio::test]
async fn clean_page_passes_and_keeps_logs() {
    let dir = tempfile::tempdir().unwrap();
    let driver = FakeDriver::new();
    driver.script(
        "https://ex.com/a",
        page(vec![console_event("log", "hello"), PageEvent::PageError("unrelated".into())]),
    );

    let auditor = ConsoleAuditor::new(driver.clone(), fast_config(dir.path()));
    let checks = auditor.run(&[target("https://ex.com/a", &["log"])]).await;

    assert_eq!(checks.len(), 1);
    assert!(checks[0].passed());
    assert_eq!(checks[0].messages.len(), 1);
    assert_eq!(checks[0].messages[0].kind, ConsoleMessageKind::Console);
    assert_eq!(checks[0].messages[0].url, "https://ex.com/a");
    assert_eq!((driver.opened(), driver.closed()), (1, 1));
}

#[tokio::test]
async fn experiment_mentions_fail_the_target() {
    let dir = tempfile::tempdir().unwrap();
    let driver = FakeDriver::new();
    driver.script(
        "https://ex.com/b",
        page(vec![
            console_event("error", "variant exp-42 failed to render"),
            PageEvent::PageError("TypeError in exp-42".into()),
            request_failed_event("https://cdn.ex.com/x.js", "net::ERR_ABORTED"),
        ]),
    );

    let auditor = ConsoleAuditor::new(driver, fast_config(dir.path()));
    let checks = auditor.run(&[target("https://ex.com/b", &["requestfailed"])]).await;

    let check = &checks[0];
    assert!(!check.passed());
    assert_eq!(check.matching, 2);
    assert_eq!(check.messages.len(), 3);
    assert!(check
        .error
        .as_deref()
        .unwrap_or_default()
        .contains("2 message(s) mention exp-42"));
    assert_eq!(check.messages[2].level, "REQUEST FAILED");
}

#[tokio::test]
async fn messages_are_scoped_per_target() {
    let dir = tempfile::tempdir().unwrap();
    let driver = FakeDriver::new();
    driver.script("https://ex.com/bad", page(vec![console_event("log", "exp-42 broke")]));
    driver.script("https://ex.com/good", page(vec![console_event("log", "fine")]));

    let auditor = ConsoleAuditor::new(driver, fast_config(dir.path()));
    let checks = auditor
        .run(&[
            target("https://ex.com/bad", &["log"]),
            target("https://ex.com/good", &["log"]),
        ])
        .await;

    assert!(!checks[0].passed());
    assert!(checks[1].passed());

    let report = auditor.persist_report(&checks).expect("report written");
    let name = report.file_name().unwrap().to_string_lossy().into_owned();
    assert!(name.starts_with("report_consoleLogs_"), "{}", name);
}

#[tokio::test]
async fn navigation_failure_is_recorded() {
    let dir = tempfile::tempdir().unwrap();
    let driver = FakeDriver::new();
    driver.script(
        "https://ex.com/slow",
        PageScript {
            navigate_timeout: true,
            ..Default::default()
        },
    );

    let auditor = ConsoleAuditor::new(driver.clone(), fast_config(dir.path()));
    let checks = auditor.run(&[target("https://ex.com/slow", &["log"])]).await;

    assert!(checks[0].error.as_deref().unwrap_or_default().starts_with("Navigation to"));
    assert_eq!(driver.closed(), 1);
    assert_eq!(auditor.persist_report(&checks), None);
}
