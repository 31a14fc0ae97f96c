use std::fs;
use std::process::Command;
use std::sync::Arc;

use marklastread::config::Config;
use marklastread::controller::ClickOutcome;
use marklastread::identifier::OrderedIdentifier;
use marklastread::item::{ATTR_READ, ATTR_THREAD};
use marklastread::scenario::{FeedKind, ItemReport, PageBuilder, Report, Scenario};
use marklastread::storage::{KeyValueStore, MemoryStore};
use marklastread::Runtime;

fn store() -> Arc<dyn KeyValueStore> {
    Arc::new(MemoryStore::new())
}

fn run(yaml: &str) -> Report {
    Scenario::from_yaml(yaml)
        .expect("parse scenario")
        .run(&Config::default(), store())
        .expect("run scenario")
}

fn item<'a>(report: &'a Report, id: &str) -> &'a ItemReport {
    report
        .items
        .iter()
        .find(|item| item.id == id)
        .unwrap_or_else(|| panic!("item {id} missing from {:?}", report.items))
}

#[test]
fn marking_an_item_reads_everything_older() {
    let report = run(
        r#"
feed:
  - id: 12
  - id: 11
  - id: 10
steps:
  - do: open_menu
    id: 11
  - do: mark_read
"#,
    );
    assert!(!item(&report, "12").read);
    assert!(item(&report, "11").read);
    assert!(item(&report, "10").read);
    assert_eq!(report.last_read.as_deref(), Some("11"));
}

#[test]
fn promoted_items_are_never_read() {
    let report = run(
        r#"
last_read: 50
feed:
  - id: 40
  - { id: 30, kind: promoted }
  - id: 20
"#,
    );
    assert!(item(&report, "40").read);
    assert!(!item(&report, "30").read);
    assert_eq!(item(&report, "30").kind, "promoted");
    assert!(item(&report, "20").read);
}

#[test]
fn ascending_run_forms_a_thread_until_a_reshare() {
    let report = run(
        r#"
page_size: 6
feed:
  - id: 100
  - id: 101
  - id: 102
  - id: 103
  - { id: 104, kind: reshare }
  - id: 105
steps:
  - do: open_menu
    id: 103
  - do: mark_read
"#,
    );
    for id in ["100", "101", "102"] {
        assert_eq!(item(&report, id).thread_head.as_deref(), Some("103"));
        assert!(item(&report, id).read);
    }
    assert_eq!(item(&report, "103").thread_head, None);
    assert!(item(&report, "103").read);
    assert_eq!(item(&report, "104").thread_head, None);
    assert!(!item(&report, "104").read);
    // The reshare ends the run, so 105 never reaches back into it.
    assert_eq!(item(&report, "105").thread_head, None);
    assert!(!item(&report, "105").read);
}

#[test]
fn reattached_item_is_read_after_the_watermark_moves() {
    let mut page = PageBuilder::new("/home");
    let element = page.push_item(10, FeedKind::Normal);
    let mut runtime = Runtime::new(page.build(), Config::default(), store());

    runtime.document_mut().remove(element);
    runtime.pump();
    runtime.document_mut().append_child(page.timeline(), element);
    runtime.pump();
    assert!(runtime.set_last_read_id(OrderedIdentifier::from(50)).unwrap());

    let doc = runtime.document();
    assert!(doc.is_connected(element));
    assert!(runtime
        .controller()
        .and_then(|controller| controller.item(&OrderedIdentifier::from(10)))
        .is_some_and(|record| record.is_read));
    assert!(doc.has_attribute(element, ATTR_READ));
}

#[test]
fn scroll_gives_up_when_the_feed_stops_growing() {
    let report = run(
        r#"
last_read: 1
feed:
  - id: 30
  - id: 20
  - id: 10
steps:
  - do: scroll
  - do: advance
    by: 6s
"#,
    );
    assert_eq!(report.scroll, "stopped (exhausted)");
    assert!(report
        .events
        .iter()
        .any(|event| event == "scroll stopped: exhausted"));
}

#[test]
fn scroll_pages_down_to_the_last_read_item() {
    let feed: String = (1..=20)
        .rev()
        .map(|id| format!("  - id: {id}\n"))
        .collect();
    let report = run(&format!(
        "last_read: 3\npage_size: 5\nfeed:\n{feed}steps:\n  - do: scroll\n  - do: advance\n    by: 10s\n"
    ));
    assert_eq!(report.scroll, "stopped (found 3)");
    assert_eq!(report.rendered, 20);
    assert!(report.scroll_y > 0);
    assert!(item(&report, "3").read);
    assert!(!item(&report, "4").read);
}

#[test]
fn scroll_jumps_when_the_boundary_is_already_rendered() {
    let report = run(
        r#"
last_read: 11
feed:
  - id: 12
  - id: 11
steps:
  - do: scroll
"#,
    );
    assert_eq!(report.scroll, "idle");
    assert!(!report.events.iter().any(|event| event == "scroll started"));
}

#[test]
fn setting_the_same_watermark_twice_changes_nothing() {
    let mut page = PageBuilder::new("/home");
    let newer = page.push_item(11, FeedKind::Normal);
    let older = page.push_item(10, FeedKind::Normal);
    let mut runtime = Runtime::new(page.build(), Config::default(), store());
    assert!(runtime.is_active());

    assert!(runtime.set_last_read_id(OrderedIdentifier::from(10)).unwrap());
    let once = runtime.document().clone();
    assert!(runtime.set_last_read_id(OrderedIdentifier::from(10)).unwrap());
    let doc = runtime.document();

    for element in [newer, older] {
        assert_eq!(
            doc.attribute(element, ATTR_READ),
            once.attribute(element, ATTR_READ)
        );
    }
    assert!(doc.has_attribute(older, ATTR_READ));
    assert!(!doc.has_attribute(newer, ATTR_READ));
    assert!(!doc.has_attribute(older, ATTR_THREAD));
}

#[test]
fn menu_entry_marks_the_item_it_was_opened_for() {
    let mut page = PageBuilder::new("/home");
    let newer = page.push_item(21, FeedKind::Normal);
    let older = page.push_item(20, FeedKind::Normal);
    let mut runtime = Runtime::new(page.build(), Config::default(), store());

    let more = PageBuilder::more_button(runtime.document(), older).unwrap();
    assert_eq!(
        runtime.click(more).unwrap(),
        ClickOutcome::PopupActive(Some(OrderedIdentifier::from(20)))
    );
    let menu = page.open_menu(runtime.document_mut());
    runtime.pump();
    runtime.advance(Config::default().scroll.menu_settle_delay);

    let doc = runtime.document();
    let entry = doc
        .descendants(menu)
        .into_iter()
        .find(|&node| doc.text_content(node) == "Mark as Read" && doc.children(node).len() == 1)
        .expect("injected entry");
    assert_eq!(
        runtime.click(entry).unwrap(),
        ClickOutcome::MarkedRead(OrderedIdentifier::from(20))
    );

    let doc = runtime.document();
    assert!(doc.has_attribute(older, ATTR_READ));
    assert!(!doc.has_attribute(newer, ATTR_READ));
}

#[test]
fn simulate_flag_prints_a_report() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("scenario.yaml");
    fs::write(
        &path,
        "last_read: 2\nfeed:\n  - id: 3\n  - id: 2\n  - id: 1\n",
    )
    .unwrap();

    let output = Command::new(env!("CARGO_BIN_EXE_marklastread"))
        .arg("--simulate")
        .arg(&path)
        .env("HOME", dir.path())
        .env("XDG_CONFIG_HOME", dir.path())
        .env("XDG_DATA_HOME", dir.path())
        .output()
        .expect("run marklastread --simulate");
    assert!(
        output.status.success(),
        "stderr was: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.contains("status: active"), "stdout was: {stdout}");
    assert!(stdout.contains("last_read: '2'"), "stdout was: {stdout}");
}
