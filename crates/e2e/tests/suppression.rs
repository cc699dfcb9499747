//! Background suppression and suppressed sequences

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::time::{sleep, Instant};

use storefront_e2e::driver::Point;
use storefront_e2e::overlay::{subscription_modal, SUBSCRIPTION_MODAL};
use storefront_e2e::testing::{FakeElement, PageEvent, Reaction, ScriptedPage};
use storefront_e2e::{
    PopupCoordinator, SequenceAction, SequenceOptions, SuppressionOptions, SuppressionSession,
};

const CLOSE: &str = r#"button[aria-label*="close" i]"#;

#[derive(Debug, PartialEq)]
struct CheckoutFailed {
    step: u32,
}

impl fmt::Display for CheckoutFailed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "checkout failed at step {}", self.step)
    }
}

fn modal_root() -> String {
    subscription_modal().presence.root_selector()
}

fn setup() -> (Arc<ScriptedPage>, PopupCoordinator) {
    storefront_e2e::init_tracing();
    let page = Arc::new(ScriptedPage::new());
    let coordinator = PopupCoordinator::new(page.clone());
    (page, coordinator)
}

fn timer_only(check_interval_ms: u64, max_duration_ms: u64) -> SuppressionOptions {
    SuppressionOptions {
        check_interval_ms,
        max_duration_ms,
        dismiss_before: false,
        dismiss_after: false,
    }
}

fn root_lookups(events: &[PageEvent]) -> usize {
    let root = modal_root();
    events
        .iter()
        .filter(|e| matches!(e, PageEvent::Probe(s) if *s == root))
        .count()
}

#[tokio::test(start_paused = true)]
async fn success_value_passes_through() {
    let (page, coordinator) = setup();

    let result = coordinator
        .run_with_suppression(
            async {
                sleep(Duration::from_millis(2500)).await;
                page.mark("settled");
                Ok::<_, CheckoutFailed>(42)
            },
            &SuppressionOptions::default(),
        )
        .await;

    assert_eq!(result, Ok(42));
    // before pass, two background passes, after pass
    assert_eq!(page.probes(&modal_root()), 4);
    assert_eq!(root_lookups(&page.events_after("settled")), 1);
}

#[tokio::test(start_paused = true)]
async fn failure_is_reraised_after_final_pass() {
    let (page, coordinator) = setup();

    let result: Result<(), _> = coordinator
        .run_with_suppression(
            async {
                sleep(Duration::from_millis(500)).await;
                page.mark("failed");
                Err(CheckoutFailed { step: 3 })
            },
            &SuppressionOptions::default(),
        )
        .await;

    assert_eq!(result, Err(CheckoutFailed { step: 3 }));
    assert_eq!(root_lookups(&page.events_after("failed")), 1);
}

#[tokio::test(start_paused = true)]
async fn session_records_failure() {
    let (_page, coordinator) = setup();
    let session = SuppressionSession::new(&timer_only(100, 10_000));
    let handle = session.handle();

    let result: Result<(), String> = session
        .run(&coordinator, async {
            sleep(Duration::from_millis(250)).await;
            Err("payment declined".to_string())
        })
        .await;

    assert_eq!(result, Err("payment declined".to_string()));
    assert_eq!(handle.last_error().as_deref(), Some("payment declined"));
    assert_eq!(handle.passes(), 2);
    assert!(handle.is_cancelled());
}

#[tokio::test(start_paused = true)]
async fn timer_runs_at_interval_and_stops_with_action() {
    let (page, coordinator) = setup();
    let session = SuppressionSession::new(&timer_only(100, 10_000));
    let handle = session.handle();

    let result = session
        .run(&coordinator, async {
            sleep(Duration::from_millis(1000)).await;
            page.mark("done");
            Ok::<_, String>(())
        })
        .await;
    assert!(result.is_ok());

    assert!(handle.passes() >= 9, "only {} passes", handle.passes());
    assert!(handle.is_cancelled());

    // nothing runs once the action has settled, even after more intervals
    sleep(Duration::from_millis(500)).await;
    assert_eq!(root_lookups(&page.events_after("done")), 0);
}

#[tokio::test(start_paused = true)]
async fn timer_stops_at_max_duration() {
    let (_page, coordinator) = setup();
    let session = SuppressionSession::new(&timer_only(100, 350));
    let handle = session.handle();

    let result = session
        .run(&coordinator, async {
            sleep(Duration::from_millis(1000)).await;
            Ok::<_, String>("late")
        })
        .await;

    assert_eq!(result, Ok("late"));
    assert_eq!(handle.passes(), 3);
    assert!(handle.elapsed() >= Duration::from_millis(1000));
}

#[tokio::test(start_paused = true)]
async fn cancelled_handle_stops_the_timer() {
    let (_page, coordinator) = setup();
    let session = SuppressionSession::new(&timer_only(100, 10_000));
    let handle = session.handle();

    let result = session
        .run(&coordinator, async {
            handle.cancel();
            sleep(Duration::from_millis(1000)).await;
            Ok::<_, String>(())
        })
        .await;

    assert!(result.is_ok());
    assert!(handle.is_cancelled());
    assert_eq!(handle.passes(), 0);
}

#[tokio::test(start_paused = true)]
async fn action_result_is_not_held_back_by_inflight_pass() {
    let (page, coordinator) = setup();
    page.add(&modal_root(), FakeElement::visible());
    let start = Instant::now();

    let settled_at = coordinator
        .run_with_suppression(
            async {
                sleep(Duration::from_millis(150)).await;
                Ok::<_, String>(start.elapsed())
            },
            &timer_only(100, 10_000),
        )
        .await
        .unwrap();

    assert!(settled_at >= Duration::from_millis(150));
    assert!(
        start.elapsed() < Duration::from_millis(200),
        "returned after {:?}",
        start.elapsed()
    );

    // the pass started at 100ms still finishes, and no other pass follows it
    sleep(Duration::from_secs(5)).await;
    assert_eq!(
        page.inputs(),
        vec![
            PageEvent::Press("Escape".to_string()),
            PageEvent::MouseClick(Point::new(10.0, 10.0)),
            PageEvent::Press("Escape".to_string()),
            PageEvent::MouseClick(Point::new(5.0, 5.0)),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn each_action_gets_a_fresh_session() {
    let (_page, coordinator) = setup();
    let options = timer_only(100, 10_000);

    let first = SuppressionSession::new(&options);
    let first_handle = first.handle();
    first
        .run(&coordinator, async {
            sleep(Duration::from_millis(350)).await;
            Ok::<_, String>(())
        })
        .await
        .unwrap();
    assert!(first_handle.is_cancelled());
    assert_eq!(first_handle.passes(), 3);

    let second = SuppressionSession::new(&options);
    let second_handle = second.handle();
    assert!(!second_handle.is_cancelled());
    second
        .run(&coordinator, async {
            sleep(Duration::from_millis(250)).await;
            Ok::<_, String>(())
        })
        .await
        .unwrap();
    assert_eq!(second_handle.passes(), 2);
    assert_eq!(first_handle.passes(), 3);
}

#[tokio::test(start_paused = true)]
async fn popup_opening_mid_action_is_cleared() {
    let (page, coordinator) = setup();
    let root = modal_root();
    page.add(&root, FakeElement::hidden())
        .add(CLOSE, FakeElement::visible())
        .on_click(CLOSE, Reaction::Hide(root.clone()));

    let result = coordinator
        .run_with_suppression(
            async {
                sleep(Duration::from_millis(250)).await;
                page.show(&root);
                sleep(Duration::from_millis(600)).await;
                Ok::<_, String>(coordinator.is_visible(SUBSCRIPTION_MODAL).await)
            },
            &timer_only(300, 10_000),
        )
        .await;

    assert_eq!(result, Ok(false));
    assert_eq!(
        page.inputs(),
        vec![PageEvent::Click {
            selector: CLOSE.to_string(),
            position: None
        }]
    );
}

fn position(events: &[PageEvent], label: &str) -> Option<usize> {
    events
        .iter()
        .position(|e| *e == PageEvent::Mark(label.to_string()))
}

fn step<'a>(page: &'a ScriptedPage, label: &'static str) -> SequenceAction<'a, String> {
    async move {
        sleep(Duration::from_millis(100)).await;
        page.mark(label);
        Ok::<(), String>(())
    }
    .boxed()
}

#[tokio::test(start_paused = true)]
async fn sequence_clears_between_actions() {
    let (page, coordinator) = setup();
    let options = SequenceOptions::default();

    let result = coordinator
        .run_sequence_with_suppression(
            vec![step(&page, "add-to-bag"), step(&page, "open-bag"), step(&page, "checkout")],
            &options,
        )
        .await;
    assert_eq!(result, Ok(()));

    let events = page.events();
    let first = position(&events, "add-to-bag").unwrap();
    let second = position(&events, "open-bag").unwrap();
    let third = position(&events, "checkout").unwrap();
    assert!(first < second && second < third);

    let pause = PageEvent::Settle(Duration::from_millis(200));
    assert!(events[first..second].contains(&pause));
    assert!(events[second..third].contains(&pause));
    assert!(!events[..first].contains(&pause));

    assert!(root_lookups(&events[first..second]) >= 1);
    assert_eq!(root_lookups(&events[third..]), 1);
}

#[tokio::test(start_paused = true)]
async fn sequence_without_between_passes() {
    let (page, coordinator) = setup();
    let options = SequenceOptions {
        dismiss_between: false,
        ..Default::default()
    };

    let result = coordinator
        .run_sequence_with_suppression(vec![step(&page, "a"), step(&page, "b")], &options)
        .await;

    assert_eq!(result, Ok(()));
    assert!(page.settles().is_empty());
}

#[tokio::test(start_paused = true)]
async fn sequence_stops_at_first_failure() {
    let (page, coordinator) = setup();
    let failing: SequenceAction<'_, String> = {
        let page = &page;
        async move {
            page.mark("payment");
            Err::<(), _>("card rejected".to_string())
        }
        .boxed()
    };

    let result = coordinator
        .run_sequence_with_suppression(
            vec![step(&page, "address"), failing, step(&page, "confirmation")],
            &SequenceOptions::default(),
        )
        .await;

    assert_eq!(result, Err("card rejected".to_string()));
    let events = page.events();
    assert!(position(&events, "confirmation").is_none());
    assert_eq!(root_lookups(&page.events_after("payment")), 1);
}

#[tokio::test(start_paused = true)]
async fn empty_sequence_still_clears() {
    let (page, coordinator) = setup();

    let result = coordinator
        .run_sequence_with_suppression(Vec::<SequenceAction<'_, String>>::new(), &SequenceOptions::default())
        .await;

    assert_eq!(result, Ok(()));
    assert_eq!(page.probes(&modal_root()), 2);
}
