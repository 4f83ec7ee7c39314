use chrono::DateTime;
use pretty_assertions::assert_eq;
use wordpad_core::{
    Boundary, DEFAULT_AUTOSAVE_KEY, Document, DocumentSnapshot, EditorConfig, EditorSession, Focus,
    FormattingKind, FormattingRequest, KeyValueStore, LiveSelection, ManualClock, MemoryStore, Node,
    Point, Resolution, Selection, SelectionTracker, Surface, SurfaceEvent, UnavailablePrimitive,
};

fn session_with_content(content: &str) -> EditorSession {
    let mut store = MemoryStore::new();
    let record = DocumentSnapshot::new("", "", content).to_json().unwrap();
    store.set(DEFAULT_AUTOSAVE_KEY, &record).unwrap();
    let clock = ManualClock::new(DateTime::from_timestamp(1_700_000_000, 0).unwrap());
    EditorSession::new(
        EditorConfig::default(),
        Box::new(UnavailablePrimitive),
        Box::new(store),
        Box::new(clock),
    )
}

fn select(session: &mut EditorSession, anchor: Point, focus: Point) {
    session.handle(SurfaceEvent::Focus(Focus::Editor));
    session.handle(SurfaceEvent::SelectionChanged(Some(LiveSelection::editor(
        Selection::new(anchor, focus),
    ))));
}

fn move_focus_to_toolbar(session: &mut EditorSession, control: &str) {
    session.handle(SurfaceEvent::Focus(Focus::Control(control.to_string())));
    session.handle(SurfaceEvent::SelectionChanged(Some(LiveSelection::control(
        control, 0, 3,
    ))));
}

#[test]
fn command_applies_to_selection_made_before_toolbar_focus() {
    let mut session = session_with_content("<p>hello world</p>");
    select(
        &mut session,
        Point::new(vec![0, 0], 6),
        Point::new(vec![0, 0], 11),
    );
    move_focus_to_toolbar(&mut session, "fore-color");

    assert!(session.surface().editor_selection().is_none());
    let stored = session.tracker().last_good_selection().unwrap();
    assert_eq!(stored.anchor, Point::new(vec![0, 0], 6));
    assert!(!stored.collapsed);

    let report = session.execute(&FormattingRequest::with_value(
        FormattingKind::ForeColor,
        "#ff0000",
    ));
    assert_eq!(report.resolution, Resolution::Fallback);
    assert_eq!(
        session.content_markup(),
        "<p>hello <span style=\"color: #ff0000\">world</span></p>"
    );
    assert_eq!(session.surface().focus(), &Focus::Editor);
    assert_eq!(
        session.surface().editor_selection(),
        Some(Selection::collapsed(Point::new(vec![0, 2], 0)))
    );
}

#[test]
fn selection_straddling_the_editor_boundary_is_ignored() {
    let mut session = session_with_content("<p>hello</p>");
    select(&mut session, Point::new(vec![0, 0], 1), Point::new(vec![0, 0], 3));

    session.handle(SurfaceEvent::SelectionChanged(Some(LiveSelection {
        anchor: Boundary::Editor(Point::new(vec![0, 0], 2)),
        focus: Boundary::Control {
            id: "title".to_string(),
            offset: 0,
        },
    })));
    session.handle(SurfaceEvent::SelectionChanged(None));

    let stored = session.tracker().last_good_selection().unwrap();
    assert_eq!(
        stored.selection(),
        Selection::new(Point::new(vec![0, 0], 1), Point::new(vec![0, 0], 3))
    );
}

#[test]
fn tracker_subscription_follows_session_lifecycle() {
    let mut session = session_with_content("<p>hello</p>");
    assert!(session.tracker().is_listening());

    session.teardown();
    assert!(!session.tracker().is_listening());

    select(&mut session, Point::new(vec![0, 0], 1), Point::new(vec![0, 0], 2));
    assert!(session.tracker().last_good_selection().is_none());
}

#[test]
fn detached_range_is_discarded_and_live_selection_kept() {
    let mut surface = Surface::new(
        Document::new(vec![Node::paragraph("hello")]),
        &EditorConfig::default(),
    );
    let mut tracker = SelectionTracker::new();
    tracker.start();
    surface.focus_editor();
    surface.set_live_selection(Some(LiveSelection::caret(Point::new(vec![0, 0], 3))));
    tracker.on_selection_change(&surface);

    // Same shape, new tree: the captured range must not be replayed.
    surface.reset(Document::new(vec![Node::paragraph("hello")]));
    let live_before = surface.live_selection().unwrap().clone();

    assert!(!tracker.restore(&mut surface));
    assert!(tracker.last_good_selection().is_none());
    assert_eq!(surface.live_selection().unwrap(), &live_before);
}

#[test]
fn range_whose_text_shrank_is_not_restored() {
    let mut surface = Surface::new(
        Document::new(vec![Node::paragraph("hello")]),
        &EditorConfig::default(),
    );
    let mut tracker = SelectionTracker::new();
    tracker.start();
    surface.focus_editor();
    surface.set_live_selection(Some(LiveSelection::caret(Point::new(vec![0, 0], 5))));
    tracker.on_selection_change(&surface);

    surface
        .apply(
            wordpad_core::Transaction::new(vec![wordpad_core::Op::RemoveText {
                path: vec![0, 0],
                range: 0..4,
            }])
            .selection_after(Selection::collapsed(Point::new(vec![0, 0], 0))),
        )
        .unwrap();

    assert!(!tracker.restore(&mut surface));
    assert_eq!(
        surface.editor_selection(),
        Some(Selection::collapsed(Point::new(vec![0, 0], 0)))
    );
}

#[test]
fn command_without_any_selection_lands_at_document_start() {
    let mut session = session_with_content("<p>hello</p>");
    let report = session.execute(&FormattingRequest::with_value(
        FormattingKind::ForeColor,
        "blue",
    ));

    assert_eq!(report.resolution, Resolution::Fallback);
    assert_eq!(
        session.content_markup(),
        "<p><span style=\"color: blue\">\u{200B}</span>hello</p>"
    );
    let stored = session.tracker().last_good_selection().unwrap();
    assert!(stored.collapsed);
    assert_eq!(stored.anchor, Point::new(vec![0, 0, 0], 3));
}
