use chrono::DateTime;
use pretty_assertions::assert_eq;
use wordpad_core::{
    BuiltinPrimitive, DEFAULT_AUTOSAVE_KEY, DocumentSnapshot, EditorConfig, EditorSession, Focus,
    FormattingKind, FormattingPrimitive, FormattingRequest, KeyValueStore, LiveSelection,
    ManualClock, MemoryStore, Point, PrimitiveOutcome, Resolution, Selection, Surface,
    SurfaceEvent,
};

fn session_with(primitive: impl FormattingPrimitive + 'static, content: &str) -> EditorSession {
    let mut store = MemoryStore::new();
    let record = DocumentSnapshot::new("", "", content).to_json().unwrap();
    store.set(DEFAULT_AUTOSAVE_KEY, &record).unwrap();
    let clock = ManualClock::new(DateTime::from_timestamp(1_700_000_000, 0).unwrap());
    EditorSession::new(
        EditorConfig::default(),
        Box::new(primitive),
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

fn select_abc(session: &mut EditorSession) {
    select(session, Point::new(vec![0, 0], 2), Point::new(vec![0, 0], 5));
}

#[test]
fn builtin_primitive_wraps_selection_in_presentational_markup() {
    let mut session = session_with(BuiltinPrimitive::new(), "<p>xxabcyy</p>");
    select_abc(&mut session);

    let report = session.execute(&FormattingRequest::new(FormattingKind::Bold));
    assert_eq!(report.resolution, Resolution::Primitive(FormattingKind::Bold));
    assert_eq!(
        report.attempts,
        vec![(FormattingKind::Bold, PrimitiveOutcome::Applied)]
    );
    assert_eq!(session.content_markup(), "<p>xx<b>abc</b>yy</p>");
    assert_eq!(
        session.surface().editor_selection(),
        Some(Selection::new(
            Point::new(vec![0, 1, 0], 0),
            Point::new(vec![0, 1, 0], 3)
        ))
    );
    assert!(session.store().has_pending());
}

#[test]
fn builtin_legacy_font_size_marks_the_caret() {
    let mut session = session_with(BuiltinPrimitive::new(), "<p>abcd</p>");
    let caret = Point::new(vec![0, 0], 2);
    select(&mut session, caret.clone(), caret);

    let report = session.execute(&FormattingRequest::with_value(FormattingKind::FontSize, "5"));
    assert_eq!(
        report.resolution,
        Resolution::Primitive(FormattingKind::FontSize)
    );
    session.handle(SurfaceEvent::Input("X".to_string()));
    assert_eq!(session.content_markup(), "<p>ab<font size=\"5\">X</font>cd</p>");
}

#[test]
fn pixel_font_size_is_unsupported_by_the_builtin_and_falls_back() {
    let mut session = session_with(BuiltinPrimitive::new(), "<p>xxabcyy</p>");
    select_abc(&mut session);

    let report = session.execute(&FormattingRequest::with_value(FormattingKind::FontSize, "18"));
    assert_eq!(
        report.attempts,
        vec![(FormattingKind::FontSize, PrimitiveOutcome::Unsupported)]
    );
    assert_eq!(report.resolution, Resolution::Fallback);
    assert_eq!(
        session.content_markup(),
        "<p>xx<span style=\"font-size: 18px\">abc</span>yy</p>"
    );
}

#[test]
fn highlight_tries_hilite_then_back_color() {
    let primitive = BuiltinPrimitive::new().without([FormattingKind::HiliteColor]);
    let mut session = session_with(primitive, "<p>xxabcyy</p>");
    select_abc(&mut session);

    let report = session.execute(&FormattingRequest::with_value(
        FormattingKind::HiliteColor,
        "yellow",
    ));
    assert_eq!(
        report.attempts,
        vec![
            (FormattingKind::HiliteColor, PrimitiveOutcome::Unsupported),
            (FormattingKind::BackColor, PrimitiveOutcome::Applied),
        ]
    );
    assert_eq!(
        report.resolution,
        Resolution::Primitive(FormattingKind::BackColor)
    );
    assert_eq!(
        session.content_markup(),
        "<p>xx<span style=\"background-color: yellow\">abc</span>yy</p>"
    );
}

#[test]
fn back_color_request_also_starts_with_hilite_and_falls_back_last() {
    let primitive =
        BuiltinPrimitive::new().without([FormattingKind::HiliteColor, FormattingKind::BackColor]);
    let mut session = session_with(primitive, "<p>xxabcyy</p>");
    select_abc(&mut session);

    let report = session.execute(&FormattingRequest::with_value(
        FormattingKind::BackColor,
        "#ff0",
    ));
    let tried: Vec<FormattingKind> = report.attempts.iter().map(|(kind, _)| *kind).collect();
    assert_eq!(
        tried,
        vec![FormattingKind::HiliteColor, FormattingKind::BackColor]
    );
    assert!(report.used_fallback());
    assert_eq!(
        session.content_markup(),
        "<p>xx<span style=\"background-color: #ff0\">abc</span>yy</p>"
    );
}

#[test]
fn declined_block_format_with_unknown_tag_fails_cleanly() {
    let mut session = session_with(BuiltinPrimitive::new(), "<p>hello</p>");
    select(&mut session, Point::new(vec![0, 0], 1), Point::new(vec![0, 0], 1));

    let report = session.execute(&FormattingRequest::with_value(
        FormattingKind::FormatBlock,
        "<table>",
    ));
    assert_eq!(
        report.attempts,
        vec![(FormattingKind::FormatBlock, PrimitiveOutcome::Declined)]
    );
    assert!(matches!(report.resolution, Resolution::Failed(_)));
    assert_eq!(session.content_markup(), "<p>hello</p>");
}

#[test]
fn builtin_block_commands() {
    let mut session = session_with(BuiltinPrimitive::new(), "<p>one</p><p>two</p>");
    select(&mut session, Point::new(vec![0, 0], 1), Point::new(vec![1, 0], 1));

    session.execute(&FormattingRequest::with_value(
        FormattingKind::FormatBlock,
        "blockquote",
    ));
    session.execute(&FormattingRequest::new(FormattingKind::JustifyRight));
    assert_eq!(
        session.content_markup(),
        "<blockquote style=\"text-align: right\">one</blockquote>\
         <blockquote style=\"text-align: right\">two</blockquote>"
    );
}

#[test]
fn builtin_declines_without_focus() {
    let mut surface = Surface::new(
        wordpad_core::Document::new(vec![wordpad_core::Node::paragraph("hi")]),
        &EditorConfig::default(),
    );
    let mut primitive = BuiltinPrimitive::new();
    assert_eq!(
        primitive.exec(&mut surface, FormattingKind::Bold, None),
        PrimitiveOutcome::Declined
    );

    surface.focus_editor();
    assert_eq!(
        primitive.exec(&mut surface, FormattingKind::ForeColor, None),
        PrimitiveOutcome::Declined
    );
    assert_eq!(
        primitive.exec(&mut surface, FormattingKind::Bold, None),
        PrimitiveOutcome::Applied
    );
}

#[test]
fn insert_image_uses_the_primitive_and_schedules_save() {
    let mut session = session_with(BuiltinPrimitive::new(), "<p>ab</p>");
    let caret = Point::new(vec![0, 0], 1);
    select(&mut session, caret.clone(), caret);

    let report = session.insert_image("pic.png");
    assert_eq!(
        report.resolution,
        Resolution::Primitive(FormattingKind::InsertImage)
    );
    assert_eq!(session.content_markup(), "<p>a<img src=\"pic.png\">b</p>");
    assert_eq!(
        session.surface().editor_selection(),
        Some(Selection::collapsed(Point::new(vec![0, 2], 0)))
    );
    assert!(session.store().has_pending());
}
