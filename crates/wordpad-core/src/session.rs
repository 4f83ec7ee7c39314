use tracing::{debug, warn};

use crate::command::{
    CommandExecutor, ExecutionReport, FormattingKind, FormattingPrimitive, FormattingRequest,
};
use crate::config::EditorConfig;
use crate::core::Document;
use crate::image::ImageAnnotationManager;
use crate::markup::{parse_markup, render_snapshot_html, to_markup};
use crate::selection::SelectionTracker;
use crate::snapshot::{Clock, DocumentSnapshot, DocumentSnapshotStore, SaveIndicator};
use crate::storage::KeyValueStore;
use crate::surface::{ClickTarget, Focus, LiveSelection, Surface};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Key {
    Delete,
    Backspace,
    Other(String),
}

/// Host notifications delivered to the session, in the order they happen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SurfaceEvent {
    SelectionChanged(Option<LiveSelection>),
    Focus(Focus),
    Click(ClickTarget),
    KeyDown(Key),
    Input(String),
    TitleChanged(String),
    AuthorChanged(String),
}

/// One open document: the surface and every component working on it.
pub struct EditorSession {
    config: EditorConfig,
    surface: Surface,
    tracker: SelectionTracker,
    executor: CommandExecutor,
    store: DocumentSnapshotStore,
    images: ImageAnnotationManager,
    indicator: SaveIndicator,
    title: String,
    author: String,
    clock: Box<dyn Clock>,
}

impl EditorSession {
    /// Opens a session, restoring the stored draft and starting selection tracking.
    pub fn new(
        config: EditorConfig,
        primitive: Box<dyn FormattingPrimitive>,
        backend: Box<dyn KeyValueStore>,
        clock: Box<dyn Clock>,
    ) -> Self {
        let config = config.with_defaults();
        let mut session = Self {
            surface: Surface::new(Document::empty(), &config),
            tracker: SelectionTracker::new(),
            executor: CommandExecutor::new(primitive),
            store: DocumentSnapshotStore::new(backend, &config),
            images: ImageAnnotationManager::new(),
            indicator: SaveIndicator::from_config(&config),
            title: String::new(),
            author: String::new(),
            clock,
            config,
        };
        session.restore();
        session.tracker.start();
        session
    }

    pub fn config(&self) -> &EditorConfig {
        &self.config
    }

    pub fn surface(&self) -> &Surface {
        &self.surface
    }

    pub fn doc(&self) -> &Document {
        self.surface.doc()
    }

    pub fn tracker(&self) -> &SelectionTracker {
        &self.tracker
    }

    pub fn images(&self) -> &ImageAnnotationManager {
        &self.images
    }

    pub fn store(&self) -> &DocumentSnapshotStore {
        &self.store
    }

    pub fn indicator(&self) -> &SaveIndicator {
        &self.indicator
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn author(&self) -> &str {
        &self.author
    }

    pub fn handle(&mut self, event: SurfaceEvent) {
        match event {
            SurfaceEvent::SelectionChanged(live) => self.surface.set_live_selection(live),
            SurfaceEvent::Focus(focus) => self.surface.set_focus(focus),
            SurfaceEvent::Click(target) => self.images.on_click(self.surface.doc(), &target),
            SurfaceEvent::KeyDown(Key::Delete | Key::Backspace) => {
                if self.images.delete_selected(&mut self.surface) {
                    self.schedule_save();
                }
            }
            SurfaceEvent::KeyDown(Key::Other(_)) => {}
            SurfaceEvent::Input(text) => match self.surface.insert_text(&text) {
                Ok(true) => self.schedule_save(),
                Ok(false) => debug!("Input ignored without an editor caret"),
                Err(err) => warn!("Failed to insert typed text: {err}"),
            },
            SurfaceEvent::TitleChanged(title) => {
                self.title = title;
                self.schedule_save();
            }
            SurfaceEvent::AuthorChanged(author) => {
                self.author = author;
                self.schedule_save();
            }
        }
        self.deliver_selection_change();
    }

    fn deliver_selection_change(&mut self) {
        if self.surface.take_selection_change() {
            self.tracker.on_selection_change(&self.surface);
        }
    }

    pub fn execute(&mut self, request: &FormattingRequest) -> ExecutionReport {
        self.deliver_selection_change();
        let report = self
            .executor
            .execute(request, &mut self.surface, &mut self.tracker);
        self.deliver_selection_change();
        if report.applied() {
            self.schedule_save();
        }
        report
    }

    /// Inserts an image (typically a data URI from the upload collaborator) at the
    /// remembered caret.
    pub fn insert_image(&mut self, src: impl Into<String>) -> ExecutionReport {
        self.execute(&FormattingRequest::with_value(
            FormattingKind::InsertImage,
            src,
        ))
    }

    pub fn undo(&mut self) -> bool {
        let changed = self.surface.undo();
        self.after_history_step(changed)
    }

    pub fn redo(&mut self) -> bool {
        let changed = self.surface.redo();
        self.after_history_step(changed)
    }

    fn after_history_step(&mut self, changed: bool) -> bool {
        if changed {
            self.schedule_save();
        }
        self.deliver_selection_change();
        changed
    }

    pub fn schedule_save(&mut self) {
        let now = self.clock.now();
        self.store.schedule_save(now);
    }

    /// Runs the debounced save if its quiet period is over. Returns whether a write happened.
    pub fn tick(&mut self) -> bool {
        let now = self.clock.now();
        if !self.store.take_due(now) {
            return false;
        }
        self.save_at(now)
    }

    pub fn save_now(&mut self) -> bool {
        self.store.cancel_pending();
        let now = self.clock.now();
        self.save_at(now)
    }

    fn save_at(&mut self, now: chrono::DateTime<chrono::Utc>) -> bool {
        let fields = self.snapshot();
        self.store.save(&fields, now, &mut self.indicator)
    }

    /// Current field values as a record.
    pub fn snapshot(&self) -> DocumentSnapshot {
        DocumentSnapshot {
            saved_at: self.indicator.saved_at(),
            ..DocumentSnapshot::new(
                self.title.clone(),
                self.author.clone(),
                self.content_markup(),
            )
        }
    }

    /// Replaces the session state with the stored draft, or an empty document when there is
    /// none.
    pub fn restore(&mut self) {
        let snapshot = self.store.restore(&mut self.indicator);
        self.title = snapshot.title;
        self.author = snapshot.author;
        self.surface.reset(content_document(&snapshot.content));
        self.images.clear();
        self.tracker.clear();
        self.deliver_selection_change();
    }

    /// Drops the stored draft and starts over with an empty document.
    pub fn clear(&mut self) {
        self.store.clear(&mut self.indicator);
        self.title.clear();
        self.author.clear();
        self.surface.reset(Document::empty());
        self.images.clear();
        self.tracker.clear();
        self.deliver_selection_change();
    }

    pub fn content_markup(&self) -> String {
        to_markup(self.surface.doc())
    }

    pub fn render_snapshot_html(&self) -> String {
        render_snapshot_html(&self.title, &self.author, &self.content_markup())
    }

    /// Ends the selection subscription and writes any save still waiting on its timer.
    pub fn teardown(&mut self) -> bool {
        self.tracker.stop();
        if self.store.cancel_pending() {
            let now = self.clock.now();
            return self.save_at(now);
        }
        false
    }
}

fn content_document(content: &str) -> Document {
    if content.trim().is_empty() {
        return Document::empty();
    }
    match parse_markup(content) {
        Ok(doc) => doc,
        Err(err) => {
            warn!("Stored content is not valid markup, starting empty: {err}");
            Document::empty()
        }
    }
}
