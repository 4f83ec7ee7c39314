use tracing::{debug, trace};

use crate::core::{Document, Point, Selection};
use crate::surface::{LiveSelection, Surface};

/// A selection captured against one generation of the document.
///
/// The range stays attached while that generation is live and both points still resolve to
/// text positions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionRange {
    pub anchor: Point,
    pub focus: Point,
    pub collapsed: bool,
    generation: u64,
}

impl SelectionRange {
    pub fn capture(doc: &Document, selection: &Selection) -> Self {
        Self {
            anchor: selection.anchor.clone(),
            focus: selection.focus.clone(),
            collapsed: selection.is_collapsed(),
            generation: doc.generation(),
        }
    }

    pub fn selection(&self) -> Selection {
        Selection::new(self.anchor.clone(), self.focus.clone())
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_attached(&self, doc: &Document) -> bool {
        self.generation == doc.generation()
            && doc.contains_point(&self.anchor)
            && doc.contains_point(&self.focus)
    }
}

/// Remembers the last selection that lay inside the editable surface, so it survives focus
/// moving to toolbar controls.
#[derive(Debug, Default)]
pub struct SelectionTracker {
    last_good: Option<SelectionRange>,
    listening: bool,
}

impl SelectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts reacting to selection-change notifications.
    pub fn start(&mut self) {
        self.listening = true;
    }

    pub fn stop(&mut self) {
        self.listening = false;
    }

    pub fn is_listening(&self) -> bool {
        self.listening
    }

    pub fn clear(&mut self) {
        self.last_good = None;
    }

    pub fn last_good_selection(&self) -> Option<&SelectionRange> {
        self.last_good.as_ref()
    }

    /// Records the live selection when it lies entirely inside the editor. Selections that
    /// straddle the boundary or sit in another control leave the stored range untouched.
    pub fn on_selection_change(&mut self, surface: &Surface) {
        if !self.listening {
            return;
        }
        let live = match surface.live_selection() {
            Ok(live) => live,
            Err(err) => {
                debug!("Ignoring selection change: {err}");
                return;
            }
        };
        let Some(selection) = live.within_editor() else {
            trace!("Selection left the editor; keeping last good range");
            return;
        };
        if !(surface.doc().contains_point(&selection.anchor)
            && surface.doc().contains_point(&selection.focus))
        {
            debug!("Ignoring selection with unresolved points");
            return;
        }
        self.last_good = Some(SelectionRange::capture(surface.doc(), &selection));
    }

    /// Makes the stored range the live selection. A range that no longer belongs to the
    /// document is dropped and the live selection is left alone.
    pub fn restore(&mut self, surface: &mut Surface) -> bool {
        let Some(range) = self.last_good.as_ref() else {
            return false;
        };
        if !range.is_attached(surface.doc()) {
            debug!("Discarding detached selection range");
            self.last_good = None;
            return false;
        }
        surface.set_live_selection(Some(LiveSelection::editor(range.selection())));
        true
    }
}
