use thiserror::Error;
use tracing::{debug, warn};

use crate::config::EditorConfig;
use crate::core::{
    ApplyError, Document, NormalizePass, Point, Selection, apply_op_to, default_normalize_passes,
};
use crate::ops::{Op, Path, Transaction};

/// One end of the platform selection: inside the editable surface, or inside some other
/// control such as a toolbar input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Boundary {
    Editor(Point),
    Control { id: String, offset: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveSelection {
    pub anchor: Boundary,
    pub focus: Boundary,
}

impl LiveSelection {
    pub fn editor(selection: Selection) -> Self {
        Self {
            anchor: Boundary::Editor(selection.anchor),
            focus: Boundary::Editor(selection.focus),
        }
    }

    pub fn caret(point: Point) -> Self {
        Self::editor(Selection::collapsed(point))
    }

    pub fn control(id: impl Into<String>, start: usize, end: usize) -> Self {
        let id = id.into();
        Self {
            anchor: Boundary::Control {
                id: id.clone(),
                offset: start,
            },
            focus: Boundary::Control { id, offset: end },
        }
    }

    /// The selection as editor points, when both ends lie inside the editable surface.
    pub fn within_editor(&self) -> Option<Selection> {
        match (&self.anchor, &self.focus) {
            (Boundary::Editor(anchor), Boundary::Editor(focus)) => {
                Some(Selection::new(anchor.clone(), focus.clone()))
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Focus {
    #[default]
    None,
    Editor,
    Control(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClickTarget {
    /// A node inside the editable surface.
    Node(Path),
    Outside,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("no active selection")]
pub struct SelectionUnavailable;

#[derive(Debug, Clone)]
pub struct UndoRecord {
    pub inverse_ops: Vec<Op>,
    pub selection_before: Option<Selection>,
    pub selection_after: Option<Selection>,
}

#[derive(Debug, Default)]
struct History {
    undo: Vec<UndoRecord>,
    redo: Vec<UndoRecord>,
    max: usize,
}

impl History {
    fn record(&mut self, record: UndoRecord) {
        self.undo.push(record);
        self.redo.clear();
        if self.undo.len() > self.max {
            self.undo.remove(0);
        }
    }

    fn clear(&mut self) {
        self.undo.clear();
        self.redo.clear();
    }
}

/// The host editable surface: content tree, live selection, input focus and edit history.
///
/// Selection changes are queued as a pending `selectionchange` notification; whoever drives
/// the event loop drains it with [`Surface::take_selection_change`].
pub struct Surface {
    doc: Document,
    live: Option<LiveSelection>,
    focus: Focus,
    history: History,
    normalize_passes: Vec<Box<dyn NormalizePass>>,
    max_normalize_iterations: usize,
    selection_changed: bool,
    revision: u64,
}

impl Surface {
    pub fn new(doc: Document, config: &EditorConfig) -> Self {
        let mut surface = Self {
            doc,
            live: None,
            focus: Focus::None,
            history: History {
                max: config.max_undo,
                ..History::default()
            },
            normalize_passes: default_normalize_passes(),
            max_normalize_iterations: config.max_normalize_iterations,
            selection_changed: false,
            revision: 0,
        };
        surface.normalize_untracked();
        surface
    }

    pub fn doc(&self) -> &Document {
        &self.doc
    }

    /// Bumped by every content mutation.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn live_selection(&self) -> Result<&LiveSelection, SelectionUnavailable> {
        self.live.as_ref().ok_or(SelectionUnavailable)
    }

    pub fn editor_selection(&self) -> Option<Selection> {
        self.live.as_ref().and_then(LiveSelection::within_editor)
    }

    pub fn set_live_selection(&mut self, live: Option<LiveSelection>) {
        self.live = live;
        self.selection_changed = true;
    }

    pub fn take_selection_change(&mut self) -> bool {
        std::mem::take(&mut self.selection_changed)
    }

    pub fn focus(&self) -> &Focus {
        &self.focus
    }

    pub fn set_focus(&mut self, focus: Focus) {
        self.focus = focus;
    }

    pub fn has_focus(&self) -> bool {
        self.focus == Focus::Editor
    }

    /// Gives the surface input focus, keeping an editor selection if there is one and
    /// otherwise placing the caret at the start of the content.
    pub fn focus_editor(&mut self) {
        self.focus = Focus::Editor;
        self.ensure_caret();
    }

    /// Makes sure the live selection is a valid editor range or caret.
    pub fn ensure_caret(&mut self) {
        let current = self.editor_selection();
        if current.as_ref().is_some_and(|s| {
            self.doc.contains_point(&s.anchor) && self.doc.contains_point(&s.focus)
        }) {
            return;
        }
        let repaired = current
            .and_then(|s| self.doc.normalize_selection(&s))
            .or_else(|| self.doc.first_text_point().map(Selection::collapsed));
        if let Some(selection) = repaired {
            self.set_live_selection(Some(LiveSelection::editor(selection)));
        }
    }

    /// Applies `tx` as one step: either every op lands or the document is left untouched.
    pub fn apply(&mut self, tx: Transaction) -> Result<(), ApplyError> {
        let source = tx.meta.source.unwrap_or_else(|| "unknown".to_string());
        let selection_before = self.editor_selection();
        let mut selection = selection_before.clone();
        let mut inverse_ops: Vec<Op> = Vec::new();

        for op in tx.ops {
            match apply_op_to(&mut self.doc, selection.as_mut(), op) {
                Ok(inverse) => inverse_ops.push(inverse),
                Err(err) => {
                    warn!("Rolling back transaction {source}: {err}");
                    self.rollback(inverse_ops);
                    return Err(err);
                }
            }
        }

        if let Some(after) = tx.selection_after {
            selection = Some(after);
        }

        if let Err(err) = normalize_doc(
            &mut self.doc,
            &self.normalize_passes,
            self.max_normalize_iterations,
            selection.as_mut(),
            &mut inverse_ops,
        ) {
            warn!("Rolling back transaction {source}: {err}");
            self.rollback(inverse_ops);
            return Err(err);
        }
        inverse_ops.reverse();

        let selection_after = selection.and_then(|s| self.doc.normalize_selection(&s));
        if selection_after != selection_before {
            if let Some(selection) = selection_after.clone() {
                self.set_live_selection(Some(LiveSelection::editor(selection)));
            }
        }

        debug!(
            "Applied transaction {source} ({} inverse ops)",
            inverse_ops.len()
        );
        if !inverse_ops.is_empty() {
            self.history.record(UndoRecord {
                inverse_ops,
                selection_before,
                selection_after,
            });
            self.revision += 1;
        }
        Ok(())
    }

    fn rollback(&mut self, applied_inverses: Vec<Op>) {
        for op in applied_inverses.into_iter().rev() {
            if let Err(err) = apply_op_to(&mut self.doc, None, op) {
                warn!("Inverse op failed during rollback: {err}");
            }
        }
    }

    fn normalize_untracked(&mut self) {
        let mut discarded = Vec::new();
        if let Err(err) = normalize_doc(
            &mut self.doc,
            &self.normalize_passes,
            self.max_normalize_iterations,
            None,
            &mut discarded,
        ) {
            warn!("Document normalization failed: {err}");
        }
    }

    /// Types `text` at the caret. An expanded selection collapses to its start first; typing
    /// into a style marker replaces its placeholder. Returns whether anything was inserted.
    pub fn insert_text(&mut self, text: &str) -> Result<bool, ApplyError> {
        if text.is_empty() {
            return Ok(false);
        }
        let Some(selection) = self.editor_selection() else {
            return Ok(false);
        };
        let (caret, _) = selection.ordered();
        let Some(node) = self.doc.text_node(&caret.path) else {
            return Ok(false);
        };

        let (ops, offset) = if node.is_marker_placeholder() {
            (
                vec![
                    Op::RemoveText {
                        path: caret.path.clone(),
                        range: 0..node.text.len(),
                    },
                    Op::InsertText {
                        path: caret.path.clone(),
                        offset: 0,
                        text: text.to_string(),
                    },
                ],
                text.len(),
            )
        } else {
            (
                vec![Op::InsertText {
                    path: caret.path.clone(),
                    offset: caret.offset,
                    text: text.to_string(),
                }],
                caret.offset + text.len(),
            )
        };

        let caret_after = Selection::collapsed(Point::new(caret.path, offset));
        self.apply(
            Transaction::new(ops)
                .selection_after(caret_after)
                .source("surface:input"),
        )?;
        Ok(true)
    }

    /// Replaces the whole document. History is dropped and ranges captured earlier detach.
    pub fn reset(&mut self, content: Document) {
        self.doc.reset(content);
        self.normalize_untracked();
        self.history.clear();
        self.revision += 1;
        let caret = if self.has_focus() {
            self.doc.first_text_point().map(LiveSelection::caret)
        } else {
            None
        };
        self.set_live_selection(caret);
    }

    pub fn can_undo(&self) -> bool {
        !self.history.undo.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.history.redo.is_empty()
    }

    pub fn undo(&mut self) -> bool {
        let Some(record) = self.history.undo.pop() else {
            return false;
        };
        let UndoRecord {
            inverse_ops,
            selection_before,
            selection_after,
        } = record;

        let redo_ops = self.replay(inverse_ops);
        self.restore_selection(selection_before.as_ref());
        self.history.redo.push(UndoRecord {
            inverse_ops: redo_ops,
            selection_before,
            selection_after,
        });
        true
    }

    pub fn redo(&mut self) -> bool {
        let Some(record) = self.history.redo.pop() else {
            return false;
        };
        let UndoRecord {
            inverse_ops,
            selection_before,
            selection_after,
        } = record;

        let undo_ops = self.replay(inverse_ops);
        self.restore_selection(selection_after.as_ref());
        self.history.undo.push(UndoRecord {
            inverse_ops: undo_ops,
            selection_before,
            selection_after,
        });
        true
    }

    fn replay(&mut self, ops: Vec<Op>) -> Vec<Op> {
        let mut inverses: Vec<Op> = Vec::new();
        for op in ops {
            match apply_op_to(&mut self.doc, None, op) {
                Ok(inverse) => inverses.push(inverse),
                Err(err) => {
                    // Stop mutating once the history no longer matches the tree.
                    warn!("History replay stopped: {err}");
                    break;
                }
            }
        }
        inverses.reverse();
        self.revision += 1;
        inverses
    }

    fn restore_selection(&mut self, selection: Option<&Selection>) {
        let restored = selection.and_then(|s| self.doc.normalize_selection(s));
        match restored {
            Some(selection) => self.set_live_selection(Some(LiveSelection::editor(selection))),
            None => self.ensure_caret(),
        }
    }
}

fn normalize_doc(
    doc: &mut Document,
    passes: &[Box<dyn NormalizePass>],
    max_iterations: usize,
    mut selection: Option<&mut Selection>,
    inverse_ops: &mut Vec<Op>,
) -> Result<(), ApplyError> {
    for _ in 0..max_iterations {
        let mut pending: Vec<Op> = Vec::new();
        for pass in passes {
            let ops = pass.run(doc);
            if !ops.is_empty() {
                debug!("Normalize pass {} produced {} ops", pass.id(), ops.len());
            }
            pending.extend(ops);
        }
        if pending.is_empty() {
            return Ok(());
        }
        for op in pending {
            inverse_ops.push(apply_op_to(doc, selection.as_deref_mut(), op)?);
        }
    }
    Err(ApplyError::NormalizeDidNotConverge(max_iterations))
}
