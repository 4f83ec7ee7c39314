//! Direct content-tree styling used when the host primitive cannot apply a command.

use thiserror::Error;
use tracing::debug;

use crate::core::{
    ApplyError, Document, ElementNode, MARKER_PLACEHOLDER, Node, Point, Selection,
    clamp_to_char_boundary, edge_text_point,
};
use crate::ops::{Op, Path, Transaction};
use crate::selection::SelectionRange;
use crate::style::StyleProps;
use crate::surface::Surface;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StyleError {
    #[error("invalid {property} value {value:?}")]
    InvalidValue {
        property: &'static str,
        value: String,
    },
    #[error("no style properties to apply")]
    EmptyStyle,
    #[error("selection is not inside a text block")]
    NotInTextBlock,
    #[error("selection covers no inline content")]
    EmptyRange,
    #[error("no selection to style")]
    NoSelection,
    #[error(transparent)]
    Apply(#[from] ApplyError),
}

/// Where the caret goes after an expanded selection has been wrapped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaretPlacement {
    /// Collapsed right after the last container.
    After,
    /// Spanning the wrapped content.
    Cover,
}

/// What the styler does for a command the primitive could not apply.
#[derive(Debug, Clone, PartialEq)]
pub enum FallbackPlan {
    Inline(StyleProps),
    Retag(String),
    Align(String),
    Insert(Node),
}

#[derive(Debug, Clone)]
pub struct FallbackStyler {
    container_tag: String,
}

impl Default for FallbackStyler {
    fn default() -> Self {
        Self {
            container_tag: "span".to_string(),
        }
    }
}

impl FallbackStyler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Styles `range` with `style`: a collapsed range gets a marker holding the caret, an
    /// expanded one is wrapped in a styled container with the caret collapsed after it.
    pub fn wrap(
        &self,
        surface: &mut Surface,
        range: &SelectionRange,
        style: &StyleProps,
    ) -> Result<(), StyleError> {
        if style.is_empty() {
            return Err(StyleError::EmptyStyle);
        }
        if !range.is_attached(surface.doc()) {
            return Err(StyleError::NoSelection);
        }

        let container = ElementNode::new(self.container_tag.as_str()).with_style(style.clone());
        let tx = if range.collapsed {
            insert_marker(surface.doc(), &range.anchor, &container)?
        } else {
            wrap_selection(
                surface.doc(),
                &range.selection(),
                &container,
                CaretPlacement::After,
            )?
        };
        debug!("Fallback wrap with {style} (collapsed: {})", range.collapsed);
        surface.apply(tx.source("fallback:wrap"))?;
        Ok(())
    }

    pub fn apply(
        &self,
        surface: &mut Surface,
        range: &SelectionRange,
        plan: &FallbackPlan,
    ) -> Result<(), StyleError> {
        match plan {
            FallbackPlan::Inline(style) => self.wrap(surface, range, style),
            FallbackPlan::Retag(tag) => {
                let tx = retag_blocks(surface.doc(), &range.selection(), tag)?;
                surface.apply(tx.source("fallback:retag"))?;
                Ok(())
            }
            FallbackPlan::Align(value) => {
                let tx = restyle_blocks(surface.doc(), &range.selection(), "text-align", value)?;
                surface.apply(tx.source("fallback:align"))?;
                Ok(())
            }
            FallbackPlan::Insert(node) => {
                let (_, end) = range.selection().ordered();
                let tx = insert_inline_node(surface.doc(), &end, node.clone())?;
                surface.apply(tx.source("fallback:insert"))?;
                Ok(())
            }
        }
    }
}

/// Splits inline `children` at inline offset `at`. Partially covered elements are cloned on
/// both sides; empty text pieces are dropped.
pub(crate) fn split_inline(children: Vec<Node>, at: usize) -> (Vec<Node>, Vec<Node>) {
    let mut left: Vec<Node> = Vec::new();
    let mut right: Vec<Node> = Vec::new();
    let mut remaining = Some(at);

    for node in children {
        let Some(rem) = remaining else {
            right.push(node);
            continue;
        };
        let len = node.inline_len();
        if len <= rem {
            left.push(node);
            remaining = Some(rem - len);
            continue;
        }

        match node {
            Node::Text(t) => {
                let ix = clamp_to_char_boundary(&t.text, rem);
                if ix > 0 {
                    left.push(Node::text(&t.text[..ix]));
                }
                if ix < t.text.len() {
                    right.push(Node::text(&t.text[ix..]));
                }
            }
            Node::Element(el) => {
                let shell = el.shell();
                let (l, r) = split_inline(el.children, rem);
                if !l.is_empty() {
                    left.push(Node::Element(shell.clone().with_children(l)));
                }
                if !r.is_empty() {
                    right.push(Node::Element(shell.with_children(r)));
                }
            }
            Node::Void(_) => right.push(node),
        }
        remaining = None;
    }

    (left, right)
}

/// Inline offset of the text position `(rel, offset)` inside `el`.
fn inline_offset(el: &ElementNode, rel: &[usize], offset: usize) -> Option<usize> {
    let (&ix, rest) = rel.split_first()?;
    let before: usize = el.children.get(..ix)?.iter().map(Node::inline_len).sum();
    match el.children.get(ix)? {
        Node::Text(t) if rest.is_empty() => Some(before + offset.min(t.text.len())),
        Node::Element(child) => Some(before + inline_offset(child, rest, offset)?),
        _ => None,
    }
}

fn child_path(parent: &[usize], ix: usize) -> Path {
    let mut path = parent.to_vec();
    path.push(ix);
    path
}

/// Ops replacing every child of the element at `path` with `children`.
fn rebuild_children(path: &[usize], old_len: usize, children: Vec<Node>, ops: &mut Vec<Op>) {
    for ix in (0..old_len).rev() {
        ops.push(Op::RemoveNode {
            path: child_path(path, ix),
        });
    }
    for (ix, node) in children.into_iter().enumerate() {
        ops.push(Op::InsertNode {
            path: child_path(path, ix),
            node,
        });
    }
}

/// Text blocks touched by `selection`, in document order.
pub(crate) fn blocks_in_selection(
    doc: &Document,
    selection: &Selection,
) -> Result<Vec<Path>, StyleError> {
    let (start, end) = selection.ordered();
    let start_block = doc
        .text_block_of(&start.path)
        .ok_or(StyleError::NotInTextBlock)?;
    let end_block = doc
        .text_block_of(&end.path)
        .ok_or(StyleError::NotInTextBlock)?;
    let blocks = doc.text_blocks();
    let first = blocks
        .iter()
        .position(|p| *p == start_block)
        .ok_or(StyleError::NotInTextBlock)?;
    let last = blocks
        .iter()
        .position(|p| *p == end_block)
        .ok_or(StyleError::NotInTextBlock)?;
    Ok(blocks[first..=last].to_vec())
}

/// Wraps the inline content covered by `selection` in copies of `container`, one per text
/// block, as a single transaction.
pub(crate) fn wrap_selection(
    doc: &Document,
    selection: &Selection,
    container: &ElementNode,
    placement: CaretPlacement,
) -> Result<Transaction, StyleError> {
    let (start, end) = selection.ordered();
    let blocks = blocks_in_selection(doc, selection)?;
    let (Some(first_block), Some(last_block)) = (blocks.first(), blocks.last()) else {
        return Err(StyleError::NotInTextBlock);
    };

    struct Rebuilt {
        block: Path,
        old_len: usize,
        children: Vec<Node>,
        container_ix: usize,
    }

    let mut rebuilt: Vec<Rebuilt> = Vec::new();
    for block_path in &blocks {
        let block = doc
            .element(block_path)
            .ok_or(StyleError::NotInTextBlock)?;
        let block_len: usize = block.children.iter().map(Node::inline_len).sum();
        let from = if block_path == first_block {
            inline_offset(block, &start.path[block_path.len()..], start.offset)
                .ok_or(StyleError::NotInTextBlock)?
        } else {
            0
        };
        let to = if block_path == last_block {
            inline_offset(block, &end.path[block_path.len()..], end.offset)
                .ok_or(StyleError::NotInTextBlock)?
        } else {
            block_len
        };
        if from >= to {
            continue;
        }

        let (before, rest) = split_inline(block.children.clone(), from);
        let (middle, after) = split_inline(rest, to - from);
        if middle.is_empty() {
            continue;
        }
        let container_ix = before.len();
        let mut children = before;
        children.push(Node::Element(container.shell().with_children(middle)));
        children.extend(after);
        rebuilt.push(Rebuilt {
            block: block_path.clone(),
            old_len: block.children.len(),
            children,
            container_ix,
        });
    }

    let Some(last) = rebuilt.last_mut() else {
        return Err(StyleError::EmptyRange);
    };
    if placement == CaretPlacement::After
        && !matches!(last.children.get(last.container_ix + 1), Some(Node::Text(_)))
    {
        last.children.insert(last.container_ix + 1, Node::text(""));
    }

    let selection_after = match placement {
        CaretPlacement::After => {
            let last = &rebuilt[rebuilt.len() - 1];
            Some(Selection::collapsed(Point::new(
                child_path(&last.block, last.container_ix + 1),
                0,
            )))
        }
        CaretPlacement::Cover => {
            let first = &rebuilt[0];
            let last = &rebuilt[rebuilt.len() - 1];
            let anchor = edge_text_point(
                &first.children[first.container_ix],
                child_path(&first.block, first.container_ix),
                false,
            );
            let focus = edge_text_point(
                &last.children[last.container_ix],
                child_path(&last.block, last.container_ix),
                true,
            );
            anchor.zip(focus).map(|(a, f)| Selection::new(a, f))
        }
    };

    let mut ops = Vec::new();
    for r in rebuilt {
        rebuild_children(&r.block, r.old_len, r.children, &mut ops);
    }
    let tx = Transaction::new(ops);
    Ok(match selection_after {
        Some(selection) => tx.selection_after(selection),
        None => tx,
    })
}

/// Ops placing `node` at `caret`, splitting the caret's Text node when needed. Returns the
/// ops and the path the node ends up at. With `need_following`, a Text node is guaranteed
/// right after the inserted node.
fn insert_at_caret(
    doc: &Document,
    caret: &Point,
    node: Node,
    need_following: bool,
) -> Result<(Vec<Op>, Path), StyleError> {
    let text = doc
        .text_node(&caret.path)
        .ok_or(StyleError::NotInTextBlock)?;
    let Some((&ix, parent)) = caret.path.split_last() else {
        return Err(StyleError::NotInTextBlock);
    };
    let offset = clamp_to_char_boundary(&text.text, caret.offset);
    let len = text.text.len();
    let mut ops = Vec::new();

    if offset == 0 && len > 0 {
        ops.push(Op::InsertNode {
            path: child_path(parent, ix),
            node,
        });
        return Ok((ops, child_path(parent, ix)));
    }

    if offset < len {
        ops.push(Op::RemoveText {
            path: caret.path.clone(),
            range: offset..len,
        });
        ops.push(Op::InsertNode {
            path: child_path(parent, ix + 1),
            node: Node::text(&text.text[offset..]),
        });
    } else if need_following {
        ops.push(Op::InsertNode {
            path: child_path(parent, ix + 1),
            node: Node::text(""),
        });
    }
    ops.push(Op::InsertNode {
        path: child_path(parent, ix + 1),
        node,
    });
    Ok((ops, child_path(parent, ix + 1)))
}

/// Inserts a marker built from `container` at `caret` and puts the caret inside it. A caret
/// already sitting in a marker placeholder gets the new marker nested in the old one.
pub(crate) fn insert_marker(
    doc: &Document,
    caret: &Point,
    container: &ElementNode,
) -> Result<Transaction, StyleError> {
    let marker = Node::Element(
        container
            .shell()
            .with_children(vec![Node::text(MARKER_PLACEHOLDER)]),
    );
    let text = doc
        .text_node(&caret.path)
        .ok_or(StyleError::NotInTextBlock)?;

    let (ops, marker_path) = if text.is_marker_placeholder() {
        (
            vec![
                Op::RemoveNode {
                    path: caret.path.clone(),
                },
                Op::InsertNode {
                    path: caret.path.clone(),
                    node: marker,
                },
            ],
            caret.path.clone(),
        )
    } else {
        insert_at_caret(doc, caret, marker, false)?
    };

    let caret_after = Point::new(child_path(&marker_path, 0), MARKER_PLACEHOLDER.len());
    Ok(Transaction::new(ops).selection_after(Selection::collapsed(caret_after)))
}

/// Inserts an inline node (an image) at `caret`, leaving the caret right after it.
pub(crate) fn insert_inline_node(
    doc: &Document,
    caret: &Point,
    node: Node,
) -> Result<Transaction, StyleError> {
    let (ops, path) = insert_at_caret(doc, caret, node, true)?;
    let Some((&ix, parent)) = path.split_last() else {
        return Err(StyleError::NotInTextBlock);
    };
    let caret_after = Point::new(child_path(parent, ix + 1), 0);
    Ok(Transaction::new(ops).selection_after(Selection::collapsed(caret_after)))
}

/// Changes the tag of every text block touched by `selection`.
pub(crate) fn retag_blocks(
    doc: &Document,
    selection: &Selection,
    tag: &str,
) -> Result<Transaction, StyleError> {
    let mut ops = Vec::new();
    for path in blocks_in_selection(doc, selection)? {
        let el = doc.element(&path).ok_or(StyleError::NotInTextBlock)?;
        ops.push(Op::SetElement {
            path,
            tag: tag.to_string(),
            attrs: el.attrs.clone(),
            style: el.style.clone(),
        });
    }
    Ok(Transaction::new(ops).selection_after(selection.clone()))
}

/// Sets one style property on every text block touched by `selection`.
pub(crate) fn restyle_blocks(
    doc: &Document,
    selection: &Selection,
    property: &str,
    value: &str,
) -> Result<Transaction, StyleError> {
    let mut ops = Vec::new();
    for path in blocks_in_selection(doc, selection)? {
        let el = doc.element(&path).ok_or(StyleError::NotInTextBlock)?;
        ops.push(Op::SetElement {
            path,
            tag: el.tag.clone(),
            attrs: el.attrs.clone(),
            style: el.style.clone().with(property, value),
        });
    }
    Ok(Transaction::new(ops).selection_after(selection.clone()))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn split_inline_clones_partially_covered_elements() {
        let children = vec![
            Node::text("ab"),
            Node::element("b", vec![Node::text("cdef")]),
            Node::text("g"),
        ];
        let (left, right) = split_inline(children, 4);
        assert_eq!(
            left,
            vec![Node::text("ab"), Node::element("b", vec![Node::text("cd")])]
        );
        assert_eq!(
            right,
            vec![Node::element("b", vec![Node::text("ef")]), Node::text("g")]
        );
    }

    #[test]
    fn split_inline_at_edges() {
        let children = vec![Node::text("abc")];
        assert_eq!(
            split_inline(children.clone(), 0),
            (Vec::new(), vec![Node::text("abc")])
        );
        assert_eq!(split_inline(children, 3), (vec![Node::text("abc")], Vec::new()));
    }

    #[test]
    fn split_inline_respects_char_boundaries() {
        let (left, right) = split_inline(vec![Node::text("é!")], 1);
        assert_eq!(left, Vec::<Node>::new());
        assert_eq!(right, vec![Node::text("é!")]);
    }
}
