use std::collections::BTreeMap;
use std::fmt;

use thiserror::Error;

use crate::ops::{Op, Path};
use crate::style::StyleProps;

pub type Attrs = BTreeMap<String, String>;

/// Zero-width placeholder held by a style marker so a caret can sit inside it.
pub const MARKER_PLACEHOLDER: &str = "\u{200B}";

/// Tags `formatBlock` may turn a text block into.
pub const BLOCK_FORMAT_TAGS: &[&str] = &[
    "address",
    "blockquote",
    "div",
    "h1",
    "h2",
    "h3",
    "h4",
    "h5",
    "h6",
    "p",
    "pre",
];

const INLINE_TAGS: &[&str] = &[
    "a", "b", "code", "em", "font", "i", "mark", "s", "small", "span", "strike", "strong", "sub",
    "sup", "u",
];

const VOID_TAGS: &[&str] = &["br", "hr", "img"];

pub fn is_inline_tag(tag: &str) -> bool {
    INLINE_TAGS.contains(&tag)
}

pub fn is_void_tag(tag: &str) -> bool {
    VOID_TAGS.contains(&tag)
}

/// Identity of a void node, stable for as long as the node stays in its document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct NodeId(pub u64);

impl NodeId {
    pub const UNASSIGNED: NodeId = NodeId(0);
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The content tree behind the editable surface.
///
/// `generation` changes whenever the whole content is replaced, which is how ranges captured
/// against an earlier tree are recognised as detached.
#[derive(Debug, Clone, Default)]
pub struct Document {
    pub children: Vec<Node>,
    generation: u64,
    next_id: u64,
}

impl PartialEq for Document {
    fn eq(&self, other: &Self) -> bool {
        self.children == other.children
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Element(ElementNode),
    Text(TextNode),
    Void(VoidNode),
}

impl Node {
    pub fn text(text: impl Into<String>) -> Self {
        Node::Text(TextNode { text: text.into() })
    }

    pub fn element(tag: impl Into<String>, children: Vec<Node>) -> Self {
        Node::Element(ElementNode::new(tag).with_children(children))
    }

    pub fn paragraph(text: impl Into<String>) -> Self {
        Node::element("p", vec![Node::text(text)])
    }

    pub fn image(src: impl Into<String>, alt: Option<String>) -> Self {
        let mut attrs = Attrs::new();
        attrs.insert("src".to_string(), src.into());
        if let Some(alt) = alt {
            attrs.insert("alt".to_string(), alt);
        }
        Node::Void(VoidNode {
            id: NodeId::UNASSIGNED,
            tag: "img".to_string(),
            attrs,
        })
    }

    /// Length of the node in inline offsets: text bytes, one per void, the sum for elements.
    pub fn inline_len(&self) -> usize {
        match self {
            Node::Text(t) => t.text.len(),
            Node::Void(_) => 1,
            Node::Element(el) => el.children.iter().map(Node::inline_len).sum(),
        }
    }

    pub fn is_block(&self) -> bool {
        match self {
            Node::Element(el) => !el.is_inline(),
            Node::Void(v) => v.tag == "hr",
            Node::Text(_) => false,
        }
    }

    fn has_text_leaf(&self) -> bool {
        match self {
            Node::Text(_) => true,
            Node::Element(el) => el.children.iter().any(Node::has_text_leaf),
            Node::Void(_) => false,
        }
    }

    fn collect_text(&self, out: &mut String) {
        match self {
            Node::Text(t) => out.push_str(&t.text.replace(MARKER_PLACEHOLDER, "")),
            Node::Element(el) => el.children.iter().for_each(|c| c.collect_text(out)),
            Node::Void(_) => {}
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ElementNode {
    pub tag: String,
    pub attrs: Attrs,
    pub style: StyleProps,
    pub children: Vec<Node>,
}

impl ElementNode {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            attrs: Attrs::new(),
            style: StyleProps::new(),
            children: Vec::new(),
        }
    }

    pub fn with_style(mut self, style: StyleProps) -> Self {
        self.style = style;
        self
    }

    pub fn with_attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attrs.insert(name.into(), value.into());
        self
    }

    pub fn with_children(mut self, children: Vec<Node>) -> Self {
        self.children = children;
        self
    }

    /// A copy of the element without its children.
    pub fn shell(&self) -> Self {
        Self {
            tag: self.tag.clone(),
            attrs: self.attrs.clone(),
            style: self.style.clone(),
            children: Vec::new(),
        }
    }

    pub fn is_inline(&self) -> bool {
        is_inline_tag(&self.tag)
    }

    /// A block element whose children are all inline content.
    pub fn is_text_block(&self) -> bool {
        !self.is_inline() && !self.children.iter().any(Node::is_block)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextNode {
    pub text: String,
}

impl TextNode {
    pub fn is_marker_placeholder(&self) -> bool {
        self.text == MARKER_PLACEHOLDER
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VoidNode {
    pub id: NodeId,
    pub tag: String,
    pub attrs: Attrs,
}

impl VoidNode {
    pub fn is_image(&self) -> bool {
        self.tag == "img"
    }
}

/// A byte offset inside the Text node at `path`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Point {
    pub path: Path,
    pub offset: usize,
}

impl Point {
    pub fn new(path: Path, offset: usize) -> Self {
        Self { path, offset }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Selection {
    pub anchor: Point,
    pub focus: Point,
}

impl Selection {
    pub fn new(anchor: Point, focus: Point) -> Self {
        Self { anchor, focus }
    }

    pub fn collapsed(point: Point) -> Self {
        Self {
            anchor: point.clone(),
            focus: point,
        }
    }

    pub fn is_collapsed(&self) -> bool {
        self.anchor == self.focus
    }

    /// `(start, end)` in document order.
    pub fn ordered(&self) -> (Point, Point) {
        if self.focus < self.anchor {
            (self.focus.clone(), self.anchor.clone())
        } else {
            (self.anchor.clone(), self.focus.clone())
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    #[error("empty path")]
    Empty,
    #[error("path out of bounds at depth {depth}: {index} >= {len}")]
    OutOfBounds {
        depth: usize,
        index: usize,
        len: usize,
    },
    #[error("non-container node at depth {depth}")]
    NotContainer { depth: usize },
    #[error("expected {expected} node at {path:?}")]
    UnexpectedNode { expected: &'static str, path: Path },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApplyError {
    #[error("invalid path: {0}")]
    InvalidPath(#[from] PathError),
    #[error("normalization did not converge after {0} passes")]
    NormalizeDidNotConverge(usize),
}

impl Document {
    pub fn new(children: Vec<Node>) -> Self {
        let mut doc = Self::default();
        doc.replace_children(children);
        doc
    }

    /// A single empty paragraph.
    pub fn empty() -> Self {
        Self::new(vec![Node::paragraph("")])
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Replaces the whole content. Ranges captured before the reset no longer resolve.
    pub fn reset(&mut self, content: Document) {
        self.generation += 1;
        self.replace_children(content.children);
    }

    fn replace_children(&mut self, mut children: Vec<Node>) {
        for node in &mut children {
            self.adopt(node);
        }
        self.children = children;
    }

    /// Gives every unassigned void node in `node` a fresh id.
    pub(crate) fn adopt(&mut self, node: &mut Node) {
        match node {
            Node::Void(v) if v.id == NodeId::UNASSIGNED => {
                self.next_id += 1;
                v.id = NodeId(self.next_id);
            }
            Node::Void(v) => self.next_id = self.next_id.max(v.id.0),
            Node::Element(el) => {
                for child in &mut el.children {
                    self.adopt(child);
                }
            }
            Node::Text(_) => {}
        }
    }

    pub fn node(&self, path: &[usize]) -> Option<&Node> {
        let (first, rest) = path.split_first()?;
        let mut node = self.children.get(*first)?;
        for &ix in rest {
            node = match node {
                Node::Element(el) => el.children.get(ix)?,
                Node::Void(_) | Node::Text(_) => return None,
            };
        }
        Some(node)
    }

    pub fn element(&self, path: &[usize]) -> Option<&ElementNode> {
        match self.node(path)? {
            Node::Element(el) => Some(el),
            _ => None,
        }
    }

    pub fn text_node(&self, path: &[usize]) -> Option<&TextNode> {
        match self.node(path)? {
            Node::Text(t) => Some(t),
            _ => None,
        }
    }

    /// Whether `point` addresses a char boundary inside an attached Text node.
    pub fn contains_point(&self, point: &Point) -> bool {
        self.text_node(&point.path)
            .is_some_and(|t| point.offset <= t.text.len() && t.text.is_char_boundary(point.offset))
    }

    pub fn first_text_point(&self) -> Option<Point> {
        let mut path = Vec::new();
        first_text_descendant(&self.children, &mut path)
    }

    /// Paths of every text block, in document order.
    pub fn text_blocks(&self) -> Vec<Path> {
        fn walk(children: &[Node], path: &mut Path, out: &mut Vec<Path>) {
            for (ix, node) in children.iter().enumerate() {
                let Node::Element(el) = node else {
                    continue;
                };
                path.push(ix);
                if el.is_text_block() {
                    out.push(path.clone());
                } else if !el.is_inline() {
                    walk(&el.children, path, out);
                }
                path.pop();
            }
        }

        let mut out = Vec::new();
        walk(&self.children, &mut Vec::new(), &mut out);
        out
    }

    /// The nearest text block containing `path`.
    pub fn text_block_of(&self, path: &[usize]) -> Option<Path> {
        (1..path.len())
            .rev()
            .map(|len| &path[..len])
            .find(|prefix| self.element(prefix).is_some_and(ElementNode::is_text_block))
            .map(<[usize]>::to_vec)
    }

    pub fn find_void(&self, id: NodeId) -> Option<Path> {
        fn walk(children: &[Node], id: NodeId, path: &mut Path) -> Option<Path> {
            for (ix, node) in children.iter().enumerate() {
                path.push(ix);
                let found = match node {
                    Node::Void(v) if v.id == id => Some(path.clone()),
                    Node::Element(el) => walk(&el.children, id, path),
                    _ => None,
                };
                path.pop();
                if found.is_some() {
                    return found;
                }
            }
            None
        }

        walk(&self.children, id, &mut Vec::new())
    }

    /// Inline style inherited by the node at `path`, innermost declarations winning.
    pub fn computed_style(&self, path: &[usize]) -> StyleProps {
        let mut style = StyleProps::new();
        for len in 1..=path.len() {
            if let Some(el) = self.element(&path[..len]) {
                style.merge(&el.style);
            }
        }
        style
    }

    /// Text content with one line per text block; marker placeholders are dropped.
    pub fn plain_text(&self) -> String {
        self.text_blocks()
            .iter()
            .filter_map(|path| self.node(path))
            .map(|node| {
                let mut out = String::new();
                node.collect_text(&mut out);
                out
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Maps `point` onto the closest existing Text node position.
    pub fn normalize_point(&self, point: &Point) -> Option<Point> {
        if point.path.is_empty() || self.children.is_empty() {
            return None;
        }

        let mut resolved: Path = Vec::new();
        let mut children: &[Node] = &self.children;

        for &wanted in &point.path {
            if children.is_empty() {
                break;
            }
            let ix = wanted.min(children.len() - 1);
            resolved.push(ix);
            match &children[ix] {
                Node::Text(t) => {
                    let offset = clamp_to_char_boundary(&t.text, point.offset);
                    return Some(Point::new(resolved, offset));
                }
                Node::Element(el) => children = &el.children,
                Node::Void(_) => break,
            }
        }

        match self.node(&resolved)? {
            Node::Element(el) => first_text_descendant(&el.children, &mut resolved),
            Node::Text(t) => {
                let offset = clamp_to_char_boundary(&t.text, point.offset);
                Some(Point::new(resolved, offset))
            }
            Node::Void(_) => {
                resolved.pop();
                let parent = self.element(&resolved)?;
                first_text_descendant(&parent.children, &mut resolved)
            }
        }
    }

    pub fn normalize_selection(&self, selection: &Selection) -> Option<Selection> {
        let anchor = self
            .normalize_point(&selection.anchor)
            .or_else(|| self.normalize_point(&selection.focus))
            .or_else(|| self.first_text_point())?;
        let focus = self
            .normalize_point(&selection.focus)
            .unwrap_or_else(|| anchor.clone());
        Some(Selection { anchor, focus })
    }
}

fn first_text_descendant(children: &[Node], path: &mut Path) -> Option<Point> {
    for (ix, node) in children.iter().enumerate() {
        path.push(ix);
        let found = match node {
            Node::Text(_) => Some(Point::new(path.clone(), 0)),
            Node::Element(el) => first_text_descendant(&el.children, path),
            Node::Void(_) => None,
        };
        path.pop();
        if found.is_some() {
            return found;
        }
    }
    None
}

/// First (or last) caret position inside `node`, which lives at `base`.
pub(crate) fn edge_text_point(node: &Node, base: Path, last: bool) -> Option<Point> {
    match node {
        Node::Text(t) => Some(Point::new(base, if last { t.text.len() } else { 0 })),
        Node::Void(_) => None,
        Node::Element(el) => {
            let mut indices: Vec<usize> = (0..el.children.len()).collect();
            if last {
                indices.reverse();
            }
            indices.into_iter().find_map(|ix| {
                let mut path = base.clone();
                path.push(ix);
                edge_text_point(&el.children[ix], path, last)
            })
        }
    }
}

pub(crate) fn clamp_to_char_boundary(s: &str, mut ix: usize) -> usize {
    ix = ix.min(s.len());
    while ix > 0 && !s.is_char_boundary(ix) {
        ix -= 1;
    }
    ix
}

pub(crate) fn apply_op_to(
    doc: &mut Document,
    selection: Option<&mut Selection>,
    op: Op,
) -> Result<Op, ApplyError> {
    match op {
        Op::InsertText { path, offset, text } => {
            let text_node = text_mut(doc, &path)?;
            let offset = clamp_to_char_boundary(&text_node.text, offset);
            text_node.text.insert_str(offset, &text);
            if let Some(selection) = selection {
                transform_selection_insert_text(selection, &path, offset, text.len());
            }
            Ok(Op::RemoveText {
                path,
                range: offset..offset + text.len(),
            })
        }
        Op::RemoveText { path, range } => {
            let text_node = text_mut(doc, &path)?;
            let start = clamp_to_char_boundary(&text_node.text, range.start);
            let end = clamp_to_char_boundary(&text_node.text, range.end);
            if start >= end {
                return Ok(Op::InsertText {
                    path,
                    offset: start,
                    text: String::new(),
                });
            }
            let removed = text_node.text[start..end].to_string();
            text_node.text.replace_range(start..end, "");
            if let Some(selection) = selection {
                transform_selection_remove_text(selection, &path, start..end);
            }
            Ok(Op::InsertText {
                path,
                offset: start,
                text: removed,
            })
        }
        Op::InsertNode { path, mut node } => {
            doc.adopt(&mut node);
            insert_node(doc, &path, node)?;
            if let Some(selection) = selection {
                transform_selection_insert_node(selection, &path);
            }
            Ok(Op::RemoveNode { path })
        }
        Op::RemoveNode { path } => {
            let removed = remove_node(doc, &path)?;
            if let Some(selection) = selection {
                transform_selection_remove_node(selection, &path);
            }
            Ok(Op::InsertNode {
                path,
                node: removed,
            })
        }
        Op::SetElement {
            path,
            tag,
            attrs,
            style,
        } => {
            let Node::Element(el) = node_mut(&mut doc.children, &path, 0)? else {
                return Err(PathError::UnexpectedNode {
                    expected: "element",
                    path,
                }
                .into());
            };
            let old_tag = std::mem::replace(&mut el.tag, tag);
            let old_attrs = std::mem::replace(&mut el.attrs, attrs);
            let old_style = std::mem::replace(&mut el.style, style);
            Ok(Op::SetElement {
                path,
                tag: old_tag,
                attrs: old_attrs,
                style: old_style,
            })
        }
    }
}

fn transform_selection_insert_text(
    selection: &mut Selection,
    path: &[usize],
    offset: usize,
    len: usize,
) {
    for point in [&mut selection.anchor, &mut selection.focus] {
        if point.path == path && point.offset >= offset {
            point.offset = point.offset.saturating_add(len);
        }
    }
}

fn transform_selection_remove_text(
    selection: &mut Selection,
    path: &[usize],
    range: std::ops::Range<usize>,
) {
    let removed_len = range.end.saturating_sub(range.start);
    for point in [&mut selection.anchor, &mut selection.focus] {
        if point.path != path || point.offset <= range.start {
            continue;
        }
        if point.offset >= range.end {
            point.offset = point.offset.saturating_sub(removed_len);
        } else {
            point.offset = range.start;
        }
    }
}

fn transform_selection_insert_node(selection: &mut Selection, path: &[usize]) {
    let Some((index, parent_path)) = path.split_last() else {
        return;
    };
    let depth = parent_path.len();

    for point in [&mut selection.anchor, &mut selection.focus] {
        if point.path.len() <= depth || !point.path.starts_with(parent_path) {
            continue;
        }
        if point.path[depth] >= *index {
            point.path[depth] += 1;
        }
    }
}

fn transform_selection_remove_node(selection: &mut Selection, path: &[usize]) {
    let Some((&index, parent_path)) = path.split_last() else {
        return;
    };
    let depth = parent_path.len();

    for point in [&mut selection.anchor, &mut selection.focus] {
        if point.path.len() <= depth || !point.path.starts_with(parent_path) {
            continue;
        }
        let ix = point.path[depth];
        if ix > index {
            point.path[depth] = ix - 1;
            continue;
        }
        if ix < index {
            continue;
        }

        // Point was inside the removed subtree: park it at the end of the previous sibling,
        // or on whatever now occupies the slot.
        point.path.truncate(depth + 1);
        if index > 0 {
            point.path[depth] = index - 1;
            point.offset = usize::MAX;
        } else {
            point.offset = 0;
        }
    }
}

fn node_mut<'a>(
    children: &'a mut [Node],
    path: &[usize],
    depth: usize,
) -> Result<&'a mut Node, PathError> {
    let Some((&ix, rest)) = path.split_first() else {
        return Err(PathError::Empty);
    };
    let len = children.len();
    let node = children.get_mut(ix).ok_or(PathError::OutOfBounds {
        depth,
        index: ix,
        len,
    })?;
    if rest.is_empty() {
        return Ok(node);
    }
    match node {
        Node::Element(el) => node_mut(&mut el.children, rest, depth + 1),
        Node::Void(_) | Node::Text(_) => Err(PathError::NotContainer { depth }),
    }
}

fn text_mut<'a>(doc: &'a mut Document, path: &[usize]) -> Result<&'a mut TextNode, PathError> {
    match node_mut(&mut doc.children, path, 0)? {
        Node::Text(t) => Ok(t),
        _ => Err(PathError::UnexpectedNode {
            expected: "text",
            path: path.to_vec(),
        }),
    }
}

fn children_mut<'a>(
    doc: &'a mut Document,
    parent_path: &[usize],
) -> Result<&'a mut Vec<Node>, PathError> {
    if parent_path.is_empty() {
        return Ok(&mut doc.children);
    }
    match node_mut(&mut doc.children, parent_path, 0)? {
        Node::Element(el) => Ok(&mut el.children),
        Node::Void(_) | Node::Text(_) => Err(PathError::NotContainer {
            depth: parent_path.len() - 1,
        }),
    }
}

fn insert_node(doc: &mut Document, path: &[usize], node: Node) -> Result<(), PathError> {
    let Some((&index, parent_path)) = path.split_last() else {
        return Err(PathError::Empty);
    };
    let children = children_mut(doc, parent_path)?;
    if index > children.len() {
        return Err(PathError::OutOfBounds {
            depth: parent_path.len(),
            index,
            len: children.len(),
        });
    }
    children.insert(index, node);
    Ok(())
}

fn remove_node(doc: &mut Document, path: &[usize]) -> Result<Node, PathError> {
    let Some((&index, parent_path)) = path.split_last() else {
        return Err(PathError::Empty);
    };
    let children = children_mut(doc, parent_path)?;
    if index >= children.len() {
        return Err(PathError::OutOfBounds {
            depth: parent_path.len(),
            index,
            len: children.len(),
        });
    }
    Ok(children.remove(index))
}

/// A normalisation step run after every transaction until no step has work left.
pub trait NormalizePass {
    fn id(&self) -> &'static str;
    fn run(&self, doc: &Document) -> Vec<Op>;
}

pub struct EnsureNonEmptyDocument;

impl NormalizePass for EnsureNonEmptyDocument {
    fn id(&self) -> &'static str {
        "core.ensure_non_empty_document"
    }

    fn run(&self, doc: &Document) -> Vec<Op> {
        if doc.children.iter().any(Node::is_block) {
            return Vec::new();
        }
        vec![Op::InsertNode {
            path: vec![doc.children.len()],
            node: Node::paragraph(""),
        }]
    }
}

pub struct EnsureTextBlockHasLeaf;

impl NormalizePass for EnsureTextBlockHasLeaf {
    fn id(&self) -> &'static str {
        "core.ensure_text_block_has_leaf"
    }

    fn run(&self, doc: &Document) -> Vec<Op> {
        doc.text_blocks()
            .into_iter()
            .filter_map(|path| {
                let el = doc.element(&path)?;
                if el.children.iter().any(Node::has_text_leaf) {
                    return None;
                }
                let mut leaf = path;
                leaf.push(el.children.len());
                Some(Op::InsertNode {
                    path: leaf,
                    node: Node::text(""),
                })
            })
            .collect()
    }
}

pub fn default_normalize_passes() -> Vec<Box<dyn NormalizePass>> {
    vec![Box::new(EnsureNonEmptyDocument), Box::new(EnsureTextBlockHasLeaf)]
}
