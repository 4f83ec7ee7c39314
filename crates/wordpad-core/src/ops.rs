use std::ops::Range;

use crate::core::{Attrs, Node, Selection};
use crate::style::StyleProps;

pub type Path = Vec<usize>;

/// A single structural mutation of the document tree. Applying an op yields its inverse.
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    InsertText {
        path: Path,
        offset: usize,
        text: String,
    },
    RemoveText {
        path: Path,
        range: Range<usize>,
    },
    InsertNode {
        path: Path,
        node: Node,
    },
    RemoveNode {
        path: Path,
    },
    SetElement {
        path: Path,
        tag: String,
        attrs: Attrs,
        style: StyleProps,
    },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransactionMeta {
    pub source: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Transaction {
    pub ops: Vec<Op>,
    pub selection_after: Option<Selection>,
    pub meta: TransactionMeta,
}

impl Transaction {
    pub fn new(ops: Vec<Op>) -> Self {
        Self {
            ops,
            selection_after: None,
            meta: TransactionMeta::default(),
        }
    }

    pub fn selection_after(mut self, selection_after: Selection) -> Self {
        self.selection_after = Some(selection_after);
        self
    }

    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.meta.source = Some(source.into());
        self
    }
}
