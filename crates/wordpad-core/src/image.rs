use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use tracing::debug;

use crate::core::{Document, Node, NodeId};
use crate::ops::{Op, Transaction};
use crate::surface::{ClickTarget, Surface};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ImageSelection {
    #[default]
    NoSelection,
    ImageSelected(NodeId),
}

/// Tracks the one image marked for deletion. The image is held by id and looked up on use,
/// so a node removed by other edits simply stops resolving.
#[derive(Debug, Default)]
pub struct ImageAnnotationManager {
    state: ImageSelection,
}

impl ImageAnnotationManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ImageSelection {
        self.state
    }

    pub fn selected(&self) -> Option<NodeId> {
        match self.state {
            ImageSelection::ImageSelected(id) => Some(id),
            ImageSelection::NoSelection => None,
        }
    }

    pub fn is_selected(&self, id: NodeId) -> bool {
        self.selected() == Some(id)
    }

    pub fn clear(&mut self) {
        self.state = ImageSelection::NoSelection;
    }

    /// Selects the clicked image, or clears the selection for any other target.
    pub fn on_click(&mut self, doc: &Document, target: &ClickTarget) {
        self.state = match target {
            ClickTarget::Node(path) => match doc.node(path) {
                Some(Node::Void(v)) if v.is_image() => ImageSelection::ImageSelected(v.id),
                _ => ImageSelection::NoSelection,
            },
            ClickTarget::Outside => ImageSelection::NoSelection,
        };
        debug!("Image selection is now {:?}", self.state);
    }

    /// Removes the selected image. Returns whether the document changed.
    pub fn delete_selected(&mut self, surface: &mut Surface) -> bool {
        let Some(id) = self.selected() else {
            return false;
        };
        self.clear();
        let Some(path) = surface.doc().find_void(id) else {
            debug!("Selected image {id} is no longer in the document");
            return false;
        };
        let tx = Transaction::new(vec![Op::RemoveNode { path }]).source("image:delete");
        match surface.apply(tx) {
            Ok(()) => true,
            Err(err) => {
                debug!("Failed to delete image {id}: {err}");
                false
            }
        }
    }
}

/// Embeddable `data:` URI for uploaded image bytes.
pub fn image_data_uri(mime: &str, bytes: &[u8]) -> String {
    format!("data:{mime};base64,{}", STANDARD.encode(bytes))
}
