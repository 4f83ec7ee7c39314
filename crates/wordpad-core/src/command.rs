use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use thiserror::Error;
use tracing::{debug, warn};

use crate::core::{BLOCK_FORMAT_TAGS, ElementNode, Node};
use crate::fallback::{
    CaretPlacement, FallbackPlan, FallbackStyler, StyleError, insert_inline_node, insert_marker,
    restyle_blocks, retag_blocks, wrap_selection,
};
use crate::ops::Transaction;
use crate::selection::{SelectionRange, SelectionTracker};
use crate::style::{StyleProps, font_size_css, legacy_font_size};
use crate::surface::Surface;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FormattingKind {
    Bold,
    Italic,
    Underline,
    StrikeThrough,
    Subscript,
    Superscript,
    FontName,
    FontSize,
    ForeColor,
    HiliteColor,
    BackColor,
    FormatBlock,
    JustifyLeft,
    JustifyCenter,
    JustifyRight,
    JustifyFull,
    InsertImage,
}

impl FormattingKind {
    pub const ALL: [FormattingKind; 17] = [
        FormattingKind::Bold,
        FormattingKind::Italic,
        FormattingKind::Underline,
        FormattingKind::StrikeThrough,
        FormattingKind::Subscript,
        FormattingKind::Superscript,
        FormattingKind::FontName,
        FormattingKind::FontSize,
        FormattingKind::ForeColor,
        FormattingKind::HiliteColor,
        FormattingKind::BackColor,
        FormattingKind::FormatBlock,
        FormattingKind::JustifyLeft,
        FormattingKind::JustifyCenter,
        FormattingKind::JustifyRight,
        FormattingKind::JustifyFull,
        FormattingKind::InsertImage,
    ];

    /// The host's name for the command.
    pub fn command_name(self) -> &'static str {
        match self {
            FormattingKind::Bold => "bold",
            FormattingKind::Italic => "italic",
            FormattingKind::Underline => "underline",
            FormattingKind::StrikeThrough => "strikeThrough",
            FormattingKind::Subscript => "subscript",
            FormattingKind::Superscript => "superscript",
            FormattingKind::FontName => "fontName",
            FormattingKind::FontSize => "fontSize",
            FormattingKind::ForeColor => "foreColor",
            FormattingKind::HiliteColor => "hiliteColor",
            FormattingKind::BackColor => "backColor",
            FormattingKind::FormatBlock => "formatBlock",
            FormattingKind::JustifyLeft => "justifyLeft",
            FormattingKind::JustifyCenter => "justifyCenter",
            FormattingKind::JustifyRight => "justifyRight",
            FormattingKind::JustifyFull => "justifyFull",
            FormattingKind::InsertImage => "insertImage",
        }
    }

    /// Primitive commands tried, in order, before falling back.
    pub fn primitive_chain(self) -> Vec<FormattingKind> {
        match self {
            FormattingKind::HiliteColor | FormattingKind::BackColor => {
                vec![FormattingKind::HiliteColor, FormattingKind::BackColor]
            }
            kind => vec![kind],
        }
    }

    pub fn takes_value(self) -> bool {
        matches!(
            self,
            FormattingKind::FontName
                | FormattingKind::FontSize
                | FormattingKind::ForeColor
                | FormattingKind::HiliteColor
                | FormattingKind::BackColor
                | FormattingKind::FormatBlock
                | FormattingKind::InsertImage
        )
    }

    fn alignment(self) -> Option<&'static str> {
        match self {
            FormattingKind::JustifyLeft => Some("left"),
            FormattingKind::JustifyCenter => Some("center"),
            FormattingKind::JustifyRight => Some("right"),
            FormattingKind::JustifyFull => Some("justify"),
            _ => None,
        }
    }
}

impl fmt::Display for FormattingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.command_name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown formatting command {0:?}")]
pub struct UnknownCommand(pub String);

impl FromStr for FormattingKind {
    type Err = UnknownCommand;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim();
        Self::ALL
            .into_iter()
            .find(|kind| kind.command_name().eq_ignore_ascii_case(name))
            .ok_or_else(|| UnknownCommand(s.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormattingRequest {
    pub kind: FormattingKind,
    pub value: Option<String>,
}

impl FormattingRequest {
    pub fn new(kind: FormattingKind) -> Self {
        Self { kind, value: None }
    }

    pub fn with_value(kind: FormattingKind, value: impl Into<String>) -> Self {
        Self {
            kind,
            value: Some(value.into()),
        }
    }

    /// Builds a request from a host command name such as `foreColor`.
    pub fn parse(name: &str, value: Option<&str>) -> Result<Self, UnknownCommand> {
        Ok(Self {
            kind: name.parse()?,
            value: value.map(str::to_string),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrimitiveOutcome {
    Applied,
    /// The host has no such command, or cannot represent the value.
    Unsupported,
    /// The host accepted the call but reported it did nothing.
    Declined,
    Failed(String),
}

/// The host's native "execute formatting command" entry point.
pub trait FormattingPrimitive {
    fn exec(
        &mut self,
        surface: &mut Surface,
        kind: FormattingKind,
        value: Option<&str>,
    ) -> PrimitiveOutcome;
}

/// A host without any formatting primitive.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailablePrimitive;

impl FormattingPrimitive for UnavailablePrimitive {
    fn exec(&mut self, _: &mut Surface, _: FormattingKind, _: Option<&str>) -> PrimitiveOutcome {
        PrimitiveOutcome::Unsupported
    }
}

/// Native command set of the editable surface, expressed as presentational markup.
///
/// Font sizes are limited to the legacy `1..=7` scale.
#[derive(Debug, Default, Clone)]
pub struct BuiltinPrimitive {
    disabled: HashSet<FormattingKind>,
}

enum BuiltinAction {
    Inline(ElementNode),
    Retag(String),
    Align(&'static str),
    Insert(Node),
}

impl BuiltinPrimitive {
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes `kinds` from the command set; they report `Unsupported`.
    pub fn without(mut self, kinds: impl IntoIterator<Item = FormattingKind>) -> Self {
        self.disabled.extend(kinds);
        self
    }

    pub fn supports(&self, kind: FormattingKind) -> bool {
        !self.disabled.contains(&kind)
    }

    fn action(
        kind: FormattingKind,
        value: Option<&str>,
    ) -> Result<BuiltinAction, PrimitiveOutcome> {
        let value = value.map(str::trim).filter(|v| !v.is_empty());
        if kind.takes_value() && value.is_none() {
            return Err(PrimitiveOutcome::Declined);
        }
        let value = value.unwrap_or_default();
        let inline = |tag: &str| -> Result<BuiltinAction, PrimitiveOutcome> {
            Ok(BuiltinAction::Inline(ElementNode::new(tag)))
        };

        match kind {
            FormattingKind::Bold => inline("b"),
            FormattingKind::Italic => inline("i"),
            FormattingKind::Underline => inline("u"),
            FormattingKind::StrikeThrough => inline("strike"),
            FormattingKind::Subscript => inline("sub"),
            FormattingKind::Superscript => inline("sup"),
            FormattingKind::FontName => Ok(BuiltinAction::Inline(
                ElementNode::new("font").with_attr("face", value),
            )),
            FormattingKind::FontSize => match legacy_font_size(value) {
                Some(size) => Ok(BuiltinAction::Inline(
                    ElementNode::new("font").with_attr("size", size.to_string()),
                )),
                None => Err(PrimitiveOutcome::Unsupported),
            },
            FormattingKind::ForeColor => Ok(BuiltinAction::Inline(
                ElementNode::new("font").with_attr("color", value),
            )),
            FormattingKind::HiliteColor | FormattingKind::BackColor => {
                Ok(BuiltinAction::Inline(ElementNode::new("span").with_style(
                    StyleProps::new().with("background-color", value),
                )))
            }
            FormattingKind::FormatBlock => block_format_tag(value)
                .map(BuiltinAction::Retag)
                .ok_or(PrimitiveOutcome::Declined),
            FormattingKind::JustifyLeft
            | FormattingKind::JustifyCenter
            | FormattingKind::JustifyRight
            | FormattingKind::JustifyFull => kind
                .alignment()
                .map(BuiltinAction::Align)
                .ok_or(PrimitiveOutcome::Unsupported),
            FormattingKind::InsertImage => Ok(BuiltinAction::Insert(Node::image(value, None))),
        }
    }
}

impl FormattingPrimitive for BuiltinPrimitive {
    fn exec(
        &mut self,
        surface: &mut Surface,
        kind: FormattingKind,
        value: Option<&str>,
    ) -> PrimitiveOutcome {
        if !self.supports(kind) {
            return PrimitiveOutcome::Unsupported;
        }
        if !surface.has_focus() {
            return PrimitiveOutcome::Declined;
        }
        let Some(selection) = surface.editor_selection() else {
            return PrimitiveOutcome::Declined;
        };
        let action = match Self::action(kind, value) {
            Ok(action) => action,
            Err(outcome) => return outcome,
        };

        let doc = surface.doc();
        let tx: Result<Transaction, StyleError> = match action {
            BuiltinAction::Inline(container) if selection.is_collapsed() => {
                insert_marker(doc, &selection.anchor, &container)
            }
            BuiltinAction::Inline(container) => {
                wrap_selection(doc, &selection, &container, CaretPlacement::Cover)
            }
            BuiltinAction::Retag(tag) => retag_blocks(doc, &selection, &tag),
            BuiltinAction::Align(value) => restyle_blocks(doc, &selection, "text-align", value),
            BuiltinAction::Insert(node) => {
                let (_, end) = selection.ordered();
                insert_inline_node(doc, &end, node)
            }
        };

        let applied = tx.and_then(|tx| {
            surface
                .apply(tx.source(format!("primitive:{kind}")))
                .map_err(StyleError::from)
        });
        match applied {
            Ok(()) => PrimitiveOutcome::Applied,
            Err(StyleError::EmptyRange) => PrimitiveOutcome::Declined,
            Err(err) => PrimitiveOutcome::Failed(err.to_string()),
        }
    }
}

/// Normalises a `formatBlock` value (`<h2>`, `H2`, `h2`) to a supported block tag.
pub fn block_format_tag(value: &str) -> Option<String> {
    let tag = value
        .trim()
        .trim_start_matches('<')
        .trim_end_matches('>')
        .trim()
        .to_ascii_lowercase();
    BLOCK_FORMAT_TAGS.contains(&tag.as_str()).then_some(tag)
}

/// Direct-mutation equivalent of `kind` applied with `value`.
pub fn fallback_plan(
    kind: FormattingKind,
    value: Option<&str>,
) -> Result<FallbackPlan, StyleError> {
    let value = value.map(str::trim).unwrap_or_default();
    let required = |property: &'static str| {
        if value.is_empty() {
            Err(StyleError::InvalidValue {
                property,
                value: value.to_string(),
            })
        } else {
            Ok(value.to_string())
        }
    };
    let inline = |property: &str, value: String| -> Result<FallbackPlan, StyleError> {
        Ok(FallbackPlan::Inline(StyleProps::new().with(property, value)))
    };

    match kind {
        FormattingKind::Bold => inline("font-weight", "bold".into()),
        FormattingKind::Italic => inline("font-style", "italic".into()),
        FormattingKind::Underline => inline("text-decoration", "underline".into()),
        FormattingKind::StrikeThrough => inline("text-decoration", "line-through".into()),
        FormattingKind::Subscript => inline("vertical-align", "sub".into()),
        FormattingKind::Superscript => inline("vertical-align", "super".into()),
        FormattingKind::FontName => inline("font-family", required("font-family")?),
        FormattingKind::FontSize => {
            let size = font_size_css(value).ok_or_else(|| StyleError::InvalidValue {
                property: "font-size",
                value: value.to_string(),
            })?;
            inline("font-size", size)
        }
        FormattingKind::ForeColor => inline("color", required("color")?),
        FormattingKind::HiliteColor | FormattingKind::BackColor => {
            inline("background-color", required("background-color")?)
        }
        FormattingKind::FormatBlock => block_format_tag(value)
            .map(FallbackPlan::Retag)
            .ok_or_else(|| StyleError::InvalidValue {
                property: "block",
                value: value.to_string(),
            }),
        FormattingKind::JustifyLeft
        | FormattingKind::JustifyCenter
        | FormattingKind::JustifyRight
        | FormattingKind::JustifyFull => Ok(FallbackPlan::Align(
            kind.alignment().unwrap_or("left").to_string(),
        )),
        FormattingKind::InsertImage => {
            Ok(FallbackPlan::Insert(Node::image(required("src")?, None)))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Primitive(FormattingKind),
    Fallback,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionReport {
    pub kind: FormattingKind,
    pub attempts: Vec<(FormattingKind, PrimitiveOutcome)>,
    pub resolution: Resolution,
}

impl ExecutionReport {
    pub fn applied(&self) -> bool {
        !matches!(self.resolution, Resolution::Failed(_))
    }

    pub fn used_fallback(&self) -> bool {
        self.resolution == Resolution::Fallback
    }
}

/// Applies formatting requests to the remembered selection, falling back to direct styling
/// whenever the primitive does not apply.
pub struct CommandExecutor {
    primitive: Box<dyn FormattingPrimitive>,
    styler: FallbackStyler,
}

impl CommandExecutor {
    pub fn new(primitive: Box<dyn FormattingPrimitive>) -> Self {
        Self {
            primitive,
            styler: FallbackStyler::new(),
        }
    }

    pub fn execute(
        &mut self,
        request: &FormattingRequest,
        surface: &mut Surface,
        tracker: &mut SelectionTracker,
    ) -> ExecutionReport {
        let restored = tracker.restore(surface);
        surface.focus_editor();
        debug!(
            "Executing {} (selection restored: {restored})",
            request.kind
        );

        let value = request.value.as_deref();
        let mut attempts = Vec::new();
        let mut resolution = None;
        for kind in request.kind.primitive_chain() {
            let outcome = self.primitive.exec(surface, kind, value);
            debug!("Primitive {kind} returned {outcome:?}");
            let applied = outcome == PrimitiveOutcome::Applied;
            attempts.push((kind, outcome));
            if applied {
                resolution = Some(Resolution::Primitive(kind));
                break;
            }
        }

        let resolution = resolution.unwrap_or_else(|| match self.fallback(request, surface) {
            Ok(()) => {
                debug!("Applied {} through the fallback styler", request.kind);
                Resolution::Fallback
            }
            Err(err) => {
                warn!("Formatting {} failed: {err}", request.kind);
                Resolution::Failed(err.to_string())
            }
        });

        surface.ensure_caret();
        tracker.on_selection_change(surface);

        ExecutionReport {
            kind: request.kind,
            attempts,
            resolution,
        }
    }

    fn fallback(
        &self,
        request: &FormattingRequest,
        surface: &mut Surface,
    ) -> Result<(), StyleError> {
        let plan = fallback_plan(request.kind, request.value.as_deref())?;
        let selection = surface
            .editor_selection()
            .ok_or(StyleError::NoSelection)?;
        let range = SelectionRange::capture(surface.doc(), &selection);
        self.styler.apply(surface, &range, &plan)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("bold", FormattingKind::Bold)]
    #[case("strikeThrough", FormattingKind::StrikeThrough)]
    #[case("STRIKETHROUGH", FormattingKind::StrikeThrough)]
    #[case(" hiliteColor ", FormattingKind::HiliteColor)]
    #[case("justifyFull", FormattingKind::JustifyFull)]
    fn parses_command_names(#[case] name: &str, #[case] kind: FormattingKind) {
        assert_eq!(name.parse::<FormattingKind>(), Ok(kind));
    }

    #[test]
    fn unknown_command_is_an_error() {
        assert_eq!(
            FormattingRequest::parse("createLink", Some("x")),
            Err(UnknownCommand("createLink".to_string()))
        );
    }

    #[test]
    fn highlight_commands_share_a_chain() {
        let chain = vec![FormattingKind::HiliteColor, FormattingKind::BackColor];
        assert_eq!(FormattingKind::HiliteColor.primitive_chain(), chain);
        assert_eq!(FormattingKind::BackColor.primitive_chain(), chain);
        assert_eq!(
            FormattingKind::ForeColor.primitive_chain(),
            vec![FormattingKind::ForeColor]
        );
    }

    #[rstest]
    #[case("<H2>", Some("h2"))]
    #[case("blockquote", Some("blockquote"))]
    #[case("<table>", None)]
    #[case("", None)]
    fn block_format_values(#[case] value: &str, #[case] expected: Option<&str>) {
        assert_eq!(block_format_tag(value).as_deref(), expected);
    }

    #[rstest]
    #[case(FormattingKind::FontSize, "5", "font-size", "24px")]
    #[case(FormattingKind::FontSize, "18", "font-size", "18px")]
    #[case(FormattingKind::FontSize, "1.5em", "font-size", "1.5em")]
    #[case(FormattingKind::ForeColor, "#c00", "color", "#c00")]
    #[case(FormattingKind::BackColor, "yellow", "background-color", "yellow")]
    #[case(FormattingKind::StrikeThrough, "", "text-decoration", "line-through")]
    fn inline_fallback_mapping(
        #[case] kind: FormattingKind,
        #[case] value: &str,
        #[case] property: &str,
        #[case] expected: &str,
    ) {
        let Ok(FallbackPlan::Inline(style)) = fallback_plan(kind, Some(value)) else {
            panic!("expected an inline plan for {kind}");
        };
        assert_eq!(style.get(property), Some(expected));
    }

    #[test]
    fn fallback_rejects_unusable_values() {
        assert!(matches!(
            fallback_plan(FormattingKind::FontSize, Some("huge")),
            Err(StyleError::InvalidValue { property: "font-size", .. })
        ));
        assert!(fallback_plan(FormattingKind::ForeColor, None).is_err());
        assert!(fallback_plan(FormattingKind::FormatBlock, Some("<li>")).is_err());
    }
}
