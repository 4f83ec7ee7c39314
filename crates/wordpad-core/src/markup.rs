//! Canonical markup serialisation of a [`Document`] and the parser for the subset it emits.

use std::fmt::Write as _;

use html_escape::{decode_html_entities, encode_double_quoted_attribute, encode_text};
use thiserror::Error;

use crate::core::{Attrs, Document, ElementNode, Node, NodeId, VoidNode, is_void_tag};
use crate::style::StyleProps;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MarkupError {
    #[error("unexpected end of markup inside <{0}>")]
    Unclosed(String),
    #[error("closing tag </{found}> does not match <{expected}>")]
    MismatchedClose { expected: String, found: String },
    #[error("unexpected closing tag </{0}>")]
    UnexpectedClose(String),
    #[error("malformed tag at byte {0}")]
    MalformedTag(usize),
    #[error("unterminated comment at byte {0}")]
    UnterminatedComment(usize),
    #[error("elements nested too deeply at byte {0}")]
    TooDeep(usize),
}

/// Deepest element nesting [`parse_markup`] accepts.
pub const MAX_NESTING_DEPTH: usize = 256;

pub fn to_markup(doc: &Document) -> String {
    let mut out = String::new();
    for node in &doc.children {
        write_node(&mut out, node);
    }
    out
}

fn write_node(out: &mut String, node: &Node) {
    match node {
        Node::Text(t) => out.push_str(&encode_text(&t.text)),
        Node::Element(el) => {
            write_open_tag(out, &el.tag, &el.attrs, &el.style);
            for child in &el.children {
                write_node(out, child);
            }
            let _ = write!(out, "</{}>", el.tag);
        }
        Node::Void(v) => write_open_tag(out, &v.tag, &v.attrs, &StyleProps::new()),
    }
}

fn write_open_tag(out: &mut String, tag: &str, attrs: &Attrs, style: &StyleProps) {
    out.push('<');
    out.push_str(tag);
    for (name, value) in attrs {
        let _ = write!(out, " {name}=\"{}\"", encode_double_quoted_attribute(value));
    }
    if !style.is_empty() {
        let _ = write!(
            out,
            " style=\"{}\"",
            encode_double_quoted_attribute(&style.to_css())
        );
    }
    out.push('>');
}

/// Parses editor markup into a [`Document`].
///
/// Inline content found directly at the top level is gathered into paragraphs and
/// whitespace-only text between blocks is dropped. Elements nested deeper than
/// [`MAX_NESTING_DEPTH`] are rejected with [`MarkupError::TooDeep`].
pub fn parse_markup(src: &str) -> Result<Document, MarkupError> {
    let mut parser = Parser {
        src,
        pos: 0,
        depth: 0,
    };
    let children = parser.parse_children(None)?;
    Ok(Document::new(group_loose_inline(children)))
}

/// Standalone HTML document handed to the export collaborator.
pub fn render_snapshot_html(title: &str, author: &str, content: &str) -> String {
    let heading = if title.trim().is_empty() {
        "Untitled document"
    } else {
        title
    };
    let heading = encode_text(heading);
    let mut out = String::new();
    out.push_str("<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n");
    let _ = writeln!(out, "<title>{heading}</title>");
    out.push_str("</head>\n<body>\n");
    let _ = writeln!(out, "<h1>{heading}</h1>");
    if !author.trim().is_empty() {
        let _ = writeln!(out, "<p class=\"author\">{}</p>", encode_text(author));
    }
    out.push_str(content);
    out.push_str("\n</body>\n</html>\n");
    out
}

fn group_loose_inline(children: Vec<Node>) -> Vec<Node> {
    let mut out: Vec<Node> = Vec::new();
    let mut run: Vec<Node> = Vec::new();

    fn flush(run: &mut Vec<Node>, out: &mut Vec<Node>) {
        let only_whitespace = run
            .iter()
            .all(|n| matches!(n, Node::Text(t) if t.text.trim().is_empty()));
        if !only_whitespace {
            out.push(Node::element("p", std::mem::take(run)));
        }
        run.clear();
    }

    for node in children {
        if node.is_block() {
            flush(&mut run, &mut out);
            out.push(node);
        } else {
            run.push(node);
        }
    }
    flush(&mut run, &mut out);
    out
}

struct Parser<'a> {
    src: &'a str,
    pos: usize,
    depth: usize,
}

impl<'a> Parser<'a> {
    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn parse_children(&mut self, parent: Option<&str>) -> Result<Vec<Node>, MarkupError> {
        let mut out: Vec<Node> = Vec::new();
        loop {
            let rest = self.rest();
            if rest.is_empty() {
                return match parent {
                    Some(tag) => Err(MarkupError::Unclosed(tag.to_string())),
                    None => Ok(out),
                };
            }

            if rest.starts_with("<!--") {
                let end = rest
                    .find("-->")
                    .ok_or(MarkupError::UnterminatedComment(self.pos))?;
                self.pos += end + 3;
                continue;
            }

            if rest.starts_with("<!") {
                let end = rest.find('>').ok_or(MarkupError::MalformedTag(self.pos))?;
                self.pos += end + 1;
                continue;
            }

            if let Some(close) = rest.strip_prefix("</") {
                let end = close.find('>').ok_or(MarkupError::MalformedTag(self.pos))?;
                let found = close[..end].trim().to_ascii_lowercase();
                self.pos += end + 3;
                return match parent {
                    Some(tag) if tag == found => Ok(out),
                    Some(tag) => Err(MarkupError::MismatchedClose {
                        expected: tag.to_string(),
                        found,
                    }),
                    None => Err(MarkupError::UnexpectedClose(found)),
                };
            }

            if starts_open_tag(rest) {
                let tag_start = self.pos;
                let (tag, mut attrs, self_closing) = self.parse_open_tag()?;
                if is_void_tag(&tag) {
                    out.push(Node::Void(VoidNode {
                        id: NodeId::UNASSIGNED,
                        tag,
                        attrs,
                    }));
                    continue;
                }
                let style = attrs
                    .remove("style")
                    .map(|css| StyleProps::parse(&css))
                    .unwrap_or_default();
                let children = if self_closing {
                    Vec::new()
                } else {
                    if self.depth >= MAX_NESTING_DEPTH {
                        return Err(MarkupError::TooDeep(tag_start));
                    }
                    self.depth += 1;
                    let children = self.parse_children(Some(&tag))?;
                    self.depth -= 1;
                    children
                };
                out.push(Node::Element(ElementNode {
                    tag,
                    attrs,
                    style,
                    children,
                }));
                continue;
            }

            let end = rest
                .char_indices()
                .skip(1)
                .find(|&(_, c)| c == '<')
                .map(|(ix, _)| ix)
                .unwrap_or(rest.len());
            let text = decode_html_entities(&rest[..end]).into_owned();
            self.pos += end;
            match out.last_mut() {
                Some(Node::Text(prev)) => prev.text.push_str(&text),
                _ => out.push(Node::text(text)),
            }
        }
    }

    /// Reads `<tag attr="v" ...>` or `<tag ... />` starting at the current `<`.
    fn parse_open_tag(&mut self) -> Result<(String, Attrs, bool), MarkupError> {
        let start = self.pos;
        self.pos += 1;
        let tag = self.take_while(|c| c.is_ascii_alphanumeric() || c == '-');
        let tag = tag.to_ascii_lowercase();
        let mut attrs = Attrs::new();

        loop {
            self.skip_whitespace();
            let rest = self.rest();
            if rest.is_empty() {
                return Err(MarkupError::MalformedTag(start));
            }
            if rest.starts_with("/>") {
                self.pos += 2;
                return Ok((tag, attrs, true));
            }
            if rest.starts_with('>') {
                self.pos += 1;
                return Ok((tag, attrs, false));
            }

            let name = self
                .take_while(|c| !c.is_whitespace() && !matches!(c, '=' | '>' | '/'))
                .to_ascii_lowercase();
            if name.is_empty() {
                return Err(MarkupError::MalformedTag(start));
            }
            self.skip_whitespace();
            let value = if self.rest().starts_with('=') {
                self.pos += 1;
                self.skip_whitespace();
                self.parse_attr_value(start)?
            } else {
                String::new()
            };
            attrs.insert(name, value);
        }
    }

    fn parse_attr_value(&mut self, tag_start: usize) -> Result<String, MarkupError> {
        let rest = self.rest();
        let raw = match rest.chars().next() {
            Some(quote @ ('"' | '\'')) => {
                let body = &rest[1..];
                let end = body
                    .find(quote)
                    .ok_or(MarkupError::MalformedTag(tag_start))?;
                self.pos += end + 2;
                &body[..end]
            }
            Some(_) => self.take_while(|c| !c.is_whitespace() && c != '>'),
            None => return Err(MarkupError::MalformedTag(tag_start)),
        };
        Ok(decode_html_entities(raw).into_owned())
    }

    fn take_while(&mut self, pred: impl Fn(char) -> bool) -> &'a str {
        let rest = self.rest();
        let end = rest
            .char_indices()
            .find(|&(_, c)| !pred(c))
            .map(|(ix, _)| ix)
            .unwrap_or(rest.len());
        self.pos += end;
        &rest[..end]
    }

    fn skip_whitespace(&mut self) {
        self.take_while(char::is_whitespace);
    }
}

fn starts_open_tag(s: &str) -> bool {
    let mut chars = s.chars();
    chars.next() == Some('<') && chars.next().is_some_and(|c| c.is_ascii_alphabetic())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn serializes_sorted_attrs_and_style_last() {
        let doc = Document::new(vec![Node::element(
            "p",
            vec![
                Node::text("a < b & c"),
                Node::Element(
                    ElementNode::new("font")
                        .with_attr("size", "3")
                        .with_attr("color", "red")
                        .with_style(StyleProps::new().with("font-weight", "bold"))
                        .with_children(vec![Node::text("x")]),
                ),
                Node::image("pic.png", Some("A \"quoted\" alt".to_string())),
            ],
        )]);

        assert_eq!(
            to_markup(&doc),
            "<p>a &lt; b &amp; c<font color=\"red\" size=\"3\" style=\"font-weight: bold\">x</font>\
             <img alt=\"A &quot;quoted&quot; alt\" src=\"pic.png\"></p>"
        );
    }

    #[test]
    fn parse_then_serialize_is_stable() {
        let src = "<h1>Title</h1><p>one <b>two</b> \
                   <span style=\"color: red; font-size: 18px\">\u{200B}</span></p>\
                   <p><img src=\"data:image/png;base64,AAAA\"></p><hr>";
        let doc = parse_markup(src).unwrap();
        assert_eq!(to_markup(&doc), src);
    }

    #[test]
    fn parse_accepts_loose_notation() {
        let doc = parse_markup(
            "<!DOCTYPE html><!-- draft -->\n<P Class='x'>hi<br/>there</P>\n loose <i>text</i>",
        )
        .unwrap();
        assert_eq!(
            to_markup(&doc),
            "<p class=\"x\">hi<br>there</p><p>\n loose <i>text</i></p>"
        );
    }

    #[test]
    fn parse_rejects_unbalanced_markup() {
        assert_eq!(
            parse_markup("<p><b>bold</p>"),
            Err(MarkupError::MismatchedClose {
                expected: "b".to_string(),
                found: "p".to_string(),
            })
        );
        assert_eq!(
            parse_markup("<p>open"),
            Err(MarkupError::Unclosed("p".to_string()))
        );
        assert_eq!(
            parse_markup("text</p>"),
            Err(MarkupError::UnexpectedClose("p".to_string()))
        );
        assert!(parse_markup("<p class=\"x>").is_err());
    }

    #[test]
    fn parse_limits_nesting_depth() {
        let nested = |depth: usize| {
            format!("<p>{}x{}</p>", "<b>".repeat(depth), "</b>".repeat(depth))
        };
        assert!(parse_markup(&nested(MAX_NESTING_DEPTH - 1)).is_ok());
        assert_eq!(
            parse_markup(&nested(MAX_NESTING_DEPTH)),
            Err(MarkupError::TooDeep(3 + 3 * (MAX_NESTING_DEPTH - 1)))
        );
    }

    #[test]
    fn render_snapshot_wraps_title_author_and_content() {
        let html = render_snapshot_html("Q3 <Plan>", "Ana", "<p>body</p>");
        assert!(html.starts_with("<!DOCTYPE html>"));
        assert!(html.contains("<title>Q3 &lt;Plan&gt;</title>"));
        assert!(html.contains("<h1>Q3 &lt;Plan&gt;</h1>"));
        assert!(html.contains("<p class=\"author\">Ana</p>"));
        assert!(html.contains("<p>body</p>"));

        let untitled = render_snapshot_html("", "", "");
        assert!(untitled.contains("<title>Untitled document</title>"));
        assert!(!untitled.contains("class=\"author\""));
    }
}
