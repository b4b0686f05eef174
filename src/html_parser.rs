use anyhow::{Context, Result};
use html5ever::serialize::SerializeOpts;
use html5ever::tendril::{StrTendril, TendrilSink};
use html5ever::{parse_document, serialize, Attribute, LocalName, Namespace, QualName};
use markup5ever_rcdom::{Handle, Node, NodeData, RcDom, SerializableHandle};
use md5::{Digest, Md5};
use std::cell::RefCell;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use tracing::warn;
use url::Url;

const HTML_NAMESPACE: &str = "http://www.w3.org/1999/xhtml";

/// A remote image found in a document, paired with the file it is mirrored to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageRef {
    /// The `src` value exactly as it appears in the document.
    pub source_url: String,
    pub local_path: PathBuf,
}

impl ImageRef {
    pub fn new(source_url: &str, url: &Url, images_dir: &Path) -> Self {
        Self {
            source_url: source_url.to_string(),
            local_path: local_path_for(source_url, url, images_dir),
        }
    }

    /// The local path as written into the `src` attribute.
    pub fn local_src(&self) -> String {
        self.local_path.to_string_lossy().into_owned()
    }
}

/// `<images_dir>/<md5 hex of source><extension of url path>`
pub fn local_path_for(source_url: &str, url: &Url, images_dir: &Path) -> PathBuf {
    let digest = Md5::digest(source_url.as_bytes());
    images_dir.join(format!("{:x}{}", digest, path_extension(url)))
}

/// Extension of the last path segment, dot included, after percent-decoding.
/// A path ending in `/` has none.
fn path_extension(url: &Url) -> String {
    let last = url
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .unwrap_or_default();
    let segment = urlencoding::decode(last)
        .map(|decoded| decoded.into_owned())
        .unwrap_or_else(|_| last.to_string());

    match segment.rfind('.') {
        Some(dot) => segment[dot..].to_string(),
        None => String::new(),
    }
}

/// What an `<img src>` value points at.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceKind {
    Empty,
    Data,
    Remote(Url),
    /// Looks like http(s) but does not parse.
    Malformed(url::ParseError),
    Unsupported,
}

pub fn classify_source(src: &str) -> SourceKind {
    if src.trim().is_empty() {
        return SourceKind::Empty;
    }
    if has_prefix_ignore_case(src, "data:") {
        return SourceKind::Data;
    }

    match Url::parse(src) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => SourceKind::Remote(url),
        Ok(_) => SourceKind::Unsupported,
        Err(err) if has_prefix_ignore_case(src, "http:") || has_prefix_ignore_case(src, "https:") => {
            SourceKind::Malformed(err)
        }
        Err(_) => SourceKind::Unsupported,
    }
}

fn has_prefix_ignore_case(s: &str, prefix: &str) -> bool {
    s.get(..prefix.len())
        .map(|head| head.eq_ignore_ascii_case(prefix))
        .unwrap_or(false)
}

/// Collects the unique remote images of `page` in first-seen order.
pub fn extract_image_refs(page: &Page, images_dir: &Path) -> Vec<ImageRef> {
    let mut seen = HashSet::new();
    let mut refs = Vec::new();

    for img in page.elements("img") {
        let Some(src) = attr(&img, "src") else {
            continue;
        };

        match classify_source(&src) {
            SourceKind::Empty | SourceKind::Data => {}
            SourceKind::Remote(url) => {
                if seen.insert(src.clone()) {
                    refs.push(ImageRef::new(&src, &url, images_dir));
                }
            }
            SourceKind::Malformed(err) => {
                warn!(src = %src, error = %err, "cannot parse image source");
            }
            SourceKind::Unsupported => {
                warn!(src = %src, "unsupported image reference");
            }
        }
    }

    refs
}

/// A parsed HTML document that can be inspected and edited in place.
pub struct Page {
    dom: RcDom,
}

impl Page {
    pub fn parse(html: &str) -> Self {
        let dom = parse_document(RcDom::default(), Default::default()).one(html);
        Self { dom }
    }

    /// All elements named `tag`, in document order.
    pub fn elements(&self, tag: &str) -> Vec<Handle> {
        let mut found = Vec::new();
        collect_elements(&self.dom.document, tag, &mut found);
        found
    }

    pub fn first(&self, tag: &str) -> Option<Handle> {
        self.elements(tag).into_iter().next()
    }

    /// Makes sure the page has a non-empty `<title>`.
    pub fn ensure_title(&self, title: &str) {
        let existing = match self.first("title") {
            Some(node) => node,
            None => {
                let Some(head) = self.first("head") else {
                    return;
                };
                append_element(&head, "title")
            }
        };

        if text_content(&existing).is_empty() {
            set_text(&existing, title);
        }
    }

    pub fn to_html(&self) -> Result<String> {
        serialize_children(&self.dom.document).context("cannot generate html")
    }
}

/// Resolves character references such as `&amp;` in a plain-text value.
///
/// Everything else, markup-looking text and whitespace included, is kept as
/// is. Unknown or unterminated references stay literal.
pub fn decode_entities(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp..];
        match decode_reference(tail) {
            Some((c, consumed)) => {
                out.push(c);
                rest = &tail[consumed..];
            }
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// Decodes the `&...;` reference at the start of `tail` into a character and
/// the number of bytes it spans.
fn decode_reference(tail: &str) -> Option<(char, usize)> {
    let end = tail[1..].find(|c: char| !c.is_ascii_alphanumeric() && c != '#')? + 1;
    if !tail[end..].starts_with(';') {
        return None;
    }

    let name = &tail[1..end];
    let c = match name.strip_prefix('#') {
        Some(number) => {
            let code = match number.strip_prefix(|c: char| c == 'x' || c == 'X') {
                Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                None => number.parse::<u32>().ok()?,
            };
            match code {
                0 => char::REPLACEMENT_CHARACTER,
                _ => char::from_u32(code)?,
            }
        }
        None => named_reference(name)?,
    };
    Some((c, end + 1))
}

fn named_reference(name: &str) -> Option<char> {
    let c = match name {
        "amp" => '&',
        "lt" => '<',
        "gt" => '>',
        "quot" => '"',
        "apos" => '\'',
        "nbsp" => '\u{a0}',
        "ndash" => '\u{2013}',
        "mdash" => '\u{2014}',
        "hellip" => '\u{2026}',
        "lsquo" => '\u{2018}',
        "rsquo" => '\u{2019}',
        "ldquo" => '\u{201c}',
        "rdquo" => '\u{201d}',
        "laquo" => '\u{ab}',
        "raquo" => '\u{bb}',
        "middot" => '\u{b7}',
        "bull" => '\u{2022}',
        "copy" => '\u{a9}',
        "reg" => '\u{ae}',
        "trade" => '\u{2122}',
        "times" => '\u{d7}',
        _ => return None,
    };
    Some(c)
}

fn collect_elements(node: &Handle, tag: &str, found: &mut Vec<Handle>) {
    if is_element(node, tag) {
        found.push(node.clone());
    }
    for child in node.children.borrow().iter() {
        collect_elements(child, tag, found);
    }
}

pub fn is_element(node: &Handle, tag: &str) -> bool {
    matches!(node.data, NodeData::Element { ref name, .. } if &*name.local == tag)
}

pub fn attr(node: &Handle, name: &str) -> Option<String> {
    match node.data {
        NodeData::Element { ref attrs, .. } => attrs
            .borrow()
            .iter()
            .find(|a| &*a.name.local == name)
            .map(|a| a.value.to_string()),
        _ => None,
    }
}

pub fn set_attr(node: &Handle, name: &str, value: &str) {
    if let NodeData::Element { ref attrs, .. } = node.data {
        let mut attrs = attrs.borrow_mut();
        match attrs.iter_mut().find(|a| &*a.name.local == name) {
            Some(existing) => existing.value = StrTendril::from(value),
            None => attrs.push(Attribute {
                name: QualName::new(None, Namespace::from(""), LocalName::from(name)),
                value: StrTendril::from(value),
            }),
        }
    }
}

pub fn remove_attr(node: &Handle, name: &str) {
    if let NodeData::Element { ref attrs, .. } = node.data {
        attrs.borrow_mut().retain(|a| &*a.name.local != name);
    }
}

pub fn text_content(node: &Handle) -> String {
    let mut text = String::new();
    push_text(node, &mut text);
    text
}

fn push_text(node: &Handle, text: &mut String) {
    if let NodeData::Text { ref contents } = node.data {
        text.push_str(&contents.borrow());
    }
    for child in node.children.borrow().iter() {
        push_text(child, text);
    }
}

pub fn parent(node: &Handle) -> Option<Handle> {
    let weak = node.parent.take();
    let parent = weak.as_ref().and_then(|p| p.upgrade());
    node.parent.set(weak);
    parent
}

/// Removes `node` (and its subtree) from the tree.
pub fn detach(node: &Handle) {
    if let Some(parent) = parent(node) {
        parent
            .children
            .borrow_mut()
            .retain(|child| !Rc::ptr_eq(child, node));
    }
    node.parent.set(None);
}

pub fn append_element(parent: &Handle, tag: &str) -> Handle {
    let child = Node::new(NodeData::Element {
        name: QualName::new(None, Namespace::from(HTML_NAMESPACE), LocalName::from(tag)),
        attrs: RefCell::new(Vec::new()),
        template_contents: RefCell::new(None),
        mathml_annotation_xml_integration_point: false,
    });
    child.parent.set(Some(Rc::downgrade(parent)));
    parent.children.borrow_mut().push(child.clone());
    child
}

pub fn set_text(node: &Handle, text: &str) {
    let text_node = Node::new(NodeData::Text {
        contents: RefCell::new(StrTendril::from(text)),
    });
    text_node.parent.set(Some(Rc::downgrade(node)));

    let mut children = node.children.borrow_mut();
    for old in children.drain(..) {
        old.parent.set(None);
    }
    children.push(text_node);
}

/// Serializes the children of `node`, i.e. its inner HTML.
pub fn serialize_children(node: &Handle) -> Result<String> {
    let mut out = Vec::new();
    let handle: SerializableHandle = node.clone().into();
    serialize(&mut out, &handle, SerializeOpts::default())?;
    Ok(String::from_utf8(out)?)
}
