//! Typed model of an Xcode `.xcscheme` document.
//!
//! Schemes are small XML files that tell `xcodebuild` and Xcode how to build,
//! launch and test a target. This module parses them into an ordered element
//! tree, lets callers inject (and later remove) a launch argument such as
//! `-start_test`, and writes them back in the exact layout Xcode itself uses:
//! three-space indentation, one attribute per line, `key = "value"` pairs and
//! explicit close tags. A scheme that is armed and then disarmed therefore
//! serializes to the same bytes Xcode wrote.
//!
//! # Example
//!
//! ```
//! use xcarm_core::scheme::{SchemeDocument, SectionPath};
//!
//! let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
//! <Scheme version = "1.3">
//!    <LaunchAction buildConfiguration = "Debug">
//!    </LaunchAction>
//! </Scheme>"#;
//!
//! let mut doc = SchemeDocument::parse(xml).unwrap();
//! let section = SectionPath::launch_action();
//! doc.ensure_flag(&section, "-start_test").unwrap();
//! doc.ensure_flag(&section, "-start_test").unwrap();
//!
//! let args = doc.command_line_arguments(&section).unwrap();
//! assert_eq!(args.len(), 1);
//! assert!(args[0].enabled);
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use quick_xml::escape::partial_escape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use thiserror::Error;
use tracing::debug;

/// Element holding the launch arguments of an action.
pub const COLLECTION_TAG: &str = "CommandLineArguments";
/// A single launch argument entry.
pub const ENTRY_TAG: &str = "CommandLineArgument";

const ARGUMENT_ATTR: &str = "argument";
const ENABLED_ATTR: &str = "isEnabled";
const INDENT: &str = "   ";

/// Errors raised while reading, mutating or writing a scheme.
#[derive(Error, Debug)]
pub enum SchemeError {
    /// The section path does not resolve to an element in the document.
    #[error("Document structure error: section '{0}' not found")]
    MissingSection(SectionPath),

    /// The file is not well-formed XML.
    #[error("Malformed scheme XML: {0}")]
    Xml(String),

    /// The scheme file could not be read.
    #[error("Failed to read scheme {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The scheme file could not be written.
    #[error("Failed to write scheme {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn xml_error(e: impl fmt::Display) -> SchemeError {
    SchemeError::Xml(e.to_string())
}

// ---------------------------------------------------------------------------
// Tree
// ---------------------------------------------------------------------------

/// A node inside an [`Element`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Element(Element),
    Text(String),
    Comment(String),
}

/// An XML element with its attributes kept in document order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<Node>,
    /// Written as `<Name/>` while it has no children.
    pub self_closing: bool,
}

impl Element {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: Vec::new(),
            children: Vec::new(),
            self_closing: false,
        }
    }

    /// Builder-style attribute setter.
    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_attr(key, value);
        self
    }

    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Set an attribute, replacing the value in place if it already exists.
    pub fn set_attr(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.attributes.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.attributes.push((key, value)),
        }
    }

    /// Iterate over child elements, skipping text and comments.
    pub fn elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|node| match node {
            Node::Element(el) => Some(el),
            _ => None,
        })
    }

    pub fn child(&self, name: &str) -> Option<&Element> {
        self.elements().find(|el| el.name == name)
    }

    pub fn child_mut(&mut self, name: &str) -> Option<&mut Element> {
        self.children.iter_mut().find_map(|node| match node {
            Node::Element(el) if el.name == name => Some(el),
            _ => None,
        })
    }

    pub fn push_child(&mut self, child: Element) {
        self.children.push(Node::Element(child));
    }

    fn from_start(start: &BytesStart<'_>) -> Result<Self, SchemeError> {
        let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
        let mut element = Element::new(name);
        for attr in start.attributes() {
            let attr = attr.map_err(xml_error)?;
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let value = attr.unescape_value().map_err(xml_error)?.into_owned();
            element.attributes.push((key, value));
        }
        Ok(element)
    }
}

/// The `<?xml ...?>` prologue, if the document had one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Declaration {
    pub version: String,
    pub encoding: Option<String>,
}

impl Default for Declaration {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            encoding: Some("UTF-8".to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// Section paths and entries
// ---------------------------------------------------------------------------

/// A `/`-separated path of element names, relative to the document root.
///
/// `LaunchAction` addresses `<Scheme><LaunchAction>`; deeper sections are
/// written as `TestAction/Testables`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionPath(Vec<String>);

impl SectionPath {
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    /// The section Xcode reads launch arguments from when running the app.
    pub fn launch_action() -> Self {
        Self::new(["LaunchAction"])
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }
}

impl Default for SectionPath {
    fn default() -> Self {
        Self::launch_action()
    }
}

impl fmt::Display for SectionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("/"))
    }
}

impl FromStr for SectionPath {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let segments: Vec<String> = s
            .split('/')
            .map(str::trim)
            .filter(|seg| !seg.is_empty())
            .map(String::from)
            .collect();
        if segments.is_empty() {
            return Err(format!("invalid section path: '{}'", s));
        }
        Ok(Self(segments))
    }
}

/// A `<CommandLineArgument>` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLineArgument {
    pub argument: String,
    pub enabled: bool,
}

impl CommandLineArgument {
    pub fn enabled(argument: impl Into<String>) -> Self {
        Self {
            argument: argument.into(),
            enabled: true,
        }
    }

    fn from_element(el: &Element) -> Option<Self> {
        if el.name != ENTRY_TAG {
            return None;
        }
        Some(Self {
            argument: el.attr(ARGUMENT_ATTR)?.to_string(),
            enabled: el.attr(ENABLED_ATTR) == Some("YES"),
        })
    }

    fn to_element(&self) -> Element {
        Element::new(ENTRY_TAG)
            .with_attr(ARGUMENT_ATTR, self.argument.as_str())
            .with_attr(ENABLED_ATTR, if self.enabled { "YES" } else { "NO" })
    }
}

/// What [`SchemeDocument::ensure_flag`] did to the document.
///
/// Pass it back to [`SchemeDocument::revert_flag`] to undo the change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlagChange {
    /// A new enabled entry was appended.
    Inserted {
        section: SectionPath,
        flag: String,
        /// The `CommandLineArguments` collection did not exist and was created.
        created_collection: bool,
    },
    /// An entry with this argument already existed and was left untouched.
    AlreadyPresent {
        section: SectionPath,
        flag: String,
        enabled: bool,
    },
}

impl FlagChange {
    pub fn is_inserted(&self) -> bool {
        matches!(self, FlagChange::Inserted { .. })
    }
}

// ---------------------------------------------------------------------------
// SchemeDocument
// ---------------------------------------------------------------------------

/// A parsed scheme file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemeDocument {
    pub declaration: Option<Declaration>,
    pub root: Element,
}

impl SchemeDocument {
    /// Parse scheme XML.
    ///
    /// Whitespace-only text is dropped; comments and attribute order are kept.
    ///
    /// # Errors
    ///
    /// [`SchemeError::Xml`] if the input is not a single well-formed element tree.
    pub fn parse(xml: &str) -> Result<Self, SchemeError> {
        let mut reader = Reader::from_str(xml);
        let mut declaration = None;
        let mut stack: Vec<Element> = Vec::new();
        let mut root: Option<Element> = None;

        loop {
            let event = reader.read_event().map_err(xml_error)?;
            match event {
                Event::Decl(decl) => {
                    let version = decl.version().map_err(xml_error)?;
                    let encoding = decl.encoding().transpose().map_err(xml_error)?;
                    declaration = Some(Declaration {
                        version: String::from_utf8_lossy(&version).into_owned(),
                        encoding: encoding.map(|e| String::from_utf8_lossy(&e).into_owned()),
                    });
                }
                Event::Start(start) => stack.push(Element::from_start(&start)?),
                Event::Empty(start) => {
                    let mut element = Element::from_start(&start)?;
                    element.self_closing = true;
                    attach(&mut stack, &mut root, element)?;
                }
                Event::End(_) => {
                    let element = stack
                        .pop()
                        .ok_or_else(|| SchemeError::Xml("unexpected closing tag".into()))?;
                    attach(&mut stack, &mut root, element)?;
                }
                Event::Text(text) => {
                    let text = text.unescape().map_err(xml_error)?;
                    let trimmed = text.trim();
                    if !trimmed.is_empty() {
                        if let Some(parent) = stack.last_mut() {
                            parent.children.push(Node::Text(trimmed.to_string()));
                        }
                    }
                }
                Event::CData(data) => {
                    if let Some(parent) = stack.last_mut() {
                        let text = String::from_utf8_lossy(&data.into_inner()).into_owned();
                        parent.children.push(Node::Text(text));
                    }
                }
                Event::Comment(comment) => {
                    if let Some(parent) = stack.last_mut() {
                        let text = String::from_utf8_lossy(&comment.into_inner()).into_owned();
                        parent.children.push(Node::Comment(text));
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if let Some(open) = stack.last() {
            return Err(SchemeError::Xml(format!("unclosed element <{}>", open.name)));
        }
        let root = root.ok_or_else(|| SchemeError::Xml("document has no root element".into()))?;
        Ok(Self { declaration, root })
    }

    /// Read and parse a scheme file.
    pub fn load(path: &Path) -> Result<Self, SchemeError> {
        let xml = std::fs::read_to_string(path).map_err(|source| SchemeError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&xml)
    }

    /// Serialize and write the document to `path`.
    pub fn save(&self, path: &Path) -> Result<(), SchemeError> {
        std::fs::write(path, self.to_xml_string()).map_err(|source| SchemeError::Write {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), "Scheme written");
        Ok(())
    }

    /// Serialize using Xcode's layout.
    pub fn to_xml_string(&self) -> String {
        let mut out = String::new();
        if let Some(decl) = &self.declaration {
            out.push_str(&format!("<?xml version=\"{}\"", decl.version));
            if let Some(encoding) = &decl.encoding {
                out.push_str(&format!(" encoding=\"{}\"", encoding));
            }
            out.push_str("?>\n");
        }
        write_element(&mut out, &self.root, 0);
        out
    }

    /// Resolve a section path below the root.
    pub fn section(&self, path: &SectionPath) -> Result<&Element, SchemeError> {
        let mut current = &self.root;
        for segment in path.segments() {
            current = current
                .child(segment)
                .ok_or_else(|| SchemeError::MissingSection(path.clone()))?;
        }
        Ok(current)
    }

    pub fn section_mut(&mut self, path: &SectionPath) -> Result<&mut Element, SchemeError> {
        let mut current = &mut self.root;
        for segment in path.segments() {
            current = current
                .child_mut(segment)
                .ok_or_else(|| SchemeError::MissingSection(path.clone()))?;
        }
        Ok(current)
    }

    /// The launch arguments declared under a section, in document order.
    ///
    /// A section without a `CommandLineArguments` collection yields an empty list.
    pub fn command_line_arguments(
        &self,
        path: &SectionPath,
    ) -> Result<Vec<CommandLineArgument>, SchemeError> {
        let section = self.section(path)?;
        Ok(section
            .child(COLLECTION_TAG)
            .map(|collection| {
                collection
                    .elements()
                    .filter_map(CommandLineArgument::from_element)
                    .collect()
            })
            .unwrap_or_default())
    }

    /// Make sure an entry for `flag` exists under the section.
    ///
    /// Creates the `CommandLineArguments` collection when missing and appends
    /// an enabled entry when no entry carries this argument. An existing entry
    /// is never modified, even when disabled.
    ///
    /// # Errors
    ///
    /// [`SchemeError::MissingSection`] if the section does not exist. The
    /// document is unchanged in that case.
    pub fn ensure_flag(&mut self, path: &SectionPath, flag: &str) -> Result<FlagChange, SchemeError> {
        let section = self.section_mut(path)?;

        let created_collection = section.child(COLLECTION_TAG).is_none();
        if created_collection {
            section.push_child(Element::new(COLLECTION_TAG));
        }
        let collection = section
            .child_mut(COLLECTION_TAG)
            .ok_or_else(|| SchemeError::MissingSection(path.clone()))?;

        let existing = collection
            .elements()
            .filter_map(CommandLineArgument::from_element)
            .find(|entry| entry.argument == flag);

        if let Some(entry) = existing {
            debug!(section = %path, flag, enabled = entry.enabled, "Flag already present");
            return Ok(FlagChange::AlreadyPresent {
                section: path.clone(),
                flag: flag.to_string(),
                enabled: entry.enabled,
            });
        }

        collection.push_child(CommandLineArgument::enabled(flag).to_element());
        debug!(section = %path, flag, created_collection, "Flag inserted");
        Ok(FlagChange::Inserted {
            section: path.clone(),
            flag: flag.to_string(),
            created_collection,
        })
    }

    /// Non-mutating form of [`ensure_flag`](Self::ensure_flag).
    pub fn with_flag(
        &self,
        path: &SectionPath,
        flag: &str,
    ) -> Result<(SchemeDocument, FlagChange), SchemeError> {
        let mut next = self.clone();
        let change = next.ensure_flag(path, flag)?;
        Ok((next, change))
    }

    /// Undo a change previously returned by [`ensure_flag`](Self::ensure_flag).
    ///
    /// Removes the inserted entry, and the collection too when the insert
    /// created it and nothing else was added since. `AlreadyPresent` changes
    /// are left alone. Returns whether the document was modified.
    pub fn revert_flag(&mut self, change: &FlagChange) -> Result<bool, SchemeError> {
        let (path, flag, created_collection) = match change {
            FlagChange::Inserted {
                section,
                flag,
                created_collection,
            } => (section, flag, *created_collection),
            FlagChange::AlreadyPresent { .. } => return Ok(false),
        };

        let section = self.section_mut(path)?;
        let Some(collection) = section.child_mut(COLLECTION_TAG) else {
            return Ok(false);
        };

        let position = collection.children.iter().rposition(|node| match node {
            Node::Element(el) => CommandLineArgument::from_element(el)
                .is_some_and(|entry| entry.argument == *flag),
            _ => false,
        });
        let Some(position) = position else {
            return Ok(false);
        };
        collection.children.remove(position);

        if created_collection && collection.elements().next().is_none() {
            section.children.retain(|node| {
                !matches!(node, Node::Element(el) if el.name == COLLECTION_TAG)
            });
        }
        debug!(section = %path, flag = %flag, "Flag reverted");
        Ok(true)
    }

    /// Remove every entry for `flag` under the section, whoever added it.
    ///
    /// The collection is dropped as well once it holds no entries. Returns the
    /// number of entries removed.
    pub fn remove_flag(&mut self, path: &SectionPath, flag: &str) -> Result<usize, SchemeError> {
        let section = self.section_mut(path)?;
        let Some(collection) = section.child_mut(COLLECTION_TAG) else {
            return Ok(0);
        };

        let before = collection.children.len();
        collection.children.retain(|node| match node {
            Node::Element(el) => {
                !CommandLineArgument::from_element(el).is_some_and(|entry| entry.argument == flag)
            }
            _ => true,
        });
        let removed = before - collection.children.len();

        if collection.elements().next().is_none() {
            section.children.retain(|node| {
                !matches!(node, Node::Element(el) if el.name == COLLECTION_TAG)
            });
        }
        Ok(removed)
    }
}

fn attach(
    stack: &mut [Element],
    root: &mut Option<Element>,
    element: Element,
) -> Result<(), SchemeError> {
    match stack.last_mut() {
        Some(parent) => parent.push_child(element),
        None if root.is_none() => *root = Some(element),
        None => return Err(SchemeError::Xml("multiple root elements".into())),
    }
    Ok(())
}

/// Attribute values keep line breaks and tabs as character references, the
/// way Xcode writes `scriptText`. A raw newline would be normalized to a space
/// by the next reader.
fn escape_attr(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in partial_escape(value).chars() {
        match c {
            '"' => out.push_str("&quot;"),
            '\n' => out.push_str("&#10;"),
            '\r' => out.push_str("&#13;"),
            '\t' => out.push_str("&#9;"),
            c => out.push(c),
        }
    }
    out
}

fn write_element(out: &mut String, el: &Element, depth: usize) {
    let indent = INDENT.repeat(depth);
    out.push_str(&indent);
    out.push('<');
    out.push_str(&el.name);
    for (key, value) in &el.attributes {
        out.push('\n');
        out.push_str(&indent);
        out.push_str(INDENT);
        out.push_str(&format!("{} = \"{}\"", key, escape_attr(value)));
    }
    if el.self_closing && el.children.is_empty() {
        out.push_str("/>\n");
        return;
    }
    out.push('>');

    match el.children.as_slice() {
        [] => {
            out.push('\n');
            out.push_str(&indent);
        }
        [Node::Text(text)] => out.push_str(&partial_escape(text)),
        children => {
            out.push('\n');
            for child in children {
                match child {
                    Node::Element(child) => write_element(out, child, depth + 1),
                    Node::Text(text) => {
                        out.push_str(&indent);
                        out.push_str(INDENT);
                        out.push_str(&partial_escape(text));
                        out.push('\n');
                    }
                    Node::Comment(text) => {
                        out.push_str(&indent);
                        out.push_str(INDENT);
                        out.push_str(&format!("<!--{}-->\n", text));
                    }
                }
            }
            out.push_str(&indent);
        }
    }

    out.push_str(&format!("</{}>\n", el.name));
}
