//! Template Parser
//!
//! Hand-rolled cursor scanner over template source. Produces an element
//! tree with directive attributes already classified: static attributes,
//! bound attributes (`:name` / `v-bind:name`), event bindings (`@name` /
//! `v-on:name`) with their modifiers, and `v-for` repeat bindings.
//!
//! The scanner keeps an open-element stack. Start tags push, end tags pop
//! and attach the closed element to the new stack top; the element popped
//! with an empty remainder becomes the root. Templates must have exactly
//! one root element. All failures are fail-fast `CompileError`s with byte
//! offsets into the template source.

use indexmap::IndexMap;

use super::CompileError;

/// A node of the parsed template tree.
#[derive(Debug, Clone, PartialEq)]
pub enum AstNode {
    Element(Element),
    Text(String),
}

/// A parsed element with classified attributes.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Element {
    pub tag: String,
    pub attrs: Vec<Attr>,
    pub events: Vec<EventAttr>,
    pub vfor: Option<ForBinding>,
    pub children: Vec<AstNode>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Attr {
    pub name: String,
    pub value: AttrValue,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    /// Literal attribute text. A valueless attribute holds "".
    Static(String),
    /// `style="color: red; margin: 0"` pre-parsed into pairs.
    StaticStyle(IndexMap<String, String>),
    /// Expression source from `:name="expr"`, parsed later by codegen.
    Bound(String),
}

/// One `@event.mod1.mod2="source"` binding.
#[derive(Debug, Clone, PartialEq)]
pub struct EventAttr {
    pub event: String,
    pub modifiers: EventModifiers,
    pub key_filters: Vec<KeyFilter>,
    pub src: String,
}

/// Behavior modifiers recognized on event bindings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EventModifiers {
    pub stop: bool,
    pub prevent: bool,
    pub self_only: bool,
    pub capture: bool,
    pub once: bool,
    pub passive: bool,
    pub native: bool,
    pub ctrl: bool,
    pub shift: bool,
    pub alt: bool,
    pub meta: bool,
    pub left: bool,
    pub middle: bool,
    pub right: bool,
}

/// A key-matching modifier (`@keyup.enter`, `@keyup.13`).
#[derive(Debug, Clone, PartialEq)]
pub enum KeyFilter {
    Code(u32),
    Named(String),
}

/// `v-for="(item, index) in list"`, with the list source left unparsed.
#[derive(Debug, Clone, PartialEq)]
pub struct ForBinding {
    pub alias: String,
    pub index: Option<String>,
    pub extra: Option<String>,
    pub list_src: String,
}

/// Tags with no closing counterpart; a bare `<br>` closes immediately.
const VOID_TAGS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param",
    "source", "track", "wbr",
];

/// Parse a template into its root element.
pub fn parse(template: &str) -> Result<Element, CompileError> {
    let src = template.trim();
    if src.is_empty() {
        return Err(CompileError::EmptyTemplate);
    }
    Scanner::new(src).parse()
}

struct Scanner<'a> {
    src: &'a str,
    pos: usize,
    stack: Vec<Element>,
    root: Option<Element>,
}

impl<'a> Scanner<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src,
            pos: 0,
            stack: Vec::new(),
            root: None,
        }
    }

    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn parse(mut self) -> Result<Element, CompileError> {
        while self.pos < self.src.len() {
            let rest = self.rest();
            if let Some(after) = rest.strip_prefix("</") {
                self.end_tag(after)?;
            } else if rest.starts_with("<!--") {
                self.comment()?;
            } else if rest.starts_with('<') && starts_tag_name(&rest[1..]) {
                self.start_tag()?;
            } else {
                self.text()?;
            }
        }
        if let Some(open) = self.stack.last() {
            return Err(CompileError::UnclosedTag(open.tag.clone()));
        }
        self.root.ok_or(CompileError::EmptyTemplate)
    }

    fn comment(&mut self) -> Result<(), CompileError> {
        match self.rest().find("-->") {
            Some(end) => {
                self.pos += end + 3;
                Ok(())
            }
            None => Err(CompileError::UnexpectedEof(self.pos)),
        }
    }

    fn text(&mut self) -> Result<(), CompileError> {
        let rest = self.rest();
        // Skip the first char so a stray leading `<` cannot loop forever.
        let skip = rest.chars().next().map(char::len_utf8).unwrap_or(0);
        let end = rest[skip..]
            .find('<')
            .map(|i| i + skip)
            .unwrap_or(rest.len());
        let raw = &rest[..end];
        self.pos += end;
        if raw.trim().is_empty() {
            return Ok(());
        }
        match self.stack.last_mut() {
            Some(parent) => {
                parent.children.push(AstNode::Text(raw.trim().to_string()));
                Ok(())
            }
            None => Err(CompileError::TextOutsideRoot(self.pos - end)),
        }
    }

    fn end_tag(&mut self, after: &str) -> Result<(), CompileError> {
        let tag_start = self.pos;
        let name_len = tag_name_len(after);
        if name_len == 0 {
            return Err(CompileError::MalformedTag(tag_start));
        }
        let name = after[..name_len].to_string();
        let close = after[name_len..]
            .find('>')
            .ok_or(CompileError::UnexpectedEof(tag_start))?;
        self.pos += 2 + name_len + close + 1;

        let closed = self
            .stack
            .pop()
            .ok_or_else(|| CompileError::StrayClosingTag(name.clone(), tag_start))?;
        if closed.tag != name {
            return Err(CompileError::MismatchedTag {
                expected: closed.tag,
                found: name,
                offset: tag_start,
            });
        }
        self.attach(closed, tag_start)
    }

    fn attach(&mut self, element: Element, offset: usize) -> Result<(), CompileError> {
        match self.stack.last_mut() {
            Some(parent) => {
                parent.children.push(AstNode::Element(element));
                Ok(())
            }
            None if self.root.is_none() => {
                if element.vfor.is_some() {
                    return Err(CompileError::ForOnRoot);
                }
                self.root = Some(element);
                Ok(())
            }
            None => Err(CompileError::MultipleRoots(offset)),
        }
    }

    fn start_tag(&mut self) -> Result<(), CompileError> {
        let tag_start = self.pos;
        self.pos += 1; // consume '<'
        let name_len = tag_name_len(self.rest());
        let tag = self.rest()[..name_len].to_string();
        self.pos += name_len;

        let mut element = Element {
            tag,
            ..Element::default()
        };
        loop {
            self.skip_ws();
            let rest = self.rest();
            if rest.is_empty() {
                return Err(CompileError::UnexpectedEof(tag_start));
            }
            if rest.starts_with("/>") {
                self.pos += 2;
                return self.attach(element, tag_start);
            }
            if rest.starts_with('>') {
                self.pos += 1;
                if VOID_TAGS.contains(&element.tag.as_str()) {
                    return self.attach(element, tag_start);
                }
                if self.root.is_some() && self.stack.is_empty() {
                    return Err(CompileError::MultipleRoots(tag_start));
                }
                self.stack.push(element);
                return Ok(());
            }
            self.attribute(&mut element)?;
        }
    }

    fn attribute(&mut self, element: &mut Element) -> Result<(), CompileError> {
        let attr_start = self.pos;
        let rest = self.rest();
        let name_end = rest
            .char_indices()
            .find(|(_, c)| c.is_whitespace() || matches!(c, '=' | '>' | '/' | '"' | '\''))
            .map(|(i, _)| i)
            .unwrap_or(rest.len());
        if name_end == 0 {
            return Err(CompileError::MalformedAttribute(attr_start));
        }
        let name = rest[..name_end].to_string();
        self.pos += name_end;

        self.skip_ws();
        let value = if self.rest().starts_with('=') {
            self.pos += 1;
            self.skip_ws();
            Some(self.attr_value(attr_start)?)
        } else {
            None
        };

        classify_attribute(element, &name, value.as_deref().unwrap_or(""))
    }

    fn attr_value(&mut self, attr_start: usize) -> Result<String, CompileError> {
        let rest = self.rest();
        let quote = rest.chars().next().ok_or(CompileError::UnexpectedEof(attr_start))?;
        if quote == '"' || quote == '\'' {
            let inner = &rest[1..];
            let end = inner
                .find(quote)
                .ok_or(CompileError::UnexpectedEof(attr_start))?;
            self.pos += end + 2;
            Ok(inner[..end].to_string())
        } else {
            let end = rest
                .char_indices()
                .find(|(_, c)| c.is_whitespace() || matches!(c, '>' | '"' | '\'' | '=' | '`'))
                .map(|(i, _)| i)
                .unwrap_or(rest.len());
            if end == 0 {
                return Err(CompileError::MalformedAttribute(attr_start));
            }
            self.pos += end;
            Ok(rest[..end].to_string())
        }
    }

    fn skip_ws(&mut self) {
        let rest = self.rest();
        let skip = rest
            .char_indices()
            .find(|(_, c)| !c.is_whitespace())
            .map(|(i, _)| i)
            .unwrap_or(rest.len());
        self.pos += skip;
    }
}

fn starts_tag_name(s: &str) -> bool {
    s.chars().next().is_some_and(|c| c.is_ascii_alphabetic())
}

fn tag_name_len(s: &str) -> usize {
    s.char_indices()
        .find(|(_, c)| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_')))
        .map(|(i, _)| i)
        .unwrap_or(s.len())
}

// ---------------------------------------------------------------------------
// Directive classification
// ---------------------------------------------------------------------------

fn classify_attribute(
    element: &mut Element,
    name: &str,
    value: &str,
) -> Result<(), CompileError> {
    if name == "v-for" {
        element.vfor = Some(parse_for(value)?);
        return Ok(());
    }
    if let Some(rest) = name
        .strip_prefix("v-on:")
        .or_else(|| name.strip_prefix('@'))
    {
        element.events.push(parse_event(rest, value));
        return Ok(());
    }
    if let Some(rest) = name
        .strip_prefix("v-bind:")
        .or_else(|| name.strip_prefix(':'))
    {
        element.attrs.push(parse_bind(rest, value));
        return Ok(());
    }
    if name == "style" {
        element.attrs.push(Attr {
            name: "style".to_string(),
            value: AttrValue::StaticStyle(parse_style(value)),
        });
        return Ok(());
    }
    element.attrs.push(Attr {
        name: name.to_string(),
        value: AttrValue::Static(value.to_string()),
    });
    Ok(())
}

/// `v-for` values: `item in list`, `(item, index) in list`,
/// `(value, key, index) of source`.
fn parse_for(src: &str) -> Result<ForBinding, CompileError> {
    let bad = || CompileError::BadForExpression(src.to_string());

    let split_at = [" in ", " of "]
        .iter()
        .filter_map(|kw| src.find(kw).map(|i| (i, kw.len())))
        .min_by_key(|(i, _)| *i)
        .ok_or_else(bad)?;
    let (head, tail) = (
        src[..split_at.0].trim(),
        src[split_at.0 + split_at.1..].trim(),
    );
    if head.is_empty() || tail.is_empty() {
        return Err(bad());
    }

    let binding = if let Some(inner) = head
        .strip_prefix('(')
        .and_then(|h| h.strip_suffix(')'))
    {
        let mut parts = inner.split(',').map(str::trim);
        let alias = parts.next().filter(|p| !p.is_empty()).ok_or_else(bad)?;
        ForBinding {
            alias: alias.to_string(),
            index: parts.next().filter(|p| !p.is_empty()).map(str::to_string),
            extra: parts.next().filter(|p| !p.is_empty()).map(str::to_string),
            list_src: tail.to_string(),
        }
    } else {
        ForBinding {
            alias: head.to_string(),
            index: None,
            extra: None,
            list_src: tail.to_string(),
        }
    };
    Ok(binding)
}

fn parse_event(raw: &str, value: &str) -> EventAttr {
    let mut parts = raw.split('.');
    let event = parts.next().unwrap_or_default().to_string();
    let mut modifiers = EventModifiers::default();
    let mut key_filters = Vec::new();
    for part in parts {
        match part {
            "stop" => modifiers.stop = true,
            "prevent" => modifiers.prevent = true,
            "self" => modifiers.self_only = true,
            "capture" => modifiers.capture = true,
            "once" => modifiers.once = true,
            "passive" => modifiers.passive = true,
            "native" => modifiers.native = true,
            "ctrl" => modifiers.ctrl = true,
            "shift" => modifiers.shift = true,
            "alt" => modifiers.alt = true,
            "meta" => modifiers.meta = true,
            "left" => modifiers.left = true,
            "middle" => modifiers.middle = true,
            "right" => modifiers.right = true,
            _ => {
                if let Ok(code) = part.parse::<u32>() {
                    key_filters.push(KeyFilter::Code(code));
                } else if !part.is_empty() {
                    key_filters.push(KeyFilter::Named(part.to_string()));
                }
            }
        }
    }
    EventAttr {
        event,
        modifiers,
        key_filters,
        src: value.to_string(),
    }
}

/// `:name.prop.camel="expr"` — `.camel` and `.prop` camelize the name,
/// with the `innerHTML` capitalization special case.
fn parse_bind(raw: &str, value: &str) -> Attr {
    let mut parts = raw.split('.');
    let mut name = parts.next().unwrap_or_default().to_string();
    for part in parts {
        if part == "camel" || part == "prop" {
            name = camelize(&name);
            if name == "innerHtml" {
                name = "innerHTML".to_string();
            }
        }
    }
    Attr {
        name,
        value: AttrValue::Bound(value.to_string()),
    }
}

fn camelize(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper_next = false;
    for c in name.chars() {
        if c == '-' {
            upper_next = true;
        } else if upper_next {
            out.extend(c.to_uppercase());
            upper_next = false;
        } else {
            out.push(c);
        }
    }
    out
}

fn parse_style(src: &str) -> IndexMap<String, String> {
    let mut out = IndexMap::new();
    for decl in src.split(';') {
        if let Some((prop, val)) = decl.split_once(':') {
            let (prop, val) = (prop.trim(), val.trim());
            if !prop.is_empty() && !val.is_empty() {
                out.insert(prop.to_string(), val.to_string());
            }
        }
    }
    out
}
