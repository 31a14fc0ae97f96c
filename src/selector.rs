//! CSS-like selectors for querying the host document.
//!
//! Supported: type (`article`), universal (`*`), `#id`, `.class`, `[attr]`,
//! `[attr="value"]`, `:not(<compound>)`, the descendant combinator and
//! comma-separated alternatives. That covers every hook the timeline markup
//! needs; anything else is a parse error rather than a silent mismatch.

use std::fmt;

use crate::dom::{Document, NodeId};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SelectorError {
    #[error("empty selector")]
    Empty,
    #[error("unexpected {found:?} at offset {offset} in selector {input:?}")]
    Unexpected {
        input: String,
        offset: usize,
        found: char,
    },
    #[error("selector {input:?} ended unexpectedly")]
    UnexpectedEnd { input: String },
    #[error("unsupported pseudo-class :{name} in selector {input:?}")]
    UnsupportedPseudo { input: String, name: String },
}

#[derive(Clone, PartialEq, Eq)]
pub struct Selector {
    source: String,
    alternatives: Vec<Complex>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Complex {
    compounds: Vec<Compound>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
struct Compound {
    tag: Option<String>,
    conditions: Vec<Condition>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Condition {
    Id(String),
    Class(String),
    HasAttribute(String),
    AttributeEquals(String, String),
    Not(Box<Compound>),
}

impl Selector {
    pub fn parse(input: &str) -> Result<Self, SelectorError> {
        if input.trim().is_empty() {
            return Err(SelectorError::Empty);
        }
        let mut parser = Parser {
            input,
            chars: input.chars().collect(),
            pos: 0,
        };
        let alternatives = parser.selector_list()?;
        Ok(Self {
            source: input.trim().to_string(),
            alternatives,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn matches(&self, doc: &Document, node: NodeId) -> bool {
        doc.is_element(node)
            && self
                .alternatives
                .iter()
                .any(|complex| complex.matches(doc, node))
    }
}

impl fmt::Debug for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Selector({:?})", self.source)
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl std::str::FromStr for Selector {
    type Err = SelectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Complex {
    // Right to left; with only descendant combinators the nearest matching
    // ancestor is always a valid choice, so no backtracking is needed.
    fn matches(&self, doc: &Document, node: NodeId) -> bool {
        let Some((last, rest)) = self.compounds.split_last() else {
            return false;
        };
        if !last.matches(doc, node) {
            return false;
        }
        let mut cursor = doc.parent(node);
        for compound in rest.iter().rev() {
            loop {
                let Some(candidate) = cursor else {
                    return false;
                };
                cursor = doc.parent(candidate);
                if compound.matches(doc, candidate) {
                    break;
                }
            }
        }
        true
    }
}

impl Compound {
    fn is_empty(&self) -> bool {
        self.tag.is_none() && self.conditions.is_empty()
    }

    fn matches(&self, doc: &Document, node: NodeId) -> bool {
        let Some(tag) = doc.tag(node) else {
            return false;
        };
        if let Some(expected) = &self.tag {
            if expected != tag {
                return false;
            }
        }
        self.conditions.iter().all(|condition| match condition {
            Condition::Id(id) => doc.attribute(node, "id") == Some(id.as_str()),
            Condition::Class(class) => doc
                .attribute(node, "class")
                .is_some_and(|value| value.split_whitespace().any(|c| c == class)),
            Condition::HasAttribute(name) => doc.has_attribute(node, name),
            Condition::AttributeEquals(name, value) => {
                doc.attribute(node, name) == Some(value.as_str())
            }
            Condition::Not(inner) => !inner.matches(doc, node),
        })
    }
}

struct Parser<'a> {
    input: &'a str,
    chars: Vec<char>,
    pos: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        Some(c)
    }

    fn skip_whitespace(&mut self) -> bool {
        let start = self.pos;
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
        self.pos > start
    }

    fn error(&self) -> SelectorError {
        match self.peek() {
            Some(found) => SelectorError::Unexpected {
                input: self.input.to_string(),
                offset: self.pos,
                found,
            },
            None => SelectorError::UnexpectedEnd {
                input: self.input.to_string(),
            },
        }
    }

    fn expect(&mut self, expected: char) -> Result<(), SelectorError> {
        if self.peek() == Some(expected) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error())
        }
    }

    fn selector_list(&mut self) -> Result<Vec<Complex>, SelectorError> {
        let mut list = Vec::new();
        loop {
            self.skip_whitespace();
            list.push(self.complex()?);
            self.skip_whitespace();
            match self.peek() {
                Some(',') => {
                    self.pos += 1;
                }
                None => return Ok(list),
                Some(_) => return Err(self.error()),
            }
        }
    }

    fn complex(&mut self) -> Result<Complex, SelectorError> {
        let mut compounds = vec![self.compound()?];
        loop {
            let separated = self.skip_whitespace();
            match self.peek() {
                None | Some(',') => break,
                Some(_) if separated => compounds.push(self.compound()?),
                Some(_) => return Err(self.error()),
            }
        }
        Ok(Complex { compounds })
    }

    fn compound(&mut self) -> Result<Compound, SelectorError> {
        let mut compound = Compound::default();
        let mut universal = false;
        match self.peek() {
            Some('*') => {
                self.pos += 1;
                universal = true;
            }
            Some(c) if is_ident_char(c) => {
                compound.tag = Some(self.ident()?.to_ascii_lowercase());
            }
            _ => {}
        }
        loop {
            let condition = match self.peek() {
                Some('#') => {
                    self.pos += 1;
                    Condition::Id(self.ident()?)
                }
                Some('.') => {
                    self.pos += 1;
                    Condition::Class(self.ident()?)
                }
                Some('[') => self.attribute()?,
                Some(':') => self.pseudo()?,
                _ => break,
            };
            compound.conditions.push(condition);
        }
        if compound.is_empty() && !universal {
            return Err(self.error());
        }
        Ok(compound)
    }

    fn ident(&mut self) -> Result<String, SelectorError> {
        let start = self.pos;
        while self.peek().is_some_and(is_ident_char) {
            self.pos += 1;
        }
        if self.pos == start {
            return Err(self.error());
        }
        Ok(self.chars[start..self.pos].iter().collect())
    }

    fn attribute(&mut self) -> Result<Condition, SelectorError> {
        self.expect('[')?;
        self.skip_whitespace();
        let name = self.ident()?.to_ascii_lowercase();
        self.skip_whitespace();
        let condition = match self.peek() {
            Some(']') => Condition::HasAttribute(name),
            Some('=') => {
                self.pos += 1;
                self.skip_whitespace();
                let value = match self.peek() {
                    Some(quote @ ('"' | '\'')) => self.quoted(quote)?,
                    _ => self.ident()?,
                };
                self.skip_whitespace();
                Condition::AttributeEquals(name, value)
            }
            _ => return Err(self.error()),
        };
        self.expect(']')?;
        Ok(condition)
    }

    fn quoted(&mut self, quote: char) -> Result<String, SelectorError> {
        self.expect(quote)?;
        let mut value = String::new();
        loop {
            match self.bump() {
                Some(c) if c == quote => return Ok(value),
                Some(c) => value.push(c),
                None => return Err(self.error()),
            }
        }
    }

    fn pseudo(&mut self) -> Result<Condition, SelectorError> {
        self.expect(':')?;
        let name = self.ident()?.to_ascii_lowercase();
        if name != "not" {
            return Err(SelectorError::UnsupportedPseudo {
                input: self.input.to_string(),
                name,
            });
        }
        self.expect('(')?;
        self.skip_whitespace();
        let inner = self.compound()?;
        self.skip_whitespace();
        self.expect(')')?;
        Ok(Condition::Not(Box::new(inner)))
    }
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_'
}
