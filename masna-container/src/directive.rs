//! Parsing of `wire`/`value`/`new` tag text.
//!
//! The grammar of a wire directive is `head[:tail]`:
//!
//! | text              | meaning                                        |
//! |-------------------|------------------------------------------------|
//! | `self`            | a weak handle to the object being built        |
//! | `auto[:name]`     | by name if such a binding fits, else by type   |
//! | `type`            | the default binding of the slot type           |
//! | `name[:name]`     | the named binding                              |
//! | `value:text`      | literal text, or `${expr}` for an expression   |
//! | `${expr}`         | an expression                                  |
//! | anything else     | a literal value                                |
//!
//! Only the first `:` splits, so `value:a:b` carries the text `a:b`.

use std::fmt;

use crate::error::{MasnaError, Result};

/// One field annotation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tag {
    /// `#[masna(wire = "...")]`: a directive.
    Wire(String),
    /// `#[masna(value = "...")]`: literal text or `${expr}`.
    Value(String),
    /// `#[masna(new)]` / `#[masna(new = "a,b")]`: build through a factory.
    New(String),
}

impl Tag {
    pub fn kind(&self) -> &'static str {
        match self {
            Tag::Wire(_) => "wire",
            Tag::Value(_) => "value",
            Tag::New(_) => "new",
        }
    }
}

/// Where a directive applies; decides the default for bare `auto`/`name`.
#[derive(Debug, Clone, Copy)]
pub enum Site<'a> {
    /// A struct field; bare `auto`/`name` use the field name.
    Field(&'a str),
    /// An init method or factory parameter.
    Param,
}

/// A parsed wire directive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    SelfRef,
    /// By name if the binding exists and fits the slot, else by type.
    Auto(Option<String>),
    Type,
    Name(String),
    /// Literal text or an expression (`${...}`).
    Value(String),
}

impl Directive {
    /// Parses directive text for the given site.
    ///
    /// # Errors
    /// [`MasnaError::InvalidDeclaration`] for empty text, an unknown head
    /// with a tail, `value` without text, or a bare `name` on a parameter.
    pub fn parse(text: &str, site: Site<'_>) -> Result<Self> {
        let text = text.trim();
        if text.is_empty() {
            return Err(MasnaError::invalid(site.to_string(), "empty directive"));
        }
        if text.starts_with("${") {
            return Ok(Directive::Value(text.to_string()));
        }

        let (head, tail) = match text.split_once(':') {
            Some((head, tail)) => (head.trim(), Some(tail.trim())),
            None => (text, None),
        };
        let tail = tail.filter(|t| !t.is_empty()).map(str::to_string);

        match head.to_ascii_lowercase().as_str() {
            "self" => Ok(Directive::SelfRef),
            "type" => Ok(Directive::Type),
            "auto" => match (tail, site) {
                (Some(name), _) => Ok(Directive::Auto(Some(name))),
                (None, Site::Field(field)) => Ok(Directive::Auto(Some(field.to_string()))),
                (None, Site::Param) => Ok(Directive::Auto(None)),
            },
            "name" => match (tail, site) {
                (Some(name), _) => Ok(Directive::Name(name)),
                (None, Site::Field(field)) => Ok(Directive::Name(field.to_string())),
                (None, Site::Param) => Err(MasnaError::invalid(
                    site.to_string(),
                    "`name` needs an explicit binding name on a parameter",
                )),
            },
            "value" => match tail {
                Some(value) => Ok(Directive::Value(value)),
                None => Err(MasnaError::invalid(
                    site.to_string(),
                    format!("`{text}` has no value"),
                )),
            },
            _ if tail.is_none() && !text.contains(':') => Ok(Directive::Value(text.to_string())),
            _ => Err(MasnaError::invalid(
                site.to_string(),
                format!("unknown directive `{head}` in `{text}`"),
            )),
        }
    }

    /// Returns `true` for directives that fill reference slots.
    pub fn is_reference(&self) -> bool {
        !matches!(self, Directive::Value(_))
    }
}

impl fmt::Display for Site<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Site::Field(name) => write!(f, "field `{name}`"),
            Site::Param => write!(f, "parameter"),
        }
    }
}

/// Returns the expression inside `${...}`, if `text` is one.
pub fn expression(text: &str) -> Option<&str> {
    text.trim()
        .strip_prefix("${")
        .and_then(|rest| rest.strip_suffix('}'))
        .map(str::trim)
}

/// Splits comma-separated `new` parameters, dropping blanks.
pub fn split_params(text: &str) -> Vec<String> {
    text.split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}
