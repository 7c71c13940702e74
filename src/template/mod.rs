//! Template compiler: raw SQL text with placeholders and optional blocks → [`TemplateNode`] tree.
//!
//! Syntax recognized outside quotes, comments, and dollar-quoted bodies:
//!
//! | Syntax | Meaning |
//! |---|---|
//! | `:name`, `$name` | named placeholder |
//! | `?` | positional placeholder |
//! | `!s` `!i` `!u` `!f` `!b` `!l` suffix | type tag (string, integer, unsigned, float, boolean, list) |
//! | `{ ... }` | optional block, kept only when its named placeholders are bound |
//! | `??`, `\{`, `\}` | literal `?`, `{`, `}` |
//!
//! `::` casts, `:=`, `$1`, `?|` and `?&` are left as SQL text.
//!
//! ```rust
//! use sqlweave::template::{Template, TemplateNode};
//!
//! let template = Template::compile("select * from users where 1 = 1 { and name = :name }")?;
//! assert!(matches!(template.nodes()[1], TemplateNode::Block(_)));
//! # Ok::<(), sqlweave::SqlWeaveError>(())
//! ```

use std::sync::Arc;

use tracing::trace;

use crate::error::SqlWeaveError;

mod cache;
mod parsers;
mod scanner;

pub use cache::{
    TemplateCache, clear_template_cache, set_template_cache_capacity, template_cache_len,
};

use scanner::{ScanError, Token, tokenize};

/// Declared cast applied to a placeholder's value before binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeTag {
    /// `!s`
    String,
    /// `!i`
    Integer,
    /// `!u`
    Unsigned,
    /// `!f`
    Float,
    /// `!b`
    Boolean,
    /// `!l`
    List,
}

impl TypeTag {
    #[must_use]
    pub fn from_letter(letter: char) -> Option<Self> {
        match letter {
            's' => Some(TypeTag::String),
            'i' => Some(TypeTag::Integer),
            'u' => Some(TypeTag::Unsigned),
            'f' => Some(TypeTag::Float),
            'b' => Some(TypeTag::Boolean),
            'l' => Some(TypeTag::List),
            _ => None,
        }
    }

    #[must_use]
    pub fn letter(self) -> char {
        match self {
            TypeTag::String => 's',
            TypeTag::Integer => 'i',
            TypeTag::Unsigned => 'u',
            TypeTag::Float => 'f',
            TypeTag::Boolean => 'b',
            TypeTag::List => 'l',
        }
    }
}

/// How a placeholder finds its value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PlaceholderKey {
    Named(String),
    /// Index among all `?` markers of the source text, in appearance order.
    Positional(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placeholder {
    pub key: PlaceholderKey,
    pub tag: Option<TypeTag>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateNode {
    Literal(String),
    Placeholder(Placeholder),
    Block(Vec<TemplateNode>),
}

/// A compiled template; immutable and shareable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    source: String,
    nodes: Vec<TemplateNode>,
    positional_count: usize,
    named_keys: Vec<String>,
    block_count: usize,
}

impl Template {
    /// Compile through the process-wide cache.
    ///
    /// # Errors
    /// Returns `SqlWeaveError::TemplateSyntax` for unbalanced blocks or unknown type tags.
    pub fn compile(text: &str) -> Result<Arc<Template>, SqlWeaveError> {
        cache::global().get_or_compile(text)
    }

    /// Compile without consulting or populating the cache.
    ///
    /// # Errors
    /// Returns `SqlWeaveError::TemplateSyntax` for unbalanced blocks or unknown type tags.
    pub fn compile_uncached(text: &str) -> Result<Template, SqlWeaveError> {
        let tokens = tokenize(text).map_err(|ScanError { offset, message }| {
            syntax_error(text, offset, message)
        })?;

        let mut builder = TreeBuilder::default();
        for token in tokens {
            builder.push(text, token)?;
        }
        let template = builder.finish(text)?;
        trace!(
            blocks = template.block_count,
            positional = template.positional_count,
            "compiled template"
        );
        Ok(template)
    }

    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    #[must_use]
    pub fn nodes(&self) -> &[TemplateNode] {
        &self.nodes
    }

    /// Number of `?` markers in the source, included or not.
    #[must_use]
    pub fn positional_count(&self) -> usize {
        self.positional_count
    }

    /// Distinct named keys in order of first appearance.
    #[must_use]
    pub fn named_keys(&self) -> &[String] {
        &self.named_keys
    }

    #[must_use]
    pub fn block_count(&self) -> usize {
        self.block_count
    }
}

fn syntax_error(text: &str, offset: usize, message: impl Into<String>) -> SqlWeaveError {
    SqlWeaveError::TemplateSyntax {
        template: text.to_string(),
        offset,
        message: message.into(),
    }
}

/// Stack of open blocks; the bottom frame is the template root.
struct TreeBuilder {
    frames: Vec<Vec<TemplateNode>>,
    open_offsets: Vec<usize>,
    positional_count: usize,
    named_keys: Vec<String>,
    block_count: usize,
}

impl Default for TreeBuilder {
    fn default() -> Self {
        Self {
            frames: vec![Vec::new()],
            open_offsets: Vec::new(),
            positional_count: 0,
            named_keys: Vec::new(),
            block_count: 0,
        }
    }
}

impl TreeBuilder {
    fn current(&mut self) -> &mut Vec<TemplateNode> {
        // The root frame is never popped.
        let last = self.frames.len() - 1;
        &mut self.frames[last]
    }

    fn push(&mut self, text: &str, token: Token<'_>) -> Result<(), SqlWeaveError> {
        match token {
            Token::Text(span) => {
                let frame = self.current();
                if let Some(TemplateNode::Literal(existing)) = frame.last_mut() {
                    existing.push_str(span);
                } else {
                    frame.push(TemplateNode::Literal(span.to_string()));
                }
            }
            Token::Named { name, tag } => {
                if !self.named_keys.iter().any(|k| k == name) {
                    self.named_keys.push(name.to_string());
                }
                self.current().push(TemplateNode::Placeholder(Placeholder {
                    key: PlaceholderKey::Named(name.to_string()),
                    tag,
                }));
            }
            Token::Positional { tag } => {
                let position = self.positional_count;
                self.positional_count += 1;
                self.current().push(TemplateNode::Placeholder(Placeholder {
                    key: PlaceholderKey::Positional(position),
                    tag,
                }));
            }
            Token::Open { offset } => {
                self.frames.push(Vec::new());
                self.open_offsets.push(offset);
            }
            Token::Close { offset } => {
                if self.open_offsets.pop().is_none() {
                    return Err(syntax_error(text, offset, "unmatched '}'"));
                }
                let children = self.frames.pop().unwrap_or_default();
                self.block_count += 1;
                self.current().push(TemplateNode::Block(children));
            }
        }
        Ok(())
    }

    fn finish(mut self, text: &str) -> Result<Template, SqlWeaveError> {
        if let Some(offset) = self.open_offsets.last() {
            return Err(syntax_error(text, *offset, "unclosed '{'"));
        }
        let nodes = self.frames.pop().unwrap_or_default();
        Ok(Template {
            source: text.to_string(),
            nodes,
            positional_count: self.positional_count,
            named_keys: self.named_keys,
            block_count: self.block_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lit(s: &str) -> TemplateNode {
        TemplateNode::Literal(s.to_string())
    }

    fn named(name: &str) -> TemplateNode {
        TemplateNode::Placeholder(Placeholder {
            key: PlaceholderKey::Named(name.to_string()),
            tag: None,
        })
    }

    #[test]
    fn builds_nested_blocks() {
        let t = Template::compile_uncached("a { b :x { c ? } } d").unwrap();
        assert_eq!(
            t.nodes(),
            &[
                lit("a "),
                TemplateNode::Block(vec![
                    lit(" b "),
                    named("x"),
                    lit(" "),
                    TemplateNode::Block(vec![
                        lit(" c "),
                        TemplateNode::Placeholder(Placeholder {
                            key: PlaceholderKey::Positional(0),
                            tag: None,
                        }),
                        lit(" "),
                    ]),
                    lit(" "),
                ]),
                lit(" d"),
            ]
        );
        assert_eq!(t.block_count(), 2);
        assert_eq!(t.positional_count(), 1);
        assert_eq!(t.named_keys(), &["x".to_string()]);
    }

    #[test]
    fn merges_escaped_text_into_one_literal() {
        let t = Template::compile_uncached(r"select '{' || ?? || \{\}").unwrap();
        assert_eq!(t.nodes(), &[lit("select '{' || ? || {}")]);
    }

    #[test]
    fn adjacent_braces_nest_blocks() {
        let t = Template::compile_uncached("{:a{:b}}").unwrap();
        assert_eq!(
            t.nodes(),
            &[TemplateNode::Block(vec![
                named("a"),
                TemplateNode::Block(vec![named("b")]),
            ])]
        );

        let t = Template::compile_uncached("{{:a} x}").unwrap();
        assert_eq!(
            t.nodes(),
            &[TemplateNode::Block(vec![
                TemplateNode::Block(vec![named("a")]),
                lit(" x"),
            ])]
        );

        let t = Template::compile_uncached("where 1 = 1 { and a = :a { and b = :b}}").unwrap();
        assert_eq!(t.block_count(), 2);
    }

    #[test]
    fn rejects_unbalanced_blocks() {
        let err = Template::compile_uncached("select 1 }").unwrap_err();
        assert!(matches!(err, SqlWeaveError::TemplateSyntax { offset: 9, .. }));

        let err = Template::compile_uncached("select { 1 { 2 }").unwrap_err();
        match err {
            SqlWeaveError::TemplateSyntax {
                offset, message, ..
            } => {
                assert_eq!(offset, 7);
                assert!(message.contains("unclosed"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn deep_nesting_is_fine() {
        let depth = 200;
        let text = format!("{}:a{}", "{ ".repeat(depth), " }".repeat(depth));
        let t = Template::compile_uncached(&text).unwrap();
        assert_eq!(t.block_count(), depth);
    }

    #[test]
    fn compiling_twice_yields_identical_trees() {
        let text = "select * from t where a = :a { and b = :b!i }";
        let cold = Template::compile_uncached(text).unwrap();
        let first = Template::compile(text).unwrap();
        let second = Template::compile(text).unwrap();
        assert_eq!(*first, cold);
        assert_eq!(first, second);
    }
}
