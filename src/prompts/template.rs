//! Prompt templates with `{name}` placeholders.
//!
//! Templates are parsed once at load time so that malformed files fail the run
//! before any agent is started. `{{` and `}}` render as literal braces.

use crate::error::TemplateError;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Variable(String),
}

/// A parsed prompt template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    name: String,
    segments: Vec<Segment>,
}

impl PromptTemplate {
    /// Parses `source` into a template identified by `name`.
    ///
    /// # Errors
    ///
    /// Returns `TemplateError::Malformed` for unbalanced braces or placeholder
    /// names that are not identifiers.
    pub fn parse(name: impl Into<String>, source: &str) -> Result<Self, TemplateError> {
        let name = name.into();
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = source.char_indices().peekable();

        while let Some((offset, c)) = chars.next() {
            match c {
                '{' if matches!(chars.peek(), Some((_, '{'))) => {
                    chars.next();
                    literal.push('{');
                }
                '}' if matches!(chars.peek(), Some((_, '}'))) => {
                    chars.next();
                    literal.push('}');
                }
                '{' => {
                    let mut variable = String::new();
                    let mut closed = false;
                    for (_, c) in chars.by_ref() {
                        if c == '}' {
                            closed = true;
                            break;
                        }
                        variable.push(c);
                    }
                    if !closed {
                        return Err(malformed(&name, offset, "unclosed '{'"));
                    }
                    let variable = variable.trim().to_string();
                    if !is_identifier(&variable) {
                        return Err(malformed(
                            &name,
                            offset,
                            format!("invalid placeholder name '{}'", variable),
                        ));
                    }
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Variable(variable));
                }
                '}' => return Err(malformed(&name, offset, "unmatched '}'")),
                _ => literal.push(c),
            }
        }

        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self { name, segments })
    }

    /// Returns the template's name (usually its file name).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the distinct placeholder names in order of first appearance.
    pub fn variables(&self) -> Vec<&str> {
        let mut seen: Vec<&str> = Vec::new();
        for segment in &self.segments {
            if let Segment::Variable(v) = segment {
                if !seen.contains(&v.as_str()) {
                    seen.push(v);
                }
            }
        }
        seen
    }

    /// Returns true if the template references `variable`.
    pub fn references(&self, variable: &str) -> bool {
        self.segments
            .iter()
            .any(|s| matches!(s, Segment::Variable(v) if v == variable))
    }

    /// Ensures the template references `variable`.
    pub fn require(&self, variable: &str) -> Result<(), TemplateError> {
        if self.references(variable) {
            Ok(())
        } else {
            Err(TemplateError::MissingPlaceholder {
                template: self.name.clone(),
                placeholder: variable.to_string(),
            })
        }
    }

    /// Renders the template, substituting every placeholder.
    ///
    /// # Errors
    ///
    /// Returns `TemplateError::MissingVariable` if a placeholder has no value.
    pub fn format(&self, values: &[(&str, &str)]) -> Result<String, TemplateError> {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Variable(variable) => {
                    let value = values
                        .iter()
                        .find(|(k, _)| *k == variable.as_str())
                        .map(|(_, v)| *v)
                        .ok_or_else(|| TemplateError::MissingVariable {
                            template: self.name.clone(),
                            variable: variable.clone(),
                        })?;
                    out.push_str(value);
                }
            }
        }
        Ok(out)
    }

    /// Renders the template with `{query}` bound to `query`.
    pub fn format_query(&self, query: &str) -> Result<String, TemplateError> {
        self.format(&[("query", query)])
    }
}

fn malformed(name: &str, offset: usize, reason: impl Into<String>) -> TemplateError {
    TemplateError::Malformed {
        template: name.to_string(),
        offset,
        reason: reason.into(),
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
