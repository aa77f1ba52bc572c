//! Link templates such as `https://host/t/{slug}/{id}`.

use crate::core::Identifier;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Identifier,
    Field(String),
}

/// A parsed link template.
///
/// `{id}` expands to the identifier; any other `{path}` is a required record
/// field. `{{` and `}}` are literal braces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkTemplate {
    segments: Vec<Segment>,
}

impl LinkTemplate {
    /// Parses a template pattern.
    pub fn parse(pattern: &str) -> Result<Self, String> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = pattern.chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    literal.push('{');
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    literal.push('}');
                }
                '{' => {
                    let mut name = String::new();
                    loop {
                        match chars.next() {
                            Some('}') => break,
                            Some('{') | None => {
                                return Err(format!("unclosed placeholder in '{pattern}'"));
                            }
                            Some(ch) => name.push(ch),
                        }
                    }
                    let name = name.trim();
                    if name.is_empty() {
                        return Err(format!("empty placeholder in '{pattern}'"));
                    }
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(if name == "id" {
                        Segment::Identifier
                    } else {
                        Segment::Field(name.to_string())
                    });
                }
                '}' => return Err(format!("unmatched '}}' in '{pattern}'")),
                other => literal.push(other),
            }
        }

        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }
        Ok(Self { segments })
    }

    pub(crate) fn literal(text: &str) -> Self {
        Self {
            segments: vec![Segment::Literal(text.to_string())],
        }
    }

    /// Record fields the template needs, in order of appearance.
    #[must_use]
    pub fn fields(&self) -> Vec<&str> {
        self.segments
            .iter()
            .filter_map(|s| match s {
                Segment::Field(name) => Some(name.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Renders the template; `lookup` resolves record fields.
    pub fn render<F>(&self, identifier: &Identifier, mut lookup: F) -> Result<String, String>
    where
        F: FnMut(&str) -> Result<String, String>,
    {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Identifier => out.push_str(&identifier.to_string()),
                Segment::Field(path) => out.push_str(&lookup(path)?),
            }
        }
        Ok(out)
    }
}
