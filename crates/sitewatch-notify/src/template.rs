//! Email body templates.
//!
//! A template is the full DATA payload, headers included. Substitutions use
//! the `{{.Field}}` form; recognised fields are `To`, `From`, `Subject` and
//! `Url`. Anything else between `{{` and `}}` is rejected at parse time so a
//! bad template fails before a connection is opened.

use std::path::PathBuf;
use std::sync::LazyLock;

use regex::Regex;
use sitewatch_core::{Error, Result};

static ACTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{\s*\.([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    To,
    From,
    Subject,
    Url,
}

impl Field {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "To" => Some(Field::To),
            "From" => Some(Field::From),
            "Subject" => Some(Field::Subject),
            "Url" | "URL" => Some(Field::Url),
            _ => None,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Field::To => "To",
            Field::From => "From",
            Field::Subject => "Subject",
            Field::Url => "Url",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Text(String),
    Field(Field),
}

/// Values substituted into a body for one recipient.
#[derive(Debug, Clone, Copy)]
pub struct TemplateFields<'a> {
    pub to: &'a str,
    pub from: &'a str,
    pub subject: &'a str,
    pub url: &'a str,
}

impl TemplateFields<'_> {
    fn get(&self, field: Field) -> &str {
        match field {
            Field::To => self.to,
            Field::From => self.from,
            Field::Subject => self.subject,
            Field::Url => self.url,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BodyTemplate {
    segments: Vec<Segment>,
}

impl BodyTemplate {
    pub fn parse(source: &str) -> Result<Self> {
        let mut segments = Vec::new();
        let mut last = 0;
        for caps in ACTION.captures_iter(source) {
            let whole = caps.get(0).map_or(0..0, |m| m.range());
            let name = &caps[1];
            let field = Field::parse(name)
                .ok_or_else(|| Error::Template(format!("unknown field {{{{.{name}}}}}")))?;
            push_text(&mut segments, &source[last..whole.start])?;
            segments.push(Segment::Field(field));
            last = whole.end;
        }
        push_text(&mut segments, &source[last..])?;
        Ok(Self { segments })
    }

    /// Read and concatenate template files in order, then parse.
    pub fn load(paths: &[PathBuf]) -> Result<Self> {
        if paths.is_empty() {
            return Err(Error::Template("no template files".into()));
        }
        let mut source = String::new();
        for path in paths {
            let part = std::fs::read_to_string(path)
                .map_err(|e| Error::Template(format!("{}: {e}", path.display())))?;
            source.push_str(&part);
        }
        Self::parse(&source)
    }

    /// Expand for one recipient. Values carrying a line break are refused so
    /// a recipient or subject cannot inject extra header lines.
    pub fn render(&self, fields: &TemplateFields<'_>) -> Result<String> {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Text(t) => out.push_str(t),
                Segment::Field(f) => {
                    let value = fields.get(*f);
                    if value.contains(|c: char| c == '\r' || c == '\n') {
                        return Err(Error::Template(format!(
                            "field {} contains a line break",
                            f.name()
                        )));
                    }
                    out.push_str(value);
                }
            }
        }
        Ok(out)
    }
}

fn push_text(segments: &mut Vec<Segment>, text: &str) -> Result<()> {
    if let Some(pos) = text.find("{{") {
        let snippet: String = text[pos..].chars().take(24).collect();
        return Err(Error::Template(format!(
            "malformed or unsupported action near {snippet:?}"
        )));
    }
    if !text.is_empty() {
        segments.push(Segment::Text(text.to_string()));
    }
    Ok(())
}

/// Rewrite bare `\n` as `\r\n` for the SMTP DATA payload.
pub fn to_crlf(body: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len() + body.len() / 32);
    let mut prev = 0u8;
    for &b in body.as_bytes() {
        if b == b'\n' && prev != b'\r' {
            out.push(b'\r');
        }
        out.push(b);
        prev = b;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIELDS: TemplateFields<'static> = TemplateFields {
        to: "ops@example.com",
        from: "monitor@example.com",
        subject: "Page changed",
        url: "https://tickets.example.com/event",
    };

    #[test]
    fn renders_all_fields() {
        let t = BodyTemplate::parse(
            "To: {{.To}}\nFrom: {{ .From }}\nSubject: {{.Subject}}\n\nSee {{.Url}}\n",
        )
        .unwrap();
        assert_eq!(
            t.render(&FIELDS).unwrap(),
            "To: ops@example.com\nFrom: monitor@example.com\nSubject: Page changed\n\nSee https://tickets.example.com/event\n"
        );
    }

    #[test]
    fn unknown_field_rejected() {
        let err = BodyTemplate::parse("Hi {{.Name}}").unwrap_err();
        assert!(err.to_string().contains("unknown field"));
    }

    #[test]
    fn unterminated_action_rejected() {
        assert!(matches!(
            BodyTemplate::parse("Hi {{.To"),
            Err(Error::Template(_))
        ));
        assert!(BodyTemplate::parse("{{if .To}}x{{end}}").is_err());
    }

    #[test]
    fn line_break_in_value_refused() {
        let t = BodyTemplate::parse("To: {{.To}}\n").unwrap();
        let fields = TemplateFields {
            to: "a@example.com\r\nBcc: evil@example.com",
            ..FIELDS
        };
        assert!(t.render(&fields).is_err());
    }

    #[test]
    fn load_concatenates_files_in_order() {
        let tmp = tempfile::tempdir().unwrap();
        let head = tmp.path().join("head.tmpl");
        let body = tmp.path().join("body.tmpl");
        std::fs::write(&head, "Subject: {{.Subject}}\n\n").unwrap();
        std::fs::write(&body, "{{.Url}}\n").unwrap();
        let t = BodyTemplate::load(&[head, body]).unwrap();
        assert_eq!(
            t.render(&FIELDS).unwrap(),
            "Subject: Page changed\n\nhttps://tickets.example.com/event\n"
        );
    }

    #[test]
    fn load_missing_file_is_template_error() {
        let err = BodyTemplate::load(&[PathBuf::from("/nonexistent/body.tmpl")]).unwrap_err();
        assert!(matches!(err, Error::Template(_)));
    }

    #[test]
    fn crlf_normalisation() {
        assert_eq!(to_crlf("a\nb\r\nc\n"), b"a\r\nb\r\nc\r\n".to_vec());
        assert_eq!(to_crlf("no newline"), b"no newline".to_vec());
    }
}
