//! Text codec for the persisted promtail config.
//!
//! The document is a fixed promtail header that ends with the
//! `scrape_configs:` line, followed by one record per [`Key`]:
//!
//! ```text
//! #@container <container name>
//! #@namespace <namespace>
//! #@labels <k1=v1,k2=v2,>
//! <snippet lines>
//!
//! ```
//!
//! The marker lines are YAML comments, so promtail ignores them while the
//! operator can rebuild every key from a previously written document.

use nom::{
    branch::alt,
    bytes::complete::tag,
    character::complete::char,
    combinator::{eof, rest},
    sequence::preceded,
    IResult,
};

use crate::error::{Error, Result};
use crate::key::Key;
use crate::store::Snippets;

pub const CONTAINER_MARKER: &str = "#@container";
pub const NAMESPACE_MARKER: &str = "#@namespace";
pub const LABELS_MARKER: &str = "#@labels";

/// Last line of the header; records start right after it.
pub const SCRAPE_CONFIGS_LINE: &str = "scrape_configs:";

pub const DEFAULT_HEADER: &str = "client:
  backoff_config:
    maxbackoff: 5s
    maxretries: 20
    minbackoff: 100ms
  batchsize: 102400
  batchwait: 1s
  external_labels: {}
  timeout: 10s
positions:
  filename: /run/promtail/positions.yaml
server:
  http_listen_port: 3101
target_config:
  sync_period: 10s
scrape_configs:
";

/// Renders and parses the persisted document. `parse(render(m)) == m` for
/// any mapping whose snippets contain no empty lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentCodec {
    header: String,
}

impl Default for DocumentCodec {
    fn default() -> Self {
        Self {
            header: DEFAULT_HEADER.to_string(),
        }
    }
}

impl DocumentCodec {
    /// Uses a custom header. Its last non-empty line must be
    /// `scrape_configs:` so records can be found again when parsing.
    pub fn with_header(header: &str) -> Result<Self> {
        let last = header.lines().rev().find(|l| !l.trim().is_empty());
        if last.map(str::trim_end) != Some(SCRAPE_CONFIGS_LINE) {
            return Err(Error::invalid_config(format!(
                "document header must end with a '{}' line",
                SCRAPE_CONFIGS_LINE
            )));
        }
        let mut header = header.trim_end().to_string();
        header.push('\n');
        Ok(Self { header })
    }

    pub fn header(&self) -> &str {
        &self.header
    }

    /// Renders the header followed by one record per key, in key order.
    pub fn render(&self, snippets: &Snippets) -> String {
        let mut entries: Vec<_> = snippets.iter().collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));

        let mut out = String::with_capacity(self.header.len() + entries.len() * 128);
        out.push_str(&self.header);
        for (key, snippet) in entries {
            render_record(&mut out, key, snippet);
        }
        out
    }

    /// Parses a document produced by [`DocumentCodec::render`].
    ///
    /// Blank text is an empty document. Anything else must contain the
    /// `scrape_configs:` line; every record after it must start with the
    /// three marker lines in order.
    pub fn parse(&self, text: &str) -> Result<Snippets> {
        let mut snippets = Snippets::new();
        if text.trim().is_empty() {
            return Ok(snippets);
        }

        let mut lines = text
            .lines()
            .enumerate()
            .map(|(i, line)| (i + 1, line))
            .filter(|(_, line)| !line.is_empty())
            .peekable();

        // Skip the header.
        if !lines.any(|(_, line)| line.trim_end() == SCRAPE_CONFIGS_LINE) {
            return Err(Error::malformed(
                text.lines().count(),
                format!("no '{}' line found", SCRAPE_CONFIGS_LINE),
            ));
        }

        while let Some((number, line)) = lines.next() {
            let container = marker_value(CONTAINER_MARKER, line).ok_or_else(|| {
                Error::malformed(number, format!("expected a '{}' line", CONTAINER_MARKER))
            })?;
            let namespace = expect_marker(&mut lines, NAMESPACE_MARKER, number)?;
            let labels = expect_marker(&mut lines, LABELS_MARKER, number)?;

            let mut body = Vec::new();
            while let Some((_, line)) =
                lines.next_if(|(_, line)| marker_value(CONTAINER_MARKER, line).is_none())
            {
                body.push(line);
            }

            let key = Key::new(namespace, labels, container);
            if snippets.contains_key(&key) {
                return Err(Error::malformed(
                    number,
                    format!("duplicate record for {}", key),
                ));
            }
            snippets.insert(key, body.join("\n"));
        }

        Ok(snippets)
    }
}

fn render_record(out: &mut String, key: &Key, snippet: &str) {
    for (marker, value) in [
        (CONTAINER_MARKER, key.container_name()),
        (NAMESPACE_MARKER, key.namespace()),
        (LABELS_MARKER, key.labels()),
    ] {
        out.push_str(marker);
        out.push(' ');
        out.push_str(value);
        out.push('\n');
    }
    for line in body_lines(snippet) {
        out.push_str(line);
        out.push('\n');
    }
    out.push('\n');
}

/// The lines of a snippet that make it into the document.
pub(crate) fn body_lines(snippet: &str) -> impl Iterator<Item = &str> {
    snippet.lines().filter(|l| !l.is_empty())
}

fn expect_marker<'a, I>(
    lines: &mut std::iter::Peekable<I>,
    marker: &str,
    record_line: usize,
) -> Result<&'a str>
where
    I: Iterator<Item = (usize, &'a str)>,
{
    match lines.next() {
        Some((number, line)) => marker_value(marker, line)
            .ok_or_else(|| Error::malformed(number, format!("expected a '{}' line", marker))),
        None => Err(Error::malformed(
            record_line,
            format!("record ends before its '{}' line", marker),
        )),
    }
}

/// Matches `<marker> <value>` (or a bare `<marker>` for an empty value) and
/// returns the value.
fn marker_value<'a>(marker: &str, line: &'a str) -> Option<&'a str> {
    parse_marker(marker, line).ok().map(|(_, value)| value)
}

fn parse_marker<'a>(marker: &str, line: &'a str) -> IResult<&'a str, &'a str> {
    preceded(tag(marker), alt((preceded(char(' '), rest), eof)))(line)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_marker() {
        assert_eq!(marker_value(CONTAINER_MARKER, "#@container c1"), Some("c1"));
        assert_eq!(marker_value(CONTAINER_MARKER, "#@container"), Some(""));
        assert_eq!(marker_value(LABELS_MARKER, "#@labels a=1, b=2,"), Some("a=1, b=2,"));
        assert_eq!(marker_value(CONTAINER_MARKER, "#@containers c1"), None);
        assert_eq!(marker_value(CONTAINER_MARKER, "# c1"), None);
    }

    #[test]
    fn test_render_empty() {
        let codec = DocumentCodec::default();
        assert_eq!(codec.render(&Snippets::new()), DEFAULT_HEADER);
    }

    #[test]
    fn test_render_record_layout() {
        let codec = DocumentCodec::default();
        let snippets = Snippets::from([(
            Key::new("ns1", "a=1,", "c1"),
            "- job_name: api\n  static_configs: []".to_string(),
        )]);
        let rendered = codec.render(&snippets);
        let records = rendered.strip_prefix(DEFAULT_HEADER).unwrap();
        assert_eq!(
            records,
            "#@container c1\n#@namespace ns1\n#@labels a=1,\n- job_name: api\n  static_configs: []\n\n"
        );
    }

    #[test]
    fn test_render_drops_blank_snippet_lines() {
        let codec = DocumentCodec::default();
        let snippets = Snippets::from([(Key::new("ns", "", "c"), "a: 1\n\nb: 2\n".to_string())]);
        let parsed = codec.parse(&codec.render(&snippets)).unwrap();
        assert_eq!(parsed[&Key::new("ns", "", "c")], "a: 1\nb: 2");
    }

    #[test]
    fn test_parse_blank_text_is_empty() {
        let codec = DocumentCodec::default();
        assert!(codec.parse("").unwrap().is_empty());
        assert!(codec.parse("  \n\n").unwrap().is_empty());
    }

    #[test]
    fn test_parse_without_header_end_fails() {
        let codec = DocumentCodec::default();
        let err = codec.parse("client:\n  timeout: 10s\n").unwrap_err();
        assert!(matches!(err, Error::MalformedDocument { .. }));
    }

    #[test]
    fn test_parse_body_before_first_record_fails() {
        let codec = DocumentCodec::default();
        let text = format!("{}- job_name: stray\n", DEFAULT_HEADER);
        let err = codec.parse(&text).unwrap_err();
        assert!(matches!(err, Error::MalformedDocument { line: 17, .. }));
    }

    #[test]
    fn test_parse_out_of_order_markers_fails() {
        let codec = DocumentCodec::default();
        let text = format!(
            "{}#@container c1\n#@labels a=1,\n#@namespace ns1\nscrape: 1\n",
            DEFAULT_HEADER
        );
        assert!(matches!(
            codec.parse(&text),
            Err(Error::MalformedDocument { .. })
        ));
    }

    #[test]
    fn test_parse_truncated_record_fails() {
        let codec = DocumentCodec::default();
        let text = format!("{}#@container c1\n#@namespace ns1\n", DEFAULT_HEADER);
        assert!(matches!(
            codec.parse(&text),
            Err(Error::MalformedDocument { .. })
        ));
    }

    #[test]
    fn test_parse_duplicate_record_fails() {
        let codec = DocumentCodec::default();
        let record = "#@container c1\n#@namespace ns1\n#@labels a=1,\nscrape: 1\n\n";
        let text = format!("{}{}{}", DEFAULT_HEADER, record, record);
        assert!(matches!(
            codec.parse(&text),
            Err(Error::MalformedDocument { .. })
        ));
    }

    #[test]
    fn test_parse_empty_body() {
        let codec = DocumentCodec::default();
        let text = format!(
            "{}#@container c1\n#@namespace ns1\n#@labels\n\n#@container c2\n#@namespace ns1\n#@labels \nx: 1\n",
            DEFAULT_HEADER
        );
        let parsed = codec.parse(&text).unwrap();
        assert_eq!(parsed[&Key::new("ns1", "", "c1")], "");
        assert_eq!(parsed[&Key::new("ns1", "", "c2")], "x: 1");
    }

    #[test]
    fn test_custom_header() {
        let codec = DocumentCodec::with_header("server:\n  http_listen_port: 9080\nscrape_configs:\n\n").unwrap();
        assert_eq!(codec.header(), "server:\n  http_listen_port: 9080\nscrape_configs:\n");

        let snippets = Snippets::from([(Key::new("ns", "a=b,", "c"), "x: 1".to_string())]);
        assert_eq!(codec.parse(&codec.render(&snippets)).unwrap(), snippets);
    }

    #[test]
    fn test_custom_header_must_end_with_scrape_configs() {
        let err = DocumentCodec::with_header("server:\n  http_listen_port: 9080\n").unwrap_err();
        assert!(matches!(err, Error::InvalidConfiguration(_)));
    }
}
