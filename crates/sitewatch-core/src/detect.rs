use regex::bytes::Regex;

use crate::hash::Digest;

pub const DEFAULT_MARKER: &str = "Buy Tickets";

/// Outcome of comparing a fresh document against the previous snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Change {
    pub previous: Digest,
    pub current: Digest,
}

impl Change {
    /// Byte-exact digest inequality; no semantic diffing.
    pub fn changed(&self) -> bool {
        self.previous != self.current
    }
}

pub fn detect(previous: Digest, new_bytes: &[u8]) -> Change {
    Change {
        previous,
        current: Digest::of(new_bytes),
    }
}

/// Literal search for an `alt` attribute announcing tickets on sale.
#[derive(Debug, Clone)]
pub struct MarkerDetector {
    pattern: Regex,
}

impl MarkerDetector {
    /// Match `alt="<text>"` or `alt='<text>'`, case-sensitive.
    pub fn new(alt_text: &str) -> Self {
        let pattern = format!(r#"alt=['"]{}['"]"#, regex::escape(alt_text));
        Self {
            // Escaped literal inside a fixed frame always compiles.
            pattern: Regex::new(&pattern).expect("escaped marker pattern"),
        }
    }

    pub fn has_marker(&self, document: &[u8]) -> bool {
        self.pattern.is_match(document)
    }
}

impl Default for MarkerDetector {
    fn default() -> Self {
        Self::new(DEFAULT_MARKER)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WITH_BUTTON: &str = "<html>\n<body>\n<img id=\"ctl00_Imagepng3\" class=\"hand\" src=\"../../../App_Themes/Default/Images/buy-tickets.png\" alt=\"Buy Tickets\" style=\"border-width:0px;\" />\n</body>\n</html>\n";
    const WITHOUT_BUTTON: &str = "<html>\n<body>\n<h2>test</h2>\n</body>\n</html>\n";

    #[test]
    fn marker_found() {
        assert!(MarkerDetector::default().has_marker(WITH_BUTTON.as_bytes()));
    }

    #[test]
    fn marker_absent() {
        assert!(!MarkerDetector::default().has_marker(WITHOUT_BUTTON.as_bytes()));
    }

    #[test]
    fn marker_single_quotes_and_case() {
        let d = MarkerDetector::default();
        assert!(d.has_marker(b"<img alt='Buy Tickets'>"));
        assert!(!d.has_marker(b"<img alt=\"buy tickets\">"));
        assert!(!d.has_marker(b"<p>Buy Tickets</p>"));
    }

    #[test]
    fn custom_marker_is_escaped() {
        let d = MarkerDetector::new("Tickets (Sold Out?)");
        assert!(d.has_marker(b"alt=\"Tickets (Sold Out?)\""));
        assert!(!d.has_marker(b"alt=\"Tickets Sold Out\""));
    }

    #[test]
    fn identical_document_is_unchanged() {
        let doc = WITHOUT_BUTTON.as_bytes();
        let change = detect(Digest::of(doc), doc);
        assert!(!change.changed());
    }

    #[test]
    fn different_document_is_changed() {
        let change = detect(
            Digest::of(WITHOUT_BUTTON.as_bytes()),
            WITH_BUTTON.as_bytes(),
        );
        assert!(change.changed());
        assert_eq!(change.current, Digest::of(WITH_BUTTON.as_bytes()));
    }

    #[test]
    fn first_run_empty_baseline_is_changed() {
        assert!(detect(Digest::empty(), b"<h2>test</h2>").changed());
        assert!(!detect(Digest::empty(), b"").changed());
    }
}
