use anyhow::{Context, Result};
use regex::Regex;

const MIN_GRIEVANCE_CHARS: usize = 30;
const MIN_GRIEVANCE_TOKENS: usize = 10;

/// A candidate must mention at least one of these to count as a complaint.
const COMPLAINT_KEYWORDS: &[&str] = &[
    "problem", "issue", "complaint", "request", "not working", "broken", "damaged", "delay",
    "failed", "poor", "need", "water", "road", "electricity", "garbage", "sewage", "streetlight",
    "pothole", "drainage", "supply", "service", "unsafe", "health", "sanitation", "flooding",
    "repair", "maintenance", "construction", "traffic", "signal", "stray", "dogs", "animals",
    "park", "school",
];

/// Splits concatenated complaint text into individual grievances and
/// screens out headers and boilerplate. Strategies cascade: explicit
/// `GRIEVANCE:` markers, numbered list markers, paragraph boundaries,
/// then the whole text; the first strategy producing at least one
/// surviving grievance wins.
#[derive(Debug)]
pub struct GrievanceExtractor {
    marker: Regex,
    numbered: Regex,
    headers: Vec<Regex>,
    reference_prefixes: Vec<Regex>,
    openings: Vec<Regex>,
}

impl GrievanceExtractor {
    pub fn new() -> Result<Self> {
        let headers = [
            r"(?i)grievance\s+collection",
            r"(?i)^\s*batch\b",
            r"(?i)municipal\s+corporation",
            r"(?i)^\s*ward\s+\d+\s*$",
            r"(?i)^\s*date\s*:",
            r"^\s*[-=_*~]{3,}\s*$",
            r"(?i)^[\s\-=_*~]*(?:january|february|march|april|may|june|july|august|september|october|november|december)\s+\d{4}[\s\-=_*~]*$",
            r"(?i)^\s*submitted\s+by\s*:",
            r"(?i)^\s*page\s+\d+",
            r"(?i)total\s+grievances",
        ];
        let reference_prefixes = [
            r"(?i)^grievance(?:\s+[a-z0-9#\-]+)?\s*:\s*",
            r"^\s*(?:\d+[.)]|\[\d+\])\s+",
            r"(?i)^(?:ref(?:erence)?|ticket|complaint)\s*(?:no\.?|number|#)?\s*[:\-]?\s*[a-z0-9/\-]+\s*[:\-]\s*",
            r"^\s*\d{1,2}[/\-]\d{1,2}[/\-]\d{2,4}\s*[:\-]?\s*",
        ];
        let openings = [
            r"(?i)^dear\s+(?:sir\s*/\s*madam|sir|madam)\s*[,.]?\s*",
            r"(?i)^respected\s+(?:sir|madam)\s*[,.]?\s*",
            r"(?i)^i\s+am\s+writing\s+to\s+(?:inform\s+you\s+(?:that|about)|complain\s+about|bring\s+to\s+your\s+(?:notice|attention))\s*",
            r"(?i)^with\s+(?:due\s+respect|reference\s+to\s+the\s+above)\s*[,.]?\s*",
            r"(?i)^this\s+is\s+to\s+(?:inform\s+you\s+that|bring\s+to\s+your\s+notice\s+that)\s*",
            r"(?i)^it\s+is\s+(?:submitted|stated)\s+that\s+",
            r"(?i)^kindly\s+note\s+that\s+",
        ];

        Ok(Self {
            marker: Regex::new(r"(?im)^\s*grievance(?:\s+[a-z0-9#\-]+)?\s*:")
                .context("failed to compile grievance marker regex")?,
            numbered: Regex::new(r"(?m)^\s*(?:\d+[.)]|\[\d+\])\s+")
                .context("failed to compile numbered marker regex")?,
            headers: compile_all(&headers).context("failed to compile header patterns")?,
            reference_prefixes: compile_all(&reference_prefixes)
                .context("failed to compile reference prefix patterns")?,
            openings: compile_all(&openings).context("failed to compile opening patterns")?,
        })
    }

    /// Split one raw text block into validated grievance texts.
    pub fn extract(&self, text: &str) -> Vec<String> {
        let strategies = [
            Self::split_on_markers,
            Self::split_on_numbering,
            Self::split_on_paragraphs,
            Self::whole_text,
        ];

        for strategy in strategies {
            let survivors: Vec<String> = strategy(self, text)
                .into_iter()
                .map(|candidate| candidate.trim().to_string())
                .filter(|candidate| self.is_valid(candidate))
                .filter_map(|candidate| self.extract_core(&candidate))
                .collect();
            if !survivors.is_empty() {
                return survivors;
            }
        }

        Vec::new()
    }

    fn split_on_markers(&self, text: &str) -> Vec<String> {
        split_at_match_starts(&self.marker, text)
    }

    fn split_on_numbering(&self, text: &str) -> Vec<String> {
        split_at_match_starts(&self.numbered, text)
    }

    fn split_on_paragraphs(&self, text: &str) -> Vec<String> {
        text.split("\n\n")
            .flat_map(|block| block.split("\r\n\r\n"))
            .map(ToOwned::to_owned)
            .collect()
    }

    fn whole_text(&self, text: &str) -> Vec<String> {
        vec![text.to_string()]
    }

    /// Length, token count, header screen, complaint keyword.
    pub fn is_valid(&self, candidate: &str) -> bool {
        let trimmed = candidate.trim();
        if trimmed.chars().count() < MIN_GRIEVANCE_CHARS {
            return false;
        }
        if trimmed.split_whitespace().count() < MIN_GRIEVANCE_TOKENS {
            return false;
        }
        if self.headers.iter().any(|header| header.is_match(trimmed)) {
            return false;
        }

        let lowered = trimmed.to_lowercase();
        COMPLAINT_KEYWORDS
            .iter()
            .any(|keyword| lowered.contains(keyword))
    }

    /// Strip leading reference prefixes and formulaic openings; the
    /// remainder must still be long enough to stand as a grievance.
    pub fn extract_core(&self, candidate: &str) -> Option<String> {
        let mut core = candidate.trim();

        loop {
            let mut stripped = false;
            for prefix in self.reference_prefixes.iter().chain(self.openings.iter()) {
                if let Some(found) = prefix.find(core) {
                    if found.start() == 0 && found.end() > 0 {
                        core = core[found.end()..].trim_start();
                        stripped = true;
                    }
                }
            }
            if !stripped {
                break;
            }
        }

        let core = core.trim();
        if core.chars().count() < MIN_GRIEVANCE_CHARS {
            return None;
        }
        Some(core.to_string())
    }
}

fn compile_all(patterns: &[&str]) -> Result<Vec<Regex>> {
    patterns
        .iter()
        .map(|pattern| {
            Regex::new(pattern).with_context(|| format!("failed to compile pattern: {pattern}"))
        })
        .collect()
}

/// Split `text` at the start offset of every match, discarding nothing:
/// the leading segment before the first match is kept so the validator
/// can reject it on its own merits.
fn split_at_match_starts(pattern: &Regex, text: &str) -> Vec<String> {
    let starts: Vec<usize> = pattern.find_iter(text).map(|found| found.start()).collect();
    if starts.is_empty() {
        return Vec::new();
    }

    let mut segments = Vec::with_capacity(starts.len() + 1);
    let mut cursor = 0;
    for start in starts {
        if start > cursor {
            segments.push(text[cursor..start].to_string());
        }
        cursor = start;
    }
    segments.push(text[cursor..].to_string());
    segments
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extractor() -> GrievanceExtractor {
        GrievanceExtractor::new().expect("extractor regexes compile")
    }

    #[test]
    fn splits_on_grievance_markers() {
        let e = extractor();
        let text = "GRIEVANCE 1: The water supply in Sector 15 has been irregular for \
                    two weeks and the overhead tank is leaking badly.\n\
                    GRIEVANCE 2: Garbage is not collected from the market area and the \
                    dump near the school is overflowing.";
        let out = e.extract(text);
        assert_eq!(out.len(), 2);
        assert!(out[0].starts_with("The water supply"));
        assert!(out[1].starts_with("Garbage is not collected"));
    }

    #[test]
    fn splits_on_numbered_markers() {
        let e = extractor();
        let text = "1. The street light near the main gate is not working for ten days \
                    and the lane is unsafe at night.\n\
                    2. The garbage dump behind the vegetable market is overflowing and \
                    causing a health hazard for residents.";
        let out = e.extract(text);
        assert_eq!(out.len(), 2);
        assert!(out[0].starts_with("The street light"));
        assert!(out[1].starts_with("The garbage dump"));
    }

    #[test]
    fn falls_back_to_whole_text() {
        let e = extractor();
        let text = "The drainage line in Block C overflows every morning and sewage \
                    water enters the houses; urgent repair is needed.";
        let out = e.extract(text);
        assert_eq!(out.len(), 1);
        assert!(out[0].starts_with("The drainage line"));
    }

    #[test]
    fn rejects_headers_and_metadata() {
        let e = extractor();
        for header in [
            "Municipal Corporation",
            "Ward 5",
            "--- December 2024 ---",
            "Date: 12/12/2024",
            "Submitted by: Office of the Commissioner",
            "Total grievances received this month: 42",
        ] {
            assert!(e.extract(header).is_empty(), "{header:?} must be rejected");
        }
    }

    #[test]
    fn keeps_only_the_real_complaint_among_headers() {
        let e = extractor();
        let text = "Municipal Corporation\n\nWard 5\n\n--- December 2024 ---\n\n\
                    The water supply in Sector 15 has been irregular for two weeks and \
                    the overhead tank near the park is leaking badly.";
        let out = e.extract(text);
        assert_eq!(out.len(), 1);
        assert!(out[0].starts_with("The water supply"));
    }

    #[test]
    fn requires_a_complaint_keyword() {
        let e = extractor();
        let text = "We convey our best wishes to the entire staff on the occasion of \
                    the annual day celebration next Friday evening.";
        assert!(e.extract(text).is_empty());
    }

    #[test]
    fn strips_reference_prefixes_and_openings() {
        let e = extractor();
        let candidate = "GRIEVANCE 3: Dear Sir, I am writing to inform you that the \
                         drainage in Block C overflows daily and floods the lane.";
        let core = e.extract_core(candidate).expect("core survives");
        assert!(core.starts_with("the drainage in Block C"), "got {core:?}");
    }

    #[test]
    fn rejects_candidates_whose_core_collapses() {
        let e = extractor();
        let candidate = "Dear Sir, I am writing to inform you that water failed";
        assert!(e.extract_core(candidate).is_none());
    }

    #[test]
    fn short_or_sparse_candidates_are_invalid() {
        let e = extractor();
        assert!(!e.is_valid("water problem"));
        assert!(!e.is_valid("water water water water water water water water water"));
    }
}
