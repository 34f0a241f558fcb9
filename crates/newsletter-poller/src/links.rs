//! Finding the invitation link that belongs to an event block.
//!
//! Plain-text bodies sometimes carry the link inline, `בהזמנה (https://...)`.
//! Otherwise the HTML body is consulted: its labelled anchors appear in the
//! same order as the label mentions in the text, so the n-th mention anywhere
//! in the message owns the n-th anchor. A block takes the anchors of the
//! mentions it contains and prefers the earliest configured label.

use crate::config::ExtractionConfig;
use crate::error::ConfigError;
use regex::Regex;
use scraper::{Html, Selector};

/// A labelled `<a>` element. `href` is `None` for non-HTTP targets, which
/// still occupy their slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Anchor {
    pub label: usize,
    pub href: Option<String>,
}

pub struct InvitationLinkFinder {
    labels: Vec<String>,
    mention: Option<Regex>,
    inline: Option<Regex>,
}

impl InvitationLinkFinder {
    pub fn new(config: &ExtractionConfig) -> Result<Self, ConfigError> {
        let labels: Vec<String> = config
            .invitation_labels
            .iter()
            .filter(|l| !l.is_empty())
            .cloned()
            .collect();

        if labels.is_empty() {
            return Ok(Self {
                labels,
                mention: None,
                inline: None,
            });
        }

        let alternatives = labels
            .iter()
            .map(|l| regex::escape(l))
            .collect::<Vec<_>>()
            .join("|");
        let mention = Regex::new(&alternatives)?;
        let inline = Regex::new(&format!(
            r"(?:{})\s*[(<]\s*(https?://[^\s)>]+)\s*[)>]",
            alternatives
        ))?;

        Ok(Self {
            labels,
            mention: Some(mention),
            inline: Some(inline),
        })
    }

    /// Byte offset and label index of every label occurrence, in order
    fn mentions<'t>(&'t self, text: &'t str) -> impl Iterator<Item = (usize, usize)> + 't {
        self.mention.iter().flat_map(move |re| {
            re.find_iter(text).filter_map(move |m| {
                self.labels
                    .iter()
                    .position(|l| l == m.as_str())
                    .map(|label| (m.start(), label))
            })
        })
    }

    /// A `label (URL)` pair written out in the block
    pub fn inline_link(&self, block: &str) -> Option<String> {
        let caps = self.inline.as_ref()?.captures(block)?;
        Some(caps[1].to_string())
    }

    /// Every anchor whose text carries a label, in document order
    pub fn html_anchors(&self, html: &str) -> Vec<Anchor> {
        let Ok(selector) = Selector::parse("a[href]") else {
            return Vec::new();
        };

        let document = Html::parse_document(html);
        let anchors: Vec<Anchor> = document
            .select(&selector)
            .filter_map(|a| {
                let text: String = a.text().collect();
                let (_, label) = self.mentions(&text).next()?;
                let href = a
                    .value()
                    .attr("href")
                    .map(str::trim)
                    .filter(|h| h.starts_with("http://") || h.starts_with("https://"))
                    .map(str::to_string);
                Some(Anchor { label, href })
            })
            .collect();
        anchors
    }

    /// Pairs label mentions in the normalized `text` with the HTML anchors
    pub fn for_message(&self, text: &str, html: Option<&str>) -> MessageLinks<'_> {
        let anchors = html.map(|h| self.html_anchors(h)).unwrap_or_default();
        let mentions: Vec<usize> = self.mentions(text).map(|(offset, _)| offset).collect();
        if !anchors.is_empty() && anchors.len() != mentions.len() {
            tracing::debug!(
                "{} invitation mentions but {} labelled anchors",
                mentions.len(),
                anchors.len()
            );
        }

        MessageLinks {
            finder: self,
            mentions,
            anchors,
        }
    }
}

pub struct MessageLinks<'a> {
    finder: &'a InvitationLinkFinder,
    mentions: Vec<usize>,
    anchors: Vec<Anchor>,
}

impl MessageLinks<'_> {
    /// Link for the block found at byte offset `start` of the message text
    pub fn link_for(&self, start: usize, block: &str) -> Option<String> {
        if let Some(link) = self.finder.inline_link(block) {
            return Some(link);
        }

        let end = start + block.len();
        let len = self.anchors.len();
        let first = self.mentions.partition_point(|&m| m < start).min(len);
        let last = self.mentions.partition_point(|&m| m < end).min(len);

        self.anchors[first..last]
            .iter()
            .filter(|a| a.href.is_some())
            .min_by_key(|a| a.label)
            .and_then(|a| a.href.clone())
    }
}
