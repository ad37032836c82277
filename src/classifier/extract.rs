//! Positional pattern extraction from raw page HTML.
//!
//! The booking site does not expose structured data, so links and dates are
//! cut out of the markup around fixed anchor strings. Every index used here
//! is bounds-checked; a missing anchor yields `None`, never a panic.
//!
//! Anchors:
//!
//! | anchor                                | yields                           |
//! |---------------------------------------|----------------------------------|
//! | `searchForDaySlots` (last occurrence) | link to the day page of a slot   |
//! | `Number of available tests between`   | start of the displayed period    |
//! | `_eventId=reserveSlot` (every one)    | claim links on a day page        |
//! | `data-sitekey="` / `sitekey=`         | challenge site key               |

use chrono::NaiveDate;

/// Marker present in links to a day with free slots.
pub const DAY_SLOT_MARKER: &str = "searchForDaySlots";

/// Marker present in every claim link.
pub const CLAIM_MARKER: &str = "_eventId=reserveSlot";

/// Phrase preceding the start date of the displayed period.
pub const PERIOD_ANCHOR: &str = "Number of available tests between";

/// Entity terminating the period start date.
pub const PERIOD_TERMINATOR: &str = "&ndash;";

const HREF_OPEN: &str = "href=\"";

/// Swappable strategy for pulling values out of response bodies.
pub trait PatternExtractor: Send + Sync {
    /// Link of the last day-slot entry in a weekly search response.
    fn slot_link(&self, body: &str) -> Option<String>;

    /// Start date of the period a weekly search response covers.
    fn period_start(&self, body: &str) -> Option<NaiveDate>;

    /// Every claim link on a day page, in document order.
    fn claim_links(&self, body: &str) -> Vec<String>;

    /// Site key of an embedded challenge widget.
    fn sitekey(&self, body: &str) -> Option<String>;
}

/// Default extractor working on the anchors listed in the module docs.
#[derive(Debug, Default, Clone, Copy)]
pub struct MarkerExtractor;

impl PatternExtractor for MarkerExtractor {
    fn slot_link(&self, body: &str) -> Option<String> {
        let pos = body.rfind(DAY_SLOT_MARKER)?;
        link_near(body, pos, true)
    }

    fn period_start(&self, body: &str) -> Option<NaiveDate> {
        let anchor = body.find(PERIOD_ANCHOR)?;
        let from = anchor + PERIOD_ANCHOR.len();
        let to = from + body.get(from..)?.find(PERIOD_TERMINATOR)?;
        parse_loose_date(&strip_tags(body.get(from..to)?))
    }

    fn claim_links(&self, body: &str) -> Vec<String> {
        body.match_indices(CLAIM_MARKER)
            .filter_map(|(pos, _)| link_near(body, pos, false))
            .collect()
    }

    fn sitekey(&self, body: &str) -> Option<String> {
        if let Some(start) = body.find("data-sitekey=\"") {
            let from = start + "data-sitekey=\"".len();
            let len = body.get(from..)?.find('"')?;
            return non_empty(&body[from..from + len]);
        }
        let start = body.find("sitekey=")?;
        let from = start + "sitekey=".len();
        let rest = body.get(from..)?;
        let len = rest
            .find(|c: char| c == '&' || c == '"' || c == '\'' || c.is_whitespace())
            .unwrap_or(rest.len());
        non_empty(&rest[..len])
    }
}

fn non_empty(s: &str) -> Option<String> {
    (!s.is_empty()).then(|| s.to_string())
}

/// Extract the link around a marker at `pos`.
///
/// The nearest `href="` before the marker is used when the marker sits
/// inside that attribute value. Otherwise, when `allow_following` is set,
/// the first `href="` after the marker is used.
fn link_near(body: &str, pos: usize, allow_following: bool) -> Option<String> {
    if let Some(open) = body.get(..pos)?.rfind(HREF_OPEN) {
        let start = open + HREF_OPEN.len();
        if let Some(len) = body.get(start..)?.find('"') {
            let end = start + len;
            if end >= pos {
                return non_empty(&decode_amp(&body[start..end]));
            }
        }
    }

    if !allow_following {
        return None;
    }

    let open = pos + body.get(pos..)?.find(HREF_OPEN)?;
    let start = open + HREF_OPEN.len();
    let end = start + body.get(start..)?.find('"')?;
    non_empty(&decode_amp(&body[start..end]))
}

/// Decode the only entity the site uses inside attribute values.
#[must_use]
pub fn decode_amp(s: &str) -> String {
    s.replace("&amp;", "&")
}

/// Replace every `<...>` tag with a space.
fn strip_tags(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut in_tag = false;
    for c in s.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => {
                in_tag = false;
                out.push(' ');
            }
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out
}

/// Parse `23 March 2026`, `23rd March 2026` or `23 Mar 2026`.
///
/// # Example
///
/// ```
/// use chrono::NaiveDate;
/// use slotwatch::classifier::extract::parse_loose_date;
///
/// assert_eq!(parse_loose_date("1st  June 2026"), NaiveDate::from_ymd_opt(2026, 6, 1));
/// assert_eq!(parse_loose_date("June"), None);
/// ```
#[must_use]
pub fn parse_loose_date(text: &str) -> Option<NaiveDate> {
    let tokens: Vec<&str> = text
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|t| !t.is_empty())
        .collect();
    let [day, month, year] = tokens.as_slice() else {
        return None;
    };
    let day = day.trim_end_matches(|c: char| c.is_ascii_alphabetic());
    let candidate = format!("{day} {month} {year}");
    NaiveDate::parse_from_str(&candidate, "%d %B %Y")
        .or_else(|_| NaiveDate::parse_from_str(&candidate, "%d %b %Y"))
        .ok()
}
