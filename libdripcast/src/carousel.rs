//! Carousel navigation
//!
//! Navigation is stateless: each control carries the complete slide list and
//! the target index, encoded as `carousel|<json slides>|<index>`. Indices wrap
//! in both directions.

use crate::types::Slide;

pub const PAYLOAD_PREFIX: &str = "carousel";

/// Decoded navigation payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavPayload {
    pub slides: Vec<Slide>,
    pub index: i64,
}

impl NavPayload {
    pub fn new(slides: Vec<Slide>, index: i64) -> Self {
        Self { slides, index }
    }

    pub fn encode(&self) -> String {
        // Serializing plain string fields cannot fail
        let slides = serde_json::to_string(&self.slides).unwrap_or_else(|_| "[]".to_string());
        format!("{}|{}|{}", PAYLOAD_PREFIX, slides, self.index)
    }
}

/// Decode a callback payload
///
/// Returns `None` for anything that is not a well-formed carousel payload:
/// wrong prefix, missing parts, invalid JSON, a non-integer index or an empty
/// slide list. The JSON part may itself contain `|`.
pub fn parse_payload(data: &str) -> Option<NavPayload> {
    let (prefix, rest) = data.split_once('|')?;
    if prefix != PAYLOAD_PREFIX {
        return None;
    }
    let (json, index) = rest.rsplit_once('|')?;

    let slides: Vec<Slide> = serde_json::from_str(json).ok()?;
    if slides.is_empty() {
        return None;
    }
    let index = index.trim().parse::<i64>().ok()?;

    Some(NavPayload { slides, index })
}

/// One rendered carousel position
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavFrame {
    pub slide: Slide,
    /// Normalized index of `slide`
    pub index: usize,
    /// Target of the back control
    pub back: usize,
    /// Target of the forward control
    pub forward: usize,
}

/// Render position `index` of `slides`, wrapping out-of-range indices
///
/// Returns `None` for an empty slide list.
pub fn render(slides: &[Slide], index: i64) -> Option<NavFrame> {
    if slides.is_empty() {
        return None;
    }
    let len = slides.len() as i64;
    let current = index.rem_euclid(len);

    Some(NavFrame {
        slide: slides[current as usize].clone(),
        index: current as usize,
        back: (current - 1).rem_euclid(len) as usize,
        forward: (current + 1).rem_euclid(len) as usize,
    })
}

/// Caption of a carousel slide: post text and slide text separated by a blank line
pub fn caption(post_text: &str, slide_text: &str) -> String {
    match (post_text.trim().is_empty(), slide_text.trim().is_empty()) {
        (false, false) => format!("{}\n\n{}", post_text, slide_text),
        (false, true) => post_text.to_string(),
        (true, false) => slide_text.to_string(),
        (true, true) => String::new(),
    }
}
