use std::collections::BTreeMap;
use std::fmt;

/// Pixel sizes for the legacy `1..=7` font size scale.
pub const LEGACY_FONT_SIZES_PX: [u32; 7] = [10, 13, 16, 18, 24, 32, 48];

const CSS_LENGTH_UNITS: &[&str] = &["px", "pt", "rem", "em", "%"];

/// Inline CSS declarations, kept in property order so serialisation is canonical.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StyleProps(BTreeMap<String, String>);

impl StyleProps {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, property: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(property, value);
        self
    }

    pub fn insert(&mut self, property: impl Into<String>, value: impl Into<String>) {
        self.0
            .insert(property.into().trim().to_ascii_lowercase(), value.into());
    }

    pub fn get(&self, property: &str) -> Option<&str> {
        self.0.get(property).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Overlays `other` on top of `self`; properties in `other` win.
    pub fn merge(&mut self, other: &StyleProps) {
        for (k, v) in &other.0 {
            self.0.insert(k.clone(), v.clone());
        }
    }

    /// Parses `prop: value; prop: value`. Declarations without a colon or with an empty
    /// value are dropped.
    pub fn parse(css: &str) -> Self {
        let mut props = Self::new();
        for declaration in css.split(';') {
            let Some((property, value)) = declaration.split_once(':') else {
                continue;
            };
            let property = property.trim();
            let value = value.trim();
            if property.is_empty() || value.is_empty() {
                continue;
            }
            props.insert(property, value);
        }
        props
    }

    pub fn to_css(&self) -> String {
        self.0
            .iter()
            .map(|(k, v)| format!("{k}: {v}"))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

impl fmt::Display for StyleProps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_css())
    }
}

pub fn legacy_font_size(value: &str) -> Option<u8> {
    match value.trim().parse::<u8>() {
        Ok(size @ 1..=7) => Some(size),
        _ => None,
    }
}

pub fn legacy_font_size_px(size: u8) -> Option<u32> {
    LEGACY_FONT_SIZES_PX
        .get(usize::from(size).checked_sub(1)?)
        .copied()
}

/// Maps a toolbar font size value to a CSS `font-size`.
///
/// Legacy sizes use the `1..=7` scale, other bare numbers are pixels, and values that
/// already carry a unit are kept as given.
pub fn font_size_css(value: &str) -> Option<String> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if let Some(size) = legacy_font_size(value) {
        return legacy_font_size_px(size).map(|px| format!("{px}px"));
    }
    if let Ok(number) = value.parse::<f64>() {
        return (number.is_finite() && number > 0.0).then(|| format!("{value}px"));
    }
    let unit = CSS_LENGTH_UNITS
        .iter()
        .find(|unit| value.to_ascii_lowercase().ends_with(*unit))?;
    let number = value[..value.len() - unit.len()].trim();
    match number.parse::<f64>() {
        Ok(n) if n.is_finite() && n > 0.0 => Some(value.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_sorts_and_trims_declarations() {
        let props = StyleProps::parse(" Color : red ;font-size:18px;; bogus ; width: ");
        assert_eq!(props.to_css(), "color: red; font-size: 18px");
    }

    #[test]
    fn merge_prefers_overlay() {
        let mut base = StyleProps::new().with("color", "red").with("font-size", "12px");
        base.merge(&StyleProps::new().with("color", "blue"));
        assert_eq!(base.get("color"), Some("blue"));
        assert_eq!(base.get("font-size"), Some("12px"));
    }

    #[test]
    fn font_size_css_handles_each_notation() {
        assert_eq!(font_size_css("3").as_deref(), Some("16px"));
        assert_eq!(font_size_css("7").as_deref(), Some("48px"));
        assert_eq!(font_size_css("18").as_deref(), Some("18px"));
        assert_eq!(font_size_css("1.5em").as_deref(), Some("1.5em"));
        assert_eq!(font_size_css("120%").as_deref(), Some("120%"));
        assert_eq!(font_size_css("2rem").as_deref(), Some("2rem"));
        assert_eq!(font_size_css("0"), None);
        assert_eq!(font_size_css("large"), None);
        assert_eq!(font_size_css(""), None);
    }
}
