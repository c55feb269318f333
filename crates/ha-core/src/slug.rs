//! Slug generation for entity object ids

/// Turn free text into an object_id candidate
///
/// ASCII letters are lowercased and kept, digits are kept, every other run of
/// characters becomes a single `_`. Leading and trailing separators are
/// dropped. Text without any ASCII alphanumerics yields `"unknown"`.
pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    let mut pending_sep = false;

    for c in text.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_sep && !slug.is_empty() {
                slug.push('_');
            }
            pending_sep = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            pending_sep = true;
        }
    }

    if slug.is_empty() {
        "unknown".to_string()
    } else {
        slug
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slugify_ascii() {
        assert_eq!(slugify("Seoul Station 140"), "seoul_station_140");
        assert_eq!(slugify("  N26--bus  "), "n26_bus");
    }

    #[test]
    fn test_slugify_hangul_is_dropped() {
        assert_eq!(slugify("서울역 140"), "140");
        assert_eq!(slugify("마포09"), "09");
        assert_eq!(slugify("서울역"), "unknown");
    }
}
