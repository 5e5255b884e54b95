use crate::i18n::{LocaleInfo, Localizer};

/// Best supported match for an `Accept-Language` header.
///
/// Entries are tried by descending q-value; each first looks for an exact tag
/// match, then for a supported locale sharing the primary subtag (`de-AT`
/// matches `de`).
pub fn negotiate(accept_language: &str, supported: &[LocaleInfo]) -> Option<String> {
    let mut ranges: Vec<(String, f32)> = accept_language
        .split(',')
        .filter_map(|entry| {
            let mut parts = entry.trim().split(';');
            let tag = parts.next()?.trim().to_ascii_lowercase();
            if tag.is_empty() || tag == "*" {
                return None;
            }
            let quality = parts
                .filter_map(|param| param.trim().strip_prefix("q="))
                .find_map(|q| q.trim().parse::<f32>().ok())
                .unwrap_or(1.0);
            (quality > 0.0).then_some((tag, quality))
        })
        .collect();
    // stable sort keeps header order for equal weights
    ranges.sort_by(|a, b| b.1.total_cmp(&a.1));

    ranges.iter().find_map(|(tag, _)| {
        let exact = supported
            .iter()
            .find(|info| info.language.eq_ignore_ascii_case(tag));
        let primary = tag.split('-').next().unwrap_or(tag);
        exact
            .or_else(|| {
                supported
                    .iter()
                    .find(|info| info.language.eq_ignore_ascii_case(primary))
            })
            .map(|info| info.language.clone())
    })
}

/// Locale for a request: the session's stored choice, else the client's
/// declared preference, else the catalog default.
pub fn resolve_locale(
    stored: Option<&str>,
    accept_language: Option<&str>,
    localizer: &dyn Localizer,
) -> String {
    if let Some(locale) = stored.filter(|locale| localizer.is_supported(locale)) {
        return locale.to_string();
    }
    accept_language
        .and_then(|header| negotiate(header, &localizer.supported()))
        .unwrap_or_else(|| localizer.default_locale().to_string())
}
