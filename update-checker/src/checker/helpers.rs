use crate::db::SavedRecord;
use crate::info::{InfoKey, InfoSnapshot};
use chrono::{DateTime, NaiveDate, NaiveDateTime};

/// Changed iff the fresh latest version is present and differs from the saved one.
pub fn version_changed(fresh: &InfoSnapshot, saved: Option<&SavedRecord>) -> bool {
    let Some(latest) = fresh.latest_version() else {
        return false;
    };

    match saved {
        None => true,
        Some(saved) => saved.info.latest_version() != Some(latest),
    }
}

/// Like [`version_changed`], but a build that is not strictly newer than the
/// saved one is never reported. Unparsable dates fall back to the plain rule.
pub fn version_changed_with_newer_date(fresh: &InfoSnapshot, saved: Option<&SavedRecord>) -> bool {
    if !version_changed(fresh, saved) {
        return false;
    }

    let saved_date = saved.and_then(|s| s.info.get(InfoKey::BuildDate)).and_then(parse_build_date);
    let fresh_date = fresh.get(InfoKey::BuildDate).and_then(parse_build_date);

    match (fresh_date, saved_date) {
        (Some(fresh), Some(saved)) => fresh > saved,
        _ => true,
    }
}

/// Parse the date formats sources commonly publish, normalized to UTC.
pub fn parse_build_date(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();

    if let Ok(date) = DateTime::parse_from_rfc3339(text) {
        return Some(date.naive_utc());
    }

    if let Ok(date) = DateTime::parse_from_rfc2822(text) {
        return Some(date.naive_utc());
    }

    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(date) = NaiveDateTime::parse_from_str(text, format) {
            return Some(date);
        }
    }

    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0);
    }

    text.parse::<i64>()
        .ok()
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .map(|date| date.naive_utc())
}

/// Sort candidates newest first and take the first one accepted by `filter`.
pub fn newest_matching<T, K, F>(
    candidates: impl IntoIterator<Item = T>,
    sort_key: impl Fn(&T) -> K,
    filter: F,
) -> Option<T>
where
    K: Ord,
    F: Fn(&T) -> bool,
{
    let mut candidates: Vec<T> = candidates.into_iter().collect();
    candidates.sort_by(|a, b| sort_key(b).cmp(&sort_key(a)));
    candidates.into_iter().find(|c| filter(c))
}

/// The default notification body.
pub fn render_message(display_name: &str, info: &InfoSnapshot) -> String {
    let mut lines = vec![
        format!("{display_name} Update"),
        chrono::Local::now().format("%Y-%m-%d").to_string(),
    ];

    for (key, value) in info.present() {
        lines.push(format!("\n{}:\n{}", key.label(), value));
    }

    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(version: Option<&str>, date: Option<&str>) -> InfoSnapshot {
        let mut info = InfoSnapshot::new();
        info.set(InfoKey::LatestVersion, version);
        info.set(InfoKey::BuildDate, date);
        info
    }

    fn saved(version: Option<&str>, date: Option<&str>) -> SavedRecord {
        SavedRecord {
            id: "Foo".to_owned(),
            full_name: "Foo".to_owned(),
            info: info(version, date),
        }
    }

    #[test]
    fn absent_version_is_never_an_update() {
        assert!(!version_changed(&info(None, None), None));
        assert!(!version_changed(&info(None, None), Some(&saved(Some("1"), None))));
    }

    #[test]
    fn first_observation_is_an_update() {
        assert!(version_changed(&info(Some("1.2.3"), None), None));
    }

    #[test]
    fn compares_versions_as_strings() {
        let saved = saved(Some("1.2.3"), None);
        assert!(!version_changed(&info(Some("1.2.3"), None), Some(&saved)));
        assert!(version_changed(&info(Some("1.2.4"), None), Some(&saved)));
        assert!(version_changed(&info(Some("1.2.2"), None), Some(&saved)));
    }

    #[test]
    fn older_builds_are_rejected_by_the_date_guard() {
        let saved = saved(Some("20240301"), Some("2024-03-01"));

        let older_other = info(Some("20240201"), Some("2024-02-01"));
        assert!(!version_changed_with_newer_date(&older_other, Some(&saved)));

        let older_same = info(Some("20240301"), Some("2024-02-01"));
        assert!(!version_changed_with_newer_date(&older_same, Some(&saved)));

        let same_day = info(Some("20240301-2"), Some("2024-03-01"));
        assert!(!version_changed_with_newer_date(&same_day, Some(&saved)));

        let newer = info(Some("20240401"), Some("2024-04-01"));
        assert!(version_changed_with_newer_date(&newer, Some(&saved)));
    }

    #[test]
    fn date_guard_falls_back_when_dates_are_missing() {
        let saved = saved(Some("1"), Some("whenever"));
        assert!(version_changed_with_newer_date(&info(Some("2"), None), Some(&saved)));
        assert!(version_changed_with_newer_date(&info(Some("2"), Some("2020-01-01")), None));
    }

    #[test]
    fn parses_common_date_formats() {
        let expected = NaiveDate::from_ymd_opt(2023, 5, 6)
            .unwrap()
            .and_hms_opt(7, 8, 9)
            .unwrap();

        assert_eq!(parse_build_date("2023-05-06T07:08:09Z"), Some(expected));
        assert_eq!(parse_build_date("Sat, 06 May 2023 07:08:09 +0000"), Some(expected));
        assert_eq!(parse_build_date("2023-05-06 07:08:09"), Some(expected));
        assert_eq!(parse_build_date("1683356889"), Some(expected));
        assert_eq!(
            parse_build_date("2023-05-06"),
            NaiveDate::from_ymd_opt(2023, 5, 6).unwrap().and_hms_opt(0, 0, 0)
        );
        assert_eq!(parse_build_date("yesterday"), None);
    }

    #[test]
    fn newest_matching_skips_filtered_candidates() {
        let builds = vec![("a.zip", 1), ("c.txt", 3), ("b.zip", 2)];
        let found = newest_matching(builds, |b| b.1, |b| b.0.ends_with(".zip"));
        assert_eq!(found, Some(("b.zip", 2)));

        let none = newest_matching(Vec::<(&str, i32)>::new(), |b| b.1, |_| true);
        assert_eq!(none, None);
    }

    #[test]
    fn message_lists_present_fields() {
        let mut info = info(Some("1.2.3"), None);
        info.set(InfoKey::FileSize, "12 MB");

        let text = render_message("Foo ROM", &info);
        let lines: Vec<_> = text.lines().collect();

        assert_eq!(lines[0], "Foo ROM Update");
        assert!(text.contains("\nVersion:\n1.2.3"));
        assert!(text.contains("\nSize:\n12 MB"));
        assert!(!text.contains("Build date"));
    }
}
