use chrono::{DateTime, Datelike, Duration, Local, NaiveDate, TimeZone};
use regex::Regex;
use semfind_protocol::{DateRange, FilterOptions, ParsedQuery};

/// Pattern-based extraction of structured filters from a natural-language
/// query. Matched phrases are removed so the residual text is what gets
/// embedded.
pub struct QueryParser {
    year_pattern: Regex,
}

impl Default for QueryParser {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryParser {
    #[must_use]
    pub fn new() -> Self {
        Self {
            year_pattern: Regex::new(r"\b(?:from|in)\s+(\d{4})\b|\b(\d{4})\b")
                .expect("year pattern is valid"),
        }
    }

    #[must_use]
    pub fn parse(&self, raw: &str) -> ParsedQuery {
        self.parse_at(raw, Local::now())
    }

    /// Parse with an explicit reference time; relative phrases ("last
    /// week", "yesterday") resolve against it.
    #[must_use]
    pub fn parse_at(&self, raw: &str, now: DateTime<Local>) -> ParsedQuery {
        let mut remaining = raw.to_string();
        let mut filters = FilterOptions::default();

        if let Some((date_range, cleaned)) = self.extract_date_filters(&remaining, now) {
            filters.date_range = Some(date_range);
            remaining = cleaned;
        }
        if let Some((file_types, cleaned)) = extract_file_types(&remaining) {
            filters.file_types = Some(file_types);
            remaining = cleaned;
        }
        if let Some((folders, cleaned)) = extract_folder_paths(&remaining) {
            filters.folder_paths = Some(folders);
            remaining = cleaned;
        }

        ParsedQuery {
            query: normalize_whitespace(&remaining),
            filters,
        }
    }

    fn extract_date_filters(
        &self,
        query: &str,
        now: DateTime<Local>,
    ) -> Option<(DateRange, String)> {
        let query_lower = query.to_lowercase();
        let mut cleaned = query.to_string();
        let mut range = DateRange::default();
        let current_year = now.year();

        const MONTHS: [(&str, u32); 12] = [
            ("january", 1),
            ("february", 2),
            ("march", 3),
            ("april", 4),
            ("may", 5),
            ("june", 6),
            ("july", 7),
            ("august", 8),
            ("september", 9),
            ("october", 10),
            ("november", 11),
            ("december", 12),
        ];

        for (month_name, month) in MONTHS {
            let patterns = [
                format!("from {month_name}"),
                format!("in {month_name}"),
                month_name.to_string(),
            ];
            if let Some(pattern) = patterns.iter().find(|p| query_lower.contains(p.as_str())) {
                range.month = Some(month);
                range.year = Some(current_year);
                let (start, end) = month_bounds(current_year, month);
                range.start = start;
                range.end = end;
                cleaned = remove_phrase(&cleaned, pattern);
                break;
            }
        }

        if let Some(caps) = self.year_pattern.captures(&query_lower) {
            if let Some(year_match) = caps.get(1).or_else(|| caps.get(2)) {
                if let Ok(year) = year_match.as_str().parse::<i32>() {
                    if (2000..=2100).contains(&year) {
                        range.year = Some(year);
                        if let Some(month) = range.month {
                            let (start, end) = month_bounds(year, month);
                            range.start = start;
                            range.end = end;
                        } else {
                            range.start = local_timestamp(year, 1, 1, 0, 0, 0);
                            range.end = local_timestamp(year, 12, 31, 23, 59, 59);
                        }
                        cleaned = self.year_pattern.replace(&cleaned, "").to_string();
                    }
                }
            }
        }

        if query_lower.contains("last week") {
            range.start = Some((now - Duration::days(7)).timestamp());
            range.end = Some(now.timestamp());
            cleaned = remove_phrase(&cleaned, "last week");
        } else if query_lower.contains("this month") {
            range.start = local_timestamp(current_year, now.month(), 1, 0, 0, 0);
            range.end = Some(now.timestamp());
            range.month = Some(now.month());
            range.year = Some(current_year);
            cleaned = remove_phrase(&cleaned, "this month");
        } else if query_lower.contains("yesterday") {
            let yesterday = (now - Duration::days(1)).date_naive();
            range.start = naive_timestamp(yesterday, 0, 0, 0);
            range.end = naive_timestamp(yesterday, 23, 59, 59);
            cleaned = remove_phrase(&cleaned, "yesterday");
        }

        if range.start.is_some() || range.end.is_some() || range.month.is_some() {
            Some((range, cleaned))
        } else {
            None
        }
    }
}

fn extract_file_types(query: &str) -> Option<(Vec<String>, String)> {
    let query_lower = query.to_lowercase();
    let mut cleaned = query.to_string();
    let mut file_types: Vec<String> = Vec::new();

    // Longest phrase first so "pdf files" is consumed before "pdf".
    let type_patterns: [(&str, &[&str]); 6] = [
        ("pdf", &["pdf documents", "pdf files", "pdf"]),
        ("docx", &["word documents", "doc files", "documents", "word", "docx"]),
        ("xlsx", &["spreadsheets", "spreadsheet", "xls files", "excel", "xlsx"]),
        ("txt", &["text files", "txt files", "text"]),
        ("jpg", &["pictures", "photos", "images", "image", "jpeg", "jpg", "png"]),
        ("mp4", &["videos", "video", "movies", "movie", "mp4"]),
    ];

    for (ext, patterns) in type_patterns {
        for pattern in patterns {
            if query_lower.contains(pattern) {
                if !file_types.iter().any(|t| t == ext) {
                    file_types.push(ext.to_string());
                }
                cleaned = remove_phrase(&cleaned, pattern);
                break;
            }
        }
    }

    (!file_types.is_empty()).then_some((file_types, cleaned))
}

fn extract_folder_paths(query: &str) -> Option<(Vec<String>, String)> {
    let query_lower = query.to_lowercase();
    let mut cleaned = query.to_string();
    let mut folders: Vec<String> = Vec::new();

    let folder_patterns: [(&str, &[&str]); 3] = [
        (
            "Downloads",
            &["from downloads", "in downloads", "downloads", "download"],
        ),
        ("Desktop", &["from desktop", "in desktop", "desktop"]),
        (
            "Documents",
            &[
                "documents folder",
                "from documents",
                "in documents",
                "documents",
                "document",
            ],
        ),
    ];

    for (folder, patterns) in folder_patterns {
        for pattern in patterns {
            if query_lower.contains(pattern) {
                if !folders.iter().any(|f| f == folder) {
                    folders.push(folder.to_string());
                }
                cleaned = remove_phrase(&cleaned, pattern);
                break;
            }
        }
    }

    (!folders.is_empty()).then_some((folders, cleaned))
}

/// Remove the first case-insensitive occurrence of `phrase`. Skipped when
/// lowercasing shifted byte offsets (non-ASCII text); the phrase then just
/// stays in the residual query.
fn remove_phrase(text: &str, phrase: &str) -> String {
    let lower = text.to_lowercase();
    if lower.len() != text.len() {
        return text.to_string();
    }
    match lower.find(&phrase.to_lowercase()) {
        Some(start) if text.is_char_boundary(start) && text.is_char_boundary(start + phrase.len()) =>
        {
            let mut out = String::with_capacity(text.len());
            out.push_str(&text[..start]);
            out.push_str(&text[start + phrase.len()..]);
            out
        }
        _ => text.to_string(),
    }
}

fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn month_bounds(year: i32, month: u32) -> (Option<i64>, Option<i64>) {
    let start = local_timestamp(year, month, 1, 0, 0, 0);
    let next_month = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    };
    let end = next_month
        .and_then(|next| next.pred_opt())
        .and_then(|last_day| naive_timestamp(last_day, 23, 59, 59));
    (start, end)
}

fn local_timestamp(year: i32, month: u32, day: u32, h: u32, m: u32, s: u32) -> Option<i64> {
    NaiveDate::from_ymd_opt(year, month, day).and_then(|date| naive_timestamp(date, h, m, s))
}

fn naive_timestamp(date: NaiveDate, h: u32, m: u32, s: u32) -> Option<i64> {
    date.and_hms_opt(h, m, s)
        .and_then(|naive| Local.from_local_datetime(&naive).single())
        .map(|dt| dt.timestamp())
}
