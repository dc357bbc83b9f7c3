use serde::{Deserialize, Serialize};

/// Inclusive unix-second range plus the month/year it was derived from, so
/// callers can echo the interpretation back to the user.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DateRange {
    pub start: Option<i64>,
    pub end: Option<i64>,
    pub month: Option<u32>,
    pub year: Option<i32>,
}

impl DateRange {
    #[must_use]
    pub fn contains(&self, unix_secs: i64) -> bool {
        if let Some(start) = self.start {
            if unix_secs < start {
                return false;
            }
        }
        if let Some(end) = self.end {
            if unix_secs > end {
                return false;
            }
        }
        true
    }
}

/// Structured filters applied against the metadata store after retrieval.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FilterOptions {
    pub date_range: Option<DateRange>,
    /// Lowercased extensions without the dot, e.g. `["pdf", "docx"]`.
    pub file_types: Option<Vec<String>>,
    /// Folder names or path fragments; a record matches if any fragment
    /// appears as a component of its parent directory.
    pub folder_paths: Option<Vec<String>>,
}

impl FilterOptions {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.date_range.is_none() && self.file_types.is_none() && self.folder_paths.is_none()
    }

    /// Evaluate the filters against one record's metadata. Returns the names
    /// of the filters that matched, or `None` if any configured filter
    /// rejected the record.
    #[must_use]
    pub fn evaluate(
        &self,
        file_path: &str,
        file_type: &str,
        modified_time: i64,
    ) -> Option<Vec<String>> {
        let mut matched = Vec::new();

        if let Some(range) = &self.date_range {
            if !range.contains(modified_time) {
                return None;
            }
            matched.push("date_range".to_string());
        }

        if let Some(types) = &self.file_types {
            let wanted = file_type.to_lowercase();
            if !types.iter().any(|t| t.eq_ignore_ascii_case(&wanted)) {
                return None;
            }
            matched.push("file_type".to_string());
        }

        if let Some(folders) = &self.folder_paths {
            let parent = parent_components(file_path);
            let hit = folders.iter().any(|folder| {
                parent
                    .iter()
                    .any(|component| component.eq_ignore_ascii_case(folder))
            });
            if !hit {
                return None;
            }
            matched.push("folder_path".to_string());
        }

        Some(matched)
    }
}

fn parent_components(file_path: &str) -> Vec<&str> {
    let normalized = file_path.rsplit_once(['/', '\\']).map_or("", |(dir, _)| dir);
    normalized
        .split(['/', '\\'])
        .filter(|c| !c.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_filters_match_everything() {
        let filters = FilterOptions::default();
        let matched = filters.evaluate("/home/u/notes.txt", "txt", 0).unwrap();
        assert!(matched.is_empty());
    }

    #[test]
    fn file_type_filter_is_case_insensitive() {
        let filters = FilterOptions {
            file_types: Some(vec!["pdf".to_string()]),
            ..FilterOptions::default()
        };
        assert!(filters.evaluate("/a/b.PDF", "PDF", 0).is_some());
        assert!(filters.evaluate("/a/b.txt", "txt", 0).is_none());
    }

    #[test]
    fn folder_filter_matches_path_components_only() {
        let filters = FilterOptions {
            folder_paths: Some(vec!["Downloads".to_string()]),
            ..FilterOptions::default()
        };
        assert!(filters
            .evaluate("/home/u/Downloads/report.pdf", "pdf", 0)
            .is_some());
        // The file name itself must not satisfy a folder filter.
        assert!(filters
            .evaluate("/home/u/Desktop/Downloads.pdf", "pdf", 0)
            .is_none());
    }

    #[test]
    fn date_range_bounds_are_inclusive() {
        let range = DateRange {
            start: Some(100),
            end: Some(200),
            month: None,
            year: None,
        };
        assert!(range.contains(100));
        assert!(range.contains(200));
        assert!(!range.contains(99));
        assert!(!range.contains(201));
    }
}
