use serde::{Deserialize, Deserializer};

pub const MAX_PAGE_SIZE: i64 = 100;
pub const MAX_PAGE: i64 = 1_000_000;

/// 1-based page window shared by every listing endpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Page {
    pub page: i64,
    pub limit: i64,
}

impl Page {
    pub fn new(page: Option<i64>, limit: Option<i64>, default_limit: i64) -> Self {
        let page = page.unwrap_or(1).clamp(1, MAX_PAGE);
        let limit = limit.unwrap_or(default_limit).clamp(1, MAX_PAGE_SIZE);

        Self { page, limit }
    }

    pub fn offset(&self) -> i64 {
        (self.page - 1).saturating_mul(self.limit)
    }

    pub fn total_pages(&self, total: i64) -> i64 {
        (total.max(0) + self.limit - 1) / self.limit
    }
}

/// Page numbers come in as JSON numbers, numeric strings, or query strings.
pub fn lenient_i64_opt<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<serde_json::Value>::deserialize(deserializer)? {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::Number(n)) => n
            .as_i64()
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom("expected an integer")),
        Some(serde_json::Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(serde_json::Value::String(s)) => s
            .trim()
            .parse::<i64>()
            .map(Some)
            .map_err(serde::de::Error::custom),
        Some(other) => Err(serde::de::Error::custom(format!(
            "expected an integer, got {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_page_of_two_starts_at_zero() {
        let page = Page::new(Some(1), Some(2), 10);
        assert_eq!(page.offset(), 0);
        assert_eq!(page.limit, 2);
        assert_eq!(page.total_pages(5), 3);
    }

    #[test]
    fn clamps_out_of_range_values() {
        let page = Page::new(Some(0), Some(10_000), 10);
        assert_eq!(page.page, 1);
        assert_eq!(page.limit, MAX_PAGE_SIZE);

        let page = Page::new(None, Some(-3), 10);
        assert_eq!(page.limit, 1);
    }

    #[test]
    fn huge_page_numbers_stay_in_range() {
        let page = Page::new(Some(i64::MAX), Some(MAX_PAGE_SIZE), 10);
        assert_eq!(page.page, MAX_PAGE);
        assert_eq!(page.offset(), (MAX_PAGE - 1) * MAX_PAGE_SIZE);

        let raw = Page {
            page: i64::MAX,
            limit: MAX_PAGE_SIZE,
        };
        assert_eq!(raw.offset(), i64::MAX);
    }

    #[test]
    fn third_page_skips_two_windows() {
        let page = Page::new(Some(3), None, 20);
        assert_eq!(page.offset(), 40);
    }
}
