//! Core domain model for the job-hunt dashboard: job records, the
//! freshness/status classifiers, the filter engine and sorting.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::OnceLock;

use chrono::NaiveDate;
use regex::Regex;
use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "jobhunt-core";

/// Sentinel the scraper leaves in the posted-date column when it found none.
pub const POSTED_NOT_FOUND: &str = "לא נמצא תאריך";

/// Raw status values offered in the edit form, in display order.
pub const STATUS_OPTIONS: &[&str] = &["לא הגשתי", "הגשתי", "ממתין לתשובה", "נדחה", "ראיון"];

/// Raw status value that marks an application as submitted.
pub const STATUS_APPLIED_RAW: &str = "הגשתי";

const APPLIED_TOKENS: &[&str] = &["הגשתי", "כן"];
const REJECTED_TOKEN: &str = "נדחה";
const INTERVIEW_TOKEN: &str = "ראיון";

/// One row of the tracking sheet, with named fields instead of dynamic
/// string-keyed lookups. Absent sheet columns become empty strings.
///
/// Identity is `row_index`: the 0-based position of the row at load time.
/// There is no durable key, so writes that race with external row
/// insertions/deletions target the wrong row. The sheet owner accepts this.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub row_index: usize,
    pub logged_at: Option<NaiveDate>,
    pub title: String,
    pub company: String,
    pub industry: String,
    pub location: String,
    pub posted_text: String,
    pub status_text: String,
    pub description: String,
    pub summary: String,
    pub cv_version: String,
    pub intro_email: String,
    pub fit_rating: Option<u8>,
    pub listing_url: String,
}

impl JobRecord {
    pub fn status(&self) -> StatusCategory {
        classify_status(&self.status_text)
    }

    pub fn freshness(&self) -> Freshness {
        days_since_posted(&self.posted_text)
    }
}

/// Lifecycle stage derived from the free-text status column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCategory {
    NotApplied,
    Applied,
    Rejected,
    Interview,
}

impl StatusCategory {
    pub fn code(self) -> &'static str {
        match self {
            StatusCategory::NotApplied => "not_applied",
            StatusCategory::Applied => "applied",
            StatusCategory::Rejected => "rejected",
            StatusCategory::Interview => "interview",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "not_applied" => Some(StatusCategory::NotApplied),
            "applied" => Some(StatusCategory::Applied),
            "rejected" => Some(StatusCategory::Rejected),
            "interview" => Some(StatusCategory::Interview),
            _ => None,
        }
    }

    /// Badge text shown on a job card.
    pub fn label(self) -> &'static str {
        match self {
            StatusCategory::NotApplied => "לא הגשתי ⏳",
            StatusCategory::Applied => "הגשתי ✅",
            StatusCategory::Rejected => "נדחה ❌",
            StatusCategory::Interview => "ראיון 🎯",
        }
    }

    pub fn css_class(self) -> &'static str {
        match self {
            StatusCategory::NotApplied => "not-applied",
            StatusCategory::Applied => "applied",
            StatusCategory::Rejected => "rejected",
            StatusCategory::Interview => "interview",
        }
    }
}

/// Classify a raw status cell by substring scan.
///
/// Precedence is fixed: applied/yes markers, then rejected, then interview.
/// A cell containing both an applied marker and a rejected marker therefore
/// classifies as `Applied`. Existing sheets depend on this ordering; do not
/// reorder the checks.
pub fn classify_status(status_text: &str) -> StatusCategory {
    if APPLIED_TOKENS.iter().any(|t| status_text.contains(t)) {
        StatusCategory::Applied
    } else if status_text.contains(REJECTED_TOKEN) {
        StatusCategory::Rejected
    } else if status_text.contains(INTERVIEW_TOKEN) {
        StatusCategory::Interview
    } else {
        StatusCategory::NotApplied
    }
}

/// How recently a listing was posted, in approximate days.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    Days(u32),
    Unknown,
}

fn first_integer(text: &str) -> Option<u32> {
    static DIGITS: OnceLock<Regex> = OnceLock::new();
    let re = DIGITS.get_or_init(|| Regex::new(r"\d+").expect("digit pattern compiles"));
    re.find(text).and_then(|m| m.as_str().parse().ok())
}

/// Parse a free-text "posted X ago" string into a day count.
///
/// Keyword scan is case-insensitive, checked hour, day, week, month; "hour"
/// maps to 0, weeks count 7 days, months approximate to 30. Anything
/// unrecognized, including the scraper's not-found sentinel, is `Unknown`.
pub fn days_since_posted(posted_text: &str) -> Freshness {
    if posted_text.trim().is_empty() || posted_text == POSTED_NOT_FOUND {
        return Freshness::Unknown;
    }
    let lowered = posted_text.to_lowercase();
    if lowered.contains("hour") {
        Freshness::Days(0)
    } else if lowered.contains("day") {
        first_integer(&lowered).map_or(Freshness::Unknown, Freshness::Days)
    } else if lowered.contains("week") {
        first_integer(&lowered).map_or(Freshness::Unknown, |n| Freshness::Days(n * 7))
    } else if lowered.contains("month") {
        first_integer(&lowered).map_or(Freshness::Unknown, |n| Freshness::Days(n * 30))
    } else {
        Freshness::Unknown
    }
}

/// Upper bound on listing age selectable in the sidebar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreshnessBucket {
    ThreeDays,
    OneWeek,
    OneMonth,
}

impl FreshnessBucket {
    pub fn max_days(self) -> u32 {
        match self {
            FreshnessBucket::ThreeDays => 3,
            FreshnessBucket::OneWeek => 7,
            FreshnessBucket::OneMonth => 30,
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            FreshnessBucket::ThreeDays => "3",
            FreshnessBucket::OneWeek => "7",
            FreshnessBucket::OneMonth => "30",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "3" => Some(FreshnessBucket::ThreeDays),
            "7" => Some(FreshnessBucket::OneWeek),
            "30" => Some(FreshnessBucket::OneMonth),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            FreshnessBucket::ThreeDays => "עד 3 ימים",
            FreshnessBucket::OneWeek => "עד שבוע",
            FreshnessBucket::OneMonth => "עד חודש",
        }
    }
}

/// Active dashboard filters. Empty membership sets and `None` selections
/// deactivate their predicate; active predicates combine with logical AND.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobFilter {
    pub companies: Vec<String>,
    pub industries: Vec<String>,
    pub status: Option<StatusCategory>,
    pub freshness: Option<FreshnessBucket>,
}

impl JobFilter {
    pub fn is_empty(&self) -> bool {
        self.companies.is_empty()
            && self.industries.is_empty()
            && self.status.is_none()
            && self.freshness.is_none()
    }

    fn matches(&self, record: &JobRecord) -> bool {
        if !self.companies.is_empty() && !self.companies.contains(&record.company) {
            return false;
        }
        if !self.industries.is_empty() && !self.industries.contains(&record.industry) {
            return false;
        }
        if let Some(status) = self.status {
            if record.status() != status {
                return false;
            }
        }
        if let Some(bucket) = self.freshness {
            // Unknown freshness never excludes a record.
            if let Freshness::Days(days) = record.freshness() {
                if days > bucket.max_days() {
                    return false;
                }
            }
        }
        true
    }

    pub fn apply(&self, records: &[JobRecord]) -> Vec<JobRecord> {
        records.iter().filter(|r| self.matches(r)).cloned().collect()
    }
}

/// Sort order for the card list. Ties keep the original sheet order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortKey {
    #[default]
    LoggedAtDesc,
    Company,
    Title,
    PostedText,
}

impl SortKey {
    pub fn code(self) -> &'static str {
        match self {
            SortKey::LoggedAtDesc => "date",
            SortKey::Company => "company",
            SortKey::Title => "title",
            SortKey::PostedText => "posted",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "date" => Some(SortKey::LoggedAtDesc),
            "company" => Some(SortKey::Company),
            "title" => Some(SortKey::Title),
            "posted" => Some(SortKey::PostedText),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            SortKey::LoggedAtDesc => "תאריך",
            SortKey::Company => "שם החברה",
            SortKey::Title => "שם המשרה",
            SortKey::PostedText => "תאריך פרסום",
        }
    }
}

pub fn sort_records(records: &mut [JobRecord], key: SortKey) {
    match key {
        // Newest first; rows without a parsed date sink to the end.
        SortKey::LoggedAtDesc => records.sort_by(|a, b| match (a.logged_at, b.logged_at) {
            (Some(da), Some(db)) => db.cmp(&da),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => std::cmp::Ordering::Equal,
        }),
        SortKey::Company => records.sort_by(|a, b| a.company.cmp(&b.company)),
        SortKey::Title => records.sort_by(|a, b| a.title.cmp(&b.title)),
        SortKey::PostedText => records.sort_by(|a, b| a.posted_text.cmp(&b.posted_text)),
    }
}

/// Headline numbers shown above the card list.
#[derive(Debug, Clone, PartialEq)]
pub struct DashboardStats {
    pub total: usize,
    pub applied: usize,
    pub application_rate_pct: f64,
    pub fresh: usize,
    pub avg_rating: Option<f64>,
    pub unique_companies: usize,
}

impl DashboardStats {
    pub fn compute(records: &[JobRecord]) -> Self {
        let total = records.len();
        let applied = records
            .iter()
            .filter(|r| r.status() == StatusCategory::Applied)
            .count();
        let application_rate_pct = if total > 0 {
            (applied as f64 / total as f64) * 100.0
        } else {
            0.0
        };
        let fresh = records
            .iter()
            .filter(|r| matches!(r.freshness(), Freshness::Days(d) if d <= 3))
            .count();
        let ratings: Vec<f64> = records
            .iter()
            .filter_map(|r| r.fit_rating.map(f64::from))
            .collect();
        let avg_rating = if ratings.is_empty() {
            None
        } else {
            Some(ratings.iter().sum::<f64>() / ratings.len() as f64)
        };
        let unique_companies = records
            .iter()
            .filter(|r| !r.company.is_empty())
            .map(|r| r.company.as_str())
            .collect::<HashSet<_>>()
            .len();
        Self {
            total,
            applied,
            application_rate_pct,
            fresh,
            avg_rating,
            unique_companies,
        }
    }
}

/// Industry value counts, most common first. Ties break alphabetically so
/// the chart order is stable across reloads. Blank cells are skipped.
pub fn industry_breakdown(records: &[JobRecord]) -> Vec<(String, usize)> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for record in records {
        let industry = record.industry.trim();
        if industry.is_empty() {
            continue;
        }
        *counts.entry(industry).or_default() += 1;
    }
    let mut rows: Vec<(String, usize)> = counts
        .into_iter()
        .map(|(industry, count)| (industry.to_string(), count))
        .collect();
    rows.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    rows
}

/// Listings logged per day, oldest first. Rows without a parsed date are
/// skipped.
pub fn daily_counts(records: &[JobRecord]) -> Vec<(NaiveDate, usize)> {
    let mut counts: BTreeMap<NaiveDate, usize> = BTreeMap::new();
    for record in records {
        if let Some(date) = record.logged_at {
            *counts.entry(date).or_default() += 1;
        }
    }
    counts.into_iter().collect()
}
