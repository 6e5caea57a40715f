//! Axum + Askama web UI for the job-hunt dashboard: per-user routing,
//! filterable job cards, edit panels that write back to the sheet, and the
//! optional LLM summarize action.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use askama::Template;
use axum::{
    extract::{Form, RawQuery, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
    Router,
};
use jobhunt_core::{
    daily_counts, industry_breakdown, sort_records, DashboardStats, FreshnessBucket, JobFilter,
    JobRecord, SortKey, StatusCategory, STATUS_APPLIED_RAW, STATUS_OPTIONS,
};
use jobhunt_llm::{Summarizer, SummarizeError};
use jobhunt_sheets::{
    apply_update, write_summary, CachedSheetSource, ColumnMap, JobUpdate, SheetStore, SheetTarget,
};
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tracing::warn;

pub const CRATE_NAME: &str = "jobhunt-web";

#[derive(Debug, Clone, Deserialize)]
struct UsersYaml {
    users: Vec<UserConfig>,
}

/// Static routing entry: opaque id → display identity + sheet target.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct UserConfig {
    pub user_id: String,
    pub name: String,
    pub email: String,
    pub spreadsheet: String,
    pub tab: String,
}

impl UserConfig {
    pub fn target(&self) -> SheetTarget {
        SheetTarget::new(self.spreadsheet.clone(), self.tab.clone())
    }
}

/// The known-users table. Unknown ids are denied; there is no other auth.
#[derive(Debug, Clone, Default)]
pub struct UserRegistry {
    users: Vec<UserConfig>,
}

impl UserRegistry {
    pub fn new(users: Vec<UserConfig>) -> Self {
        Self { users }
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let yaml = std::fs::read_to_string(path.as_ref())?;
        let parsed: UsersYaml = serde_yaml::from_str(&yaml)?;
        Ok(Self::new(parsed.users))
    }

    pub fn lookup(&self, user_id: &str) -> Option<&UserConfig> {
        self.users.iter().find(|u| u.user_id == user_id)
    }

    pub fn all(&self) -> &[UserConfig] {
        &self.users
    }
}

/// Session-scoped open/closed state of the per-row edit panels, keyed by
/// (user, row). A key exists only while its panel is open: created on open,
/// removed on cancel and on successful save.
#[derive(Default)]
pub struct PanelState {
    open: Mutex<HashSet<(String, usize)>>,
}

impl PanelState {
    pub async fn open(&self, user_id: &str, row: usize) {
        self.open.lock().await.insert((user_id.to_string(), row));
    }

    pub async fn close(&self, user_id: &str, row: usize) {
        self.open.lock().await.remove(&(user_id.to_string(), row));
    }

    pub async fn open_rows(&self, user_id: &str) -> HashSet<usize> {
        self.open
            .lock()
            .await
            .iter()
            .filter(|(u, _)| u == user_id)
            .map(|&(_, row)| row)
            .collect()
    }
}

pub struct AppState {
    registry: UserRegistry,
    source: CachedSheetSource,
    columns: ColumnMap,
    summarizer: Arc<dyn Summarizer>,
    panels: PanelState,
    workspace_root: PathBuf,
}

impl AppState {
    pub fn new(
        registry: UserRegistry,
        store: Arc<dyn SheetStore>,
        summarizer: Arc<dyn Summarizer>,
        columns: ColumnMap,
        cache_ttl: std::time::Duration,
        workspace_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            registry,
            source: CachedSheetSource::new(store, cache_ttl),
            columns,
            summarizer,
            panels: PanelState::default(),
            workspace_root: workspace_root.into(),
        }
    }
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/panel/open", post(panel_open_handler))
        .route("/panel/close", post(panel_close_handler))
        .route("/update", post(update_handler))
        .route("/summarize", post(summarize_handler))
        .route("/assets/static/app.css", get(app_css_handler))
        .with_state(Arc::new(state))
}

pub async fn serve_from_env() -> anyhow::Result<()> {
    let port: u16 = std::env::var("JOBHUNT_WEB_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(8000);
    let workspace_root = PathBuf::from(".");

    let registry = UserRegistry::from_yaml_file(workspace_root.join("users.yaml"))?;
    let columns = ColumnMap::default();
    columns.validate()?;
    let store: Arc<dyn SheetStore> = Arc::new(jobhunt_sheets::GoogleSheetsStore::new(
        jobhunt_sheets::SheetsConfig::from_env(),
    )?);
    let summarizer: Arc<dyn Summarizer> = Arc::new(jobhunt_llm::OpenAiSummarizer::new(
        jobhunt_llm::LlmConfig::from_env(),
    )?);

    let state = AppState::new(
        registry,
        store,
        summarizer,
        columns,
        jobhunt_sheets::DEFAULT_CACHE_TTL,
        workspace_root,
    );
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    axum::serve(listener, app(state)).await?;
    Ok(())
}

/// Parsed dashboard query string. Membership filters arrive as repeated
/// `company=` / `industry=` parameters; unknown codes fall back to the
/// bypassing default.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DashboardQuery {
    pub user: Option<String>,
    pub companies: Vec<String>,
    pub industries: Vec<String>,
    pub status: Option<StatusCategory>,
    pub freshness: Option<FreshnessBucket>,
    pub sort: SortKey,
    pub notice: String,
    pub error: String,
}

pub fn parse_dashboard_query(raw: &str) -> DashboardQuery {
    let pairs: Vec<(String, String)> = serde_urlencoded::from_str(raw).unwrap_or_default();
    let mut query = DashboardQuery::default();
    for (key, value) in pairs {
        match key.as_str() {
            "user" if !value.is_empty() => query.user = Some(value),
            "company" if !value.is_empty() => query.companies.push(value),
            "industry" if !value.is_empty() => query.industries.push(value),
            "status" => query.status = StatusCategory::from_code(&value),
            "fresh" => query.freshness = FreshnessBucket::from_code(&value),
            "sort" => query.sort = SortKey::from_code(&value).unwrap_or_default(),
            "notice" => query.notice = value,
            "error" => query.error = value,
            _ => {}
        }
    }
    query
}

// Notice/error banners carry enumerated codes in the URL; only known codes
// render, as fixed Hebrew messages.
fn notice_message(code: &str) -> &'static str {
    match code {
        "saved" => "נשמר בהצלחה!",
        "summary_saved" => "הסיכום עודכן בהצלחה",
        _ => "",
    }
}

fn error_message(code: &str) -> &'static str {
    match code {
        "save_failed" => "שגיאה בשמירה",
        "summarize_failed" => "שגיאה מול שירות הסיכום",
        "no_description" => "אין טקסט לתמצות עבור משרה זו",
        "row_missing" => "המשרה לא נמצאה בטעינה האחרונה",
        _ => "",
    }
}

fn dashboard_url(user_id: &str, kind: &str, code: &str) -> String {
    let query = serde_urlencoded::to_string([("user", user_id), (kind, code)])
        .unwrap_or_else(|_| format!("user={user_id}"));
    format!("/?{query}")
}

#[derive(Debug, Clone)]
struct ChoiceRow {
    code: String,
    label: String,
    selected: bool,
}

/// One horizontal bar of a server-rendered chart; width is relative to the
/// largest bucket.
#[derive(Debug, Clone)]
struct ChartRow {
    label: String,
    count: usize,
    width_pct: usize,
}

fn chart_rows(counts: Vec<(String, usize)>) -> Vec<ChartRow> {
    let max = counts.iter().map(|&(_, count)| count).max().unwrap_or(0);
    counts
        .into_iter()
        .map(|(label, count)| ChartRow {
            label,
            count,
            width_pct: if max > 0 { count * 100 / max } else { 0 },
        })
        .collect()
}

#[derive(Debug, Clone)]
struct JobCard {
    row_index: usize,
    title: String,
    company: String,
    industry: String,
    location: String,
    posted_text: String,
    status_label: &'static str,
    status_class: &'static str,
    listing_url: String,
    has_link: bool,
    summary: String,
    has_summary: bool,
    has_description: bool,
    cv_version: String,
    intro_email: String,
    rating: u8,
    panel_open: bool,
    status_choices: Vec<ChoiceRow>,
}

#[derive(Template)]
#[template(path = "landing.html")]
struct LandingTemplate {
    users: Vec<UserConfig>,
}

#[derive(Template)]
#[template(path = "denied.html")]
struct DeniedTemplate {}

#[derive(Template)]
#[template(path = "dashboard.html")]
struct DashboardTemplate {
    user_id: String,
    user_name: String,
    user_email: String,
    notice: String,
    error: String,
    stats: DashboardStats,
    rate_text: String,
    avg_rating_text: String,
    company_choices: Vec<ChoiceRow>,
    industry_choices: Vec<ChoiceRow>,
    status_choices: Vec<ChoiceRow>,
    fresh_choices: Vec<ChoiceRow>,
    sort_choices: Vec<ChoiceRow>,
    industry_chart: Vec<ChartRow>,
    timeline_chart: Vec<ChartRow>,
    cards: Vec<JobCard>,
}

fn display_or(value: &str, fallback: &str) -> String {
    if value.trim().is_empty() {
        fallback.to_string()
    } else {
        value.to_string()
    }
}

fn membership_choices(values: &[String], selected: &[String]) -> Vec<ChoiceRow> {
    values
        .iter()
        .map(|value| ChoiceRow {
            code: value.clone(),
            label: value.clone(),
            selected: selected.contains(value),
        })
        .collect()
}

fn unique_sorted(records: &[JobRecord], field: fn(&JobRecord) -> &str) -> Vec<String> {
    let mut values: Vec<String> = records
        .iter()
        .map(field)
        .filter(|v| !v.is_empty())
        .map(ToString::to_string)
        .collect();
    values.sort();
    values.dedup();
    values
}

fn status_filter_choices(selected: Option<StatusCategory>) -> Vec<ChoiceRow> {
    let mut choices = vec![ChoiceRow {
        code: "all".to_string(),
        label: "הכל".to_string(),
        selected: selected.is_none(),
    }];
    for category in [
        StatusCategory::NotApplied,
        StatusCategory::Applied,
        StatusCategory::Rejected,
        StatusCategory::Interview,
    ] {
        choices.push(ChoiceRow {
            code: category.code().to_string(),
            label: category.label().to_string(),
            selected: selected == Some(category),
        });
    }
    choices
}

fn fresh_filter_choices(selected: Option<FreshnessBucket>) -> Vec<ChoiceRow> {
    let mut choices = vec![ChoiceRow {
        code: "all".to_string(),
        label: "הכל".to_string(),
        selected: selected.is_none(),
    }];
    for bucket in [
        FreshnessBucket::ThreeDays,
        FreshnessBucket::OneWeek,
        FreshnessBucket::OneMonth,
    ] {
        choices.push(ChoiceRow {
            code: bucket.code().to_string(),
            label: bucket.label().to_string(),
            selected: selected == Some(bucket),
        });
    }
    choices
}

fn sort_choices(selected: SortKey) -> Vec<ChoiceRow> {
    [
        SortKey::LoggedAtDesc,
        SortKey::Company,
        SortKey::Title,
        SortKey::PostedText,
    ]
    .into_iter()
    .map(|key| ChoiceRow {
        code: key.code().to_string(),
        label: key.label().to_string(),
        selected: key == selected,
    })
    .collect()
}

fn build_card(record: &JobRecord, open_rows: &HashSet<usize>) -> JobCard {
    let status = record.status();
    let status_choices = STATUS_OPTIONS
        .iter()
        .map(|&option| ChoiceRow {
            code: option.to_string(),
            label: option.to_string(),
            selected: option == record.status_text,
        })
        .collect();
    JobCard {
        row_index: record.row_index,
        title: display_or(&record.title, "לא צוין"),
        company: display_or(&record.company, "לא צוין"),
        industry: display_or(&record.industry, "לא צוין"),
        location: display_or(&record.location, "לא צוין"),
        posted_text: display_or(&record.posted_text, "לא נמצא"),
        status_label: status.label(),
        status_class: status.css_class(),
        listing_url: record.listing_url.clone(),
        has_link: !record.listing_url.trim().is_empty(),
        summary: record.summary.clone(),
        has_summary: !record.summary.trim().is_empty(),
        has_description: !record.description.trim().is_empty(),
        cv_version: record.cv_version.clone(),
        intro_email: record.intro_email.clone(),
        // Missing or malformed ratings fall back to the neutral midpoint.
        rating: record.fit_rating.unwrap_or(3),
        panel_open: open_rows.contains(&record.row_index),
        status_choices,
    }
}

async fn index_handler(State(state): State<Arc<AppState>>, RawQuery(raw): RawQuery) -> Response {
    let query = parse_dashboard_query(raw.as_deref().unwrap_or(""));
    let Some(user_id) = query.user.clone() else {
        return render_html(LandingTemplate {
            users: state.registry.all().to_vec(),
        });
    };
    let Some(user) = state.registry.lookup(&user_id).cloned() else {
        return render_with_status(StatusCode::FORBIDDEN, DeniedTemplate {});
    };

    let target = user.target();
    let (records, load_error) = match state.source.load(&target).await {
        Ok(records) => (records, String::new()),
        Err(err) => {
            warn!(user_id = %user.user_id, error = %err, "sheet load failed");
            (Vec::new(), format!("שגיאה בטעינת נתונים: {err}"))
        }
    };

    let filter = JobFilter {
        companies: query.companies.clone(),
        industries: query.industries.clone(),
        status: query.status,
        freshness: query.freshness,
    };
    let mut filtered = filter.apply(&records);
    sort_records(&mut filtered, query.sort);
    let stats = DashboardStats::compute(&filtered);
    // The charts aggregate the filtered rows, like the metric row.
    let industry_chart = chart_rows(industry_breakdown(&filtered));
    let timeline_chart = chart_rows(
        daily_counts(&filtered)
            .into_iter()
            .map(|(date, count)| (date.format("%Y-%m-%d").to_string(), count))
            .collect(),
    );

    let open_rows = state.panels.open_rows(&user.user_id).await;
    let cards = filtered
        .iter()
        .map(|record| build_card(record, &open_rows))
        .collect();

    let error = if load_error.is_empty() {
        error_message(&query.error).to_string()
    } else {
        load_error
    };

    render_html(DashboardTemplate {
        user_id: user.user_id.clone(),
        user_name: user.name.clone(),
        user_email: user.email.clone(),
        notice: notice_message(&query.notice).to_string(),
        error,
        rate_text: format!("{:.1}%", stats.application_rate_pct),
        avg_rating_text: stats
            .avg_rating
            .map(|r| format!("{r:.1}"))
            .unwrap_or_else(|| "—".to_string()),
        stats,
        company_choices: membership_choices(
            &unique_sorted(&records, |r| r.company.as_str()),
            &query.companies,
        ),
        industry_choices: membership_choices(
            &unique_sorted(&records, |r| r.industry.as_str()),
            &query.industries,
        ),
        status_choices: status_filter_choices(query.status),
        fresh_choices: fresh_filter_choices(query.freshness),
        sort_choices: sort_choices(query.sort),
        industry_chart,
        timeline_chart,
        cards,
    })
}

#[derive(Debug, Deserialize)]
struct PanelForm {
    user: String,
    row: usize,
}

async fn panel_open_handler(
    State(state): State<Arc<AppState>>,
    Form(form): Form<PanelForm>,
) -> Response {
    if state.registry.lookup(&form.user).is_none() {
        return render_with_status(StatusCode::FORBIDDEN, DeniedTemplate {});
    }
    state.panels.open(&form.user, form.row).await;
    Redirect::to(&dashboard_url(&form.user, "notice", "")).into_response()
}

async fn panel_close_handler(
    State(state): State<Arc<AppState>>,
    Form(form): Form<PanelForm>,
) -> Response {
    if state.registry.lookup(&form.user).is_none() {
        return render_with_status(StatusCode::FORBIDDEN, DeniedTemplate {});
    }
    state.panels.close(&form.user, form.row).await;
    Redirect::to(&dashboard_url(&form.user, "notice", "")).into_response()
}

#[derive(Debug, Deserialize)]
struct UpdateForm {
    user: String,
    row: usize,
    status: String,
    #[serde(default)]
    cv_version: String,
    #[serde(default)]
    intro_email: String,
    #[serde(default)]
    rating: String,
}

async fn update_handler(
    State(state): State<Arc<AppState>>,
    Form(form): Form<UpdateForm>,
) -> Response {
    let Some(user) = state.registry.lookup(&form.user).cloned() else {
        return render_with_status(StatusCode::FORBIDDEN, DeniedTemplate {});
    };
    let target = user.target();

    // Choosing the applied status stamps today's date onto the status cell.
    let applied_date = if form.status == STATUS_APPLIED_RAW {
        chrono::Local::now().date_naive().format("%Y-%m-%d").to_string()
    } else {
        String::new()
    };
    let update = JobUpdate {
        row_index: form.row,
        status: form.status,
        cv_version: form.cv_version,
        intro_email: form.intro_email,
        applied_date,
        rating: form.rating,
    };

    match apply_update(
        state.source.store().as_ref(),
        &target,
        &state.columns,
        &update,
    )
    .await
    {
        Ok(()) => {
            state.panels.close(&user.user_id, form.row).await;
            state.source.invalidate(&target).await;
            Redirect::to(&dashboard_url(&user.user_id, "notice", "saved")).into_response()
        }
        Err(err) => {
            warn!(user_id = %user.user_id, row = form.row, error = %err, "update failed");
            Redirect::to(&dashboard_url(&user.user_id, "error", "save_failed")).into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
struct SummarizeForm {
    user: String,
    row: usize,
}

async fn summarize_handler(
    State(state): State<Arc<AppState>>,
    Form(form): Form<SummarizeForm>,
) -> Response {
    let Some(user) = state.registry.lookup(&form.user).cloned() else {
        return render_with_status(StatusCode::FORBIDDEN, DeniedTemplate {});
    };
    let target = user.target();

    let records = match state.source.load(&target).await {
        Ok(records) => records,
        Err(err) => {
            warn!(user_id = %user.user_id, error = %err, "sheet load failed before summarize");
            return Redirect::to(&dashboard_url(&user.user_id, "error", "summarize_failed"))
                .into_response();
        }
    };
    let Some(record) = records.iter().find(|r| r.row_index == form.row) else {
        return Redirect::to(&dashboard_url(&user.user_id, "error", "row_missing"))
            .into_response();
    };

    let summary = match state.summarizer.summarize(&record.description).await {
        Ok(summary) => summary,
        Err(SummarizeError::EmptyInput) => {
            return Redirect::to(&dashboard_url(&user.user_id, "error", "no_description"))
                .into_response();
        }
        Err(err) => {
            warn!(user_id = %user.user_id, row = form.row, error = %err, "summarize failed");
            return Redirect::to(&dashboard_url(&user.user_id, "error", "summarize_failed"))
                .into_response();
        }
    };

    match write_summary(
        state.source.store().as_ref(),
        &target,
        &state.columns,
        form.row,
        &summary,
    )
    .await
    {
        Ok(()) => {
            state.source.invalidate(&target).await;
            Redirect::to(&dashboard_url(&user.user_id, "notice", "summary_saved")).into_response()
        }
        Err(err) => {
            warn!(user_id = %user.user_id, row = form.row, error = %err, "summary write failed");
            Redirect::to(&dashboard_url(&user.user_id, "error", "save_failed")).into_response()
        }
    }
}

async fn app_css_handler(State(state): State<Arc<AppState>>) -> Response {
    let css_path = state.workspace_root.join("assets/static/app.css");
    match tokio::fs::read_to_string(&css_path).await {
        Ok(css) => ([(header::CONTENT_TYPE, "text/css; charset=utf-8")], css).into_response(),
        Err(_) => (
            StatusCode::NOT_FOUND,
            Html("/* missing app.css */".to_string()),
        )
            .into_response(),
    }
}

fn render_html<T: Template>(tpl: T) -> Response {
    render_with_status(StatusCode::OK, tpl)
}

fn render_with_status<T: Template>(status: StatusCode, tpl: T) -> Response {
    match tpl.render() {
        Ok(html) => (status, Html(html)).into_response(),
        Err(err) => server_error(anyhow::anyhow!(err.to_string())),
    }
}

fn server_error(err: anyhow::Error) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Html(format!("Server error: {}", err)),
    )
        .into_response()
}
