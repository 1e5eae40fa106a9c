use chrono::{DateTime, Utc};
use garde::Validate;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};

use super::outcome::TaskOutcome;
use super::status::StatusRecord;

/// Marketplace storefront the scraper targets.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, EnumString, Display, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Domain {
    Ru,
    #[default]
    Kz,
    By,
}

/// Allowed `limit` range for a job kind.
#[derive(Debug, Clone, Copy)]
pub struct LimitBounds {
    pub min: u32,
    pub max: u32,
}

impl Default for LimitBounds {
    fn default() -> Self {
        Self { min: 1, max: 100 }
    }
}

/// Parameters shared by every scraping job kind.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
#[garde(context(LimitBounds))]
pub struct ScrapeParams {
    #[garde(length(chars, min = 1, max = 100), custom(not_blank))]
    pub query: String,

    #[garde(custom(limit_in_bounds))]
    pub limit: u32,

    #[garde(skip)]
    pub domain: Domain,
}

fn not_blank(value: &str, _ctx: &LimitBounds) -> garde::Result {
    if value.trim().is_empty() {
        return Err(garde::Error::new("query must not be blank"));
    }
    Ok(())
}

fn limit_in_bounds(value: &u32, ctx: &LimitBounds) -> garde::Result {
    if *value < ctx.min || *value > ctx.max {
        return Err(garde::Error::new(format!(
            "limit must be between {} and {}",
            ctx.min, ctx.max
        )));
    }
    Ok(())
}

impl ScrapeParams {
    pub fn new(query: impl Into<String>, limit: u32) -> Self {
        Self {
            query: query.into(),
            limit,
            domain: Domain::default(),
        }
    }

    pub fn with_domain(mut self, domain: Domain) -> Self {
        self.domain = domain;
        self
    }
}

/// What a job asks the scraping pipeline to do.
#[derive(Debug, Clone, Serialize, Deserialize, IntoStaticStr, PartialEq)]
#[serde(tag = "kind", content = "params", rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobKind {
    /// Parse then import into the catalog.
    FullImport(ScrapeParams),
    /// Parse only, nothing is written to the catalog.
    PreviewOnly(ScrapeParams),
    /// Fixed smoke run of the parse/import chain.
    SmokeChain,
    /// Unauthenticated parser smoke run.
    SmokeParser(ScrapeParams),
}

impl JobKind {
    pub fn full_import(query: impl Into<String>, limit: u32) -> Self {
        JobKind::FullImport(ScrapeParams::new(query, limit))
    }

    pub fn preview(query: impl Into<String>, limit: u32) -> Self {
        JobKind::PreviewOnly(ScrapeParams::new(query, limit))
    }

    pub fn smoke_parser(query: impl Into<String>, limit: u32) -> Self {
        JobKind::SmokeParser(ScrapeParams::new(query, limit))
    }

    pub fn name(&self) -> &'static str {
        self.into()
    }

    pub fn params(&self) -> Option<&ScrapeParams> {
        match self {
            JobKind::FullImport(p) | JobKind::PreviewOnly(p) | JobKind::SmokeParser(p) => Some(p),
            JobKind::SmokeChain => None,
        }
    }

    /// Limit range the backend accepts for this kind.
    pub fn limit_bounds(&self) -> LimitBounds {
        match self {
            JobKind::FullImport(_) | JobKind::SmokeChain => LimitBounds { min: 1, max: 100 },
            JobKind::PreviewOnly(_) => LimitBounds { min: 1, max: 50 },
            JobKind::SmokeParser(_) => LimitBounds { min: 1, max: 10 },
        }
    }

    /// Check the parameters locally, before anything is sent.
    pub fn validate(&self) -> Result<(), garde::Report> {
        match self.params() {
            Some(params) => params.validate_with(&self.limit_bounds()),
            None => Ok(()),
        }
    }
}

/// A job visible to the user.
#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub id: String,
    pub kind: JobKind,
    pub submitted_at: DateTime<Utc>,
    pub status: StatusRecord,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<TaskOutcome>,
    /// When the job reached a terminal state or we stopped watching it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    /// The poll budget ran out before the backend reported a terminal state.
    pub watch_timed_out: bool,
}

impl Job {
    pub fn new(id: String, kind: JobKind, submitted_at: DateTime<Utc>) -> Self {
        Self {
            id,
            kind,
            submitted_at,
            status: StatusRecord::pending(),
            result: None,
            finished_at: None,
            watch_timed_out: false,
        }
    }

    pub fn elapsed(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.submitted_at
    }
}
