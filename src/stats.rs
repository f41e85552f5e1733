use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

use crate::types::{Project, StatsSummary, UserProfile};

const JOIN_DATE_FORMAT: &str = "%B %d, %Y";

/// Reduces a profile and its projects, in API listing order, to a summary.
/// Total over any input: unparsable timestamps become `None`, sums
/// saturate.
#[must_use]
pub fn summarize(
    profile: &UserProfile,
    projects: &[Project],
    now: DateTime<Utc>,
) -> StatsSummary {
    let total_loves = sum(projects, |p| p.loves);
    let total_favorites = sum(projects, |p| p.favorites);
    let total_views = sum(projects, |p| p.views);
    let count = projects.len() as u64;

    let most_recent = projects.first().cloned();
    let days_since_last_activity = most_recent
        .as_ref()
        .and_then(|p| p.modified.as_deref())
        .and_then(parse_timestamp)
        .map(|modified| now.signed_duration_since(modified).num_days().max(0));

    StatsSummary {
        username: profile.username.clone(),
        id: profile.id,
        country: profile.country.clone(),
        bio: profile.bio.clone(),
        status: profile.status.clone(),
        is_staff: profile.is_staff,
        joined: profile.joined.clone(),
        join_date: profile.joined.as_deref().and_then(format_join_date),
        followers: profile.followers,
        following: profile.following,
        follower_ratio: follower_ratio(profile.followers, profile.following),
        project_count: count,
        favorited_count: profile.favorited,
        total_loves,
        total_favorites,
        total_views,
        avg_loves: average(total_loves, count),
        avg_favorites: average(total_favorites, count),
        avg_views: average(total_views, count),
        most_loved: max_first_by(projects, |p| p.loves).cloned(),
        most_viewed: max_first_by(projects, |p| p.views).cloned(),
        most_recent,
        days_since_last_activity,
    }
}

fn sum<F: Fn(&Project) -> u64>(projects: &[Project], f: F) -> u64 {
    projects.iter().map(f).fold(0, u64::saturating_add)
}

/// `total / max(count, 1)`, to 2 decimal places.
#[must_use]
pub fn average(total: u64, count: u64) -> f64 {
    round2(total as f64 / count.max(1) as f64)
}

#[must_use]
pub fn follower_ratio(followers: u64, following: u64) -> f64 {
    if following > 0 {
        round2(followers as f64 / following as f64)
    } else {
        followers as f64
    }
}

/// Maximum by `key`; among equals the earliest wins. `Iterator::max_by_key`
/// keeps the last, so it is not used here.
fn max_first_by<F: Fn(&Project) -> u64>(
    projects: &[Project],
    key: F,
) -> Option<&Project> {
    projects.iter().fold(None, |best: Option<&Project>, p| match best {
        Some(b) if key(b) >= key(p) => Some(b),
        _ => Some(p),
    })
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// Accepts RFC 3339, a naive `YYYY-MM-DDTHH:MM:SS[.f]` (taken as UTC) or a
/// bare date.
#[must_use]
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(t) = DateTime::parse_from_rfc3339(s) {
        return Some(t.with_timezone(&Utc));
    }
    if let Ok(t) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(t.and_utc());
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|t| t.and_utc())
}

#[must_use]
pub fn format_join_date(joined: &str) -> Option<String> {
    parse_timestamp(joined).map(|t| t.format(JOIN_DATE_FORMAT).to_string())
}
