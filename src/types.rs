use utoipa::ToSchema;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserProfile {
    pub username: String,
    pub id: u64,
    pub joined: Option<String>,
    pub country: String,
    pub bio: String,
    pub status: String,
    pub is_staff: bool,
    pub followers: u64,
    pub following: u64,
    pub projects: u64,
    pub favorited: u64,
}

#[derive(
    Debug, Clone, Default, PartialEq, Eq, serde::Serialize, ToSchema,
)]
pub struct Project {
    pub id: u64,
    pub title: String,
    pub loves: u64,
    pub favorites: u64,
    pub views: u64,
    pub modified: Option<String>,
}

/// Derived engagement figures for one user.
#[derive(Debug, Clone, PartialEq, serde::Serialize, ToSchema)]
pub struct StatsSummary {
    pub username: String,
    pub id: u64,
    pub country: String,
    pub bio: String,
    pub status: String,
    pub is_staff: bool,

    /// Join timestamp as reported upstream.
    pub joined: Option<String>,
    /// e.g. "August 03, 2021".
    pub join_date: Option<String>,

    pub followers: u64,
    pub following: u64,
    pub follower_ratio: f64,

    /// Number of projects actually fetched, at most the configured cap.
    pub project_count: u64,
    pub favorited_count: u64,

    pub total_loves: u64,
    pub total_favorites: u64,
    pub total_views: u64,
    pub avg_loves: f64,
    pub avg_favorites: f64,
    pub avg_views: f64,

    pub most_loved: Option<Project>,
    pub most_viewed: Option<Project>,
    /// First project in the API's listing order.
    pub most_recent: Option<Project>,

    pub days_since_last_activity: Option<i64>,
}
