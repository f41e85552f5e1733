use std::time::Duration;

use async_trait::async_trait;
use reqwest::{StatusCode, Url};

use crate::{
    error::{Error, Result},
    types::{Project, UserProfile},
};

/// Where profiles and project listings come from.
#[async_trait]
pub trait ProfileSource: Send + Sync {
    async fn profile(&self, username: &str) -> Result<UserProfile>;

    async fn projects_page(
        &self,
        username: &str,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Project>>;
}

#[derive(Debug, Clone, Copy)]
pub struct Paging {
    pub page_size: usize,
    pub max_projects: usize,
}

impl Default for Paging {
    fn default() -> Self {
        Self {
            page_size: 100,
            max_projects: 1000,
        }
    }
}

/// Fetches the profile, then every project page until an empty page or
/// `paging.max_projects`, keeping the source's order.
#[tracing::instrument(skip(source))]
pub async fn fetch_user(
    source: &dyn ProfileSource,
    username: &str,
    paging: Paging,
) -> Result<(UserProfile, Vec<Project>)> {
    let profile = source.profile(username).await?;
    let page_size = paging.page_size.max(1);
    let mut projects: Vec<Project> = Vec::new();
    while projects.len() < paging.max_projects {
        let offset = projects.len();
        let page = source.projects_page(username, offset, page_size).await?;
        tracing::debug!(offset, len = page.len(), "Got projects page.");
        if page.is_empty() {
            break;
        }
        projects.extend(page);
    }
    projects.truncate(paging.max_projects);
    tracing::info!(id = profile.id, projects = projects.len(), "Fetched.");
    Ok((profile, projects))
}

pub struct ScratchClient {
    http: reqwest::Client,
    base: Url,
}

impl ScratchClient {
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let base = Url::parse(base_url)?;
        if base.cannot_be_a_base() {
            anyhow::bail!("Not a base URL: {base_url:?}");
        }
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!(
                env!("CARGO_PKG_NAME"),
                "/",
                env!("CARGO_PKG_VERSION")
            ))
            .build()?;
        Ok(Self { http, base })
    }

    fn user_url(&self, username: &str, tail: &[&str]) -> Url {
        let mut url = self.base.clone();
        // Checked for cannot-be-a-base in `new`.
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push("users").push(username);
            segments.extend(tail);
        }
        url
    }
}

#[async_trait]
impl ProfileSource for ScratchClient {
    async fn profile(&self, username: &str) -> Result<UserProfile> {
        let url = self.user_url(username, &[]);
        tracing::debug!(%url, "Fetching profile.");
        let resp = self.http.get(url).send().await?;
        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return Err(Error::NotFound(username.to_string()));
        }
        if !status.is_success() {
            return Err(Error::Upstream(format!(
                "Profile request failed with {status}"
            )));
        }
        let body = resp.text().await?;
        parse_profile(&body)?
            .ok_or_else(|| Error::NotFound(username.to_string()))
    }

    async fn projects_page(
        &self,
        username: &str,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Project>> {
        let mut url = self.user_url(username, &["projects"]);
        url.query_pairs_mut()
            .append_pair("limit", &limit.to_string())
            .append_pair("offset", &offset.to_string());
        tracing::debug!(%url, "Fetching projects.");
        let resp = self.http.get(url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Upstream(format!(
                "Projects request failed with {status}"
            )));
        }
        let body = resp.text().await?;
        parse_projects(&body)
    }
}

/// `None` when the body says there is no such user.
fn parse_profile(body: &str) -> Result<Option<UserProfile>> {
    if body.trim().is_empty() {
        return Ok(None);
    }
    let user: Option<wire::User> = serde_json::from_str(body)?;
    Ok(user.and_then(wire::User::into_profile))
}

fn parse_projects(body: &str) -> Result<Vec<Project>> {
    if body.trim().is_empty() {
        return Ok(Vec::new());
    }
    let projects: Option<Vec<wire::Project>> = serde_json::from_str(body)?;
    Ok(projects
        .unwrap_or_default()
        .into_iter()
        .map(wire::Project::into_project)
        .collect())
}

/// Response shapes. Everything the service does not strictly need is
/// optional, and absent numbers become zero on conversion.
mod wire {
    use serde::Deserialize;

    #[derive(Deserialize, Default)]
    #[serde(default)]
    pub struct User {
        pub id: Option<u64>,
        pub username: Option<String>,
        pub scratchteam: Option<bool>,
        pub history: Option<UserHistory>,
        pub profile: Option<Profile>,
    }

    #[derive(Deserialize, Default)]
    #[serde(default)]
    pub struct UserHistory {
        pub joined: Option<String>,
    }

    #[derive(Deserialize, Default)]
    #[serde(default)]
    pub struct Profile {
        pub bio: Option<String>,
        pub status: Option<String>,
        pub country: Option<String>,
        pub stats: Option<ProfileStats>,
    }

    #[derive(Deserialize, Default)]
    #[serde(default)]
    pub struct ProfileStats {
        pub followers: Option<u64>,
        pub following: Option<u64>,
        pub projects: Option<u64>,
        pub favorited: Option<u64>,
    }

    #[derive(Deserialize, Default)]
    #[serde(default)]
    pub struct Project {
        pub id: u64,
        pub title: Option<String>,
        pub stats: Option<ProjectStats>,
        pub history: Option<ProjectHistory>,
    }

    #[derive(Deserialize, Default)]
    #[serde(default)]
    pub struct ProjectStats {
        pub loves: Option<u64>,
        pub favorites: Option<u64>,
        pub views: Option<u64>,
    }

    #[derive(Deserialize, Default)]
    #[serde(default)]
    pub struct ProjectHistory {
        pub modified: Option<String>,
    }

    impl Project {
        pub fn into_project(self) -> crate::types::Project {
            let stats = self.stats.unwrap_or_default();
            crate::types::Project {
                id: self.id,
                title: self.title.unwrap_or_default(),
                loves: stats.loves.unwrap_or(0),
                favorites: stats.favorites.unwrap_or(0),
                views: stats.views.unwrap_or(0),
                modified: self.history.and_then(|h| h.modified),
            }
        }
    }

    impl User {
        pub fn into_profile(self) -> Option<crate::types::UserProfile> {
            let id = self.id?;
            let profile = self.profile.unwrap_or_default();
            let stats = profile.stats.unwrap_or_default();
            Some(crate::types::UserProfile {
                username: self.username.unwrap_or_default(),
                id,
                joined: self.history.and_then(|h| h.joined),
                country: profile
                    .country
                    .unwrap_or_else(|| "Unknown".to_string()),
                bio: profile.bio.unwrap_or_default(),
                status: profile.status.unwrap_or_default(),
                is_staff: self.scratchteam.unwrap_or(false),
                followers: stats.followers.unwrap_or(0),
                following: stats.following.unwrap_or(0),
                projects: stats.projects.unwrap_or(0),
                favorited: stats.favorited.unwrap_or(0),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    };

    use super::*;

    /// Serves `full_pages` pages of `page_size`, then empty pages.
    pub struct Paged {
        pub full_pages: usize,
        pub offsets: Mutex<Vec<usize>>,
        pub profile_calls: AtomicUsize,
    }

    impl Paged {
        fn new(full_pages: usize) -> Self {
            Self {
                full_pages,
                offsets: Mutex::new(Vec::new()),
                profile_calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ProfileSource for Paged {
        async fn profile(&self, username: &str) -> Result<UserProfile> {
            self.profile_calls.fetch_add(1, Ordering::SeqCst);
            Ok(UserProfile {
                username: username.to_string(),
                id: 1,
                ..Default::default()
            })
        }

        async fn projects_page(
            &self,
            _username: &str,
            offset: usize,
            limit: usize,
        ) -> Result<Vec<Project>> {
            self.offsets.lock().unwrap().push(offset);
            if offset >= self.full_pages * limit {
                return Ok(Vec::new());
            }
            Ok((offset..offset + limit)
                .map(|i| Project {
                    id: i as u64,
                    ..Default::default()
                })
                .collect())
        }
    }

    struct Missing;

    #[async_trait]
    impl ProfileSource for Missing {
        async fn profile(&self, username: &str) -> Result<UserProfile> {
            Err(Error::NotFound(username.to_string()))
        }

        async fn projects_page(
            &self,
            _: &str,
            _: usize,
            _: usize,
        ) -> Result<Vec<Project>> {
            panic!("Projects must not be fetched for a missing user.")
        }
    }

    #[tokio::test]
    async fn three_full_pages_then_empty() {
        let source = Paged::new(3);
        let (profile, projects) =
            fetch_user(&source, "someone", Paging::default()).await.unwrap();
        assert_eq!(profile.username, "someone");
        assert_eq!(projects.len(), 300);
        assert_eq!(*source.offsets.lock().unwrap(), vec![0, 100, 200, 300]);
        assert!(projects.iter().enumerate().all(|(i, p)| p.id == i as u64));
    }

    #[tokio::test]
    async fn stops_at_cap() {
        let source = Paged::new(50);
        let (_, projects) =
            fetch_user(&source, "prolific", Paging::default()).await.unwrap();
        assert_eq!(projects.len(), 1000);
        assert_eq!(source.offsets.lock().unwrap().len(), 10);
    }

    #[tokio::test]
    async fn cap_not_a_multiple_of_page_size() {
        let source = Paged::new(50);
        let paging = Paging {
            page_size: 100,
            max_projects: 250,
        };
        let (_, projects) =
            fetch_user(&source, "prolific", paging).await.unwrap();
        assert_eq!(projects.len(), 250);
        assert_eq!(*source.offsets.lock().unwrap(), vec![0, 100, 200]);
    }

    #[tokio::test]
    async fn no_projects() {
        let source = Paged::new(0);
        let (_, projects) =
            fetch_user(&source, "new", Paging::default()).await.unwrap();
        assert!(projects.is_empty());
        assert_eq!(source.profile_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn missing_user() {
        let result = fetch_user(&Missing, "ghost", Paging::default()).await;
        assert_eq!(result, Err(Error::NotFound("ghost".to_string())));
    }

    #[test]
    fn profile_from_json() {
        let body = r#"{
            "id": 1882674,
            "username": "griffpatch",
            "scratchteam": false,
            "history": {"joined": "2012-10-24T12:59:19.000Z"},
            "profile": {
                "id": 1,
                "images": {},
                "status": "Making games",
                "bio": "Hi",
                "country": "United Kingdom",
                "stats": {"followers": 500, "following": 20}
            }
        }"#;
        let p = parse_profile(body).unwrap().unwrap();
        assert_eq!(p.id, 1882674);
        assert_eq!(p.username, "griffpatch");
        assert_eq!(p.joined.as_deref(), Some("2012-10-24T12:59:19.000Z"));
        assert_eq!(p.country, "United Kingdom");
        assert_eq!(p.status, "Making games");
        assert_eq!(p.followers, 500);
        assert_eq!(p.following, 20);
        assert_eq!(p.favorited, 0);
        assert!(!p.is_staff);
    }

    #[test]
    fn profile_not_found_shapes() {
        assert_eq!(parse_profile("").unwrap(), None);
        assert_eq!(parse_profile("null").unwrap(), None);
        assert_eq!(parse_profile(r#"{"id": null}"#).unwrap(), None);
        assert_eq!(parse_profile(r#"{"code": "NotFound"}"#).unwrap(), None);
    }

    #[test]
    fn profile_garbage_is_upstream() {
        assert!(matches!(
            parse_profile("<html>oops</html>"),
            Err(Error::Upstream(_))
        ));
    }

    #[test]
    fn minimal_profile_defaults() {
        let p = parse_profile(r#"{"id": 7}"#).unwrap().unwrap();
        assert_eq!(p.id, 7);
        assert_eq!(p.country, "Unknown");
        assert_eq!(p.followers, 0);
        assert!(p.joined.is_none());
    }

    #[test]
    fn projects_null_metrics_are_zero() {
        let body = r#"[
            {"id": 1, "title": "A",
             "stats": {"loves": 3, "favorites": null, "views": 10},
             "history": {"modified": "2024-01-01T00:00:00.000Z"}},
            {"id": 2, "title": null, "stats": null},
            {"id": 3}
        ]"#;
        let ps = parse_projects(body).unwrap();
        assert_eq!(ps.len(), 3);
        assert_eq!(ps[0].loves, 3);
        assert_eq!(ps[0].favorites, 0);
        assert_eq!(ps[0].views, 10);
        assert_eq!(ps[0].modified.as_deref(), Some("2024-01-01T00:00:00.000Z"));
        assert_eq!(ps[1].title, "");
        assert_eq!(ps[1].loves, 0);
        assert_eq!(ps[2].views, 0);
        assert!(ps[2].modified.is_none());
    }

    #[test]
    fn projects_empty_shapes() {
        assert!(parse_projects("").unwrap().is_empty());
        assert!(parse_projects("[]").unwrap().is_empty());
        assert!(parse_projects("null").unwrap().is_empty());
    }

    #[test]
    fn user_urls_escape_username() {
        let client = ScratchClient::new(
            "https://api.scratch.mit.edu",
            Duration::from_secs(1),
        )
        .unwrap();
        assert_eq!(
            client.user_url("griffpatch", &[]).as_str(),
            "https://api.scratch.mit.edu/users/griffpatch"
        );
        assert_eq!(
            client.user_url("a/b c", &["projects"]).as_str(),
            "https://api.scratch.mit.edu/users/a%2Fb%20c/projects"
        );
    }

    mod client {
        use axum::{
            extract::{Path, Query},
            http::StatusCode,
            response::{IntoResponse, Response},
            routing::get,
            Json, Router,
        };
        use serde_json::json;

        use super::*;

        const BUSY_PROJECTS: usize = 250;

        #[derive(serde::Deserialize)]
        struct Page {
            limit: usize,
            offset: usize,
        }

        async fn user(Path(username): Path<String>) -> Response {
            match username.as_str() {
                "ghost" => StatusCode::NOT_FOUND.into_response(),
                "flaky" => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
                "nullid" => Json(json!({"id": null})).into_response(),
                _ => Json(json!({
                    "id": 9,
                    "username": username,
                    "history": {"joined": "2020-01-01T00:00:00.000Z"},
                }))
                .into_response(),
            }
        }

        async fn projects(
            Path(username): Path<String>,
            Query(page): Query<Page>,
        ) -> Response {
            match username.as_str() {
                "busy" => {
                    let end = (page.offset + page.limit).min(BUSY_PROJECTS);
                    let body: Vec<_> = (page.offset..end)
                        .map(|i| {
                            json!({
                                "id": i,
                                "title": format!("Project {i}"),
                                "stats": {"loves": 1, "views": i},
                            })
                        })
                        .collect();
                    Json(body).into_response()
                }
                "brokenpages" => {
                    StatusCode::INTERNAL_SERVER_ERROR.into_response()
                }
                _ => Json(json!([])).into_response(),
            }
        }

        /// Base URL of a fake Scratch API on a free local port.
        async fn serve() -> String {
            let app = Router::new()
                .route("/users/:username", get(user))
                .route("/users/:username/projects", get(projects));
            let listener =
                tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            tokio::spawn(async move { axum::serve(listener, app).await });
            format!("http://{addr}")
        }

        async fn fetch(
            username: &str,
        ) -> Result<(UserProfile, Vec<Project>)> {
            let base = serve().await;
            let client =
                ScratchClient::new(&base, Duration::from_secs(5)).unwrap();
            fetch_user(&client, username, Paging::default()).await
        }

        #[tokio::test]
        async fn pages_through_by_offset() {
            let (profile, projects) = fetch("busy").await.unwrap();
            assert_eq!(profile.id, 9);
            assert_eq!(profile.username, "busy");
            assert_eq!(
                profile.joined.as_deref(),
                Some("2020-01-01T00:00:00.000Z")
            );
            assert_eq!(projects.len(), BUSY_PROJECTS);
            assert!(projects
                .iter()
                .enumerate()
                .all(|(i, p)| p.id == i as u64 && p.views == i as u64));
            assert_eq!(projects[249].title, "Project 249");
        }

        #[tokio::test]
        async fn user_without_projects() {
            let (profile, projects) = fetch("quiet").await.unwrap();
            assert_eq!(profile.username, "quiet");
            assert!(projects.is_empty());
        }

        #[tokio::test]
        async fn status_404_is_not_found() {
            let result = fetch("ghost").await;
            assert_eq!(result, Err(Error::NotFound("ghost".to_string())));
        }

        #[tokio::test]
        async fn null_id_is_not_found() {
            let result = fetch("nullid").await;
            assert_eq!(result, Err(Error::NotFound("nullid".to_string())));
        }

        #[tokio::test]
        async fn profile_status_500_is_upstream() {
            match fetch("flaky").await {
                Err(Error::Upstream(message)) => {
                    assert!(message.contains("500"), "{message}");
                }
                other => panic!("Unexpected result: {other:?}"),
            }
        }

        #[tokio::test]
        async fn projects_status_500_is_upstream() {
            match fetch("brokenpages").await {
                Err(Error::Upstream(message)) => {
                    assert!(message.contains("Projects"), "{message}");
                }
                other => panic!("Unexpected result: {other:?}"),
            }
        }

        #[tokio::test]
        async fn unreachable_host_is_upstream() {
            // Bind then drop, so nothing is listening on the port.
            let listener =
                tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            drop(listener);
            let client = ScratchClient::new(
                &format!("http://{addr}"),
                Duration::from_secs(5),
            )
            .unwrap();
            let result =
                fetch_user(&client, "anyone", Paging::default()).await;
            assert!(matches!(result, Err(Error::Upstream(_))), "{result:?}");
        }
    }
}
