use utoipa::OpenApi;

use crate::{
    server::{StatsData, StatsErrors, StatsForm, StatsResponse},
    types::{Project, StatsSummary},
};

#[derive(OpenApi)]
#[openapi(
    paths(crate::server::stats_handler),
    components(
        schemas(
            StatsForm,
            StatsResponse,
            StatsData,
            StatsErrors,
            StatsSummary,
            Project
        )
    ),
    tags(
        (name = "scratchstats", description = "Scratch user statistics")
    ),
    info(
        title = "scratchstats API",
        version = "1.0",
        description = "Engagement summaries for Scratch users",
        license(
            name = "BSD-3-Clause"
        )
    )
)]
pub struct ApiDoc;
