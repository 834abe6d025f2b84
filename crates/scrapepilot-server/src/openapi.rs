use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "ScrapePilot API",
        version = "0.1.0",
        description = "Page rendering, job queue and LLM-assisted extraction."
    ),
    paths(
        crate::routes::scrape,
        crate::routes::detect,
        crate::routes::ai_status,
        crate::routes::create_job,
        crate::routes::list_jobs,
        crate::routes::get_job,
        crate::routes::get_job_result,
        crate::routes::cancel_job,
        crate::routes::credits,
        crate::routes::health,
    ),
    components(schemas(
        crate::dto::ScrapeRequest,
        crate::dto::ScrapeResponse,
        crate::dto::PerformanceResponse,
        crate::dto::DetectResponse,
        crate::dto::SuggestionResponse,
        crate::dto::AiStatusResponse,
        crate::dto::CreateJobResponse,
        crate::dto::JobResponse,
        crate::dto::JobErrorResponse,
        crate::dto::JobMetricsResponse,
        crate::dto::JobListResponse,
        crate::dto::JobResultResponse,
        crate::dto::CreditsResponse,
        crate::dto::HealthResponse,
        crate::dto::ErrorResponse,
    )),
    tags(
        (name = "scrape", description = "Synchronous scraping and extraction"),
        (name = "jobs", description = "Queued scrape jobs"),
        (name = "usage", description = "Credit balance"),
        (name = "system", description = "Health and system status"),
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDoc;

/// Adds the Bearer API-key security scheme to the OpenAPI document.
struct SecurityAddon;

impl utoipa::Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer",
                utoipa::openapi::security::SecurityScheme::Http(
                    utoipa::openapi::security::HttpBuilder::new()
                        .scheme(utoipa::openapi::security::HttpAuthScheme::Bearer)
                        .bearer_format("sp_live_...")
                        .description(Some("Account API key."))
                        .build(),
                ),
            );
        }
    }
}
