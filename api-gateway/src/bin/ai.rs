//! AI Lambda - Model-backed analysis of stored documents.
//!
//! Endpoints:
//! - POST /api/ai/analyze/{documentId} - Structured analysis, saved on the document
//! - POST /api/ai/summarize/{documentId} - Plain-text summary
//! - POST /api/ai/ask/{documentId} - Answer a question about the document
//! - POST /api/ai/extract/{documentId} - Title, author, date, keywords and entities
//!
//! Every call needs read access to the document and is throttled per user.

use lambda_http::{run, service_fn, Body, Error, Request, Response};
use std::future::Future;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use shared::auth::{authenticate, TokenService};
use shared::documents::{self, authorize, Access, DocumentRow};
use shared::http::{parse_uuid, segments, success, RequestLog};
use shared::models::{AnswerResponse, AskRequest, SummaryResponse};
use shared::rate_limit::user_key;
use shared::{
    parse_body, AppContext, AuthenticatedUser, BedrockGenerator, DocumentAnalysis,
    DocumentAssistant, DocumentInfo, RateLimiter,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operation {
    Analyze,
    Summarize,
    Ask,
    Extract,
}

impl Operation {
    fn from_segment(segment: &str) -> Option<Self> {
        match segment {
            "analyze" => Some(Self::Analyze),
            "summarize" => Some(Self::Summarize),
            "ask" => Some(Self::Ask),
            "extract" => Some(Self::Extract),
            _ => None,
        }
    }
}

/// An operation with its validated input.
enum Task {
    Analyze,
    Summarize,
    Ask(String),
    Extract,
}

/// What a task produced.
enum Outcome {
    Analysis(DocumentAnalysis),
    Summary(String),
    Answer(String),
    Info(DocumentInfo),
}

/// Parse `POST /api/ai/{operation}/{documentId}`.
fn parse_route(method: &str, path: &str) -> Option<(Operation, String)> {
    match (method, segments(path).as_slice()) {
        ("POST", ["api", "ai", operation, document_id]) => {
            Operation::from_segment(operation).map(|op| (op, document_id.to_string()))
        }
        _ => None,
    }
}

/// Application state
struct AppState {
    db_pool: sqlx::PgPool,
    tokens: TokenService,
    limiter: RateLimiter,
    assistant: DocumentAssistant,
}

impl AppState {
    async fn new() -> Result<Self, Error> {
        let ctx = AppContext::load().await?;
        let tokens = ctx.token_service().await?;
        let limiter = ctx.rate_limiter("ai", &ctx.config.rate_limit.ai)?;

        let generator = BedrockGenerator::new(
            aws_sdk_bedrockruntime::Client::new(&ctx.aws),
            ctx.config.ai.clone(),
        );
        let assistant = DocumentAssistant::new(Arc::new(generator), ctx.config.ai.max_input_chars);

        info!(model_id = %ctx.config.ai.model_id, "AI assistant ready");

        Ok(Self {
            db_pool: ctx.pool,
            tokens,
            limiter,
            assistant,
        })
    }
}

async fn handler(state: Arc<AppState>, event: Request) -> Result<Response<Body>, Error> {
    let request = RequestLog::start(&event);

    info!("AI request: {} {}", request.method, request.path);

    request.finish(dispatch(&state, &event, &request.method, &request.path).await)
}

async fn dispatch(
    state: &AppState,
    event: &Request,
    method: &str,
    path: &str,
) -> shared::Result<Response<Body>> {
    let (operation, raw_id) = parse_route(method, path)
        .ok_or_else(|| shared::Error::NotFound("Not found".to_string()))?;

    let caller = authenticate(event, &state.tokens)?;
    let document_id = parse_uuid(&raw_id, "document id")?;
    let task = match operation {
        Operation::Analyze => Task::Analyze,
        Operation::Summarize => Task::Summarize,
        Operation::Ask => Task::Ask(parse_body!(event.body(), AskRequest, normalized).question),
        Operation::Extract => Task::Extract,
    };

    info!(
        user_id = %caller.user_id,
        document_id = %document_id,
        operation = ?operation,
        "Running AI operation"
    );

    let outcome = run_task(
        &state.limiter,
        &state.assistant,
        &caller,
        task,
        documents::get(&state.db_pool, document_id),
    )
    .await?;

    match outcome {
        Outcome::Analysis(analysis) => {
            documents::store_analysis(&state.db_pool, document_id, &serde_json::to_value(&analysis)?)
                .await?;
            success(200, analysis)
        }
        Outcome::Summary(summary) => success(200, SummaryResponse { summary }),
        Outcome::Answer(answer) => success(200, AnswerResponse { answer }),
        Outcome::Info(info) => success(200, info),
    }
}

/// Throttle the caller, then load and authorize the document, then call the model.
///
/// `load` is not polled for a rejected caller.
async fn run_task<F>(
    limiter: &RateLimiter,
    assistant: &DocumentAssistant,
    caller: &AuthenticatedUser,
    task: Task,
    load: F,
) -> shared::Result<Outcome>
where
    F: Future<Output = shared::Result<DocumentRow>>,
{
    limiter.check(&user_key(caller.user_id)).await?;

    let document = load.await?;
    authorize(&document, Some(caller), Access::Read)?;

    Ok(match task {
        Task::Analyze => Outcome::Analysis(assistant.analyze(&document).await?),
        Task::Summarize => Outcome::Summary(assistant.summarize(&document).await?),
        Task::Ask(question) => Outcome::Answer(assistant.answer(&document, &question).await?),
        Task::Extract => Outcome::Info(assistant.extract_information(&document).await?),
    })
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    let state = Arc::new(AppState::new().await?);
    let state_clone = state.clone();

    run(service_fn(move |event| {
        let state = state_clone.clone();
        async move { handler(state, event).await }
    }))
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use shared::ai::GenerationRequest;
    use shared::rate_limit::{MemoryStore, RateLimitPolicy};
    use shared::{Role, TextGenerator};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    #[derive(Default)]
    struct Counting {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TextGenerator for Counting {
        async fn generate(&self, _request: &GenerationRequest) -> shared::Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok("A short summary.".to_string())
        }
    }

    fn limiter(max_requests: u32) -> RateLimiter {
        RateLimiter::new(
            Arc::new(MemoryStore::new()),
            RateLimitPolicy {
                name: "ai",
                max_requests,
                window: chrono::Duration::seconds(60),
                block: Some(chrono::Duration::minutes(5)),
            },
        )
    }

    fn caller() -> AuthenticatedUser {
        AuthenticatedUser {
            user_id: Uuid::new_v4(),
            email: "erin@example.com".to_string(),
            role: Role::User,
        }
    }

    fn document(owner: Uuid, is_public: bool) -> DocumentRow {
        let now = Utc::now();
        DocumentRow {
            id: Uuid::new_v4(),
            title: "Quarterly notes".to_string(),
            content: "Revenue grew in every region this quarter.".to_string(),
            user_id: owner,
            is_public,
            tags: vec![],
            metadata: serde_json::json!({}),
            ai_analysis: None,
            analyzed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_throttled_caller_never_reaches_model() {
        let generator = Arc::new(Counting::default());
        let assistant = DocumentAssistant::new(generator.clone(), 1000);
        let limiter = limiter(1);
        let caller = caller();
        let doc = document(caller.user_id, false);

        let outcome = run_task(&limiter, &assistant, &caller, Task::Summarize, async {
            Ok(doc.clone())
        })
        .await
        .unwrap();
        assert!(matches!(outcome, Outcome::Summary(ref s) if s == "A short summary."));
        assert_eq!(generator.calls.load(Ordering::SeqCst), 1);

        let loaded = AtomicUsize::new(0);
        let err = run_task(&limiter, &assistant, &caller, Task::Summarize, async {
            loaded.fetch_add(1, Ordering::SeqCst);
            Ok(doc.clone())
        })
        .await
        .err()
        .unwrap();
        assert_eq!(err.status_code(), 429);
        assert_eq!(loaded.load(Ordering::SeqCst), 0);
        assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_private_document_of_another_user_is_denied() {
        let generator = Arc::new(Counting::default());
        let assistant = DocumentAssistant::new(generator.clone(), 1000);
        let limiter = limiter(10);
        let doc = document(Uuid::new_v4(), false);

        let err = run_task(&limiter, &assistant, &caller(), Task::Extract, async { Ok(doc) })
            .await
            .err()
            .unwrap();
        assert_eq!(err.status_code(), 403);
        assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_route_parsing() {
        assert_eq!(
            parse_route("POST", "/api/ai/analyze/abc"),
            Some((Operation::Analyze, "abc".to_string()))
        );
        assert_eq!(
            parse_route("POST", "/api/ai/ask/abc"),
            Some((Operation::Ask, "abc".to_string()))
        );
        assert_eq!(
            parse_route("POST", "/api/ai/extract/abc"),
            Some((Operation::Extract, "abc".to_string()))
        );
        assert_eq!(parse_route("GET", "/api/ai/summarize/abc"), None);
        assert_eq!(parse_route("POST", "/api/ai/translate/abc"), None);
        assert_eq!(parse_route("POST", "/api/ai/analyze"), None);
    }
}
