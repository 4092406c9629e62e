//! Document persistence and access rules.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::auth::AuthenticatedUser;
use crate::http::Pagination;
use crate::models::{CreateDocumentRequest, DocumentList, DocumentResponse, UpdateDocumentRequest};
use crate::{Error, Result};

const DOCUMENT_COLUMNS: &str = r#"
    id, title, content, user_id, is_public, tags, metadata,
    ai_analysis, analyzed_at, created_at, updated_at
"#;

/// Document row from the database.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DocumentRow {
    pub id: Uuid,
    pub title: String,
    pub content: String,
    pub user_id: Uuid,
    pub is_public: bool,
    pub tags: Vec<String>,
    pub metadata: serde_json::Value,
    pub ai_analysis: Option<serde_json::Value>,
    pub analyzed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Kind of access being requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
}

/// Decide whether `viewer` may access `document`.
///
/// Read: public documents, the owner and admins. Write: the owner only.
pub fn authorize(
    document: &DocumentRow,
    viewer: Option<&AuthenticatedUser>,
    access: Access,
) -> Result<()> {
    let is_owner = viewer.is_some_and(|v| v.user_id == document.user_id);
    let allowed = match access {
        Access::Read => document.is_public || is_owner || viewer.is_some_and(|v| v.is_admin()),
        Access::Write => is_owner,
    };

    if allowed {
        Ok(())
    } else {
        Err(Error::Forbidden("Access denied".to_string()))
    }
}

/// Which documents a listing covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    /// Everything owned by one user
    Owner(Uuid),
    /// Public documents only
    Public,
    /// Public documents plus those owned by the viewer, if any
    VisibleTo(Option<Uuid>),
}

/// Listing filter rendered into a parameterised WHERE clause.
#[derive(Debug, Clone)]
pub struct DocumentFilter {
    pub scope: Scope,
    pub search: Option<String>,
    pub tag: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum SqlParam {
    Uuid(Uuid),
    Text(String),
}

impl DocumentFilter {
    pub fn new(scope: Scope) -> Self {
        Self {
            scope,
            search: None,
            tag: None,
        }
    }

    pub fn search(mut self, search: Option<String>) -> Self {
        self.search = search.filter(|s| !s.trim().is_empty());
        self
    }

    pub fn tag(mut self, tag: Option<String>) -> Self {
        self.tag = tag
            .map(|t| t.trim().to_lowercase())
            .filter(|t| !t.is_empty());
        self
    }

    fn render(&self) -> (String, Vec<SqlParam>) {
        let mut clauses = Vec::new();
        let mut params = Vec::new();

        match &self.scope {
            Scope::Owner(owner) => {
                params.push(SqlParam::Uuid(*owner));
                clauses.push(format!("user_id = ${}", params.len()));
            }
            Scope::Public | Scope::VisibleTo(None) => clauses.push("is_public".to_string()),
            Scope::VisibleTo(Some(viewer)) => {
                params.push(SqlParam::Uuid(*viewer));
                clauses.push(format!("(is_public OR user_id = ${})", params.len()));
            }
        }

        if let Some(search) = &self.search {
            params.push(SqlParam::Text(like_pattern(search.trim())));
            let pattern = params.len();
            params.push(SqlParam::Text(search.trim().to_lowercase()));
            let tag = params.len();
            clauses.push(format!(
                "(title ILIKE ${p} OR content ILIKE ${p} OR ${t} = ANY(tags))",
                p = pattern,
                t = tag
            ));
        }

        if let Some(tag) = &self.tag {
            params.push(SqlParam::Text(tag.clone()));
            clauses.push(format!("${} = ANY(tags)", params.len()));
        }

        (clauses.join(" AND "), params)
    }
}

/// Substring pattern for ILIKE with `%`, `_` and `\` escaped.
pub fn like_pattern(input: &str) -> String {
    let mut pattern = String::with_capacity(input.len() + 2);
    pattern.push('%');
    for c in input.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

pub async fn create(
    pool: &PgPool,
    owner: Uuid,
    request: &CreateDocumentRequest,
) -> Result<DocumentRow> {
    let query = format!(
        r#"
        INSERT INTO documents (title, content, user_id, is_public, tags)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING {}
        "#,
        DOCUMENT_COLUMNS
    );
    Ok(sqlx::query_as::<_, DocumentRow>(&query)
        .bind(&request.title)
        .bind(&request.content)
        .bind(owner)
        .bind(request.is_public.unwrap_or(false))
        .bind(request.tags.clone().unwrap_or_default())
        .fetch_one(pool)
        .await
        .map_err(Error::from_db_owner)?)
}

pub async fn find(pool: &PgPool, id: Uuid) -> Result<Option<DocumentRow>> {
    let query = format!("SELECT {} FROM documents WHERE id = $1", DOCUMENT_COLUMNS);
    Ok(sqlx::query_as::<_, DocumentRow>(&query)
        .bind(id)
        .fetch_optional(pool)
        .await?)
}

/// Fetch a document or fail with 404.
pub async fn get(pool: &PgPool, id: Uuid) -> Result<DocumentRow> {
    find(pool, id)
        .await?
        .ok_or_else(|| Error::NotFound("Document not found".to_string()))
}

/// Apply the fields present in `request`; absent fields are left alone.
pub async fn update(
    pool: &PgPool,
    id: Uuid,
    owner: Uuid,
    request: &UpdateDocumentRequest,
) -> Result<DocumentRow> {
    let query = format!(
        r#"
        UPDATE documents
        SET title = COALESCE($3, title),
            content = COALESCE($4, content),
            is_public = COALESCE($5, is_public),
            tags = COALESCE($6, tags),
            updated_at = NOW()
        WHERE id = $1 AND user_id = $2
        RETURNING {}
        "#,
        DOCUMENT_COLUMNS
    );
    sqlx::query_as::<_, DocumentRow>(&query)
        .bind(id)
        .bind(owner)
        .bind(request.title.as_deref())
        .bind(request.content.as_deref())
        .bind(request.is_public)
        .bind(request.tags.clone())
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| Error::NotFound("Document not found".to_string()))
}

pub async fn delete(pool: &PgPool, id: Uuid, owner: Uuid) -> Result<()> {
    let result = sqlx::query("DELETE FROM documents WHERE id = $1 AND user_id = $2")
        .bind(id)
        .bind(owner)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(Error::NotFound("Document not found".to_string()));
    }
    Ok(())
}

/// Persist the latest AI analysis on the document.
pub async fn store_analysis(pool: &PgPool, id: Uuid, analysis: &serde_json::Value) -> Result<()> {
    sqlx::query("UPDATE documents SET ai_analysis = $2, analyzed_at = NOW() WHERE id = $1")
        .bind(id)
        .bind(analysis)
        .execute(pool)
        .await?;
    Ok(())
}

/// Newest-first page of documents matching `filter`, with the total count.
pub async fn list(
    pool: &PgPool,
    filter: &DocumentFilter,
    pagination: Pagination,
) -> Result<DocumentList> {
    let (where_clause, params) = filter.render();

    let select = format!(
        "SELECT {} FROM documents WHERE {} ORDER BY created_at DESC LIMIT ${} OFFSET ${}",
        DOCUMENT_COLUMNS,
        where_clause,
        params.len() + 1,
        params.len() + 2
    );
    let mut rows_query = sqlx::query_as::<_, DocumentRow>(&select);
    for param in &params {
        rows_query = match param {
            SqlParam::Uuid(id) => rows_query.bind(*id),
            SqlParam::Text(text) => rows_query.bind(text.clone()),
        };
    }
    let rows = rows_query
        .bind(i64::from(pagination.limit))
        .bind(pagination.offset())
        .fetch_all(pool)
        .await?;

    let count = format!("SELECT COUNT(*) FROM documents WHERE {}", where_clause);
    let mut count_query = sqlx::query_scalar::<_, i64>(&count);
    for param in &params {
        count_query = match param {
            SqlParam::Uuid(id) => count_query.bind(*id),
            SqlParam::Text(text) => count_query.bind(text.clone()),
        };
    }
    let total = count_query.fetch_one(pool).await?;

    Ok(DocumentList {
        documents: rows.into_iter().map(DocumentResponse::from).collect(),
        total,
        page: pagination.page,
        limit: pagination.limit,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Role;

    fn document(owner: Uuid, is_public: bool) -> DocumentRow {
        let now = Utc::now();
        DocumentRow {
            id: Uuid::new_v4(),
            title: "Design notes".to_string(),
            content: "Notes about the design of the system.".to_string(),
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

    fn user(role: Role) -> AuthenticatedUser {
        AuthenticatedUser {
            user_id: Uuid::new_v4(),
            email: "dave@example.com".to_string(),
            role,
        }
    }

    #[test]
    fn test_private_document_access() {
        let owner = user(Role::User);
        let stranger = user(Role::User);
        let admin = user(Role::Admin);
        let doc = document(owner.user_id, false);

        assert!(authorize(&doc, Some(&owner), Access::Read).is_ok());
        assert!(authorize(&doc, Some(&owner), Access::Write).is_ok());
        assert!(authorize(&doc, Some(&admin), Access::Read).is_ok());
        assert!(matches!(
            authorize(&doc, Some(&admin), Access::Write),
            Err(Error::Forbidden(_))
        ));
        assert!(authorize(&doc, Some(&stranger), Access::Read).is_err());
        assert!(authorize(&doc, None, Access::Read).is_err());
    }

    #[test]
    fn test_public_document_access() {
        let owner = user(Role::User);
        let stranger = user(Role::User);
        let doc = document(owner.user_id, true);

        assert!(authorize(&doc, None, Access::Read).is_ok());
        assert!(authorize(&doc, Some(&stranger), Access::Read).is_ok());
        assert!(authorize(&doc, Some(&stranger), Access::Write).is_err());
        assert!(authorize(&doc, None, Access::Write).is_err());
    }

    #[test]
    fn test_like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern("report"), "%report%");
        assert_eq!(like_pattern("100%_done\\"), "%100\\%\\_done\\\\%");
    }

    #[test]
    fn test_filter_owner_scope() {
        let owner = Uuid::new_v4();
        let (sql, params) = DocumentFilter::new(Scope::Owner(owner)).render();
        assert_eq!(sql, "user_id = $1");
        assert_eq!(params, vec![SqlParam::Uuid(owner)]);
    }

    #[test]
    fn test_filter_visible_with_search_and_tag() {
        let viewer = Uuid::new_v4();
        let (sql, params) = DocumentFilter::new(Scope::VisibleTo(Some(viewer)))
            .search(Some(" Budget ".to_string()))
            .tag(Some(" Finance".to_string()))
            .render();

        assert_eq!(
            sql,
            "(is_public OR user_id = $1) AND (title ILIKE $2 OR content ILIKE $2 OR $3 = ANY(tags)) AND $4 = ANY(tags)"
        );
        assert_eq!(
            params,
            vec![
                SqlParam::Uuid(viewer),
                SqlParam::Text("%Budget%".to_string()),
                SqlParam::Text("budget".to_string()),
                SqlParam::Text("finance".to_string()),
            ]
        );
    }

    #[test]
    fn test_filter_anonymous_sees_public_only() {
        let (sql, params) = DocumentFilter::new(Scope::VisibleTo(None))
            .search(Some("   ".to_string()))
            .render();
        assert_eq!(sql, "is_public");
        assert!(params.is_empty());

        let (sql, _) = DocumentFilter::new(Scope::Public).render();
        assert_eq!(sql, "is_public");
    }
}
