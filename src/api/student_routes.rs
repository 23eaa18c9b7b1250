// src/api/student_routes.rs
// Student-facing endpoints: catalogue reads, uploads, bookmarks, Zanly AI.

use actix_web::{web, HttpResponse};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use super::identity::Caller;
use super::{material_page, AppState, BOOKMARKS_TTL};
use crate::cache::keys::{MaterialFilterQuery, MaterialListQuery, MaterialSearchQuery};
use crate::cache::repository::Source;
use crate::cache::{CacheKey, Resource, Scope};
use crate::db::{Bookmark, NewMaterial, Notification};
use crate::error::AppError;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/user/materials", web::get().to(get_materials))
        .route("/user/search", web::get().to(search_materials))
        .route("/user/filter", web::get().to(filter_materials))
        .route("/user/upload", web::post().to(upload_material))
        .route("/zanlyai", web::post().to(zanly_ai))
        .route("/bookmark/add", web::post().to(add_bookmark))
        .route("/bookmark/get", web::get().to(get_bookmarks))
        .route("/bookmark/{material_id}", web::delete().to(remove_bookmark))
        .route("/app/notifications", web::get().to(get_notifications));
}

// ============ Request Types ============

#[derive(Debug, Deserialize)]
pub struct PromptRequest {
    #[serde(default)]
    pub prompt: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddBookmarkRequest {
    pub material_id: Option<i64>,
}

// ============ Catalogue ============

async fn get_materials(
    state: web::Data<AppState>,
    _caller: Caller,
    query: web::Query<MaterialListQuery>,
) -> Result<HttpResponse, AppError> {
    let page = material_page(&state, &query.cache_key(), query.filter(), query.pagination()).await?;
    Ok(HttpResponse::Ok().json(page))
}

async fn search_materials(
    state: web::Data<AppState>,
    _caller: Caller,
    query: web::Query<MaterialSearchQuery>,
) -> Result<HttpResponse, AppError> {
    if query.text().is_none() {
        return Err(AppError::bad_request("Search query is required"));
    }
    let page = material_page(&state, &query.cache_key(), query.filter(), query.pagination()).await?;
    Ok(HttpResponse::Ok().json(page))
}

async fn filter_materials(
    state: web::Data<AppState>,
    _caller: Caller,
    query: web::Query<MaterialFilterQuery>,
) -> Result<HttpResponse, AppError> {
    if !query.has_any_filter() {
        return Err(AppError::bad_request(
            "At least one filter (type, class, or subject) is required",
        ));
    }
    let page = material_page(&state, &query.cache_key(), query.filter(), query.pagination()).await?;
    Ok(HttpResponse::Ok().json(page))
}

/// Metadata only; the file itself is already in blob storage.
async fn upload_material(
    state: web::Data<AppState>,
    Caller(user_id): Caller,
    body: web::Json<NewMaterial>,
) -> Result<HttpResponse, AppError> {
    let mut material = body.into_inner();
    let required = [&material.title, &material.class, &material.subject, &material.kind, &material.file_url];
    if required.iter().any(|v| v.trim().is_empty()) {
        return Err(AppError::bad_request(
            "Title, class, subject, type, and file are required",
        ));
    }
    material.uploaded_by_id = Some(user_id);

    let created = state
        .invalidator
        .mutate_then_invalidate(
            Resource::Materials,
            Scope::Listings,
            state.materials.create_material(material),
        )
        .await?;

    info!(material_id = created.id, user_id, "Material uploaded");
    Ok(HttpResponse::Created().json(json!({ "message": "Material uploaded", "material": created })))
}

// ============ Zanly AI ============

async fn zanly_ai(
    state: web::Data<AppState>,
    Caller(user_id): Caller,
    body: web::Json<PromptRequest>,
) -> Result<HttpResponse, AppError> {
    let answer = state.rag.answer(&body.prompt).await?;
    info!(user_id, source = ?answer.source, "Zanly AI replied");
    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "reply": answer.text,
        "source": answer.source,
    })))
}

// ============ Bookmarks ============

async fn add_bookmark(
    state: web::Data<AppState>,
    Caller(user_id): Caller,
    body: web::Json<AddBookmarkRequest>,
) -> Result<HttpResponse, AppError> {
    let Some(material_id) = body.material_id else {
        warn!(user_id, "Bookmark add without materialId");
        return Err(AppError::bad_request("Material ID is required"));
    };
    if state.materials.find_material(material_id).await?.is_none() {
        return Err(AppError::not_found("Material", material_id));
    }

    let bookmark = state
        .invalidator
        .mutate_then_invalidate(
            Resource::Bookmarks,
            Scope::Entity(user_id),
            state.bookmarks.add_bookmark(user_id, material_id),
        )
        .await?;

    info!(user_id, material_id, "Bookmark added");
    Ok(HttpResponse::Created().json(json!({
        "success": true,
        "message": "Bookmark added successfully",
        "bookmark": bookmark,
    })))
}

async fn get_bookmarks(state: web::Data<AppState>, Caller(user_id): Caller) -> Result<HttpResponse, AppError> {
    let (bookmarks, source) = state
        .cache
        .fetch_traced(&CacheKey::bookmarks(user_id), BOOKMARKS_TTL, || async {
            let list: Vec<Bookmark> = state.bookmarks.list_bookmarks(user_id).await?;
            // Not cached: the first bookmark would otherwise stay hidden until expiry.
            if list.is_empty() {
                return Err(AppError::NotFound("No bookmarks found".to_string()));
            }
            Ok(list)
        })
        .await?;

    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "source": match source {
            Source::Cache => "cache",
            Source::Store => "db",
        },
        "bookmarks": bookmarks,
    })))
}

async fn remove_bookmark(
    state: web::Data<AppState>,
    Caller(user_id): Caller,
    path: web::Path<i64>,
) -> Result<HttpResponse, AppError> {
    let material_id = path.into_inner();
    let removed = state
        .invalidator
        .mutate_then_invalidate(
            Resource::Bookmarks,
            Scope::Entity(user_id),
            state.bookmarks.remove_bookmark(user_id, material_id),
        )
        .await?;
    if !removed {
        return Err(AppError::NotFound("Bookmark not found".to_string()));
    }

    info!(user_id, material_id, "Bookmark removed");
    Ok(HttpResponse::Ok().json(json!({ "success": true, "message": "Bookmark removed successfully" })))
}

// ============ Notifications ============

async fn get_notifications(state: web::Data<AppState>, _caller: Caller) -> Result<HttpResponse, AppError> {
    let notifications: Vec<Notification> = state
        .cache
        .fetch(&CacheKey::notifications(), state.cache_ttl, || async {
            Ok::<_, AppError>(state.notifications.list_active(chrono::Utc::now()).await?)
        })
        .await?;
    Ok(HttpResponse::Ok().json(json!({ "success": true, "notifications": notifications })))
}
