// src/api/admin_routes.rs
// Admin endpoints: users, moderation, notifications, cache and jobs.

use actix_web::{web, HttpResponse};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use super::identity::AdminCaller;
use super::{material_page, AppState};
use crate::cache::keys::{AdminMaterialQuery, UserListQuery};
use crate::cache::{CacheKey, Resource, Scope};
use crate::db::{MaterialStatus, NewNotification, NewUser, Role, User, UserPatch};
use crate::error::AppError;
use crate::queue::{CleanupJob, CleanupTarget, EmailJob, EmailType, Job};

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/users", web::get().to(get_all_users))
        .route("/user", web::post().to(create_user))
        .route("/user/{id}", web::get().to(get_user_by_id))
        .route("/user/{id}", web::put().to(update_user))
        .route("/user/{id}", web::delete().to(delete_user))
        .route("/user/{id}/role", web::patch().to(change_user_role))
        .route("/material/{id}/approve", web::patch().to(approve_material))
        .route("/material/{id}/reject", web::patch().to(reject_material))
        .route("/materials", web::get().to(get_all_materials))
        .route("/material/{id}", web::get().to(get_material_by_id))
        .route("/notification/add", web::post().to(add_notification))
        .route("/notification/remove", web::delete().to(remove_expired_notifications))
        .route("/clear/cache", web::get().to(clear_cache))
        .route("/jobs/email", web::post().to(enqueue_email))
        .route("/jobs/stats", web::get().to(job_stats))
        .route("/jobs/{id}", web::get().to(get_job));
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPage {
    pub message: String,
    pub users: Vec<User>,
    pub page: u32,
    pub total_pages: u64,
    pub total: u64,
}

#[derive(Debug, Deserialize)]
pub struct RoleRequest {
    pub role: Option<Role>,
}

// ============ Users ============

async fn get_all_users(
    state: web::Data<AppState>,
    _admin: AdminCaller,
    query: web::Query<UserListQuery>,
) -> Result<HttpResponse, AppError> {
    let p = query.pagination();
    let page: UserPage = state
        .cache
        .fetch(&query.cache_key(), state.cache_ttl, || async {
            let (users, total) =
                tokio::try_join!(state.users.list_users(p.skip(), p.take()), state.users.count_users())?;
            Ok::<_, AppError>(UserPage {
                message: "Users fetched successfully".to_string(),
                users,
                page: p.page,
                total_pages: p.total_pages(total),
                total,
            })
        })
        .await?;
    Ok(HttpResponse::Ok().json(page))
}

/// Creates the account and queues the welcome email.
async fn create_user(
    state: web::Data<AppState>,
    _admin: AdminCaller,
    body: web::Json<NewUser>,
) -> Result<HttpResponse, AppError> {
    let new_user = body.into_inner();
    if new_user.name.trim().is_empty() || new_user.email.trim().is_empty() {
        return Err(AppError::bad_request("Name and email are required"));
    }

    let user = state
        .invalidator
        .mutate_then_invalidate(Resource::Users, Scope::Listings, state.users.create_user(new_user))
        .await?;

    let welcome = Job::SendEmail(EmailJob {
        to: user.email.clone(),
        name: user.name.clone(),
        email_type: EmailType::Welcome,
        otp: None,
    });
    // The account exists either way; a lost welcome mail is not worth a 5xx.
    if let Err(e) = state.queue.enqueue(welcome).await {
        warn!(user_id = user.id, error = %e, "Failed to enqueue welcome email");
    }

    info!(user_id = user.id, "Admin created user");
    Ok(HttpResponse::Created().json(json!({ "message": "User created successfully", "user": user })))
}

async fn get_user_by_id(
    state: web::Data<AppState>,
    _admin: AdminCaller,
    path: web::Path<i64>,
) -> Result<HttpResponse, AppError> {
    let id = path.into_inner();
    let user: User = state
        .cache
        .fetch(&CacheKey::user(id), state.cache_ttl, || async {
            state
                .users
                .find_user(id)
                .await?
                .ok_or_else(|| AppError::not_found("User", id))
        })
        .await?;
    Ok(HttpResponse::Ok().json(json!({ "message": "User fetched successfully", "user": user })))
}

/// Shared by full updates and role changes: write, refresh the entity key,
/// drop the listings.
async fn apply_user_patch(state: &AppState, id: i64, patch: UserPatch) -> Result<User, AppError> {
    let user = state
        .invalidator
        .mutate_then_invalidate(Resource::Users, Scope::Listings, state.users.update_user(id, patch))
        .await?
        .ok_or_else(|| AppError::not_found("User", id))?;
    state.cache.write_through(&CacheKey::user(id), &user, state.cache_ttl).await;
    Ok(user)
}

async fn update_user(
    state: web::Data<AppState>,
    _admin: AdminCaller,
    path: web::Path<i64>,
    body: web::Json<UserPatch>,
) -> Result<HttpResponse, AppError> {
    let id = path.into_inner();
    let user = apply_user_patch(&state, id, body.into_inner()).await?;
    info!(user_id = id, "Admin updated user");
    Ok(HttpResponse::Ok().json(json!({ "message": "User updated successfully", "user": user })))
}

async fn change_user_role(
    state: web::Data<AppState>,
    _admin: AdminCaller,
    path: web::Path<i64>,
    body: web::Json<RoleRequest>,
) -> Result<HttpResponse, AppError> {
    let id = path.into_inner();
    let Some(role) = body.role else {
        return Err(AppError::bad_request("Role is required"));
    };
    let patch = UserPatch {
        role: Some(role),
        ..Default::default()
    };
    let user = apply_user_patch(&state, id, patch).await?;
    info!(user_id = id, role = role.as_str(), "Admin changed user role");
    Ok(HttpResponse::Ok().json(json!({ "message": "User role updated successfully", "user": user })))
}

async fn delete_user(
    state: web::Data<AppState>,
    _admin: AdminCaller,
    path: web::Path<i64>,
) -> Result<HttpResponse, AppError> {
    let id = path.into_inner();
    let deleted = state
        .invalidator
        .mutate_then_invalidate(Resource::Users, Scope::Entity(id), state.users.delete_user(id))
        .await?;
    if !deleted {
        return Err(AppError::not_found("User", id));
    }
    // Bookmarks went with the user.
    state.invalidator.invalidate(Resource::Bookmarks, Scope::Entity(id)).await;

    info!(user_id = id, "Admin deleted user");
    Ok(HttpResponse::Ok().json(json!({ "message": "User deleted successfully" })))
}

// ============ Materials ============

async fn set_status(state: &AppState, id: i64, status: MaterialStatus) -> Result<HttpResponse, AppError> {
    let material = state
        .invalidator
        .mutate_then_invalidate(
            Resource::Materials,
            Scope::Entity(id),
            state.materials.set_material_status(id, status),
        )
        .await?
        .ok_or_else(|| AppError::not_found("Material", id))?;
    // Bookmark listings embed the material, status included.
    state.invalidator.invalidate(Resource::Bookmarks, Scope::All).await;

    info!(material_id = id, status = %status, "Material moderated");
    let message = match status {
        MaterialStatus::Approved => "Material approved",
        MaterialStatus::Rejected => "Material rejected",
        MaterialStatus::Pending => "Material reset to pending",
    };
    Ok(HttpResponse::Ok().json(json!({ "message": message, "material": material })))
}

async fn approve_material(
    state: web::Data<AppState>,
    _admin: AdminCaller,
    path: web::Path<i64>,
) -> Result<HttpResponse, AppError> {
    set_status(&state, path.into_inner(), MaterialStatus::Approved).await
}

async fn reject_material(
    state: web::Data<AppState>,
    _admin: AdminCaller,
    path: web::Path<i64>,
) -> Result<HttpResponse, AppError> {
    set_status(&state, path.into_inner(), MaterialStatus::Rejected).await
}

async fn get_all_materials(
    state: web::Data<AppState>,
    _admin: AdminCaller,
    query: web::Query<AdminMaterialQuery>,
) -> Result<HttpResponse, AppError> {
    let page = material_page(&state, &query.cache_key(), query.filter(), query.pagination()).await?;
    Ok(HttpResponse::Ok().json(page))
}

async fn get_material_by_id(
    state: web::Data<AppState>,
    _admin: AdminCaller,
    path: web::Path<i64>,
) -> Result<HttpResponse, AppError> {
    let id = path.into_inner();
    let material = state
        .materials
        .find_material(id)
        .await?
        .ok_or_else(|| AppError::not_found("Material", id))?;
    Ok(HttpResponse::Ok().json(json!({ "message": "Material fetched successfully", "material": material })))
}

// ============ Notifications ============

async fn add_notification(
    state: web::Data<AppState>,
    _admin: AdminCaller,
    body: web::Json<NewNotification>,
) -> Result<HttpResponse, AppError> {
    let new = body.into_inner();
    if new.title.trim().is_empty() || new.message.trim().is_empty() {
        return Err(AppError::bad_request("Title and message are required"));
    }
    let notification = state
        .invalidator
        .mutate_then_invalidate(
            Resource::Notifications,
            Scope::Listings,
            state.notifications.create_notification(new),
        )
        .await?;
    Ok(HttpResponse::Created().json(json!({ "message": "Notification added", "notification": notification })))
}

/// Cleanup runs on the worker; the caller only gets the job id.
async fn remove_expired_notifications(
    state: web::Data<AppState>,
    _admin: AdminCaller,
) -> Result<HttpResponse, AppError> {
    let id = state
        .queue
        .enqueue(Job::CleanupExpired(CleanupJob {
            target: CleanupTarget::Notifications,
        }))
        .await?;
    Ok(HttpResponse::Accepted().json(json!({ "message": "Cleanup scheduled", "jobId": id })))
}

// ============ Cache ============

/// Drops the cache namespaces only; rate-limit windows and queued jobs may
/// share the backend and must survive.
async fn clear_cache(state: web::Data<AppState>, AdminCaller(admin_id): AdminCaller) -> Result<HttpResponse, AppError> {
    let report = state.invalidator.clear_all().await;
    if !report.is_clean() {
        return Err(AppError::Unavailable("Cache could not be fully cleared".to_string()));
    }
    info!(admin_id, keys_deleted = report.keys_deleted, "Cache cleared");
    Ok(HttpResponse::Ok().json(json!({
        "message": "Cache cleared successfully",
        "keysDeleted": report.keys_deleted,
    })))
}

// ============ Jobs ============

async fn enqueue_email(
    state: web::Data<AppState>,
    _admin: AdminCaller,
    body: web::Json<EmailJob>,
) -> Result<HttpResponse, AppError> {
    let id = state.queue.enqueue(Job::SendEmail(body.into_inner())).await?;
    Ok(HttpResponse::Accepted().json(json!({ "message": "Email queued", "jobId": id })))
}

async fn job_stats(state: web::Data<AppState>, _admin: AdminCaller) -> Result<HttpResponse, AppError> {
    let stats = state.queue.stats().await?;
    Ok(HttpResponse::Ok().json(json!({ "queue": state.queue.name(), "stats": stats })))
}

async fn get_job(
    state: web::Data<AppState>,
    _admin: AdminCaller,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let id = path.into_inner();
    let record = state
        .queue
        .get(&id)
        .await?
        .ok_or_else(|| AppError::not_found("Job", &id))?;
    Ok(HttpResponse::Ok().json(record))
}
