use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;

use super::{reply, reply_flat, AppState, AuthUser, JsonBody, MultipartForm};
use crate::models::posts::{
    CreatePostRequest, PostSearchRequest, RemoveImageRequest, UpdatePostRequest,
};
use crate::services::{dispatch, posts::PostRequest, ServiceError};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/post", post(create_post))
        .route("/post/update", post(update_post))
        .route("/post/images", post(attach_images))
        .route("/post/images/remove", post(remove_image))
        .route("/post/delete", post(delete_post))
        .route("/posts", post(search_posts))
        .route("/posts/public", post(search_public_posts))
        .route("/posts/mine", get(my_posts))
        .route("/posts/{post_id}", get(get_post))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeletePostRequest {
    post_id: Option<String>,
}

async fn create_post(
    State(state): State<AppState>,
    user: AuthUser,
    JsonBody(request): JsonBody<CreatePostRequest>,
) -> Result<Response, ServiceError> {
    let post = dispatch(&state.channels.posts, |response| PostRequest::Create {
        user_id: user.user_id,
        request,
        response,
    })
    .await?;

    Ok(reply(StatusCode::CREATED, "Post created successfully", post))
}

async fn update_post(
    State(state): State<AppState>,
    user: AuthUser,
    JsonBody(request): JsonBody<UpdatePostRequest>,
) -> Result<Response, ServiceError> {
    let post = dispatch(&state.channels.posts, |response| PostRequest::Update {
        user_id: user.user_id,
        request,
        response,
    })
    .await?;

    Ok(reply(StatusCode::OK, "Post updated successfully", post))
}

async fn search(
    state: &AppState,
    user_id: Option<String>,
    request: PostSearchRequest,
) -> Result<Response, ServiceError> {
    let posts = dispatch(&state.channels.posts, |response| PostRequest::Search {
        user_id,
        filter: request.filter_data.unwrap_or_default(),
        response,
    })
    .await?;

    Ok(reply(StatusCode::OK, "Posts retrieved", posts))
}

async fn search_posts(
    State(state): State<AppState>,
    user: AuthUser,
    JsonBody(request): JsonBody<PostSearchRequest>,
) -> Result<Response, ServiceError> {
    search(&state, Some(user.user_id), request).await
}

async fn search_public_posts(
    State(state): State<AppState>,
    JsonBody(request): JsonBody<PostSearchRequest>,
) -> Result<Response, ServiceError> {
    search(&state, None, request).await
}

async fn my_posts(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Response, ServiceError> {
    let posts = dispatch(&state.channels.posts, |response| PostRequest::Mine {
        user_id: user.user_id,
        response,
    })
    .await?;

    Ok(reply(StatusCode::OK, "Posts retrieved", posts))
}

async fn get_post(
    State(state): State<AppState>,
    _user: AuthUser,
    Path(post_id): Path<String>,
) -> Result<Response, ServiceError> {
    let post = dispatch(&state.channels.posts, |response| PostRequest::Get {
        post_id,
        response,
    })
    .await?;

    Ok(reply(StatusCode::OK, "Post retrieved", post))
}

/// Multipart `postId` plus one or more image parts. A batch where nothing
/// could be stored is a server error carrying every per-file reason.
async fn attach_images(
    State(state): State<AppState>,
    user: AuthUser,
    multipart: Multipart,
) -> Result<Response, ServiceError> {
    let form = MultipartForm::read(multipart).await?;
    let post_id = form.field("postId");

    let report = dispatch(&state.channels.posts, |response| PostRequest::AttachImages {
        user_id: user.user_id,
        post_id,
        files: form.files,
        response,
    })
    .await?;

    if report.uploaded_files.is_empty() {
        log::error!("No images stored: {:?}", report.upload_errors);
        return Ok((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({
                "success": false,
                "message": "Failed to upload any files",
                "errors": report.upload_errors,
            })),
        )
            .into_response());
    }

    let message = if report.partial_success {
        format!(
            "{} files uploaded successfully, {} failed.",
            report.uploaded_files.len(),
            report.upload_errors.len()
        )
    } else {
        "Files uploaded and post updated successfully.".to_string()
    };

    Ok(reply_flat(StatusCode::OK, &message, report))
}

async fn remove_image(
    State(state): State<AppState>,
    user: AuthUser,
    JsonBody(request): JsonBody<RemoveImageRequest>,
) -> Result<Response, ServiceError> {
    let post = dispatch(&state.channels.posts, |response| PostRequest::RemoveImage {
        user_id: user.user_id,
        request,
        response,
    })
    .await?;

    Ok(reply(StatusCode::OK, "Image removed successfully", post))
}

async fn delete_post(
    State(state): State<AppState>,
    user: AuthUser,
    JsonBody(request): JsonBody<DeletePostRequest>,
) -> Result<Response, ServiceError> {
    dispatch(&state.channels.posts, |response| PostRequest::Delete {
        user_id: user.user_id,
        post_id: request.post_id,
        response,
    })
    .await?;

    Ok(reply(StatusCode::OK, "Post deleted successfully", json!(null)))
}
